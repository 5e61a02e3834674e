//! Cross-instance scenarios.

mod e2e_components;
mod e2e_discovery;
mod e2e_rpc;
