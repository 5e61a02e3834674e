//! # Home Bus Test Suite
//!
//! Multi-instance scenarios: several `BusNode`s sharing one
//! `InMemoryBroker`, observing each other through presence, retained
//! metadata, component topics and RPC.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── fixtures.rs          # nodes, plugins, polling helpers
//! └── integration/
//!     ├── e2e_discovery.rs # metadata replay, ordering, teardown
//!     ├── e2e_components.rs# remote actions and state mirroring
//!     └── e2e_rpc.rs       # request/reply, timeouts, remote errors
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p bus-tests
//! cargo test -p bus-tests integration::e2e_rpc::
//! ```

pub mod fixtures;
pub mod integration;
