//! # Bus Registry
//!
//! The per-instance table of plugins and components, and the machinery that
//! keeps it consistent with every other instance on the bus.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                         Registry                         │
//! │   instance "" (local)      instance "a"     instance "b" │
//! │   plugins / components     ...              ...          │
//! └───────────▲──────────────────────▲───────────────────────┘
//!             │ RegistryEvent        │ add/remove
//! ┌───────────┴──────────────────────┴───────────────────────┐
//! │                       BusPublisher                       │
//! │   local → retained metadata + dispatchers                │
//! │   remote → metadata views + RemoteComponent proxies      │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Components present one surface (`Component`) whether they run here
//! (`LocalComponent`) or on another instance (`RemoteComponent`).

pub mod bus_publisher;
pub mod component;
pub mod error;
pub mod registry;
pub mod remote;

pub use bus_publisher::BusPublisher;
pub use component::{ActionHandler, Component, LocalComponent, LocalComponentBuilder, StateChange};
pub use error::{ComponentError, RegistryError};
pub use registry::{ComponentData, Registry, RegistryEvent, LOCAL_INSTANCE};
pub use remote::RemoteComponent;
