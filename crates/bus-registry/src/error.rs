//! # Registry Errors

use bus_transport::TransportError;
use bus_types::{CodecError, MetadataError};
use thiserror::Error;

/// Rejected registry mutations. Nothing is applied when one is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("plugin '{plugin}' already registered for instance '{instance}'")]
    DuplicatePlugin { instance: String, plugin: String },

    #[error("plugin '{plugin}' is not registered for instance '{instance}'")]
    UnknownPlugin { instance: String, plugin: String },

    /// Plugins are never removed while components still reference them.
    #[error("plugin '{plugin}' of instance '{instance}' is still used by {components} component(s)")]
    PluginInUse {
        instance: String,
        plugin: String,
        components: usize,
    },

    #[error("component '{component}' already registered")]
    DuplicateComponent { component: String },

    #[error("component '{component}' is not registered for instance '{instance}'")]
    UnknownComponent { instance: String, component: String },

    #[error("component '{component}' references plugin '{plugin}' missing on instance '{instance}'")]
    MissingPlugin {
        instance: String,
        plugin: String,
        component: String,
    },
}

/// Component-level failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ComponentError {
    #[error("component '{component}' has no member '{member}'")]
    UnknownMember { component: String, member: String },

    #[error("member '{member}' of component '{component}' is not an action")]
    NotAnAction { component: String, member: String },

    #[error("member '{member}' of component '{component}' is not a state")]
    NotAState { component: String, member: String },

    #[error("value {value} is not a valid {value_type} for '{component}.{member}'")]
    InvalidValue {
        component: String,
        member: String,
        value_type: String,
        value: String,
    },

    #[error("action '{member}' of component '{component}' has no handler")]
    MissingAction { component: String, member: String },

    #[error("action '{member}' of component '{component}' failed: {message}")]
    ActionFailed {
        component: String,
        member: String,
        message: String,
    },

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
