//! # Node Configuration
//!
//! Identity and timeouts of one bus instance, read from the environment.
//!
//! ## Environment Variables
//!
//! - `HB_INSTANCE_NAME`: instance name, first topic segment (default: `node`)
//! - `HB_INSTANCE_TYPE`: announced in `instance-info` (default: `node`)
//! - `HB_RPC_TIMEOUT_MS`: default RPC call timeout (default: 5000)

use std::time::Duration;

use thiserror::Error;
use tracing::warn;

/// Default RPC call timeout.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_millis(5000);

/// Complete node configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    /// Name of this instance on the bus.
    pub instance_name: String,
    /// Free-form instance kind.
    pub instance_type: String,
    /// Host the instance runs on.
    pub hostname: String,
    /// Timeout used by `BusNode::call`.
    pub rpc_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            instance_name: "node".to_string(),
            instance_type: "node".to_string(),
            hostname: "unknown".to_string(),
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("instance name must not be empty")]
    EmptyInstanceName,

    #[error("instance name '{0}' contains a topic-reserved character")]
    InvalidInstanceName(String),

    #[error("RPC timeout must be greater than zero")]
    ZeroRpcTimeout,
}

impl NodeConfig {
    /// Configuration for a named instance, everything else default.
    pub fn named(instance_name: impl Into<String>) -> Self {
        Self {
            instance_name: instance_name.into(),
            ..Self::default()
        }
    }

    /// Load from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(name) = lookup("HB_INSTANCE_NAME") {
            config.instance_name = name;
        }
        if let Some(kind) = lookup("HB_INSTANCE_TYPE") {
            config.instance_type = kind;
        }
        if let Some(hostname) = lookup("HOSTNAME").or_else(|| lookup("COMPUTERNAME")) {
            config.hostname = hostname;
        }
        if let Some(raw) = lookup("HB_RPC_TIMEOUT_MS") {
            match raw.parse::<u64>() {
                Ok(ms) => config.rpc_timeout = Duration::from_millis(ms),
                Err(_) => warn!(value = %raw, "HB_RPC_TIMEOUT_MS is not a number, using default"),
            }
        }

        config
    }

    /// Reject names that cannot be a topic segment.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instance_name.is_empty() {
            return Err(ConfigError::EmptyInstanceName);
        }
        if self.instance_name.contains(['/', '+', '#']) {
            return Err(ConfigError::InvalidInstanceName(self.instance_name.clone()));
        }
        if self.rpc_timeout.is_zero() {
            return Err(ConfigError::ZeroRpcTimeout);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = NodeConfig::from_lookup(lookup(&[]));
        assert_eq!(config, NodeConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let config = NodeConfig::from_lookup(lookup(&[
            ("HB_INSTANCE_NAME", "kitchen"),
            ("HB_INSTANCE_TYPE", "ui"),
            ("HB_RPC_TIMEOUT_MS", "2000"),
            ("HOSTNAME", "pi"),
        ]));
        assert_eq!(config.instance_name, "kitchen");
        assert_eq!(config.instance_type, "ui");
        assert_eq!(config.hostname, "pi");
        assert_eq!(config.rpc_timeout, Duration::from_millis(2000));
    }

    #[test]
    fn test_bad_timeout_keeps_default() {
        let config = NodeConfig::from_lookup(lookup(&[("HB_RPC_TIMEOUT_MS", "soon")]));
        assert_eq!(config.rpc_timeout, DEFAULT_RPC_TIMEOUT);
    }

    #[test]
    fn test_validate_rejects_reserved_names() {
        assert_eq!(
            NodeConfig::named("").validate(),
            Err(ConfigError::EmptyInstanceName)
        );
        for name in ["a/b", "a+", "#"] {
            assert!(matches!(
                NodeConfig::named(name).validate(),
                Err(ConfigError::InvalidInstanceName(_))
            ));
        }
        let config = NodeConfig {
            rpc_timeout: Duration::ZERO,
            ..NodeConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroRpcTimeout));
    }
}
