//! Telemetry configuration from environment variables.

use std::env;

use tracing::Level;

/// Configuration for logging, log shipping and metrics.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Log level filter (trace, debug, info, warn, error), or any `EnvFilter` directive
    pub log_level: String,

    /// Whether to write logs to the console
    pub console_output: bool,

    /// Whether console logs are JSON formatted
    pub json_logs: bool,

    /// Whether log records are shipped on the bus `logger` domain
    pub ship_logs: bool,

    /// Minimum level of shipped records
    pub ship_level: Level,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            console_output: true,
            json_logs: false,
            ship_logs: true,
            ship_level: Level::INFO,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `HB_LOG_LEVEL` or `RUST_LOG`: Log level (default: info)
    /// - `HB_CONSOLE_OUTPUT`: Enable console output (default: true)
    /// - `HB_JSON_LOGS`: Enable JSON logs (default: false, true in containers)
    /// - `HB_SHIP_LOGS`: Publish log records on the bus (default: true)
    /// - `HB_SHIP_LEVEL`: Minimum shipped level (default: info)
    pub fn from_env() -> Self {
        let is_container =
            env::var("KUBERNETES_SERVICE_HOST").is_ok() || env::var("DOCKER_CONTAINER").is_ok();

        Self {
            log_level: env::var("HB_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),

            console_output: env::var("HB_CONSOLE_OUTPUT")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(true),

            json_logs: env::var("HB_JSON_LOGS")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(is_container),

            ship_logs: env::var("HB_SHIP_LOGS")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(true),

            ship_level: env::var("HB_SHIP_LEVEL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(Level::INFO),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.log_level, "info");
        assert!(config.console_output);
        assert!(!config.json_logs);
        assert_eq!(config.ship_level, Level::INFO);
    }
}
