//! # Bus Telemetry
//!
//! Observability for home bus instances.
//!
//! ## Components
//!
//! - **Logging**: `tracing-subscriber` console output, pretty or JSON
//! - **Log shipping**: `BusLogLayer` turns events into bunyan-style records
//!   that the node publishes on `{instance}/logger`
//! - **Metrics**: Prometheus counters and gauges for transport, presence,
//!   registry and RPC
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bus_telemetry::{init_telemetry, BusLogLayer, TelemetryConfig};
//!
//! let config = TelemetryConfig::from_env();
//! let (shipper, records) = BusLogLayer::new("kitchen", config.ship_level);
//! init_telemetry(&config, Some(shipper))?;
//! // drain `records` and publish them on the bus
//! ```

mod config;
mod logging;
mod metrics;

pub use config::TelemetryConfig;
pub use logging::{init_logging, level_code, BusLogLayer, BusLogRecord, LogError, LogReceiver};
pub use metrics::{
    gather_metrics, register_metrics, MetricsHandle, INSTANCES_ONLINE, MESSAGES_RECEIVED,
    MESSAGES_SENT, REGISTRY, REGISTRY_COMPONENTS, REGISTRY_PLUGINS, RPC_CALLS,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),
}

/// Register metrics and install the global subscriber.
///
/// The shipper, when given, must be the layer whose receiver the caller
/// drains; otherwise records accumulate in memory.
pub fn init_telemetry(
    config: &TelemetryConfig,
    shipper: Option<BusLogLayer>,
) -> Result<MetricsHandle, TelemetryError> {
    let metrics = register_metrics()?;
    init_logging(config, shipper)?;
    Ok(metrics)
}
