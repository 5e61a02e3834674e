//! Prometheus metrics for the home bus.
//!
//! All metrics follow the naming convention: `hb_<area>_<metric>[_unit]`
//!
//! ## Metric Types
//!
//! - **Counter**: messages sent/received per domain, RPC call outcomes
//! - **Gauge**: online instances, registry sizes

use lazy_static::lazy_static;
use prometheus::{CounterVec, Encoder, Gauge, Opts, Registry, TextEncoder};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // TRANSPORT METRICS
    // =========================================================================

    /// Messages published, by topic domain
    pub static ref MESSAGES_SENT: CounterVec = CounterVec::new(
        Opts::new("hb_transport_messages_sent_total", "Messages published on the broker"),
        &["domain"]
    ).expect("metric creation failed");

    /// Messages received, by topic domain
    pub static ref MESSAGES_RECEIVED: CounterVec = CounterVec::new(
        Opts::new("hb_transport_messages_received_total", "Messages received from the broker"),
        &["domain"]
    ).expect("metric creation failed");

    // =========================================================================
    // PRESENCE / REGISTRY METRICS
    // =========================================================================

    /// Remote instances currently online
    pub static ref INSTANCES_ONLINE: Gauge = Gauge::new(
        "hb_presence_instances_online",
        "Number of remote instances currently online"
    ).expect("metric creation failed");

    /// Plugins known to the registry (local and remote)
    pub static ref REGISTRY_PLUGINS: Gauge = Gauge::new(
        "hb_registry_plugins",
        "Number of plugins in the registry"
    ).expect("metric creation failed");

    /// Components known to the registry (local and remote)
    pub static ref REGISTRY_COMPONENTS: Gauge = Gauge::new(
        "hb_registry_components",
        "Number of components in the registry"
    ).expect("metric creation failed");

    // =========================================================================
    // RPC METRICS
    // =========================================================================

    /// Client RPC calls by outcome: success/remote_error/timeout/failed
    pub static ref RPC_CALLS: CounterVec = CounterVec::new(
        Opts::new("hb_rpc_calls_total", "RPC calls issued by this instance"),
        &["outcome"]
    ).expect("metric creation failed");
}

/// Handle proving the metrics were registered.
#[derive(Debug, Clone, Copy)]
pub struct MetricsHandle {
    _registered: bool,
}

/// Register every metric in the global registry. Safe to call twice.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(MESSAGES_SENT.clone()),
        Box::new(MESSAGES_RECEIVED.clone()),
        Box::new(INSTANCES_ONLINE.clone()),
        Box::new(REGISTRY_PLUGINS.clone()),
        Box::new(REGISTRY_COMPONENTS.clone()),
        Box::new(RPC_CALLS.clone()),
    ];

    for collector in collectors {
        match REGISTRY.register(collector) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(MetricsHandle { _registered: true })
}

/// Render all registered metrics in the Prometheus text format.
pub fn gather_metrics() -> Result<String, TelemetryError> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&REGISTRY.gather(), &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}
