//! Structured logging and bus log shipping.
//!
//! Console output goes through `tracing-subscriber` (pretty or JSON). Log
//! shipping turns each tracing event into a bunyan-style record:
//!
//! ```text
//! {name, instanceName, hostname, pid, level, msg, err?, time, v: 0, ...fields}
//! ```
//!
//! Records are handed to an unbounded channel; the node drains it and
//! publishes each record on `{instance}/logger`.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::{TelemetryConfig, TelemetryError};

/// Targets never shipped, so publishing a record cannot produce another one.
const SUPPRESSED_TARGETS: &[&str] = &["bus_transport"];

/// Bunyan numeric level for a tracing level.
#[must_use]
pub fn level_code(level: &Level) -> u8 {
    match *level {
        Level::TRACE => 10,
        Level::DEBUG => 20,
        Level::INFO => 30,
        Level::WARN => 40,
        Level::ERROR => 50,
    }
}

/// Error attached to a shipped record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// One shipped log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusLogRecord {
    pub name: String,
    pub instance_name: String,
    pub hostname: String,
    pub pid: u32,
    pub level: u8,
    pub msg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<LogError>,
    pub time: String,
    pub v: u8,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

/// Receiving end of shipped records.
pub type LogReceiver = mpsc::UnboundedReceiver<BusLogRecord>;

/// `tracing` layer producing `BusLogRecord`s.
pub struct BusLogLayer {
    instance_name: String,
    hostname: String,
    pid: u32,
    min_level: Level,
    sender: mpsc::UnboundedSender<BusLogRecord>,
}

impl BusLogLayer {
    /// Create the layer and the receiver its records arrive on.
    pub fn new(instance_name: impl Into<String>, min_level: Level) -> (Self, LogReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let hostname = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .unwrap_or_else(|_| "unknown".to_string());

        let layer = Self {
            instance_name: instance_name.into(),
            hostname,
            pid: std::process::id(),
            min_level,
            sender,
        };
        (layer, receiver)
    }

    fn build_record(&self, event: &Event<'_>) -> BusLogRecord {
        let meta = event.metadata();
        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);

        BusLogRecord {
            name: meta.target().to_string(),
            instance_name: self.instance_name.clone(),
            hostname: self.hostname.clone(),
            pid: self.pid,
            level: level_code(meta.level()),
            msg: visitor.message,
            err: visitor.error.map(|message| LogError {
                message,
                name: None,
                stack: None,
            }),
            time: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            v: 0,
            fields: visitor.fields,
        }
    }
}

impl<S: Subscriber> Layer<S> for BusLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        // More verbose levels compare greater.
        if *meta.level() > self.min_level {
            return;
        }
        if SUPPRESSED_TARGETS
            .iter()
            .any(|target| meta.target().starts_with(target))
        {
            return;
        }

        // Receiver gone means the node is shutting down.
        let _ = self.sender.send(self.build_record(event));
    }
}

#[derive(Default)]
struct RecordVisitor {
    message: String,
    error: Option<String>,
    fields: BTreeMap<String, Value>,
}

impl RecordVisitor {
    fn put(&mut self, field: &Field, value: Value) {
        match field.name() {
            "message" => {
                self.message = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                }
            }
            "error" | "err" => {
                self.error = Some(match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                })
            }
            name => {
                self.fields.insert(name.to_string(), value);
            }
        }
    }
}

impl Visit for RecordVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.put(field, Value::String(format!("{:?}", value)));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.put(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, Value::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.put(field, Value::String(value.to_string()));
    }
}

/// Install the global subscriber: env filter, console layer, optional shipper.
pub fn init_logging(
    config: &TelemetryConfig,
    shipper: Option<BusLogLayer>,
) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;

    let console: Option<Box<dyn Layer<Registry> + Send + Sync>> = if !config.console_output {
        None
    } else if config.json_logs {
        Some(
            tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .boxed(),
        )
    } else {
        Some(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_ansi(true)
                .boxed(),
        )
    };

    tracing_subscriber::registry()
        .with(console)
        .with(shipper)
        .with(env_filter)
        .try_init()
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;

    tracing::debug!(
        json_logs = config.json_logs,
        log_level = %config.log_level,
        "Logging initialized"
    );
    Ok(())
}
