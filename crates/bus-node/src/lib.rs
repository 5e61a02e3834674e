//! # Bus Node
//!
//! The context object of one home bus instance.
//!
//! `BusNode` owns every service of the instance and is passed around
//! explicitly; there is no process-wide singleton.
//!
//! ## Startup Sequence
//!
//! 1. Validate configuration
//! 2. Connect the transport (announces `{self}/online`)
//! 3. Start presence tracking
//! 4. Start the bus publisher (announces `instance-info`, tracks instances
//!    already online, publishes local registry entries)
//!
//! ## Shutdown Sequence
//!
//! Reverse order: bus publisher, presence, RPC, local metadata, log
//! shipping, transport.

pub mod config;

use std::sync::Arc;
use std::time::Duration;

use bus_registry::{BusPublisher, Registry};
use bus_telemetry::LogReceiver;
use bus_transport::{
    BrokerClient, Domain, LocalMetadata, Presence, RpcError, RpcService, Transport,
    TransportConfig, TransportError,
};
use bus_types::InstanceInfo;
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub use config::{ConfigError, NodeConfig, DEFAULT_RPC_TIMEOUT};

/// Node lifecycle errors.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("node '{0}' is already started")]
    AlreadyStarted(String),
}

/// Services started by `BusNode::start`.
struct Running {
    presence: Arc<Presence>,
    publisher: Arc<BusPublisher>,
}

/// One bus instance.
pub struct BusNode {
    config: NodeConfig,
    transport: Arc<Transport>,
    registry: Arc<Registry>,
    rpc: Arc<RpcService>,
    local_metadata: Arc<LocalMetadata>,
    running: Mutex<Option<Running>>,
    log_shipper: Mutex<Option<JoinHandle<()>>>,
}

impl BusNode {
    /// Create the node. Nothing touches the broker until `start`.
    pub fn new(config: NodeConfig, broker: Arc<dyn BrokerClient>) -> Result<Arc<Self>, NodeError> {
        config.validate()?;

        let transport = Transport::new(TransportConfig::new(config.instance_name.clone()), broker);
        let rpc = RpcService::new(transport.clone());
        let local_metadata = LocalMetadata::new(transport.clone());

        Ok(Arc::new(Self {
            config,
            transport,
            registry: Arc::new(Registry::new()),
            rpc,
            local_metadata,
            running: Mutex::new(None),
            log_shipper: Mutex::new(None),
        }))
    }

    #[must_use]
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    #[must_use]
    pub fn instance_name(&self) -> &str {
        &self.config.instance_name
    }

    #[must_use]
    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    #[must_use]
    pub fn rpc(&self) -> &Arc<RpcService> {
        &self.rpc
    }

    /// Presence tracker, once started.
    #[must_use]
    pub fn presence(&self) -> Option<Arc<Presence>> {
        self.running.lock().as_ref().map(|r| r.presence.clone())
    }

    /// Bus publisher, once started.
    #[must_use]
    pub fn publisher(&self) -> Option<Arc<BusPublisher>> {
        self.running.lock().as_ref().map(|r| r.publisher.clone())
    }

    fn instance_info(&self) -> InstanceInfo {
        let mut info = InstanceInfo {
            instance_type: self.config.instance_type.clone(),
            hostname: self.config.hostname.clone(),
            ..InstanceInfo::default()
        };
        info.versions
            .insert("bus-node".to_string(), env!("CARGO_PKG_VERSION").to_string());
        info.capabilities.push("rpc".to_string());
        info
    }

    /// Connect and start every service.
    pub async fn start(&self) -> Result<(), NodeError> {
        if self.running.lock().is_some() {
            return Err(NodeError::AlreadyStarted(self.config.instance_name.clone()));
        }

        self.transport.start().await?;
        let presence = Presence::start(self.transport.clone()).await?;
        let publisher = match BusPublisher::start(
            self.transport.clone(),
            self.registry.clone(),
            presence.clone(),
            self.local_metadata.clone(),
            self.instance_info(),
        )
        .await
        {
            Ok(publisher) => publisher,
            Err(e) => {
                let _ = presence.terminate().await;
                let _ = self.transport.terminate().await;
                return Err(e.into());
            }
        };

        *self.running.lock() = Some(Running {
            presence,
            publisher,
        });

        info!(
            instance = %self.config.instance_name,
            instance_type = %self.config.instance_type,
            "Bus node started"
        );
        Ok(())
    }

    /// Publish every shipped log record on `{self}/logger`, unretained.
    pub fn ship_logs(&self, mut records: LogReceiver) {
        let transport = self.transport.clone();
        let topic = transport.build_topic(Domain::Logger, &[]);
        let handle = tokio::spawn(async move {
            while let Some(record) = records.recv().await {
                let Ok(payload) = serde_json::to_vec(&record) else {
                    continue;
                };
                // Failures are not logged: the record would come back here.
                let _ = transport.publish(&topic, payload, false).await;
            }
        });
        if let Some(previous) = self.log_shipper.lock().replace(handle) {
            previous.abort();
        }
    }

    /// `RpcService::call` with the configured timeout.
    pub async fn call(&self, instance: &str, address: &str, input: Value) -> Result<Value, RpcError> {
        self.call_with_timeout(instance, address, input, self.config.rpc_timeout)
            .await
    }

    pub async fn call_with_timeout(
        &self,
        instance: &str,
        address: &str,
        input: Value,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        self.rpc.call(instance, address, input, timeout).await
    }

    /// Stop every service and disconnect. Safe to call more than once.
    pub async fn terminate(&self) {
        let running = self.running.lock().take();
        if let Some(running) = running {
            running.publisher.terminate().await;
            if let Err(e) = running.presence.terminate().await {
                warn!(instance = %self.config.instance_name, error = %e, "Presence did not stop cleanly");
            }
        }

        self.rpc.terminate().await;
        self.local_metadata.close();
        if let Some(handle) = self.log_shipper.lock().take() {
            handle.abort();
        }
        if let Err(e) = self.transport.terminate().await {
            warn!(instance = %self.config.instance_name, error = %e, "Transport did not stop cleanly");
        }

        info!(instance = %self.config.instance_name, "Bus node terminated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bus_telemetry::BusLogRecord;
    use bus_transport::InMemoryBroker;
    use std::collections::BTreeMap;
    use tokio::sync::mpsc;

    fn node(broker: &InMemoryBroker, name: &str) -> Arc<BusNode> {
        BusNode::new(NodeConfig::named(name), Arc::new(broker.client())).unwrap()
    }

    #[tokio::test]
    async fn test_start_announces_instance() {
        let broker = InMemoryBroker::new();
        let node = node(&broker, "kitchen");
        node.start().await.unwrap();

        assert!(broker.retained("kitchen/online").is_some());
        let info: InstanceInfo = serde_json::from_slice(
            &broker.retained("kitchen/metadata/instance-info").unwrap(),
        )
        .unwrap();
        assert_eq!(info.instance_type, "node");
        assert!(info.versions.contains_key("bus-node"));

        assert!(matches!(node.start().await, Err(NodeError::AlreadyStarted(_))));

        node.terminate().await;
        assert_eq!(broker.retained("kitchen/online"), None);
        assert_eq!(broker.session_count(), 0);
        node.terminate().await;
    }

    #[test]
    fn test_invalid_config_rejected() {
        let broker = InMemoryBroker::new();
        let result = BusNode::new(NodeConfig::named("a/b"), Arc::new(broker.client()));
        assert!(matches!(
            result,
            Err(NodeError::Config(ConfigError::InvalidInstanceName(_)))
        ));
    }

    #[tokio::test]
    async fn test_log_records_published_on_logger_topic() {
        let broker = InMemoryBroker::new();
        let node = node(&broker, "kitchen");
        node.start().await.unwrap();

        let listener = Transport::new(TransportConfig::new("ui"), Arc::new(broker.client()));
        listener.start().await.unwrap();
        listener.subscribe("kitchen/logger").await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        listener
            .on_message()
            .register(move |message: &bus_transport::IncomingMessage| {
                let _ = tx.send(message.payload.clone());
            });

        let (records_tx, records_rx) = mpsc::unbounded_channel();
        node.ship_logs(records_rx);
        records_tx
            .send(BusLogRecord {
                name: "bus_node".into(),
                instance_name: "kitchen".into(),
                hostname: "pi".into(),
                pid: 1,
                level: 30,
                msg: "hello".into(),
                err: None,
                time: "2024-01-01T00:00:00.000Z".into(),
                v: 0,
                fields: BTreeMap::new(),
            })
            .unwrap();

        let payload = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let record: BusLogRecord = serde_json::from_slice(&payload).unwrap();
        assert_eq!(record.msg, "hello");
        assert_eq!(record.instance_name, "kitchen");
        assert_eq!(broker.retained("kitchen/logger"), None);

        node.terminate().await;
    }
}
