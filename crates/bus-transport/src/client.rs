//! # Transport
//!
//! Wraps one broker session for this instance:
//!
//! - connection lifecycle, with a last-will clearing `{self}/online`
//! - liveness: `{self}/online = true` (retained) on every connect
//! - reference-counted subscriptions, replayed after a reconnect
//! - a single dispatch task that broadcasts incoming messages, in receipt
//!   order, to every `on_message` listener
//!
//! No lock is held across a broker call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bus_telemetry::{MESSAGES_RECEIVED, MESSAGES_SENT};
use bus_types::codec::encode_bool;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::broker::{BrokerClient, BrokerEvent, BrokerEvents, LastWill};
use crate::callbacks::CallbackManager;
use crate::error::TransportError;
use crate::topics::{build_topic, parse_topic, Domain};

/// Transport settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Unique name of this instance; first level of every own topic.
    pub instance_name: String,
}

impl TransportConfig {
    pub fn new(instance_name: impl Into<String>) -> Self {
        Self {
            instance_name: instance_name.into(),
        }
    }
}

/// A message as seen by transport listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retained: bool,
}

fn domain_label(topic: &str) -> &'static str {
    parse_topic(topic)
        .map(|parsed| parsed.domain.as_str())
        .unwrap_or("unknown")
}

/// Broker session of this instance.
pub struct Transport {
    instance_name: String,
    broker: Arc<dyn BrokerClient>,
    online: AtomicBool,
    subscriptions: Mutex<HashMap<String, usize>>,
    on_online_change: CallbackManager<bool>,
    on_message: CallbackManager<IncomingMessage>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Transport {
    pub fn new(config: TransportConfig, broker: Arc<dyn BrokerClient>) -> Arc<Self> {
        Arc::new(Self {
            instance_name: config.instance_name,
            broker,
            online: AtomicBool::new(false),
            subscriptions: Mutex::new(HashMap::new()),
            on_online_change: CallbackManager::new(),
            on_message: CallbackManager::new(),
            dispatcher: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Fired with the new state whenever the connection goes up or down.
    #[must_use]
    pub fn on_online_change(&self) -> &CallbackManager<bool> {
        &self.on_online_change
    }

    /// Fired for every incoming message, in receipt order.
    #[must_use]
    pub fn on_message(&self) -> &CallbackManager<IncomingMessage> {
        &self.on_message
    }

    /// Topic under this instance's namespace.
    #[must_use]
    pub fn build_topic(&self, domain: Domain, path: &[&str]) -> String {
        build_topic(&self.instance_name, domain, path)
    }

    /// Topic under another instance's namespace.
    #[must_use]
    pub fn build_remote_topic(&self, instance: &str, domain: Domain, path: &[&str]) -> String {
        build_topic(instance, domain, path)
    }

    fn online_topic(&self) -> String {
        self.build_topic(Domain::Online, &[])
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Connect and start the dispatch task.
    pub async fn start(self: &Arc<Self>) -> Result<(), TransportError> {
        let will = LastWill {
            topic: self.online_topic(),
            payload: Vec::new(),
            retain: true,
        };
        let events = self.broker.connect(Some(will)).await?;

        self.handle_connected();

        let handle = tokio::spawn(Self::dispatch(Arc::downgrade(self), events));
        if let Some(previous) = self.dispatcher.lock().replace(handle) {
            previous.abort();
        }

        info!(instance = %self.instance_name, "Transport started");
        Ok(())
    }

    /// Clear liveness, disconnect and stop dispatching.
    pub async fn terminate(&self) -> Result<(), TransportError> {
        if self.is_online() {
            if let Err(e) = self.publish(&self.online_topic(), Vec::new(), true).await {
                warn!(instance = %self.instance_name, error = %e, "Failed to clear liveness");
            }
        }

        let result = self.broker.disconnect().await;
        if let Some(handle) = self.dispatcher.lock().take() {
            handle.abort();
        }
        self.set_online(false);

        info!(instance = %self.instance_name, "Transport terminated");
        result
    }

    async fn dispatch(transport: Weak<Self>, mut events: BrokerEvents) {
        while let Some(event) = events.recv().await {
            let Some(transport) = transport.upgrade() else {
                break;
            };
            match event {
                BrokerEvent::Connected => {
                    // The initial connect is handled by `start`.
                    if !transport.is_online() {
                        transport.handle_connected();
                    }
                }
                BrokerEvent::Disconnected => {
                    warn!(instance = %transport.instance_name, "Broker connection lost");
                    transport.set_online(false);
                }
                BrokerEvent::Message(message) => {
                    MESSAGES_RECEIVED
                        .with_label_values(&[domain_label(&message.topic)])
                        .inc();
                    transport.on_message.emit(&IncomingMessage {
                        topic: message.topic,
                        payload: message.payload,
                        retained: message.retained,
                    });
                }
            }
        }
        debug!("Transport dispatch loop ended");
    }

    fn handle_connected(self: &Arc<Self>) {
        self.online.store(true, Ordering::Release);

        self.publish_detached(self.online_topic(), encode_bool(true), true);

        let filters: Vec<String> = self.subscriptions.lock().keys().cloned().collect();
        if !filters.is_empty() {
            let transport = self.clone();
            tokio::spawn(async move {
                if let Err(e) = transport.broker.subscribe(&filters).await {
                    warn!(
                        instance = %transport.instance_name,
                        error = %e,
                        "Failed to restore subscriptions"
                    );
                }
            });
        }

        self.on_online_change.emit(&true);
    }

    fn set_online(&self, online: bool) {
        let previous = self.online.swap(online, Ordering::AcqRel);
        if previous != online {
            self.on_online_change.emit(&online);
        }
    }

    // =========================================================================
    // PUBLISH / SUBSCRIBE
    // =========================================================================

    pub async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> Result<(), TransportError> {
        if !self.is_online() {
            return Err(TransportError::NotConnected);
        }
        self.broker.publish(topic, payload, retain).await?;
        MESSAGES_SENT.with_label_values(&[domain_label(topic)]).inc();
        Ok(())
    }

    /// Fire-and-forget publish; failures are logged.
    pub fn publish_detached(self: &Arc<Self>, topic: String, payload: Vec<u8>, retain: bool) {
        let transport = self.clone();
        tokio::spawn(async move {
            if let Err(e) = transport.publish(&topic, payload, retain).await {
                warn!(topic = %topic, error = %e, "Background publish failed");
            }
        });
    }

    /// Add a reference to a filter; the broker is only asked on first use.
    pub async fn subscribe(&self, filter: &str) -> Result<(), TransportError> {
        let first = {
            let mut subscriptions = self.subscriptions.lock();
            let count = subscriptions.entry(filter.to_string()).or_insert(0);
            *count += 1;
            *count == 1
        };

        if first && self.is_online() {
            if let Err(e) = self.broker.subscribe(&[filter.to_string()]).await {
                self.release(filter);
                return Err(e);
            }
        }

        debug!(filter = %filter, "Subscribed");
        Ok(())
    }

    /// Drop a reference to a filter; the broker is only asked on last use.
    pub async fn unsubscribe(&self, filter: &str) -> Result<(), TransportError> {
        if !self.subscriptions.lock().contains_key(filter) {
            return Err(TransportError::NotSubscribed(filter.to_string()));
        }

        if self.release(filter) && self.is_online() {
            self.broker.unsubscribe(&[filter.to_string()]).await?;
        }

        debug!(filter = %filter, "Unsubscribed");
        Ok(())
    }

    /// Returns `true` when the last reference went away.
    fn release(&self, filter: &str) -> bool {
        let mut subscriptions = self.subscriptions.lock();
        let Some(count) = subscriptions.get_mut(filter) else {
            return false;
        };
        *count = count.saturating_sub(1);
        if *count == 0 {
            subscriptions.remove(filter);
            return true;
        }
        false
    }

    #[must_use]
    pub fn subscription_count(&self, filter: &str) -> usize {
        self.subscriptions.lock().get(filter).copied().unwrap_or(0)
    }
}
