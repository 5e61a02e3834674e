//! # Broker Port
//!
//! The transport talks to a publish/subscribe broker through `BrokerClient`.
//! The broker is assumed reliable (at-least-once) and retained-message
//! capable. Incoming traffic and connection changes arrive on the event
//! channel returned by `connect`, in broker delivery order.
//!
//! `InMemoryBroker` is a complete in-process broker: retained store, `+`/`#`
//! filters, last-will on abrupt disconnect. Tests and single-process
//! deployments use it; networked deployments plug a real client in.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::TransportError;
use crate::topics::topic_matches;

/// A message delivered by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    /// Delivered from the retained store on subscribe.
    pub retained: bool,
}

/// Connection-level events, in delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    Connected,
    Disconnected,
    Message(BrokerMessage),
}

/// Message the broker publishes on our behalf if the connection drops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

/// Receiving end of broker events.
pub type BrokerEvents = mpsc::UnboundedReceiver<BrokerEvent>;

/// Driven port: raw broker primitives.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Open a session. The first event on the returned channel is `Connected`.
    async fn connect(&self, will: Option<LastWill>) -> Result<BrokerEvents, TransportError>;

    /// Publish a payload. An empty retained payload deletes the retained entry.
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool)
        -> Result<(), TransportError>;

    /// Add filters; matching retained messages are delivered right away.
    async fn subscribe(&self, filters: &[String]) -> Result<(), TransportError>;

    async fn unsubscribe(&self, filters: &[String]) -> Result<(), TransportError>;

    /// Graceful close. The last-will is not published.
    async fn disconnect(&self) -> Result<(), TransportError>;
}

// =============================================================================
// IN-MEMORY BROKER
// =============================================================================

struct Session {
    sender: mpsc::UnboundedSender<BrokerEvent>,
    filters: HashSet<String>,
    will: Option<LastWill>,
}

#[derive(Default)]
struct BrokerState {
    next_session: u64,
    sessions: HashMap<u64, Session>,
    retained: BTreeMap<String, Vec<u8>>,
}

impl BrokerState {
    fn route(&mut self, topic: &str, payload: Vec<u8>, retain: bool) {
        if retain {
            if payload.is_empty() {
                self.retained.remove(topic);
            } else {
                self.retained.insert(topic.to_string(), payload.clone());
            }
        }

        for session in self.sessions.values() {
            if session.filters.iter().any(|f| topic_matches(f, topic)) {
                // Closed receiver: the session is being torn down.
                let _ = session.sender.send(BrokerEvent::Message(BrokerMessage {
                    topic: topic.to_string(),
                    payload: payload.clone(),
                    retained: false,
                }));
            }
        }
    }

    fn drop_session(&mut self, id: u64, publish_will: bool) {
        let Some(session) = self.sessions.remove(&id) else {
            return;
        };
        let _ = session.sender.send(BrokerEvent::Disconnected);
        if publish_will {
            if let Some(will) = session.will {
                self.route(&will.topic, will.payload, will.retain);
            }
        }
    }
}

/// Shared in-process broker. Cloning shares the same broker.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A new, not yet connected client of this broker.
    #[must_use]
    pub fn client(&self) -> InMemoryBrokerClient {
        InMemoryBrokerClient {
            state: self.state.clone(),
            session: Mutex::new(None),
        }
    }

    /// Current retained payload of a topic.
    #[must_use]
    pub fn retained(&self, topic: &str) -> Option<Vec<u8>> {
        self.state.lock().retained.get(topic).cloned()
    }

    /// Retained topics in lexical order.
    #[must_use]
    pub fn retained_topics(&self) -> Vec<String> {
        self.state.lock().retained.keys().cloned().collect()
    }

    /// Publish from outside any session, as another process would.
    pub fn inject(&self, topic: &str, payload: Vec<u8>, retain: bool) {
        self.state.lock().route(topic, payload, retain);
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }
}

/// One session on an `InMemoryBroker`.
pub struct InMemoryBrokerClient {
    state: Arc<Mutex<BrokerState>>,
    session: Mutex<Option<u64>>,
}

impl InMemoryBrokerClient {
    fn session_id(&self) -> Result<u64, TransportError> {
        (*self.session.lock()).ok_or(TransportError::NotConnected)
    }

    /// Simulate a network failure: the broker publishes the last-will and
    /// the client receives `Disconnected`.
    pub fn drop_connection(&self) {
        let Some(id) = self.session.lock().take() else {
            return;
        };
        debug!(session = id, "Dropping in-memory broker session");
        self.state.lock().drop_session(id, true);
    }
}

#[async_trait]
impl BrokerClient for InMemoryBrokerClient {
    async fn connect(&self, will: Option<LastWill>) -> Result<BrokerEvents, TransportError> {
        let mut session = self.session.lock();
        if session.is_some() {
            return Err(TransportError::AlreadyConnected);
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let _ = sender.send(BrokerEvent::Connected);

        let mut state = self.state.lock();
        let id = state.next_session;
        state.next_session += 1;
        state.sessions.insert(
            id,
            Session {
                sender,
                filters: HashSet::new(),
                will,
            },
        );
        *session = Some(id);
        Ok(receiver)
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> Result<(), TransportError> {
        self.session_id()?;
        self.state.lock().route(topic, payload, retain);
        Ok(())
    }

    async fn subscribe(&self, filters: &[String]) -> Result<(), TransportError> {
        let id = self.session_id()?;
        let mut state = self.state.lock();
        let state = &mut *state;
        let session = state
            .sessions
            .get_mut(&id)
            .ok_or(TransportError::NotConnected)?;

        let mut delivered = HashSet::new();
        for filter in filters {
            session.filters.insert(filter.clone());
            for (topic, payload) in &state.retained {
                if topic_matches(filter, topic) && delivered.insert(topic.clone()) {
                    let _ = session.sender.send(BrokerEvent::Message(BrokerMessage {
                        topic: topic.clone(),
                        payload: payload.clone(),
                        retained: true,
                    }));
                }
            }
        }
        Ok(())
    }

    async fn unsubscribe(&self, filters: &[String]) -> Result<(), TransportError> {
        let id = self.session_id()?;
        let mut state = self.state.lock();
        let session = state
            .sessions
            .get_mut(&id)
            .ok_or(TransportError::NotConnected)?;
        for filter in filters {
            session.filters.remove(filter);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let id = self.session_id()?;
        *self.session.lock() = None;
        self.state.lock().drop_session(id, false);
        Ok(())
    }
}
