//! # Metadata Views
//!
//! Each instance publishes retained JSON entries under
//! `{instance}/metadata/{path}`.
//!
//! - `RemoteMetadataView` mirrors one remote instance's entries and emits
//!   `Set`/`Clear` events in delivery order. The retained replay that follows
//!   the subscription is how a newcomer learns existing state; no ordering
//!   between paths is assumed.
//! - `LocalMetadata` publishes this instance's entries and re-publishes them
//!   after a reconnect.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};

use bus_types::codec::{decode_json, encode_json};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{debug, warn};

use crate::callbacks::{CallbackManager, CallbackToken};
use crate::client::{IncomingMessage, Transport};
use crate::error::TransportError;
use crate::topics::{build_topic, Domain};

/// Change to one metadata path.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataChange {
    Set { path: String, value: Value },
    Clear { path: String },
}

impl MetadataChange {
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Set { path, .. } | Self::Clear { path } => path,
        }
    }
}

// =============================================================================
// REMOTE VIEW
// =============================================================================

/// Mirror of one remote instance's metadata entries.
pub struct RemoteMetadataView {
    transport: Arc<Transport>,
    instance_name: String,
    filter: String,
    prefix: String,
    entries: RwLock<HashMap<String, Value>>,
    on_change: CallbackManager<MetadataChange>,
    token: Mutex<Option<CallbackToken>>,
}

impl RemoteMetadataView {
    /// Register the message listener, then subscribe to the metadata subtree.
    pub async fn open(
        transport: Arc<Transport>,
        instance_name: &str,
    ) -> Result<Arc<Self>, TransportError> {
        let base = build_topic(instance_name, Domain::Metadata, &[]);
        let view = Arc::new(Self {
            transport: transport.clone(),
            instance_name: instance_name.to_string(),
            filter: format!("{}/#", base),
            prefix: format!("{}/", base),
            entries: RwLock::new(HashMap::new()),
            on_change: CallbackManager::new(),
            token: Mutex::new(None),
        });

        let weak: Weak<Self> = Arc::downgrade(&view);
        let token = transport
            .on_message()
            .register(move |message: &IncomingMessage| {
                if let Some(view) = weak.upgrade() {
                    view.handle_message(message);
                }
            });
        *view.token.lock() = Some(token);

        if let Err(e) = transport.subscribe(&view.filter).await {
            if let Some(token) = view.token.lock().take() {
                transport.on_message().unregister(token);
            }
            return Err(e);
        }

        debug!(instance = %instance_name, "Metadata view opened");
        Ok(view)
    }

    /// Stop receiving, drop the mirror, unsubscribe.
    ///
    /// The listener is removed first, so no event fires after this starts.
    pub async fn close(&self) -> Result<(), TransportError> {
        let Some(token) = self.token.lock().take() else {
            return Ok(());
        };
        self.transport.on_message().unregister(token);
        self.entries.write().clear();

        debug!(instance = %self.instance_name, "Metadata view closed");
        self.transport.unsubscribe(&self.filter).await
    }

    #[must_use]
    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<Value> {
        self.entries.read().get(path).cloned()
    }

    /// Snapshot of every entry, sorted by path.
    #[must_use]
    pub fn entries(&self) -> Vec<(String, Value)> {
        let mut entries: Vec<(String, Value)> = self
            .entries
            .read()
            .iter()
            .map(|(path, value)| (path.clone(), value.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    #[must_use]
    pub fn on_change(&self) -> &CallbackManager<MetadataChange> {
        &self.on_change
    }

    fn handle_message(&self, message: &IncomingMessage) {
        let Some(path) = message.topic.strip_prefix(&self.prefix) else {
            return;
        };
        if path.is_empty() {
            return;
        }

        if message.payload.is_empty() {
            let existed = self.entries.write().remove(path).is_some();
            if existed {
                self.on_change.emit(&MetadataChange::Clear {
                    path: path.to_string(),
                });
            }
            return;
        }

        let value: Value = match decode_json(&message.payload) {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    instance = %self.instance_name,
                    path = %path,
                    error = %e,
                    "Dropping malformed metadata entry"
                );
                return;
            }
        };

        self.entries.write().insert(path.to_string(), value.clone());
        self.on_change.emit(&MetadataChange::Set {
            path: path.to_string(),
            value,
        });
    }
}

// =============================================================================
// LOCAL ENTRIES
// =============================================================================

/// This instance's published metadata.
pub struct LocalMetadata {
    transport: Arc<Transport>,
    entries: Mutex<BTreeMap<String, Value>>,
    token: Mutex<Option<CallbackToken>>,
}

impl LocalMetadata {
    pub fn new(transport: Arc<Transport>) -> Arc<Self> {
        let metadata = Arc::new(Self {
            transport: transport.clone(),
            entries: Mutex::new(BTreeMap::new()),
            token: Mutex::new(None),
        });

        let weak: Weak<Self> = Arc::downgrade(&metadata);
        let token = transport.on_online_change().register(move |online: &bool| {
            if *online {
                if let Some(metadata) = weak.upgrade() {
                    metadata.republish();
                }
            }
        });
        *metadata.token.lock() = Some(token);

        metadata
    }

    fn topic(&self, path: &str) -> String {
        self.transport.build_topic(Domain::Metadata, &[path])
    }

    /// Publish a retained entry, then record it.
    pub async fn set(&self, path: &str, value: Value) -> Result<(), TransportError> {
        let payload = encode_json(&value)?;
        self.transport.publish(&self.topic(path), payload, true).await?;
        self.entries.lock().insert(path.to_string(), value);
        Ok(())
    }

    /// Delete a retained entry, then forget it.
    pub async fn clear(&self, path: &str) -> Result<(), TransportError> {
        self.transport
            .publish(&self.topic(path), Vec::new(), true)
            .await?;
        self.entries.lock().remove(path);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<Value> {
        self.entries.lock().get(path).cloned()
    }

    fn republish(&self) {
        let entries: Vec<(String, Value)> = self
            .entries
            .lock()
            .iter()
            .map(|(path, value)| (path.clone(), value.clone()))
            .collect();

        for (path, value) in entries {
            match encode_json(&value) {
                Ok(payload) => self.transport.publish_detached(self.topic(&path), payload, true),
                Err(e) => warn!(path = %path, error = %e, "Cannot re-encode metadata entry"),
            }
        }
    }

    /// Stop re-publishing on reconnect. Published entries stay retained.
    pub fn close(&self) {
        if let Some(token) = self.token.lock().take() {
            self.transport.on_online_change().unregister(token);
        }
    }
}
