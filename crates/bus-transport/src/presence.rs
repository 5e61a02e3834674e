//! # Presence
//!
//! Tracks which remote instances are online from the retained
//! `{instance}/online` liveness topics.
//!
//! - payload `0x01` ⇒ online; `0x00` or empty (retained entry deleted by
//!   the broker's last-will) ⇒ offline
//! - messages about this instance are ignored
//! - when the local transport goes offline every known instance is marked
//!   offline, one change event each
//!
//! Change events are emitted after the online-set lock is released.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use bus_telemetry::INSTANCES_ONLINE;
use bus_types::codec::decode_bool;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::callbacks::{CallbackManager, CallbackToken};
use crate::client::{IncomingMessage, Transport};
use crate::error::TransportError;
use crate::topics::{parse_topic, Domain};

/// Filter matching every instance's liveness topic.
pub const PRESENCE_FILTER: &str = "+/online";

/// One instance went online or offline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceChange {
    pub instance_name: String,
    pub online: bool,
}

/// Online set of remote instances.
pub struct Presence {
    transport: Arc<Transport>,
    online: RwLock<HashSet<String>>,
    on_change: CallbackManager<PresenceChange>,
    message_token: Mutex<Option<CallbackToken>>,
    connection_token: Mutex<Option<CallbackToken>>,
}

impl Presence {
    /// Register listeners and subscribe to liveness topics.
    pub async fn start(transport: Arc<Transport>) -> Result<Arc<Self>, TransportError> {
        let presence = Arc::new(Self {
            transport: transport.clone(),
            online: RwLock::new(HashSet::new()),
            on_change: CallbackManager::new(),
            message_token: Mutex::new(None),
            connection_token: Mutex::new(None),
        });

        let weak: Weak<Self> = Arc::downgrade(&presence);
        let message_token = transport
            .on_message()
            .register(move |message: &IncomingMessage| {
                if let Some(presence) = weak.upgrade() {
                    presence.handle_message(message);
                }
            });
        *presence.message_token.lock() = Some(message_token);

        let weak: Weak<Self> = Arc::downgrade(&presence);
        let connection_token = transport.on_online_change().register(move |online: &bool| {
            if !*online {
                if let Some(presence) = weak.upgrade() {
                    presence.mark_all_offline();
                }
            }
        });
        *presence.connection_token.lock() = Some(connection_token);

        if let Err(e) = transport.subscribe(PRESENCE_FILTER).await {
            presence.unregister_listeners();
            return Err(e);
        }

        debug!(instance = %transport.instance_name(), "Presence tracking started");
        Ok(presence)
    }

    /// Unregister and unsubscribe. Known instances are not reported offline.
    pub async fn terminate(&self) -> Result<(), TransportError> {
        self.unregister_listeners();
        self.online.write().clear();
        self.transport.unsubscribe(PRESENCE_FILTER).await
    }

    fn unregister_listeners(&self) {
        if let Some(token) = self.message_token.lock().take() {
            self.transport.on_message().unregister(token);
        }
        if let Some(token) = self.connection_token.lock().take() {
            self.transport.on_online_change().unregister(token);
        }
    }

    #[must_use]
    pub fn is_online(&self, instance_name: &str) -> bool {
        self.online.read().contains(instance_name)
    }

    /// Online instances, sorted by name.
    #[must_use]
    pub fn list_online(&self) -> Vec<String> {
        let mut names: Vec<String> = self.online.read().iter().cloned().collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn on_change(&self) -> &CallbackManager<PresenceChange> {
        &self.on_change
    }

    fn handle_message(&self, message: &IncomingMessage) {
        let Ok(parsed) = parse_topic(&message.topic) else {
            return;
        };
        if parsed.domain != Domain::Online || !parsed.path.is_empty() {
            return;
        }
        if parsed.instance == self.transport.instance_name() {
            return;
        }

        let online = if message.payload.is_empty() {
            false
        } else {
            match decode_bool(&message.payload) {
                Ok(value) => value,
                Err(e) => {
                    warn!(
                        instance = %parsed.instance,
                        error = %e,
                        "Dropping malformed liveness payload"
                    );
                    return;
                }
            }
        };

        self.set(parsed.instance, online);
    }

    fn set(&self, instance_name: &str, online: bool) {
        let (changed, count) = {
            let mut set = self.online.write();
            let changed = if online {
                set.insert(instance_name.to_string())
            } else {
                set.remove(instance_name)
            };
            (changed, set.len())
        };

        if !changed {
            return;
        }

        INSTANCES_ONLINE.set(count as f64);
        info!(instance = %instance_name, online, "Instance presence changed");
        self.on_change.emit(&PresenceChange {
            instance_name: instance_name.to_string(),
            online,
        });
    }

    fn mark_all_offline(&self) {
        let dropped: Vec<String> = {
            let mut set = self.online.write();
            let mut names: Vec<String> = set.drain().collect();
            names.sort();
            names
        };

        if dropped.is_empty() {
            return;
        }

        INSTANCES_ONLINE.set(0.0);
        warn!(count = dropped.len(), "Transport offline, marking every instance offline");
        for instance_name in dropped {
            self.on_change.emit(&PresenceChange {
                instance_name,
                online: false,
            });
        }
    }
}
