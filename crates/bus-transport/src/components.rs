//! # Component Dispatcher
//!
//! Binds to one `(instance, componentId)` pair and routes member-level
//! messages on `{instance}/components/{componentId}/{member}`.
//!
//! Local components publish state (retained) and receive actions; remote
//! proxies publish actions (unretained) and receive state. Each member is
//! subscribed by its exact topic, never through a wildcard.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::callbacks::CallbackToken;
use crate::client::{IncomingMessage, Transport};
use crate::error::TransportError;
use crate::topics::{build_topic, Domain};

/// Handler invoked with the raw payload of a member message.
pub type MemberHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Member-level router for one component.
pub struct ComponentDispatcher {
    transport: Arc<Transport>,
    instance_name: String,
    component_id: String,
    prefix: String,
    handlers: RwLock<HashMap<String, MemberHandler>>,
    token: Mutex<Option<CallbackToken>>,
}

impl ComponentDispatcher {
    /// Dispatcher for a component owned by `instance_name`.
    pub fn new(transport: Arc<Transport>, instance_name: &str, component_id: &str) -> Arc<Self> {
        let prefix = format!(
            "{}/",
            build_topic(instance_name, Domain::Components, &[component_id])
        );
        let dispatcher = Arc::new(Self {
            transport: transport.clone(),
            instance_name: instance_name.to_string(),
            component_id: component_id.to_string(),
            prefix,
            handlers: RwLock::new(HashMap::new()),
            token: Mutex::new(None),
        });

        let weak: Weak<Self> = Arc::downgrade(&dispatcher);
        let token = transport
            .on_message()
            .register(move |message: &IncomingMessage| {
                if let Some(dispatcher) = weak.upgrade() {
                    dispatcher.route(message);
                }
            });
        *dispatcher.token.lock() = Some(token);

        dispatcher
    }

    /// Dispatcher for a component of this instance.
    pub fn local(transport: Arc<Transport>, component_id: &str) -> Arc<Self> {
        let instance_name = transport.instance_name().to_string();
        Self::new(transport, &instance_name, component_id)
    }

    #[must_use]
    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    #[must_use]
    pub fn component_id(&self) -> &str {
        &self.component_id
    }

    fn member_topic(&self, member: &str) -> String {
        format!("{}{}", self.prefix, member)
    }

    /// Subscribe to `member` and route its payloads to `handler`.
    pub async fn add_subscription(
        &self,
        member: &str,
        handler: MemberHandler,
    ) -> Result<(), TransportError> {
        {
            let mut handlers = self.handlers.write();
            if handlers.contains_key(member) {
                return Err(TransportError::DuplicateSubscription {
                    component: self.component_id.clone(),
                    member: member.to_string(),
                });
            }
            handlers.insert(member.to_string(), handler);
        }

        if let Err(e) = self.transport.subscribe(&self.member_topic(member)).await {
            self.handlers.write().remove(member);
            return Err(e);
        }

        debug!(
            instance = %self.instance_name,
            component = %self.component_id,
            member = %member,
            "Member subscription added"
        );
        Ok(())
    }

    pub async fn remove_subscription(&self, member: &str) -> Result<(), TransportError> {
        if self.handlers.write().remove(member).is_none() {
            return Err(TransportError::UnknownSubscription {
                component: self.component_id.clone(),
                member: member.to_string(),
            });
        }
        self.transport.unsubscribe(&self.member_topic(member)).await
    }

    /// Publish a member payload. State is `persistent` (retained), actions are not.
    pub async fn emit(
        &self,
        member: &str,
        payload: Vec<u8>,
        persistent: bool,
    ) -> Result<(), TransportError> {
        self.transport
            .publish(&self.member_topic(member), payload, persistent)
            .await
    }

    /// Remove the routing listener, then unsubscribe every member.
    pub async fn close(&self) {
        if let Some(token) = self.token.lock().take() {
            self.transport.on_message().unregister(token);
        }

        let members: Vec<String> = self.handlers.write().drain().map(|(m, _)| m).collect();
        for member in members {
            if let Err(e) = self.transport.unsubscribe(&self.member_topic(&member)).await {
                warn!(
                    component = %self.component_id,
                    member = %member,
                    error = %e,
                    "Failed to unsubscribe member"
                );
            }
        }
    }

    fn route(&self, message: &IncomingMessage) {
        let Some(member) = message.topic.strip_prefix(&self.prefix) else {
            return;
        };
        if member.is_empty() || member.contains('/') {
            return;
        }

        let handler = self.handlers.read().get(member).cloned();
        if let Some(handler) = handler {
            handler(&message.payload);
        }
    }
}
