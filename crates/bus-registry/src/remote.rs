//! # Remote Component Proxy
//!
//! Mirrors a component owned by another instance. Every state member of the
//! plugin is subscribed through a `ComponentDispatcher`; the latest decoded
//! value per member is kept behind a lock held only for the map update.
//! Actions are encoded with the member's type and published unretained.

use std::sync::Arc;

use async_trait::async_trait;
use bus_transport::{CallbackManager, ComponentDispatcher, MemberHandler, Transport};
use bus_types::{decode_value, encode_value, Member, Plugin};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::component::{check_action, Component, StateChange};
use crate::error::ComponentError;

type SharedState = Arc<RwLock<Map<String, Value>>>;

/// Proxy for a component of a remote instance.
pub struct RemoteComponent {
    id: String,
    instance_name: String,
    plugin: Arc<Plugin>,
    dispatcher: Arc<ComponentDispatcher>,
    state: SharedState,
    on_state_change: Arc<CallbackManager<StateChange>>,
}

impl RemoteComponent {
    /// Subscribe to every state member of `plugin` for `instance_name/id`.
    pub async fn open(
        transport: Arc<Transport>,
        instance_name: &str,
        id: &str,
        plugin: Arc<Plugin>,
    ) -> Result<Arc<Self>, ComponentError> {
        let dispatcher = ComponentDispatcher::new(transport, instance_name, id);
        let state: SharedState = Arc::new(RwLock::new(Map::new()));
        let on_state_change = Arc::new(CallbackManager::new());

        for member in plugin.state_members() {
            let handler = state_handler(id, member, state.clone(), on_state_change.clone());
            if let Err(e) = dispatcher.add_subscription(&member.name, handler).await {
                dispatcher.close().await;
                return Err(e.into());
            }
        }

        debug!(instance = %instance_name, component = %id, "Remote component opened");
        Ok(Arc::new(Self {
            id: id.to_string(),
            instance_name: instance_name.to_string(),
            plugin,
            dispatcher,
            state,
            on_state_change,
        }))
    }

    #[must_use]
    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    /// Unsubscribe every member.
    pub async fn close(&self) {
        self.dispatcher.close().await;
    }
}

fn state_handler(
    component_id: &str,
    member: &Member,
    state: SharedState,
    on_state_change: Arc<CallbackManager<StateChange>>,
) -> MemberHandler {
    let component_id = component_id.to_string();
    let member = member.clone();
    Arc::new(move |payload: &[u8]| {
        // An empty retained payload is the owner withdrawing the member.
        if payload.is_empty() {
            if state.write().remove(&member.name).is_some() {
                debug!(component = %component_id, member = %member.name, "State cleared");
            }
            return;
        }

        let value = match decode_value(&member.value_type, payload) {
            Ok(value) if member.value_type.validate(&value) => value,
            Ok(value) => {
                warn!(
                    component = %component_id,
                    member = %member.name,
                    value = %value,
                    "Dropping out-of-domain state value"
                );
                return;
            }
            Err(e) => {
                warn!(
                    component = %component_id,
                    member = %member.name,
                    error = %e,
                    "Dropping undecodable state payload"
                );
                return;
            }
        };

        let changed = {
            let mut state = state.write();
            if state.get(&member.name) == Some(&value) {
                false
            } else {
                state.insert(member.name.clone(), value.clone());
                true
            }
        };
        if changed {
            on_state_change.emit(&StateChange {
                component_id: component_id.clone(),
                member: member.name.clone(),
                value,
            });
        }
    })
}

#[async_trait]
impl Component for RemoteComponent {
    fn id(&self) -> &str {
        &self.id
    }

    fn plugin(&self) -> &Arc<Plugin> {
        &self.plugin
    }

    fn state(&self) -> Map<String, Value> {
        self.state.read().clone()
    }

    fn get_state(&self, member: &str) -> Option<Value> {
        self.state.read().get(member).cloned()
    }

    async fn execute_action(&self, member: &str, value: Value) -> Result<(), ComponentError> {
        let definition = check_action(&self.id, &self.plugin, member, &value)?;
        let payload = encode_value(&definition.value_type, &value)?;
        self.dispatcher.emit(member, payload, false).await?;

        debug!(
            instance = %self.instance_name,
            component = %self.id,
            member = %member,
            "Remote action sent"
        );
        Ok(())
    }

    fn on_state_change(&self) -> &CallbackManager<StateChange> {
        &self.on_state_change
    }
}
