//! # Components
//!
//! A component is a live instance of a `Plugin`: an id, a state map keyed
//! by state member, and actions callable by name.
//!
//! `LocalComponent` is built from an explicit member table. Each action
//! member gets a handler closure registered by name when the component is
//! built; state is written through `set_state`, which checks the member's
//! `Type` before storing. No reflection, no dynamic lookup past the table.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bus_transport::CallbackManager;
use bus_types::metadata::validate_identifier;
use bus_types::{Member, MemberType, Plugin};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::ComponentError;

/// A state member changed value.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub component_id: String,
    pub member: String,
    pub value: Value,
}

/// Common surface of local components and remote proxies.
#[async_trait]
pub trait Component: Send + Sync {
    fn id(&self) -> &str;

    fn plugin(&self) -> &Arc<Plugin>;

    /// Snapshot of every known state value.
    fn state(&self) -> Map<String, Value>;

    fn get_state(&self, member: &str) -> Option<Value>;

    /// Run the action `member` with `value`.
    async fn execute_action(&self, member: &str, value: Value) -> Result<(), ComponentError>;

    fn on_state_change(&self) -> &CallbackManager<StateChange>;
}

/// Find `member` and check it is an action taking `value`.
pub(crate) fn check_action<'a>(
    component_id: &str,
    plugin: &'a Plugin,
    member: &str,
    value: &Value,
) -> Result<&'a Member, ComponentError> {
    let definition = plugin
        .member(member)
        .ok_or_else(|| ComponentError::UnknownMember {
            component: component_id.to_string(),
            member: member.to_string(),
        })?;
    if definition.member_type != MemberType::Action {
        return Err(ComponentError::NotAnAction {
            component: component_id.to_string(),
            member: member.to_string(),
        });
    }
    check_value(component_id, definition, value)?;
    Ok(definition)
}

pub(crate) fn check_value(
    component_id: &str,
    definition: &Member,
    value: &Value,
) -> Result<(), ComponentError> {
    if definition.value_type.validate(value) {
        return Ok(());
    }
    Err(ComponentError::InvalidValue {
        component: component_id.to_string(),
        member: definition.name.clone(),
        value_type: definition.value_type.to_string(),
        value: value.to_string(),
    })
}

// =============================================================================
// LOCAL COMPONENT
// =============================================================================

/// Action handler: receives the component and the validated argument.
pub type ActionHandler =
    Arc<dyn Fn(&LocalComponent, Value) -> Result<(), ComponentError> + Send + Sync>;

/// Component owned by this process.
pub struct LocalComponent {
    id: String,
    plugin: Arc<Plugin>,
    config: Map<String, Value>,
    state: RwLock<Map<String, Value>>,
    actions: HashMap<String, ActionHandler>,
    on_state_change: CallbackManager<StateChange>,
}

impl std::fmt::Debug for LocalComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalComponent")
            .field("id", &self.id)
            .field("plugin", &self.plugin.id())
            .finish_non_exhaustive()
    }
}

impl LocalComponent {
    /// Start building a component; `config` is checked against the plugin.
    pub fn builder(
        id: impl Into<String>,
        plugin: Arc<Plugin>,
        config: Map<String, Value>,
    ) -> LocalComponentBuilder {
        LocalComponentBuilder {
            id: id.into(),
            plugin,
            config,
            state: Map::new(),
            actions: HashMap::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &Map<String, Value> {
        &self.config
    }

    /// Store a state value. Listeners are only told about actual changes.
    pub fn set_state(&self, member: &str, value: Value) -> Result<(), ComponentError> {
        let definition = self.state_member(member)?;
        check_value(&self.id, definition, &value)?;

        let changed = {
            let mut state = self.state.write();
            if state.get(member) == Some(&value) {
                false
            } else {
                state.insert(member.to_string(), value.clone());
                true
            }
        };

        if changed {
            debug!(component = %self.id, member = %member, "State changed");
            self.on_state_change.emit(&StateChange {
                component_id: self.id.clone(),
                member: member.to_string(),
                value,
            });
        }
        Ok(())
    }

    fn state_member(&self, member: &str) -> Result<&Member, ComponentError> {
        let definition = self
            .plugin
            .member(member)
            .ok_or_else(|| ComponentError::UnknownMember {
                component: self.id.clone(),
                member: member.to_string(),
            })?;
        if definition.member_type != MemberType::State {
            return Err(ComponentError::NotAState {
                component: self.id.clone(),
                member: member.to_string(),
            });
        }
        Ok(definition)
    }
}

#[async_trait]
impl Component for LocalComponent {
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
        check_action(&self.id, &self.plugin, member, &value)?;
        let handler = self
            .actions
            .get(member)
            .cloned()
            .ok_or_else(|| ComponentError::MissingAction {
                component: self.id.clone(),
                member: member.to_string(),
            })?;

        debug!(component = %self.id, member = %member, "Executing action");
        handler(self, value)
    }

    fn on_state_change(&self) -> &CallbackManager<StateChange> {
        &self.on_state_change
    }
}

/// Member table under construction.
pub struct LocalComponentBuilder {
    id: String,
    plugin: Arc<Plugin>,
    config: Map<String, Value>,
    state: Map<String, Value>,
    actions: HashMap<String, ActionHandler>,
}

impl LocalComponentBuilder {
    /// Register the handler of an action member.
    pub fn action<F>(mut self, member: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&LocalComponent, Value) -> Result<(), ComponentError> + Send + Sync + 'static,
    {
        self.actions.insert(member.into(), Arc::new(handler));
        self
    }

    /// Initial value of a state member.
    pub fn state(mut self, member: impl Into<String>, value: Value) -> Self {
        self.state.insert(member.into(), value);
        self
    }

    /// Check the table against the plugin and freeze it.
    ///
    /// Every action member needs a handler; handlers and initial values may
    /// only name members of the right kind.
    pub fn build(self) -> Result<Arc<LocalComponent>, ComponentError> {
        validate_identifier(&self.id)?;
        self.plugin.validate_config(&self.config)?;

        for name in self.actions.keys() {
            let definition =
                self.plugin
                    .member(name)
                    .ok_or_else(|| ComponentError::UnknownMember {
                        component: self.id.clone(),
                        member: name.clone(),
                    })?;
            if definition.member_type != MemberType::Action {
                return Err(ComponentError::NotAnAction {
                    component: self.id.clone(),
                    member: name.clone(),
                });
            }
        }
        if let Some(missing) = self
            .plugin
            .action_members()
            .find(|m| !self.actions.contains_key(&m.name))
        {
            return Err(ComponentError::MissingAction {
                component: self.id.clone(),
                member: missing.name.clone(),
            });
        }

        for (name, value) in &self.state {
            let definition =
                self.plugin
                    .member(name)
                    .ok_or_else(|| ComponentError::UnknownMember {
                        component: self.id.clone(),
                        member: name.clone(),
                    })?;
            if definition.member_type != MemberType::State {
                return Err(ComponentError::NotAState {
                    component: self.id.clone(),
                    member: name.clone(),
                });
            }
            check_value(&self.id, definition, value)?;
        }

        Ok(Arc::new(LocalComponent {
            id: self.id,
            plugin: self.plugin,
            config: self.config,
            state: RwLock::new(self.state),
            actions: self.actions,
            on_state_change: CallbackManager::new(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bus_types::{ConfigType, MetadataError, PluginBuilder, PluginUsage, Type};
    use serde_json::json;
    use std::sync::Mutex;

    fn value_binary() -> Arc<Plugin> {
        Arc::new(
            PluginBuilder::new("logic", "ValueBinary")
                .usage(PluginUsage::Logic)
                .version("1.0.0")
                .config("initial", ConfigType::Bool)
                .state("value", Type::Bool)
                .action("setValue", Type::Bool)
                .build()
                .unwrap(),
        )
    }

    fn config(initial: bool) -> Map<String, Value> {
        let mut config = Map::new();
        config.insert("initial".into(), json!(initial));
        config
    }

    fn light() -> Arc<LocalComponent> {
        LocalComponent::builder("kitchen-light", value_binary(), config(false))
            .state("value", json!(false))
            .action("setValue", |component: &LocalComponent, value| {
                component.set_state("value", value)
            })
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_action_updates_state() {
        let component = light();
        let changes = Arc::new(Mutex::new(Vec::new()));
        let sink = changes.clone();
        component.on_state_change().register(move |change: &StateChange| {
            sink.lock().unwrap().push(change.clone());
        });

        component.execute_action("setValue", json!(true)).await.unwrap();
        component.execute_action("setValue", json!(true)).await.unwrap();

        assert_eq!(component.get_state("value"), Some(json!(true)));
        let changes = changes.lock().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].member, "value");
        assert_eq!(changes[0].component_id, "kitchen-light");
    }

    #[tokio::test]
    async fn test_action_argument_validated() {
        let component = light();
        assert!(matches!(
            component.execute_action("setValue", json!("on")).await,
            Err(ComponentError::InvalidValue { .. })
        ));
        assert!(matches!(
            component.execute_action("value", json!(true)).await,
            Err(ComponentError::NotAnAction { .. })
        ));
        assert!(matches!(
            component.execute_action("missing", json!(true)).await,
            Err(ComponentError::UnknownMember { .. })
        ));
        assert_eq!(component.get_state("value"), Some(json!(false)));
    }

    #[test]
    fn test_set_state_checks_member_kind() {
        let component = light();
        assert!(matches!(
            component.set_state("setValue", json!(true)),
            Err(ComponentError::NotAState { .. })
        ));
        assert!(matches!(
            component.set_state("value", json!(1)),
            Err(ComponentError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_build_requires_every_action() {
        let result = LocalComponent::builder("c", value_binary(), config(true)).build();
        assert!(matches!(result, Err(ComponentError::MissingAction { .. })));
    }

    #[test]
    fn test_build_validates_config() {
        let result = LocalComponent::builder("c", value_binary(), Map::new())
            .action("setValue", |_: &LocalComponent, _| Ok(()))
            .build();
        assert!(matches!(
            result,
            Err(ComponentError::Metadata(MetadataError::MissingConfig(_)))
        ));

        let result = LocalComponent::builder("bad/id", value_binary(), config(true))
            .action("setValue", |_: &LocalComponent, _| Ok(()))
            .build();
        assert!(matches!(
            result,
            Err(ComponentError::Metadata(MetadataError::InvalidIdentifier(_)))
        ));
    }
}
