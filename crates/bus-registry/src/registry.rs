//! # Registry
//!
//! Authoritative table of every known plugin and component, partitioned by
//! owning instance. Entries of this process live under `LOCAL_INSTANCE`.
//!
//! ## Invariants
//!
//! - component ids are unique across all instances
//! - a component is only accepted once its plugin exists on the same instance
//! - a plugin is only removed once no component of its instance uses it
//! - an instance entry disappears as soon as it holds nothing
//!
//! Every violation is returned as a `RegistryError` before anything changes.
//! Every successful mutation emits one `RegistryEvent` after the lock is
//! released.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use bus_telemetry::{REGISTRY_COMPONENTS, REGISTRY_PLUGINS};
use bus_transport::CallbackManager;
use bus_types::Plugin;
use parking_lot::RwLock;
use prometheus::Gauge;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::component::Component;
use crate::error::RegistryError;

/// Instance name of entries owned by this process.
pub const LOCAL_INSTANCE: &str = "";

/// Incremental change to the registry.
#[derive(Clone)]
pub enum RegistryEvent {
    PluginAdded {
        instance_name: String,
        plugin: Arc<Plugin>,
    },
    PluginRemoved {
        instance_name: String,
        plugin_id: String,
    },
    ComponentAdded {
        instance_name: String,
        component: Arc<dyn Component>,
    },
    ComponentRemoved {
        instance_name: String,
        component_id: String,
    },
}

impl RegistryEvent {
    #[must_use]
    pub fn instance_name(&self) -> &str {
        match self {
            Self::PluginAdded { instance_name, .. }
            | Self::PluginRemoved { instance_name, .. }
            | Self::ComponentAdded { instance_name, .. }
            | Self::ComponentRemoved { instance_name, .. } => instance_name,
        }
    }

    #[must_use]
    pub fn is_local(&self) -> bool {
        self.instance_name() == LOCAL_INSTANCE
    }
}

impl std::fmt::Debug for RegistryEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PluginAdded {
                instance_name,
                plugin,
            } => write!(f, "PluginAdded({:?}, {})", instance_name, plugin.id()),
            Self::PluginRemoved {
                instance_name,
                plugin_id,
            } => write!(f, "PluginRemoved({:?}, {})", instance_name, plugin_id),
            Self::ComponentAdded {
                instance_name,
                component,
            } => write!(f, "ComponentAdded({:?}, {})", instance_name, component.id()),
            Self::ComponentRemoved {
                instance_name,
                component_id,
            } => write!(f, "ComponentRemoved({:?}, {})", instance_name, component_id),
        }
    }
}

/// Flat description of a component, for consumers that replicate state.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentData {
    pub instance_name: String,
    pub id: String,
    pub plugin_id: String,
    pub state: Map<String, Value>,
}

#[derive(Default)]
struct InstanceEntry {
    plugins: HashMap<String, Arc<Plugin>>,
    components: BTreeSet<String>,
}

impl InstanceEntry {
    fn is_empty(&self) -> bool {
        self.plugins.is_empty() && self.components.is_empty()
    }
}

struct ComponentEntry {
    instance_name: String,
    component: Arc<dyn Component>,
}

#[derive(Default)]
struct RegistryState {
    instances: HashMap<String, InstanceEntry>,
    components: HashMap<String, ComponentEntry>,
}

impl RegistryState {
    fn plugin_count(&self) -> usize {
        self.instances.values().map(|i| i.plugins.len()).sum()
    }

    fn prune(&mut self, instance_name: &str) {
        if self
            .instances
            .get(instance_name)
            .is_some_and(InstanceEntry::is_empty)
        {
            self.instances.remove(instance_name);
            debug!(instance = %instance_name, "Instance entry pruned");
        }
    }
}

/// Plugin and component table.
///
/// Entry counts are added to the plugin and component gauges as deltas, so
/// several registries in one process sum up on shared gauges.
pub struct Registry {
    state: RwLock<RegistryState>,
    on_change: CallbackManager<RegistryEvent>,
    plugins_gauge: Gauge,
    components_gauge: Gauge,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::with_gauges(REGISTRY_PLUGINS.clone(), REGISTRY_COMPONENTS.clone())
    }

    /// Registry counting its entries on the given gauges.
    #[must_use]
    pub fn with_gauges(plugins_gauge: Gauge, components_gauge: Gauge) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            on_change: CallbackManager::new(),
            plugins_gauge,
            components_gauge,
        }
    }

    #[must_use]
    pub fn on_change(&self) -> &CallbackManager<RegistryEvent> {
        &self.on_change
    }

    // =========================================================================
    // MUTATIONS
    // =========================================================================

    pub fn add_plugin(&self, instance_name: &str, plugin: Arc<Plugin>) -> Result<(), RegistryError> {
        {
            let mut state = self.state.write();
            let duplicate = state
                .instances
                .get(instance_name)
                .is_some_and(|entry| entry.plugins.contains_key(plugin.id()));
            if duplicate {
                return Err(RegistryError::DuplicatePlugin {
                    instance: instance_name.to_string(),
                    plugin: plugin.id().to_string(),
                });
            }
            state
                .instances
                .entry(instance_name.to_string())
                .or_default()
                .plugins
                .insert(plugin.id().to_string(), plugin.clone());
            self.plugins_gauge.inc();
        }

        info!(instance = %instance_name, plugin = %plugin.id(), "Plugin added");
        self.on_change.emit(&RegistryEvent::PluginAdded {
            instance_name: instance_name.to_string(),
            plugin,
        });
        Ok(())
    }

    pub fn remove_plugin(
        &self,
        instance_name: &str,
        plugin_id: &str,
    ) -> Result<Arc<Plugin>, RegistryError> {
        let plugin = {
            let mut state = self.state.write();
            let unknown = || RegistryError::UnknownPlugin {
                instance: instance_name.to_string(),
                plugin: plugin_id.to_string(),
            };
            let entry = state.instances.get(instance_name).ok_or_else(unknown)?;
            if !entry.plugins.contains_key(plugin_id) {
                return Err(unknown());
            }

            let users = entry
                .components
                .iter()
                .filter_map(|id| state.components.get(id))
                .filter(|c| c.component.plugin().id() == plugin_id)
                .count();
            if users > 0 {
                return Err(RegistryError::PluginInUse {
                    instance: instance_name.to_string(),
                    plugin: plugin_id.to_string(),
                    components: users,
                });
            }

            let plugin = state
                .instances
                .get_mut(instance_name)
                .and_then(|entry| entry.plugins.remove(plugin_id))
                .ok_or_else(unknown)?;
            state.prune(instance_name);
            self.plugins_gauge.dec();
            plugin
        };

        info!(instance = %instance_name, plugin = %plugin_id, "Plugin removed");
        self.on_change.emit(&RegistryEvent::PluginRemoved {
            instance_name: instance_name.to_string(),
            plugin_id: plugin_id.to_string(),
        });
        Ok(plugin)
    }

    pub fn add_component(
        &self,
        instance_name: &str,
        component: Arc<dyn Component>,
    ) -> Result<(), RegistryError> {
        let id = component.id().to_string();
        {
            let mut state = self.state.write();
            if state.components.contains_key(&id) {
                return Err(RegistryError::DuplicateComponent { component: id });
            }
            let plugin_id = component.plugin().id();
            let Some(entry) = state
                .instances
                .get_mut(instance_name)
                .filter(|entry| entry.plugins.contains_key(plugin_id))
            else {
                return Err(RegistryError::MissingPlugin {
                    instance: instance_name.to_string(),
                    plugin: plugin_id.to_string(),
                    component: id,
                });
            };

            entry.components.insert(id.clone());
            state.components.insert(
                id.clone(),
                ComponentEntry {
                    instance_name: instance_name.to_string(),
                    component: component.clone(),
                },
            );
            self.components_gauge.inc();
        }

        info!(
            instance = %instance_name,
            component = %id,
            plugin = %component.plugin().id(),
            "Component added"
        );
        self.on_change.emit(&RegistryEvent::ComponentAdded {
            instance_name: instance_name.to_string(),
            component,
        });
        Ok(())
    }

    pub fn remove_component(
        &self,
        instance_name: &str,
        component_id: &str,
    ) -> Result<Arc<dyn Component>, RegistryError> {
        let component = {
            let mut state = self.state.write();
            let owned = state
                .components
                .get(component_id)
                .is_some_and(|entry| entry.instance_name == instance_name);
            if !owned {
                return Err(RegistryError::UnknownComponent {
                    instance: instance_name.to_string(),
                    component: component_id.to_string(),
                });
            }

            let removed = state.components.remove(component_id);
            if let Some(entry) = state.instances.get_mut(instance_name) {
                entry.components.remove(component_id);
            }
            state.prune(instance_name);
            if removed.is_some() {
                self.components_gauge.dec();
            }
            removed.map(|entry| entry.component)
        };
        let Some(component) = component else {
            return Err(RegistryError::UnknownComponent {
                instance: instance_name.to_string(),
                component: component_id.to_string(),
            });
        };

        info!(instance = %instance_name, component = %component_id, "Component removed");
        self.on_change.emit(&RegistryEvent::ComponentRemoved {
            instance_name: instance_name.to_string(),
            component_id: component_id.to_string(),
        });
        Ok(component)
    }

    // =========================================================================
    // LOOKUPS
    // =========================================================================

    #[must_use]
    pub fn get_plugin(&self, instance_name: &str, plugin_id: &str) -> Option<Arc<Plugin>> {
        self.state
            .read()
            .instances
            .get(instance_name)
            .and_then(|entry| entry.plugins.get(plugin_id).cloned())
    }

    #[must_use]
    pub fn has_plugin(&self, instance_name: &str, plugin_id: &str) -> bool {
        self.get_plugin(instance_name, plugin_id).is_some()
    }

    /// Plugins of one instance, sorted by id.
    #[must_use]
    pub fn get_plugins(&self, instance_name: &str) -> Vec<Arc<Plugin>> {
        let mut plugins: Vec<Arc<Plugin>> = self
            .state
            .read()
            .instances
            .get(instance_name)
            .map(|entry| entry.plugins.values().cloned().collect())
            .unwrap_or_default();
        plugins.sort_by(|a, b| a.id().cmp(b.id()));
        plugins
    }

    /// Look a component up by its globally unique id.
    #[must_use]
    pub fn get_component(&self, component_id: &str) -> Option<Arc<dyn Component>> {
        self.state
            .read()
            .components
            .get(component_id)
            .map(|entry| entry.component.clone())
    }

    /// Owning instance of a component.
    #[must_use]
    pub fn get_component_instance(&self, component_id: &str) -> Option<String> {
        self.state
            .read()
            .components
            .get(component_id)
            .map(|entry| entry.instance_name.clone())
    }

    /// Components of one instance, sorted by id.
    #[must_use]
    pub fn get_components(&self, instance_name: &str) -> Vec<Arc<dyn Component>> {
        let state = self.state.read();
        let components = state
            .instances
            .get(instance_name)
            .map(|entry| {
                entry
                    .components
                    .iter()
                    .filter_map(|id| state.components.get(id))
                    .map(|c| c.component.clone())
                    .collect()
            })
            .unwrap_or_default();
        components
    }

    /// Every component with its current state, sorted by id.
    #[must_use]
    pub fn get_components_data(&self) -> Vec<ComponentData> {
        let entries: Vec<(String, Arc<dyn Component>)> = self
            .state
            .read()
            .components
            .values()
            .map(|entry| (entry.instance_name.clone(), entry.component.clone()))
            .collect();

        // State is read outside the registry lock.
        let mut data: Vec<ComponentData> = entries
            .into_iter()
            .map(|(instance_name, component)| ComponentData {
                instance_name,
                id: component.id().to_string(),
                plugin_id: component.plugin().id().to_string(),
                state: component.state(),
            })
            .collect();
        data.sort_by(|a, b| a.id.cmp(&b.id));
        data
    }

    /// Instances holding at least one plugin or component, sorted.
    #[must_use]
    pub fn get_instance_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.read().instances.keys().cloned().collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn plugin_count(&self) -> usize {
        self.state.read().plugin_count()
    }

    #[must_use]
    pub fn component_count(&self) -> usize {
        self.state.read().components.len()
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        self.plugins_gauge.sub(state.plugin_count() as f64);
        self.components_gauge.sub(state.components.len() as f64);
    }
}
