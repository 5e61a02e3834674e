//! # Bus Publisher
//!
//! Keeps the registry in step with the bus, in both directions.
//!
//! ## Remote side
//!
//! One tracker per online remote instance. A tracker opens a metadata view
//! for the instance, replays the retained entries it already holds
//! (all `plugins/*` first, then `components/*`), then applies live `Set` and
//! `Clear` changes one at a time:
//!
//! - a component whose plugin is not known yet waits in a pending set and is
//!   attached as soon as the plugin arrives
//! - clearing a plugin first detaches its components (back to pending),
//!   then removes the plugin
//! - going offline removes every component, then every plugin, then
//!   unregisters from and closes the view
//!
//! ## Local side
//!
//! Plugins and components added to the registry under `LOCAL_INSTANCE` are
//! announced as retained metadata. Each local component is bound to a
//! dispatcher: incoming action payloads are decoded and executed, state
//! changes are published retained. Removal clears both.
//!
//! ## Ordering
//!
//! All of this runs on a single worker task fed by a command channel, so
//! presence changes, metadata changes and local registry events are applied
//! strictly in arrival order and the trackers need no locking.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use bus_transport::{
    CallbackToken, ComponentDispatcher, LocalMetadata, MemberHandler, MetadataChange, Presence,
    PresenceChange, RemoteMetadataView, Transport, TransportError,
};
use bus_types::metadata::{COMPONENTS_PATH, INSTANCE_INFO_PATH, PLUGINS_PATH};
use bus_types::{decode_value, encode_value, CodecError, ComponentMetadata, InstanceInfo, Plugin};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::component::{Component, StateChange};
use crate::registry::{Registry, RegistryEvent, LOCAL_INSTANCE};
use crate::remote::RemoteComponent;

/// How long unbinding waits for queued state publications.
const UNBIND_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

enum Command {
    Online(String),
    Offline(String),
    Metadata {
        instance_name: String,
        generation: u64,
        change: MetadataChange,
    },
    Local(RegistryEvent),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Where a metadata path points.
#[derive(Debug, PartialEq, Eq)]
enum EntryPath<'a> {
    Plugin(&'a str),
    Component(&'a str),
    InstanceInfo,
    Other,
}

fn child<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    path.strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('/'))
        .filter(|id| !id.is_empty())
}

fn classify(path: &str) -> EntryPath<'_> {
    if let Some(id) = child(path, PLUGINS_PATH) {
        EntryPath::Plugin(id)
    } else if let Some(id) = child(path, COMPONENTS_PATH) {
        EntryPath::Component(id)
    } else if path == INSTANCE_INFO_PATH {
        EntryPath::InstanceInfo
    } else {
        EntryPath::Other
    }
}

// =============================================================================
// PUBLIC HANDLE
// =============================================================================

/// Registry ↔ bus synchronizer.
pub struct BusPublisher {
    registry: Arc<Registry>,
    presence: Arc<Presence>,
    commands: mpsc::UnboundedSender<Command>,
    instance_infos: Arc<RwLock<HashMap<String, InstanceInfo>>>,
    presence_token: Mutex<Option<CallbackToken>>,
    registry_token: Mutex<Option<CallbackToken>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BusPublisher {
    /// Announce `info`, start the worker and pick up what is already known:
    /// local registry entries and instances already online.
    pub async fn start(
        transport: Arc<Transport>,
        registry: Arc<Registry>,
        presence: Arc<Presence>,
        local_metadata: Arc<LocalMetadata>,
        info: InstanceInfo,
    ) -> Result<Arc<Self>, TransportError> {
        let info_json = serde_json::to_value(&info)
            .map_err(|e| TransportError::Codec(CodecError::Json(e.to_string())))?;
        local_metadata.set(INSTANCE_INFO_PATH, info_json).await?;

        let (commands, receiver) = mpsc::unbounded_channel();
        let instance_infos = Arc::new(RwLock::new(HashMap::new()));
        let worker = Worker {
            transport,
            registry: registry.clone(),
            local_metadata,
            commands: commands.clone(),
            instance_infos: instance_infos.clone(),
            trackers: HashMap::new(),
            bindings: HashMap::new(),
            next_generation: 0,
        };
        let handle = tokio::spawn(worker.run(receiver));

        let publisher = Arc::new(Self {
            registry: registry.clone(),
            presence: presence.clone(),
            commands: commands.clone(),
            instance_infos,
            presence_token: Mutex::new(None),
            registry_token: Mutex::new(None),
            worker: Mutex::new(Some(handle)),
        });

        let sender = commands.clone();
        let token = registry.on_change().register(move |event: &RegistryEvent| {
            if event.is_local() {
                let _ = sender.send(Command::Local(event.clone()));
            }
        });
        *publisher.registry_token.lock() = Some(token);

        for plugin in registry.get_plugins(LOCAL_INSTANCE) {
            let _ = commands.send(Command::Local(RegistryEvent::PluginAdded {
                instance_name: LOCAL_INSTANCE.to_string(),
                plugin,
            }));
        }
        for component in registry.get_components(LOCAL_INSTANCE) {
            let _ = commands.send(Command::Local(RegistryEvent::ComponentAdded {
                instance_name: LOCAL_INSTANCE.to_string(),
                component,
            }));
        }

        let sender = commands.clone();
        let token = presence.on_change().register(move |change: &PresenceChange| {
            let command = if change.online {
                Command::Online(change.instance_name.clone())
            } else {
                Command::Offline(change.instance_name.clone())
            };
            let _ = sender.send(command);
        });
        *publisher.presence_token.lock() = Some(token);

        for instance_name in presence.list_online() {
            let _ = commands.send(Command::Online(instance_name));
        }

        info!("Bus publisher started");
        Ok(publisher)
    }

    /// Last `instance-info` announced by an online instance.
    #[must_use]
    pub fn instance_info(&self, instance_name: &str) -> Option<InstanceInfo> {
        self.instance_infos.read().get(instance_name).cloned()
    }

    /// Wait until every command queued so far has been applied.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.commands.send(Command::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    /// Stop listening, tear every remote instance down and unbind local
    /// components. Local metadata stays retained.
    pub async fn terminate(&self) {
        if let Some(token) = self.presence_token.lock().take() {
            self.presence.on_change().unregister(token);
        }
        if let Some(token) = self.registry_token.lock().take() {
            self.registry.on_change().unregister(token);
        }

        let (done, wait) = oneshot::channel();
        if self.commands.send(Command::Shutdown(done)).is_ok() {
            let _ = wait.await;
        }
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!("Bus publisher terminated");
    }
}

impl Drop for BusPublisher {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.lock().take() {
            handle.abort();
        }
    }
}

// =============================================================================
// WORKER
// =============================================================================

struct TrackedComponent {
    raw: Value,
    plugin_id: String,
    proxy: Arc<RemoteComponent>,
}

struct InstanceTracker {
    generation: u64,
    view: Arc<RemoteMetadataView>,
    token: CallbackToken,
    plugins: BTreeMap<String, Value>,
    components: BTreeMap<String, TrackedComponent>,
    /// Components announced before their plugin.
    pending: BTreeMap<String, (ComponentMetadata, Value)>,
}

enum BindingJob {
    PublishState { member: String, payload: Vec<u8> },
    RunAction { member: String, value: Value },
}

struct LocalBinding {
    component: Arc<dyn Component>,
    dispatcher: Arc<ComponentDispatcher>,
    state_token: CallbackToken,
    jobs: mpsc::UnboundedSender<BindingJob>,
    task: JoinHandle<()>,
}

struct Worker {
    transport: Arc<Transport>,
    registry: Arc<Registry>,
    local_metadata: Arc<LocalMetadata>,
    commands: mpsc::UnboundedSender<Command>,
    instance_infos: Arc<RwLock<HashMap<String, InstanceInfo>>>,
    trackers: HashMap<String, InstanceTracker>,
    bindings: HashMap<String, LocalBinding>,
    next_generation: u64,
}

impl Worker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Online(instance_name) => self.track(&instance_name).await,
                Command::Offline(instance_name) => self.untrack(&instance_name).await,
                Command::Metadata {
                    instance_name,
                    generation,
                    change,
                } => self.apply_remote(&instance_name, generation, change).await,
                Command::Local(event) => self.apply_local(event).await,
                Command::Flush(done) => {
                    let _ = done.send(());
                }
                Command::Shutdown(done) => {
                    self.shutdown().await;
                    let _ = done.send(());
                    break;
                }
            }
        }
        debug!("Bus publisher worker stopped");
    }

    async fn shutdown(&mut self) {
        let instances: Vec<String> = self.trackers.keys().cloned().collect();
        for instance_name in instances {
            self.untrack(&instance_name).await;
        }
        let components: Vec<String> = self.bindings.keys().cloned().collect();
        for component_id in components {
            self.unbind(&component_id, false).await;
        }
    }

    // =========================================================================
    // REMOTE INSTANCES
    // =========================================================================

    async fn track(&mut self, instance_name: &str) {
        if self.trackers.contains_key(instance_name) {
            return;
        }

        let view = match RemoteMetadataView::open(self.transport.clone(), instance_name).await {
            Ok(view) => view,
            Err(e) => {
                error!(instance = %instance_name, error = %e, "Cannot open metadata view");
                return;
            }
        };

        self.next_generation += 1;
        let generation = self.next_generation;
        let sender = self.commands.clone();
        let name = instance_name.to_string();
        let token = view.on_change().register(move |change: &MetadataChange| {
            let _ = sender.send(Command::Metadata {
                instance_name: name.clone(),
                generation,
                change: change.clone(),
            });
        });

        let mut tracker = InstanceTracker {
            generation,
            view: view.clone(),
            token,
            plugins: BTreeMap::new(),
            components: BTreeMap::new(),
            pending: BTreeMap::new(),
        };

        // Entries delivered before the listener was registered are only in
        // the view; later duplicates are skipped by value.
        let (plugins, others): (Vec<_>, Vec<_>) = view
            .entries()
            .into_iter()
            .partition(|(path, _)| matches!(classify(path), EntryPath::Plugin(_)));
        for (path, value) in plugins.into_iter().chain(others) {
            self.apply_set(instance_name, &mut tracker, &path, value).await;
        }

        info!(
            instance = %instance_name,
            plugins = tracker.plugins.len(),
            components = tracker.components.len(),
            "Tracking instance"
        );
        self.trackers.insert(instance_name.to_string(), tracker);
    }

    async fn untrack(&mut self, instance_name: &str) {
        let Some(mut tracker) = self.trackers.remove(instance_name) else {
            return;
        };

        let components = std::mem::take(&mut tracker.components);
        for (component_id, tracked) in components {
            if let Err(e) = self.registry.remove_component(instance_name, &component_id) {
                error!(instance = %instance_name, component = %component_id, error = %e, "Teardown failed");
            }
            tracked.proxy.close().await;
        }
        for plugin_id in tracker.plugins.keys() {
            if let Err(e) = self.registry.remove_plugin(instance_name, plugin_id) {
                error!(instance = %instance_name, plugin = %plugin_id, error = %e, "Teardown failed");
            }
        }

        tracker.view.on_change().unregister(tracker.token);
        if let Err(e) = tracker.view.close().await {
            warn!(instance = %instance_name, error = %e, "Failed to close metadata view");
        }
        self.instance_infos.write().remove(instance_name);

        info!(instance = %instance_name, "Instance untracked");
    }

    async fn apply_remote(&mut self, instance_name: &str, generation: u64, change: MetadataChange) {
        let Some(mut tracker) = self.trackers.remove(instance_name) else {
            return;
        };
        if tracker.generation == generation {
            match change {
                MetadataChange::Set { path, value } => {
                    self.apply_set(instance_name, &mut tracker, &path, value).await;
                }
                MetadataChange::Clear { path } => {
                    self.apply_clear(instance_name, &mut tracker, &path).await;
                }
            }
        }
        self.trackers.insert(instance_name.to_string(), tracker);
    }

    async fn apply_set(
        &mut self,
        instance_name: &str,
        tracker: &mut InstanceTracker,
        path: &str,
        value: Value,
    ) {
        match classify(path) {
            EntryPath::Plugin(id) => self.set_plugin(instance_name, tracker, id, value).await,
            EntryPath::Component(id) => {
                self.set_component(instance_name, tracker, id, value).await;
            }
            EntryPath::InstanceInfo => match serde_json::from_value::<InstanceInfo>(value) {
                Ok(info) => {
                    self.instance_infos
                        .write()
                        .insert(instance_name.to_string(), info);
                }
                Err(e) => {
                    warn!(instance = %instance_name, error = %e, "Dropping malformed instance info");
                }
            },
            EntryPath::Other => {
                debug!(instance = %instance_name, path = %path, "Ignoring metadata entry");
            }
        }
    }

    async fn apply_clear(&mut self, instance_name: &str, tracker: &mut InstanceTracker, path: &str) {
        match classify(path) {
            EntryPath::Plugin(id) => {
                if tracker.plugins.contains_key(id) {
                    self.detach_plugin(instance_name, tracker, id).await;
                }
            }
            EntryPath::Component(id) => {
                self.remove_tracked_component(instance_name, tracker, id).await;
            }
            EntryPath::InstanceInfo => {
                self.instance_infos.write().remove(instance_name);
            }
            EntryPath::Other => {}
        }
    }

    async fn set_plugin(
        &mut self,
        instance_name: &str,
        tracker: &mut InstanceTracker,
        plugin_id: &str,
        value: Value,
    ) {
        if tracker.plugins.get(plugin_id) == Some(&value) {
            return;
        }

        let plugin = match Plugin::from_json(&value) {
            Ok(plugin) => Arc::new(plugin),
            Err(e) => {
                error!(instance = %instance_name, plugin = %plugin_id, error = %e, "Dropping malformed plugin metadata");
                return;
            }
        };
        if plugin.id() != plugin_id {
            error!(
                instance = %instance_name,
                plugin = %plugin_id,
                announced = %plugin.id(),
                "Plugin metadata path does not match its id"
            );
            return;
        }

        if tracker.plugins.contains_key(plugin_id) {
            debug!(instance = %instance_name, plugin = %plugin_id, "Plugin re-announced");
            self.detach_plugin(instance_name, tracker, plugin_id).await;
        }

        if let Err(e) = self.registry.add_plugin(instance_name, plugin) {
            error!(instance = %instance_name, plugin = %plugin_id, error = %e, "Cannot add remote plugin");
            return;
        }
        tracker.plugins.insert(plugin_id.to_string(), value);

        let waiting: Vec<String> = tracker
            .pending
            .iter()
            .filter(|(_, (metadata, _))| metadata.plugin == plugin_id)
            .map(|(id, _)| id.clone())
            .collect();
        for component_id in waiting {
            if let Some((metadata, raw)) = tracker.pending.remove(&component_id) {
                self.attach_component(instance_name, tracker, metadata, raw).await;
            }
        }
    }

    /// Move the plugin's components back to pending, then remove the plugin.
    async fn detach_plugin(&mut self, instance_name: &str, tracker: &mut InstanceTracker, plugin_id: &str) {
        let dependents: Vec<String> = tracker
            .components
            .iter()
            .filter(|(_, tracked)| tracked.plugin_id == plugin_id)
            .map(|(id, _)| id.clone())
            .collect();

        for component_id in dependents {
            let Some(tracked) = tracker.components.remove(&component_id) else {
                continue;
            };
            if let Err(e) = self.registry.remove_component(instance_name, &component_id) {
                error!(instance = %instance_name, component = %component_id, error = %e, "Cannot remove remote component");
            }
            tracked.proxy.close().await;
            match serde_json::from_value::<ComponentMetadata>(tracked.raw.clone()) {
                Ok(metadata) => {
                    tracker.pending.insert(component_id, (metadata, tracked.raw));
                }
                Err(e) => {
                    warn!(instance = %instance_name, component = %component_id, error = %e, "Cannot keep component pending");
                }
            }
        }

        if let Err(e) = self.registry.remove_plugin(instance_name, plugin_id) {
            error!(instance = %instance_name, plugin = %plugin_id, error = %e, "Cannot remove remote plugin");
        }
        tracker.plugins.remove(plugin_id);
    }

    async fn set_component(
        &mut self,
        instance_name: &str,
        tracker: &mut InstanceTracker,
        component_id: &str,
        value: Value,
    ) {
        let known = tracker
            .components
            .get(component_id)
            .is_some_and(|tracked| tracked.raw == value)
            || tracker
                .pending
                .get(component_id)
                .is_some_and(|(_, raw)| *raw == value);
        if known {
            return;
        }

        let metadata: ComponentMetadata = match serde_json::from_value(value.clone()) {
            Ok(metadata) => metadata,
            Err(e) => {
                error!(instance = %instance_name, component = %component_id, error = %e, "Dropping malformed component metadata");
                return;
            }
        };
        if metadata.id != component_id {
            error!(
                instance = %instance_name,
                component = %component_id,
                announced = %metadata.id,
                "Component metadata path does not match its id"
            );
            return;
        }

        self.remove_tracked_component(instance_name, tracker, component_id)
            .await;

        if !tracker.plugins.contains_key(&metadata.plugin) {
            debug!(
                instance = %instance_name,
                component = %component_id,
                plugin = %metadata.plugin,
                "Component waiting for its plugin"
            );
            tracker
                .pending
                .insert(component_id.to_string(), (metadata, value));
            return;
        }

        self.attach_component(instance_name, tracker, metadata, value).await;
    }

    async fn attach_component(
        &mut self,
        instance_name: &str,
        tracker: &mut InstanceTracker,
        metadata: ComponentMetadata,
        raw: Value,
    ) {
        let Some(plugin) = self.registry.get_plugin(instance_name, &metadata.plugin) else {
            tracker.pending.insert(metadata.id.clone(), (metadata, raw));
            return;
        };

        let proxy = match RemoteComponent::open(
            self.transport.clone(),
            instance_name,
            &metadata.id,
            plugin,
        )
        .await
        {
            Ok(proxy) => proxy,
            Err(e) => {
                error!(instance = %instance_name, component = %metadata.id, error = %e, "Cannot open remote component");
                return;
            }
        };

        if let Err(e) = self.registry.add_component(instance_name, proxy.clone()) {
            error!(instance = %instance_name, component = %metadata.id, error = %e, "Cannot add remote component");
            proxy.close().await;
            return;
        }

        tracker.components.insert(
            metadata.id,
            TrackedComponent {
                raw,
                plugin_id: metadata.plugin,
                proxy,
            },
        );
    }

    async fn remove_tracked_component(
        &mut self,
        instance_name: &str,
        tracker: &mut InstanceTracker,
        component_id: &str,
    ) {
        if tracker.pending.remove(component_id).is_some() {
            return;
        }
        let Some(tracked) = tracker.components.remove(component_id) else {
            return;
        };
        if let Err(e) = self.registry.remove_component(instance_name, component_id) {
            error!(instance = %instance_name, component = %component_id, error = %e, "Cannot remove remote component");
        }
        tracked.proxy.close().await;
    }

    // =========================================================================
    // LOCAL ENTRIES
    // =========================================================================

    async fn apply_local(&mut self, event: RegistryEvent) {
        match event {
            RegistryEvent::PluginAdded { plugin, .. } => {
                let announced = match plugin.to_json() {
                    Ok(value) => self.local_metadata.set(&plugin.metadata_path(), value).await,
                    Err(e) => Err(TransportError::Codec(CodecError::Json(e.to_string()))),
                };
                if let Err(e) = announced {
                    error!(plugin = %plugin.id(), error = %e, "Cannot announce plugin");
                }
            }
            RegistryEvent::PluginRemoved { plugin_id, .. } => {
                let path = format!("{}/{}", PLUGINS_PATH, plugin_id);
                if let Err(e) = self.local_metadata.clear(&path).await {
                    error!(plugin = %plugin_id, error = %e, "Cannot withdraw plugin");
                }
            }
            RegistryEvent::ComponentAdded { component, .. } => {
                if self.bindings.contains_key(component.id()) {
                    return;
                }
                let metadata = ComponentMetadata {
                    id: component.id().to_string(),
                    plugin: component.plugin().id().to_string(),
                };
                self.bind(component).await;

                let announced = match serde_json::to_value(&metadata) {
                    Ok(value) => self.local_metadata.set(&metadata.metadata_path(), value).await,
                    Err(e) => Err(TransportError::Codec(CodecError::Json(e.to_string()))),
                };
                if let Err(e) = announced {
                    error!(component = %metadata.id, error = %e, "Cannot announce component");
                }
            }
            RegistryEvent::ComponentRemoved { component_id, .. } => {
                let path = format!("{}/{}", COMPONENTS_PATH, component_id);
                if let Err(e) = self.local_metadata.clear(&path).await {
                    error!(component = %component_id, error = %e, "Cannot withdraw component");
                }
                self.unbind(&component_id, true).await;
            }
        }
    }

    async fn bind(&mut self, component: Arc<dyn Component>) {
        let component_id = component.id().to_string();
        let plugin = component.plugin().clone();
        let dispatcher = ComponentDispatcher::local(self.transport.clone(), &component_id);
        let (jobs, receiver) = mpsc::unbounded_channel();

        let task = tokio::spawn(run_binding(
            component.clone(),
            dispatcher.clone(),
            receiver,
        ));

        for member in plugin.action_members() {
            let handler = action_handler(&component_id, &plugin, &member.name, jobs.clone());
            if let Err(e) = dispatcher.add_subscription(&member.name, handler).await {
                error!(component = %component_id, member = %member.name, error = %e, "Cannot bind action");
            }
        }

        let sender = jobs.clone();
        let state_plugin = plugin.clone();
        let state_token = component.on_state_change().register(move |change: &StateChange| {
            queue_state(&state_plugin, &change.component_id, &change.member, &change.value, &sender);
        });
        for (member, value) in component.state() {
            queue_state(&plugin, &component_id, &member, &value, &jobs);
        }

        debug!(component = %component_id, "Local component bound");
        self.bindings.insert(
            component_id,
            LocalBinding {
                component,
                dispatcher,
                state_token,
                jobs,
                task,
            },
        );
    }

    async fn unbind(&mut self, component_id: &str, clear_state: bool) {
        let Some(binding) = self.bindings.remove(component_id) else {
            return;
        };

        binding.component.on_state_change().unregister(binding.state_token);
        binding.dispatcher.close().await;
        drop(binding.jobs);
        if tokio::time::timeout(UNBIND_DRAIN_TIMEOUT, binding.task).await.is_err() {
            warn!(component = %component_id, "State publication did not drain in time");
        }

        if clear_state {
            for member in binding.component.plugin().state_members() {
                if let Err(e) = binding.dispatcher.emit(&member.name, Vec::new(), true).await {
                    warn!(component = %component_id, member = %member.name, error = %e, "Cannot clear state");
                }
            }
        }
        debug!(component = %component_id, "Local component unbound");
    }
}

fn queue_state(
    plugin: &Plugin,
    component_id: &str,
    member: &str,
    value: &Value,
    jobs: &mpsc::UnboundedSender<BindingJob>,
) {
    let Some(definition) = plugin.member(member) else {
        return;
    };
    match encode_value(&definition.value_type, value) {
        Ok(payload) => {
            let _ = jobs.send(BindingJob::PublishState {
                member: member.to_string(),
                payload,
            });
        }
        Err(e) => {
            error!(component = %component_id, member = %member, error = %e, "Cannot encode state");
        }
    }
}

fn action_handler(
    component_id: &str,
    plugin: &Plugin,
    member: &str,
    jobs: mpsc::UnboundedSender<BindingJob>,
) -> MemberHandler {
    let component_id = component_id.to_string();
    let member = member.to_string();
    let value_type = plugin.member(&member).map(|m| m.value_type.clone());
    Arc::new(move |payload: &[u8]| {
        let Some(value_type) = &value_type else {
            return;
        };
        match decode_value(value_type, payload) {
            Ok(value) => {
                let _ = jobs.send(BindingJob::RunAction {
                    member: member.clone(),
                    value,
                });
            }
            Err(e) => {
                warn!(component = %component_id, member = %member, error = %e, "Dropping undecodable action payload");
            }
        }
    })
}

/// Per-component job loop: state publications and actions, in order.
async fn run_binding(
    component: Arc<dyn Component>,
    dispatcher: Arc<ComponentDispatcher>,
    mut jobs: mpsc::UnboundedReceiver<BindingJob>,
) {
    while let Some(job) = jobs.recv().await {
        match job {
            BindingJob::PublishState { member, payload } => {
                if let Err(e) = dispatcher.emit(&member, payload, true).await {
                    warn!(component = %component.id(), member = %member, error = %e, "Cannot publish state");
                }
            }
            BindingJob::RunAction { member, value } => {
                if let Err(e) = component.execute_action(&member, value).await {
                    error!(component = %component.id(), member = %member, error = %e, "Action failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::LocalComponent;
    use bus_transport::{InMemoryBroker, TransportConfig};
    use bus_types::{PluginBuilder, Type};
    use serde_json::{json, Map};

    struct Node {
        transport: Arc<Transport>,
        registry: Arc<Registry>,
        publisher: Arc<BusPublisher>,
    }

    async fn node(broker: &InMemoryBroker, name: &str) -> Node {
        let transport = Transport::new(TransportConfig::new(name), Arc::new(broker.client()));
        transport.start().await.unwrap();
        let registry = Arc::new(Registry::new());
        let presence = Presence::start(transport.clone()).await.unwrap();
        let local_metadata = LocalMetadata::new(transport.clone());
        let info = InstanceInfo {
            instance_type: "test".into(),
            ..InstanceInfo::default()
        };
        let publisher = BusPublisher::start(
            transport.clone(),
            registry.clone(),
            presence,
            local_metadata,
            info,
        )
        .await
        .unwrap();
        Node {
            transport,
            registry,
            publisher,
        }
    }

    fn value_binary() -> Arc<Plugin> {
        Arc::new(
            PluginBuilder::new("logic", "ValueBinary")
                .state("value", Type::Bool)
                .action("setValue", Type::Bool)
                .build()
                .unwrap(),
        )
    }

    async fn eventually<F: Fn() -> bool>(check: F) -> bool {
        for _ in 0..100 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        check()
    }

    #[test]
    fn test_classify_paths() {
        assert_eq!(classify("plugins/logic.X"), EntryPath::Plugin("logic.X"));
        assert_eq!(classify("components/light"), EntryPath::Component("light"));
        assert_eq!(classify("instance-info"), EntryPath::InstanceInfo);
        assert_eq!(classify("plugins/"), EntryPath::Other);
        assert_eq!(classify("pluginsx/a"), EntryPath::Other);
    }

    #[tokio::test]
    async fn test_component_before_plugin_is_deferred() {
        let broker = InMemoryBroker::new();
        // Lexical retained order delivers the component first.
        broker.inject(
            "a/metadata/components/kitchen-light",
            br#"{"id":"kitchen-light","plugin":"logic.ValueBinary"}"#.to_vec(),
            true,
        );
        broker.inject(
            "a/metadata/plugins/logic.ValueBinary",
            serde_json::to_vec(&value_binary().to_json().unwrap()).unwrap(),
            true,
        );

        let b = node(&broker, "b").await;
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        b.registry.on_change().register(move |event: &RegistryEvent| {
            sink.lock().push(format!("{:?}", event));
        });

        broker.inject("a/online", vec![1], true);
        assert!(eventually(|| b.registry.get_component("kitchen-light").is_some()).await);
        assert_eq!(
            *events.lock(),
            vec![
                "PluginAdded(\"a\", logic.ValueBinary)".to_string(),
                "ComponentAdded(\"a\", kitchen-light)".to_string(),
            ]
        );

        broker.inject("a/online", Vec::new(), true);
        assert!(eventually(|| b.registry.get_instance_names().is_empty()).await);
        assert_eq!(events.lock().len(), 4);
        assert!(events.lock()[2].starts_with("ComponentRemoved"));
    }

    #[tokio::test]
    async fn test_live_plugin_clear_detaches_components() {
        let broker = InMemoryBroker::new();
        let b = node(&broker, "b").await;
        broker.inject("a/online", vec![1], true);
        b.publisher.flush().await;

        broker.inject(
            "a/metadata/components/light",
            br#"{"id":"light","plugin":"logic.ValueBinary"}"#.to_vec(),
            true,
        );
        broker.inject(
            "a/metadata/plugins/logic.ValueBinary",
            serde_json::to_vec(&value_binary().to_json().unwrap()).unwrap(),
            true,
        );
        assert!(eventually(|| b.registry.get_component("light").is_some()).await);

        broker.inject("a/metadata/plugins/logic.ValueBinary", Vec::new(), true);
        assert!(eventually(|| !b.registry.has_plugin("a", "logic.ValueBinary")).await);
        assert!(b.registry.get_component("light").is_none());

        broker.inject(
            "a/metadata/plugins/logic.ValueBinary",
            serde_json::to_vec(&value_binary().to_json().unwrap()).unwrap(),
            true,
        );
        assert!(eventually(|| b.registry.get_component("light").is_some()).await);
    }

    #[tokio::test]
    async fn test_malformed_entries_do_not_apply() {
        let broker = InMemoryBroker::new();
        broker.inject("a/metadata/plugins/logic.Bad", br#"{"module":"logic"}"#.to_vec(), true);
        broker.inject("a/metadata/components/x", br#"{"id":"y","plugin":"p"}"#.to_vec(), true);
        broker.inject("a/metadata/instance-info", br#"{"type":"ui","hostname":"h"}"#.to_vec(), true);
        let b = node(&broker, "b").await;

        broker.inject("a/online", vec![1], true);
        assert!(eventually(|| b.publisher.instance_info("a").is_some()).await);
        b.publisher.flush().await;
        assert_eq!(b.registry.plugin_count(), 0);
        assert_eq!(b.registry.component_count(), 0);
        assert_eq!(b.publisher.instance_info("a").unwrap().instance_type, "ui");
    }

    #[tokio::test]
    async fn test_local_entries_announced_and_actions_routed() {
        let broker = InMemoryBroker::new();
        let a = node(&broker, "a").await;
        let plugin = value_binary();
        a.registry.add_plugin(LOCAL_INSTANCE, plugin.clone()).unwrap();
        let light = LocalComponent::builder("light", plugin, Map::new())
            .state("value", json!(false))
            .action("setValue", |component: &LocalComponent, value| {
                component.set_state("value", value)
            })
            .build()
            .unwrap();
        a.registry.add_component(LOCAL_INSTANCE, light.clone()).unwrap();
        a.publisher.flush().await;

        assert!(broker.retained("a/metadata/plugins/logic.ValueBinary").is_some());
        assert_eq!(
            broker.retained("a/metadata/components/light"),
            Some(br#"{"id":"light","plugin":"logic.ValueBinary"}"#.to_vec())
        );
        assert!(broker.retained("a/metadata/instance-info").is_some());
        assert!(eventually(|| broker.retained("a/components/light/value") == Some(vec![0])).await);

        broker.inject("a/components/light/setValue", vec![1], false);
        assert!(eventually(|| light.get_state("value") == Some(json!(true))).await);
        assert!(eventually(|| broker.retained("a/components/light/value") == Some(vec![1])).await);

        a.registry.remove_component(LOCAL_INSTANCE, "light").unwrap();
        a.publisher.flush().await;
        assert_eq!(broker.retained("a/metadata/components/light"), None);
        assert_eq!(broker.retained("a/components/light/value"), None);
        assert_eq!(a.transport.subscription_count("a/components/light/setValue"), 0);
    }

    #[tokio::test]
    async fn test_terminate_tears_down_remote_instances() {
        let broker = InMemoryBroker::new();
        broker.inject(
            "a/metadata/plugins/logic.ValueBinary",
            serde_json::to_vec(&value_binary().to_json().unwrap()).unwrap(),
            true,
        );
        broker.inject("a/online", vec![1], true);
        let b = node(&broker, "b").await;
        assert!(eventually(|| b.registry.plugin_count() == 1).await);

        b.publisher.terminate().await;
        assert_eq!(b.registry.plugin_count(), 0);
        assert_eq!(b.transport.subscription_count("a/metadata/#"), 0);
    }
}
