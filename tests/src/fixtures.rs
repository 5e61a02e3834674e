//! Shared fixtures for the end-to-end scenarios.

use std::sync::Arc;
use std::time::Duration;

use bus_node::{BusNode, NodeConfig};
use bus_registry::{LocalComponent, LOCAL_INSTANCE};
use bus_transport::InMemoryBroker;
use bus_types::{Plugin, PluginBuilder, PluginUsage, Type};
use serde_json::{json, Map};

/// Create a node on `broker` without starting it.
pub fn create_node(broker: &InMemoryBroker, name: &str) -> Arc<BusNode> {
    BusNode::new(NodeConfig::named(name), Arc::new(broker.client())).expect("valid node config")
}

/// Create and start a node on `broker`.
pub async fn start_node(broker: &InMemoryBroker, name: &str) -> Arc<BusNode> {
    let node = create_node(broker, name);
    node.start().await.expect("node starts");
    node
}

/// `logic.ValueBinary`: one boolean state, one boolean action.
pub fn value_binary() -> Arc<Plugin> {
    Arc::new(
        PluginBuilder::new("logic", "ValueBinary")
            .usage(PluginUsage::Logic)
            .state("value", Type::Bool)
            .action("setValue", Type::Bool)
            .build()
            .expect("valid plugin"),
    )
}

/// A `logic.ValueBinary` component whose `setValue` stores its argument.
pub fn value_component(id: &str, plugin: Arc<Plugin>) -> Arc<LocalComponent> {
    LocalComponent::builder(id, plugin, Map::new())
        .state("value", json!(false))
        .action("setValue", |component: &LocalComponent, value| {
            component.set_state("value", value)
        })
        .build()
        .expect("valid component")
}

/// Register `logic.ValueBinary` and `kitchen-light` on `node`.
pub fn install_kitchen_light(node: &BusNode) -> Arc<LocalComponent> {
    let plugin = value_binary();
    node.registry()
        .add_plugin(LOCAL_INSTANCE, plugin.clone())
        .expect("plugin added");
    let light = value_component("kitchen-light", plugin);
    node.registry()
        .add_component(LOCAL_INSTANCE, light.clone())
        .expect("component added");
    light
}

/// Poll `check` every 10ms for up to two seconds.
pub async fn wait_until<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
