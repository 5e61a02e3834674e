//! # Bus Node
//!
//! Runs one home bus instance against an in-process broker.
//!
//! ## Startup Sequence
//!
//! 1. Load telemetry and node configuration from the environment
//! 2. Install logging (console plus `{instance}/logger` shipping)
//! 3. Create and start the node
//! 4. Serve `echo` over RPC and register a `logic.ValueBinary` component
//! 5. Run until Ctrl+C, then terminate

use std::sync::Arc;

use anyhow::{Context, Result};
use bus_node::{BusNode, NodeConfig};
use bus_registry::{Component, LocalComponent, LOCAL_INSTANCE};
use bus_telemetry::{init_telemetry, BusLogLayer, TelemetryConfig};
use bus_transport::{handler_fn, InMemoryBroker};
use bus_types::{ConfigType, PluginBuilder, PluginUsage, Type};
use serde_json::{json, Map};
use tracing::info;

fn value_binary_demo(node: &BusNode) -> Result<()> {
    let plugin = Arc::new(
        PluginBuilder::new("logic", "ValueBinary")
            .description("Holds a boolean value")
            .usage(PluginUsage::Logic)
            .version(env!("CARGO_PKG_VERSION"))
            .config("initialValue", ConfigType::Bool)
            .state("value", Type::Bool)
            .action("setValue", Type::Bool)
            .action("toggle", Type::Complex)
            .build()
            .context("Failed to build demo plugin")?,
    );

    let mut config = Map::new();
    config.insert("initialValue".to_string(), json!(false));
    let component = LocalComponent::builder("demo-value", plugin.clone(), config)
        .state("value", json!(false))
        .action("setValue", |component: &LocalComponent, value| {
            component.set_state("value", value)
        })
        .action("toggle", |component: &LocalComponent, _| {
            let current = component
                .get_state("value")
                .and_then(|value| value.as_bool())
                .unwrap_or(false);
            component.set_state("value", json!(!current))
        })
        .build()
        .context("Failed to build demo component")?;

    node.registry()
        .add_plugin(LOCAL_INSTANCE, plugin)
        .context("Failed to register demo plugin")?;
    node.registry()
        .add_component(LOCAL_INSTANCE, component)
        .context("Failed to register demo component")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = TelemetryConfig::from_env();
    let config = NodeConfig::from_env();

    let (shipper, records) = BusLogLayer::new(config.instance_name.clone(), telemetry.ship_level);
    let shipper = telemetry.ship_logs.then_some(shipper);
    let _metrics = init_telemetry(&telemetry, shipper).context("Failed to initialize telemetry")?;

    let broker = InMemoryBroker::new();
    let node = BusNode::new(config, Arc::new(broker.client())).context("Invalid node configuration")?;
    node.ship_logs(records);
    node.start().await.context("Failed to start node")?;

    node.rpc()
        .serve("echo", handler_fn(Ok))
        .await
        .context("Failed to serve echo")?;
    value_binary_demo(&node)?;

    info!(instance = %node.instance_name(), "Node is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    node.terminate().await;
    Ok(())
}
