//! # End-to-End Discovery Tests
//!
//! ```text
//! [Instance a]                               [Instance b]
//!   Registry ──local events──→ BusPublisher
//!                                  │ retained a/metadata/plugins/*
//!                                  │ retained a/metadata/components/*
//!                                  ↓
//!                              [Broker] ──a/online──→ Presence
//!                                  │                     │
//!                                  └──a/metadata/#──→ BusPublisher ──→ Registry
//! ```
//!
//! ## Test Categories
//!
//! 1. **Late joiner**: b starts after a and rebuilds a from retained metadata
//! 2. **Live announcement**: b is already running when a announces
//! 3. **Ordering**: no component is visible before its plugin
//! 4. **Teardown**: a going offline or withdrawing entries empties b

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bus_registry::{RegistryEvent, LOCAL_INSTANCE};
    use bus_transport::InMemoryBroker;
    use parking_lot::Mutex;

    use crate::fixtures::{create_node, install_kitchen_light, start_node, wait_until};

    fn record_events(node: &bus_node::BusNode) -> Arc<Mutex<Vec<String>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        node.registry()
            .on_change()
            .register(move |event: &RegistryEvent| {
                sink.lock().push(format!("{:?}", event));
            });
        events
    }

    fn assert_plugin_first(events: &[String]) {
        let plugin = events
            .iter()
            .position(|e| e.starts_with("PluginAdded(\"a\", logic.ValueBinary)"));
        let component = events
            .iter()
            .position(|e| e.starts_with("ComponentAdded(\"a\", kitchen-light)"));
        match (plugin, component) {
            (Some(p), Some(c)) => assert!(p < c, "component before plugin: {:?}", events),
            other => panic!("missing events {:?} in {:?}", other, events),
        }
    }

    // =========================================================================
    // LATE JOINER
    // =========================================================================

    #[tokio::test]
    async fn test_late_joiner_discovers_plugin_and_component() {
        let broker = InMemoryBroker::new();
        let a = start_node(&broker, "a").await;
        install_kitchen_light(&a);
        a.publisher().unwrap().flush().await;

        let b = create_node(&broker, "b");
        let events = record_events(&b);
        b.start().await.unwrap();
        let registry = b.registry().clone();
        assert!(wait_until(|| registry.get_component("kitchen-light").is_some()).await);

        assert_eq!(registry.get_plugins("a").len(), 1);
        assert!(registry.has_plugin("a", "logic.ValueBinary"));
        assert_eq!(registry.get_components("a").len(), 1);
        assert_eq!(
            registry.get_component_instance("kitchen-light").as_deref(),
            Some("a")
        );
        assert_plugin_first(&events.lock());

        let publisher = b.publisher().unwrap();
        assert!(wait_until(|| publisher.instance_info("a").is_some()).await);

        a.terminate().await;
        assert!(wait_until(|| registry.get_instance_names().is_empty()).await);
        assert_eq!(registry.plugin_count(), 0);
        assert_eq!(registry.component_count(), 0);
        assert!(publisher.instance_info("a").is_none());

        b.terminate().await;
    }

    // =========================================================================
    // LIVE ANNOUNCEMENT
    // =========================================================================

    #[tokio::test]
    async fn test_live_announcement_reaches_running_instance() {
        let broker = InMemoryBroker::new();
        let b = start_node(&broker, "b").await;
        let events = record_events(&b);

        let a = start_node(&broker, "a").await;
        let registry = b.registry().clone();
        let presence = b.presence().unwrap();
        assert!(wait_until(|| presence.is_online("a")).await);

        install_kitchen_light(&a);
        assert!(wait_until(|| registry.get_component("kitchen-light").is_some()).await);
        assert_plugin_first(&events.lock());

        a.registry()
            .remove_component(LOCAL_INSTANCE, "kitchen-light")
            .unwrap();
        assert!(wait_until(|| registry.get_component("kitchen-light").is_none()).await);
        assert!(registry.has_plugin("a", "logic.ValueBinary"));

        a.registry()
            .remove_plugin(LOCAL_INSTANCE, "logic.ValueBinary")
            .unwrap();
        assert!(wait_until(|| !registry.has_plugin("a", "logic.ValueBinary")).await);

        a.terminate().await;
        b.terminate().await;
    }

    // =========================================================================
    // ORDERING
    // =========================================================================

    #[tokio::test]
    async fn test_component_retained_before_plugin_waits_for_it() {
        let broker = InMemoryBroker::new();
        // Retained entries replay in lexical order: components/ then plugins/.
        broker.inject(
            "a/metadata/components/kitchen-light",
            br#"{"id":"kitchen-light","plugin":"logic.ValueBinary"}"#.to_vec(),
            true,
        );
        broker.inject(
            "a/metadata/plugins/logic.ValueBinary",
            serde_json::to_vec(&crate::fixtures::value_binary().to_json().unwrap()).unwrap(),
            true,
        );
        broker.inject("a/online", vec![1], true);

        let b = create_node(&broker, "b");
        let events = record_events(&b);
        b.start().await.unwrap();
        let registry = b.registry().clone();
        assert!(wait_until(|| registry.get_component("kitchen-light").is_some()).await);
        assert_plugin_first(&events.lock());
        assert_eq!(events.lock().len(), 2);

        broker.inject("a/online", Vec::new(), true);
        assert!(wait_until(|| registry.get_instance_names().is_empty()).await);
        let events = events.lock();
        assert_eq!(events.len(), 4);
        assert!(events[2].starts_with("ComponentRemoved"));
        assert!(events[3].starts_with("PluginRemoved"));

        drop(events);
        b.terminate().await;
    }

    #[tokio::test]
    async fn test_instance_comes_back_after_reconnect() {
        let broker = InMemoryBroker::new();
        let a = start_node(&broker, "a").await;
        install_kitchen_light(&a);
        a.publisher().unwrap().flush().await;

        let b = start_node(&broker, "b").await;
        let registry = b.registry().clone();
        assert!(wait_until(|| registry.component_count() == 1).await);

        broker.inject("a/online", Vec::new(), true);
        assert!(wait_until(|| registry.component_count() == 0).await);

        broker.inject("a/online", vec![1], true);
        assert!(wait_until(|| registry.component_count() == 1).await);
        assert_eq!(registry.plugin_count(), 1);

        a.terminate().await;
        b.terminate().await;
    }
}
