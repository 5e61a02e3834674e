//! # End-to-End Component Tests
//!
//! A component owned by instance a, driven through its proxy on instance b:
//!
//! ```text
//! b: proxy.execute_action("setValue", true)
//!      └──a/components/kitchen-light/setValue──→ a: LocalComponent
//!                                                   │ set_state
//! b: proxy state ←──a/components/kitchen-light/value (retained)──┘
//! ```

#[cfg(test)]
mod tests {
    use bus_registry::{Component, ComponentError, LOCAL_INSTANCE};
    use bus_transport::InMemoryBroker;
    use serde_json::json;

    use crate::fixtures::{install_kitchen_light, start_node, wait_until};

    #[tokio::test]
    async fn test_remote_action_round_trip() {
        let broker = InMemoryBroker::new();
        let a = start_node(&broker, "a").await;
        let light = install_kitchen_light(&a);
        let b = start_node(&broker, "b").await;

        let registry = b.registry().clone();
        assert!(wait_until(|| registry.get_component("kitchen-light").is_some()).await);
        let proxy = registry.get_component("kitchen-light").unwrap();
        assert!(wait_until(|| proxy.get_state("value") == Some(json!(false))).await);

        proxy.execute_action("setValue", json!(true)).await.unwrap();
        assert!(wait_until(|| light.get_state("value") == Some(json!(true))).await);
        assert!(wait_until(|| proxy.get_state("value") == Some(json!(true))).await);
        assert_eq!(
            broker.retained("a/components/kitchen-light/value"),
            Some(vec![1])
        );

        a.terminate().await;
        b.terminate().await;
    }

    #[tokio::test]
    async fn test_invalid_remote_action_rejected_locally() {
        let broker = InMemoryBroker::new();
        let a = start_node(&broker, "a").await;
        let light = install_kitchen_light(&a);
        let b = start_node(&broker, "b").await;

        let registry = b.registry().clone();
        assert!(wait_until(|| registry.get_component("kitchen-light").is_some()).await);
        let proxy = registry.get_component("kitchen-light").unwrap();

        assert!(matches!(
            proxy.execute_action("setValue", json!("on")).await,
            Err(ComponentError::InvalidValue { .. })
        ));
        assert!(matches!(
            proxy.execute_action("value", json!(true)).await,
            Err(ComponentError::NotAnAction { .. })
        ));
        assert_eq!(light.get_state("value"), Some(json!(false)));

        a.terminate().await;
        b.terminate().await;
    }

    #[tokio::test]
    async fn test_removed_component_clears_retained_state() {
        let broker = InMemoryBroker::new();
        let a = start_node(&broker, "a").await;
        install_kitchen_light(&a);
        let publisher = a.publisher().unwrap();
        publisher.flush().await;
        assert!(
            wait_until(|| broker.retained("a/components/kitchen-light/value").is_some()).await
        );

        a.registry()
            .remove_component(LOCAL_INSTANCE, "kitchen-light")
            .unwrap();
        publisher.flush().await;
        assert_eq!(broker.retained("a/components/kitchen-light/value"), None);
        assert_eq!(broker.retained("a/metadata/components/kitchen-light"), None);
        assert!(broker
            .retained("a/metadata/plugins/logic.ValueBinary")
            .is_some());

        a.terminate().await;
    }
}
