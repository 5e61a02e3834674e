//! # End-to-End RPC Tests
//!
//! Request on `{target}/rpc/services/{address}` carrying `{input, replyTopic}`;
//! reply `{output}` or `{error}` on the caller's reply topic.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bus_transport::{handler_fn, InMemoryBroker, RemoteError, RpcError};
    use serde_json::json;

    use crate::fixtures::start_node;

    #[tokio::test]
    async fn test_echo_returns_input() {
        let broker = InMemoryBroker::new();
        let a = start_node(&broker, "a").await;
        let b = start_node(&broker, "b").await;
        a.rpc().serve("echo", handler_fn(Ok)).await.unwrap();

        let output = b
            .call_with_timeout("a", "echo", json!({"x": 1}), Duration::from_millis(2000))
            .await
            .unwrap();
        assert_eq!(output, json!({"x": 1}));

        a.terminate().await;
        b.terminate().await;
    }

    #[tokio::test]
    async fn test_unserved_address_times_out() {
        let broker = InMemoryBroker::new();
        let a = start_node(&broker, "a").await;
        let b = start_node(&broker, "b").await;

        let result = b
            .call_with_timeout("a", "missing", json!(null), Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(RpcError::Timeout { .. })));

        a.terminate().await;
        b.terminate().await;
    }

    #[tokio::test]
    async fn test_remote_error_distinct_from_timeout() {
        let broker = InMemoryBroker::new();
        let a = start_node(&broker, "a").await;
        let b = start_node(&broker, "b").await;
        a.rpc()
            .serve(
                "divide",
                handler_fn(|input| {
                    let divisor = input["by"].as_i64().unwrap_or(0);
                    if divisor == 0 {
                        return Err(RemoteError::new("division by zero"));
                    }
                    Ok(json!(100 / divisor))
                }),
            )
            .await
            .unwrap();

        assert_eq!(b.call("a", "divide", json!({"by": 4})).await.unwrap(), json!(25));
        match b.call("a", "divide", json!({"by": 0})).await {
            Err(RpcError::Remote { message, .. }) => assert_eq!(message, "division by zero"),
            other => panic!("expected remote error, got {:?}", other),
        }

        a.terminate().await;
        b.terminate().await;
    }
}
