//! # RPC
//!
//! Request/reply over the broker.
//!
//! ## Server
//!
//! `serve(address, handler)` subscribes to `{self}/rpc/services/{address}`.
//! Each request `{input, replyTopic}` runs the handler on its own task and
//! the result is published, unretained and best-effort, to `replyTopic` as
//! `{output}` or `{error: {message, stacktrace}}`.
//!
//! ## Client
//!
//! `call(instance, address, input, timeout)` subscribes to a fresh
//! `{self}/rpc/replies/{uuid}`, publishes the request to
//! `{instance}/rpc/services/{address}` and waits for the matching reply. The
//! reply topic is unsubscribed whatever the outcome.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bus_telemetry::RPC_CALLS;
use bus_types::codec::{decode_json, encode_json};
use bus_types::CodecError;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::callbacks::CallbackToken;
use crate::client::{IncomingMessage, Transport};
use crate::error::TransportError;
use crate::topics::{parse_topic, Domain};

// =============================================================================
// WIRE SHAPES
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcRequest {
    #[serde(default)]
    input: Value,
    reply_topic: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RpcReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<RemoteError>,
}

/// Failure reported by a remote handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct RemoteError {
    pub message: String,
    #[serde(default)]
    pub stacktrace: String,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stacktrace: String::new(),
        }
    }
}

/// RPC errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RpcError {
    #[error("address '{0}' is already served")]
    AlreadyServed(String),

    #[error("address '{0}' is not served")]
    NotServed(String),

    #[error("invalid RPC address '{0}'")]
    InvalidAddress(String),

    #[error("call to {instance}/{address} timed out after {timeout_ms}ms")]
    Timeout {
        instance: String,
        address: String,
        timeout_ms: u64,
    },

    #[error("remote error: {message}")]
    Remote { message: String, stacktrace: String },

    /// The service was shut down while the call was waiting.
    #[error("RPC service closed")]
    Closed,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

// =============================================================================
// HANDLERS
// =============================================================================

/// Server-side request handler.
#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle(&self, input: Value) -> Result<Value, RemoteError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> RpcHandler for FnHandler<F>
where
    F: Fn(Value) -> Result<Value, RemoteError> + Send + Sync,
{
    async fn handle(&self, input: Value) -> Result<Value, RemoteError> {
        (self.0)(input)
    }
}

/// Wrap a synchronous closure as a handler.
pub fn handler_fn<F>(f: F) -> Arc<dyn RpcHandler>
where
    F: Fn(Value) -> Result<Value, RemoteError> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

fn validate_address(address: &str) -> Result<(), RpcError> {
    if address.is_empty() || address.contains(['/', '+', '#']) {
        return Err(RpcError::InvalidAddress(address.to_string()));
    }
    Ok(())
}

// =============================================================================
// SERVICE
// =============================================================================

/// RPC server and client of one instance.
pub struct RpcService {
    transport: Arc<Transport>,
    handlers: RwLock<HashMap<String, Arc<dyn RpcHandler>>>,
    pending: Mutex<HashMap<String, oneshot::Sender<RpcReply>>>,
    token: Mutex<Option<CallbackToken>>,
}

impl RpcService {
    pub fn new(transport: Arc<Transport>) -> Arc<Self> {
        let service = Arc::new(Self {
            transport: transport.clone(),
            handlers: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            token: Mutex::new(None),
        });

        let weak: Weak<Self> = Arc::downgrade(&service);
        let token = transport
            .on_message()
            .register(move |message: &IncomingMessage| {
                if let Some(service) = weak.upgrade() {
                    service.handle_message(message);
                }
            });
        *service.token.lock() = Some(token);

        service
    }

    fn service_topic(&self, address: &str) -> String {
        self.transport.build_topic(Domain::RpcServices, &[address])
    }

    /// Start answering requests on `address`.
    pub async fn serve(
        &self,
        address: &str,
        handler: Arc<dyn RpcHandler>,
    ) -> Result<(), RpcError> {
        validate_address(address)?;
        {
            let mut handlers = self.handlers.write();
            if handlers.contains_key(address) {
                return Err(RpcError::AlreadyServed(address.to_string()));
            }
            handlers.insert(address.to_string(), handler);
        }

        if let Err(e) = self.transport.subscribe(&self.service_topic(address)).await {
            self.handlers.write().remove(address);
            return Err(e.into());
        }

        info!(address = %address, "RPC service registered");
        Ok(())
    }

    /// Stop answering requests on `address`.
    pub async fn unserve(&self, address: &str) -> Result<(), RpcError> {
        if self.handlers.write().remove(address).is_none() {
            return Err(RpcError::NotServed(address.to_string()));
        }
        self.transport
            .unsubscribe(&self.service_topic(address))
            .await?;

        info!(address = %address, "RPC service unregistered");
        Ok(())
    }

    #[must_use]
    pub fn is_served(&self, address: &str) -> bool {
        self.handlers.read().contains_key(address)
    }

    /// Call `address` on `instance` and wait up to `timeout` for the reply.
    pub async fn call(
        &self,
        instance: &str,
        address: &str,
        input: Value,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        let result = self.call_inner(instance, address, input, timeout).await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(RpcError::Remote { .. }) => "remote_error",
            Err(RpcError::Timeout { .. }) => "timeout",
            Err(_) => "failed",
        };
        RPC_CALLS.with_label_values(&[outcome]).inc();
        result
    }

    async fn call_inner(
        &self,
        instance: &str,
        address: &str,
        input: Value,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        validate_address(address)?;

        let reply_id = Uuid::new_v4().simple().to_string();
        let reply_topic = self.transport.build_topic(Domain::RpcReplies, &[&reply_id]);
        let (sender, receiver) = oneshot::channel();
        self.pending.lock().insert(reply_topic.clone(), sender);

        if let Err(e) = self.transport.subscribe(&reply_topic).await {
            self.pending.lock().remove(&reply_topic);
            return Err(e.into());
        }

        let result = self
            .exchange(instance, address, input, &reply_topic, receiver, timeout)
            .await;

        self.pending.lock().remove(&reply_topic);
        if let Err(e) = self.transport.unsubscribe(&reply_topic).await {
            warn!(topic = %reply_topic, error = %e, "Failed to release reply topic");
        }
        result
    }

    async fn exchange(
        &self,
        instance: &str,
        address: &str,
        input: Value,
        reply_topic: &str,
        receiver: oneshot::Receiver<RpcReply>,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        let request = RpcRequest {
            input,
            reply_topic: reply_topic.to_string(),
        };
        let topic = self
            .transport
            .build_remote_topic(instance, Domain::RpcServices, &[address]);
        self.transport
            .publish(&topic, encode_json(&request)?, false)
            .await?;
        debug!(instance = %instance, address = %address, "RPC request sent");

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(reply)) => match reply.error {
                Some(remote) => Err(RpcError::Remote {
                    message: remote.message,
                    stacktrace: remote.stacktrace,
                }),
                None => Ok(reply.output.unwrap_or(Value::Null)),
            },
            Ok(Err(_)) => Err(RpcError::Closed),
            Err(_) => Err(RpcError::Timeout {
                instance: instance.to_string(),
                address: address.to_string(),
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    /// Drop every handler and fail pending calls with `Closed`.
    pub async fn terminate(&self) {
        if let Some(token) = self.token.lock().take() {
            self.transport.on_message().unregister(token);
        }
        self.pending.lock().clear();

        let addresses: Vec<String> = self.handlers.write().drain().map(|(a, _)| a).collect();
        for address in addresses {
            if let Err(e) = self.transport.unsubscribe(&self.service_topic(&address)).await {
                warn!(address = %address, error = %e, "Failed to unsubscribe RPC service");
            }
        }
    }

    // =========================================================================
    // INCOMING
    // =========================================================================

    fn handle_message(self: &Arc<Self>, message: &IncomingMessage) {
        let Ok(parsed) = parse_topic(&message.topic) else {
            return;
        };
        if parsed.instance != self.transport.instance_name() {
            return;
        }

        match parsed.domain {
            Domain::RpcServices => {
                let Some(handler) = self.handlers.read().get(parsed.path).cloned() else {
                    return;
                };
                let service = self.clone();
                let address = parsed.path.to_string();
                let payload = message.payload.clone();
                tokio::spawn(async move {
                    service.answer(&address, handler, &payload).await;
                });
            }
            Domain::RpcReplies => {
                let Some(sender) = self.pending.lock().remove(&message.topic) else {
                    return;
                };
                match decode_json::<RpcReply>(&message.payload) {
                    Ok(reply) => {
                        let _ = sender.send(reply);
                    }
                    Err(e) => {
                        warn!(topic = %message.topic, error = %e, "Dropping malformed RPC reply");
                        // Keep waiting for a well-formed reply.
                        self.pending.lock().insert(message.topic.clone(), sender);
                    }
                }
            }
            _ => {}
        }
    }

    async fn answer(&self, address: &str, handler: Arc<dyn RpcHandler>, payload: &[u8]) {
        let request: RpcRequest = match decode_json(payload) {
            Ok(request) => request,
            Err(e) => {
                warn!(address = %address, error = %e, "Dropping malformed RPC request");
                return;
            }
        };

        let reply = match handler.handle(request.input).await {
            Ok(output) => RpcReply {
                output: Some(output),
                error: None,
            },
            Err(remote) => {
                debug!(address = %address, error = %remote, "RPC handler failed");
                RpcReply {
                    output: None,
                    error: Some(remote),
                }
            }
        };

        let result = match encode_json(&reply) {
            Ok(payload) => self
                .transport
                .publish(&request.reply_topic, payload, false)
                .await
                .map_err(RpcError::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            error!(
                address = %address,
                reply_topic = %request.reply_topic,
                error = %e,
                "Failed to publish RPC reply"
            );
        }
    }
}
