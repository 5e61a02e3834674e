//! # Transport Errors

use bus_types::CodecError;
use thiserror::Error;

/// Errors from broker and transport operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Operation needs a live broker connection.
    #[error("transport is not connected")]
    NotConnected,

    /// `connect` called on a client that already has a session.
    #[error("transport is already connected")]
    AlreadyConnected,

    /// Failure reported by the broker client.
    #[error("broker error: {0}")]
    Broker(String),

    /// Unsubscribe for a filter that has no active subscription.
    #[error("no active subscription for '{0}'")]
    NotSubscribed(String),

    /// A dispatcher member handler was registered twice.
    #[error("member '{member}' of component '{component}' already has a subscription")]
    DuplicateSubscription { component: String, member: String },

    /// A dispatcher member handler was removed but never registered.
    #[error("member '{member}' of component '{component}' has no subscription")]
    UnknownSubscription { component: String, member: String },

    /// Payload could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Topic does not follow `{instance}/{domain}/{path}`.
    #[error(transparent)]
    Topic(#[from] TopicError),
}

/// Errors from topic parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicError {
    #[error("malformed topic '{0}'")]
    Malformed(String),

    #[error("unknown domain in topic '{0}'")]
    UnknownDomain(String),
}
