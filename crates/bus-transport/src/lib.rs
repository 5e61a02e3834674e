//! # Bus Transport
//!
//! Everything that talks to the broker.
//!
//! ## Layers
//!
//! ```text
//! BrokerClient (port) ──► Transport ──┬─► Presence           {*}/online
//!                                     ├─► RemoteMetadataView {peer}/metadata/#
//!                                     ├─► LocalMetadata      {self}/metadata/*
//!                                     ├─► RpcService         rpc/services, rpc/replies
//!                                     └─► ComponentDispatcher {inst}/components/{id}/{member}
//! ```
//!
//! Every consumer registers on the transport's `on_message` broadcaster and
//! filters by topic; the transport itself keeps a single dispatch task per
//! broker session so delivery order is preserved.
//!
//! ## Locking
//!
//! Each object guards its own state with one `parking_lot` lock. No lock is
//! held across a broker call and events are emitted after the lock is
//! released.

pub mod broker;
pub mod callbacks;
pub mod client;
pub mod components;
pub mod error;
pub mod metadata;
pub mod presence;
pub mod rpc;
pub mod topics;

pub use broker::{
    BrokerClient, BrokerEvent, BrokerEvents, BrokerMessage, InMemoryBroker, InMemoryBrokerClient,
    LastWill,
};
pub use callbacks::{CallbackManager, CallbackToken};
pub use client::{IncomingMessage, Transport, TransportConfig};
pub use components::{ComponentDispatcher, MemberHandler};
pub use error::{TopicError, TransportError};
pub use metadata::{LocalMetadata, MetadataChange, RemoteMetadataView};
pub use presence::{Presence, PresenceChange, PRESENCE_FILTER};
pub use rpc::{handler_fn, RemoteError, RpcError, RpcHandler, RpcService};
pub use topics::{build_topic, parse_topic, topic_matches, Domain, ParsedTopic};
