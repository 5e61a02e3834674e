//! # Bus Types Crate
//!
//! Protocol-level vocabulary shared by every participant on the bus.
//!
//! ## Contents
//!
//! - **Value types** (`value_type`): the logical `Type` of a member value,
//!   with its canonical string form and runtime validation.
//! - **Primitive codec** (`codec`): bit-exact payload encodings and the
//!   fixed Type→Primitive table used for component members.
//! - **Metadata** (`metadata`): `Plugin`, `Member`, `ConfigItem` and the
//!   JSON shapes published under `{instance}/metadata/*`.
//!
//! Nothing here performs I/O.

pub mod codec;
pub mod errors;
pub mod metadata;
pub mod value_type;

pub use codec::{decode_value, encode_value, Primitive};
pub use errors::*;
pub use metadata::{
    ComponentMetadata, ConfigItem, ConfigType, InstanceInfo, Member, MemberType, Plugin,
    PluginBuilder, PluginUsage,
};
pub use value_type::Type;
