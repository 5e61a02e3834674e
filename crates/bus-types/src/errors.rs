//! # Error Types
//!
//! Decode and validation errors. These are always reported to the immediate
//! caller; nothing in this crate logs or recovers on its own.

use thiserror::Error;

/// Errors raised while parsing a logical type string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
    /// Input was empty.
    #[error("empty type string")]
    Empty,

    /// Base name is not one of the known types.
    #[error("unknown type '{0}'")]
    UnknownBase(String),

    /// Brackets are unbalanced or followed by trailing text.
    #[error("malformed type '{0}'")]
    Malformed(String),

    /// A bare type was given arguments, or an argument type got none.
    #[error("type '{base}' does not accept arguments in '{input}'")]
    UnexpectedArguments { base: String, input: String },

    /// Range bounds are missing or not signed 64-bit integers.
    #[error("invalid range bounds in '{0}'")]
    InvalidRangeBounds(String),

    /// Range lower bound is not strictly below the upper bound.
    #[error("range min {min} must be lower than max {max}")]
    InvertedRange { min: i64, max: i64 },

    /// Enum needs at least two values.
    #[error("enum must declare at least two values, got {0}")]
    TooFewEnumValues(usize),

    /// Enum value is empty.
    #[error("enum values must not be empty in '{0}'")]
    EmptyEnumValue(String),
}

/// Errors raised while encoding or decoding a raw bus payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Payload does not have the byte length the primitive requires.
    #[error("invalid payload length for {primitive}: expected {expected} bytes, got {actual}")]
    InvalidLength {
        primitive: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Boolean byte other than 0x00 / 0x01.
    #[error("invalid boolean byte 0x{0:02x}")]
    InvalidBool(u8),

    /// Payload is not valid UTF-8.
    #[error("payload is not valid UTF-8")]
    InvalidUtf8,

    /// JSON could not be encoded or decoded.
    #[error("json codec failure: {0}")]
    Json(String),

    /// Value is of the wrong kind for the primitive.
    #[error("value {value} cannot be encoded as {primitive}")]
    WrongKind {
        primitive: &'static str,
        value: String,
    },

    /// Numeric value does not fit the primitive.
    #[error("value {value} out of range for {primitive}")]
    OutOfRange {
        primitive: &'static str,
        value: String,
    },

    /// Float payload decodes to NaN or an infinity, which JSON cannot hold.
    #[error("non-finite float {0}")]
    NonFiniteFloat(String),
}

/// Errors raised while building or decoding plugin metadata.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetadataError {
    /// Identifier is empty or contains a reserved character.
    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),

    /// Two members (or config items) share a name.
    #[error("duplicate {kind} '{name}' in plugin {plugin}")]
    Duplicate {
        kind: &'static str,
        name: String,
        plugin: String,
    },

    /// A member's value type string did not parse.
    #[error("member '{member}' has an invalid value type: {source}")]
    InvalidMemberType {
        member: String,
        #[source]
        source: TypeError,
    },

    /// The JSON document does not match the metadata shape.
    #[error("malformed metadata: {0}")]
    Malformed(String),

    /// A required config item was not supplied.
    #[error("missing config '{0}'")]
    MissingConfig(String),

    /// A config value has the wrong kind.
    #[error("config '{name}' expects {expected}")]
    InvalidConfig { name: String, expected: &'static str },

    /// A config key is not declared by the plugin.
    #[error("unknown config '{0}'")]
    UnknownConfig(String),
}
