//! # Primitive Codec
//!
//! Fixed, bit-exact encodings for raw bus payloads:
//!
//! | primitive | bytes |
//! |-----------|-------|
//! | string | raw UTF-8, whole payload, no length prefix |
//! | bool | 1 byte, `0x00` / `0x01` |
//! | int8 / uint8 | 1 byte |
//! | int32 / uint32 | 4 bytes little-endian |
//! | float | 8 bytes little-endian IEEE-754 |
//! | json | standard JSON text |
//!
//! Fixed-width decoders require the exact payload length. A short payload is
//! always an error, never an out-of-bounds read.
//!
//! The codec knows nothing about logical types; `Primitive::for_type` is the
//! single table mapping a `Type` to the primitive used for member values.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::errors::CodecError;
use crate::value_type::Type;

/// Wire primitive used for a member value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    String,
    Bool,
    Int8,
    Uint8,
    Int32,
    Uint32,
    Float,
    Json,
}

impl Primitive {
    /// Type→Primitive table for component member values.
    ///
    /// Range values travel as int32; values outside the int32 domain are
    /// rejected at encode time.
    #[must_use]
    pub fn for_type(ty: &Type) -> Self {
        match ty {
            Type::Range { .. } => Self::Int32,
            Type::Text => Self::String,
            Type::Float => Self::Float,
            Type::Bool => Self::Bool,
            Type::Enum(_) => Self::String,
            Type::Complex => Self::Json,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Bool => "bool",
            Self::Int8 => "int8",
            Self::Uint8 => "uint8",
            Self::Int32 => "int32",
            Self::Uint32 => "uint32",
            Self::Float => "float",
            Self::Json => "json",
        }
    }
}

fn fixed<const N: usize>(primitive: Primitive, payload: &[u8]) -> Result<[u8; N], CodecError> {
    payload.try_into().map_err(|_| CodecError::InvalidLength {
        primitive: primitive.name(),
        expected: N,
        actual: payload.len(),
    })
}

// =============================================================================
// RAW PRIMITIVES
// =============================================================================

#[must_use]
pub fn encode_string(value: &str) -> Vec<u8> {
    value.as_bytes().to_vec()
}

pub fn decode_string(payload: &[u8]) -> Result<String, CodecError> {
    std::str::from_utf8(payload)
        .map(str::to_string)
        .map_err(|_| CodecError::InvalidUtf8)
}

#[must_use]
pub fn encode_bool(value: bool) -> Vec<u8> {
    vec![u8::from(value)]
}

pub fn decode_bool(payload: &[u8]) -> Result<bool, CodecError> {
    let [byte] = fixed::<1>(Primitive::Bool, payload)?;
    match byte {
        0x00 => Ok(false),
        0x01 => Ok(true),
        other => Err(CodecError::InvalidBool(other)),
    }
}

#[must_use]
pub fn encode_i8(value: i8) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

pub fn decode_i8(payload: &[u8]) -> Result<i8, CodecError> {
    fixed::<1>(Primitive::Int8, payload).map(i8::from_le_bytes)
}

#[must_use]
pub fn encode_u8(value: u8) -> Vec<u8> {
    vec![value]
}

pub fn decode_u8(payload: &[u8]) -> Result<u8, CodecError> {
    fixed::<1>(Primitive::Uint8, payload).map(u8::from_le_bytes)
}

#[must_use]
pub fn encode_i32(value: i32) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

pub fn decode_i32(payload: &[u8]) -> Result<i32, CodecError> {
    fixed::<4>(Primitive::Int32, payload).map(i32::from_le_bytes)
}

#[must_use]
pub fn encode_u32(value: u32) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

pub fn decode_u32(payload: &[u8]) -> Result<u32, CodecError> {
    fixed::<4>(Primitive::Uint32, payload).map(u32::from_le_bytes)
}

#[must_use]
pub fn encode_f64(value: f64) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

pub fn decode_f64(payload: &[u8]) -> Result<f64, CodecError> {
    fixed::<8>(Primitive::Float, payload).map(f64::from_le_bytes)
}

pub fn encode_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(value).map_err(|e| CodecError::Json(e.to_string()))
}

pub fn decode_json<T: DeserializeOwned>(payload: &[u8]) -> Result<T, CodecError> {
    serde_json::from_slice(payload).map_err(|e| CodecError::Json(e.to_string()))
}

// =============================================================================
// MEMBER VALUES
// =============================================================================

fn wrong_kind(primitive: Primitive, value: &Value) -> CodecError {
    CodecError::WrongKind {
        primitive: primitive.name(),
        value: value.to_string(),
    }
}

fn out_of_range(primitive: Primitive, value: &Value) -> CodecError {
    CodecError::OutOfRange {
        primitive: primitive.name(),
        value: value.to_string(),
    }
}

fn as_integer<T: TryFrom<i64>>(primitive: Primitive, value: &Value) -> Result<T, CodecError> {
    let raw = value.as_i64().ok_or_else(|| wrong_kind(primitive, value))?;
    T::try_from(raw).map_err(|_| out_of_range(primitive, value))
}

/// Encode a member value with an explicit primitive.
pub fn encode_primitive(primitive: Primitive, value: &Value) -> Result<Vec<u8>, CodecError> {
    match primitive {
        Primitive::String => value
            .as_str()
            .map(encode_string)
            .ok_or_else(|| wrong_kind(primitive, value)),
        Primitive::Bool => value
            .as_bool()
            .map(encode_bool)
            .ok_or_else(|| wrong_kind(primitive, value)),
        Primitive::Int8 => as_integer::<i8>(primitive, value).map(encode_i8),
        Primitive::Uint8 => as_integer::<u8>(primitive, value).map(encode_u8),
        Primitive::Int32 => as_integer::<i32>(primitive, value).map(encode_i32),
        Primitive::Uint32 => as_integer::<u32>(primitive, value).map(encode_u32),
        Primitive::Float => value
            .as_f64()
            .map(encode_f64)
            .ok_or_else(|| wrong_kind(primitive, value)),
        Primitive::Json => encode_json(value),
    }
}

/// Decode a payload produced by `encode_primitive`.
pub fn decode_primitive(primitive: Primitive, payload: &[u8]) -> Result<Value, CodecError> {
    Ok(match primitive {
        Primitive::String => Value::from(decode_string(payload)?),
        Primitive::Bool => Value::from(decode_bool(payload)?),
        Primitive::Int8 => Value::from(decode_i8(payload)?),
        Primitive::Uint8 => Value::from(decode_u8(payload)?),
        Primitive::Int32 => Value::from(decode_i32(payload)?),
        Primitive::Uint32 => Value::from(decode_u32(payload)?),
        Primitive::Float => {
            let value = decode_f64(payload)?;
            if !value.is_finite() {
                return Err(CodecError::NonFiniteFloat(value.to_string()));
            }
            Value::from(value)
        }
        Primitive::Json => decode_json(payload)?,
    })
}

/// Encode a member value using the Type→Primitive table.
pub fn encode_value(ty: &Type, value: &Value) -> Result<Vec<u8>, CodecError> {
    encode_primitive(Primitive::for_type(ty), value)
}

/// Decode a member payload using the Type→Primitive table.
pub fn decode_value(ty: &Type, payload: &[u8]) -> Result<Value, CodecError> {
    decode_primitive(Primitive::for_type(ty), payload)
}
