//! # Logical Value Types
//!
//! Every component member declares the logical type of its value. The type
//! travels in plugin metadata as its canonical string:
//!
//! | type | canonical form |
//! |------|----------------|
//! | bounded integer | `range[min;max]` |
//! | string | `text` |
//! | number | `float` |
//! | boolean | `bool` |
//! | one of a list | `enum{v1,v2,...}` |
//! | anything JSON | `complex` |
//!
//! `Type::to_string()` re-parses to an equal value.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;
use serde_with::{DeserializeFromStr, SerializeDisplay};

use crate::errors::TypeError;

/// Logical type of a member value. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, SerializeDisplay, DeserializeFromStr)]
pub enum Type {
    /// Signed integer in `[min, max]`, bounds inclusive, `min < max`.
    Range { min: i64, max: i64 },
    /// UTF-8 string.
    Text,
    /// Any JSON number.
    Float,
    /// Boolean.
    Bool,
    /// One of an ordered list of string values (at least two).
    Enum(Vec<String>),
    /// Arbitrary JSON value; validation always succeeds.
    Complex,
}

impl Type {
    /// Build a range type, checking `min < max`.
    pub fn range(min: i64, max: i64) -> Result<Self, TypeError> {
        if min >= max {
            return Err(TypeError::InvertedRange { min, max });
        }
        Ok(Self::Range { min, max })
    }

    /// Build an enum type, checking there are at least two non-empty values.
    pub fn enumeration<I, S>(values: I) -> Result<Self, TypeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        if values.len() < 2 {
            return Err(TypeError::TooFewEnumValues(values.len()));
        }
        if values.iter().any(String::is_empty) {
            return Err(TypeError::EmptyEnumValue(values.join(",")));
        }
        Ok(Self::Enum(values))
    }

    /// Parse a canonical type string.
    pub fn parse(input: &str) -> Result<Self, TypeError> {
        if input.is_empty() {
            return Err(TypeError::Empty);
        }

        let (base, args) = split_arguments(input)?;

        match (base, args) {
            ("range", Some(('[', args))) => parse_range(input, args),
            ("enum", Some(('{', args))) => {
                let values: Vec<&str> = args.split(',').collect();
                if values.len() < 2 {
                    return Err(TypeError::TooFewEnumValues(values.len()));
                }
                if values.iter().any(|v| v.is_empty()) {
                    return Err(TypeError::EmptyEnumValue(input.to_string()));
                }
                Ok(Self::Enum(values.into_iter().map(str::to_string).collect()))
            }
            ("range", _) | ("enum", _) => Err(TypeError::Malformed(input.to_string())),
            ("text", None) => Ok(Self::Text),
            ("float", None) => Ok(Self::Float),
            ("bool", None) => Ok(Self::Bool),
            ("complex", None) => Ok(Self::Complex),
            ("text" | "float" | "bool" | "complex", Some(_)) => {
                Err(TypeError::UnexpectedArguments {
                    base: base.to_string(),
                    input: input.to_string(),
                })
            }
            (other, _) => Err(TypeError::UnknownBase(other.to_string())),
        }
    }

    /// Runtime kind and domain check. Never coerces.
    #[must_use]
    pub fn validate(&self, value: &Value) -> bool {
        match self {
            Self::Range { min, max } => value
                .as_i64()
                .map(|v| (*min..=*max).contains(&v))
                .unwrap_or(false),
            Self::Text => value.is_string(),
            Self::Float => value.is_number(),
            Self::Bool => value.is_boolean(),
            Self::Enum(values) => value
                .as_str()
                .map(|v| values.iter().any(|candidate| candidate == v))
                .unwrap_or(false),
            Self::Complex => true,
        }
    }

    /// Short name of the variant, used in log fields.
    #[must_use]
    pub fn base_name(&self) -> &'static str {
        match self {
            Self::Range { .. } => "range",
            Self::Text => "text",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Enum(_) => "enum",
            Self::Complex => "complex",
        }
    }
}

/// Splits `base[args]` / `base{args}` / `base`.
fn split_arguments(input: &str) -> Result<(&str, Option<(char, &str)>), TypeError> {
    let Some(open_at) = input.find(['[', '{']) else {
        if input.contains([']', '}']) {
            return Err(TypeError::Malformed(input.to_string()));
        }
        return Ok((input, None));
    };

    let open = input[open_at..].chars().next().unwrap_or('[');
    let close = if open == '[' { ']' } else { '}' };

    if !input.ends_with(close) || open_at == 0 {
        return Err(TypeError::Malformed(input.to_string()));
    }

    let base = &input[..open_at];
    let args = &input[open_at + 1..input.len() - 1];
    if args.contains(['[', ']', '{', '}']) {
        return Err(TypeError::Malformed(input.to_string()));
    }

    Ok((base, Some((open, args))))
}

fn parse_range(input: &str, args: &str) -> Result<Type, TypeError> {
    let mut bounds = args.split(';');
    let (Some(min), Some(max), None) = (bounds.next(), bounds.next(), bounds.next()) else {
        return Err(TypeError::InvalidRangeBounds(input.to_string()));
    };
    let min: i64 = min
        .parse()
        .map_err(|_| TypeError::InvalidRangeBounds(input.to_string()))?;
    let max: i64 = max
        .parse()
        .map_err(|_| TypeError::InvalidRangeBounds(input.to_string()))?;
    Type::range(min, max)
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Range { min, max } => write!(f, "range[{};{}]", min, max),
            Self::Text => write!(f, "text"),
            Self::Float => write!(f, "float"),
            Self::Bool => write!(f, "bool"),
            Self::Enum(values) => write!(f, "enum{{{}}}", values.join(",")),
            Self::Complex => write!(f, "complex"),
        }
    }
}

impl FromStr for Type {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_round_trip() {
        let inputs = [
            "range[0;100]",
            "range[-9223372036854775808;9223372036854775807]",
            "range[-5;-1]",
            "text",
            "float",
            "bool",
            "enum{off,on}",
            "enum{low,medium,high}",
            "complex",
        ];

        for input in inputs {
            let parsed = Type::parse(input).expect(input);
            assert_eq!(parsed.to_string(), input);
            assert_eq!(Type::parse(&parsed.to_string()).unwrap(), parsed);
        }
    }

    #[test]
    fn test_parse_variants() {
        assert_eq!(Type::parse("range[1;3]").unwrap(), Type::Range { min: 1, max: 3 });
        assert_eq!(
            Type::parse("enum{a,b}").unwrap(),
            Type::Enum(vec!["a".into(), "b".into()])
        );
        assert_eq!("bool".parse::<Type>().unwrap(), Type::Bool);
    }

    #[test]
    fn test_parse_malformed() {
        assert_eq!(Type::parse(""), Err(TypeError::Empty));
        assert!(matches!(Type::parse("integer"), Err(TypeError::UnknownBase(_))));
        assert!(matches!(Type::parse("range[1;2"), Err(TypeError::Malformed(_))));
        assert!(matches!(Type::parse("range{1;2}"), Err(TypeError::Malformed(_))));
        assert!(matches!(Type::parse("range"), Err(TypeError::Malformed(_))));
        assert!(matches!(Type::parse("[1;2]"), Err(TypeError::Malformed(_))));
        assert!(matches!(Type::parse("range[1;2]x"), Err(TypeError::Malformed(_))));
        assert!(matches!(Type::parse("text]"), Err(TypeError::Malformed(_))));
        assert!(matches!(
            Type::parse("range[a;2]"),
            Err(TypeError::InvalidRangeBounds(_))
        ));
        assert!(matches!(
            Type::parse("range[1;2;3]"),
            Err(TypeError::InvalidRangeBounds(_))
        ));
        assert!(matches!(
            Type::parse("range[99999999999999999999;1]"),
            Err(TypeError::InvalidRangeBounds(_))
        ));
        assert_eq!(
            Type::parse("range[5;5]"),
            Err(TypeError::InvertedRange { min: 5, max: 5 })
        );
        assert_eq!(Type::parse("enum{solo}"), Err(TypeError::TooFewEnumValues(1)));
        assert!(matches!(Type::parse("enum{a,}"), Err(TypeError::EmptyEnumValue(_))));
        assert!(matches!(
            Type::parse("text[1]"),
            Err(TypeError::UnexpectedArguments { .. })
        ));
        assert!(matches!(Type::parse("enum{a,{b}}"), Err(TypeError::Malformed(_))));
    }

    #[test]
    fn test_validate_range_bounds() {
        let ty = Type::range(-10, 10).unwrap();
        assert!(ty.validate(&json!(-10)));
        assert!(ty.validate(&json!(10)));
        assert!(ty.validate(&json!(0)));
        assert!(!ty.validate(&json!(11)));
        assert!(!ty.validate(&json!(-11)));
        assert!(!ty.validate(&json!(1.5)));
        assert!(!ty.validate(&json!("5")));
    }

    #[test]
    fn test_validate_kinds() {
        assert!(Type::Text.validate(&json!("hello")));
        assert!(!Type::Text.validate(&json!(1)));
        assert!(Type::Float.validate(&json!(1.25)));
        assert!(Type::Float.validate(&json!(3)));
        assert!(!Type::Float.validate(&json!("1.25")));
        assert!(Type::Bool.validate(&json!(false)));
        assert!(!Type::Bool.validate(&json!(0)));
        assert!(Type::Complex.validate(&json!({"a": [1, 2]})));
        assert!(Type::Complex.validate(&Value::Null));
    }

    #[test]
    fn test_validate_enum_membership() {
        let ty = Type::enumeration(["off", "on"]).unwrap();
        assert!(ty.validate(&json!("on")));
        assert!(!ty.validate(&json!("ON")));
        assert!(!ty.validate(&json!(true)));
    }

    #[test]
    fn test_serde_uses_canonical_string() {
        let ty = Type::range(0, 255).unwrap();
        assert_eq!(serde_json::to_value(&ty).unwrap(), json!("range[0;255]"));
        let back: Type = serde_json::from_value(json!("enum{a,b,c}")).unwrap();
        assert_eq!(back, Type::enumeration(["a", "b", "c"]).unwrap());
        assert!(serde_json::from_value::<Type>(json!("nope")).is_err());
    }
}
