//! Field values carried by messages.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The scalar written into one field of one row.
///
/// The set of variants is closed so every value has a fixed wire tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    /// Absent value; also how a field is cleared.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed 64-bit integer. Money amounts travel as integer cents.
    Integer(i64),
    /// IEEE-754 double.
    Float(f64),
    /// UTF-8 text.
    String(String),
    /// Opaque bytes.
    Bytes(Vec<u8>),
}

/// Wire tags for [`Value`] variants.
pub(crate) mod tag {
    pub const NULL: u8 = 0;
    pub const BOOL: u8 = 1;
    pub const INTEGER: u8 = 2;
    pub const FLOAT: u8 = 3;
    pub const STRING: u8 = 4;
    pub const BYTES: u8 = 5;
}

impl Value {
    /// Returns the wire tag of this value.
    #[must_use]
    pub fn tag(&self) -> u8 {
        match self {
            Self::Null => tag::NULL,
            Self::Bool(_) => tag::BOOL,
            Self::Integer(_) => tag::INTEGER,
            Self::Float(_) => tag::FLOAT,
            Self::String(_) => tag::STRING,
            Self::Bytes(_) => tag::BYTES,
        }
    }

    /// Short name of the variant, for diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
        }
    }

    /// Returns true for [`Value::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the text if this is a string value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer if this is an integer value.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_distinct() {
        let values = [
            Value::Null,
            Value::Bool(true),
            Value::Integer(1),
            Value::Float(1.5),
            Value::from("x"),
            Value::Bytes(vec![1]),
        ];
        let tags: Vec<u8> = values.iter().map(Value::tag).collect();
        assert_eq!(tags, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn conversions() {
        assert_eq!(Value::from(Some(-1250_i64)), Value::Integer(-1250));
        assert_eq!(Value::from(None::<String>), Value::Null);
        assert_eq!(Value::from("Food").as_str(), Some("Food"));
        assert_eq!(Value::Integer(4).as_i64(), Some(4));
        assert!(Value::Null.is_null());
    }

    #[test]
    fn json_shape() {
        let json = serde_json::to_string(&Value::from("Groceries")).unwrap();
        assert_eq!(json, r#"{"type":"string","value":"Groceries"}"#);
        assert_eq!(serde_json::to_string(&Value::Null).unwrap(), r#"{"type":"null"}"#);
    }
}
