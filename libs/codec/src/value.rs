//! Universal decoded value
//!
//! Lists and maps sit behind `Arc`, so cloning a decoded document is cheap
//! and consumers can never mutate a shared container in place. The
//! `*_mut` accessors go through `Arc::make_mut` and copy on write.

use crate::encoder::Encoder;
use crate::error::{CodecError, CodecResult};
use crate::number::Number;
use base64::Engine as _;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Map storage; sorted so encoding is deterministic
pub type ValueMap = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    Text(String),
    List(Arc<Vec<Value>>),
    Map(Arc<ValueMap>),
    Binary(Bytes),
}

impl Value {
    pub fn list<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::List(Arc::new(items.into_iter().map(Into::into).collect()))
    }

    pub fn map<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self::Map(Arc::new(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ))
    }

    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::Binary(data.into())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::Text(_) => "text",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Binary(_) => "binary",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<&Number> {
        match self {
            Self::Number(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_number().and_then(Number::as_i64)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&ValueMap> {
        match self {
            Self::Map(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<&Bytes> {
        match self {
            Self::Binary(data) => Some(data),
            _ => None,
        }
    }

    /// Map lookup; `None` for missing keys and non-map values
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Mutable list access, copying the shared storage first if needed
    pub fn list_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Self::List(items) => Some(Arc::make_mut(items)),
            _ => None,
        }
    }

    /// Mutable map access, copying the shared storage first if needed
    pub fn map_mut(&mut self) -> Option<&mut ValueMap> {
        match self {
            Self::Map(entries) => Some(Arc::make_mut(entries)),
            _ => None,
        }
    }

    /// Binary payload of a value sent either zero-copy or as base64 text.
    ///
    /// Null yields an empty block.
    pub fn to_byte_array(&self) -> CodecResult<Bytes> {
        match self {
            Self::Binary(data) => Ok(data.clone()),
            Self::Text(text) => base64::engine::general_purpose::STANDARD
                .decode(text)
                .map(Bytes::from)
                .map_err(|e| CodecError::InvalidBase64(e.to_string())),
            Self::Null => Ok(Bytes::new()),
            other => Err(CodecError::TypeMismatch {
                expected: "binary",
                actual: other.type_name(),
            }),
        }
    }

    /// Flatten a map of text values, e.g. peer attributes
    pub fn to_string_map(&self) -> CodecResult<HashMap<String, String>> {
        let entries = self.as_map().ok_or(CodecError::TypeMismatch {
            expected: "map",
            actual: self.type_name(),
        })?;
        entries
            .iter()
            .map(|(k, v)| match v {
                Self::Text(s) => Ok((k.clone(), s.clone())),
                other => Err(CodecError::TypeMismatch {
                    expected: "text",
                    actual: other.type_name(),
                }),
            })
            .collect()
    }
}

/// Renders the non-zero-copy wire form
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut encoder = Encoder::new();
        encoder.write_value(self);
        f.write_str(&String::from_utf8_lossy(&encoder.to_bytes()))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&String> for Value {
    fn from(value: &String) -> Self {
        Self::Text(value.clone())
    }
}

impl From<Number> for Value {
    fn from(value: Number) -> Self {
        Self::Number(value)
    }
}

macro_rules! value_from_number {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(value: $t) -> Self {
                Self::Number(Number::from(value))
            }
        })*
    };
}

value_from_number!(i8, i16, i32, i64, i128, u8, u16, u32, u64, usize, num_bigint::BigInt);

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Self::List(Arc::new(value))
    }
}

impl From<ValueMap> for Value {
    fn from(value: ValueMap) -> Self {
        Self::Map(Arc::new(value))
    }
}

impl From<HashMap<String, String>> for Value {
    fn from(value: HashMap<String, String>) -> Self {
        Self::map(value)
    }
}

impl From<Bytes> for Value {
    fn from(value: Bytes) -> Self {
        Self::Binary(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_on_write_leaves_shared_list_untouched() {
        let original = Value::list([1, 2, 3]);
        let mut copy = original.clone();
        copy.list_mut().unwrap().push(Value::from(4));

        assert_eq!(original.as_list().unwrap().len(), 3);
        assert_eq!(copy.as_list().unwrap().len(), 4);
    }

    #[test]
    fn test_to_byte_array_accepts_binary_and_base64() {
        let raw = Value::binary(vec![0u8, 1, 2, 255]);
        let text = Value::from("AAEC/w==");
        assert_eq!(raw.to_byte_array().unwrap(), text.to_byte_array().unwrap());
        assert!(Value::from(true).to_byte_array().is_err());
        assert!(Value::from("not base64!").to_byte_array().is_err());
    }

    #[test]
    fn test_display_uses_wire_form() {
        let value = Value::map([("b", Value::from(1)), ("a", Value::Null)]);
        assert_eq!(value.to_string(), r#"{"a":null,"b":1}"#);
    }

    #[test]
    fn test_string_map_conversion() {
        let value = Value::map([("ID", "p1"), ("Name", "board")]);
        let attrs = value.to_string_map().unwrap();
        assert_eq!(attrs["ID"], "p1");
        assert!(Value::map([("Port", 1534)]).to_string_map().is_err());
    }
}
