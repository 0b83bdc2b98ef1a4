//! Egress conversion of application types into [`Value`]
//!
//! Types that know their own wire shape implement [`Serializable`]. For
//! types the application cannot change, [`ObjectWriters`] keeps a strategy
//! table: an exact match keyed by `TypeId` is tried first, then capability
//! writers in registration order, each of which may decline the object.

use crate::encoder::{EncodeOptions, Encoder};
use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use bytes::Bytes;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use tracing::trace;

/// Application type with a known wire representation
pub trait Serializable {
    fn to_value(&self) -> Value;
}

impl Serializable for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }
}

type ExactWriter = Box<dyn Fn(&dyn Any) -> Option<Value> + Send + Sync>;
type CapabilityWriter = Box<dyn Fn(&dyn Any) -> Option<Value> + Send + Sync>;

/// Registry of writers for opaque application objects
#[derive(Default)]
pub struct ObjectWriters {
    exact: HashMap<TypeId, ExactWriter>,
    capabilities: Vec<(&'static str, CapabilityWriter)>,
}

impl ObjectWriters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writer used only for values whose concrete type is exactly `T`
    pub fn register<T, F>(&mut self, writer: F)
    where
        T: Any,
        F: Fn(&T) -> Value + Send + Sync + 'static,
    {
        self.exact.insert(
            TypeId::of::<T>(),
            Box::new(move |obj| obj.downcast_ref::<T>().map(&writer)),
        );
    }

    /// Exact writer delegating to the type's own [`Serializable`] impl
    pub fn register_serializable<T: Serializable + Any>(&mut self) {
        self.register::<T, _>(|obj: &T| obj.to_value());
    }

    /// Fallback writer consulted in order when no exact writer matches
    pub fn register_capability<F>(&mut self, name: &'static str, writer: F)
    where
        F: Fn(&dyn Any) -> Option<Value> + Send + Sync + 'static,
    {
        self.capabilities.push((name, Box::new(writer)));
    }

    pub fn len(&self) -> usize {
        self.exact.len() + self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_value(&self, obj: &dyn Any) -> CodecResult<Value> {
        if let Some(value) = obj.downcast_ref::<Value>() {
            return Ok(value.clone());
        }
        if let Some(value) = self.exact.get(&obj.type_id()).and_then(|w| w(obj)) {
            return Ok(value);
        }
        for (name, writer) in &self.capabilities {
            if let Some(value) = writer(obj) {
                trace!(writer = %name, "Object encoded by capability writer");
                return Ok(value);
            }
        }
        Err(CodecError::NoWriter {
            type_name: format!("{:?}", obj.type_id()),
        })
    }

    pub fn encode(&self, obj: &dyn Any, options: EncodeOptions) -> CodecResult<Bytes> {
        let value = self.to_value(obj)?;
        let mut encoder = Encoder::with_options(options);
        encoder.write_value(&value);
        Ok(encoder.to_bytes())
    }
}

impl std::fmt::Debug for ObjectWriters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectWriters")
            .field("exact", &self.exact.len())
            .field(
                "capabilities",
                &self.capabilities.iter().map(|(n, _)| *n).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Register {
        name: &'static str,
        value: u64,
    }

    struct Address(u64);

    impl Serializable for Address {
        fn to_value(&self) -> Value {
            Value::from(self.0)
        }
    }

    #[derive(Debug)]
    struct Unknown;

    #[test]
    fn test_exact_writer_wins_over_capability() {
        let mut writers = ObjectWriters::new();
        writers.register_capability("anything", |_| Some(Value::from("fallback")));
        writers.register::<Register, _>(|r| {
            Value::map([("Name", Value::from(r.name)), ("Value", Value::from(r.value))])
        });

        let reg = Register { name: "pc", value: 0x4000 };
        let value = writers.to_value(&reg).unwrap();
        assert_eq!(value.get("Name").unwrap().as_str(), Some("pc"));
        assert_eq!(writers.to_value(&Unknown).unwrap().as_str(), Some("fallback"));
    }

    #[test]
    fn test_capabilities_tried_in_order() {
        let mut writers = ObjectWriters::new();
        writers.register_capability("address", |obj| {
            obj.downcast_ref::<Address>().map(Serializable::to_value)
        });
        writers.register_capability("unit", |obj| {
            obj.downcast_ref::<Unknown>().map(|_| Value::Null)
        });

        assert_eq!(writers.to_value(&Address(16)).unwrap(), Value::from(16));
        assert_eq!(writers.to_value(&Unknown).unwrap(), Value::Null);
        assert!(matches!(writers.to_value(&42u8), Err(CodecError::NoWriter { .. })));
    }

    #[test]
    fn test_serializable_registration_encodes() {
        let mut writers = ObjectWriters::new();
        writers.register_serializable::<Address>();
        let bytes = writers.encode(&Address(255), EncodeOptions::default()).unwrap();
        assert_eq!(&bytes[..], b"255");
    }
}
