//! Collection-type registry
//!
//! A collection's `type` field is a `{type, inner}` pair. The discriminator
//! picks the payload shape for `inner`; the registry maps discriminators to
//! decoders. Registration is an explicit bootstrap step (see
//! [`default_registry`](crate::default_registry)), never a side effect of
//! linking a game module.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};

/// Per-game payload carried inside a collection.
pub trait CollectionType: Debug + Send + Sync + 'static {
    /// Discriminator this payload serializes under.
    fn type_name(&self) -> &'static str;

    fn to_value(&self) -> serde_json::Result<serde_json::Value>;

    fn clone_box(&self) -> Box<dyn CollectionType>;

    fn as_any(&self) -> &dyn Any;
}

/// Plain serde struct usable as a [`CollectionType`].
pub trait TypedPayload: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static {
    const TYPE: &'static str;
}

impl<T: TypedPayload> CollectionType for T {
    fn type_name(&self) -> &'static str {
        T::TYPE
    }

    fn to_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }

    fn clone_box(&self) -> Box<dyn CollectionType> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Discriminator plus payload, serialized as `{"type": ..., "inner": {...}}`.
#[derive(Debug)]
pub struct CollectionTypeWrapper {
    pub type_name: String,
    pub inner: Box<dyn CollectionType>,
}

impl CollectionTypeWrapper {
    /// Wrap `inner` under its own discriminator.
    pub fn new<T: CollectionType>(inner: T) -> Self {
        Self {
            type_name: inner.type_name().to_string(),
            inner: Box::new(inner),
        }
    }

    /// Payload as `T`, if that is its concrete type.
    pub fn downcast_ref<T: CollectionType>(&self) -> Option<&T> {
        self.inner.as_any().downcast_ref::<T>()
    }
}

impl Clone for CollectionTypeWrapper {
    fn clone(&self) -> Self {
        Self {
            type_name: self.type_name.clone(),
            inner: self.inner.clone_box(),
        }
    }
}

impl Serialize for CollectionTypeWrapper {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        let inner = self.inner.to_value().map_err(serde::ser::Error::custom)?;
        let mut s = serializer.serialize_struct("CollectionTypeWrapper", 2)?;
        s.serialize_field("type", &self.type_name)?;
        s.serialize_field("inner", &inner)?;
        s.end()
    }
}

#[derive(Debug)]
pub enum RegistryError {
    Duplicate(String),
    Unknown(String),
    Decode {
        type_name: String,
        source: serde_json::Error,
    },
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Duplicate(name) => write!(f, "collection type {name:?} registered twice"),
            Self::Unknown(name) => write!(f, "unknown collection type {name:?}"),
            Self::Decode { type_name, source } => {
                write!(f, "failed to parse {type_name} payload: {source}")
            }
        }
    }
}

impl std::error::Error for RegistryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Decode { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Builds a payload from its JSON form.
pub type Decoder = fn(serde_json::Value) -> serde_json::Result<Box<dyn CollectionType>>;

fn decode_as<T: TypedPayload>(value: serde_json::Value) -> serde_json::Result<Box<dyn CollectionType>> {
    Ok(Box::new(serde_json::from_value::<T>(value)?))
}

/// Discriminator → decoder table.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    decoders: BTreeMap<String, Decoder>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` under `T::TYPE`. Fails if the name is taken.
    pub fn register<T: TypedPayload>(&mut self) -> Result<(), RegistryError> {
        self.register_decoder(T::TYPE, decode_as::<T>)
    }

    pub fn register_decoder(&mut self, name: &str, decoder: Decoder) -> Result<(), RegistryError> {
        if self.decoders.contains_key(name) {
            return Err(RegistryError::Duplicate(name.to_string()));
        }
        self.decoders.insert(name.to_string(), decoder);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.decoders.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.decoders.keys().map(String::as_str)
    }

    /// Decode a `{type, inner}` pair into a wrapper.
    pub fn decode(
        &self,
        type_name: &str,
        inner: serde_json::Value,
    ) -> Result<CollectionTypeWrapper, RegistryError> {
        let decoder = self
            .decoders
            .get(type_name)
            .ok_or_else(|| RegistryError::Unknown(type_name.to_string()))?;
        let inner = decoder(inner).map_err(|source| RegistryError::Decode {
            type_name: type_name.to_string(),
            source,
        })?;
        Ok(CollectionTypeWrapper {
            type_name: type_name.to_string(),
            inner,
        })
    }
}
