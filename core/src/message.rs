//! Validated message type for the datashare pipeline
//!
//! A [`Message`] only exists once a raw delivery has passed validation: it
//! always carries a non-empty [`Uid`], a nanosecond timestamp, a non-empty
//! topic, a scalar [`Value`] and a [`Scope`]. Everything downstream of the
//! validator can rely on those invariants without re-checking.
//!
//! # Cheap clones
//!
//! `Uid` wraps an `Arc<str>` so the same identifier can key the metadata
//! store, the backlog and the timer wheel without copying the string.

use crate::scope::Scope;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Producer identifier
///
/// Opaque, non-empty string identifying a running workload instance or a
/// system-service principal. The single correlation key for the broker.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uid(Arc<str>);

impl Uid {
    /// Create a uid, returning `None` for an empty or all-whitespace string
    pub fn new(s: impl AsRef<str>) -> Option<Self> {
        let s = s.as_ref();
        if s.trim().is_empty() {
            None
        } else {
            Some(Uid(Arc::from(s)))
        }
    }

    /// Borrow the identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uid({:?})", &*self.0)
    }
}

impl Borrow<str> for Uid {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl Serialize for Uid {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Uid {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Uid::new(&s).ok_or_else(|| serde::de::Error::custom("uid must not be empty"))
    }
}

/// Scalar measurement value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Integer value
    Int(i64),
    /// Floating point value (always finite)
    Float(f64),
    /// String value (also used for encoded blobs and upload URLs)
    Str(String),
}

impl Value {
    /// Kind of this value, for schema checks
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Str(_) => ValueKind::Str,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(v) => f.write_str(v),
        }
    }
}

/// Primitive type of a [`Value`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// Integer
    Int,
    /// Float
    Float,
    /// String
    Str,
}

impl ValueKind {
    /// Whether a value of kind `actual` satisfies a schema asking for `self`
    ///
    /// Integers are accepted where floats are expected; JSON producers
    /// routinely drop the fractional part of whole numbers.
    pub fn accepts(&self, actual: ValueKind) -> bool {
        *self == actual || (*self == ValueKind::Float && actual == ValueKind::Int)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Str => "str",
        })
    }
}

/// A validated inbound message
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Producer identifier attached out-of-band by the transport
    pub uid: Uid,
    /// Nanoseconds since the Unix epoch
    pub timestamp: i64,
    /// Topic (measurement name), e.g. `env.temperature`
    pub topic: String,
    /// Measurement value
    pub value: Value,
    /// Producer label as reported by the workload, if any
    pub producer: Option<String>,
    /// Destination set
    pub scope: Scope,
    /// Producer-supplied metadata (e.g. `filename` for uploads)
    pub meta: BTreeMap<String, String>,
}

impl Message {
    /// Create a message with empty metadata and no producer label
    pub fn new(
        uid: Uid,
        timestamp: i64,
        topic: impl Into<String>,
        value: Value,
        scope: Scope,
    ) -> Self {
        Self {
            uid,
            timestamp,
            topic: topic.into(),
            value,
            producer: None,
            scope,
            meta: BTreeMap::new(),
        }
    }

    /// Set the producer label
    pub fn with_producer(mut self, producer: impl Into<String>) -> Self {
        self.producer = Some(producer.into());
        self
    }

    /// Add a metadata entry
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }
}
