//! Producer metadata records

use crate::message::Uid;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Attribute key: node (host) the producer is scheduled on
pub const HOST: &str = "host";
/// Attribute key: plugin image name and version, e.g. `simple:0.1.0`
pub const PLUGIN: &str = "plugin";
/// Attribute key: scheduler job the producer belongs to
pub const JOB: &str = "job";
/// Attribute key: scheduler task name
pub const TASK: &str = "task";

/// Authoritative metadata about one producer
///
/// One record per uid; a newer record for the same uid replaces the old one
/// wholesale (last-write-wins).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    /// Producer identifier this record describes
    pub uid: Uid,
    /// Attributes merged into every message from this producer
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl MetadataRecord {
    /// Create a record with no attributes
    pub fn new(uid: Uid) -> Self {
        Self {
            uid,
            attributes: BTreeMap::new(),
        }
    }

    /// Add an attribute
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Look up an attribute
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}
