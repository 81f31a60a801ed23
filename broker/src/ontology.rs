//! Ontology - the vocabulary of known topics and producers
//!
//! Used in two places:
//!
//! - the [`Validator`](crate::validate::Validator) in strict mode, to check
//!   that a topic exists and its value has the declared type
//! - the datagram serializer, to map topic names and plugin names onto the
//!   numeric ids of the upstream wire protocol
//!
//! The built-in tables cover the stock node sensors. A JSON file with the
//! same shape replaces them:
//!
//! ```json
//! {
//!   "topics": [
//!     {"topic": "env.temperature", "id": 16, "sub_id": 1, "unit": "C", "type": "float"}
//!   ],
//!   "plugins": [
//!     {"name": "simple", "id": 1}
//!   ]
//! }
//! ```

use crate::error::{BrokerError, Result};
use datashare_core::ValueKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Schema entry for one topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSpec {
    /// Topic name, e.g. `env.temperature`
    pub topic: String,
    /// Sensor id on the upstream protocol
    pub id: u16,
    /// Sensor sub-id on the upstream protocol
    #[serde(default)]
    pub sub_id: u8,
    /// Unit of measurement, informational
    #[serde(default)]
    pub unit: String,
    /// Expected value type
    #[serde(rename = "type")]
    pub kind: ValueKind,
}

/// Registered producer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginSpec {
    /// Plugin name without version, e.g. `simple`
    pub name: String,
    /// Plugin id on the upstream protocol
    pub id: u16,
}

/// Lookup interface over a topic/plugin vocabulary
///
/// Implement this to back validation and datagram encoding with something
/// other than the static tables (a registry service, a generated table).
pub trait Ontology: Send + Sync {
    /// Look up a topic by name
    fn topic(&self, name: &str) -> Option<&TopicSpec>;

    /// Look up a topic by its wire ids
    fn topic_by_id(&self, id: u16, sub_id: u8) -> Option<&TopicSpec>;

    /// Look up a plugin by name (no version)
    fn plugin(&self, name: &str) -> Option<&PluginSpec>;

    /// Look up a plugin by wire id
    fn plugin_by_id(&self, id: u16) -> Option<&PluginSpec>;
}

#[derive(Deserialize)]
struct OntologyFile {
    #[serde(default)]
    topics: Vec<TopicSpec>,
    #[serde(default)]
    plugins: Vec<PluginSpec>,
}

/// In-memory ontology built from tables
#[derive(Debug, Clone, Default)]
pub struct StaticOntology {
    topics: HashMap<String, TopicSpec>,
    topic_ids: HashMap<(u16, u8), String>,
    plugins: HashMap<String, PluginSpec>,
    plugin_ids: HashMap<u16, String>,
}

impl StaticOntology {
    /// Build from explicit tables. Later duplicates replace earlier ones.
    pub fn new(topics: Vec<TopicSpec>, plugins: Vec<PluginSpec>) -> Self {
        let mut ontology = Self::default();
        for topic in topics {
            ontology
                .topic_ids
                .insert((topic.id, topic.sub_id), topic.topic.clone());
            ontology.topics.insert(topic.topic.clone(), topic);
        }
        for plugin in plugins {
            ontology.plugin_ids.insert(plugin.id, plugin.name.clone());
            ontology.plugins.insert(plugin.name.clone(), plugin);
        }
        ontology
    }

    /// The stock node vocabulary
    pub fn builtin() -> Self {
        let topic = |name: &str, id: u16, sub_id: u8, unit: &str, kind: ValueKind| TopicSpec {
            topic: name.to_string(),
            id,
            sub_id,
            unit: unit.to_string(),
            kind,
        };
        let plugin = |name: &str, id: u16| PluginSpec {
            name: name.to_string(),
            id,
        };

        Self::new(
            vec![
                topic("raw.tmp112", 0x0001, 0, "", ValueKind::Str),
                topic("env.temperature.tmp112", 0x0001, 1, "C", ValueKind::Float),
                topic("raw.htu21d", 0x0002, 0, "", ValueKind::Str),
                topic("env.temperature.htu21d", 0x0002, 1, "C", ValueKind::Float),
                topic("env.humidity.htu21d", 0x0002, 2, "%RH", ValueKind::Float),
                topic("env.humidity.hih4030", 0x0003, 1, "%RH", ValueKind::Float),
                topic("env.temperature", 0x0010, 1, "C", ValueKind::Float),
                topic("env.humidity", 0x0010, 2, "%RH", ValueKind::Float),
                topic("env.pressure", 0x0010, 3, "Pa", ValueKind::Float),
                topic("env.count.car", 0x0020, 1, "", ValueKind::Int),
                topic("env.count.pedestrian", 0x0020, 2, "", ValueKind::Int),
                topic("upload", 0x0030, 0, "", ValueKind::Str),
            ],
            vec![plugin("simple", 1), plugin("carped", 2)],
        )
    }

    /// Parse the JSON table format
    pub fn from_json(json: &str) -> Result<Self> {
        let file: OntologyFile = serde_json::from_str(json)?;
        Ok(Self::new(file.topics, file.plugins))
    }

    /// Load the JSON table format from a file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json).map_err(|e| {
            BrokerError::Serialization(format!("ontology {}: {e}", path.display()))
        })
    }

    /// Number of known topics
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}

impl Ontology for StaticOntology {
    fn topic(&self, name: &str) -> Option<&TopicSpec> {
        self.topics.get(name)
    }

    fn topic_by_id(&self, id: u16, sub_id: u8) -> Option<&TopicSpec> {
        self.topic_ids
            .get(&(id, sub_id))
            .and_then(|name| self.topics.get(name))
    }

    fn plugin(&self, name: &str) -> Option<&PluginSpec> {
        self.plugins.get(name)
    }

    fn plugin_by_id(&self, id: u16) -> Option<&PluginSpec> {
        self.plugin_ids
            .get(&id)
            .and_then(|name| self.plugins.get(name))
    }
}

/// Semantic version of a plugin image
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    /// Major
    pub major: u16,
    /// Minor
    pub minor: u16,
    /// Patch
    pub patch: u16,
}

impl Version {
    /// Construct from parts
    pub const fn new(major: u16, minor: u16, patch: u16) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Error parsing a version or `name:version` reference
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid plugin version {0:?}")]
pub struct VersionError(pub String);

impl FromStr for Version {
    type Err = VersionError;

    /// Parse exactly `MAJOR.MINOR.PATCH`
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let err = || VersionError(s.to_string());
        let mut parts = s.split('.');
        let mut next = || -> std::result::Result<u16, VersionError> {
            parts.next().ok_or_else(err)?.parse().map_err(|_| err())
        };
        let version = Version::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(err());
        }
        Ok(version)
    }
}

/// Split `name:MAJOR.MINOR.PATCH` into its name and version
///
/// Both halves must be present; extra `:` separators are rejected.
pub fn parse_plugin_name_version(
    reference: &str,
) -> std::result::Result<(&str, Version), VersionError> {
    let err = || VersionError(reference.to_string());
    let (name, version) = reference.split_once(':').ok_or_else(err)?;
    if name.is_empty() || version.contains(':') {
        return Err(err());
    }
    let version = version.parse().map_err(|_| err())?;
    Ok((name, version))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version() {
        assert_eq!("0.0.0".parse::<Version>().unwrap(), Version::new(0, 0, 0));
        assert_eq!("1.2.3".parse::<Version>().unwrap(), Version::new(1, 2, 3));
        assert_eq!(
            "1.22.333".parse::<Version>().unwrap(),
            Version::new(1, 22, 333)
        );
        for bad in ["", "1", "1.2", "1.2.3.4", "1.x.3", "1.2.70000"] {
            assert!(bad.parse::<Version>().is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn test_parse_plugin_name_version() {
        assert_eq!(
            parse_plugin_name_version("simple:1.2.3").unwrap(),
            ("simple", Version::new(1, 2, 3))
        );
        assert_eq!(
            parse_plugin_name_version("test:0.0.0").unwrap(),
            ("test", Version::new(0, 0, 0))
        );
        for bad in ["test", "test:", ":1.2.3", "test:1.2.3:"] {
            assert!(
                parse_plugin_name_version(bad).is_err(),
                "{bad:?} should not parse"
            );
        }
    }

    #[test]
    fn test_version_display() {
        assert_eq!(Version::new(0, 2, 1).to_string(), "0.2.1");
    }

    #[test]
    fn test_builtin_lookups() {
        let ontology = StaticOntology::builtin();

        let topic = ontology.topic("env.temperature.htu21d").unwrap();
        assert_eq!((topic.id, topic.sub_id), (0x0002, 1));
        assert_eq!(topic.kind, ValueKind::Float);
        assert_eq!(
            ontology.topic_by_id(0x0002, 1).unwrap().topic,
            "env.temperature.htu21d"
        );

        assert_eq!(ontology.plugin("carped").unwrap().id, 2);
        assert_eq!(ontology.plugin_by_id(1).unwrap().name, "simple");
        assert!(ontology.topic("sys.made.up").is_none());
    }

    #[test]
    fn test_from_json() {
        let ontology = StaticOntology::from_json(
            r#"{
                "topics": [{"topic": "env.light", "id": 64, "type": "int"}],
                "plugins": [{"name": "lux", "id": 9}]
            }"#,
        )
        .unwrap();

        assert_eq!(ontology.topic_count(), 1);
        let topic = ontology.topic("env.light").unwrap();
        assert_eq!(topic.sub_id, 0);
        assert_eq!(topic.kind, ValueKind::Int);
        assert_eq!(ontology.plugin_by_id(9).unwrap().name, "lux");
    }

    #[test]
    fn test_from_json_rejects_bad_type() {
        let err = StaticOntology::from_json(
            r#"{"topics": [{"topic": "x", "id": 1, "type": "complex"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, BrokerError::Serialization(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = StaticOntology::load("/nonexistent/ontology.json").unwrap_err();
        assert!(matches!(err, BrokerError::Io(_)));
    }
}
