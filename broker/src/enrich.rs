//! Enricher - merges a message with its producer's metadata record
//!
//! Attributes are layered, later layers winning:
//!
//! 1. the message's own `meta`
//! 2. the producer label the workload reported, as `plugin`
//! 3. the metadata record (authoritative: host, plugin, job, task, ...)
//! 4. the node identity (`node`, `vsn`)
//!
//! A workload can therefore add free-form tags but never spoof the
//! scheduler's view of who it is or where it runs.

use crate::config::NodeIdentity;
use datashare_core::record::PLUGIN;
use datashare_core::{Message, MetadataRecord, Scope, Uid, Value};
use std::collections::BTreeMap;

/// Attribute key: node id
pub const NODE: &str = "node";
/// Attribute key: node VSN
pub const VSN: &str = "vsn";

/// A message with its producer's metadata merged in
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedMessage {
    /// Producer uid
    pub uid: Uid,
    /// Nanoseconds since the Unix epoch
    pub timestamp: i64,
    /// Topic
    pub topic: String,
    /// Value
    pub value: Value,
    /// Destination set
    pub scope: Scope,
    /// Merged attributes
    pub meta: BTreeMap<String, String>,
}

impl EnrichedMessage {
    /// Look up a merged attribute
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.meta.get(key).map(String::as_str)
    }
}

/// Pure message + record merge
#[derive(Debug, Clone, Default)]
pub struct Enricher {
    node: NodeIdentity,
}

impl Enricher {
    /// Create an enricher attaching the given node identity
    pub fn new(node: NodeIdentity) -> Self {
        Self { node }
    }

    /// Merge `record` into `message`
    pub fn enrich(&self, message: Message, record: &MetadataRecord) -> EnrichedMessage {
        let Message {
            uid,
            timestamp,
            topic,
            value,
            producer,
            scope,
            mut meta,
        } = message;

        if let Some(producer) = producer {
            meta.insert(PLUGIN.to_string(), producer);
        }
        meta.extend(
            record
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        meta.insert(NODE.to_string(), self.node.node.clone());
        meta.insert(VSN.to_string(), self.node.vsn.clone());

        EnrichedMessage {
            uid,
            timestamp,
            topic,
            value,
            scope,
            meta,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use datashare_core::record::{HOST, JOB, TASK};

    fn uid() -> Uid {
        Uid::new("u1").unwrap()
    }

    fn enricher() -> Enricher {
        Enricher::new(NodeIdentity {
            node: "000048b02d15bc7c".to_string(),
            vsn: "W07B".to_string(),
        })
    }

    #[test]
    fn test_record_attributes_attached() {
        let msg = Message::new(uid(), 10, "env.temperature", Value::Float(22.9), Scope::NODE);
        let record = MetadataRecord::new(uid())
            .with(HOST, "rpi-1")
            .with(PLUGIN, "simple:0.1.0")
            .with(JOB, "sage")
            .with(TASK, "temp");

        let out = enricher().enrich(msg, &record);
        assert_eq!(out.attr(HOST), Some("rpi-1"));
        assert_eq!(out.attr(PLUGIN), Some("simple:0.1.0"));
        assert_eq!(out.attr(JOB), Some("sage"));
        assert_eq!(out.attr(TASK), Some("temp"));
        assert_eq!(out.attr(NODE), Some("000048b02d15bc7c"));
        assert_eq!(out.attr(VSN), Some("W07B"));
        assert_eq!(out.timestamp, 10);
        assert_eq!(out.scope, Scope::NODE);
    }

    #[test]
    fn test_record_wins_over_message_meta() {
        let msg = Message::new(uid(), 0, "t", Value::Int(1), Scope::NODE)
            .with_producer("spoofed:9.9.9")
            .with_meta(HOST, "spoofed-host")
            .with_meta("camera", "bottom");
        let record = MetadataRecord::new(uid())
            .with(HOST, "rpi-1")
            .with(PLUGIN, "simple:0.1.0");

        let out = enricher().enrich(msg, &record);
        assert_eq!(out.attr(HOST), Some("rpi-1"));
        assert_eq!(out.attr(PLUGIN), Some("simple:0.1.0"));
        assert_eq!(out.attr("camera"), Some("bottom"));
    }

    #[test]
    fn test_producer_label_used_when_record_has_no_plugin() {
        let msg = Message::new(uid(), 0, "t", Value::Int(1), Scope::NODE).with_producer("simple:0.1.0");
        let record = MetadataRecord::new(uid()).with("name", "simple");

        let out = enricher().enrich(msg, &record);
        assert_eq!(out.attr(PLUGIN), Some("simple:0.1.0"));
        assert_eq!(out.attr("name"), Some("simple"));
    }

    #[test]
    fn test_node_identity_cannot_be_overridden() {
        let msg = Message::new(uid(), 0, "t", Value::Int(1), Scope::NODE).with_meta(NODE, "other");
        let record = MetadataRecord::new(uid()).with(VSN, "W999");

        let out = enricher().enrich(msg, &record);
        assert_eq!(out.attr(NODE), Some("000048b02d15bc7c"));
        assert_eq!(out.attr(VSN), Some("W07B"));
    }
}
