//! Input feeds
//!
//! A [`Source`] owns one inbound stream and pushes it into the broker through
//! a [`BrokerHandle`]. Two JSON-lines feeds ship with the broker, both over
//! any [`AsyncBufRead`]:
//!
//! - [`PodInfoFeed`]: metadata events. Each line is one of
//!   - a pod description (see [`PodInfo`]), normalized into a record
//!   - a plain record `{"uid": "...", "meta": {"k": "v"}}`
//!   - a tombstone `{"uid": "...", "deleted": true}`
//! - [`DeliveryFeed`]: message deliveries `{"uid", "routing_key", "body"}`.
//!   A string body is used verbatim; any other JSON body is re-encoded.
//!
//! Bad lines are logged and skipped. A feed ends at EOF or when the broker
//! stops accepting input.

use crate::engine::{Accepted, BrokerHandle};
use crate::error::{BrokerError, Result};
use crate::pod::{PodInfo, RecordError};
use crate::validate::Delivery;
use async_trait::async_trait;
use datashare_core::{MetadataRecord, Uid};
use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

/// Producer metadata lifecycle event
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataEvent {
    /// Create or replace the uid's record
    Upsert(MetadataRecord),
    /// Forget the uid now
    Tombstone(Uid),
}

impl MetadataEvent {
    /// Uid the event is about
    pub fn uid(&self) -> &Uid {
        match self {
            MetadataEvent::Upsert(record) => &record.uid,
            MetadataEvent::Tombstone(uid) => uid,
        }
    }
}

/// An inbound stream driven by the broker runner
#[async_trait]
pub trait Source: Send + 'static {
    /// Name for logs
    fn name(&self) -> &'static str;

    /// Feed the broker until the stream ends
    async fn run(self: Box<Self>, handle: BrokerHandle) -> Result<()>;
}

/// Why a feed line was skipped
#[derive(Debug, Error)]
pub enum LineError {
    /// Not JSON, or not one of the accepted shapes
    #[error("invalid line: {0}")]
    Json(#[from] serde_json::Error),
    /// Empty uid
    #[error("line has no uid")]
    MissingUid,
    /// Pod could not be normalized
    #[error(transparent)]
    Record(#[from] RecordError),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MetadataLine {
    Pod(PodInfo),
    Record {
        uid: String,
        meta: BTreeMap<String, String>,
    },
}

#[derive(Deserialize)]
struct TombstoneLine {
    uid: String,
}

/// Parse one metadata feed line
///
/// Any line with `"deleted": true` is a tombstone, so a watch can forward
/// delete events of full pod descriptions unchanged.
pub fn parse_metadata_line(line: &str) -> std::result::Result<MetadataEvent, LineError> {
    let json: serde_json::Value = serde_json::from_str(line)?;
    if json.get("deleted").and_then(serde_json::Value::as_bool) == Some(true) {
        let tombstone: TombstoneLine = serde_json::from_value(json)?;
        let uid = Uid::new(tombstone.uid).ok_or(LineError::MissingUid)?;
        return Ok(MetadataEvent::Tombstone(uid));
    }

    match serde_json::from_value::<MetadataLine>(json)? {
        MetadataLine::Pod(pod) => Ok(MetadataEvent::Upsert(pod.into_record()?)),
        MetadataLine::Record { uid, meta } => {
            let mut record = MetadataRecord::new(Uid::new(uid).ok_or(LineError::MissingUid)?);
            record.attributes = meta;
            Ok(MetadataEvent::Upsert(record))
        }
    }
}

#[derive(Deserialize)]
struct DeliveryLine {
    #[serde(default)]
    uid: Option<String>,
    #[serde(default)]
    routing_key: Option<String>,
    #[serde(default)]
    body: serde_json::Value,
}

/// Parse one delivery feed line
pub fn parse_delivery_line(line: &str) -> std::result::Result<Delivery, LineError> {
    let line: DeliveryLine = serde_json::from_str(line)?;
    let body = match line.body {
        serde_json::Value::String(text) => text.into_bytes(),
        other => serde_json::to_vec(&other)?,
    };
    Ok(Delivery::new(line.uid, line.routing_key, body))
}

/// JSON-lines metadata feed
pub struct PodInfoFeed<R> {
    reader: R,
}

impl<R> PodInfoFeed<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    /// Create a feed over `reader`
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

#[async_trait]
impl<R> Source for PodInfoFeed<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    fn name(&self) -> &'static str {
        "pod-info"
    }

    async fn run(self: Box<Self>, handle: BrokerHandle) -> Result<()> {
        let name = self.name();
        let mut lines = self.reader.lines();
        let mut events = 0u64;

        while let Some(line) = lines.next_line().await.map_err(|e| source_error(name, e))? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match parse_metadata_line(line) {
                Ok(event) => {
                    handle.submit_metadata(event).await?;
                    events += 1;
                }
                Err(LineError::Record(RecordError::Unscheduled(pod))) => {
                    debug!(source = name, pod = %pod, "pod not scheduled yet, skipped");
                }
                Err(e) => warn!(source = name, error = %e, "skipped metadata line"),
            }
        }

        info!(source = name, events, "metadata feed finished");
        Ok(())
    }
}

/// JSON-lines delivery feed
pub struct DeliveryFeed<R> {
    reader: R,
}

impl<R> DeliveryFeed<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    /// Create a feed over `reader`
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

#[async_trait]
impl<R> Source for DeliveryFeed<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    fn name(&self) -> &'static str {
        "deliveries"
    }

    async fn run(self: Box<Self>, handle: BrokerHandle) -> Result<()> {
        let name = self.name();
        let mut lines = self.reader.lines();
        let (mut queued, mut rejected) = (0u64, 0u64);

        while let Some(line) = lines.next_line().await.map_err(|e| source_error(name, e))? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match parse_delivery_line(line) {
                Ok(delivery) => match handle.submit(delivery).await? {
                    Accepted::Queued => queued += 1,
                    Accepted::Rejected(_) => rejected += 1,
                },
                Err(e) => warn!(source = name, error = %e, "skipped delivery line"),
            }
        }

        info!(source = name, queued, rejected, "delivery feed finished");
        Ok(())
    }
}

fn source_error(name: &str, err: std::io::Error) -> BrokerError {
    BrokerError::Source {
        source_name: name.to_string(),
        message: err.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use datashare_core::record::{HOST, PLUGIN};

    #[test]
    fn test_pod_line_becomes_upsert() {
        let event = parse_metadata_line(
            r#"{"uid":"u1","name":"simple-x","image":"waggle/simple:0.1.0","host":"rpi",
                "labels":{"sagecontinuum.org/plugin-task":"simple"}}"#,
        )
        .unwrap();
        let MetadataEvent::Upsert(record) = event else {
            panic!("expected upsert");
        };
        assert_eq!(record.uid.as_str(), "u1");
        assert_eq!(record.get(HOST), Some("rpi"));
        assert_eq!(record.get(PLUGIN), Some("simple:0.1.0"));
    }

    #[test]
    fn test_plain_record_line() {
        let event = parse_metadata_line(r#"{"uid":"u1","meta":{"name":"simple"}}"#).unwrap();
        let MetadataEvent::Upsert(record) = event else {
            panic!("expected upsert");
        };
        assert_eq!(record.get("name"), Some("simple"));
    }

    #[test]
    fn test_tombstone_line() {
        let event = parse_metadata_line(r#"{"uid":"u1","deleted":true}"#).unwrap();
        assert_eq!(event, MetadataEvent::Tombstone(Uid::new("u1").unwrap()));
        assert_eq!(event.uid().as_str(), "u1");

        assert!(matches!(
            parse_metadata_line(r#"{"uid":"u1","deleted":false}"#),
            Err(LineError::Json(_))
        ));
    }

    #[test]
    fn test_deleted_pod_is_tombstone() {
        let event = parse_metadata_line(
            r#"{"uid":"u1","image":"simple:0.1.0","host":"rpi","deleted":true}"#,
        )
        .unwrap();
        assert!(matches!(event, MetadataEvent::Tombstone(_)));
    }

    #[test]
    fn test_unscheduled_pod_line() {
        let result = parse_metadata_line(
            r#"{"uid":"u1","image":"simple:0.1.0","labels":{"sagecontinuum.org/plugin-task":"t"}}"#,
        );
        assert!(matches!(
            result,
            Err(LineError::Record(RecordError::Unscheduled(_)))
        ));
    }

    #[test]
    fn test_bad_metadata_lines() {
        assert!(matches!(parse_metadata_line("not json"), Err(LineError::Json(_))));
        assert!(matches!(
            parse_metadata_line(r#"{"uid":"","meta":{}}"#),
            Err(LineError::MissingUid)
        ));
    }

    #[test]
    fn test_delivery_line_string_body() {
        let delivery = parse_delivery_line(
            r#"{"uid":"u1","routing_key":"node","body":"{\"name\":\"t\",\"ts\":1,\"value\":1}"}"#,
        )
        .unwrap();
        assert_eq!(delivery.uid.as_deref(), Some("u1"));
        assert_eq!(delivery.routing_key.as_deref(), Some("node"));
        assert_eq!(&delivery.body[..], br#"{"name":"t","ts":1,"value":1}"#);
    }

    #[test]
    fn test_delivery_line_object_body() {
        let delivery = parse_delivery_line(r#"{"body":{"name":"t","ts":1,"value":1}}"#).unwrap();
        assert_eq!(delivery.uid, None);
        let body: serde_json::Value = serde_json::from_slice(&delivery.body).unwrap();
        assert_eq!(body["name"], "t");
    }
}
