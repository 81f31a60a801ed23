//! Serializers - render enriched messages into sink wire forms
//!
//! Every enriched message is rendered at most twice, once per scope tag it
//! carries:
//!
//! ```text
//!                       ┌─► local encoder    ─► Publishing (routing key = topic, transient)
//!  EnrichedMessage ─────┤
//!   (upload rewrite)    └─► upstream encoder ─► Publishing (routing key = topic, persistent)
//! ```
//!
//! The two forms fail independently: a value the upstream protocol cannot
//! carry still reaches the local sink. Only the upload rewrite, which
//! changes the message itself, can fail both at once.

mod datagram;
mod local;

pub use datagram::{decode_datagram, DatagramEncoder, DecodedDatagram, DATAGRAM_PROTOCOL_VERSION};
pub use local::JsonEncoder;

use crate::config::{BrokerConfig, UpstreamFormat};
use crate::enrich::{EnrichedMessage, NODE};
use crate::ontology::{Ontology, VersionError};
use bytes::Bytes;
use datashare_core::record::{JOB, PLUGIN, TASK};
use datashare_core::{Publishing, ScopeTag, Value, ValueKind};
use std::sync::Arc;
use thiserror::Error;

/// Topic of producer file uploads
pub const UPLOAD_TOPIC: &str = "upload";

/// Base of the storage URL uploads are rewritten to
pub const UPLOAD_URL_BASE: &str = "https://storage.sagecontinuum.org/api/v1/data";

/// Why a message could not be rendered
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SerializeError {
    /// NaN or infinite float
    #[error("value for {topic:?} is not finite")]
    NonFinite {
        /// Topic
        topic: String,
    },

    /// An attribute needed by the encoder is missing
    #[error("message missing {0:?} attribute")]
    MissingAttribute(&'static str),

    /// Upstream protocol has no id for this topic
    #[error("topic {0:?} not in ontology")]
    UnknownTopic(String),

    /// Upstream protocol has no id for this plugin
    #[error("plugin {0:?} not in ontology")]
    UnknownPlugin(String),

    /// Plugin reference is not `name:MAJOR.MINOR.PATCH`
    #[error(transparent)]
    Version(#[from] VersionError),

    /// Value type does not match the upstream schema
    #[error("topic {topic:?} expects {expected} value, got {actual}")]
    ValueType {
        /// Topic
        topic: String,
        /// Declared kind
        expected: ValueKind,
        /// Actual kind
        actual: ValueKind,
    },

    /// Field or frame longer than its u32 length prefix allows
    #[error("{topic:?}: {len} bytes exceed the datagram length limit")]
    TooLarge {
        /// Topic
        topic: String,
        /// Offending length
        len: usize,
    },

    /// JSON encoding failed
    #[error("json encoding failed: {0}")]
    Json(String),

    /// Bytes are not a valid datagram
    #[error("malformed datagram: {0}")]
    Decode(String),
}

/// Renders an enriched message into one wire representation
pub trait Encoder: Send + Sync {
    /// Format name for logs, e.g. "json"
    fn name(&self) -> &'static str;

    /// Encode the message body
    fn encode(&self, msg: &EnrichedMessage) -> Result<Bytes, SerializeError>;
}

/// Per-sink rendering results
///
/// A form is `None` when the message's scope does not select that sink.
#[derive(Debug)]
pub struct Forms {
    /// For the local sink
    pub local: Option<Result<Publishing, SerializeError>>,
    /// For the upstream sink
    pub upstream: Option<Result<Publishing, SerializeError>>,
}

impl Forms {
    /// No form selected
    pub fn is_empty(&self) -> bool {
        self.local.is_none() && self.upstream.is_none()
    }
}

/// Local + upstream serializer pair
#[derive(Clone)]
pub struct Serializer {
    local: Arc<dyn Encoder>,
    upstream: Arc<dyn Encoder>,
    upload_publish_name: String,
}

impl Serializer {
    /// Create a serializer from explicit encoders
    pub fn new(
        local: Arc<dyn Encoder>,
        upstream: Arc<dyn Encoder>,
        upload_publish_name: impl Into<String>,
    ) -> Self {
        Self {
            local,
            upstream,
            upload_publish_name: upload_publish_name.into(),
        }
    }

    /// Build the serializer described by `config`
    pub fn from_config(config: &BrokerConfig, ontology: Arc<dyn Ontology>) -> Self {
        let upstream: Arc<dyn Encoder> = match config.upstream_format {
            UpstreamFormat::Json => Arc::new(JsonEncoder),
            UpstreamFormat::Datagram => Arc::new(DatagramEncoder::new(ontology)),
        };
        Self::new(
            Arc::new(JsonEncoder),
            upstream,
            config.upload_publish_name.clone(),
        )
    }

    /// Render the forms selected by the message's scope
    ///
    /// `Err` means the message as a whole could not be prepared (upload
    /// rewrite); per-form failures are reported inside [`Forms`].
    pub fn serialize(&self, msg: EnrichedMessage) -> Result<Forms, SerializeError> {
        let msg = self.rewrite_upload(msg)?;

        let render = |encoder: &dyn Encoder, persistent: bool| {
            encoder.encode(&msg).map(|body| Publishing {
                uid: msg.uid.clone(),
                routing_key: msg.topic.clone(),
                body,
                persistent,
            })
        };

        Ok(Forms {
            local: msg
                .scope
                .contains(ScopeTag::Node)
                .then(|| render(self.local.as_ref(), false)),
            upstream: msg
                .scope
                .contains(ScopeTag::Beehive)
                .then(|| render(self.upstream.as_ref(), true)),
        })
    }

    /// Replace an upload's local file reference with its storage URL
    fn rewrite_upload(&self, mut msg: EnrichedMessage) -> Result<EnrichedMessage, SerializeError> {
        if msg.topic != UPLOAD_TOPIC {
            return Ok(msg);
        }
        let url = upload_url(&msg)?;
        msg.topic = self.upload_publish_name.clone();
        msg.value = Value::Str(url);
        Ok(msg)
    }
}

/// Storage URL for an upload message
///
/// `{base}/{job}/sage-{task}-{version}/{node}/{ts}-{filename}`, where the
/// version is whatever follows the last `:` of the plugin reference.
pub fn upload_url(msg: &EnrichedMessage) -> Result<String, SerializeError> {
    let attr = |key: &'static str| msg.attr(key).ok_or(SerializeError::MissingAttribute(key));
    let job = attr(JOB)?;
    let task = attr(TASK)?;
    let node = attr(NODE)?;
    let filename = attr("filename")?;
    let plugin = attr(PLUGIN)?;
    let version = plugin.rsplit(':').next().unwrap_or(plugin);

    Ok(format!(
        "{UPLOAD_URL_BASE}/{job}/sage-{task}-{version}/{node}/{}-{filename}",
        msg.timestamp
    ))
}
