//! Compact JSON form
//!
//! `{"name": topic, "ts": nanos, "value": scalar, "meta": {..}}`, the shape
//! on-node consumers subscribe to.

use super::{Encoder, SerializeError};
use crate::enrich::EnrichedMessage;
use bytes::Bytes;
use datashare_core::Value;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Serialize)]
struct Wire<'a> {
    name: &'a str,
    ts: i64,
    value: &'a Value,
    meta: &'a BTreeMap<String, String>,
}

/// JSON encoder for the local form (and the `json` upstream format)
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoder;

impl Encoder for JsonEncoder {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, msg: &EnrichedMessage) -> Result<Bytes, SerializeError> {
        // serde_json would silently write NaN as null
        if let Value::Float(f) = msg.value {
            if !f.is_finite() {
                return Err(SerializeError::NonFinite {
                    topic: msg.topic.clone(),
                });
            }
        }

        let wire = Wire {
            name: &msg.topic,
            ts: msg.timestamp,
            value: &msg.value,
            meta: &msg.meta,
        };
        serde_json::to_vec(&wire)
            .map(Bytes::from)
            .map_err(|e| SerializeError::Json(e.to_string()))
    }
}
