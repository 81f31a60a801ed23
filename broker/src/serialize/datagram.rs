//! Binary datagram form for the upstream link
//!
//! Ontology-backed: topic and plugin names travel as numeric ids, so both
//! ends must share the same tables. All integers are big-endian.
//!
//! ```text
//! datagram
//!   u8   protocol version
//!   u16  plugin id
//!   u16  plugin major, u16 minor, u16 patch
//!   u32  body length
//!   body (sensorgram)
//!     i64  timestamp, whole seconds since the epoch
//!     u16  sensor id
//!     u8   sensor sub-id
//!     u8   value tag: 1 = i64, 2 = f64, 3 = u32 length + utf-8
//!     ..   value
//! ```
//!
//! Timestamps lose sub-second precision on the way through.

use super::{Encoder, SerializeError};
use crate::enrich::EnrichedMessage;
use crate::ontology::{parse_plugin_name_version, Ontology, Version};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use datashare_core::record::PLUGIN;
use datashare_core::{Value, ValueKind};
use std::sync::Arc;

/// Protocol version written in the first byte
pub const DATAGRAM_PROTOCOL_VERSION: u8 = 1;

const NANOS_PER_SEC: i64 = 1_000_000_000;
const HEADER_LEN: usize = 1 + 2 + 6 + 4;

const TAG_INT: u8 = 1;
const TAG_FLOAT: u8 = 2;
const TAG_STR: u8 = 3;

/// Datagram encoder
#[derive(Clone)]
pub struct DatagramEncoder {
    ontology: Arc<dyn Ontology>,
}

impl DatagramEncoder {
    /// Create an encoder resolving ids through `ontology`
    pub fn new(ontology: Arc<dyn Ontology>) -> Self {
        Self { ontology }
    }
}

impl Encoder for DatagramEncoder {
    fn name(&self) -> &'static str {
        "datagram"
    }

    fn encode(&self, msg: &EnrichedMessage) -> Result<Bytes, SerializeError> {
        let sensor = self
            .ontology
            .topic(&msg.topic)
            .ok_or_else(|| SerializeError::UnknownTopic(msg.topic.clone()))?;
        if !sensor.kind.accepts(msg.value.kind()) {
            return Err(SerializeError::ValueType {
                topic: msg.topic.clone(),
                expected: sensor.kind,
                actual: msg.value.kind(),
            });
        }

        let reference = msg
            .attr(PLUGIN)
            .ok_or(SerializeError::MissingAttribute(PLUGIN))?;
        let (name, version) = parse_plugin_name_version(reference)?;
        let plugin = self
            .ontology
            .plugin(name)
            .ok_or_else(|| SerializeError::UnknownPlugin(name.to_string()))?;

        let mut body = BytesMut::with_capacity(32);
        body.put_i64(msg.timestamp.div_euclid(NANOS_PER_SEC));
        body.put_u16(sensor.id);
        body.put_u8(sensor.sub_id);
        match (&msg.value, sensor.kind) {
            (Value::Int(i), ValueKind::Float) => put_float(&mut body, *i as f64, &msg.topic)?,
            (Value::Int(i), _) => {
                body.put_u8(TAG_INT);
                body.put_i64(*i);
            }
            (Value::Float(f), _) => put_float(&mut body, *f, &msg.topic)?,
            (Value::Str(s), _) => {
                let len = wire_len(s.len(), &msg.topic)?;
                body.put_u8(TAG_STR);
                body.put_u32(len);
                body.put_slice(s.as_bytes());
            }
        }

        let body_len = wire_len(body.len(), &msg.topic)?;
        let mut out = BytesMut::with_capacity(HEADER_LEN + body.len());
        out.put_u8(DATAGRAM_PROTOCOL_VERSION);
        out.put_u16(plugin.id);
        out.put_u16(version.major);
        out.put_u16(version.minor);
        out.put_u16(version.patch);
        out.put_u32(body_len);
        out.put(body);
        Ok(out.freeze())
    }
}

fn wire_len(len: usize, topic: &str) -> Result<u32, SerializeError> {
    u32::try_from(len).map_err(|_| SerializeError::TooLarge {
        topic: topic.to_string(),
        len,
    })
}

fn put_float(buf: &mut BytesMut, f: f64, topic: &str) -> Result<(), SerializeError> {
    if !f.is_finite() {
        return Err(SerializeError::NonFinite {
            topic: topic.to_string(),
        });
    }
    buf.put_u8(TAG_FLOAT);
    buf.put_f64(f);
    Ok(())
}

/// A datagram mapped back to names through the ontology
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedDatagram {
    /// Plugin reference, `name:MAJOR.MINOR.PATCH`
    pub plugin: String,
    /// Topic name
    pub topic: String,
    /// Nanoseconds since the epoch (whole seconds)
    pub timestamp: i64,
    /// Value
    pub value: Value,
}

/// Decode a datagram produced by [`DatagramEncoder`]
pub fn decode_datagram(
    mut data: &[u8],
    ontology: &dyn Ontology,
) -> Result<DecodedDatagram, SerializeError> {
    need(data, HEADER_LEN)?;
    let protocol = data.get_u8();
    if protocol != DATAGRAM_PROTOCOL_VERSION {
        return Err(SerializeError::Decode(format!(
            "unsupported protocol version {protocol}"
        )));
    }
    let plugin_id = data.get_u16();
    let version = Version::new(data.get_u16(), data.get_u16(), data.get_u16());
    let body_len = data.get_u32() as usize;
    need(data, body_len)?;
    if data.len() != body_len {
        return Err(SerializeError::Decode(format!(
            "{} trailing bytes",
            data.len() - body_len
        )));
    }

    need(data, 8 + 2 + 1 + 1)?;
    let seconds = data.get_i64();
    let sensor_id = data.get_u16();
    let sub_id = data.get_u8();
    let value = match data.get_u8() {
        TAG_INT => {
            need(data, 8)?;
            Value::Int(data.get_i64())
        }
        TAG_FLOAT => {
            need(data, 8)?;
            Value::Float(data.get_f64())
        }
        TAG_STR => {
            need(data, 4)?;
            let len = data.get_u32() as usize;
            need(data, len)?;
            let s = std::str::from_utf8(&data[..len])
                .map_err(|e| SerializeError::Decode(e.to_string()))?
                .to_string();
            data.advance(len);
            Value::Str(s)
        }
        tag => return Err(SerializeError::Decode(format!("unknown value tag {tag}"))),
    };
    if data.has_remaining() {
        return Err(SerializeError::Decode("trailing bytes in body".to_string()));
    }

    let sensor = ontology.topic_by_id(sensor_id, sub_id).ok_or_else(|| {
        SerializeError::Decode(format!("unknown sensor {sensor_id:#06x}/{sub_id}"))
    })?;
    let plugin = ontology
        .plugin_by_id(plugin_id)
        .ok_or_else(|| SerializeError::Decode(format!("unknown plugin id {plugin_id}")))?;
    let timestamp = seconds
        .checked_mul(NANOS_PER_SEC)
        .ok_or_else(|| SerializeError::Decode(format!("timestamp {seconds} out of range")))?;

    Ok(DecodedDatagram {
        plugin: format!("{}:{version}", plugin.name),
        topic: sensor.topic.clone(),
        timestamp,
        value,
    })
}

fn need(data: &[u8], n: usize) -> Result<(), SerializeError> {
    if data.len() < n {
        return Err(SerializeError::Decode(format!(
            "truncated: need {n} bytes, have {}",
            data.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ontology::StaticOntology;
    use datashare_core::{Scope, Uid};
    use std::collections::BTreeMap;

    fn ontology() -> Arc<StaticOntology> {
        Arc::new(StaticOntology::builtin())
    }

    fn msg(topic: &str, plugin: &str, ts: i64, value: Value) -> EnrichedMessage {
        let mut meta = BTreeMap::new();
        meta.insert(PLUGIN.to_string(), plugin.to_string());
        EnrichedMessage {
            uid: Uid::new("u1").unwrap(),
            timestamp: ts,
            topic: topic.to_string(),
            value,
            scope: Scope::BEEHIVE,
            meta,
        }
    }

    #[test]
    fn test_known_sensor_messages_survive_the_wire() {
        let ontology = ontology();
        let encoder = DatagramEncoder::new(ontology.clone());
        let cases = [
            ("env.temperature.tmp112", "simple:0.1.0", 1600973660233210000, Value::Float(31.2)),
            ("env.temperature.htu21d", "simple:0.2.0", 1600973661327352000, Value::Float(20.7)),
            ("env.humidity.hih4030", "simple:0.2.1", 1600973662457836000, Value::Float(0.1)),
            ("env.count.car", "carped:1.2.3", 1609765905843405828, Value::Int(1)),
            ("raw.tmp112", "simple:0.1.0", 0, Value::Str("AQIDBAUG".into())),
        ];

        for (topic, plugin, ts, value) in cases {
            let bytes = encoder.encode(&msg(topic, plugin, ts, value.clone())).unwrap();
            let out = decode_datagram(&bytes, ontology.as_ref()).unwrap();
            assert_eq!(out.topic, topic);
            assert_eq!(out.plugin, plugin);
            assert_eq!(out.value, value);
            assert_eq!(out.timestamp / NANOS_PER_SEC, ts / NANOS_PER_SEC);
        }
    }

    #[test]
    fn test_header_layout() {
        let encoder = DatagramEncoder::new(ontology());
        let bytes = encoder
            .encode(&msg("env.count.car", "carped:1.2.3", 5 * NANOS_PER_SEC, Value::Int(7)))
            .unwrap();

        assert_eq!(bytes[0], DATAGRAM_PROTOCOL_VERSION);
        assert_eq!(&bytes[1..3], &[0, 2]); // carped
        assert_eq!(&bytes[3..9], &[0, 1, 0, 2, 0, 3]);
        // i64 ts + u16 id + u8 sub + u8 tag + i64 value
        assert_eq!(&bytes[9..13], &[0, 0, 0, 20]);
        assert_eq!(bytes.len(), HEADER_LEN + 20);
    }

    #[test]
    fn test_int_widened_for_float_sensor() {
        let ontology = ontology();
        let bytes = DatagramEncoder::new(ontology.clone())
            .encode(&msg("env.temperature", "simple:0.1.0", 0, Value::Int(21)))
            .unwrap();
        let out = decode_datagram(&bytes, ontology.as_ref()).unwrap();
        assert_eq!(out.value, Value::Float(21.0));
    }

    #[test]
    fn test_encode_errors() {
        let encoder = DatagramEncoder::new(ontology());

        assert!(matches!(
            encoder.encode(&msg("experimental.x", "simple:0.1.0", 0, Value::Int(1))),
            Err(SerializeError::UnknownTopic(_))
        ));
        assert!(matches!(
            encoder.encode(&msg("env.count.car", "simple:0.1.0", 0, Value::Float(1.5))),
            Err(SerializeError::ValueType { .. })
        ));
        assert!(matches!(
            encoder.encode(&msg("env.count.car", "unregistered:0.1.0", 0, Value::Int(1))),
            Err(SerializeError::UnknownPlugin(_))
        ));
        assert!(matches!(
            encoder.encode(&msg("env.count.car", "carped", 0, Value::Int(1))),
            Err(SerializeError::Version(_))
        ));
        assert!(matches!(
            encoder.encode(&msg("env.temperature", "simple:0.1.0", 0, Value::Float(f64::NAN))),
            Err(SerializeError::NonFinite { .. })
        ));

        let mut no_plugin = msg("env.count.car", "carped:0.1.0", 0, Value::Int(1));
        no_plugin.meta.clear();
        assert_eq!(
            encoder.encode(&no_plugin),
            Err(SerializeError::MissingAttribute(PLUGIN))
        );
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_length_past_u32_refused() {
        let len = u32::MAX as usize + 1;
        assert_eq!(
            wire_len(len, "upload"),
            Err(SerializeError::TooLarge {
                topic: "upload".to_string(),
                len,
            })
        );
        assert_eq!(wire_len(13, "upload"), Ok(13));
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        let ontology = ontology();
        let good = DatagramEncoder::new(ontology.clone())
            .encode(&msg("env.count.car", "carped:0.1.0", 0, Value::Int(1)))
            .unwrap();

        assert!(decode_datagram(&good[..5], ontology.as_ref()).is_err());
        assert!(decode_datagram(&good[..good.len() - 1], ontology.as_ref()).is_err());

        let mut wrong_version = good.to_vec();
        wrong_version[0] = 9;
        assert!(decode_datagram(&wrong_version, ontology.as_ref()).is_err());

        let mut trailing = good.to_vec();
        trailing.push(0);
        assert!(decode_datagram(&trailing, ontology.as_ref()).is_err());
    }
}
