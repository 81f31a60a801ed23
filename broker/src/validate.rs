//! Validator - turns raw deliveries into typed messages
//!
//! A [`Delivery`] is what the transport hands over: the out-of-band uid,
//! the routing key the producer published with, and the JSON body. The
//! validator produces either a [`Message`] or a [`Rejection`]; there is no
//! third outcome and a rejected delivery never reaches the correlator.
//!
//! Checks, in order:
//!
//! 1. uid present and non-empty
//! 2. body is a JSON object with `name` (or `topic`), `ts` (or
//!    `timestamp`), `value`, optional `meta`, `scope` and `plugin`
//!    (or `producer`)
//! 3. field shapes: integer timestamp, scalar value, non-empty topic,
//!    scope within `{node, beehive}`
//! 4. strict mode only: topic known to the ontology, value type matches
//!
//! When the body has no `scope`, the routing key supplies it (`node`,
//! `beehive` or `all`).

use crate::ontology::Ontology;
use bytes::Bytes;
use datashare_core::{Message, Scope, ScopeTag, Uid, Value, ValueKind};
use serde::Deserialize;
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// A raw inbound message as delivered by the transport
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Producer uid attached by the transport (e.g. AMQP `app_id`)
    pub uid: Option<String>,
    /// Routing key the producer published with
    pub routing_key: Option<String>,
    /// JSON message body
    pub body: Bytes,
}

impl Delivery {
    /// Construct a delivery
    pub fn new(
        uid: Option<impl Into<String>>,
        routing_key: Option<impl Into<String>>,
        body: impl Into<Bytes>,
    ) -> Self {
        Self {
            uid: uid.map(Into::into),
            routing_key: routing_key.map(Into::into),
            body: body.into(),
        }
    }
}

/// Why a delivery was refused
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    /// No uid, or an empty one
    #[error("message missing producer uid")]
    MissingUid,

    /// Body is not a JSON object of the expected shape
    #[error("malformed body: {0}")]
    Malformed(String),

    /// A required field is absent
    #[error("missing field {0:?}")]
    MissingField(&'static str),

    /// A field has the wrong primitive type
    #[error("field {field:?} must be {expected}")]
    WrongType {
        /// Field name
        field: &'static str,
        /// Expected shape
        expected: &'static str,
    },

    /// Topic is the empty string
    #[error("topic must not be empty")]
    EmptyTopic,

    /// Scope outside `{node, beehive}` (or routing key outside `node|beehive|all`)
    #[error("invalid scope {0:?}")]
    InvalidScope(String),

    /// Strict mode: topic not in the ontology
    #[error("unknown topic {0:?}")]
    UnknownTopic(String),

    /// Strict mode: value type does not match the ontology
    #[error("topic {topic:?} expects {expected} value, got {actual}")]
    ValueType {
        /// Topic
        topic: String,
        /// Declared kind
        expected: ValueKind,
        /// Actual kind
        actual: ValueKind,
    },
}

impl Rejection {
    /// Short stable label, used for metrics and drop reports
    pub fn reason(&self) -> &'static str {
        match self {
            Rejection::MissingUid => "missing_uid",
            Rejection::Malformed(_) => "malformed",
            Rejection::MissingField(_) => "missing_field",
            Rejection::WrongType { .. } => "wrong_type",
            Rejection::EmptyTopic => "empty_topic",
            Rejection::InvalidScope(_) => "invalid_scope",
            Rejection::UnknownTopic(_) => "unknown_topic",
            Rejection::ValueType { .. } => "value_type",
        }
    }
}

#[derive(Deserialize)]
struct RawBody {
    #[serde(alias = "topic")]
    name: Option<Json>,
    #[serde(alias = "timestamp")]
    ts: Option<Json>,
    value: Option<Json>,
    meta: Option<Json>,
    scope: Option<Json>,
    #[serde(alias = "producer")]
    plugin: Option<Json>,
}

/// Stateless delivery validator
#[derive(Clone)]
pub struct Validator {
    ontology: Arc<dyn Ontology>,
    strict: bool,
}

impl Validator {
    /// Create a validator; `strict` enables ontology membership checks
    pub fn new(ontology: Arc<dyn Ontology>, strict: bool) -> Self {
        Self { ontology, strict }
    }

    /// Validate a delivery into a message
    pub fn validate(&self, delivery: &Delivery) -> Result<Message, Rejection> {
        let uid = delivery
            .uid
            .as_deref()
            .and_then(Uid::new)
            .ok_or(Rejection::MissingUid)?;

        let raw: RawBody = serde_json::from_slice(&delivery.body)
            .map_err(|e| Rejection::Malformed(e.to_string()))?;

        let topic = topic(raw.name)?;
        let timestamp = timestamp(raw.ts)?;
        let value = value(raw.value)?;
        let scope = match raw.scope {
            Some(json) => scope(json)?,
            None => match delivery.routing_key.as_deref() {
                Some(key) => Scope::from_routing_key(key)
                    .map_err(|e| Rejection::InvalidScope(e.0))?,
                None => return Err(Rejection::MissingField("scope")),
            },
        };
        let meta = meta(raw.meta)?;
        let producer = match raw.plugin {
            None | Some(Json::Null) => None,
            Some(Json::String(s)) => Some(s),
            Some(_) => {
                return Err(Rejection::WrongType {
                    field: "plugin",
                    expected: "a string",
                })
            }
        };

        if self.strict {
            let spec = self
                .ontology
                .topic(&topic)
                .ok_or_else(|| Rejection::UnknownTopic(topic.clone()))?;
            if !spec.kind.accepts(value.kind()) {
                return Err(Rejection::ValueType {
                    topic,
                    expected: spec.kind,
                    actual: value.kind(),
                });
            }
        }

        Ok(Message {
            uid,
            timestamp,
            topic,
            value,
            producer,
            scope,
            meta,
        })
    }
}

fn topic(json: Option<Json>) -> Result<String, Rejection> {
    match json {
        None | Some(Json::Null) => Err(Rejection::MissingField("name")),
        Some(Json::String(s)) if s.is_empty() => Err(Rejection::EmptyTopic),
        Some(Json::String(s)) => Ok(s),
        Some(_) => Err(Rejection::WrongType {
            field: "name",
            expected: "a string",
        }),
    }
}

fn timestamp(json: Option<Json>) -> Result<i64, Rejection> {
    let wrong = Rejection::WrongType {
        field: "ts",
        expected: "an integer",
    };
    match json {
        None | Some(Json::Null) => Err(Rejection::MissingField("ts")),
        Some(Json::Number(n)) => {
            if let Some(ts) = n.as_i64() {
                return Ok(ts);
            }
            // integral floats such as 1.6e18 are accepted
            match n.as_f64() {
                Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                    Ok(f as i64)
                }
                _ => Err(wrong),
            }
        }
        Some(_) => Err(wrong),
    }
}

fn value(json: Option<Json>) -> Result<Value, Rejection> {
    match json {
        None | Some(Json::Null) => Err(Rejection::MissingField("value")),
        Some(Json::Number(n)) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Ok(Value::Int(i)),
            (None, Some(f)) => Ok(Value::Float(f)),
            (None, None) => Err(Rejection::WrongType {
                field: "value",
                expected: "a scalar",
            }),
        },
        Some(Json::String(s)) => Ok(Value::Str(s)),
        Some(_) => Err(Rejection::WrongType {
            field: "value",
            expected: "a scalar",
        }),
    }
}

fn scope(json: Json) -> Result<Scope, Rejection> {
    let tag = |s: &str| {
        s.parse::<ScopeTag>()
            .map_err(|e| Rejection::InvalidScope(e.0))
    };
    match json {
        Json::String(s) => Scope::from_routing_key(&s).map_err(|e| Rejection::InvalidScope(e.0)),
        Json::Array(items) => items
            .iter()
            .map(|item| match item {
                Json::String(s) => tag(s),
                other => Err(Rejection::InvalidScope(other.to_string())),
            })
            .collect(),
        _ => Err(Rejection::WrongType {
            field: "scope",
            expected: "a string or list of strings",
        }),
    }
}

fn meta(json: Option<Json>) -> Result<BTreeMap<String, String>, Rejection> {
    let wrong = || Rejection::WrongType {
        field: "meta",
        expected: "an object of strings",
    };
    match json {
        None | Some(Json::Null) => Ok(BTreeMap::new()),
        Some(Json::Object(map)) => map
            .into_iter()
            .map(|(k, v)| match v {
                Json::String(s) => Ok((k, s)),
                _ => Err(wrong()),
            })
            .collect(),
        Some(_) => Err(wrong()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ontology::StaticOntology;

    fn validator(strict: bool) -> Validator {
        Validator::new(Arc::new(StaticOntology::builtin()), strict)
    }

    fn delivery(uid: Option<&str>, key: Option<&str>, body: &str) -> Delivery {
        Delivery::new(uid, key, body.to_string())
    }

    fn check(body: &str) -> Result<Message, Rejection> {
        validator(false).validate(&delivery(Some("u1"), Some("node"), body))
    }

    #[test]
    fn test_valid_message() {
        let msg = check(
            r#"{"name":"env.temperature","ts":1600973660233210000,"value":22.9,
                "meta":{"sensor":"bme680"},"plugin":"simple:0.1.0"}"#,
        )
        .unwrap();

        assert_eq!(msg.uid.as_str(), "u1");
        assert_eq!(msg.topic, "env.temperature");
        assert_eq!(msg.timestamp, 1600973660233210000);
        assert_eq!(msg.value, Value::Float(22.9));
        assert_eq!(msg.scope, Scope::NODE);
        assert_eq!(msg.producer.as_deref(), Some("simple:0.1.0"));
        assert_eq!(msg.meta.get("sensor").map(String::as_str), Some("bme680"));
    }

    #[test]
    fn test_field_aliases() {
        let msg = check(r#"{"topic":"env.count.car","timestamp":0,"value":3,"producer":"carped:0.1.0"}"#)
            .unwrap();
        assert_eq!(msg.topic, "env.count.car");
        assert_eq!(msg.value, Value::Int(3));
        assert_eq!(msg.producer.as_deref(), Some("carped:0.1.0"));
    }

    #[test]
    fn test_missing_uid_rejected() {
        let v = validator(false);
        let body = r#"{"name":"x","ts":0,"value":1}"#;
        assert_eq!(
            v.validate(&delivery(None, Some("node"), body)),
            Err(Rejection::MissingUid)
        );
        assert_eq!(
            v.validate(&delivery(Some(""), Some("node"), body)),
            Err(Rejection::MissingUid)
        );
    }

    #[test]
    fn test_malformed_body_rejected() {
        assert!(matches!(check("not json"), Err(Rejection::Malformed(_))));
        assert!(matches!(check("42"), Err(Rejection::Malformed(_))));
    }

    #[test]
    fn test_missing_fields_rejected() {
        assert_eq!(
            check(r#"{"ts":0,"value":1}"#),
            Err(Rejection::MissingField("name"))
        );
        assert_eq!(
            check(r#"{"name":"x","value":1}"#),
            Err(Rejection::MissingField("ts"))
        );
        assert_eq!(
            check(r#"{"name":"x","ts":0}"#),
            Err(Rejection::MissingField("value"))
        );
        assert_eq!(
            check(r#"{"name":"x","ts":0,"value":null}"#),
            Err(Rejection::MissingField("value"))
        );
    }

    #[test]
    fn test_wrong_shapes_rejected() {
        assert_eq!(check(r#"{"name":"","ts":0,"value":1}"#), Err(Rejection::EmptyTopic));
        assert_eq!(check(r#"{"name":"x","ts":"now","value":1}"#).unwrap_err().reason(), "wrong_type");
        assert_eq!(check(r#"{"name":"x","ts":1.5,"value":1}"#).unwrap_err().reason(), "wrong_type");
        assert_eq!(check(r#"{"name":7,"ts":0,"value":1}"#).unwrap_err().reason(), "wrong_type");
        assert_eq!(check(r#"{"name":"x","ts":0,"value":[1]}"#).unwrap_err().reason(), "wrong_type");
        assert_eq!(check(r#"{"name":"x","ts":0,"value":true}"#).unwrap_err().reason(), "wrong_type");
        assert_eq!(
            check(r#"{"name":"x","ts":0,"value":1,"meta":{"k":1}}"#).unwrap_err().reason(),
            "wrong_type"
        );
    }

    #[test]
    fn test_integral_float_timestamp_accepted() {
        let msg = check(r#"{"name":"x","ts":1.0e9,"value":1}"#).unwrap();
        assert_eq!(msg.timestamp, 1_000_000_000);
    }

    #[test]
    fn test_body_scope_overrides_routing_key() {
        let msg = check(r#"{"name":"x","ts":0,"value":1,"scope":["node","beehive"]}"#).unwrap();
        assert_eq!(msg.scope, Scope::ALL);

        let msg = check(r#"{"name":"x","ts":0,"value":1,"scope":[]}"#).unwrap();
        assert!(msg.scope.is_empty());

        let msg = check(r#"{"name":"x","ts":0,"value":1,"scope":"beehive"}"#).unwrap();
        assert_eq!(msg.scope, Scope::BEEHIVE);
    }

    #[test]
    fn test_routing_key_scope() {
        let v = validator(false);
        let body = r#"{"name":"x","ts":0,"value":1}"#;
        let msg = v.validate(&delivery(Some("u1"), Some("all"), body)).unwrap();
        assert_eq!(msg.scope, Scope::ALL);

        assert_eq!(
            v.validate(&delivery(Some("u1"), Some("elsewhere"), body)),
            Err(Rejection::InvalidScope("elsewhere".to_string()))
        );
        assert_eq!(
            v.validate(&delivery(Some("u1"), None, body)),
            Err(Rejection::MissingField("scope"))
        );
    }

    #[test]
    fn test_null_scope_treated_as_absent() {
        let v = validator(false);
        let body = r#"{"name":"x","ts":0,"value":1,"scope":null}"#;
        let msg = v.validate(&delivery(Some("u1"), Some("node"), body)).unwrap();
        assert_eq!(msg.scope, Scope::NODE);
        assert_eq!(
            v.validate(&delivery(Some("u1"), None, body)),
            Err(Rejection::MissingField("scope"))
        );
    }

    #[test]
    fn test_invalid_scope_member_rejected() {
        assert_eq!(
            check(r#"{"name":"x","ts":0,"value":1,"scope":["node","cloud"]}"#),
            Err(Rejection::InvalidScope("cloud".to_string()))
        );
    }

    #[test]
    fn test_lenient_mode_accepts_unknown_topics() {
        assert!(check(r#"{"name":"experimental.thing","ts":0,"value":"x"}"#).is_ok());
    }

    #[test]
    fn test_strict_mode_checks_ontology() {
        let v = validator(true);
        let d = |body: &str| delivery(Some("u1"), Some("node"), body);

        assert!(v.validate(&d(r#"{"name":"env.temperature","ts":0,"value":21.5}"#)).is_ok());
        // whole numbers satisfy float topics
        assert!(v.validate(&d(r#"{"name":"env.temperature","ts":0,"value":21}"#)).is_ok());

        assert_eq!(
            v.validate(&d(r#"{"name":"experimental.thing","ts":0,"value":1}"#)),
            Err(Rejection::UnknownTopic("experimental.thing".to_string()))
        );
        assert_eq!(
            v.validate(&d(r#"{"name":"env.count.car","ts":0,"value":"three"}"#)),
            Err(Rejection::ValueType {
                topic: "env.count.car".to_string(),
                expected: ValueKind::Int,
                actual: ValueKind::Str,
            })
        );
    }

    #[test]
    fn test_reason_labels() {
        assert_eq!(Rejection::MissingUid.reason(), "missing_uid");
        assert_eq!(Rejection::UnknownTopic("x".into()).reason(), "unknown_topic");
        assert_eq!(Rejection::InvalidScope("x".into()).reason(), "invalid_scope");
    }
}
