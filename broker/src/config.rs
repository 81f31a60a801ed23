//! Broker configuration
//!
//! Loaded from `DATASHARE_*` environment variables. Every setting has a
//! default, so an empty environment yields a working single-node broker.
//! Values are validated on load; a bad value is a [`BrokerError::Config`].

use crate::error::{BrokerError, Result};
use crate::sink::retry::BackoffConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human readable, for terminals
    Pretty,
    /// One JSON object per line, for log shippers
    Json,
}

impl FromStr for LogFormat {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(BrokerError::Config(format!("unknown log format {other:?}"))),
        }
    }
}

/// Wire format for the upstream (beehive) form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamFormat {
    /// Same compact JSON as the local form
    Json,
    /// Ontology-backed binary datagram
    Datagram,
}

impl FromStr for UpstreamFormat {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(UpstreamFormat::Json),
            "datagram" => Ok(UpstreamFormat::Datagram),
            other => Err(BrokerError::Config(format!(
                "unknown upstream format {other:?}"
            ))),
        }
    }
}

/// Identity of the node the broker runs on, attached to every message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    /// Node id, e.g. `0000000000000000`
    pub node: String,
    /// Human-facing node VSN, e.g. `W000`
    pub vsn: String,
}

impl Default for NodeIdentity {
    fn default() -> Self {
        Self {
            node: "0000000000000000".to_string(),
            vsn: "W000".to_string(),
        }
    }
}

/// Broker configuration
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Lifetime of a uid's state after its last touching event
    pub pod_state_expire_duration: Duration,
    /// Enforce ontology membership (topic known, value type matches)
    pub ontology_strict: bool,
    /// Optional JSON ontology file replacing the built-in tables
    pub ontology_path: Option<PathBuf>,
    /// Maximum pending messages per uid before oldest-drop
    pub backlog_capacity: usize,
    /// Number of correlator shards
    pub shards: usize,
    /// Inbound queue depth per shard
    pub shard_queue_capacity: usize,
    /// Outbound queue depth per sink; a publishing that finds it full is dropped
    pub sink_queue_capacity: usize,
    /// Retry policy at the sink boundary
    pub sink_retry: BackoffConfig,
    /// Identity attached on enrichment
    pub node: NodeIdentity,
    /// Topic uploads are republished under
    pub upload_publish_name: String,
    /// Upstream wire format
    pub upstream_format: UpstreamFormat,
    /// Metrics HTTP listen address
    pub metrics_addr: SocketAddr,
    /// Default tracing level (overridden by `RUST_LOG`)
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            pod_state_expire_duration: Duration::from_secs(120),
            ontology_strict: false,
            ontology_path: None,
            backlog_capacity: 1000,
            shards: default_shards(),
            shard_queue_capacity: 4096,
            sink_queue_capacity: 4096,
            sink_retry: BackoffConfig::default(),
            node: NodeIdentity::default(),
            upload_publish_name: "upload".to_string(),
            upstream_format: UpstreamFormat::Json,
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

fn default_shards() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl BrokerConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    ///
    /// Unset keys fall back to defaults; empty strings count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(v) = get("DATASHARE_POD_STATE_EXPIRE_SECS") {
            config.pod_state_expire_duration = Duration::from_secs(parse(&v, "DATASHARE_POD_STATE_EXPIRE_SECS")?);
        }
        if let Some(v) = get("DATASHARE_ONTOLOGY_STRICT") {
            config.ontology_strict = parse_bool(&v, "DATASHARE_ONTOLOGY_STRICT")?;
        }
        if let Some(v) = get("DATASHARE_ONTOLOGY_PATH") {
            config.ontology_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("DATASHARE_BACKLOG_CAPACITY") {
            config.backlog_capacity = parse(&v, "DATASHARE_BACKLOG_CAPACITY")?;
        }
        if let Some(v) = get("DATASHARE_SHARDS") {
            config.shards = parse(&v, "DATASHARE_SHARDS")?;
        }
        if let Some(v) = get("DATASHARE_SHARD_QUEUE") {
            config.shard_queue_capacity = parse(&v, "DATASHARE_SHARD_QUEUE")?;
        }
        if let Some(v) = get("DATASHARE_SINK_QUEUE") {
            config.sink_queue_capacity = parse(&v, "DATASHARE_SINK_QUEUE")?;
        }
        if let Some(v) = get("DATASHARE_SINK_MAX_ATTEMPTS") {
            config.sink_retry.max_attempts = parse(&v, "DATASHARE_SINK_MAX_ATTEMPTS")?;
        }
        if let Some(v) = get("DATASHARE_SINK_RETRY_INITIAL_MS") {
            config.sink_retry.initial_delay =
                Duration::from_millis(parse(&v, "DATASHARE_SINK_RETRY_INITIAL_MS")?);
        }
        if let Some(v) = get("DATASHARE_NODE_ID") {
            config.node.node = v;
        }
        if let Some(v) = get("DATASHARE_NODE_VSN") {
            config.node.vsn = v;
        }
        if let Some(v) = get("DATASHARE_UPLOAD_PUBLISH_NAME") {
            config.upload_publish_name = v;
        }
        if let Some(v) = get("DATASHARE_UPSTREAM_FORMAT") {
            config.upstream_format = v.parse()?;
        }
        if let Some(v) = get("DATASHARE_METRICS_ADDR") {
            config.metrics_addr = parse(&v, "DATASHARE_METRICS_ADDR")?;
        }
        if let Some(v) = get("DATASHARE_LOG_LEVEL") {
            config.log_level = v;
        }
        if let Some(v) = get("DATASHARE_LOG_FORMAT") {
            config.log_format = v.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field and range constraints
    pub fn validate(&self) -> Result<()> {
        if self.pod_state_expire_duration < Duration::from_secs(1) {
            return Err(BrokerError::Config(
                "pod_state_expire_duration must be at least 1 second".to_string(),
            ));
        }
        if self.backlog_capacity == 0 {
            return Err(BrokerError::Config(
                "backlog_capacity must be at least 1".to_string(),
            ));
        }
        if self.shards == 0 {
            return Err(BrokerError::Config("shards must be at least 1".to_string()));
        }
        if self.shard_queue_capacity == 0 || self.sink_queue_capacity == 0 {
            return Err(BrokerError::Config(
                "queue capacities must be at least 1".to_string(),
            ));
        }
        if self.upload_publish_name.is_empty() {
            return Err(BrokerError::Config(
                "upload_publish_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse<T: FromStr>(value: &str, key: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| BrokerError::Config(format!("{key}={value:?}: {e}")))
}

fn parse_bool(value: &str, key: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(BrokerError::Config(format!(
            "{key}={value:?}: expected true or false"
        ))),
    }
}
