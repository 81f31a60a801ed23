//! Prometheus metrics for the datashare broker

use crate::error::{BrokerError, Result};
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_gauge_vec,
    register_histogram_vec, Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramVec,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global metrics instance
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Held while registering
static INIT_LOCK: parking_lot::Mutex<()> = parking_lot::const_mutex(());

/// All broker metrics
pub struct Metrics {
    // ─────────────────────────────────────────────────────────────────────────
    // Message counters
    // ─────────────────────────────────────────────────────────────────────────
    /// Deliveries received (before validation)
    pub messages_received: Counter,

    /// Messages published (by sink)
    pub messages_published: CounterVec,

    /// Messages dropped (by reason)
    pub messages_dropped: CounterVec,

    // ─────────────────────────────────────────────────────────────────────────
    // Correlation state
    // ─────────────────────────────────────────────────────────────────────────
    /// Backlog flushes triggered by metadata arrival
    pub backlog_flushes: Counter,

    /// Messages released from backlogs
    pub backlog_flushed_messages: Counter,

    /// Uid state expirations
    pub expirations: Counter,

    /// Current backlog depth (by shard)
    pub backlog_depth: GaugeVec,

    /// Live metadata records (by shard)
    pub metadata_records: GaugeVec,

    // ─────────────────────────────────────────────────────────────────────────
    // Sinks
    // ─────────────────────────────────────────────────────────────────────────
    /// Publish latency in seconds, including retries (by sink)
    pub publish_duration_seconds: HistogramVec,

    /// Publish retries (by sink)
    pub publish_retries: CounterVec,

    /// Per-sink health (1 = healthy, 0 = unhealthy)
    pub sink_health: GaugeVec,

    /// Current sink queue occupancy (by sink)
    pub sink_queue_depth: GaugeVec,

    /// Broker up (1 while the runner is active)
    pub up: Gauge,
}

impl Metrics {
    /// Initialize metrics (call once at startup)
    ///
    /// Returns error if metric registration fails.
    pub fn init() -> Result<&'static Metrics> {
        if let Some(metrics) = METRICS.get() {
            return Ok(metrics);
        }
        let _guard = INIT_LOCK.lock();
        if let Some(metrics) = METRICS.get() {
            return Ok(metrics);
        }

        let metrics = Metrics {
            messages_received: register_counter!(
                "datashare_messages_received_total",
                "Total deliveries received"
            )
            .map_err(|e| BrokerError::Metrics(format!("messages_received: {e}")))?,

            messages_published: register_counter_vec!(
                "datashare_messages_published_total",
                "Total messages accepted by a sink",
                &["sink"]
            )
            .map_err(|e| BrokerError::Metrics(format!("messages_published: {e}")))?,

            messages_dropped: register_counter_vec!(
                "datashare_messages_dropped_total",
                "Total messages dropped",
                &["reason"]
            )
            .map_err(|e| BrokerError::Metrics(format!("messages_dropped: {e}")))?,

            backlog_flushes: register_counter!(
                "datashare_backlog_flushes_total",
                "Backlogs flushed on metadata arrival"
            )
            .map_err(|e| BrokerError::Metrics(format!("backlog_flushes: {e}")))?,

            backlog_flushed_messages: register_counter!(
                "datashare_backlog_flushed_messages_total",
                "Messages released from backlogs"
            )
            .map_err(|e| BrokerError::Metrics(format!("backlog_flushed_messages: {e}")))?,

            expirations: register_counter!(
                "datashare_expirations_total",
                "Uid states expired"
            )
            .map_err(|e| BrokerError::Metrics(format!("expirations: {e}")))?,

            backlog_depth: register_gauge_vec!(
                "datashare_backlog_depth",
                "Messages waiting for metadata",
                &["shard"]
            )
            .map_err(|e| BrokerError::Metrics(format!("backlog_depth: {e}")))?,

            metadata_records: register_gauge_vec!(
                "datashare_metadata_records",
                "Live metadata records",
                &["shard"]
            )
            .map_err(|e| BrokerError::Metrics(format!("metadata_records: {e}")))?,

            publish_duration_seconds: register_histogram_vec!(
                "datashare_publish_duration_seconds",
                "Time to publish one message, retries included",
                &["sink"],
                // Buckets: 100us to 30s
                vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]
            )
            .map_err(|e| BrokerError::Metrics(format!("publish_duration_seconds: {e}")))?,

            publish_retries: register_counter_vec!(
                "datashare_publish_retries_total",
                "Publish attempts after a failure",
                &["sink"]
            )
            .map_err(|e| BrokerError::Metrics(format!("publish_retries: {e}")))?,

            sink_health: register_gauge_vec!(
                "datashare_sink_health",
                "Sink health (1 = healthy, 0 = unhealthy)",
                &["sink"]
            )
            .map_err(|e| BrokerError::Metrics(format!("sink_health: {e}")))?,

            sink_queue_depth: register_gauge_vec!(
                "datashare_sink_queue_depth",
                "Messages queued for a sink",
                &["sink"]
            )
            .map_err(|e| BrokerError::Metrics(format!("sink_queue_depth: {e}")))?,

            up: register_gauge!("datashare_up", "Broker is running")
                .map_err(|e| BrokerError::Metrics(format!("up: {e}")))?,
        };

        // Set the metrics (only succeeds once)
        let _ = METRICS.set(metrics);

        METRICS
            .get()
            .ok_or_else(|| BrokerError::Metrics("Failed to initialize metrics".to_string()))
    }

    /// Get the global metrics instance
    ///
    /// Returns None if metrics haven't been initialized yet.
    pub fn get() -> Option<&'static Metrics> {
        METRICS.get()
    }

    /// Record a delivery received
    pub fn record_received(&self) {
        self.messages_received.inc();
    }

    /// Record a message published to a sink
    pub fn record_published(&self, sink: &str, duration: std::time::Duration) {
        self.messages_published.with_label_values(&[sink]).inc();
        self.publish_duration_seconds
            .with_label_values(&[sink])
            .observe(duration.as_secs_f64());
    }

    /// Record messages dropped
    pub fn record_dropped(&self, reason: &str, count: u64) {
        self.messages_dropped
            .with_label_values(&[reason])
            .inc_by(count as f64);
    }

    /// Record a backlog flush of `count` messages
    pub fn record_flush(&self, count: usize) {
        self.backlog_flushes.inc();
        self.backlog_flushed_messages.inc_by(count as f64);
    }

    /// Record a uid expiration
    pub fn record_expiration(&self) {
        self.expirations.inc();
    }

    /// Update a shard's state gauges
    pub fn set_shard_state(&self, shard: usize, backlog: usize, records: usize) {
        let shard = shard.to_string();
        self.backlog_depth
            .with_label_values(&[&shard])
            .set(backlog as f64);
        self.metadata_records
            .with_label_values(&[&shard])
            .set(records as f64);
    }

    /// Record a publish retry
    pub fn record_retry(&self, sink: &str) {
        self.publish_retries.with_label_values(&[sink]).inc();
    }

    /// Set sink health status
    pub fn set_sink_health(&self, sink: &str, healthy: bool) {
        self.sink_health
            .with_label_values(&[sink])
            .set(if healthy { 1.0 } else { 0.0 });
    }

    /// Update a sink's queue occupancy
    pub fn set_sink_queue_depth(&self, sink: &str, depth: usize) {
        self.sink_queue_depth
            .with_label_values(&[sink])
            .set(depth as f64);
    }

    /// Count healthy and unhealthy sinks from the sink_health GaugeVec
    ///
    /// Returns (healthy_count, unhealthy_count).
    pub fn sink_health_counts(&self) -> (usize, usize) {
        use prometheus::core::Collector;

        let mut healthy = 0usize;
        let mut unhealthy = 0usize;
        for family in &self.sink_health.collect() {
            for metric in family.get_metric() {
                if metric.get_gauge().get_value() >= 1.0 {
                    healthy += 1;
                } else {
                    unhealthy += 1;
                }
            }
        }
        (healthy, unhealthy)
    }

    /// Sum of the backlog depth gauges across shards
    pub fn total_backlog(&self) -> f64 {
        use prometheus::core::Collector;

        self.backlog_depth
            .collect()
            .iter()
            .flat_map(|family| family.get_metric())
            .map(|metric| metric.get_gauge().get_value())
            .sum()
    }
}

/// Gather all metrics and encode as Prometheus text format
///
/// Returns the metrics as a String, ready to be served via HTTP.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if encoder.encode(&metric_families, &mut buffer).is_ok() {
        String::from_utf8(buffer).unwrap_or_default()
    } else {
        String::new()
    }
}

/// Record a received delivery if metrics are initialized
pub fn try_record_received() {
    if let Some(m) = Metrics::get() {
        m.record_received();
    }
}

/// Record dropped messages if metrics are initialized
pub fn try_record_dropped(reason: &str, count: u64) {
    if let Some(m) = Metrics::get() {
        m.record_dropped(reason, count);
    }
}

/// Record a publish if metrics are initialized
pub fn try_record_published(sink: &str, duration: std::time::Duration) {
    if let Some(m) = Metrics::get() {
        m.record_published(sink, duration);
    }
}

/// Record a flush if metrics are initialized
pub fn try_record_flush(count: usize) {
    if let Some(m) = Metrics::get() {
        m.record_flush(count);
    }
}

/// Record an expiration if metrics are initialized
pub fn try_record_expiration() {
    if let Some(m) = Metrics::get() {
        m.record_expiration();
    }
}

/// Update shard gauges if metrics are initialized
pub fn try_set_shard_state(shard: usize, backlog: usize, records: usize) {
    if let Some(m) = Metrics::get() {
        m.set_shard_state(shard, backlog, records);
    }
}

/// Record a retry if metrics are initialized
pub fn try_record_retry(sink: &str) {
    if let Some(m) = Metrics::get() {
        m.record_retry(sink);
    }
}

/// Update sink health if metrics are initialized
pub fn try_set_sink_health(sink: &str, healthy: bool) {
    if let Some(m) = Metrics::get() {
        m.set_sink_health(sink, healthy);
    }
}

/// Update sink queue depth if metrics are initialized
pub fn try_set_sink_queue_depth(sink: &str, depth: usize) {
    if let Some(m) = Metrics::get() {
        m.set_sink_queue_depth(sink, depth);
    }
}

/// Set the `up` gauge if metrics are initialized
pub fn try_set_up(up: bool) {
    if let Some(m) = Metrics::get() {
        m.up.set(if up { 1.0 } else { 0.0 });
    }
}
