//! Drop reporting
//!
//! Every message the broker gives up on is reported exactly once to a
//! [`DropObserver`] as `(uid, reason, count)`. Reporting is synchronous and
//! must not block: observers log, count, or push into a buffer.

use crate::metrics::try_record_dropped;
use datashare_core::Uid;
use parking_lot::Mutex;
use std::fmt;

/// Why messages were dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// Failed validation
    Rejected,
    /// Could not be rendered for a sink
    Serialization,
    /// Pushed out of a full backlog
    BacklogOverflow,
    /// Backlog discarded when the uid's state expired
    Expired,
    /// Backlog discarded on a tombstone
    Tombstone,
    /// Sink queue stayed full past the enqueue timeout
    SinkBackpressure,
    /// Sink kept failing after retries, or refused permanently
    SinkUnavailable,
}

impl DropReason {
    /// Metric label
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Rejected => "rejected",
            DropReason::Serialization => "serialization",
            DropReason::BacklogOverflow => "backlog_overflow",
            DropReason::Expired => "expired",
            DropReason::Tombstone => "tombstone",
            DropReason::SinkBackpressure => "sink_backpressure",
            DropReason::SinkUnavailable => "sink_unavailable",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One drop event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropReport {
    /// Producer, when known (a delivery without uid has none)
    pub uid: Option<Uid>,
    /// Why
    pub reason: DropReason,
    /// Human readable detail (rejection reason, sink name, error)
    pub detail: String,
    /// Number of messages dropped
    pub count: usize,
}

impl DropReport {
    /// Report for a single message
    pub fn one(uid: Option<Uid>, reason: DropReason, detail: impl Into<String>) -> Self {
        Self {
            uid,
            reason,
            detail: detail.into(),
            count: 1,
        }
    }

    /// Report for a bulk drop
    pub fn bulk(uid: Uid, reason: DropReason, count: usize) -> Self {
        Self {
            uid: Some(uid),
            reason,
            detail: String::new(),
            count,
        }
    }
}

/// Receiver of drop reports
pub trait DropObserver: Send + Sync {
    /// Record a drop; must return promptly
    fn report(&self, report: DropReport);
}

/// Logs drops with tracing and counts them in Prometheus
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl DropObserver for LogObserver {
    fn report(&self, report: DropReport) {
        try_record_dropped(report.reason.as_str(), report.count as u64);

        let uid = report.uid.as_ref().map(Uid::as_str).unwrap_or("-");
        match report.reason {
            DropReason::Expired | DropReason::Tombstone => tracing::info!(
                uid,
                reason = %report.reason,
                count = report.count,
                "discarded backlog"
            ),
            _ => tracing::warn!(
                uid,
                reason = %report.reason,
                count = report.count,
                detail = %report.detail,
                "dropped message"
            ),
        }
    }
}

/// Keeps reports in memory
#[derive(Debug, Default)]
pub struct MemoryObserver {
    reports: Mutex<Vec<DropReport>>,
}

impl MemoryObserver {
    /// Create an empty observer
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all reports so far
    pub fn reports(&self) -> Vec<DropReport> {
        self.reports.lock().clone()
    }

    /// Messages dropped for `reason`, summing bulk counts
    pub fn count(&self, reason: DropReason) -> usize {
        self.reports
            .lock()
            .iter()
            .filter(|r| r.reason == reason)
            .map(|r| r.count)
            .sum()
    }

    /// Messages dropped across all reasons
    pub fn total(&self) -> usize {
        self.reports.lock().iter().map(|r| r.count).sum()
    }
}

impl DropObserver for MemoryObserver {
    fn report(&self, report: DropReport) {
        self.reports.lock().push(report);
    }
}
