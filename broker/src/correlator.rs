//! Correlator - reconciles messages with producer metadata
//!
//! Drives the per-uid state machine over two unordered inputs: validated
//! messages and metadata lifecycle events. It owns the [`MetadataStore`]
//! and the [`BacklogManager`] and reaches them only through their APIs.
//!
//! # States
//!
//! ```text
//!                 metadata upsert (flush backlog)
//!   ┌─────────┐ ─────────────────────────────► ┌───────┐
//!   │ unknown │                                │ known │ ◄── message: admit + touch
//!   └─────────┘ ◄───────────────────────────── └───────┘
//!      ▲   │        expired / tombstone
//!      └───┘ message: backlog + retain
//! ```
//!
//! Methods are synchronous and return what must be published, so the
//! caller does enrichment, serialization and sink I/O without holding any
//! correlation state borrowed.

use crate::backlog::BacklogManager;
use crate::metadata::MetadataStore;
use datashare_core::{Message, MetadataRecord, Uid};
use std::sync::Arc;
use std::time::Duration;

/// Correlation state of a uid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UidState {
    /// No live record
    Unknown,
    /// Live record present
    Known,
}

/// A message cleared for publishing together with the record to enrich it with
#[derive(Debug)]
pub struct Admitted {
    /// The message
    pub message: Message,
    /// Record current at the message's admission point
    pub record: Arc<MetadataRecord>,
}

/// Result of handing a message to the correlator
#[derive(Debug)]
pub enum MessageOutcome {
    /// Uid is known: publish now
    Admitted(Admitted),
    /// Uid is unknown: held in the backlog
    Backlogged {
        /// The oldest pending message, pushed out by the backlog bound
        evicted: Option<Message>,
    },
}

/// Messages released by a metadata upsert, in arrival order
#[derive(Debug)]
pub struct Flush {
    /// The record that was just stored
    pub record: Arc<MetadataRecord>,
    /// Backlog drained for the uid (may be empty)
    pub messages: Vec<Message>,
}

/// A uid whose state timed out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expiry {
    /// The uid
    pub uid: Uid,
    /// Pending messages discarded without publishing
    pub dropped: usize,
}

/// Per-shard correlation engine
pub struct Correlator {
    store: MetadataStore,
    backlog: BacklogManager,
}

impl Correlator {
    /// Create a correlator with the given state lifetime and per-uid backlog bound
    pub fn new(ttl: Duration, backlog_capacity: usize) -> Self {
        Self::with_parts(MetadataStore::new(ttl), BacklogManager::new(backlog_capacity))
    }

    /// Create a correlator from explicitly constructed parts
    pub fn with_parts(store: MetadataStore, backlog: BacklogManager) -> Self {
        Self { store, backlog }
    }

    /// Current state of `uid`
    pub fn state(&self, uid: &Uid) -> UidState {
        if self.store.get(uid).is_some() {
            UidState::Known
        } else {
            UidState::Unknown
        }
    }

    /// Admit or backlog a validated message
    pub fn on_message(&mut self, message: Message) -> MessageOutcome {
        if let Some(record) = self.store.get(&message.uid).cloned() {
            self.store.touch(&message.uid);
            return MessageOutcome::Admitted(Admitted { message, record });
        }

        let uid = message.uid.clone();
        let evicted = self.backlog.append(message);
        self.store.retain(&uid);
        MessageOutcome::Backlogged { evicted }
    }

    /// Store a record and release the uid's backlog
    pub fn on_metadata(&mut self, record: MetadataRecord) -> Flush {
        let uid = record.uid.clone();
        let record = self.store.put(record);
        let messages = self.backlog.drain(&uid);
        Flush { record, messages }
    }

    /// Forget a uid immediately, returning how many pending messages were dropped
    pub fn on_tombstone(&mut self, uid: &Uid) -> usize {
        self.store.remove(uid);
        self.backlog.discard(uid)
    }

    /// Wait for the next uid to expire and discard its backlog
    ///
    /// Cancel safe; pending forever while no uid is tracked.
    pub async fn next_expiry(&mut self) -> Expiry {
        let uid = self.store.next_expired().await;
        let dropped = self.backlog.discard(&uid);
        Expiry { uid, dropped }
    }

    /// Pending messages across all uids
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Pending messages for one uid
    pub fn backlog_len_for(&self, uid: &Uid) -> usize {
        self.backlog.len_for(uid)
    }

    /// Live metadata records
    pub fn records(&self) -> usize {
        self.store.records()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use datashare_core::{Scope, Value};
    use tokio::time::{advance, timeout};

    const TTL: Duration = Duration::from_secs(5);
    const PROBE: Duration = Duration::from_millis(10);

    fn uid(s: &str) -> Uid {
        Uid::new(s).unwrap()
    }

    fn msg(u: &str, ts: i64) -> Message {
        Message::new(uid(u), ts, "env.temperature", Value::Float(22.9), Scope::NODE)
    }

    fn record(u: &str, name: &str) -> MetadataRecord {
        MetadataRecord::new(uid(u)).with("name", name)
    }

    async fn expiry(c: &mut Correlator) -> Option<Expiry> {
        timeout(PROBE, c.next_expiry()).await.ok()
    }

    #[tokio::test(start_paused = true)]
    async fn test_known_uid_admitted_immediately() {
        let mut c = Correlator::new(TTL, 10);
        c.on_metadata(record("u1", "simple"));
        assert_eq!(c.state(&uid("u1")), UidState::Known);

        match c.on_message(msg("u1", 1)) {
            MessageOutcome::Admitted(a) => {
                assert_eq!(a.message.timestamp, 1);
                assert_eq!(a.record.get("name"), Some("simple"));
            }
            other => panic!("expected admission, got {other:?}"),
        }
        assert_eq!(c.backlog_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_uid_backlogged_then_flushed_in_order() {
        let mut c = Correlator::new(TTL, 10);
        for ts in 1..=3 {
            assert!(matches!(
                c.on_message(msg("u1", ts)),
                MessageOutcome::Backlogged { evicted: None }
            ));
        }
        assert_eq!(c.state(&uid("u1")), UidState::Unknown);
        assert_eq!(c.backlog_len_for(&uid("u1")), 3);

        let flush = c.on_metadata(record("u1", "simple"));
        let order: Vec<i64> = flush.messages.iter().map(|m| m.timestamp).collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert_eq!(flush.record.get("name"), Some("simple"));
        assert_eq!(c.backlog_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_metadata_without_backlog_flushes_nothing() {
        let mut c = Correlator::new(TTL, 10);
        let flush = c.on_metadata(record("u1", "simple"));
        assert!(flush.messages.is_empty());
        assert_eq!(c.records(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_update_is_last_write_wins() {
        let mut c = Correlator::new(TTL, 10);
        c.on_metadata(record("u1", "old"));
        c.on_metadata(record("u1", "new"));
        match c.on_message(msg("u1", 1)) {
            MessageOutcome::Admitted(a) => assert_eq!(a.record.get("name"), Some("new")),
            other => panic!("expected admission, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_backlog_expires_without_metadata() {
        let mut c = Correlator::new(TTL, 10);
        c.on_message(msg("u1", 1));
        advance(Duration::from_secs(3)).await;
        c.on_message(msg("u1", 2));

        // five seconds after the first message, but only two after the last
        advance(Duration::from_secs(2)).await;
        assert!(expiry(&mut c).await.is_none());

        advance(Duration::from_millis(3100)).await;
        assert_eq!(
            expiry(&mut c).await,
            Some(Expiry {
                uid: uid("u1"),
                dropped: 2
            })
        );
        assert_eq!(c.backlog_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_touch_extends_record_lifetime() {
        let mut c = Correlator::new(TTL, 10);
        c.on_metadata(record("u1", "simple"));
        advance(Duration::from_secs(3)).await;
        assert!(matches!(
            c.on_message(msg("u1", 1)),
            MessageOutcome::Admitted(_)
        ));

        advance(Duration::from_millis(4900)).await;
        assert!(expiry(&mut c).await.is_none());
        assert_eq!(c.state(&uid("u1")), UidState::Known);

        advance(Duration::from_millis(200)).await;
        let e = expiry(&mut c).await.unwrap();
        assert_eq!(e.dropped, 0);
        assert_eq!(c.state(&uid("u1")), UidState::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_uid_backlogs_again() {
        let mut c = Correlator::new(TTL, 10);
        c.on_metadata(record("u1", "simple"));
        advance(TTL + PROBE).await;
        assert!(expiry(&mut c).await.is_some());

        assert!(matches!(
            c.on_message(msg("u1", 1)),
            MessageOutcome::Backlogged { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tombstone_discards_backlog() {
        let mut c = Correlator::new(TTL, 10);
        c.on_message(msg("u1", 1));
        c.on_message(msg("u1", 2));
        assert_eq!(c.on_tombstone(&uid("u1")), 2);
        assert_eq!(c.on_tombstone(&uid("u1")), 0);

        // the timer was cancelled with the state
        advance(TTL * 2).await;
        assert!(expiry(&mut c).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backlog_overflow_reports_evicted() {
        let mut c = Correlator::new(TTL, 2);
        c.on_message(msg("u1", 1));
        c.on_message(msg("u1", 2));
        match c.on_message(msg("u1", 3)) {
            MessageOutcome::Backlogged { evicted: Some(m) } => assert_eq!(m.timestamp, 1),
            other => panic!("expected eviction, got {other:?}"),
        }
        let flush = c.on_metadata(record("u1", "simple"));
        assert_eq!(flush.messages.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_admission_does_not_touch_other_uids() {
        let mut c = Correlator::new(TTL, 10);
        c.on_message(msg("pending", 1));
        c.on_metadata(record("known", "simple"));
        advance(Duration::from_secs(4)).await;
        c.on_message(msg("known", 2));

        advance(Duration::from_millis(1100)).await;
        let e = expiry(&mut c).await.unwrap();
        assert_eq!(e.uid, uid("pending"));
        assert_eq!(e.dropped, 1);
        assert_eq!(c.state(&uid("known")), UidState::Known);
    }
}
