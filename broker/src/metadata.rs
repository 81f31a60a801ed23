//! Metadata store with per-uid expiration
//!
//! Maps each producer uid to its latest [`MetadataRecord`] and keeps one
//! expiration timer per tracked uid on a [`DelayQueue`]. A uid is tracked
//! while it has a record or while the correlator holds a backlog for it
//! (see [`MetadataStore::retain`]).
//!
//! ```text
//!  put / touch / retain ──► reset deadline to now + ttl
//!                                   │
//!                         deadline passes untouched
//!                                   ▼
//!  next_expired() ◄── record evicted, uid yielded exactly once
//! ```
//!
//! The store is owned by a single shard task, so every method takes
//! `&mut self` and no lock is involved.

use datashare_core::{MetadataRecord, Uid};
use std::collections::HashMap;
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;
use tokio_util::time::{delay_queue, DelayQueue};

struct Slot {
    record: Option<Arc<MetadataRecord>>,
    timer: delay_queue::Key,
}

/// Uid → record map with touch-extended expiration
pub struct MetadataStore {
    slots: HashMap<Uid, Slot>,
    timers: DelayQueue<Uid>,
    ttl: Duration,
}

impl MetadataStore {
    /// Create an empty store whose entries live `ttl` past their last touch
    pub fn new(ttl: Duration) -> Self {
        Self {
            slots: HashMap::new(),
            timers: DelayQueue::new(),
            ttl,
        }
    }

    /// Configured expiration duration
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Insert or replace the record for `record.uid` and (re)arm its timer
    pub fn put(&mut self, record: MetadataRecord) -> Arc<MetadataRecord> {
        let record = Arc::new(record);
        let uid = record.uid.clone();
        match self.slots.get_mut(&uid) {
            Some(slot) => {
                self.timers.reset(&slot.timer, self.ttl);
                slot.record = Some(Arc::clone(&record));
            }
            None => {
                let timer = self.timers.insert(uid.clone(), self.ttl);
                self.slots.insert(
                    uid,
                    Slot {
                        record: Some(Arc::clone(&record)),
                        timer,
                    },
                );
            }
        }
        record
    }

    /// Look up the current record. Does not affect the timer.
    pub fn get(&self, uid: &Uid) -> Option<&Arc<MetadataRecord>> {
        self.slots.get(uid).and_then(|slot| slot.record.as_ref())
    }

    /// Reset the timer for `uid` if it has a record
    ///
    /// Returns false (and does nothing) when there is no record.
    pub fn touch(&mut self, uid: &Uid) -> bool {
        match self.slots.get(uid) {
            Some(slot) if slot.record.is_some() => {
                self.timers.reset(&slot.timer, self.ttl);
                true
            }
            _ => false,
        }
    }

    /// Arm or reset the timer for `uid` without creating a record
    ///
    /// Used for uids that only have pending messages, so their backlog is
    /// bounded in time as well as size.
    pub fn retain(&mut self, uid: &Uid) {
        match self.slots.get(uid) {
            Some(slot) => self.timers.reset(&slot.timer, self.ttl),
            None => {
                let timer = self.timers.insert(uid.clone(), self.ttl);
                self.slots.insert(
                    uid.clone(),
                    Slot {
                        record: None,
                        timer,
                    },
                );
            }
        }
    }

    /// Delete the record and cancel the timer. Idempotent.
    pub fn remove(&mut self, uid: &Uid) -> Option<Arc<MetadataRecord>> {
        let slot = self.slots.remove(uid)?;
        self.timers.remove(&slot.timer);
        slot.record
    }

    /// Wait for the next uid whose timer fires
    ///
    /// The uid's record is evicted before it is returned. Each firing is
    /// yielded once; a `put`, `touch` or `retain` before the deadline
    /// postpones it. Pending forever while nothing is tracked.
    ///
    /// Cancel safe: the eviction happens in the same poll that observes
    /// the firing.
    pub async fn next_expired(&mut self) -> Uid {
        let uid = std::future::poll_fn(|cx| match self.timers.poll_expired(cx) {
            Poll::Ready(Some(expired)) => Poll::Ready(expired.into_inner()),
            Poll::Ready(None) | Poll::Pending => Poll::Pending,
        })
        .await;
        self.slots.remove(&uid);
        uid
    }

    /// Number of live records
    pub fn records(&self) -> usize {
        self.slots.values().filter(|s| s.record.is_some()).count()
    }

    /// Number of uids with an armed timer
    pub fn tracked(&self) -> usize {
        self.slots.len()
    }

    /// Check if nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
