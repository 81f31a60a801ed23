//! Per-uid backlog of messages awaiting metadata
//!
//! Messages for a uid with no record yet are held here in arrival order.
//! Each queue is bounded: when a uid already holds `capacity` messages, the
//! oldest is evicted to make room (oldest-drop) and handed back to the
//! caller for reporting.
//!
//! An empty queue is not kept; "no backlog" and "empty backlog" are the
//! same state. Access is serialized by ownership: the manager belongs to
//! one shard task and every mutating method takes `&mut self`, so an entry
//! is delivered to exactly one `drain` or `discard`.

use datashare_core::{Message, Uid};
use std::collections::{HashMap, VecDeque};

/// Uid → FIFO of pending messages
pub struct BacklogManager {
    queues: HashMap<Uid, VecDeque<Message>>,
    capacity: usize,
    total: usize,
}

impl BacklogManager {
    /// Create a manager holding at most `capacity` messages per uid
    pub fn new(capacity: usize) -> Self {
        Self {
            queues: HashMap::new(),
            capacity: capacity.max(1),
            total: 0,
        }
    }

    /// Append to the tail of the message's uid queue
    ///
    /// Returns the evicted oldest message when the queue was full.
    pub fn append(&mut self, msg: Message) -> Option<Message> {
        let queue = self.queues.entry(msg.uid.clone()).or_default();
        let evicted = if queue.len() >= self.capacity {
            queue.pop_front()
        } else {
            self.total += 1;
            None
        };
        queue.push_back(msg);
        evicted
    }

    /// Remove and return every message for `uid` in arrival order
    pub fn drain(&mut self, uid: &Uid) -> Vec<Message> {
        match self.queues.remove(uid) {
            Some(queue) => {
                self.total -= queue.len();
                queue.into()
            }
            None => Vec::new(),
        }
    }

    /// Drop every message for `uid`, returning how many were dropped
    pub fn discard(&mut self, uid: &Uid) -> usize {
        match self.queues.remove(uid) {
            Some(queue) => {
                self.total -= queue.len();
                queue.len()
            }
            None => 0,
        }
    }

    /// Pending messages for one uid
    pub fn len_for(&self, uid: &Uid) -> usize {
        self.queues.get(uid).map_or(0, VecDeque::len)
    }

    /// Pending messages across all uids
    pub fn len(&self) -> usize {
        self.total
    }

    /// Check if nothing is pending
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Number of uids with pending messages
    pub fn uids(&self) -> usize {
        self.queues.len()
    }
}
