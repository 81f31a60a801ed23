//! Scope router - forks rendered forms to their sinks
//!
//! `node` → local sink, `beehive` → upstream sink. Enqueueing never waits,
//! so the two destinations fail independently; a full or closed queue is
//! reported and does not affect the other one or the calling shard.

use crate::observe::{DropObserver, DropReason, DropReport};
use crate::sink::{EnqueueError, SinkQueue};
use datashare_core::Publishing;
use std::sync::Arc;

/// Forks publishings to the local and upstream sink queues
#[derive(Clone)]
pub struct ScopeRouter {
    local: SinkQueue,
    upstream: SinkQueue,
    observer: Arc<dyn DropObserver>,
}

impl ScopeRouter {
    /// Create a router over the two sink queues
    pub fn new(local: SinkQueue, upstream: SinkQueue, observer: Arc<dyn DropObserver>) -> Self {
        Self {
            local,
            upstream,
            observer,
        }
    }

    /// Queue each present form on its sink; returns how many were queued
    ///
    /// Passing neither form is legal and queues nothing.
    pub fn route(&self, local: Option<Publishing>, upstream: Option<Publishing>) -> usize {
        let local = self.send(&self.local, local);
        let upstream = self.send(&self.upstream, upstream);
        usize::from(local) + usize::from(upstream)
    }

    fn send(&self, queue: &SinkQueue, publishing: Option<Publishing>) -> bool {
        let Some(publishing) = publishing else {
            return false;
        };
        let uid = publishing.uid.clone();
        match queue.enqueue(publishing) {
            Ok(()) => true,
            Err(e) => {
                let reason = match e {
                    EnqueueError::Full(_) => DropReason::SinkBackpressure,
                    EnqueueError::Closed(_) => DropReason::SinkUnavailable,
                };
                self.observer
                    .report(DropReport::one(Some(uid), reason, e.to_string()));
                false
            }
        }
    }
}
