//! Per-sink queue and worker
//!
//! Each sink gets one bounded queue and one worker task:
//!
//! ```text
//!  shard ─┐
//!  shard ─┼─► SinkQueue ──(bounded mpsc)──► SinkWorker ──► RetrySink ──► Sink
//!  shard ─┘   never waits for room             one publish at a time
//! ```
//!
//! A slow sink fills its own queue and nothing else. Enqueueing never
//! blocks the shard: a publishing that finds the queue full is dropped and
//! reported at once. The worker exits once every queue handle is gone and
//! the backlog is drained, then shuts the sink down.

use super::retry::{BackoffConfig, RetrySink};
use crate::metrics::{try_record_published, try_set_sink_health, try_set_sink_queue_depth};
use crate::observe::{DropObserver, DropReason, DropReport};
use datashare_core::{Publishing, Sink};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

/// Why a publishing could not be queued
#[derive(Debug, Error)]
pub enum EnqueueError {
    /// The queue had no room
    #[error("sink '{0}' queue full")]
    Full(&'static str),
    /// The worker is gone
    #[error("sink '{0}' closed")]
    Closed(&'static str),
}

/// Sending half of a sink's queue
#[derive(Clone)]
pub struct SinkQueue {
    name: &'static str,
    tx: mpsc::Sender<Publishing>,
}

impl SinkQueue {
    /// Sink name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Queue a publishing if there is room
    pub fn enqueue(&self, publishing: Publishing) -> Result<(), EnqueueError> {
        let sent = self.tx.try_send(publishing);
        try_set_sink_queue_depth(self.name, self.depth());
        match sent {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(EnqueueError::Full(self.name)),
            Err(TrySendError::Closed(_)) => Err(EnqueueError::Closed(self.name)),
        }
    }

    /// Publishings currently queued
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

/// Receiving half: publishes queued messages one at a time
pub struct SinkWorker {
    sink: RetrySink,
    name: &'static str,
    rx: mpsc::Receiver<Publishing>,
    observer: Arc<dyn DropObserver>,
}

/// Create the queue and worker for one sink
pub fn sink_channel(
    sink: Arc<dyn Sink>,
    capacity: usize,
    retry: BackoffConfig,
    observer: Arc<dyn DropObserver>,
) -> (SinkQueue, SinkWorker) {
    let name = sink.name();
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        SinkQueue { name, tx },
        SinkWorker {
            sink: RetrySink::new(sink, retry),
            name,
            rx,
            observer,
        },
    )
}

impl SinkWorker {
    /// Sink name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Publish until every queue handle is dropped, then shut the sink down
    pub async fn run(mut self) {
        let healthy = self.sink.health().await;
        try_set_sink_health(self.name, healthy);
        info!(sink = self.name, healthy, "sink worker started");

        while let Some(publishing) = self.rx.recv().await {
            let started = Instant::now();
            match self.sink.publish(&publishing).await {
                Ok(()) => {
                    try_record_published(self.name, started.elapsed());
                    try_set_sink_health(self.name, true);
                    debug!(
                        sink = self.name,
                        uid = %publishing.uid,
                        routing_key = %publishing.routing_key,
                        "published"
                    );
                }
                Err(e) => {
                    try_set_sink_health(self.name, false);
                    self.observer.report(DropReport::one(
                        Some(publishing.uid.clone()),
                        DropReason::SinkUnavailable,
                        format!("{}: {e}", self.name),
                    ));
                }
            }
            try_set_sink_queue_depth(self.name, self.rx.len());
        }

        if let Err(e) = self.sink.shutdown().await {
            warn!(sink = self.name, error = %e, "sink shutdown failed");
        }
        info!(sink = self.name, "sink worker stopped");
    }
}
