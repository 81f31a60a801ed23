//! Correlator shard task
//!
//! One shard owns one [`Correlator`] and handles every event for the uids
//! hashed to it, one at a time. That sequential loop is what orders a uid's
//! messages against its metadata events; nothing else touches the state.

use crate::correlator::{Admitted, Correlator, Expiry, Flush, MessageOutcome};
use crate::enrich::Enricher;
use crate::metrics::{try_record_expiration, try_record_flush, try_set_shard_state};
use crate::observe::{DropObserver, DropReason, DropReport};
use crate::route::ScopeRouter;
use crate::serialize::Serializer;
use crate::source::MetadataEvent;
use datashare_core::{Message, MetadataRecord, Publishing, Uid};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

/// Event routed to a shard
#[derive(Debug)]
pub(crate) enum ShardInput {
    Message(Message),
    Metadata(MetadataEvent),
}

enum ShardEvent {
    Input(ShardInput),
    Expired(Expiry),
    Closed,
}

/// Everything after correlation: enrich, render, fork to sinks
#[derive(Clone)]
pub(crate) struct Publisher {
    pub(crate) enricher: Enricher,
    pub(crate) serializer: Serializer,
    pub(crate) router: ScopeRouter,
    pub(crate) observer: Arc<dyn DropObserver>,
}

impl Publisher {
    /// Enrich, serialize and route one admitted message
    pub(crate) fn publish(&self, message: Message, record: &MetadataRecord) {
        let uid = message.uid.clone();
        let enriched = self.enricher.enrich(message, record);

        let forms = match self.serializer.serialize(enriched) {
            Ok(forms) => forms,
            Err(e) => {
                self.observer.report(DropReport::one(
                    Some(uid),
                    DropReason::Serialization,
                    e.to_string(),
                ));
                return;
            }
        };

        let local = self.accept(&uid, "local", forms.local);
        let upstream = self.accept(&uid, "upstream", forms.upstream);
        self.router.route(local, upstream);
    }

    fn accept(
        &self,
        uid: &Uid,
        form: &str,
        rendered: Option<Result<Publishing, crate::serialize::SerializeError>>,
    ) -> Option<Publishing> {
        match rendered? {
            Ok(publishing) => Some(publishing),
            Err(e) => {
                self.observer.report(DropReport::one(
                    Some(uid.clone()),
                    DropReason::Serialization,
                    format!("{form}: {e}"),
                ));
                None
            }
        }
    }
}

/// A correlator shard
pub(crate) struct Shard {
    pub(crate) index: usize,
    pub(crate) rx: mpsc::Receiver<ShardInput>,
    pub(crate) correlator: Correlator,
    pub(crate) publisher: Publisher,
}

impl Shard {
    /// Process events until the inbound queue closes or shutdown is signalled
    ///
    /// On shutdown the inbound queue is closed and what was already queued is
    /// still processed. Backlogs still pending at exit are lost.
    pub(crate) async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        debug!(shard = self.index, "shard started");

        loop {
            let event = tokio::select! {
                input = self.rx.recv() => match input {
                    Some(input) => ShardEvent::Input(input),
                    None => ShardEvent::Closed,
                },
                expiry = self.correlator.next_expiry() => ShardEvent::Expired(expiry),
                _ = shutdown.changed() => ShardEvent::Closed,
            };

            match event {
                ShardEvent::Input(input) => self.handle(input),
                ShardEvent::Expired(expiry) => self.on_expiry(expiry),
                ShardEvent::Closed => break,
            }
            self.update_gauges();
        }

        self.rx.close();
        while let Some(input) = self.rx.recv().await {
            self.handle(input);
        }
        self.update_gauges();

        info!(
            shard = self.index,
            pending = self.correlator.backlog_len(),
            records = self.correlator.records(),
            "shard stopped"
        );
    }

    fn handle(&mut self, input: ShardInput) {
        match input {
            ShardInput::Message(message) => self.on_message(message),
            ShardInput::Metadata(MetadataEvent::Upsert(record)) => {
                let flush = self.correlator.on_metadata(record);
                self.on_flush(flush);
            }
            ShardInput::Metadata(MetadataEvent::Tombstone(uid)) => {
                let dropped = self.correlator.on_tombstone(&uid);
                debug!(shard = self.index, uid = %uid, dropped, "tombstone");
                if dropped > 0 {
                    self.publisher.observer.report(DropReport::bulk(
                        uid,
                        DropReason::Tombstone,
                        dropped,
                    ));
                }
            }
        }
    }

    fn on_message(&mut self, message: Message) {
        match self.correlator.on_message(message) {
            MessageOutcome::Admitted(Admitted { message, record }) => {
                self.publisher.publish(message, &record);
            }
            MessageOutcome::Backlogged { evicted } => {
                if let Some(evicted) = evicted {
                    self.publisher.observer.report(DropReport::one(
                        Some(evicted.uid.clone()),
                        DropReason::BacklogOverflow,
                        format!("topic {}", evicted.topic),
                    ));
                }
            }
        }
    }

    fn on_flush(&mut self, flush: Flush) {
        let Flush { record, messages } = flush;
        if messages.is_empty() {
            debug!(shard = self.index, uid = %record.uid, "metadata stored");
            return;
        }

        info!(
            shard = self.index,
            uid = %record.uid,
            count = messages.len(),
            "flushing backlog"
        );
        try_record_flush(messages.len());
        for message in messages {
            self.publisher.publish(message, &record);
        }
    }

    fn on_expiry(&mut self, expiry: Expiry) {
        try_record_expiration();
        debug!(shard = self.index, uid = %expiry.uid, dropped = expiry.dropped, "uid expired");
        if expiry.dropped > 0 {
            self.publisher.observer.report(DropReport::bulk(
                expiry.uid,
                DropReason::Expired,
                expiry.dropped,
            ));
        }
    }

    fn update_gauges(&self) {
        try_set_shard_state(
            self.index,
            self.correlator.backlog_len(),
            self.correlator.records(),
        );
    }
}
