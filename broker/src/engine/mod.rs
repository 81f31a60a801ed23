//! Broker - builder, input handle and runner
//!
//! ```text
//!                  ┌──────────┐  uid hash  ┌─────────┐
//! deliveries ──►   │ Validator│ ─────────► │ shard 0 │ ─┐   ┌─► local queue ──► worker ──► sink
//!                  └──────────┘     ├────► │ shard 1 │ ─┼───┤
//! metadata events ──────────────────┴────► │ shard N │ ─┘   └─► upstream queue ──► worker ──► sink
//!                                          └─────────┘
//! ```
//!
//! Validation is stateless and runs on the caller's task. Everything keyed
//! by uid happens inside the shard the uid hashes to.
//!
//! # Example
//!
//! ```ignore
//! let (handle, runner) = Broker::new(BrokerConfig::from_env()?)
//!     .local_sink(StdoutSink::new("data.topic"))
//!     .upstream_sink(StdoutSink::new("to-beehive"))
//!     .source(PodInfoFeed::new(metadata))
//!     .build()?;
//!
//! tokio::spawn(runner.run_until(shutdown_signal()));
//! handle.submit(delivery).await?;
//! ```

mod shard;

use crate::config::BrokerConfig;
use crate::correlator::Correlator;
use crate::enrich::Enricher;
use crate::error::{BrokerError, Result};
use crate::metrics::{try_record_received, try_set_up};
use crate::observe::{DropObserver, DropReason, DropReport, LogObserver};
use crate::ontology::{Ontology, StaticOntology};
use crate::route::ScopeRouter;
use crate::serialize::Serializer;
use crate::sink::{sink_channel, SinkWorker};
use crate::source::{MetadataEvent, Source};
use crate::validate::{Delivery, Rejection, Validator};
use datashare_core::{Message, Sink, Uid};
use shard::{Publisher, Shard, ShardInput};
use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// Broker builder
pub struct Broker {
    config: BrokerConfig,
    local: Option<Arc<dyn Sink>>,
    upstream: Option<Arc<dyn Sink>>,
    ontology: Option<Arc<dyn Ontology>>,
    observer: Arc<dyn DropObserver>,
    sources: Vec<Box<dyn Source>>,
}

impl Broker {
    /// Start a builder from configuration
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            local: None,
            upstream: None,
            ontology: None,
            observer: Arc::new(LogObserver),
            sources: Vec::new(),
        }
    }

    /// Sink for the `node` scope
    pub fn local_sink<S: Sink + 'static>(self, sink: S) -> Self {
        self.local_sink_arc(Arc::new(sink))
    }

    /// Sink for the `node` scope, shared with the caller
    pub fn local_sink_arc(mut self, sink: Arc<dyn Sink>) -> Self {
        self.local = Some(sink);
        self
    }

    /// Sink for the `beehive` scope
    pub fn upstream_sink<S: Sink + 'static>(self, sink: S) -> Self {
        self.upstream_sink_arc(Arc::new(sink))
    }

    /// Sink for the `beehive` scope, shared with the caller
    pub fn upstream_sink_arc(mut self, sink: Arc<dyn Sink>) -> Self {
        self.upstream = Some(sink);
        self
    }

    /// Replace the ontology named by the configuration
    pub fn ontology(mut self, ontology: Arc<dyn Ontology>) -> Self {
        self.ontology = Some(ontology);
        self
    }

    /// Where drops are reported (default: [`LogObserver`])
    pub fn observer(mut self, observer: Arc<dyn DropObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Add an input feed, run by the runner
    pub fn source<S: Source>(mut self, source: S) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// Wire the pipeline
    ///
    /// Nothing runs until [`BrokerRunner::run`]; deliveries submitted before
    /// that wait in the shard queues.
    pub fn build(self) -> Result<(BrokerHandle, BrokerRunner)> {
        let config = self.config;
        config.validate()?;

        let local = self
            .local
            .ok_or_else(|| BrokerError::Config("no local sink configured".to_string()))?;
        let upstream = self
            .upstream
            .ok_or_else(|| BrokerError::Config("no upstream sink configured".to_string()))?;

        let ontology: Arc<dyn Ontology> = match (self.ontology, &config.ontology_path) {
            (Some(ontology), _) => ontology,
            (None, Some(path)) => Arc::new(StaticOntology::load(path)?),
            (None, None) => Arc::new(StaticOntology::builtin()),
        };

        let (local_queue, local_worker) = sink_channel(
            local,
            config.sink_queue_capacity,
            config.sink_retry.clone(),
            Arc::clone(&self.observer),
        );
        let (upstream_queue, upstream_worker) = sink_channel(
            upstream,
            config.sink_queue_capacity,
            config.sink_retry.clone(),
            Arc::clone(&self.observer),
        );

        let publisher = Publisher {
            enricher: Enricher::new(config.node.clone()),
            serializer: Serializer::from_config(&config, Arc::clone(&ontology)),
            router: ScopeRouter::new(local_queue, upstream_queue, Arc::clone(&self.observer)),
            observer: Arc::clone(&self.observer),
        };

        let mut senders = Vec::with_capacity(config.shards);
        let mut shards = Vec::with_capacity(config.shards);
        for index in 0..config.shards {
            let (tx, rx) = mpsc::channel(config.shard_queue_capacity.max(1));
            senders.push(tx);
            shards.push(Shard {
                index,
                rx,
                correlator: Correlator::new(
                    config.pod_state_expire_duration,
                    config.backlog_capacity,
                ),
                publisher: publisher.clone(),
            });
        }

        let handle = BrokerHandle {
            validator: Validator::new(ontology, config.ontology_strict),
            shards: senders.into(),
            observer: self.observer,
        };
        let runner = BrokerRunner {
            shards,
            workers: vec![local_worker, upstream_worker],
            sources: self.sources,
            handle: handle.clone(),
        };

        Ok((handle, runner))
    }
}

/// Outcome of submitting a delivery
#[derive(Debug, Clone, PartialEq)]
pub enum Accepted {
    /// Valid; queued on its shard
    Queued,
    /// Refused and reported; never retained
    Rejected(Rejection),
}

/// Cloneable input side of a broker
#[derive(Clone)]
pub struct BrokerHandle {
    validator: Validator,
    shards: Arc<[mpsc::Sender<ShardInput>]>,
    observer: Arc<dyn DropObserver>,
}

impl BrokerHandle {
    /// Validate a delivery and queue it on its uid's shard
    ///
    /// Waits while the shard queue is full. Rejections are reported to the
    /// observer and returned, they are not errors.
    pub async fn submit(&self, delivery: Delivery) -> Result<Accepted> {
        try_record_received();
        match self.validator.validate(&delivery) {
            Ok(message) => {
                self.submit_message(message).await?;
                Ok(Accepted::Queued)
            }
            Err(rejection) => {
                let uid = delivery.uid.as_deref().and_then(Uid::new);
                self.observer.report(DropReport::one(
                    uid,
                    DropReason::Rejected,
                    rejection.to_string(),
                ));
                Ok(Accepted::Rejected(rejection))
            }
        }
    }

    /// Queue an already validated message
    pub async fn submit_message(&self, message: Message) -> Result<()> {
        let shard = self.shard_for(&message.uid);
        self.send(shard, ShardInput::Message(message)).await
    }

    /// Queue a metadata event on its uid's shard
    pub async fn submit_metadata(&self, event: MetadataEvent) -> Result<()> {
        let shard = self.shard_for(event.uid());
        self.send(shard, ShardInput::Metadata(event)).await
    }

    /// Number of shards
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Shard that owns `uid`
    pub fn shard_for(&self, uid: &Uid) -> usize {
        let mut hasher = DefaultHasher::new();
        uid.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    async fn send(&self, shard: usize, input: ShardInput) -> Result<()> {
        self.shards[shard]
            .send(input)
            .await
            .map_err(|_| BrokerError::Shutdown)
    }
}

/// Runs the shards, sink workers and sources of a built broker
pub struct BrokerRunner {
    shards: Vec<Shard>,
    workers: Vec<SinkWorker>,
    sources: Vec<Box<dyn Source>>,
    handle: BrokerHandle,
}

impl BrokerRunner {
    /// Run until every [`BrokerHandle`] is dropped and all sources finished
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run until `signal` resolves or all input is gone
    ///
    /// On signal the shards stop accepting input, finish what is queued and
    /// exit; sink workers then drain their queues and shut the sinks down.
    pub async fn run_until<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let BrokerRunner {
            shards,
            workers,
            sources,
            handle,
        } = self;

        try_set_up(true);
        info!(
            shards = shards.len(),
            sinks = workers.len(),
            sources = sources.len(),
            "broker started"
        );

        let worker_tasks: Vec<_> = workers
            .into_iter()
            .map(|worker| {
                let name = worker.name();
                (name, tokio::spawn(worker.run()))
            })
            .collect();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut shard_tasks = JoinSet::new();
        for shard in shards {
            shard_tasks.spawn(shard.run(shutdown_rx.clone()));
        }

        let mut source_tasks = JoinSet::new();
        for source in sources {
            let handle = handle.clone();
            source_tasks.spawn(async move {
                let name = source.name();
                match source.run(handle).await {
                    Ok(()) => debug!(source = name, "source finished"),
                    Err(BrokerError::Shutdown) => debug!(source = name, "source stopped"),
                    Err(e) => error!(source = name, error = %e, "source failed"),
                }
            });
        }
        drop(handle);

        let shards_done = async {
            while let Some(joined) = shard_tasks.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "shard task failed");
                }
            }
        };
        tokio::pin!(shards_done);

        let signalled = tokio::select! {
            _ = signal => true,
            _ = &mut shards_done => false,
        };
        if signalled {
            info!("shutdown requested");
            let _ = shutdown_tx.send(true);
            shards_done.await;
        }

        source_tasks.abort_all();
        while source_tasks.join_next().await.is_some() {}

        for (name, task) in worker_tasks {
            if let Err(e) = task.await {
                error!(sink = name, error = %e, "sink worker failed");
            }
        }

        try_set_up(false);
        info!("broker stopped");
        Ok(())
    }
}
