//! datashare - metadata-gated tagging and scope routing broker
//!
//! Plugins publish measurements without knowing where they run. The broker
//! holds each message until its producer's metadata is known, tags it with
//! that metadata and the node identity, and forks it to the sinks its scope
//! selects.
//!
//! ```text
//! Delivery ──► Validator ──► Correlator ──► Enricher ──► Serializer ──► ScopeRouter ──► Sinks
//!                               ▲    │
//! MetadataEvent ────────────────┘    └── backlog while the uid is unknown
//! ```
//!
//! Metadata and backlog live per uid with a touch-reset lifetime; a uid
//! that sees no event for `pod_state_expire_duration` is forgotten along
//! with whatever it had pending.

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

pub mod backlog;
pub mod config;
pub mod correlator;
pub mod engine;
pub mod enrich;
pub mod error;
pub mod metadata;
pub mod metrics;
pub mod metrics_server;
pub mod observe;
pub mod ontology;
pub mod pod;
pub mod route;
pub mod serialize;
pub mod sink;
pub mod source;
pub mod validate;

pub use backlog::BacklogManager;
pub use config::{BrokerConfig, LogFormat, NodeIdentity, UpstreamFormat};
pub use correlator::{Correlator, UidState};
pub use engine::{Accepted, Broker, BrokerHandle, BrokerRunner};
pub use enrich::{EnrichedMessage, Enricher};
pub use error::{BrokerError, PluginError, Result};
pub use metadata::MetadataStore;
pub use metrics::Metrics;
pub use metrics_server::MetricsServer;
pub use observe::{DropObserver, DropReason, DropReport, LogObserver, MemoryObserver};
pub use ontology::{Ontology, StaticOntology};
pub use pod::PodInfo;
pub use route::ScopeRouter;
pub use serialize::{Encoder, SerializeError, Serializer};
pub use sink::{BackoffConfig, MemorySink, RetrySink, StdoutSink};
pub use source::{DeliveryFeed, MetadataEvent, PodInfoFeed, Source};
pub use validate::{Delivery, Rejection, Validator};

pub use datashare_core::{
    Message, MetadataRecord, Publishing, Scope, ScopeTag, Sink, Uid, Value, ValueKind,
};
