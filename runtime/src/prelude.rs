//! Convenience re-exports for broker wiring.
//!
//! ```rust
//! use datashare_runtime::prelude::*;
//! ```

// Core types
pub use datashare_core::{Message, MetadataRecord, Publishing, Scope, ScopeTag, Uid, Value};

// Broker builder
pub use datashare_broker::{Accepted, Broker, BrokerConfig, BrokerHandle, BrokerRunner};

// Sinks
pub use datashare_broker::{MemorySink, Sink, StdoutSink};

// Resilience wrappers
pub use datashare_broker::{BackoffConfig, RetrySink};

// Sources
pub use datashare_broker::{Delivery, DeliveryFeed, MetadataEvent, PodInfo, PodInfoFeed, Source};

// Drop reporting
pub use datashare_broker::{DropObserver, DropReason, DropReport, LogObserver};

// Error types
pub use datashare_broker::{BrokerError, PluginError, Rejection};

// Zero-copy payload
pub use bytes::Bytes;

// Runtime
pub use crate::RuntimeBuilder;
