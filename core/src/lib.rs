//! datashare-core - Core types for the datashare broker
//!
//! This crate provides the foundational types shared between the broker
//! and the transport adapters that feed it or drain it:
//!
//! - [`Message`] - a validated inbound message keyed by its producer [`Uid`]
//! - [`MetadataRecord`] - authoritative attributes describing a producer
//! - [`Scope`] - the destination set carried on each message
//! - [`Sink`] trait - async interface for publishing to a destination
//! - [`PluginError`] - error type for sink operations
//!
//! # Why this crate exists
//!
//! Transport adapters (an AMQP exchange sink, an orchestrator watch feed)
//! only need these types and the `Sink` trait. Keeping them here lets
//! adapters live outside the broker crate without a dependency cycle:
//!
//! ```text
//! datashare-core ◄── datashare-broker
//!       ▲
//!       └─────────── transport adapters
//! ```

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]
#![warn(missing_docs)]

mod error;
/// Validated message type
pub mod message;
/// Producer metadata records and well-known attribute keys
pub mod record;
/// Destination scope
pub mod scope;
mod sink;

pub use error::PluginError;
pub use message::{Message, Uid, Value, ValueKind};
pub use record::MetadataRecord;
pub use scope::{Scope, ScopeTag, UnknownScope};
pub use sink::{Publishing, Sink};
