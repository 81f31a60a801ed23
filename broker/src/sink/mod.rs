//! Sink plumbing
//!
//! The [`Sink`](datashare_core::Sink) trait lives in `datashare-core`; this
//! module holds what the broker wraps around it (queue, worker, retry) and
//! two built-in sinks.

mod memory;
pub mod retry;
mod stdout;
mod worker;

pub use memory::MemorySink;
pub use retry::{BackoffConfig, RetrySink};
pub use stdout::StdoutSink;
pub use worker::{sink_channel, EnqueueError, SinkQueue, SinkWorker};
