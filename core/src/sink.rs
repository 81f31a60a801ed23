//! Sink trait for datashare destinations
//!
//! A [`Sink`] is one publish target: the on-node distribution exchange or
//! the upstream beehive link. The broker owns one worker per sink, so a
//! sink sees publishes strictly one at a time and in order.

use crate::error::PluginError;
use crate::message::Uid;
use async_trait::async_trait;
use bytes::Bytes;

/// A serialized message ready for a sink
///
/// `body` is a cheap `Bytes` handle, so fanning the same form out to
/// several retries or sinks never copies the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publishing {
    /// Producer the message came from (for drop reporting)
    pub uid: Uid,
    /// Routing key on the destination exchange (the topic name)
    pub routing_key: String,
    /// Serialized message
    pub body: Bytes,
    /// Ask the transport to persist the message before acknowledging
    pub persistent: bool,
}

/// Sink trait - publishes serialized messages to a destination
///
/// # Implementation Requirements
///
/// - Sinks must be `Send + Sync` for use across async tasks
/// - `publish` may block on transport backpressure; the broker bounds the
///   wait with its own retry policy
/// - Health checks should be lightweight
///
/// # Example
///
/// ```ignore
/// use datashare_core::{PluginError, Publishing, Sink};
/// use async_trait::async_trait;
///
/// struct ExchangeSink {
///     channel: amqp::Channel,
///     exchange: &'static str,
/// }
///
/// #[async_trait]
/// impl Sink for ExchangeSink {
///     fn name(&self) -> &'static str {
///         "data.topic"
///     }
///
///     async fn publish(&self, p: &Publishing) -> Result<(), PluginError> {
///         self.channel
///             .basic_publish(self.exchange, &p.routing_key, &p.body, p.persistent)
///             .await
///             .map_err(|e| PluginError::Send(e.to_string()))
///     }
///
///     async fn health(&self) -> bool {
///         self.channel.is_open()
///     }
/// }
/// ```
#[async_trait]
pub trait Sink: Send + Sync {
    /// Short name for logging and metrics, e.g. "stdout", "to-beehive"
    fn name(&self) -> &'static str;

    /// Publish one message
    ///
    /// # Returns
    ///
    /// * `Ok(())` - the destination accepted the message
    /// * `Err(PluginError)` - the publish failed; transient errors are retried
    async fn publish(&self, publishing: &Publishing) -> Result<(), PluginError>;

    /// Check if the destination is accepting publishes
    async fn health(&self) -> bool;

    /// Graceful shutdown
    ///
    /// Called once after the last publish. The default implementation
    /// returns `Ok(())` for sinks that don't need cleanup.
    async fn shutdown(&self) -> Result<(), PluginError> {
        Ok(())
    }
}
