//! Error types for datashare sinks and plugins

use thiserror::Error;

/// Error type for sink and plugin operations
///
/// Returned by [`Sink`](crate::Sink) implementations and by the adapters
/// that sit between the broker and its transports. The categories let the
/// broker decide whether a failure is worth retrying.
///
/// # Example
///
/// ```
/// use datashare_core::PluginError;
///
/// fn connect_to_exchange() -> Result<(), PluginError> {
///     Err(PluginError::Connection("refused".to_string()))
/// }
///
/// match connect_to_exchange() {
///     Ok(_) => println!("Connected!"),
///     Err(e) if e.is_transient() => println!("will retry: {}", e),
///     Err(e) => println!("giving up: {}", e),
/// }
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    /// Initialization failed
    ///
    /// Examples: invalid configuration, failed to declare an exchange,
    /// missing credentials.
    #[error("initialization failed: {0}")]
    Init(String),

    /// Send failed
    ///
    /// Returned when a sink fails to publish to its destination.
    /// Examples: broker rejected the publish, write error, quota exceeded.
    #[error("send failed: {0}")]
    Send(String),

    /// Connection error
    ///
    /// Examples: DNS lookup failed, connection refused, channel closed.
    #[error("connection error: {0}")]
    Connection(String),

    /// Not ready
    ///
    /// The sink is starting up or recovering and cannot accept publishes yet.
    #[error("plugin not ready")]
    NotReady,

    /// Shutdown error
    ///
    /// Examples: failed to flush buffered publishes, timeout waiting for confirms.
    #[error("shutdown error: {0}")]
    Shutdown(String),
}

impl PluginError {
    /// Whether retrying the same operation may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PluginError::Send(_) | PluginError::Connection(_) | PluginError::NotReady
        )
    }
}
