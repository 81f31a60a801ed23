//! Stdout sink for debugging
//!
//! Prints one line per publishing. Useful for development and for running
//! the broker without a message transport.

use async_trait::async_trait;
use datashare_core::{PluginError, Publishing, Sink};
use std::sync::atomic::{AtomicU64, Ordering};

/// Stdout sink - prints publishings for debugging
pub struct StdoutSink {
    name: &'static str,
    /// Count of publishings written
    published_count: AtomicU64,
}

impl StdoutSink {
    /// Create a new StdoutSink reporting under `name`
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            published_count: AtomicU64::new(0),
        }
    }

    /// Get total publishings written
    pub fn published_count(&self) -> u64 {
        self.published_count.load(Ordering::Relaxed)
    }
}

/// Render a body for a terminal: text as is, binary as hex
fn render_body(body: &[u8]) -> String {
    match std::str::from_utf8(body) {
        Ok(text) => text.to_string(),
        Err(_) => body.iter().map(|b| format!("{b:02x}")).collect(),
    }
}

#[async_trait]
impl Sink for StdoutSink {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn publish(&self, publishing: &Publishing) -> Result<(), PluginError> {
        use std::io::Write;

        let mut stdout = std::io::stdout().lock();
        writeln!(
            stdout,
            "[{}] {} {}{}",
            self.name,
            publishing.routing_key,
            render_body(&publishing.body),
            if publishing.persistent { " (persistent)" } else { "" }
        )
        .map_err(|e| PluginError::Send(format!("stdout write failed: {e}")))?;

        self.published_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn health(&self) -> bool {
        true
    }
}
