//! In-memory capturing sink
//!
//! Records every publishing it accepts. Can be scripted to fail its first
//! publishes or to stall, which is how the pipeline tests exercise retry
//! and backpressure.

use async_trait::async_trait;
use datashare_core::{PluginError, Publishing, Sink};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// Capturing sink
pub struct MemorySink {
    name: &'static str,
    published: Mutex<Vec<Publishing>>,
    notify: Notify,
    healthy: AtomicBool,
    failures_left: AtomicU32,
    failure: PluginError,
    delay: Option<Duration>,
}

impl MemorySink {
    /// Create a healthy sink that accepts everything
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            published: Mutex::new(Vec::new()),
            notify: Notify::new(),
            healthy: AtomicBool::new(true),
            failures_left: AtomicU32::new(0),
            failure: PluginError::NotReady,
            delay: None,
        }
    }

    /// Fail the first `n` publishes with `error`
    pub fn fail_first(mut self, n: u32, error: PluginError) -> Self {
        self.failures_left = AtomicU32::new(n);
        self.failure = error;
        self
    }

    /// Wait `delay` inside every publish
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Set the reported health
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }

    /// Snapshot of accepted publishings, in order
    pub fn published(&self) -> Vec<Publishing> {
        self.published.lock().clone()
    }

    /// Number of accepted publishings
    pub fn len(&self) -> usize {
        self.published.lock().len()
    }

    /// True if nothing was accepted
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until at least `n` publishings have been accepted
    pub async fn wait_for(&self, n: usize) -> Vec<Publishing> {
        loop {
            let notified = self.notify.notified();
            {
                let published = self.published.lock();
                if published.len() >= n {
                    return published.clone();
                }
            }
            notified.await;
        }
    }
}

#[async_trait]
impl Sink for MemorySink {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn publish(&self, publishing: &Publishing) -> Result<(), PluginError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .failures_left
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(self.failure.clone());
        }

        self.published.lock().push(publishing.clone());
        self.notify.notify_waiters();
        Ok(())
    }

    async fn health(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use datashare_core::Uid;
    use std::sync::Arc;

    fn publishing() -> Publishing {
        Publishing {
            uid: Uid::new("u1").unwrap(),
            routing_key: "t".to_string(),
            body: Bytes::from_static(b"x"),
            persistent: false,
        }
    }

    #[tokio::test]
    async fn test_scripted_failures_then_success() {
        let sink = MemorySink::new("mem").fail_first(2, PluginError::Send("down".into()));
        assert!(sink.publish(&publishing()).await.is_err());
        assert!(sink.publish(&publishing()).await.is_err());
        assert!(sink.publish(&publishing()).await.is_ok());
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn test_wait_for_wakes_on_publish() {
        let sink = Arc::new(MemorySink::new("mem"));
        let waiter = {
            let sink = Arc::clone(&sink);
            tokio::spawn(async move { sink.wait_for(2).await.len() })
        };
        sink.publish(&publishing()).await.unwrap();
        sink.publish(&publishing()).await.unwrap();
        assert_eq!(waiter.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_health_toggle() {
        let sink = MemorySink::new("mem");
        assert!(sink.health().await);
        sink.set_healthy(false);
        assert!(!sink.health().await);
    }
}
