//! Retry sink with exponential backoff
//!
//! Wraps a sink to retry transient publish failures with configurable
//! backoff. Permanent failures are returned at once.

use crate::metrics::try_record_retry;
use async_trait::async_trait;
use datashare_core::{PluginError, Publishing, Sink};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Lock-free xorshift64 PRNG for jitter randomness
struct Xorshift64 {
    state: AtomicU64,
}

impl Xorshift64 {
    /// Create with seed from system time
    fn new() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x853c49e6748fea9b);
        // xorshift is stuck at zero
        let seed = if seed == 0 { 0x853c49e6748fea9b } else { seed };
        Self {
            state: AtomicU64::new(seed),
        }
    }

    fn next(&self) -> u64 {
        loop {
            let old = self.state.load(Ordering::Acquire);
            let mut x = old;
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            if self
                .state
                .compare_exchange_weak(old, x, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return x;
            }
        }
    }

    /// Random f64 in [0.0, 1.0)
    fn next_f64(&self) -> f64 {
        ((self.next() >> 11) as f64) / ((1u64 << 53) as f64)
    }
}

static JITTER_RNG: std::sync::LazyLock<Xorshift64> = std::sync::LazyLock::new(Xorshift64::new);

fn rand_jitter() -> f64 {
    JITTER_RNG.next_f64()
}

/// Configuration for exponential backoff with jitter
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Initial delay before first retry (e.g., 100ms)
    pub initial_delay: Duration,
    /// Maximum delay between retries (e.g., 30s)
    pub max_delay: Duration,
    /// Multiplier for each retry (e.g., 2.0 for doubling)
    pub multiplier: f64,
    /// Maximum number of retry attempts (0 = no retries, just initial attempt)
    pub max_attempts: u32,
    /// Jitter factor (0.0-1.0) - randomizes delay by +/- this percentage
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: 3,
            jitter_factor: 0.25,
        }
    }
}

impl BackoffConfig {
    /// Calculate delay for attempt n (0-indexed)
    ///
    /// Attempt 0 returns zero (no delay for first try).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.delay_for_attempt_with_jitter(attempt, rand_jitter())
    }

    /// Calculate delay with explicit jitter value in [0.0, 1.0]
    pub fn delay_for_attempt_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_us =
            self.initial_delay.as_micros() as f64 * self.multiplier.powi((attempt - 1) as i32);
        let base_us = base_us.min(self.max_delay.as_micros() as f64);

        // jitter in [0, 1] maps to an offset in [-range, +range]
        let jitter_range = base_us * self.jitter_factor;
        let jitter_offset = (jitter * 2.0 - 1.0) * jitter_range;
        let final_us = (base_us + jitter_offset).max(1.0);

        Duration::from_micros(final_us as u64)
    }
}

/// Sink wrapper that retries transient failures with exponential backoff
///
/// Retries are counted in `datashare_publish_retries_total`.
pub struct RetrySink {
    inner: Arc<dyn Sink>,
    config: BackoffConfig,
}

impl RetrySink {
    /// Wrap `inner` with the given retry policy
    pub fn new(inner: Arc<dyn Sink>, config: BackoffConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl Sink for RetrySink {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn publish(&self, publishing: &Publishing) -> Result<(), PluginError> {
        let mut last_error = None;

        for attempt in 0..=self.config.max_attempts {
            let delay = self.config.delay_for_attempt(attempt);
            if !delay.is_zero() {
                try_record_retry(self.inner.name());
                tracing::debug!(
                    sink = self.inner.name(),
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying publish"
                );
                tokio::time::sleep(delay).await;
            }

            match self.inner.publish(publishing).await {
                Ok(()) => {
                    if attempt > 0 {
                        tracing::info!(
                            sink = self.inner.name(),
                            attempt = attempt,
                            "publish recovered after retry"
                        );
                    }
                    return Ok(());
                }
                Err(e) if !e.is_transient() => {
                    tracing::warn!(sink = self.inner.name(), error = %e, "publish refused");
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        sink = self.inner.name(),
                        attempt = attempt,
                        max_attempts = self.config.max_attempts,
                        error = %e,
                        "publish failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| PluginError::Send("all retries exhausted".into())))
    }

    async fn health(&self) -> bool {
        self.inner.health().await
    }

    async fn shutdown(&self) -> Result<(), PluginError> {
        self.inner.shutdown().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use bytes::Bytes;
    use datashare_core::Uid;
    use std::sync::atomic::AtomicU32;

    /// Mock sink that fails N times then succeeds
    struct FailingSink {
        name: &'static str,
        fail_count: AtomicU32,
        max_failures: u32,
        call_count: AtomicU32,
        error: PluginError,
    }

    impl FailingSink {
        fn new(max_failures: u32) -> Self {
            Self::with_error(max_failures, PluginError::Connection("simulated failure".into()))
        }

        fn with_error(max_failures: u32, error: PluginError) -> Self {
            Self {
                name: "failing",
                fail_count: AtomicU32::new(0),
                max_failures,
                call_count: AtomicU32::new(0),
                error,
            }
        }

        fn named(mut self, name: &'static str) -> Self {
            self.name = name;
            self
        }

        fn calls(&self) -> u32 {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Sink for FailingSink {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn publish(&self, _: &Publishing) -> Result<(), PluginError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            let count = self.fail_count.fetch_add(1, Ordering::SeqCst);
            if count < self.max_failures {
                Err(self.error.clone())
            } else {
                Ok(())
            }
        }

        async fn health(&self) -> bool {
            true
        }
    }

    fn publishing() -> Publishing {
        Publishing {
            uid: Uid::new("u1").unwrap(),
            routing_key: "env.temperature".to_string(),
            body: Bytes::from_static(b"{}"),
            persistent: true,
        }
    }

    fn fast(max_attempts: u32) -> BackoffConfig {
        BackoffConfig {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            ..Default::default()
        }
    }

    #[test]
    fn test_backoff_attempt_zero_is_zero() {
        let config = BackoffConfig::default();
        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
    }

    #[test]
    fn test_backoff_exponential_growth() {
        let config = BackoffConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts: 10,
        };

        assert_eq!(config.delay_for_attempt_with_jitter(1, 0.5), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt_with_jitter(2, 0.5), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt_with_jitter(3, 0.5), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_caps_at_max() {
        let config = BackoffConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts: 10,
        };

        assert_eq!(config.delay_for_attempt_with_jitter(4, 0.5), Duration::from_millis(500));
        assert_eq!(config.delay_for_attempt_with_jitter(10, 0.5), Duration::from_millis(500));
    }

    #[test]
    fn test_backoff_jitter_range() {
        let config = BackoffConfig {
            jitter_factor: 0.25,
            ..Default::default()
        };

        assert_eq!(config.delay_for_attempt_with_jitter(1, 0.0), Duration::from_millis(75));
        assert_eq!(config.delay_for_attempt_with_jitter(1, 1.0), Duration::from_millis(125));
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_try() {
        let inner = Arc::new(FailingSink::new(0));
        let retry = RetrySink::new(inner.clone(), fast(3));

        assert!(retry.publish(&publishing()).await.is_ok());
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failure() {
        let inner = Arc::new(FailingSink::new(2));
        let retry = RetrySink::new(inner.clone(), fast(3));

        assert!(retry.publish(&publishing()).await.is_ok());
        assert_eq!(inner.calls(), 3);
    }

    #[tokio::test]
    async fn test_retries_counted_in_metrics() {
        let _ = Metrics::init();
        let inner = Arc::new(FailingSink::new(2).named("retry-counted"));
        let retry = RetrySink::new(inner, fast(3));

        assert!(retry.publish(&publishing()).await.is_ok());
        if let Some(metrics) = Metrics::get() {
            let retries = metrics
                .publish_retries
                .with_label_values(&["retry-counted"])
                .get();
            assert_eq!(retries, 2.0);
        }
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let inner = Arc::new(FailingSink::new(10));
        let retry = RetrySink::new(inner.clone(), fast(3));

        assert!(retry.publish(&publishing()).await.is_err());
        assert_eq!(inner.calls(), 4); // 1 initial + 3 retries
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let inner = Arc::new(FailingSink::with_error(
            10,
            PluginError::Init("exchange missing".into()),
        ));
        let retry = RetrySink::new(inner.clone(), fast(3));

        let err = retry.publish(&publishing()).await.unwrap_err();
        assert!(matches!(err, PluginError::Init(_)));
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test]
    async fn test_name_and_health_pass_through() {
        let retry = RetrySink::new(Arc::new(FailingSink::new(0)), BackoffConfig::default());
        assert_eq!(retry.name(), "failing");
        assert!(retry.health().await);
    }

    #[test]
    fn test_xorshift_f64_in_range() {
        let rng = Xorshift64::new();
        for _ in 0..1000 {
            let v = rng.next_f64();
            assert!((0.0..1.0).contains(&v), "value {v} out of range");
        }
    }
}
