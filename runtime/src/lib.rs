//! datashare runtime - process wiring for the broker
//!
//! Provides [`run()`] for zero-boilerplate startup, and [`RuntimeBuilder`]
//! for callers who need control over configuration or the metrics server.
//!
//! # Quick start
//!
//! ```ignore
//! use datashare_runtime::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     datashare_runtime::run(|broker| async move {
//!         Ok(broker
//!             .local_sink(StdoutSink::new("data.topic"))
//!             .upstream_sink(StdoutSink::new("to-beehive")))
//!     }).await
//! }
//! ```

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

pub mod prelude;

use datashare_broker::config::{BrokerConfig, LogFormat};
use datashare_broker::metrics::Metrics;
use datashare_broker::metrics_server::MetricsServer;
use datashare_broker::Broker;
use std::future::Future;
use std::net::SocketAddr;
use tokio::signal;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Run the broker with default settings.
///
/// Loads configuration from `DATASHARE_*` environment variables, initialises
/// tracing and metrics, calls your closure to attach sinks and sources, then
/// runs until the sources are exhausted or SIGINT/SIGTERM arrives.
pub async fn run<F, Fut>(configure: F) -> anyhow::Result<()>
where
    F: FnOnce(Broker) -> Fut,
    Fut: Future<Output = anyhow::Result<Broker>>,
{
    RuntimeBuilder::new().configure(configure).await
}

/// Builder for controlling runtime behaviour.
///
/// ```ignore
/// RuntimeBuilder::new()
///     .metrics_addr("127.0.0.1:9191".parse()?)
///     .configure(|broker| async move { Ok(broker.local_sink(..).upstream_sink(..)) })
///     .await
/// ```
pub struct RuntimeBuilder {
    config: Option<BrokerConfig>,
    metrics_addr: Option<SocketAddr>,
    metrics_enabled: bool,
}

impl RuntimeBuilder {
    /// Create a builder that reads its configuration from the environment.
    pub fn new() -> Self {
        Self {
            config: None,
            metrics_addr: None,
            metrics_enabled: true,
        }
    }

    /// Use `config` instead of reading the environment.
    pub fn config(mut self, config: BrokerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Override the metrics HTTP listen address.
    ///
    /// Default: `DATASHARE_METRICS_ADDR`, or `0.0.0.0:9090`.
    pub fn metrics_addr(mut self, addr: SocketAddr) -> Self {
        self.metrics_addr = Some(addr);
        self
    }

    /// Do not start the metrics HTTP server.
    ///
    /// Metrics are still registered and counted.
    pub fn disable_metrics_server(mut self) -> Self {
        self.metrics_enabled = false;
        self
    }

    /// Configure the broker and run it to completion.
    pub async fn configure<F, Fut>(self, configure: F) -> anyhow::Result<()>
    where
        F: FnOnce(Broker) -> Fut,
        Fut: Future<Output = anyhow::Result<Broker>>,
    {
        // ── 1. Load config ───────────────────────────────────────
        let config = match self.config {
            Some(config) => config,
            None => BrokerConfig::from_env()?,
        };

        // ── 2. Init tracing ──────────────────────────────────────
        init_tracing(&config);

        let metrics_addr = self.metrics_addr.unwrap_or(config.metrics_addr);
        info!(
            node = %config.node.node,
            vsn = %config.node.vsn,
            shards = config.shards,
            pod_state_expire_secs = config.pod_state_expire_duration.as_secs(),
            ontology_strict = config.ontology_strict,
            upstream_format = ?config.upstream_format,
            "Starting datashare"
        );

        // ── 3. Init metrics + HTTP server ────────────────────────
        Metrics::init()?;
        let metrics_handle = if self.metrics_enabled {
            info!(%metrics_addr, "Metrics server started");
            Some(MetricsServer::start(metrics_addr, config.node.clone()))
        } else {
            None
        };

        // ── 4. Caller attaches sinks and sources ─────────────────
        let broker = configure(Broker::new(config)).await?;

        // ── 5. Run until input ends or a signal arrives ──────────
        let (handle, runner) = broker.build()?;
        drop(handle);
        runner.run_until(shutdown_signal()).await?;

        // ── 6. Shutdown ──────────────────────────────────────────
        if let Some(handle) = metrics_handle {
            handle.abort();
        }
        info!("datashare shutdown complete");

        Ok(())
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Initialise the tracing subscriber based on config.
///
/// `RUST_LOG` overrides the configured level. A subscriber installed
/// earlier by the host process is left in place.
fn init_tracing(config: &BrokerConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.log_level.clone().into());

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = ?e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = ?e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
