//! HTTP server for Prometheus metrics and health
//!
//! # Endpoints
//!
//! - `GET /metrics` - Prometheus metrics
//! - `GET /health` - JSON health summary
//!
//! # Example
//!
//! ```ignore
//! use datashare_broker::metrics_server::MetricsServer;
//!
//! let metrics_handle = MetricsServer::start(config.metrics_addr, config.node.clone());
//! ```

use crate::config::NodeIdentity;
use axum::extract::State;
use axum::{http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared state for the metrics server
#[derive(Clone)]
struct AppState {
    node: Arc<NodeIdentity>,
}

/// Metrics HTTP server
pub struct MetricsServer;

impl MetricsServer {
    /// Start the metrics server on `addr`
    ///
    /// Returns a JoinHandle that can be used to abort the server.
    /// The server runs until aborted or the process exits.
    pub fn start(addr: SocketAddr, node: NodeIdentity) -> JoinHandle<()> {
        let state = AppState {
            node: Arc::new(node),
        };

        tokio::spawn(async move {
            let app = router(state);

            info!(%addr, "Metrics server starting");

            let listener = match tokio::net::TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(e) => {
                    error!(error = %e, %addr, "Failed to bind metrics server");
                    return;
                }
            };

            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "Metrics server error");
            }
        })
    }
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Handler for /metrics endpoint
async fn metrics_handler() -> impl IntoResponse {
    let body = crate::metrics::gather();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

#[derive(serde::Serialize)]
struct HealthSummary<'a> {
    status: &'static str,
    node: &'a str,
    vsn: &'a str,
    backlog: f64,
    sinks: SinksSummary,
}

#[derive(serde::Serialize)]
struct SinksSummary {
    healthy_count: usize,
    unhealthy_count: usize,
}

/// Handler for /health endpoint
///
/// `unhealthy` (503) when every sink is down, `degraded` when some are.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let Some(metrics) = crate::metrics::Metrics::get() else {
        return (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))).into_response();
    };

    let (healthy, unhealthy) = metrics.sink_health_counts();
    let status = if unhealthy > 0 && healthy == 0 {
        "unhealthy"
    } else if unhealthy > 0 {
        "degraded"
    } else {
        "healthy"
    };

    let summary = HealthSummary {
        status,
        node: &state.node.node,
        vsn: &state.node.vsn,
        backlog: metrics.total_backlog(),
        sinks: SinksSummary {
            healthy_count: healthy,
            unhealthy_count: unhealthy,
        },
    };

    let code = match status {
        "unhealthy" => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };

    (code, Json(summary)).into_response()
}
