//! HTTP/WS surface the orchestrator's estimates are exposed through.
//!
//! Supplements spec.md's core pipeline (ingestion through publication)
//! with the minimal outer surface any long-running service in this
//! corpus carries: a health check and a push channel for subscribers,
//! grounded on `rust-backend/src/main.rs`'s `health_check` and
//! `websocket_handler`/`handle_socket`.

pub mod ws;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::oracle::update::{MempoolUpdate, OracleStats};

#[derive(Clone)]
pub struct AppState {
    pub updates: watch::Receiver<MempoolUpdate>,
    pub source_healthy: Arc<AtomicBool>,
    pub stats: Arc<OracleStats>,
    /// Renders the `metrics`-crate counters/gauges the pipeline records
    /// (spec.md §2.4 of SPEC_FULL.md) in Prometheus text format.
    pub metrics: PrometheusHandle,
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    source_healthy: bool,
    txs_ingested: u64,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/ws", get(ws::upgrade))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz(axum::extract::State(state): axum::extract::State<AppState>) -> axum::Json<HealthBody> {
    let source_healthy = state.source_healthy.load(Ordering::Relaxed);
    axum::Json(HealthBody {
        status: if source_healthy { "ok" } else { "degraded" },
        source_healthy,
        txs_ingested: state.stats.txs_ingested.load(Ordering::Relaxed),
    })
}

async fn metrics(axum::extract::State(state): axum::extract::State<AppState>) -> String {
    state.metrics.render()
}
