//! Stats HTTP endpoint.
//!
//! Liveness probe plus a JSON dump of the ingest counters and build identity.

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};

use crate::metrics::{BUILD_VERSION, IngestMetrics, MetricsSnapshot};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub metrics: Arc<IngestMetrics>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(metrics: Arc<IngestMetrics>) -> Self {
        Self {
            metrics,
            started_at: Utc::now(),
        }
    }
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// `/debug/vars` payload.
#[derive(Debug, Serialize)]
pub struct DebugVars {
    #[serde(rename = "BuildVersion")]
    pub build_version: &'static str,
    #[serde(rename = "StartTime")]
    pub start_time: DateTime<Utc>,
    #[serde(rename = "UptimeSeconds")]
    pub uptime_seconds: i64,
    #[serde(flatten)]
    pub counters: MetricsSnapshot,
}

/// Create the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/debug/vars", get(debug_vars_handler))
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
        .with_state(Arc::new(state))
}

/// Liveness probe.
async fn healthz_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn debug_vars_handler(State(state): State<Arc<AppState>>) -> Json<DebugVars> {
    let now = Utc::now();
    Json(DebugVars {
        build_version: BUILD_VERSION,
        start_time: state.started_at,
        uptime_seconds: (now - state.started_at).num_seconds(),
        counters: state.metrics.snapshot(),
    })
}
