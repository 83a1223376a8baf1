use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    pub(crate) status: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MetricsResponse {
    pub(crate) active_documents: usize,
    pub(crate) active_connections: usize,
    pub(crate) ops_per_minute: usize,
}

pub(crate) async fn healthz_handler() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

pub(crate) async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(MetricsResponse {
        active_documents: state.registry.len(),
        active_connections: state.metrics.active_connections(),
        ops_per_minute: state.metrics.ops_per_minute(),
    })
}

pub(crate) async fn fallback_handler() -> impl IntoResponse {
    StatusCode::NOT_FOUND
}
