use axum::{Router, routing::get};

use crate::{http, socket, state::AppState};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/realtime", get(socket::ws_handler))
        .route("/metrics", get(http::metrics_handler))
        .route("/healthz", get(http::healthz_handler))
        .fallback(http::fallback_handler)
        .with_state(state)
}
