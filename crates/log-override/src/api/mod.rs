use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod admission_review;
mod api_error;
mod handlers;
mod service;
pub mod state;

use handlers::{healthz_handler, mutate_handler, readiness_handler};
use state::ApiServerState;

/// Build the router exposing the admission endpoint and the probes
pub fn router(state: Arc<ApiServerState>) -> Router {
    Router::new()
        .route("/mutate", post(mutate_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readiness", get(readiness_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
