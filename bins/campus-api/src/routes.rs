use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::{handlers, metrics, AppState};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(metrics::metrics_handler))
        .route("/api/v1/exercises/execute", post(handlers::execute))
        .route("/api/v1/exercises/validate", post(handlers::validate))
        .route("/api/v1/exercises/submit", post(handlers::submit))
}
