// Prometheus metrics for the grading API

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};

lazy_static! {
    pub static ref GRADING_REQUESTS: IntCounterVec = register_int_counter_vec!(
        "campus_grading_requests_total",
        "Grading requests by verb and outcome",
        &["verb", "outcome"]
    )
    .unwrap();
    pub static ref GRADING_DURATION: HistogramVec = register_histogram_vec!(
        "campus_grading_duration_seconds",
        "Wall-clock grading duration by verb",
        &["verb"]
    )
    .unwrap();
}

pub fn observe(verb: &str, outcome: &str) {
    GRADING_REQUESTS.with_label_values(&[verb, outcome]).inc();
}

/// GET /metrics - Prometheus text exposition
pub async fn metrics_handler() -> Response {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {e}"),
        )
            .into_response();
    }
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}
