//! Metrics endpoint handler for Prometheus scraping.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use prometheus::{Encoder, TextEncoder};
use tracing::{debug, error, instrument};

use crate::state::SharedState;

/// Buffer capacity for metrics encoding.
const BUFFER_CAP: usize = 64 * 1024;

/// Error type for metrics endpoint failures.
#[derive(Debug)]
pub enum MetricsError {
    EncodingFailed,
}

impl IntoResponse for MetricsError {
    fn into_response(self) -> axum::response::Response {
        (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
    }
}

/// Handler for the /metrics endpoint.
///
/// Serves whatever the last completed cycle wrote; scraping never triggers
/// sampling.
#[instrument(skip(state))]
pub async fn metrics_handler(
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, MetricsError> {
    state.health_stats.record_http_request();

    let families = state.registry.gather();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::with_capacity(BUFFER_CAP);
    encoder.encode(&families, &mut buffer).map_err(|e| {
        error!("Failed to encode metrics: {}", e);
        MetricsError::EncodingFailed
    })?;

    debug!(families = families.len(), bytes = buffer.len(), "Served /metrics");
    Ok((
        [("Content-Type", encoder.format_type().to_string())],
        buffer,
    ))
}
