//! Configuration display endpoint.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use herakles_workload_exporter::config::{render_config, ConfigFormat};
use tracing::{error, instrument};

use crate::state::SharedState;

/// Handler for the /config endpoint: the effective config as YAML.
#[instrument(skip(state))]
pub async fn config_handler(State(state): State<SharedState>) -> impl IntoResponse {
    state.health_stats.record_http_request();
    match render_config(&state.config, ConfigFormat::Yaml) {
        Ok(yaml) => (
            StatusCode::OK,
            [("Content-Type", "text/plain; charset=utf-8")],
            yaml,
        ),
        Err(e) => {
            error!("Failed to render config: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("Content-Type", "text/plain; charset=utf-8")],
                "Failed to render config".to_string(),
            )
        }
    }
}
