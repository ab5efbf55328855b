//! Health check endpoint handler.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use std::fmt::Write as FmtWrite;
use tracing::{debug, instrument};

use crate::state::SharedState;

/// Footer text for human-readable HTTP endpoints.
pub const FOOTER_TEXT: &str = "Project: https://github.com/herakles-io/herakles-workload-exporter - More info: https://www.herakles.io";

/// Handler for the /health endpoint.
///
/// Returns 503 until the first cycle completed.
#[instrument(skip(state))]
pub async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    state.health_stats.record_http_request();

    let (status, message) = if state.health_stats.completed_cycles() > 0 {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Waiting for first sampling cycle")
    };

    let table = state.health_stats.render_table();
    let samplers = render_samplers(&state);

    debug!("Health check: {} - {}", status, message);
    (
        status,
        [("Content-Type", "text/plain; charset=utf-8")],
        format!("{message}\n\n{table}\n{samplers}\n{FOOTER_TEXT}"),
    )
}

fn render_samplers(state: &SharedState) -> String {
    let samplers = state.scheduler.samplers();
    let mut out = String::new();
    writeln!(out, "SAMPLERS").ok();
    writeln!(out, "========").ok();
    for switch in [
        samplers.cpu.switch(),
        samplers.load.switch(),
        samplers.process.switch(),
    ] {
        let status = if switch.is_enabled() { "enabled" } else { "disabled" };
        writeln!(out, "{:10} | {}", switch.name(), status).ok();
    }
    writeln!(out).ok();
    match &state.profiler {
        Some(profiler) => writeln!(
            out,
            "profiling: enabled ({} processes profiled)",
            profiler.profiled().len()
        ),
        None => writeln!(out, "profiling: disabled"),
    }
    .ok();
    out
}
