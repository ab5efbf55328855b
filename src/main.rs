//! herakles-workload-exporter binary: config resolution, subcommands, the
//! sampling scheduler and the HTTP server.

mod cli;
mod commands;
mod handlers;
mod logging;
mod state;

use anyhow::Context;
use axum::{routing::get, Router};
use clap::Parser;
use herakles_workload_exporter::config::{render_config, validate_effective_config};
use herakles_workload_exporter::export::ExporterMode;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::cli::{resolve_config, Args, Commands};
use crate::commands::{command_check, command_config, command_generate_testdata, command_test};
use crate::handlers::{config_handler, health_handler, metrics_handler};
use crate::logging::setup_logging;
use crate::state::AppState;

/// Time in-flight HTTP requests get to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.show_config || args.check_config {
        let config = resolve_config(&args)?;

        if args.check_config {
            if let Err(e) = validate_effective_config(&config) {
                eprintln!("❌ Configuration invalid: {:#}", e);
                std::process::exit(1);
            }
            println!("✅ Configuration is valid");
            return Ok(());
        }

        println!("{}", render_config(&config, args.config_format)?);
        return Ok(());
    }

    if let Some(command) = &args.command {
        let config = resolve_config(&args)?;

        return match command {
            Commands::Check {
                proc,
                profiling,
                all,
            } => command_check(*proc, *profiling, *all, &config),
            Commands::Config {
                output,
                format,
                commented,
            } => command_config(output.clone(), *format, *commented),
            Commands::Test {
                iterations,
                verbose,
            } => {
                validate_effective_config(&config)?;
                command_test(*iterations, *verbose, &config).await
            }
            Commands::GenerateTestdata {
                output,
                count,
                anomalies,
            } => command_generate_testdata(output.clone(), *count, *anomalies, &config),
        };
    }

    let config = resolve_config(&args)?;
    if let Err(e) = validate_effective_config(&config) {
        eprintln!("❌ Configuration invalid: {:#}", e);
        std::process::exit(1);
    }

    setup_logging(&config)?;
    info!("Starting herakles-workload-exporter");

    if let Some(threads) = config.parallelism.filter(|t| *t > 0) {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .unwrap_or_else(|e| error!("Failed to set rayon thread pool: {}", e));
        debug!("Rayon thread pool configured with {} threads", threads);
    }

    let state = Arc::new(AppState::from_config(config)?);

    // Flipped once on SIGINT/SIGTERM; the scheduler and the server both watch it.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = Arc::clone(&state.scheduler);
    let mut scheduler_rx = shutdown_rx.clone();
    let scheduler_task = tokio::spawn(async move {
        scheduler
            .run(async move {
                let _ = scheduler_rx.wait_for(|stop| *stop).await;
            })
            .await;
    });

    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    match state.config.exporter() {
        ExporterMode::Expose => serve(Arc::clone(&state), shutdown_rx).await?,
        ExporterMode::Pushgateway => {
            info!(
                url = state.config.pushgateway_url.as_deref().unwrap_or_default(),
                "Pushing metrics after every cycle, HTTP server disabled"
            );
            let mut rx = shutdown_rx;
            let _ = rx.wait_for(|stop| *stop).await;
        }
    }

    if let Err(e) = scheduler_task.await {
        error!("Scheduler task failed: {}", e);
    }

    info!("herakles-workload-exporter stopped gracefully");
    Ok(())
}

/// Serves the HTTP endpoints until the shutdown flag flips.
async fn serve(state: Arc<AppState>, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", state.config.bind(), state.config.port())
        .parse()
        .context("invalid bind address")?;

    let mut app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/config", get(config_handler));
    if state.config.health_enabled() {
        app = app.route("/health", get(health_handler));
    }
    let app = app.with_state(Arc::clone(&state));

    match (&state.config.tls_cert, &state.config.tls_key) {
        (Some(cert), Some(key)) => {
            let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key)
                .await
                .context("loading TLS certificate and key")?;
            let handle = axum_server::Handle::new();
            let shutdown_handle = handle.clone();
            tokio::spawn(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
                shutdown_handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
            });

            info!("herakles-workload-exporter listening on https://{}", addr);
            axum_server::bind_rustls(addr, tls)
                .handle(handle)
                .serve(app.into_make_service())
                .await
                .context("HTTPS server error")?;
        }
        _ => {
            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("binding {addr}"))?;
            info!("herakles-workload-exporter listening on http://{}", addr);
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown.wait_for(|stop| *stop).await;
                })
                .await
                .context("HTTP server error")?;
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }
}
