//! Application state shared by the HTTP handlers, the scheduler and the
//! subcommands.

use anyhow::Context;
use herakles_workload_exporter::config::Config;
use herakles_workload_exporter::cpu::{CpuSampler, ProcStatSource};
use herakles_workload_exporter::export::{ExporterMode, Publisher, PullPublisher, PushGatewayPublisher};
use herakles_workload_exporter::load::{LoadSampler, ProcLoadAvgSource};
use herakles_workload_exporter::process::{
    own_process_name, JsonFileSource, ProcessSampler, ProcessSamplerOptions, ProcessSource,
    ProcfsSource,
};
use herakles_workload_exporter::profiler::{
    check_tracing_support, Profiler, ProfilerOptions, StraceTracer, Thresholds,
};
use herakles_workload_exporter::scheduler::{Samplers, Scheduler};
use herakles_workload_exporter::system;
use herakles_workload_exporter::{HealthStats, WorkloadMetrics};
use prometheus::Registry;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Type alias for shared application state.
pub type SharedState = Arc<AppState>;

/// Global application state shared across requests and background tasks.
pub struct AppState {
    pub registry: Registry,
    pub config: Arc<Config>,
    pub health_stats: Arc<HealthStats>,
    pub scheduler: Arc<Scheduler>,
    pub profiler: Option<Arc<Profiler>>,
}

impl AppState {
    /// Wires sources, samplers, profiler and publisher from the effective config.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let registry = Registry::new();

        let cores = system::physical_core_count().unwrap_or_else(|e| {
            warn!("Failed to read physical core count, assuming 1: {}", e);
            1
        });
        let metrics = WorkloadMetrics::new(&registry, cores).context("registering metrics")?;
        debug!(cores, "Prometheus registry initialized");

        let profiler = if config.profiling_enabled() {
            match check_tracing_support() {
                Ok(()) => Some(Arc::new(Profiler::new(
                    Arc::new(StraceTracer::new(config.tracer_path())),
                    ProfilerOptions {
                        attach: config.attach(),
                        report_dir: config.report_dir(),
                        cooldown: config.profile_cooldown(),
                    },
                    metrics.clone(),
                ))),
                Err(e) => {
                    warn!("Syscall profiling disabled: {}", e);
                    None
                }
            }
        } else {
            info!("Syscall profiling disabled by configuration");
            None
        };

        let source: Arc<dyn ProcessSource> = match &config.test_data_file {
            Some(path) => {
                info!("Using test data file: {}", path.display());
                Arc::new(JsonFileSource::new(path))
            }
            None => Arc::new(ProcfsSource::new(system::PROC_ROOT)),
        };

        let samplers = Samplers {
            cpu: Arc::new(CpuSampler::new(
                Arc::new(ProcStatSource),
                config.cpu_settle(),
                metrics.clone(),
            )),
            load: Arc::new(LoadSampler::new(Arc::new(ProcLoadAvgSource), metrics.clone())),
            process: Arc::new(ProcessSampler::new(
                source,
                ProcessSamplerOptions {
                    limit: config.max_processes(),
                    top_n: config.top_n(),
                    rank_by: config.rank_by(),
                    thresholds: Thresholds {
                        mem_percent: config.mem_threshold(),
                        cpu_percent: config.cpu_threshold(),
                    },
                    excluded: own_process_name(),
                },
                profiler.clone(),
                metrics.clone(),
            )),
        };

        let publisher: Arc<dyn Publisher> = match config.exporter() {
            ExporterMode::Expose => Arc::new(PullPublisher),
            ExporterMode::Pushgateway => {
                let url = config
                    .pushgateway_url
                    .clone()
                    .context("pushgateway exporter requires pushgateway_url")?;
                Arc::new(PushGatewayPublisher::new(url, config.pushgateway_job()))
            }
        };

        let health_stats = Arc::new(HealthStats::new());
        let scheduler = Arc::new(Scheduler::new(
            samplers,
            metrics,
            registry.clone(),
            publisher,
            Arc::clone(&health_stats),
            config.scrape_interval(),
        ));

        Ok(Self {
            registry,
            config: Arc::new(config),
            health_stats,
            scheduler,
            profiler,
        })
    }
}
