//! Configuration file model, loading and validation.
//!
//! Every field is optional so a file only needs to name what it changes;
//! the accessor methods apply the built-in defaults.

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::export::ExporterMode;
use crate::process::RankBy;
use crate::profiler::{DEFAULT_CPU_THRESHOLD, DEFAULT_MEM_THRESHOLD};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 9216;
pub const DEFAULT_MAX_PROCESSES: usize = 50;
/// Hard ceiling on tracked processes.
pub const MAX_PROCESSES_LIMIT: usize = 2000;
pub const DEFAULT_SCRAPE_INTERVAL: u64 = 10;
pub const DEFAULT_CPU_SETTLE_MS: u64 = 2000;
pub const DEFAULT_TOP_N: usize = 10;
pub const DEFAULT_TRACER: &str = "strace";
pub const DEFAULT_ATTACH_SECS: u64 = 5;
pub const DEFAULT_REPORT_DIR: &str = "/var/log/herakles";
pub const DEFAULT_PUSHGATEWAY_JOB: &str = "herakles_workload_exporter";

const DEFAULT_CONFIG_PATHS: [&str; 6] = [
    "/etc/herakles/workload-exporter.yaml",
    "/etc/herakles/workload-exporter.yml",
    "/etc/herakles/workload-exporter.json",
    "./herakles-workload-exporter.yaml",
    "./herakles-workload-exporter.yml",
    "./herakles-workload-exporter.json",
];

/// Output format for rendered configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    // Server configuration
    pub port: Option<u16>,
    pub bind: Option<String>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,

    // Publication
    pub exporter: Option<ExporterMode>,
    #[serde(alias = "pushgateway-url")]
    pub pushgateway_url: Option<String>,
    #[serde(alias = "pushgateway-job")]
    pub pushgateway_job: Option<String>,

    // Sampling
    #[serde(alias = "max-process-num", alias = "max-processes")]
    pub max_processes: Option<usize>,
    #[serde(alias = "scrape-interval")]
    pub scrape_interval: Option<u64>,
    #[serde(alias = "cpu-settle-ms")]
    pub cpu_settle_ms: Option<u64>,
    #[serde(alias = "top-n")]
    pub top_n: Option<usize>,
    #[serde(alias = "rank-by")]
    pub rank_by: Option<RankBy>,
    pub test_data_file: Option<PathBuf>,
    pub parallelism: Option<usize>,

    // Anomaly detection and profiling
    #[serde(alias = "mem-threshold")]
    pub mem_threshold: Option<f64>,
    #[serde(alias = "cpu-threshold")]
    pub cpu_threshold: Option<f64>,
    pub enable_profiling: Option<bool>,
    pub tracer_path: Option<PathBuf>,
    pub attach_secs: Option<u64>,
    pub report_dir: Option<PathBuf>,
    /// Unset means a pid is never profiled twice. Counted from the end of the previous attempt.
    pub profile_cooldown_secs: Option<u64>,

    // Feature flags
    pub enable_health: Option<bool>,

    // Logging
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub enable_file_logging: Option<bool>,
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: Some(DEFAULT_PORT),
            bind: Some(DEFAULT_BIND_ADDR.to_string()),
            tls_cert: None,
            tls_key: None,
            exporter: Some(ExporterMode::Expose),
            pushgateway_url: None,
            pushgateway_job: Some(DEFAULT_PUSHGATEWAY_JOB.to_string()),
            max_processes: Some(DEFAULT_MAX_PROCESSES),
            scrape_interval: Some(DEFAULT_SCRAPE_INTERVAL),
            cpu_settle_ms: Some(DEFAULT_CPU_SETTLE_MS),
            top_n: Some(DEFAULT_TOP_N),
            rank_by: Some(RankBy::Pss),
            test_data_file: None,
            parallelism: None,
            mem_threshold: Some(DEFAULT_MEM_THRESHOLD),
            cpu_threshold: Some(DEFAULT_CPU_THRESHOLD),
            enable_profiling: Some(true),
            tracer_path: Some(PathBuf::from(DEFAULT_TRACER)),
            attach_secs: Some(DEFAULT_ATTACH_SECS),
            report_dir: Some(PathBuf::from(DEFAULT_REPORT_DIR)),
            profile_cooldown_secs: None,
            enable_health: Some(true),
            log_level: Some("info".into()),
            log_format: Some(LogFormat::Text),
            enable_file_logging: Some(false),
            log_file: None,
        }
    }
}

impl Config {
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    pub fn bind(&self) -> &str {
        self.bind.as_deref().unwrap_or(DEFAULT_BIND_ADDR)
    }

    pub fn exporter(&self) -> ExporterMode {
        self.exporter.unwrap_or_default()
    }

    pub fn pushgateway_job(&self) -> &str {
        self.pushgateway_job.as_deref().unwrap_or(DEFAULT_PUSHGATEWAY_JOB)
    }

    pub fn max_processes(&self) -> usize {
        self.max_processes.unwrap_or(DEFAULT_MAX_PROCESSES)
    }

    pub fn scrape_interval(&self) -> Duration {
        Duration::from_secs(self.scrape_interval.unwrap_or(DEFAULT_SCRAPE_INTERVAL))
    }

    pub fn cpu_settle(&self) -> Duration {
        Duration::from_millis(self.cpu_settle_ms.unwrap_or(DEFAULT_CPU_SETTLE_MS))
    }

    pub fn top_n(&self) -> usize {
        self.top_n.unwrap_or(DEFAULT_TOP_N)
    }

    pub fn rank_by(&self) -> RankBy {
        self.rank_by.unwrap_or_default()
    }

    pub fn mem_threshold(&self) -> f64 {
        self.mem_threshold.unwrap_or(DEFAULT_MEM_THRESHOLD)
    }

    pub fn cpu_threshold(&self) -> f64 {
        self.cpu_threshold.unwrap_or(DEFAULT_CPU_THRESHOLD)
    }

    pub fn profiling_enabled(&self) -> bool {
        self.enable_profiling.unwrap_or(true)
    }

    pub fn tracer_path(&self) -> PathBuf {
        self.tracer_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_TRACER))
    }

    pub fn attach(&self) -> Duration {
        Duration::from_secs(self.attach_secs.unwrap_or(DEFAULT_ATTACH_SECS))
    }

    pub fn report_dir(&self) -> PathBuf {
        self.report_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_REPORT_DIR))
    }

    pub fn profile_cooldown(&self) -> Option<Duration> {
        self.profile_cooldown_secs.map(Duration::from_secs)
    }

    pub fn health_enabled(&self) -> bool {
        self.enable_health.unwrap_or(true)
    }

    pub fn log_format(&self) -> LogFormat {
        self.log_format.unwrap_or_default()
    }
}

/// Validate effective config (used by --check-config and at startup)
pub fn validate_effective_config(cfg: &Config) -> anyhow::Result<()> {
    if cfg.exporter() == ExporterMode::Pushgateway
        && cfg.pushgateway_url.as_deref().map_or(true, str::is_empty)
    {
        bail!("exporter is 'pushgateway' but no pushgateway_url is set");
    }

    let max = cfg.max_processes();
    if max == 0 || max > MAX_PROCESSES_LIMIT {
        bail!("max_processes must be between 1 and {MAX_PROCESSES_LIMIT}, got {max}");
    }

    let interval = cfg.scrape_interval.unwrap_or(DEFAULT_SCRAPE_INTERVAL);
    if !(1..=60).contains(&interval) {
        bail!("scrape_interval must be between 1 and 60 seconds, got {interval}");
    }

    let settle = cfg.cpu_settle();
    if settle.is_zero() || settle >= Duration::from_secs(60) {
        bail!(
            "cpu_settle_ms must be between 1 and 59999, got {}",
            settle.as_millis()
        );
    }

    for (name, value) in [
        ("mem_threshold", cfg.mem_threshold()),
        ("cpu_threshold", cfg.cpu_threshold()),
    ] {
        if !(value > 0.0 && value <= 100.0) {
            bail!("{name} must be within (0, 100], got {value}");
        }
    }

    if cfg.attach().is_zero() {
        bail!("attach_secs must be greater than 0");
    }

    if cfg.top_n() == 0 {
        bail!("top_n must be greater than 0");
    }

    if cfg.tls_cert.is_some() != cfg.tls_key.is_some() {
        bail!("tls_cert and tls_key must be set together");
    }

    if cfg.enable_file_logging.unwrap_or(false) && cfg.log_file.is_none() {
        bail!("enable_file_logging is set but no log_file is configured");
    }

    Ok(())
}

/// Loads a config file, or the first default location that exists.
///
/// Without any file the built-in defaults are returned.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match DEFAULT_CONFIG_PATHS
            .iter()
            .map(Path::new)
            .find(|p| p.exists())
        {
            Some(p) => p.to_path_buf(),
            None => return Ok(Config::default()),
        },
    };

    let content = fs::read_to_string(&path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let config = parse_config(&content, &path)?;
    info!("Loaded configuration from: {}", path.display());
    Ok(config)
}

/// Parses config content, picking the format from the file extension.
pub fn parse_config(content: &str, path: &Path) -> anyhow::Result<Config> {
    let config = match path.extension().and_then(|s| s.to_str()) {
        Some("json") => serde_json::from_str(content)
            .with_context(|| format!("parsing JSON config {}", path.display()))?,
        Some("toml") => toml::from_str(content)
            .with_context(|| format!("parsing TOML config {}", path.display()))?,
        _ => serde_yaml::from_str(content)
            .with_context(|| format!("parsing YAML config {}", path.display()))?,
    };
    Ok(config)
}

/// Renders configuration in the requested format.
pub fn render_config(config: &Config, format: ConfigFormat) -> anyhow::Result<String> {
    let output = match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Toml => toml::to_string_pretty(config)?,
        ConfigFormat::Yaml => serde_yaml::to_string(config)?,
    };
    Ok(output)
}
