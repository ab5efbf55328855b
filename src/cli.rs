//! CLI arguments and subcommands for herakles-workload-exporter.
//!
//! Flags given on the command line override the config file, which in turn
//! overrides the built-in defaults (see [`resolve_config`]).

use clap::{Parser, Subcommand, ValueEnum};
use herakles_workload_exporter::config::{load_config, Config, ConfigFormat};
use herakles_workload_exporter::export::ExporterMode;
use std::net::IpAddr;
use std::path::PathBuf;

/// Log level options for CLI parsing
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Main CLI arguments structure
#[derive(Parser, Debug)]
#[command(
    name = "herakles-workload-exporter",
    about = "Prometheus exporter for host CPU, load and process workload",
    long_about = "Prometheus exporter for host CPU, load and process workload.\n\n\
                  Samples system CPU utilization, load average and the top processes by memory \
                  or CPU on a fixed interval, and attaches a short syscall trace to processes \
                  that cross a usage threshold.",
    author = "Michael Moll <proc-mem@herakles.io> - Herakles IO",
    version,
    propagate_version = true,
    after_help = "Project: https://github.com/herakles-io/herakles-workload-exporter - More info: https://www.herakles.io"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// HTTP listen port
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Bind to specific interface/IP
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// Log level (overrides config)
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Config file (YAML/JSON/TOML)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Disable all config file loading
    #[arg(long)]
    pub no_config: bool,

    /// Print effective merged config and exit
    #[arg(long)]
    pub show_config: bool,

    /// Output format for --show-config
    #[arg(long, value_enum, default_value = "yaml")]
    pub config_format: ConfigFormat,

    /// Validate config and exit (return code 1 on error)
    #[arg(long)]
    pub check_config: bool,

    /// How metrics are published
    #[arg(long, value_enum)]
    pub exporter: Option<ExporterMode>,

    /// Pushgateway address used with --exporter pushgateway
    #[arg(long)]
    pub pushgateway_url: Option<String>,

    /// Maximum number of processes tracked per cycle
    #[arg(long, alias = "max-process-num")]
    pub max_processes: Option<usize>,

    /// Seconds between sampling cycles (1-60)
    #[arg(long)]
    pub scrape_interval: Option<u64>,

    /// Memory threshold in percent that triggers profiling
    #[arg(long)]
    pub mem_threshold: Option<f64>,

    /// CPU threshold in percent that triggers profiling
    #[arg(long)]
    pub cpu_threshold: Option<f64>,

    /// Never attach a tracer to high usage processes
    #[arg(long)]
    pub disable_profiling: bool,

    /// Disable /health endpoint
    #[arg(long)]
    pub disable_health: bool,

    /// Path to JSON test data file (uses synthetic data instead of /proc)
    #[arg(short = 't', long)]
    pub test_data_file: Option<PathBuf>,
}

/// Subcommands for additional functionality
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate configuration and system requirements
    Check {
        /// Check /proc filesystem
        #[arg(long)]
        proc: bool,

        /// Check tracer binary and privileges
        #[arg(long)]
        profiling: bool,

        /// Check all system requirements
        #[arg(long)]
        all: bool,
    },

    /// Generate configuration files
    Config {
        /// Output file path
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "yaml")]
        format: ConfigFormat,

        /// Include comments and examples
        #[arg(long)]
        commented: bool,
    },

    /// Run sampling cycles and print the results without serving
    Test {
        /// Number of test iterations
        #[arg(short = 'n', long, default_value_t = 1)]
        iterations: usize,

        /// Show every retained process
        #[arg(long)]
        verbose: bool,
    },

    /// Generate synthetic test data JSON file
    GenerateTestdata {
        /// Output file path
        #[arg(short = 'o', long, default_value = "testdata.json")]
        output: PathBuf,

        /// Number of processes to generate
        #[arg(long, default_value_t = 40)]
        count: usize,

        /// Number of processes above the profiling thresholds
        #[arg(long, default_value_t = 1)]
        anomalies: usize,
    },
}

/// Builds the effective config: CLI > config file > defaults.
pub fn resolve_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = if args.no_config {
        Config::default()
    } else {
        load_config(args.config.as_deref())?
    };

    if let Some(bind_ip) = args.bind {
        config.bind = Some(bind_ip.to_string());
    }
    if let Some(port) = args.port {
        config.port = Some(port);
    }
    if let Some(level) = args.log_level {
        config.log_level = Some(level.as_str().to_string());
    }
    if let Some(mode) = args.exporter {
        config.exporter = Some(mode);
    }
    if let Some(url) = &args.pushgateway_url {
        config.pushgateway_url = Some(url.clone());
    }
    if args.max_processes.is_some() {
        config.max_processes = args.max_processes;
    }
    if args.scrape_interval.is_some() {
        config.scrape_interval = args.scrape_interval;
    }
    if args.mem_threshold.is_some() {
        config.mem_threshold = args.mem_threshold;
    }
    if args.cpu_threshold.is_some() {
        config.cpu_threshold = args.cpu_threshold;
    }
    if args.disable_profiling {
        config.enable_profiling = Some(false);
    }
    if args.disable_health {
        config.enable_health = Some(false);
    }
    if let Some(path) = &args.test_data_file {
        config.test_data_file = Some(path.clone());
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_defaults() {
        let args = Args::parse_from([
            "herakles-workload-exporter",
            "--no-config",
            "--port",
            "9400",
            "--max-process-num",
            "200",
            "--scrape-interval",
            "30",
            "--disable-profiling",
        ]);
        let cfg = resolve_config(&args).unwrap();
        assert_eq!(cfg.port(), 9400);
        assert_eq!(cfg.max_processes(), 200);
        assert_eq!(cfg.scrape_interval().as_secs(), 30);
        assert!(!cfg.profiling_enabled());
        assert!(cfg.health_enabled());
    }

    #[test]
    fn test_cli_wins_over_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.yaml");
        std::fs::write(&path, "port: 9500\nscrape_interval: 20\n").unwrap();

        let args = Args::parse_from([
            "herakles-workload-exporter",
            "-c",
            path.to_str().unwrap(),
            "--scrape-interval",
            "5",
        ]);
        let cfg = resolve_config(&args).unwrap();
        assert_eq!(cfg.port(), 9500);
        assert_eq!(cfg.scrape_interval().as_secs(), 5);
    }

    #[test]
    fn test_subcommand_parsing() {
        let args = Args::parse_from(["herakles-workload-exporter", "test", "-n", "3"]);
        assert!(matches!(
            args.command,
            Some(Commands::Test { iterations: 3, .. })
        ));
    }
}
