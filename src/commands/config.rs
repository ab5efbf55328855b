//! Config file generation.

use herakles_workload_exporter::config::{render_config, Config, ConfigFormat};
use std::fs;
use std::path::PathBuf;

/// Writes the default configuration, to stdout when `output` is "-".
pub fn command_config(
    output: Option<PathBuf>,
    format: ConfigFormat,
    commented: bool,
) -> anyhow::Result<()> {
    let config = Config::default();
    let output = output.unwrap_or_else(|| PathBuf::from("herakles-workload-exporter.yaml"));

    let mut content = render_config(&config, format)?;
    if commented && format == ConfigFormat::Yaml {
        content = add_config_comments(content);
    }

    if output.to_string_lossy() == "-" {
        print!("{}", content);
    } else {
        fs::write(&output, content)?;
        println!("✅ Configuration written to: {}", output.display());
    }

    Ok(())
}

/// Adds comments to YAML configuration
fn add_config_comments(yaml: String) -> String {
    let comments = r#"# Herakles Workload Exporter Configuration
# =========================================
#
# Server
# ------
# bind: "0.0.0.0"                 # Bind IP (0.0.0.0 = all interfaces)
# port: 9216                      # HTTP port
# tls_cert: null                  # PEM certificate, enables HTTPS with tls_key
# tls_key: null                   # PEM private key
#
# Publication
# -----------
# exporter: expose                # expose (scraped) or pushgateway (pushed)
# pushgateway_url: null           # e.g. "http://pushgateway:9091"
# pushgateway_job: herakles_workload_exporter
#
# Sampling
# --------
# max_processes: 50               # Processes tracked per cycle (max 2000)
# scrape_interval: 10             # Seconds between cycles (1-60)
# cpu_settle_ms: 2000             # Gap between the two /proc/stat snapshots
# top_n: 10                       # Ranks exported as process_workload_usage
# rank_by: pss                    # pss, uss, rss or cpu
# test_data_file: null            # JSON process records instead of /proc
# parallelism: null               # Threads for the /proc scan (null = auto)
#
# Anomaly Detection & Profiling
# -----------------------------
# mem_threshold: 50.0             # USS percent of RAM that triggers profiling
# cpu_threshold: 40.0             # CPU percent that triggers profiling
# enable_profiling: true          # Attach strace to anomalous processes
# tracer_path: strace
# attach_secs: 5                  # Tracing window per process
# report_dir: /var/log/herakles   # exporter_strace_<pid>.log reports
# profile_cooldown_secs: null     # null = profile each pid only once
#
# Feature Flags
# -------------
# enable_health: true             # Enable /health endpoint
#
# Logging
# -------
# log_level: "info"               # off, error, warn, info, debug, trace
# log_format: text                # text or json
# enable_file_logging: false
# log_file: null
"#;

    format!("{comments}\n{yaml}")
}
