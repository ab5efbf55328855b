//! Generate testdata command implementation.
//!
//! Writes synthetic process records usable with `--test-data-file`.

use chrono::Utc;
use herakles_workload_exporter::config::Config;
use herakles_workload_exporter::process::ProcessRecord;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::debug;

/// Program paths used for generated records.
const PROGRAMS: [&str; 12] = [
    "/usr/sbin/nginx",
    "/usr/bin/httpd",
    "/usr/lib/postgresql/16/bin/postgres",
    "/usr/sbin/mysqld",
    "/usr/bin/redis-server",
    "/usr/bin/java",
    "/usr/bin/python3",
    "/usr/bin/node",
    "/usr/sbin/sshd",
    "/usr/lib/systemd/systemd-journald",
    "/usr/bin/dockerd",
    "/bin/bash",
];

/// Root structure for test data JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestData {
    pub version: String,
    pub generated_at: String,
    pub processes: Vec<ProcessRecord>,
}

/// Generates synthetic test data JSON file for testing purposes.
///
/// `anomalies` of the records are placed above the configured memory
/// threshold; the rest stay well below both thresholds.
pub fn command_generate_testdata(
    output: PathBuf,
    count: usize,
    anomalies: usize,
    config: &Config,
) -> anyhow::Result<()> {
    debug!(
        "Generating test data: count={}, anomalies={}, output={}",
        count,
        anomalies,
        output.display()
    );

    let test_data = generate_test_data(&mut rand::thread_rng(), count, anomalies, config);

    let json_content = serde_json::to_string_pretty(&test_data)?;
    fs::write(&output, &json_content)?;

    println!(
        "✅ Generated test data: {} processes in {}",
        test_data.processes.len(),
        output.display()
    );
    Ok(())
}

fn generate_test_data(rng: &mut impl Rng, count: usize, anomalies: usize, config: &Config) -> TestData {
    let mem_threshold = config.mem_threshold();
    let cpu_threshold = config.cpu_threshold();

    let mut processes: Vec<ProcessRecord> = (0..count)
        .map(|i| {
            let pid = 1000 + i as u32;
            let command = PROGRAMS.choose(rng).copied().unwrap_or("/bin/sh");
            if i < anomalies {
                let uss = rng.gen_range(mem_threshold..=100.0_f64.max(mem_threshold));
                let cpu = rng.gen_range(0.0..cpu_threshold);
                generate_record(rng, pid, command, uss, cpu)
            } else {
                let uss = rng.gen_range(0.0..(mem_threshold / 10.0));
                let cpu = rng.gen_range(0.0..(cpu_threshold / 4.0));
                generate_record(rng, pid, command, uss, cpu)
            }
        })
        .collect();
    processes.shuffle(rng);

    TestData {
        version: "1.0".to_string(),
        generated_at: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        processes,
    }
}

/// PSS and RSS are derived from USS the way shared pages inflate them.
fn generate_record(rng: &mut impl Rng, pid: u32, command: &str, uss: f64, cpu: f64) -> ProcessRecord {
    let pss = (uss * rng.gen_range(1.05..1.25)).min(100.0);
    let rss = (pss * rng.gen_range(1.1..1.4)).min(100.0);
    ProcessRecord {
        pid,
        command: command.to_string(),
        cpu,
        uss,
        pss,
        rss,
    }
}
