//! Ranked per-process usage sampling.
//!
//! A `ProcessSource` yields raw usage records; the `ProcessSampler`
//! normalizes command names, drops the exporter itself, ranks, sums the
//! memory metric, exports the top ranks and hands every indicator to the
//! anomaly detector.

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering as CmpOrdering;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::{ProfileError, SamplerError, SourceError};
use crate::metrics::WorkloadMetrics;
use crate::profiler::{ProfileReport, Profiler, Thresholds};
use crate::sampler::SamplerSwitch;
use crate::system;

/// Buffer size for smaps parsing.
const SMAPS_BUFFER_KB: usize = 256;

/// Metric processes are ranked by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RankBy {
    Uss,
    #[default]
    Pss,
    Rss,
    Cpu,
}

/// Raw usage record as delivered by a source. Values are percentages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub pid: u32,
    pub command: String,
    #[serde(default, alias = "cpu_usage")]
    pub cpu: f64,
    #[serde(default, alias = "mem", alias = "uss_mem_usage")]
    pub uss: f64,
    #[serde(default, alias = "pss_mem_usage")]
    pub pss: f64,
    #[serde(default, alias = "rss_mem_usage")]
    pub rss: f64,
}

impl ProcessRecord {
    fn rank_value(&self, rank_by: RankBy) -> f64 {
        match rank_by {
            RankBy::Uss => self.uss,
            RankBy::Pss => self.pss,
            RankBy::Rss => self.rss,
            RankBy::Cpu => self.cpu,
        }
    }
}

/// Per-process snapshot for one cycle, with a normalized command name.
#[derive(Debug, Clone, PartialEq)]
pub struct Indicator {
    pub pid: u32,
    pub command: String,
    pub cpu_percent: f64,
    pub uss_percent: f64,
    pub pss_percent: f64,
    pub rss_percent: f64,
}

impl Indicator {
    pub fn from_record(record: ProcessRecord) -> Self {
        Self {
            command: normalize_command(&record.command, record.pid),
            pid: record.pid,
            cpu_percent: record.cpu,
            uss_percent: record.uss,
            pss_percent: record.pss,
            rss_percent: record.rss,
        }
    }

    pub fn rank_value(&self, rank_by: RankBy) -> f64 {
        match rank_by {
            RankBy::Uss => self.uss_percent,
            RankBy::Pss => self.pss_percent,
            RankBy::Rss => self.rss_percent,
            RankBy::Cpu => self.cpu_percent,
        }
    }

    /// Memory value exported and summed for the given ranking.
    pub fn memory_value(&self, rank_by: RankBy) -> f64 {
        match rank_by {
            RankBy::Uss => self.uss_percent,
            RankBy::Rss => self.rss_percent,
            RankBy::Pss | RankBy::Cpu => self.pss_percent,
        }
    }
}

/// Strips arguments and any path prefix, then appends the pid.
///
/// "/usr/bin/httpd -k start" with pid 51 becomes "httpd,51".
pub fn normalize_command(raw: &str, pid: u32) -> String {
    let program = raw.split_whitespace().next().unwrap_or("");
    let base = program.rsplit('/').next().unwrap_or(program);
    let base = if base.is_empty() { "unknown" } else { base };
    format!("{base},{pid}")
}

/// Normalized name of this exporter process.
pub fn own_process_name() -> String {
    let exe = std::env::current_exe()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());
    normalize_command(&exe, std::process::id())
}

/// Stable descending sort on the ranking metric.
pub fn rank_indicators(indicators: &mut [Indicator], rank_by: RankBy) {
    indicators.sort_by(|a, b| descending(a.rank_value(rank_by), b.rank_value(rank_by)));
}

fn rank_records(records: &mut Vec<ProcessRecord>, rank_by: RankBy, limit: usize) {
    records.sort_by(|a, b| descending(a.rank_value(rank_by), b.rank_value(rank_by)));
    records.truncate(limit);
}

fn descending(a: f64, b: f64) -> CmpOrdering {
    b.total_cmp(&a)
}

/// External provider of per-process usage records.
pub trait ProcessSource: Send + Sync {
    /// Returns up to `limit` records ranked by `rank_by`.
    fn collect(&self, limit: usize, rank_by: RankBy) -> Result<Vec<ProcessRecord>, SourceError>;
}

/// Fixed in-memory records.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    records: Vec<ProcessRecord>,
}

impl StaticSource {
    pub fn new(records: Vec<ProcessRecord>) -> Self {
        Self { records }
    }
}

impl ProcessSource for StaticSource {
    fn collect(&self, limit: usize, rank_by: RankBy) -> Result<Vec<ProcessRecord>, SourceError> {
        let mut records = self.records.clone();
        rank_records(&mut records, rank_by, limit);
        Ok(records)
    }
}

/// Records loaded from a JSON test data file on every cycle.
///
/// Accepts either a bare array of records or an object with a `processes`
/// array (the layout written by `generate-testdata`).
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ProcessSource for JsonFileSource {
    fn collect(&self, limit: usize, rank_by: RankBy) -> Result<Vec<ProcessRecord>, SourceError> {
        let content =
            fs::read_to_string(&self.path).map_err(|e| SourceError::io(&self.path, e))?;
        let mut records = parse_records(&content)?;
        rank_records(&mut records, rank_by, limit);
        Ok(records)
    }
}

/// Parses test data records, skipping entries that do not deserialize.
pub fn parse_records(content: &str) -> Result<Vec<ProcessRecord>, SourceError> {
    let value: serde_json::Value =
        serde_json::from_str(content).map_err(|e| SourceError::Malformed {
            source_name: "testdata",
            reason: e.to_string(),
        })?;

    let entries = match value {
        serde_json::Value::Array(entries) => entries,
        serde_json::Value::Object(mut map) => match map.remove("processes") {
            Some(serde_json::Value::Array(entries)) => entries,
            _ => {
                return Err(SourceError::Malformed {
                    source_name: "testdata",
                    reason: "missing 'processes' array".into(),
                })
            }
        },
        _ => {
            return Err(SourceError::Malformed {
                source_name: "testdata",
                reason: "expected an array of process records".into(),
            })
        }
    };

    let mut records = Vec::with_capacity(entries.len());
    for entry in entries {
        match serde_json::from_value::<ProcessRecord>(entry) {
            Ok(record) => records.push(record),
            Err(e) => debug!("Skipping malformed process record: {}", e),
        }
    }
    Ok(records)
}

/// Process entry representing a directory in /proc filesystem
#[derive(Debug, Clone)]
struct ProcEntry {
    pid: u32,
    proc_path: PathBuf,
}

/// Cache entry with timestamp for delta-based CPU calculation
#[derive(Debug, Clone, Copy)]
struct CpuEntry {
    cpu_time_seconds: f64,
    last_updated: Instant,
}

/// Reads usage straight from /proc.
///
/// Memory comes from smaps_rollup (smaps on older kernels) and is expressed
/// as percent of MemTotal; CPU percent is the delta of utime+stime since the
/// previous cycle.
pub struct ProcfsSource {
    root: PathBuf,
    clock_ticks: f64,
    cpu_cache: StdRwLock<HashMap<u32, CpuEntry>>,
}

impl ProcfsSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            clock_ticks: clock_ticks_per_second(),
            cpu_cache: StdRwLock::new(HashMap::new()),
        }
    }

    fn total_memory(&self) -> Result<u64, SourceError> {
        let path = self.root.join("meminfo");
        let content = fs::read_to_string(&path).map_err(|e| SourceError::io(&path, e))?;
        system::parse_total_memory(&content)
    }

    fn read_record(&self, entry: &ProcEntry, total_bytes: f64, now: Instant) -> Option<ProcessRecord> {
        let command = match read_process_command(&entry.proc_path) {
            Some(command) => command,
            None => {
                debug!("Skipping process {}: could not read name", entry.pid);
                return None;
            }
        };

        let (rss, pss, uss) = match parse_memory_for_process(&entry.proc_path) {
            Ok(v) => v,
            Err(e) => {
                debug!("Skipping process {}: failed to parse memory: {}", entry.pid, e);
                return None;
            }
        };

        let cpu = self.cpu_percent(entry, now);

        Some(ProcessRecord {
            pid: entry.pid,
            command,
            cpu,
            uss: uss as f64 / total_bytes * 100.0,
            pss: pss as f64 / total_bytes * 100.0,
            rss: rss as f64 / total_bytes * 100.0,
        })
    }

    fn prune_cpu_cache(&self, live: &HashSet<u32>) {
        if let Ok(mut cache) = self.cpu_cache.write() {
            cache.retain(|pid, _| live.contains(pid));
        }
    }

    /// Returns CPU percent for a PID using delta between samples
    fn cpu_percent(&self, entry: &ProcEntry, now: Instant) -> f64 {
        let cpu_time_seconds = match parse_cpu_time_seconds(&entry.proc_path, self.clock_ticks) {
            Ok(v) => v,
            Err(e) => {
                debug!("Failed to read CPU time for pid {}: {}", entry.pid, e);
                return 0.0;
            }
        };

        let mut cpu_percent = 0.0;
        if let Ok(cache) = self.cpu_cache.read() {
            if let Some(prev) = cache.get(&entry.pid) {
                let dt = now.duration_since(prev.last_updated).as_secs_f64();
                let delta_cpu = cpu_time_seconds - prev.cpu_time_seconds;
                if dt > 0.0 && delta_cpu > 0.0 {
                    cpu_percent = (delta_cpu / dt) * 100.0;
                }
            }
        }

        if let Ok(mut cache) = self.cpu_cache.write() {
            cache.insert(
                entry.pid,
                CpuEntry {
                    cpu_time_seconds,
                    last_updated: now,
                },
            );
        }

        cpu_percent
    }
}

impl ProcessSource for ProcfsSource {
    fn collect(&self, limit: usize, rank_by: RankBy) -> Result<Vec<ProcessRecord>, SourceError> {
        let total_bytes = self.total_memory()? as f64;
        if total_bytes <= 0.0 {
            return Err(SourceError::Malformed {
                source_name: "meminfo",
                reason: "MemTotal is zero".into(),
            });
        }

        let entries = collect_proc_entries(&self.root)?;
        let now = Instant::now();

        let mut records: Vec<ProcessRecord> = entries
            .par_iter()
            .filter_map(|entry| self.read_record(entry, total_bytes, now))
            .collect();

        // Forget processes that are gone so the cache does not grow forever.
        let live: HashSet<u32> = entries.iter().map(|e| e.pid).collect();
        self.prune_cpu_cache(&live);

        debug!(
            "Collected {} of {} process entries from {}",
            records.len(),
            entries.len(),
            self.root.display()
        );

        rank_records(&mut records, rank_by, limit);
        Ok(records)
    }
}

/// Clock ticks per second for /proc/<pid>/stat times.
fn clock_ticks_per_second() -> f64 {
    // SAFETY: sysconf has no preconditions.
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 {
        ticks as f64
    } else {
        100.0
    }
}

/// Scans /proc directory for process entries with numeric PIDs
fn collect_proc_entries(root: &Path) -> Result<Vec<ProcEntry>, SourceError> {
    let dir = fs::read_dir(root).map_err(|e| SourceError::io(root, e))?;
    let mut out = Vec::new();
    for entry in dir.flatten() {
        let p = entry.path();
        let Some(name) = p.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let Ok(pid) = name.parse::<u32>() else {
            continue;
        };
        out.push(ProcEntry { pid, proc_path: p });
    }
    Ok(out)
}

/// Reads the program from cmdline, falling back to comm for kernel threads
fn read_process_command(proc_path: &Path) -> Option<String> {
    if let Ok(content) = fs::read(proc_path.join("cmdline")) {
        if let Some(first) = content.split(|&b| b == 0u8).next() {
            if let Ok(s) = std::str::from_utf8(first) {
                if !s.trim().is_empty() {
                    return Some(s.trim().to_string());
                }
            }
        }
    }

    if let Ok(s) = fs::read_to_string(proc_path.join("comm")) {
        let t = s.trim();
        if !t.is_empty() {
            return Some(t.into());
        }
    }
    None
}

/// Parse total CPU time (user+system) in seconds from /proc/<pid>/stat
fn parse_cpu_time_seconds(proc_path: &Path, clock_ticks: f64) -> Result<f64, std::io::Error> {
    let content = fs::read_to_string(proc_path.join("stat"))?;
    parse_stat_cpu_seconds(&content, clock_ticks)
        .ok_or_else(|| std::io::Error::other("Invalid stat format"))
}

/// The comm field may contain spaces, so fields are counted after the last ')'.
fn parse_stat_cpu_seconds(content: &str, clock_ticks: f64) -> Option<f64> {
    let after_comm = &content[content.rfind(')')? + 1..];
    let parts: Vec<&str> = after_comm.split_whitespace().collect();
    // utime and stime are fields 14 and 15 overall, 12 and 13 after comm
    let utime: f64 = parts.get(11)?.parse().ok()?;
    let stime: f64 = parts.get(12)?.parse().ok()?;
    Some((utime + stime) / clock_ticks)
}

/// Wrapper that selects the fastest available memory parser.
/// Uses smaps_rollup when available, otherwise falls back to full smaps.
fn parse_memory_for_process(proc_path: &Path) -> Result<(u64, u64, u64), std::io::Error> {
    let rollup = proc_path.join("smaps_rollup");
    if rollup.exists() {
        return parse_smaps(&rollup);
    }
    parse_smaps(&proc_path.join("smaps"))
}

/// Sums Rss, Pss and Private_* (USS) of an smaps or smaps_rollup file, in bytes
fn parse_smaps(path: &Path) -> Result<(u64, u64, u64), std::io::Error> {
    let file = fs::File::open(path)?;
    let reader = BufReader::with_capacity(SMAPS_BUFFER_KB * 1024, file);

    let mut rss = 0;
    let mut pss = 0;
    let mut private_clean = 0;
    let mut private_dirty = 0;

    for line in reader.lines() {
        let l = line?;
        if let Some(kb) = l.strip_prefix("Rss:") {
            rss += parse_kb_value(kb).unwrap_or(0);
        } else if let Some(kb) = l.strip_prefix("Pss:") {
            pss += parse_kb_value(kb).unwrap_or(0);
        } else if let Some(kb) = l.strip_prefix("Private_Clean:") {
            private_clean += parse_kb_value(kb).unwrap_or(0);
        } else if let Some(kb) = l.strip_prefix("Private_Dirty:") {
            private_dirty += parse_kb_value(kb).unwrap_or(0);
        }
    }

    Ok((rss * 1024, pss * 1024, (private_clean + private_dirty) * 1024))
}

/// Parses kilobyte values from smaps file lines
fn parse_kb_value(v: &str) -> Option<u64> {
    v.split_whitespace().next()?.parse().ok()
}

/// Result of one process sampling pass.
#[derive(Debug)]
pub struct ProcessSample {
    /// Retained indicators, ranked.
    pub indicators: Vec<Indicator>,
    /// Sum of the memory metric over `indicators`.
    pub total_memory: f64,
    /// Pids that crossed a threshold this cycle.
    pub anomalies: Vec<u32>,
    /// Profiling tasks started this cycle. Dropping a handle detaches the task.
    pub profiles: Vec<JoinHandle<Result<ProfileReport, ProfileError>>>,
}

/// Options for [`ProcessSampler`].
#[derive(Debug, Clone)]
pub struct ProcessSamplerOptions {
    pub limit: usize,
    pub top_n: usize,
    pub rank_by: RankBy,
    pub thresholds: Thresholds,
    /// Normalized name of the process to leave out (the exporter itself).
    pub excluded: String,
}

pub struct ProcessSampler {
    source: Arc<dyn ProcessSource>,
    options: ProcessSamplerOptions,
    profiler: Option<Arc<Profiler>>,
    metrics: WorkloadMetrics,
    switch: SamplerSwitch,
}

impl ProcessSampler {
    pub fn new(
        source: Arc<dyn ProcessSource>,
        options: ProcessSamplerOptions,
        profiler: Option<Arc<Profiler>>,
        metrics: WorkloadMetrics,
    ) -> Self {
        let switch = SamplerSwitch::new("process", &metrics);
        Self {
            source,
            options,
            profiler,
            metrics,
            switch,
        }
    }

    pub fn switch(&self) -> &SamplerSwitch {
        &self.switch
    }

    #[instrument(skip(self), fields(limit = self.options.limit))]
    pub async fn sample(&self) -> Result<ProcessSample, SamplerError> {
        self.switch.ensure_enabled()?;

        let source = Arc::clone(&self.source);
        let (limit, rank_by) = (self.options.limit, self.options.rank_by);
        let records = tokio::task::spawn_blocking(move || source.collect(limit, rank_by))
            .await
            .map_err(|e| SourceError::Unavailable {
                source_name: "process",
                reason: format!("collector task failed: {e}"),
            })
            .and_then(|r| r)
            .map_err(|e| self.switch.on_source_error(e))?;

        Ok(self.process_records(records))
    }

    /// Normalizes, ranks, exports and checks one batch of records.
    pub fn process_records(&self, records: Vec<ProcessRecord>) -> ProcessSample {
        let rank_by = self.options.rank_by;

        let mut indicators: Vec<Indicator> = records
            .into_iter()
            .map(Indicator::from_record)
            .filter(|i| {
                let own = i.command == self.options.excluded;
                if own {
                    debug!(command = %i.command, "Excluding exporter process");
                }
                !own
            })
            .collect();

        rank_indicators(&mut indicators, rank_by);
        indicators.truncate(self.options.limit);

        let total_memory: f64 = indicators.iter().map(|i| i.memory_value(rank_by)).sum();

        let mut anomalies = Vec::new();
        let mut profiles = Vec::new();
        for indicator in &indicators {
            if !self.options.thresholds.breached(indicator) {
                continue;
            }
            info!(
                pid = indicator.pid,
                command = %indicator.command,
                uss = indicator.uss_percent,
                cpu = indicator.cpu_percent,
                "High usage process detected"
            );
            anomalies.push(indicator.pid);
            if let Some(profiler) = &self.profiler {
                if let Some(handle) = profiler.launch(indicator.clone()) {
                    profiles.push(handle);
                }
            }
        }

        let ranked = indicators.len().min(self.options.top_n);
        for (idx, indicator) in indicators.iter().take(ranked).enumerate() {
            let rank = idx + 1;
            self.metrics
                .set_process_usage(rank, "mem", indicator.memory_value(rank_by));
            self.metrics
                .set_process_usage(rank, "cpu", indicator.cpu_percent);
        }
        self.metrics
            .remove_process_ranks_above(ranked, self.options.top_n);
        self.metrics.set_workload_usage("mem", "mem", total_memory);

        if indicators.is_empty() {
            warn!("No process records retained this cycle");
        }

        ProcessSample {
            indicators,
            total_memory,
            anomalies,
            profiles,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Registry;
    use std::io::Write;

    fn record(pid: u32, command: &str, uss: f64, pss: f64, cpu: f64) -> ProcessRecord {
        ProcessRecord {
            pid,
            command: command.to_string(),
            cpu,
            uss,
            pss,
            rss: pss,
        }
    }

    fn sampler(records: Vec<ProcessRecord>, excluded: &str) -> (ProcessSampler, WorkloadMetrics) {
        let metrics = WorkloadMetrics::new(&Registry::new(), 2).unwrap();
        let options = ProcessSamplerOptions {
            limit: 50,
            top_n: 10,
            rank_by: RankBy::Pss,
            thresholds: Thresholds::default(),
            excluded: excluded.to_string(),
        };
        let sampler = ProcessSampler::new(
            Arc::new(StaticSource::new(records)),
            options,
            None,
            metrics.clone(),
        );
        (sampler, metrics)
    }

    #[test]
    fn test_normalize_command() {
        assert_eq!(normalize_command("/usr/bin/httpd", 51), "httpd,51");
        assert_eq!(normalize_command("/usr/sbin/nginx -g daemon off;", 7), "nginx,7");
        assert_eq!(normalize_command("bash", 50), "bash,50");
        assert_eq!(normalize_command("", 3), "unknown,3");
    }

    #[test]
    fn test_rank_is_stable_descending() {
        let mut indicators: Vec<Indicator> = vec![
            record(1, "a", 0.0, 5.0, 0.0),
            record(2, "b", 0.0, 9.0, 0.0),
            record(3, "c", 0.0, 5.0, 0.0),
            record(4, "d", 0.0, 1.0, 0.0),
        ]
        .into_iter()
        .map(Indicator::from_record)
        .collect();

        rank_indicators(&mut indicators, RankBy::Pss);
        let order: Vec<u32> = indicators.iter().map(|i| i.pid).collect();
        assert_eq!(order, vec![2, 1, 3, 4]);
    }

    #[tokio::test]
    async fn test_sample_ranks_sums_and_excludes_self() {
        let records = vec![
            record(10, "/usr/bin/small", 1.0, 2.0, 0.5),
            record(11, "/opt/big", 10.0, 20.0, 1.0),
            record(12, "/usr/local/bin/herakles-workload-exporter", 3.0, 30.0, 0.1),
            record(13, "medium", 5.0, 8.0, 2.0),
        ];
        let (sampler, metrics) = sampler(records, "herakles-workload-exporter,12");

        let sample = sampler.sample().await.unwrap();
        let order: Vec<u32> = sample.indicators.iter().map(|i| i.pid).collect();
        assert_eq!(order, vec![11, 13, 10]);
        assert!((sample.total_memory - 30.0).abs() < 1e-9);
        assert!(sample.anomalies.is_empty());

        let top = metrics.process_usage.with_label_values(&["1", "mem"]).get();
        assert!((top - 20.0).abs() < 1e-9);
        let cpu = metrics.process_usage.with_label_values(&["2", "cpu"]).get();
        assert!((cpu - 2.0).abs() < 1e-9);
        let total = metrics
            .workload_usage
            .with_label_values(&["mem", "mem"])
            .get();
        assert!((total - 30.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_sample_exports_only_top_ranks() {
        let records: Vec<ProcessRecord> = (1..=15)
            .map(|pid| record(pid, "worker", 0.0, pid as f64, 0.0))
            .collect();
        let (sampler, metrics) = sampler(records, "none,0");

        let sample = sampler.sample().await.unwrap();
        assert_eq!(sample.indicators.len(), 15);
        let expected: f64 = (1..=15).map(|v| v as f64).sum();
        assert!((sample.total_memory - expected).abs() < 1e-9);

        let tenth = metrics.process_usage.with_label_values(&["10", "mem"]).get();
        assert!((tenth - 6.0).abs() < 1e-9);
        metrics.process_usage.remove_label_values(&["10", "mem"]).unwrap();
        assert!(metrics.process_usage.remove_label_values(&["11", "mem"]).is_err());
    }

    #[tokio::test]
    async fn test_shrinking_ranking_drops_stale_ranks_only() {
        use prometheus::{Encoder, TextEncoder};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("testdata.json");
        let write = |count: u32| {
            let records: Vec<ProcessRecord> = (1..=count)
                .map(|pid| record(pid, "worker", 0.0, pid as f64, 0.0))
                .collect();
            std::fs::write(&path, serde_json::to_string(&records).unwrap()).unwrap();
        };
        let registry = Registry::new();
        let metrics = WorkloadMetrics::new(&registry, 1).unwrap();
        let sampler = ProcessSampler::new(
            Arc::new(JsonFileSource::new(&path)),
            ProcessSamplerOptions {
                limit: 50,
                top_n: 10,
                rank_by: RankBy::Pss,
                thresholds: Thresholds::default(),
                excluded: "none,0".to_string(),
            },
            None,
            metrics.clone(),
        );

        write(5);
        sampler.sample().await.unwrap();
        write(2);
        sampler.sample().await.unwrap();

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains(r#"process_workload_usage{rank="1",type="mem"} 2"#));
        assert!(text.contains(r#"process_workload_usage{rank="2",type="cpu"} 0"#));
        assert!(!text.contains(r#"rank="3""#));
        assert!(!text.contains(r#"rank="5""#));
    }

    #[test]
    fn test_procfs_cpu_cache_forgets_exited_pids() {
        let source = ProcfsSource::new("/nonexistent/proc");
        {
            let mut cache = source.cpu_cache.write().unwrap();
            for pid in [1, 2, 3] {
                cache.insert(
                    pid,
                    CpuEntry {
                        cpu_time_seconds: 1.0,
                        last_updated: Instant::now(),
                    },
                );
            }
        }
        let live: HashSet<u32> = [1, 3].into_iter().collect();
        source.prune_cpu_cache(&live);

        let cache = source.cpu_cache.read().unwrap();
        let mut pids: Vec<u32> = cache.keys().copied().collect();
        pids.sort_unstable();
        assert_eq!(pids, vec![1, 3]);
    }

    #[test]
    fn test_parse_records_skips_malformed() {
        let json = r#"{"version":"1","processes":[
            {"pid": 51, "command": "/usr/bin/httpd", "mem": 55.0},
            {"pid": "oops", "command": "broken"},
            {"pid": 50, "command": "/bin/bash", "mem": 20.0, "cpu": 3.5}
        ]}"#;
        let records = parse_records(json).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].uss, 55.0);
        assert_eq!(records[1].cpu, 3.5);

        assert!(parse_records("42").is_err());
        assert!(parse_records("{\"other\": []}").is_err());
    }

    #[test]
    fn test_json_file_source_missing_file_is_unavailable() {
        let source = JsonFileSource::new("/nonexistent/herakles/testdata.json");
        let err = source.collect(10, RankBy::Pss).unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn test_missing_source_disables_sampler() {
        let metrics = WorkloadMetrics::new(&Registry::new(), 1).unwrap();
        let sampler = ProcessSampler::new(
            Arc::new(JsonFileSource::new("/nonexistent/testdata.json")),
            ProcessSamplerOptions {
                limit: 10,
                top_n: 10,
                rank_by: RankBy::Pss,
                thresholds: Thresholds::default(),
                excluded: String::new(),
            },
            None,
            metrics,
        );
        assert!(sampler.sample().await.is_err());
        assert!(!sampler.switch().is_enabled());
        assert!(matches!(
            sampler.sample().await,
            Err(SamplerError::Disabled { sampler: "process" })
        ));
    }

    #[test]
    fn test_parse_stat_cpu_seconds() {
        let stat = "1234 (my (odd) proc) S 1 1234 1234 0 -1 4194560 100 0 0 0 250 50 0 0 20 0 1 0 100 0 0";
        let secs = parse_stat_cpu_seconds(stat, 100.0).unwrap();
        assert!((secs - 3.0).abs() < 1e-9);
        assert!(parse_stat_cpu_seconds("garbage", 100.0).is_none());
    }

    #[test]
    fn test_procfs_source_reads_fake_tree() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("meminfo"), "MemTotal: 1000 kB\n").unwrap();

        let proc_dir = root.path().join("42");
        fs::create_dir(&proc_dir).unwrap();
        fs::write(proc_dir.join("cmdline"), b"/usr/bin/httpd\0-k\0start\0").unwrap();
        fs::write(
            proc_dir.join("stat"),
            "42 (httpd) S 1 42 42 0 -1 0 0 0 0 0 10 5 0 0 20 0 1 0 1 0 0",
        )
        .unwrap();
        let mut rollup = fs::File::create(proc_dir.join("smaps_rollup")).unwrap();
        writeln!(rollup, "Rss:                 500 kB").unwrap();
        writeln!(rollup, "Pss:                 300 kB").unwrap();
        writeln!(rollup, "Private_Clean:        50 kB").unwrap();
        writeln!(rollup, "Private_Dirty:       150 kB").unwrap();

        fs::create_dir(root.path().join("self")).unwrap();
        fs::create_dir(root.path().join("43")).unwrap();

        let source = ProcfsSource::new(root.path());
        let records = source.collect(10, RankBy::Pss).unwrap();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.pid, 42);
        assert_eq!(r.command, "/usr/bin/httpd");
        assert!((r.rss - 50.0).abs() < 1e-9);
        assert!((r.pss - 30.0).abs() < 1e-9);
        assert!((r.uss - 20.0).abs() < 1e-9);
        assert_eq!(r.cpu, 0.0);
    }

    #[test]
    fn test_procfs_source_missing_root_is_unavailable() {
        let source = ProcfsSource::new("/nonexistent/proc");
        assert!(source.collect(10, RankBy::Pss).unwrap_err().is_unavailable());
    }
}
