//! Running statistics about sampling cycles, rendered by `/health`.

use chrono::{DateTime, Utc};
use std::fmt::Write as FmtWrite;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

#[derive(Clone, Copy, Default)]
struct RunningStat {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    last: f64,
}

impl RunningStat {
    fn add(&mut self, value: f64) {
        if self.count == 0 {
            *self = RunningStat {
                count: 1,
                sum: value,
                min: value,
                max: value,
                last: value,
            };
            return;
        }
        self.count += 1;
        self.sum += value;
        self.last = value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / (self.count as f64)
        }
    }
}

#[derive(Default)]
struct Stat {
    inner: Mutex<RunningStat>,
}

impl Stat {
    fn add_sample(&self, value: f64) {
        if let Ok(mut s) = self.inner.lock() {
            s.add(value);
        }
    }

    /// (current, average, max, min)
    fn snapshot(&self) -> (f64, f64, f64, f64) {
        self.inner
            .lock()
            .map(|s| (s.last, s.avg(), s.max, s.min))
            .unwrap_or_default()
    }
}

/// Cycle statistics shared by the scheduler and the HTTP handlers.
pub struct HealthStats {
    started: Instant,
    cycle_latency_ms: Stat,
    retained_processes: Stat,
    completed_cycles: AtomicU64,
    skipped_cycles: AtomicU64,
    failed_samples: AtomicU64,
    http_requests: AtomicU64,
    last_cycle_at: Mutex<Option<DateTime<Utc>>>,
}

impl Default for HealthStats {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            cycle_latency_ms: Stat::default(),
            retained_processes: Stat::default(),
            completed_cycles: AtomicU64::new(0),
            skipped_cycles: AtomicU64::new(0),
            failed_samples: AtomicU64::new(0),
            http_requests: AtomicU64::new(0),
            last_cycle_at: Mutex::new(None),
        }
    }

    pub fn record_cycle(&self, latency_ms: f64, retained: usize, failed: usize) {
        self.cycle_latency_ms.add_sample(latency_ms);
        self.retained_processes.add_sample(retained as f64);
        self.failed_samples
            .fetch_add(failed as u64, Ordering::Relaxed);
        self.completed_cycles.fetch_add(1, Ordering::Release);
        if let Ok(mut at) = self.last_cycle_at.lock() {
            *at = Some(Utc::now());
        }
    }

    pub fn record_skipped_cycle(&self) {
        self.skipped_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_http_request(&self) {
        self.http_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn completed_cycles(&self) -> u64 {
        self.completed_cycles.load(Ordering::Acquire)
    }

    pub fn skipped_cycles(&self) -> u64 {
        self.skipped_cycles.load(Ordering::Relaxed)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    pub fn render_table(&self) -> String {
        let (lat_cur, lat_avg, lat_max, lat_min) = self.cycle_latency_ms.snapshot();
        let (rp_cur, rp_avg, rp_max, rp_min) = self.retained_processes.snapshot();

        let left_col = 22usize;
        let col_w = 12usize;

        let mut out = String::new();
        writeln!(
            out,
            "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
            "metric",
            "current",
            "average",
            "max",
            "min",
            left = left_col,
            col = col_w
        )
        .ok();
        writeln!(out, "{}", "-".repeat(left_col + 3 + (col_w + 3) * 4)).ok();
        writeln!(
            out,
            "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
            "cycle latency (ms)",
            format!("{:.1}", lat_cur),
            format!("{:.1}", lat_avg),
            format!("{:.1}", lat_max),
            format!("{:.1}", lat_min),
            left = left_col,
            col = col_w
        )
        .ok();
        writeln!(
            out,
            "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
            "retained processes",
            format!("{:.0}", rp_cur),
            format!("{:.1}", rp_avg),
            format!("{:.0}", rp_max),
            format!("{:.0}", rp_min),
            left = left_col,
            col = col_w
        )
        .ok();

        writeln!(out).ok();
        writeln!(out, "completed cycles: {}", self.completed_cycles()).ok();
        writeln!(out, "skipped cycles: {}", self.skipped_cycles()).ok();
        writeln!(
            out,
            "failed samples: {}",
            self.failed_samples.load(Ordering::Relaxed)
        )
        .ok();
        writeln!(
            out,
            "http requests: {}",
            self.http_requests.load(Ordering::Relaxed)
        )
        .ok();
        writeln!(out, "uptime (s): {}", self.uptime_seconds()).ok();
        let last = self
            .last_cycle_at
            .lock()
            .ok()
            .and_then(|at| *at)
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        writeln!(out, "last cycle: {}", last).ok();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_stat_tracks_extremes() {
        let mut s = RunningStat::default();
        s.add(5.0);
        s.add(1.0);
        s.add(9.0);
        assert_eq!(s.count, 3);
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 9.0);
        assert_eq!(s.last, 9.0);
        assert!((s.avg() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_render_table_reports_counts() {
        let stats = HealthStats::new();
        assert_eq!(stats.completed_cycles(), 0);
        stats.record_cycle(2004.0, 12, 1);
        stats.record_skipped_cycle();

        let table = stats.render_table();
        assert!(table.contains("cycle latency (ms)"));
        assert!(table.contains("completed cycles: 1"));
        assert!(table.contains("skipped cycles: 1"));
        assert!(table.contains("failed samples: 1"));
        assert!(!table.contains("last cycle: never"));
    }
}
