//! Prometheus metrics definitions for herakles-workload-exporter.
//!
//! `WorkloadMetrics` is the metrics sink every sampler and the profiler
//! write into. All collectors are registered on one `Registry` owned by the
//! application state; the prometheus vectors are internally synchronized,
//! so clones can be handed to concurrently running tasks.

use prometheus::{
    Gauge, GaugeVec, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
};

use crate::cpu::load_average_buckets;

/// Collection of Prometheus metrics for workload monitoring.
#[derive(Clone)]
pub struct WorkloadMetrics {
    /// Top-N process usage labeled by rank and type (cpu|mem).
    pub process_usage: GaugeVec,
    /// Host aggregates labeled by type and subtype.
    pub workload_usage: GaugeVec,
    pub load_average: HistogramVec,
    pub strace_calls: GaugeVec,
    pub strace_seconds: GaugeVec,
    pub strace_profiles: IntCounterVec,
    /// Cycle latency in milliseconds.
    pub scrape_time_use: Gauge,
    pub physical_cpu_num: Gauge,
    pub cycles_skipped: IntCounter,
    pub sampler_up: GaugeVec,
}

impl WorkloadMetrics {
    /// Creates and registers all Prometheus metrics with the registry.
    pub fn new(registry: &Registry, physical_cores: usize) -> prometheus::Result<Self> {
        let process_usage = GaugeVec::new(
            Opts::new(
                "process_workload_usage",
                "Cpu and mem usage of the top ranked processes in percent",
            ),
            &["rank", "type"],
        )?;
        let workload_usage = GaugeVec::new(
            Opts::new("workload_usage_gauge", "Host memory and cpu usage"),
            &["type", "subtype"],
        )?;
        let load_average = HistogramVec::new(
            HistogramOpts::new("load_average", "Load average per window")
                .buckets(load_average_buckets(physical_cores)),
            &["range"],
        )?;
        let strace_calls = GaugeVec::new(
            Opts::new(
                "strace_metrics",
                "Syscall counts captured while tracing a high usage process",
            ),
            &["pid", "command", "call_name"],
        )?;
        let strace_seconds = GaugeVec::new(
            Opts::new(
                "strace_seconds",
                "Seconds spent per syscall while tracing a high usage process",
            ),
            &["pid", "command", "call_name"],
        )?;
        let strace_profiles = IntCounterVec::new(
            Opts::new(
                "strace_profiles_total",
                "Profiling attempts by outcome",
            ),
            &["outcome"],
        )?;
        let scrape_time_use = Gauge::new(
            "scrape_time_use",
            "Time spent by the last complete sampling cycle in milliseconds",
        )?;
        let physical_cpu_num = Gauge::new("physical_cpu_num", "Physical cpu core count")?;
        let cycles_skipped = IntCounter::new(
            "cycles_skipped_total",
            "Ticks skipped because the previous cycle was still in flight",
        )?;
        let sampler_up = GaugeVec::new(
            Opts::new(
                "sampler_up",
                "Whether a sampler is enabled (1) or disabled after a source failure (0)",
            ),
            &["sampler"],
        )?;

        registry.register(Box::new(process_usage.clone()))?;
        registry.register(Box::new(workload_usage.clone()))?;
        registry.register(Box::new(load_average.clone()))?;
        registry.register(Box::new(strace_calls.clone()))?;
        registry.register(Box::new(strace_seconds.clone()))?;
        registry.register(Box::new(strace_profiles.clone()))?;
        registry.register(Box::new(scrape_time_use.clone()))?;
        registry.register(Box::new(physical_cpu_num.clone()))?;
        registry.register(Box::new(cycles_skipped.clone()))?;
        registry.register(Box::new(sampler_up.clone()))?;

        physical_cpu_num.set(physical_cores as f64);

        Ok(Self {
            process_usage,
            workload_usage,
            load_average,
            strace_calls,
            strace_seconds,
            strace_profiles,
            scrape_time_use,
            physical_cpu_num,
            cycles_skipped,
            sampler_up,
        })
    }

    pub fn set_workload_usage(&self, kind: &str, subtype: &str, value: f64) {
        self.workload_usage
            .with_label_values(&[kind, subtype])
            .set(value);
    }

    pub fn set_process_usage(&self, rank: usize, kind: &str, value: f64) {
        let rank_s = rank.to_string();
        self.process_usage
            .with_label_values(&[rank_s.as_str(), kind])
            .set(value);
    }

    /// Drops ranked series in `count + 1..=max_rank`, left over from a cycle
    /// that ranked more processes than the current one.
    pub fn remove_process_ranks_above(&self, count: usize, max_rank: usize) {
        for rank in count + 1..=max_rank {
            let rank_s = rank.to_string();
            for kind in ["mem", "cpu"] {
                // Absent series are fine.
                let _ = self
                    .process_usage
                    .remove_label_values(&[rank_s.as_str(), kind]);
            }
        }
    }

    pub fn observe_load(&self, window: &str, value: f64) {
        self.load_average.with_label_values(&[window]).observe(value);
    }

    pub fn set_syscall(&self, pid: u32, command: &str, syscall: &str, calls: f64, seconds: f64) {
        let pid_s = pid.to_string();
        let labels = [pid_s.as_str(), command, syscall];
        self.strace_calls.with_label_values(&labels).set(calls);
        self.strace_seconds.with_label_values(&labels).set(seconds);
    }

    pub fn record_profile(&self, outcome: &str) {
        self.strace_profiles.with_label_values(&[outcome]).inc();
    }

    pub fn set_cycle_latency(&self, millis: f64) {
        self.scrape_time_use.set(millis);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{Encoder, TextEncoder};

    fn encode(registry: &Registry) -> String {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .unwrap();
        String::from_utf8(buffer).unwrap()
    }

    #[test]
    fn test_registers_canonical_families() {
        let registry = Registry::new();
        let metrics = WorkloadMetrics::new(&registry, 2).unwrap();
        metrics.set_process_usage(1, "mem", 12.5);
        metrics.set_workload_usage("mem", "mem", 40.0);
        metrics.observe_load("1", 0.3);
        metrics.set_syscall(51, "httpd,51", "read", 10.0, 0.002);
        metrics.record_profile("completed");

        let text = encode(&registry);
        assert!(text.contains(r#"process_workload_usage{rank="1",type="mem"} 12.5"#));
        assert!(text.contains(r#"workload_usage_gauge{subtype="mem",type="mem"} 40"#));
        assert!(text.contains(r#"load_average_bucket{range="1",le="0.05"} 0"#));
        assert!(text.contains(r#"load_average_bucket{range="1",le="0.5"} 1"#));
        assert!(text.contains(r#"strace_metrics{call_name="read",command="httpd,51",pid="51"} 10"#));
        assert!(text.contains(r#"strace_profiles_total{outcome="completed"} 1"#));
        assert!(text.contains("physical_cpu_num 2"));
        assert!(text.contains("scrape_time_use 0"));
    }

    #[test]
    fn test_remove_process_ranks_above_keeps_lower_ranks() {
        let registry = Registry::new();
        let metrics = WorkloadMetrics::new(&registry, 1).unwrap();
        for rank in 1..=3 {
            metrics.set_process_usage(rank, "mem", rank as f64);
            metrics.set_process_usage(rank, "cpu", 1.0);
        }
        metrics.remove_process_ranks_above(1, 10);

        let text = encode(&registry);
        assert!(text.contains(r#"process_workload_usage{rank="1",type="mem"} 1"#));
        assert!(text.contains(r#"process_workload_usage{rank="1",type="cpu"} 1"#));
        assert!(!text.contains(r#"rank="2""#));
        assert!(!text.contains(r#"rank="3""#));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = Registry::new();
        WorkloadMetrics::new(&registry, 1).unwrap();
        assert!(WorkloadMetrics::new(&registry, 1).is_err());
    }
}
