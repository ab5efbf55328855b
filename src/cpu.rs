//! System-wide CPU utilization sampling.
//!
//! Utilization is computed from two snapshots of the aggregate /proc/stat
//! counters taken a settle interval apart. The settle wait is an async sleep,
//! so the sampler only ever occupies its own task.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::error::{SamplerError, SourceError};
use crate::metrics::WorkloadMetrics;
use crate::sampler::SamplerSwitch;
use crate::system;

/// Default wait between the two counter snapshots.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(2000);

/// Load-average bucket boundaries as fractions of the physical core count.
const LOAD_BUCKET_FACTORS: [f64; 8] = [1.0 / 40.0, 1.0 / 20.0, 1.0 / 10.0, 1.0 / 5.0, 1.0 / 4.0, 1.0 / 2.0, 1.0, 3.0];

/// CPU time categories tracked from /proc/stat, in column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CpuCategory {
    User,
    Nice,
    System,
    Idle,
    Iowait,
    Irq,
    Softirq,
    Steal,
    Guest,
}

impl CpuCategory {
    pub const ALL: [CpuCategory; 9] = [
        CpuCategory::User,
        CpuCategory::Nice,
        CpuCategory::System,
        CpuCategory::Idle,
        CpuCategory::Iowait,
        CpuCategory::Irq,
        CpuCategory::Softirq,
        CpuCategory::Steal,
        CpuCategory::Guest,
    ];

    pub fn label(self) -> &'static str {
        match self {
            CpuCategory::User => "user",
            CpuCategory::Nice => "nice",
            CpuCategory::System => "system",
            CpuCategory::Idle => "idle",
            CpuCategory::Iowait => "iowait",
            CpuCategory::Irq => "irq",
            CpuCategory::Softirq => "softirq",
            CpuCategory::Steal => "steal",
            CpuCategory::Guest => "guest",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Cumulative CPU counters (in clock ticks) per category.
///
/// Backed by a fixed array so two snapshots always carry the same
/// category set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuSnapshot {
    counters: [u64; 9],
}

impl CpuSnapshot {
    pub fn new(counters: [u64; 9]) -> Self {
        Self { counters }
    }

    pub fn get(&self, category: CpuCategory) -> u64 {
        self.counters[category.index()]
    }

    /// Sum over all tracked categories.
    pub fn total(&self) -> u64 {
        self.counters.iter().sum()
    }
}

/// Per-category utilization fractions over one sampling window.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CpuUsage {
    fractions: [f64; 9],
}

impl CpuUsage {
    /// Computes fractions between an earlier and a later snapshot.
    ///
    /// The denominator is the sum of the per-category deltas, so the
    /// fractions always sum to one. Counters that went backwards (counter
    /// reset, hotplug) contribute zero. Returns `None` when no tick elapsed.
    pub fn between(before: &CpuSnapshot, after: &CpuSnapshot) -> Option<Self> {
        let mut deltas = [0u64; 9];
        for category in CpuCategory::ALL {
            deltas[category.index()] = after.get(category).saturating_sub(before.get(category));
        }

        let total: u64 = deltas.iter().sum();
        if total == 0 {
            return None;
        }

        let mut fractions = [0.0; 9];
        for (fraction, delta) in fractions.iter_mut().zip(deltas) {
            *fraction = delta as f64 / total as f64;
        }
        Some(Self { fractions })
    }

    pub fn fraction(&self, category: CpuCategory) -> f64 {
        self.fractions[category.index()]
    }

    /// Overall utilization: everything that is not idle.
    pub fn utilization(&self) -> f64 {
        if self.fractions.iter().all(|f| *f == 0.0) {
            return 0.0;
        }
        (1.0 - self.fraction(CpuCategory::Idle)).clamp(0.0, 1.0)
    }
}

/// Bucket boundaries for the load-average histogram, scaled by core count.
pub fn load_average_buckets(physical_cores: usize) -> Vec<f64> {
    let cores = physical_cores.max(1) as f64;
    LOAD_BUCKET_FACTORS.iter().map(|f| cores * f).collect()
}

/// Source of aggregate CPU counters.
pub trait CpuCounterSource: Send + Sync {
    fn snapshot(&self) -> Result<CpuSnapshot, SourceError>;
}

/// Reads counters from /proc/stat.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcStatSource;

impl CpuCounterSource for ProcStatSource {
    fn snapshot(&self) -> Result<CpuSnapshot, SourceError> {
        system::read_cpu_counters()
    }
}

/// Two-snapshot CPU utilization sampler.
pub struct CpuSampler {
    source: Arc<dyn CpuCounterSource>,
    settle: Duration,
    metrics: WorkloadMetrics,
    switch: SamplerSwitch,
    last: Mutex<CpuUsage>,
}

impl CpuSampler {
    pub fn new(source: Arc<dyn CpuCounterSource>, settle: Duration, metrics: WorkloadMetrics) -> Self {
        let switch = SamplerSwitch::new("cpu", &metrics);
        Self {
            source,
            settle,
            metrics,
            switch,
            last: Mutex::new(CpuUsage::default()),
        }
    }

    pub fn switch(&self) -> &SamplerSwitch {
        &self.switch
    }

    /// Takes both snapshots, computes fractions and exports them.
    ///
    /// When the two snapshots are identical the previous result is reported
    /// again (zero before the first successful sample).
    #[instrument(skip(self), fields(settle_ms = self.settle.as_millis() as u64))]
    pub async fn sample(&self) -> Result<CpuUsage, SamplerError> {
        self.switch.ensure_enabled()?;

        let before = self
            .source
            .snapshot()
            .map_err(|e| self.switch.on_source_error(e))?;
        tokio::time::sleep(self.settle).await;
        let after = self
            .source
            .snapshot()
            .map_err(|e| self.switch.on_source_error(e))?;

        let usage = match CpuUsage::between(&before, &after) {
            Some(usage) => {
                if let Ok(mut last) = self.last.lock() {
                    *last = usage;
                }
                usage
            }
            None => {
                warn!(
                    settle_ms = self.settle.as_millis() as u64,
                    "No CPU ticks elapsed between snapshots, reporting previous usage"
                );
                self.last.lock().map(|l| *l).unwrap_or_default()
            }
        };

        for category in CpuCategory::ALL {
            self.metrics
                .set_workload_usage("cpu", category.label(), usage.fraction(category));
        }
        self.metrics
            .set_workload_usage("cpu", "total", usage.utilization());

        debug!(
            utilization = usage.utilization(),
            "CPU usage sampled"
        );
        Ok(usage)
    }
}
