//! Periodic sampling cycles.
//!
//! Every tick starts one cycle that runs the CPU, load and process samplers
//! as concurrent tasks and joins them on a [`CycleBarrier`]. A tick that
//! fires while the previous cycle is still running is skipped, so two cycles
//! never overlap.

use prometheus::Registry;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::cpu::{CpuSampler, CpuUsage};
use crate::error::{ExportError, SamplerError};
use crate::export::Publisher;
use crate::health_stats::HealthStats;
use crate::load::LoadSampler;
use crate::metrics::WorkloadMetrics;
use crate::process::{ProcessSample, ProcessSampler};
use crate::system::LoadAverage;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);
pub const MIN_INTERVAL_SECS: u64 = 1;
pub const MAX_INTERVAL_SECS: u64 = 60;

/// Output of one sampler task.
#[derive(Debug)]
pub enum SamplerOutput {
    Cpu(Result<CpuUsage, SamplerError>),
    Load(Result<LoadAverage, SamplerError>),
    Process(Result<ProcessSample, SamplerError>),
}

/// Everything one cycle produced.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub latency: Duration,
    pub cpu: Option<CpuUsage>,
    pub load: Option<LoadAverage>,
    pub processes: Option<ProcessSample>,
    /// Samplers that failed this cycle; disabled samplers are not listed.
    pub failures: Vec<SamplerError>,
    /// Sampler tasks that panicked.
    pub panicked: usize,
}

impl CycleReport {
    pub fn retained_processes(&self) -> usize {
        self.processes.as_ref().map_or(0, |p| p.indicators.len())
    }

    fn absorb<T>(&mut self, result: Result<T, SamplerError>) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(SamplerError::Disabled { sampler }) => {
                debug!(sampler, "Sampler disabled, skipped");
                None
            }
            Err(e) => {
                self.failures.push(e);
                None
            }
        }
    }
}

/// Joins the sampler tasks of one cycle.
///
/// The cycle counts as complete only once every spawned task has finished,
/// whatever its outcome.
pub struct CycleBarrier {
    tasks: JoinSet<SamplerOutput>,
    started: Instant,
}

impl Default for CycleBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleBarrier {
    pub fn new() -> Self {
        Self {
            tasks: JoinSet::new(),
            started: Instant::now(),
        }
    }

    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = SamplerOutput> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Waits for every task and measures the time since the barrier was created.
    pub async fn wait(mut self) -> CycleReport {
        let mut report = CycleReport::default();
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(SamplerOutput::Cpu(r)) => report.cpu = report.absorb(r),
                Ok(SamplerOutput::Load(r)) => report.load = report.absorb(r),
                Ok(SamplerOutput::Process(r)) => report.processes = report.absorb(r),
                Err(e) => {
                    error!(error = %e, "Sampler task panicked");
                    report.panicked += 1;
                }
            }
        }
        report.latency = self.started.elapsed();
        report
    }
}

/// The three samplers run each cycle.
#[derive(Clone)]
pub struct Samplers {
    pub cpu: Arc<CpuSampler>,
    pub load: Arc<LoadSampler>,
    pub process: Arc<ProcessSampler>,
}

pub struct Scheduler {
    samplers: Samplers,
    metrics: WorkloadMetrics,
    registry: Registry,
    publisher: Arc<dyn Publisher>,
    health: Arc<HealthStats>,
    interval: Duration,
    in_flight: Arc<Mutex<()>>,
}

impl Scheduler {
    pub fn new(
        samplers: Samplers,
        metrics: WorkloadMetrics,
        registry: Registry,
        publisher: Arc<dyn Publisher>,
        health: Arc<HealthStats>,
        interval: Duration,
    ) -> Self {
        Self {
            samplers,
            metrics,
            registry,
            publisher,
            health,
            interval,
            in_flight: Arc::new(Mutex::new(())),
        }
    }

    pub fn samplers(&self) -> &Samplers {
        &self.samplers
    }

    /// Runs one full cycle: fan out, join, record latency, publish.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> CycleReport {
        let mut barrier = CycleBarrier::new();

        let cpu = Arc::clone(&self.samplers.cpu);
        barrier.spawn(async move { SamplerOutput::Cpu(cpu.sample().await) });
        let load = Arc::clone(&self.samplers.load);
        barrier.spawn(async move { SamplerOutput::Load(load.sample().await) });
        let process = Arc::clone(&self.samplers.process);
        barrier.spawn(async move { SamplerOutput::Process(process.sample().await) });

        let report = barrier.wait().await;
        let latency_ms = report.latency.as_secs_f64() * 1000.0;
        self.metrics.set_cycle_latency(latency_ms);
        self.health.record_cycle(
            latency_ms,
            report.retained_processes(),
            report.failures.len() + report.panicked,
        );

        for failure in &report.failures {
            warn!(error = %failure, "Sampler failed this cycle");
        }
        debug!(
            latency_ms,
            retained = report.retained_processes(),
            "Cycle completed"
        );

        self.publish().await;
        report
    }

    async fn publish(&self) {
        if let Err(e) = self.push().await {
            error!(publisher = self.publisher.name(), error = %e, "Publishing metrics failed");
        }
    }

    /// Runs the blocking publisher off the async workers.
    async fn push(&self) -> Result<(), ExportError> {
        let publisher = Arc::clone(&self.publisher);
        let registry = self.registry.clone();
        tokio::task::spawn_blocking(move || publisher.publish(&registry)).await?
    }

    /// Starts a cycle unless one is still running. Returns whether it started.
    pub fn tick(self: &Arc<Self>) -> bool {
        match Arc::clone(&self.in_flight).try_lock_owned() {
            Ok(guard) => {
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    let _guard = guard;
                    this.run_cycle().await;
                });
                true
            }
            Err(_) => {
                self.metrics.cycles_skipped.inc();
                self.health.record_skipped_cycle();
                warn!(
                    interval_secs = self.interval.as_secs(),
                    "Previous cycle still running, skipping tick"
                );
                false
            }
        }
    }

    /// Ticks until `shutdown` resolves, then waits for the running cycle.
    pub async fn run<F>(self: Arc<Self>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(interval_secs = self.interval.as_secs(), "Scheduler started");
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    self.tick();
                }
            }
        }

        let _drained = self.in_flight.lock().await;
        info!("Scheduler stopped");
    }
}
