//! Host workload monitoring: CPU, load average and per-process usage
//! sampling on a fixed cycle, with syscall profiling of processes that
//! cross a usage threshold.
//!
//! The binary wires these pieces to an HTTP server or a Pushgateway; the
//! library keeps every data source behind a trait so the sampling pipeline
//! can run against synthetic inputs.

pub mod config;
pub mod cpu;
pub mod error;
pub mod export;
pub mod health_stats;
pub mod load;
pub mod metrics;
pub mod process;
pub mod profiler;
pub mod sampler;
pub mod scheduler;
pub mod system;

pub use config::Config;
pub use error::{ExportError, ProfileError, SamplerError, SourceError};
pub use health_stats::HealthStats;
pub use metrics::WorkloadMetrics;
pub use scheduler::{CycleBarrier, CycleReport, Scheduler};
