//! Enabled/disabled state shared by the samplers.

use prometheus::Gauge;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, warn};

use crate::error::{SamplerError, SourceError};
use crate::metrics::WorkloadMetrics;

/// Tracks whether a sampler may still poll its data source.
///
/// A sampler whose source is missing or inaccessible is switched off for the
/// rest of the process lifetime; transient failures only fail the current
/// cycle. The `sampler_up` gauge mirrors the state.
pub struct SamplerSwitch {
    name: &'static str,
    enabled: AtomicBool,
    up: Gauge,
}

impl SamplerSwitch {
    pub fn new(name: &'static str, metrics: &WorkloadMetrics) -> Self {
        let up = metrics.sampler_up.with_label_values(&[name]);
        up.set(1.0);
        Self {
            name,
            enabled: AtomicBool::new(true),
            up,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn ensure_enabled(&self) -> Result<(), SamplerError> {
        if self.is_enabled() {
            Ok(())
        } else {
            Err(SamplerError::Disabled { sampler: self.name })
        }
    }

    pub fn disable(&self) {
        if self.enabled.swap(false, Ordering::AcqRel) {
            self.up.set(0.0);
        }
    }

    /// Logs a source failure and disables the sampler if the source is gone.
    pub fn on_source_error(&self, err: SourceError) -> SamplerError {
        if err.is_unavailable() {
            error!(
                sampler = self.name,
                error = %err,
                "Data source unavailable, disabling sampler"
            );
            self.disable();
        } else {
            warn!(sampler = self.name, error = %err, "Sampling failed for this cycle");
        }
        SamplerError::Source {
            sampler: self.name,
            source: err,
        }
    }
}
