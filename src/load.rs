//! Load-average sampling.

use std::sync::Arc;
use tracing::{debug, instrument};

use crate::error::{SamplerError, SourceError};
use crate::metrics::WorkloadMetrics;
use crate::sampler::SamplerSwitch;
use crate::system::{self, LoadAverage};

/// Source of the 1/5/15 minute load averages.
pub trait LoadAverageSource: Send + Sync {
    fn read(&self) -> Result<LoadAverage, SourceError>;
}

/// Reads /proc/loadavg.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcLoadAvgSource;

impl LoadAverageSource for ProcLoadAvgSource {
    fn read(&self) -> Result<LoadAverage, SourceError> {
        system::read_load_average()
    }
}

/// Records each load-average window into the core-scaled histogram.
pub struct LoadSampler {
    source: Arc<dyn LoadAverageSource>,
    metrics: WorkloadMetrics,
    switch: SamplerSwitch,
}

impl LoadSampler {
    pub fn new(source: Arc<dyn LoadAverageSource>, metrics: WorkloadMetrics) -> Self {
        let switch = SamplerSwitch::new("load", &metrics);
        Self {
            source,
            metrics,
            switch,
        }
    }

    pub fn switch(&self) -> &SamplerSwitch {
        &self.switch
    }

    #[instrument(skip(self))]
    pub async fn sample(&self) -> Result<LoadAverage, SamplerError> {
        self.switch.ensure_enabled()?;
        let load = self
            .source
            .read()
            .map_err(|e| self.switch.on_source_error(e))?;

        for (window, value) in load.windows() {
            self.metrics.observe_load(window, value);
        }

        debug!(
            one = load.one_min,
            five = load.five_min,
            fifteen = load.fifteen_min,
            "Load average sampled"
        );
        Ok(load)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Registry;

    struct FixedLoad(LoadAverage);

    impl LoadAverageSource for FixedLoad {
        fn read(&self) -> Result<LoadAverage, SourceError> {
            Ok(self.0)
        }
    }

    struct BrokenLoad;

    impl LoadAverageSource for BrokenLoad {
        fn read(&self) -> Result<LoadAverage, SourceError> {
            Err(SourceError::Malformed {
                source_name: "loadavg",
                reason: "garbage".into(),
            })
        }
    }

    #[tokio::test]
    async fn test_observes_each_window() {
        let metrics = WorkloadMetrics::new(&Registry::new(), 4).unwrap();
        let sampler = LoadSampler::new(
            Arc::new(FixedLoad(LoadAverage {
                one_min: 0.05,
                five_min: 1.5,
                fifteen_min: 20.0,
            })),
            metrics.clone(),
        );

        sampler.sample().await.unwrap();

        // buckets for 4 cores: 0.1 0.2 0.4 0.8 1 2 4 12
        let one = metrics.load_average.with_label_values(&["1"]);
        assert_eq!(one.get_sample_count(), 1);
        let fifteen = metrics.load_average.with_label_values(&["15"]);
        assert_eq!(fifteen.get_sample_count(), 1);
        assert!((fifteen.get_sample_sum() - 20.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_malformed_source_keeps_sampler_enabled() {
        let metrics = WorkloadMetrics::new(&Registry::new(), 1).unwrap();
        let sampler = LoadSampler::new(Arc::new(BrokenLoad), metrics);
        assert!(sampler.sample().await.is_err());
        assert!(sampler.switch().is_enabled());
    }
}
