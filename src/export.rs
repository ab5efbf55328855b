//! Publication of the gathered registry after each cycle.
//!
//! In `expose` mode Prometheus scrapes `/metrics`, so there is nothing to do
//! once a cycle finishes. In `pushgateway` mode the registry is pushed.

use prometheus::Registry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::error::ExportError;

/// How metrics leave the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExporterMode {
    #[default]
    Expose,
    Pushgateway,
}

/// Publishes the registry contents once a cycle completed.
///
/// Implementations may block; the scheduler calls them on the blocking pool.
pub trait Publisher: Send + Sync {
    fn name(&self) -> &'static str;

    fn publish(&self, registry: &Registry) -> Result<(), ExportError>;
}

/// Pull mode: metrics are served over HTTP, publishing is a no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct PullPublisher;

impl Publisher for PullPublisher {
    fn name(&self) -> &'static str {
        "expose"
    }

    fn publish(&self, _registry: &Registry) -> Result<(), ExportError> {
        Ok(())
    }
}

/// Pushes every gathered family to a Prometheus Pushgateway.
#[derive(Debug, Clone)]
pub struct PushGatewayPublisher {
    url: String,
    job: String,
}

impl PushGatewayPublisher {
    pub fn new(url: impl Into<String>, job: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            job: job.into(),
        }
    }
}

impl Publisher for PushGatewayPublisher {
    fn name(&self) -> &'static str {
        "pushgateway"
    }

    fn publish(&self, registry: &Registry) -> Result<(), ExportError> {
        let families = registry.gather();
        debug!(url = %self.url, job = %self.job, families = families.len(), "Pushing metrics");
        prometheus::push_metrics(&self.job, HashMap::new(), &self.url, families, None).map_err(
            |e| ExportError::Push {
                url: self.url.clone(),
                reason: e.to_string(),
            },
        )
    }
}
