//! HTTP endpoint handlers for the exporter.
//!
//! - `/metrics`: Prometheus metrics endpoint
//! - `/health`: Cycle statistics and sampler state
//! - `/config`: Effective configuration

pub mod config;
pub mod health;
pub mod metrics;

pub use config::config_handler;
pub use health::health_handler;
pub use metrics::metrics_handler;
