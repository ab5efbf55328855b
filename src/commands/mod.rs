//! CLI command implementations for herakles-workload-exporter.
//!
//! - `check`: System validation
//! - `config`: Configuration file generation
//! - `test`: Run sampling cycles without serving
//! - `generate`: Test data generation

pub mod check;
pub mod config;
pub mod generate;

pub use check::command_check;
pub use config::command_config;
pub use generate::command_generate_testdata;
pub use test::command_test;
