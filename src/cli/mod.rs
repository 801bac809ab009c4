//! CLI module
//!
//! Command-line interface for the scenario runner.

pub mod args;
pub mod config;
pub mod report;

pub use args::CliArgs;
pub use config::{Config, RecordSpec, ScenarioFile, SeedSpec};
pub use report::{ReportDisplay, ScenarioStats};
