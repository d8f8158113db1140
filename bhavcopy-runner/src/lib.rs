//! Bhavcopy Runner: run orchestration on top of `bhavcopy-core`.
//!
//! This crate provides:
//! - TOML pipeline configuration with defaults and validation
//! - The run-scoped context (run id, calendar, layout, ledger)
//! - The date-loop orchestrator (sequential or on a bounded worker pool)
//! - Raw input discovery for standalone curation

pub mod config;
pub mod context;
pub mod discovery;
pub mod orchestrator;

pub use config::{ConfigError, CurationConfig, PipelineConfig};
pub use context::{RunContext, RunOutcome};
pub use discovery::{discover_inputs, glob_to_regex, DiscoveryError};
pub use orchestrator::{RunError, RunMode, RunOrchestrator, RunSummary};
