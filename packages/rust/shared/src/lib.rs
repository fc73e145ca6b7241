//! Shared types, error model, and configuration for cncflow.
//!
//! This crate is the foundation depended on by all other cncflow crates.
//! It provides:
//! - [`CncFlowError`]: the unified error type
//! - Domain types ([`Stage`], [`ServiceEndpoint`], [`StageResult`], [`CycleId`])
//! - Configuration ([`AppConfig`], [`WatchConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, RulesConfig, ServiceConfig, ServicesConfig, WatchConfig, config_dir,
    config_file_path, init_config, load_config, load_config_from,
};
pub use error::{CncFlowError, InvokeErrorKind, Result};
pub use types::{CycleId, ServiceEndpoint, Stage, StageOutcome, StageResult};
