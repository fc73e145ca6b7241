//! Pipeline orchestration for cncflow.
//!
//! This crate ties change detection and remote stage invocation into the
//! scan cycle (`controller`) and drives cycles from a timer or on demand
//! (`scheduler`).

pub mod controller;
pub mod report;
pub mod scheduler;

pub use controller::{CycleState, PipelineController, ServiceStatus, StatusSnapshot};
pub use report::{CycleOutcome, CycleReport, CycleReporter, SilentReporter, Trigger};
pub use scheduler::Scheduler;
