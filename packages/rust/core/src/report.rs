//! Cycle reports and progress callbacks.

use std::time::Duration;

use chrono::{DateTime, Utc};
use cncflow_shared::{CycleId, Stage, StageOutcome, StageResult};
use tracing::{info, warn};

/// What started a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Timer,
    Manual,
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timer => f.write_str("timer"),
            Self::Manual => f.write_str("manual"),
        }
    }
}

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing changed since the last scan; no stage ran.
    NoNewWork,
    /// Every enabled stage succeeded.
    Completed,
    /// `stage` failed and the remaining stages were not run.
    Aborted { stage: Stage, error: String },
}

/// Summary of one cycle. Not persisted.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle_id: CycleId,
    pub trigger: Trigger,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub outcome: CycleOutcome,
    /// One entry per stage reached, in run order.
    pub stages: Vec<StageResult>,
}

impl CycleReport {
    /// Number of stages that actually called a remote service.
    pub fn invoked_stages(&self) -> usize {
        self.stages
            .iter()
            .filter(|s| s.outcome != StageOutcome::Skipped)
            .count()
    }

    /// Emit the cycle summary to the log.
    pub(crate) fn log_summary(&self) {
        let duration_ms = self.duration.as_millis() as u64;
        for stage in &self.stages {
            info!(
                cycle_id = %self.cycle_id,
                stage = %stage.stage,
                outcome = ?stage.outcome,
                duration_ms = stage.duration.as_millis() as u64,
                "{}",
                stage.message.as_deref().unwrap_or("completed")
            );
        }
        match &self.outcome {
            CycleOutcome::NoNewWork => {
                info!(cycle_id = %self.cycle_id, duration_ms, "no new files, cycle skipped");
            }
            CycleOutcome::Completed => {
                info!(
                    cycle_id = %self.cycle_id,
                    duration_ms,
                    stages = self.stages.len(),
                    "pipeline completed"
                );
            }
            CycleOutcome::Aborted { stage, error } => {
                warn!(
                    cycle_id = %self.cycle_id,
                    duration_ms,
                    %stage,
                    error = %error,
                    "pipeline ended early"
                );
            }
        }
    }
}

/// Progress callback for cycle execution.
pub trait CycleReporter: Send + Sync {
    /// Called once change detection decided to run stages.
    fn stage_started(&self, stage: Stage);
    /// Called for every stage result, including skipped stages.
    fn stage_finished(&self, result: &StageResult);
    /// Called when the cycle is over, whatever its outcome.
    fn cycle_finished(&self, report: &CycleReport);
}

/// No-op reporter for headless/test usage.
pub struct SilentReporter;

impl CycleReporter for SilentReporter {
    fn stage_started(&self, _stage: Stage) {}
    fn stage_finished(&self, _result: &StageResult) {}
    fn cycle_finished(&self, _report: &CycleReport) {}
}
