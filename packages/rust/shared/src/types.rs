//! Core domain types for cncflow pipeline cycles.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::config::{ServiceConfig, ServicesConfig};
use crate::error::{CncFlowError, Result};

// ---------------------------------------------------------------------------
// CycleId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for cycle identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CycleId(pub Uuid);

impl CycleId {
    /// Generate a new time-sortable cycle identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for CycleId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CycleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// One remote service invocation within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Scans source files into the working set.
    PrimaryScan,
    /// Runs the quality rules over scanned projects.
    Analysis,
    /// Scans tool tables referenced by the analysed projects.
    ToolScan,
}

impl Stage {
    /// Every stage, in the order a cycle runs them. Each stage consumes the
    /// previous stage's output, so this order is fixed.
    pub const ALL: [Stage; 3] = [Stage::PrimaryScan, Stage::Analysis, Stage::ToolScan];

    /// Display name used in logs and reports.
    pub fn name(self) -> &'static str {
        match self {
            Self::PrimaryScan => "primary-scan",
            Self::Analysis => "analysis",
            Self::ToolScan => "tool-scan",
        }
    }

    /// HTTP path the stage's service is triggered on.
    pub fn path(self) -> &'static str {
        match self {
            Self::PrimaryScan | Self::ToolScan => "/api/scan",
            Self::Analysis => "/api/analyze",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// ServiceEndpoint
// ---------------------------------------------------------------------------

/// Where and whether a stage's service is called. Immutable after load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub stage: Stage,
    /// Base address without trailing slash.
    pub address: String,
    pub enabled: bool,
    pub timeout: Duration,
}

impl ServiceEndpoint {
    /// Build an endpoint, validating the address as an absolute http(s) URL.
    pub fn new(
        stage: Stage,
        address: impl Into<String>,
        enabled: bool,
        timeout: Duration,
    ) -> Result<Self> {
        let address = address.into();
        let parsed = Url::parse(&address).map_err(|e| {
            CncFlowError::validation(format!("invalid address for {stage}: '{address}': {e}"))
        })?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(CncFlowError::validation(format!(
                "address for {stage} must be http or https, got '{address}'"
            )));
        }

        Ok(Self {
            stage,
            address: address.trim_end_matches('/').to_string(),
            enabled,
            timeout,
        })
    }

    /// Build an endpoint from its `[services.<stage>]` entry.
    pub fn from_config(stage: Stage, config: &ServiceConfig) -> Result<Self> {
        Self::new(
            stage,
            config.address.clone(),
            config.enabled,
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// All endpoints in stage order.
    pub fn all_from_config(services: &ServicesConfig) -> Result<Vec<Self>> {
        Stage::ALL
            .iter()
            .map(|&stage| Self::from_config(stage, services.for_stage(stage)))
            .collect()
    }

    /// Full URL for a path on this service.
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{path}", self.address)
    }
}

// ---------------------------------------------------------------------------
// StageResult
// ---------------------------------------------------------------------------

/// How one stage of a cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Success,
    Skipped,
    Failed,
}

/// Per-stage record, kept only until the cycle report is emitted.
#[derive(Debug, Clone)]
pub struct StageResult {
    pub stage: Stage,
    pub outcome: StageOutcome,
    /// Remote `message` on success, error text on failure.
    pub message: Option<String>,
    pub duration: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_order_and_paths() {
        let names: Vec<&str> = Stage::ALL.iter().map(|s| s.name()).collect();
        assert_eq!(names, ["primary-scan", "analysis", "tool-scan"]);
        assert_eq!(Stage::PrimaryScan.path(), "/api/scan");
        assert_eq!(Stage::Analysis.path(), "/api/analyze");
        assert_eq!(Stage::ToolScan.path(), "/api/scan");
    }

    #[test]
    fn endpoint_trims_trailing_slash() {
        let ep = ServiceEndpoint::new(
            Stage::Analysis,
            "http://localhost:3005/",
            true,
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(ep.url_for("/api/analyze"), "http://localhost:3005/api/analyze");
    }

    #[test]
    fn endpoint_rejects_bad_address() {
        let err = ServiceEndpoint::new(Stage::ToolScan, "localhost", true, Duration::ZERO)
            .unwrap_err();
        assert!(err.to_string().contains("tool-scan"));

        let err = ServiceEndpoint::new(Stage::ToolScan, "ftp://host", true, Duration::ZERO)
            .unwrap_err();
        assert!(err.to_string().contains("http or https"));
    }

    #[test]
    fn endpoints_from_default_config_are_ordered() {
        let endpoints = ServiceEndpoint::all_from_config(&ServicesConfig::default()).unwrap();
        let stages: Vec<Stage> = endpoints.iter().map(|e| e.stage).collect();
        assert_eq!(stages, Stage::ALL);
        assert_eq!(endpoints[1].address, "http://localhost:3005");
        assert_eq!(endpoints[0].timeout, Duration::from_secs(300));
    }
}
