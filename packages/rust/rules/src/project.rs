//! Project snapshot consumed by rule predicates.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use cncflow_shared::{CncFlowError, Result};
use serde::{Deserialize, Serialize};

use crate::catalog::ToolCatalog;

/// One machining step inside a compound job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    #[serde(default, alias = "featureName", skip_serializing_if = "Option::is_none")]
    pub feature_name: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub job_type: Option<String>,
}

impl Job {
    /// Feature name, falling back to the job type, or `""` when both are
    /// missing or empty.
    pub fn feature_text(&self) -> &str {
        self.feature_name
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.job_type.as_deref().filter(|s| !s.is_empty()))
            .unwrap_or("")
    }
}

/// Ordered group of jobs produced from one source file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompoundJob {
    #[serde(default)]
    pub jobs: Vec<Job>,
}

/// In-memory view of one machining project.
///
/// Built once, then only lent out by shared reference, so predicates can
/// never observe it half-updated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Project {
    machine: Option<String>,
    tools_by_category: BTreeMap<String, BTreeSet<String>>,
    operation_types: BTreeSet<String>,
    compound_jobs: BTreeMap<String, CompoundJob>,
}

impl Project {
    pub fn builder() -> ProjectBuilder {
        ProjectBuilder::default()
    }

    pub fn machine(&self) -> Option<&str> {
        self.machine.as_deref()
    }

    /// Whether any tool of `category` is used.
    pub fn has_tool_category(&self, category: &str) -> bool {
        self.tools_by_category
            .get(category)
            .is_some_and(|tools| !tools.is_empty())
    }

    /// Whether an operation tagged `operation_type` exists (case-insensitive).
    pub fn has_operation_type(&self, operation_type: &str) -> bool {
        let wanted = operation_type.to_lowercase();
        self.operation_types.iter().any(|op| op.to_lowercase() == wanted)
    }

    pub fn tools_by_category(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.tools_by_category
    }

    pub fn compound_jobs(&self) -> &BTreeMap<String, CompoundJob> {
        &self.compound_jobs
    }

    /// Every job of every compound job.
    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.compound_jobs.values().flat_map(|cj| cj.jobs.iter())
    }
}

// ---------------------------------------------------------------------------
// ProjectBuilder
// ---------------------------------------------------------------------------

/// Accumulates project data before freezing it into a [`Project`].
#[derive(Debug, Default)]
pub struct ProjectBuilder {
    project: Project,
}

impl ProjectBuilder {
    pub fn machine(mut self, machine: impl Into<String>) -> Self {
        self.project.machine = Some(machine.into());
        self
    }

    /// Record a tool directly under a known category.
    pub fn tool(mut self, category: impl Into<String>, tool_id: impl Into<String>) -> Self {
        self.project
            .tools_by_category
            .entry(category.into())
            .or_default()
            .insert(tool_id.into());
        self
    }

    /// Record a tool under every category the catalog assigns it.
    pub fn catalogued_tool(mut self, catalog: &ToolCatalog, tool_id: &str) -> Self {
        for category in catalog.categorize(tool_id) {
            self = self.tool(category, tool_id);
        }
        self
    }

    pub fn operation_type(mut self, operation_type: impl Into<String>) -> Self {
        self.project.operation_types.insert(operation_type.into());
        self
    }

    pub fn compound_job(mut self, file_name: impl Into<String>, job: CompoundJob) -> Self {
        self.project.compound_jobs.insert(file_name.into(), job);
        self
    }

    pub fn build(self) -> Project {
        self.project
    }
}

// ---------------------------------------------------------------------------
// ProjectSnapshot
// ---------------------------------------------------------------------------

/// On-disk JSON form of a project, with raw (uncategorized) tool ids.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectSnapshot {
    #[serde(default)]
    pub machine: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub operation_types: Vec<String>,
    #[serde(default)]
    pub compound_jobs: BTreeMap<String, CompoundJob>,
}

impl ProjectSnapshot {
    /// Read a snapshot from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CncFlowError::io(path, e))?;
        serde_json::from_str(&content)
            .map_err(|e| CncFlowError::parse(format!("{}: {e}", path.display())))
    }

    /// Categorize tools and freeze into a [`Project`].
    pub fn into_project(self, catalog: &ToolCatalog) -> Project {
        let mut builder = Project::builder();
        if let Some(machine) = self.machine {
            builder = builder.machine(machine);
        }
        for tool_id in &self.tools {
            builder = builder.catalogued_tool(catalog, tool_id);
        }
        for op in self.operation_types {
            builder = builder.operation_type(op);
        }
        for (file, job) in self.compound_jobs {
            builder = builder.compound_job(file, job);
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_text_falls_back_to_type() {
        let job = Job {
            feature_name: Some(String::new()),
            job_type: Some("Contour AutoCorrection".into()),
        };
        assert_eq!(job.feature_text(), "Contour AutoCorrection");
        assert_eq!(Job::default().feature_text(), "");
    }

    #[test]
    fn operation_type_is_case_insensitive() {
        let project = Project::builder().operation_type("Helical Drilling").build();
        assert!(project.has_operation_type("helical drilling"));
        assert!(!project.has_operation_type("helical"));
    }

    #[test]
    fn catalogued_tools_land_in_categories() {
        let catalog = ToolCatalog::default();
        let project = Project::builder()
            .catalogued_tool(&catalog, "FRA-X7604")
            .catalogued_tool(&catalog, "MYSTERY-1")
            .build();
        assert!(project.has_tool_category("xfeed"));
        assert!(!project.has_tool_category("gundrill"));
        assert_eq!(project.tools_by_category().len(), 1);
    }

    #[test]
    fn snapshot_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("project.json");
        std::fs::write(
            &path,
            r#"{
                "machine": "DMU 85 monoblock MINUS",
                "tools": ["FRA-P15251", "TGT-3"],
                "operation_types": ["helical drilling"],
                "compound_jobs": {
                    "W5246NS01007B4.h": {
                        "jobs": [{ "featureName": "Plane AutoCorrection" }, { "type": "Drill" }]
                    }
                }
            }"#,
        )
        .unwrap();

        let project = ProjectSnapshot::load(&path)
            .unwrap()
            .into_project(&ToolCatalog::default());

        assert_eq!(project.machine(), Some("DMU 85 monoblock MINUS"));
        assert!(project.has_tool_category("endmill_finish"));
        assert!(project.has_tool_category("tgt"));
        let texts: Vec<&str> = project.jobs().map(Job::feature_text).collect();
        assert_eq!(texts, ["Plane AutoCorrection", "Drill"]);
    }

    #[test]
    fn malformed_snapshot_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = ProjectSnapshot::load(&path).unwrap_err();
        assert!(matches!(err, CncFlowError::Parse { .. }));
    }
}
