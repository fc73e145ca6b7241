//! Rules and the ordered rule set.

use std::collections::HashSet;
use std::path::Path;

use cncflow_shared::{CncFlowError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::predicate::Predicate;
use crate::project::Project;

/// Machines that must not run reconditioned tools.
pub const NO_RECONDITIONED_TOOL_MACHINES: [&str; 2] =
    ["DMU 100P duoblock Minus", "DMU 85 monoblock MINUS"];

/// What a failed rule is reported against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    Ncfile,
    Tool,
    Operation,
}

/// A named validation rule and the condition under which it must run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub description: String,
    pub failure_type: FailureType,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub predicate: Predicate,
}

fn default_enabled() -> bool {
    true
}

fn strings(xs: &[&str]) -> Vec<String> {
    xs.iter().map(|s| s.to_string()).collect()
}

impl Rule {
    fn new(id: &str, description: &str, failure_type: FailureType, predicate: Predicate) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            failure_type,
            enabled: true,
            predicate,
        }
    }
}

// ---------------------------------------------------------------------------
// RuleSet
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RuleFile {
    #[serde(default)]
    rules: Vec<Rule>,
}

/// Ordered, immutable collection of rules with unique ids.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Validate and freeze a rule list.
    pub fn new(rules: Vec<Rule>) -> Result<Self> {
        let mut seen = HashSet::new();
        for rule in &rules {
            if rule.id.trim().is_empty() {
                return Err(CncFlowError::validation("rule id must not be empty"));
            }
            if !seen.insert(rule.id.as_str()) {
                return Err(CncFlowError::validation(format!(
                    "duplicate rule id '{}'",
                    rule.id
                )));
            }
            if let Some(problem) = rule.predicate.problem() {
                return Err(CncFlowError::validation(format!(
                    "rule '{}': {problem}",
                    rule.id
                )));
            }
        }
        Ok(Self { rules })
    }

    /// Parse a TOML document of `[[rules]]` tables.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: RuleFile =
            toml::from_str(content).map_err(|e| CncFlowError::parse(e.to_string()))?;
        Self::new(file.rules)
    }

    /// Load a rule set TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CncFlowError::io(path, e))?;
        Self::from_toml_str(&content).map_err(|e| match e {
            CncFlowError::Parse { message } => {
                CncFlowError::parse(format!("{}: {message}", path.display()))
            }
            other => other,
        })
    }

    /// The rules shipped with cncflow.
    pub fn builtin() -> Self {
        Self {
            rules: vec![
                Rule::new(
                    "GunDrill60MinLimit",
                    "Gundrill tools should not exceed 60 minutes per NC file",
                    FailureType::Ncfile,
                    Predicate::Always,
                ),
                // The rule skips AutoCorrection jobs itself.
                Rule::new(
                    "SingleToolInNC",
                    "Each NC file should use only one tool",
                    FailureType::Ncfile,
                    Predicate::Always,
                ),
                Rule::new(
                    "M110Helical",
                    "M110 command required for helical drilling operations",
                    FailureType::Ncfile,
                    Predicate::All {
                        of: vec![
                            Predicate::ToolCategory {
                                any_of: strings(&["endmill_finish", "xfeed", "tgt"]),
                            },
                            Predicate::OperationType {
                                any_of: strings(&["helical drilling"]),
                            },
                        ],
                    },
                ),
                Rule::new(
                    "M110Contour",
                    "M110 contour operations must have RL compensation",
                    FailureType::Ncfile,
                    Predicate::OperationType {
                        any_of: strings(&["2d contour", "contour milling"]),
                    },
                ),
                Rule::new(
                    "ReconditionedTool",
                    "Validate reconditioned tool usage",
                    FailureType::Tool,
                    Predicate::Machine {
                        any_of: strings(&NO_RECONDITIONED_TOOL_MACHINES),
                    },
                ),
                Rule::new(
                    "AutoCorrectionPlane",
                    "AutoCorrection plane operations validation",
                    FailureType::Operation,
                    Predicate::CompoundJob {
                        contains_all: strings(&["plane", "autocorrection"]),
                    },
                ),
                Rule::new(
                    "AutoCorrectionContour",
                    "AutoCorrection contour operations validation",
                    FailureType::Operation,
                    Predicate::CompoundJob {
                        contains_all: strings(&["contour", "autocorrection"]),
                    },
                ),
            ],
        }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn get(&self, id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == id)
    }

    /// Enabled rules whose predicate holds for `project`, in configured order.
    #[instrument(skip_all, fields(machine = project.machine().unwrap_or("-")))]
    pub fn applicable_rules(&self, project: &Project) -> Vec<&Rule> {
        let applicable: Vec<&Rule> = self
            .rules
            .iter()
            .filter(|rule| rule.enabled)
            .filter(|rule| {
                let applies = rule.predicate.evaluate(project);
                debug!(rule = %rule.id, applies, "rule evaluated");
                applies
            })
            .collect();

        debug!(
            total = self.rules.len(),
            applicable = applicable.len(),
            "rule applicability decided"
        );
        applicable
    }
}
