//! Declarative applicability predicates.

use serde::{Deserialize, Serialize};

use crate::project::Project;

/// A pure condition over a [`Project`].
///
/// Predicates are plain data, so rule sets can be loaded from configuration
/// and evaluated without side effects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    /// Always applies.
    Always,
    /// The project uses a tool from any of these categories.
    ToolCategory { any_of: Vec<String> },
    /// The project has an operation tagged with any of these types.
    OperationType { any_of: Vec<String> },
    /// Any of these machine names occurs in the project's machine
    /// identifier, case-insensitively.
    Machine { any_of: Vec<String> },
    /// A single job's lower-cased feature text contains every one of these
    /// substrings.
    CompoundJob { contains_all: Vec<String> },
    All { of: Vec<Predicate> },
    Any { of: Vec<Predicate> },
    Not { predicate: Box<Predicate> },
}

impl Predicate {
    pub fn evaluate(&self, project: &Project) -> bool {
        match self {
            Self::Always => true,
            Self::ToolCategory { any_of } => any_of.iter().any(|c| project.has_tool_category(c)),
            Self::OperationType { any_of } => {
                any_of.iter().any(|op| project.has_operation_type(op))
            }
            Self::Machine { any_of } => {
                let Some(machine) = project.machine() else {
                    return false;
                };
                let machine = machine.to_lowercase();
                any_of.iter().any(|m| machine.contains(&m.to_lowercase()))
            }
            Self::CompoundJob { contains_all } => {
                let needles: Vec<String> = contains_all.iter().map(|s| s.to_lowercase()).collect();
                project.jobs().any(|job| {
                    let text = job.feature_text().to_lowercase();
                    needles.iter().all(|n| text.contains(n.as_str()))
                })
            }
            Self::All { of } => of.iter().all(|p| p.evaluate(project)),
            Self::Any { of } => of.iter().any(|p| p.evaluate(project)),
            Self::Not { predicate } => !predicate.evaluate(project),
        }
    }

    /// Describe the first structural problem, if any: an empty list would
    /// make a leaf vacuously true or false.
    pub(crate) fn problem(&self) -> Option<String> {
        match self {
            Self::Always => None,
            Self::ToolCategory { any_of } if any_of.is_empty() => {
                Some("tool_category needs at least one category".into())
            }
            Self::OperationType { any_of } if any_of.is_empty() => {
                Some("operation_type needs at least one type".into())
            }
            Self::Machine { any_of } if any_of.iter().all(|m| m.is_empty()) => {
                Some("machine needs at least one non-empty name".into())
            }
            Self::CompoundJob { contains_all } if contains_all.is_empty() => {
                Some("compound_job needs at least one substring".into())
            }
            Self::All { of } | Self::Any { of } => {
                if of.is_empty() {
                    Some("all/any needs at least one predicate".into())
                } else {
                    of.iter().find_map(Predicate::problem)
                }
            }
            Self::Not { predicate } => predicate.problem(),
            _ => None,
        }
    }
}
