//! Rule applicability for CNC machining projects.
//!
//! This crate provides:
//! - [`Project`]: the read-only project snapshot rules are evaluated against
//! - [`ToolCatalog`]: groups raw tool identifiers into categories
//! - [`Predicate`]: declarative, pure applicability conditions
//! - [`RuleSet`]: the ordered rule collection and its evaluation

pub mod catalog;
pub mod predicate;
pub mod project;
pub mod rule;

pub use catalog::ToolCatalog;
pub use predicate::Predicate;
pub use project::{CompoundJob, Job, Project, ProjectSnapshot};
pub use rule::{FailureType, Rule, RuleSet};
