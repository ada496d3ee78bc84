//! Blueprints: reusable task-list fragments
//!
//! A blueprint file holds exactly one top-level key, `tasks`, a sequence of
//! task nodes. Workflows reference blueprints by catalog name or by path;
//! references are replaced by the referenced task lists at assembly time,
//! recursively, before any runtime variable or inventory data exists.

mod catalog;
mod expander;

pub use catalog::BlueprintCatalog;
pub use expander::BlueprintExpander;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry of a task list: either a literal task invocation or, before
/// expansion, a blueprint reference. Expanded task lists contain only
/// literal tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskNode {
    Blueprint(BlueprintReference),
    Task(TaskDef),
}

/// Reference to a blueprint by catalog name (file stem) or by path. Paths
/// resolve against the current working directory, never the referencing
/// file's location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlueprintReference {
    pub blueprint: String,

    /// Optional condition; a false condition drops the reference without
    /// loading the blueprint file.
    #[serde(rename = "if", default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Value>,

    /// Per-instance variable overrides, layered over the assembly context
    /// for this reference's subtree only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vars: Option<serde_json::Map<String, Value>>,
}

/// Literal task invocation: name, argument templates, and hook configuration
/// (`if` gate, `set_to` result capture).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskDef {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<serde_json::Map<String, Value>>,

    /// Per-host execution gate, rendered before the task's argument
    /// templates (two-phase deferred resolution).
    #[serde(rename = "if", default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Value>,

    /// Name of the runtime variable that receives the task's result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_to: Option<String>,
}

/// String forms accepted as boolean condition results, case-insensitive.
pub const TRUTHY_VALUES: &[&str] = &["true", "yes", "on", "1"];
pub const FALSY_VALUES: &[&str] = &["false", "no", "off", "0"];

/// Maps a rendered condition string to a boolean, or `None` when the string
/// is not in either set.
pub fn parse_bool_str(s: &str) -> Option<bool> {
    let lowered = s.trim().to_lowercase();
    if TRUTHY_VALUES.contains(&lowered.as_str()) {
        Some(true)
    } else if FALSY_VALUES.contains(&lowered.as_str()) {
        Some(false)
    } else {
        None
    }
}
