//! Workflow definitions
//!
//! A workflow file's top level holds exactly one key, `workflow`, an object
//! with the workflow's name, optional metadata, inline variables, inventory
//! filters, processor configuration, a failure strategy, and the task list.
//! Task execution itself belongs to the external driver; this module only
//! models and loads the definition.

mod assembler;

pub use assembler::{AssembledWorkflow, WorkflowAssembler};

use crate::blueprint::{TaskDef, TaskNode};
use crate::error::WorkflowError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Inline workflow variables (the inline-workflow tier).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vars: Option<BTreeMap<String, Value>>,

    /// Filter name to filter arguments, applied in order to the inventory's
    /// host list. All filters must pass for a host to be selected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inventory_filters: Option<BTreeMap<String, Value>>,

    /// Processor configuration, passed through to the external driver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processors: Option<Vec<serde_json::Map<String, Value>>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_strategy: Option<FailureStrategy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,

    #[serde(default)]
    pub tasks: Vec<TaskNode>,
}

/// Disposition of per-host failures, consumed by the external
/// failure-strategy layer. Accepts `fail-fast`/`fail_fast` style spellings
/// case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(try_from = "String", into = "String")]
pub enum FailureStrategy {
    #[default]
    FailFast,
    SkipFailed,
    RunAll,
}

impl TryFrom<String> for FailureStrategy {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.trim().to_lowercase().replace('_', "-").as_str() {
            "fail-fast" => Ok(FailureStrategy::FailFast),
            "skip-failed" => Ok(FailureStrategy::SkipFailed),
            "run-all" => Ok(FailureStrategy::RunAll),
            other => Err(format!(
                "invalid failure strategy '{other}', expected fail-fast, skip-failed or run-all"
            )),
        }
    }
}

impl From<FailureStrategy> for String {
    fn from(strategy: FailureStrategy) -> Self {
        match strategy {
            FailureStrategy::FailFast => "fail-fast".to_string(),
            FailureStrategy::SkipFailed => "skip-failed".to_string(),
            FailureStrategy::RunAll => "run-all".to_string(),
        }
    }
}

/// A literal task after blueprint expansion, with its position-stable id.
/// The id keys the per-host resolution state machine.
#[derive(Debug, Clone, Serialize)]
pub struct ExpandedTask {
    pub id: usize,
    #[serde(flatten)]
    pub def: TaskDef,
}

impl ExpandedTask {
    pub fn name(&self) -> &str {
        &self.def.name
    }
}

impl WorkflowDefinition {
    /// Parses a workflow document. The top level must contain exactly one
    /// key, `workflow`.
    pub fn from_str(content: &str, path: &Path) -> Result<Self, WorkflowError> {
        let doc: serde_yaml::Value =
            serde_yaml::from_str(content).map_err(|e| WorkflowError::InvalidStructure {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let serde_yaml::Value::Mapping(map) = doc else {
            return Err(WorkflowError::InvalidStructure {
                path: path.to_path_buf(),
                reason: "top level must be a mapping".to_string(),
            });
        };

        let mut keys: Vec<String> = map
            .keys()
            .map(|k| match k {
                serde_yaml::Value::String(s) => s.clone(),
                other => format!("{other:?}"),
            })
            .collect();
        keys.sort();
        if keys != ["workflow"] {
            return Err(WorkflowError::InvalidStructure {
                path: path.to_path_buf(),
                reason: format!(
                    "must contain only the 'workflow' key, found: {}",
                    keys.join(", ")
                ),
            });
        }

        let workflow_value = map.get("workflow").cloned().unwrap();
        let definition: WorkflowDefinition =
            serde_yaml::from_value(workflow_value).map_err(|e| WorkflowError::InvalidStructure {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        Ok(definition)
    }

    pub fn load(path: &Path) -> Result<Self, WorkflowError> {
        let content = std::fs::read_to_string(path).map_err(|e| WorkflowError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_str(&content, path)
    }
}

/// Derives the workflow's domain: the first path segment immediately beneath
/// the containing workflow root. A workflow directly in a root, or outside
/// every root, has no domain.
pub fn derive_domain(workflow_path: &Path, workflow_roots: &[PathBuf]) -> Option<String> {
    let absolute = workflow_path
        .canonicalize()
        .unwrap_or_else(|_| workflow_path.to_path_buf());

    for root in workflow_roots {
        let root_abs = root.canonicalize().unwrap_or_else(|_| root.clone());
        let relative = match absolute.strip_prefix(&root_abs) {
            Ok(rel) => rel,
            Err(_) => match workflow_path.strip_prefix(root) {
                Ok(rel) => rel,
                Err(_) => continue,
            },
        };

        let mut parts = relative.components();
        let first = parts.next()?;
        if parts.next().is_some() {
            let domain = first.as_os_str().to_string_lossy().into_owned();
            info!(workflow = %workflow_path.display(), domain, "derived workflow domain");
            return Some(domain);
        }
        // Directly inside a workflow root: no domain tier.
        return None;
    }

    warn!(
        workflow = %workflow_path.display(),
        "workflow is outside every configured workflow root, no domain variables will load"
    );
    None
}
