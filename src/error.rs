//! Error types for the wireflow crate
//!
//! Assembly-time errors ([`BlueprintError`], [`ConfigError`], most
//! [`WorkflowError`] variants) abort the entire workflow load. Template errors
//! raised during task execution are scoped to a single host's task step and
//! are handed to the caller's failure-strategy layer for disposition.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while rendering templates or accessing variables.
#[derive(Error, Debug)]
pub enum TemplateError {
    /// Malformed template text. Fatal to the enclosing resolution call.
    #[error("template syntax error in '{template}': {reason}")]
    Syntax { template: String, reason: String },

    /// A referenced variable was not found in any tier. Fatal to the current
    /// per-host task step only.
    #[error("variable '{variable}' not found{}", fmt_host(.host))]
    Resolution {
        variable: String,
        host: Option<String>,
    },

    /// Attempted write to the inventory tier or a reserved namespace.
    #[error("variable '{variable}' is read-only{}", fmt_host(.host))]
    ReadOnlyVariable {
        variable: String,
        host: Option<String>,
    },

    /// Deferred argument resolution was requested out of order for a
    /// task/host pair (e.g. before the hook gate was evaluated).
    #[error("deferred resolution for task '{task}' on host '{host}' is in state {state}, expected {expected}")]
    ResolutionOrder {
        task: String,
        host: String,
        state: String,
        expected: String,
    },
}

fn fmt_host(host: &Option<String>) -> String {
    match host {
        Some(h) => format!(" for host '{h}'"),
        None => String::new(),
    }
}

/// Errors raised during blueprint expansion. All of these abort workflow
/// assembly; no partial workflow is ever produced.
#[derive(Error, Debug)]
pub enum BlueprintError {
    /// Blueprint reference could not be resolved via the catalog or the
    /// filesystem. Relative paths resolve against the current working
    /// directory, not the referencing file.
    #[error("blueprint '{reference}' not found (searched: {})", .searched.join(", "))]
    NotFound {
        reference: String,
        searched: Vec<String>,
    },

    /// A blueprint is being expanded while already on the expansion stack.
    /// The chain lists identifiers in order from the first occurrence to the
    /// repeat.
    #[error("circular blueprint dependency: {}", .chain.join(" -> "))]
    Circular { chain: Vec<String> },

    /// A blueprint `if` condition did not evaluate to a boolean.
    #[error("blueprint condition '{condition}' did not evaluate to a boolean (got '{rendered}')")]
    Condition { condition: String, rendered: String },

    /// Blueprint file exists but its structure is invalid (top level must be
    /// exactly one key, `tasks`, holding a sequence).
    #[error("invalid blueprint file {}: {reason}", .path.display())]
    InvalidStructure { path: PathBuf, reason: String },

    /// Blueprint file could not be read or parsed as YAML.
    #[error("failed to load blueprint {}: {reason}", .path.display())]
    Load { path: PathBuf, reason: String },

    /// Template rendering failed while resolving a blueprint reference or
    /// condition at assembly time.
    #[error("failed to resolve blueprint template: {0}")]
    Template(#[from] TemplateError),
}

/// Errors raised while loading or validating settings.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("settings file not found: {}", .path.display())]
    NotFound { path: PathBuf },

    #[error("failed to parse settings file {}: {reason}", .path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("invalid setting '{setting}': {reason}")]
    Invalid { setting: String, reason: String },
}

/// Errors raised while loading or assembling a workflow.
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("failed to read workflow file {}: {reason}", .path.display())]
    Read { path: PathBuf, reason: String },

    /// Workflow files must contain exactly one top-level key, `workflow`.
    #[error("invalid workflow file {}: {reason}", .path.display())]
    InvalidStructure { path: PathBuf, reason: String },

    /// Task names must exist in the task registry at assembly time.
    #[error("unknown task(s) not present in the task catalog: {}", .names.join(", "))]
    UnknownTasks { names: Vec<String> },

    #[error("unknown inventory filter '{name}'")]
    UnknownFilter { name: String },

    /// A task-level `if` condition rendered to something that is not a
    /// boolean. Scoped to the offending host's task step.
    #[error("task '{task}' condition rendered to non-boolean '{rendered}' on host '{host}'")]
    TaskCondition {
        task: String,
        host: String,
        rendered: String,
    },
}

/// Unified error type covering all wireflow subsystems.
#[derive(Error, Debug)]
pub enum WireflowError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Blueprint(#[from] BlueprintError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}
