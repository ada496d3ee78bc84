//! Workflow assembly
//!
//! Assembly turns a workflow file into an [`AssembledWorkflow`]: load the
//! definition, build the assembly-time variable tiers, expand blueprint
//! references, validate task names, select hosts through the inventory
//! filters, and create one device context per selected host. Any failure
//! aborts the whole load before any device context exists.
//!
//! The assembled workflow also carries the two driver touchpoints:
//! [`AssembledWorkflow::resolve_task_args`] immediately before a task runs
//! on a host, and [`AssembledWorkflow::store_task_result`] afterwards.

use super::{derive_domain, ExpandedTask, FailureStrategy, WorkflowDefinition};
use crate::blueprint::{parse_bool_str, BlueprintCatalog, BlueprintExpander};
use crate::config::{load_vars_file, Settings, DEFAULTS_FILENAME};
use crate::error::{WireflowError, WorkflowError};
use crate::inventory::InventoryProvider;
use crate::registry::{FilterRegistry, TaskRegistry};
use crate::template::has_markers;
use crate::vars::{load_env_vars, ResolutionTracker, TierSnapshots, VariableResolver};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

pub struct WorkflowAssembler {
    settings: Settings,
    catalog: BlueprintCatalog,
    tasks: TaskRegistry,
    filters: FilterRegistry,
}

impl WorkflowAssembler {
    /// Builds the assembler, discovering the blueprint catalog from the
    /// configured directories.
    pub fn new(settings: Settings, tasks: TaskRegistry, filters: FilterRegistry) -> Self {
        let catalog = BlueprintCatalog::discover(&settings.blueprint_dirs);
        Self {
            settings,
            catalog,
            tasks,
            filters,
        }
    }

    pub fn catalog(&self) -> &BlueprintCatalog {
        &self.catalog
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Loads a workflow and expands its blueprints without touching the
    /// inventory. Used by `wireflow expand` and as the first half of
    /// [`assemble`](Self::assemble).
    pub async fn expand(
        &self,
        workflow_path: &Path,
        cli_vars: HashMap<String, Value>,
    ) -> Result<(WorkflowDefinition, Vec<ExpandedTask>, TierSnapshots), WireflowError> {
        let content = tokio::fs::read_to_string(workflow_path)
            .await
            .map_err(|e| WorkflowError::Read {
                path: workflow_path.to_path_buf(),
                reason: e.to_string(),
            })?;
        let definition = WorkflowDefinition::from_str(&content, workflow_path)?;

        let tiers = self.build_tiers(workflow_path, &definition, cli_vars)?;
        let assembly_vars = flatten_assembly(&tiers);

        let mut expander = BlueprintExpander::new(&self.catalog);
        let literal = expander.expand_workflow(&definition.tasks, &assembly_vars)?;
        let expanded = literal
            .into_iter()
            .enumerate()
            .map(|(i, def)| ExpandedTask { id: i + 1, def })
            .collect::<Vec<_>>();

        info!(
            workflow = %definition.name,
            tasks = expanded.len(),
            "workflow expanded"
        );
        Ok((definition, expanded, tiers))
    }

    /// Fully assembles a workflow against an inventory. Fails before any
    /// device context exists if expansion, task validation, or host
    /// selection fails.
    pub async fn assemble(
        &self,
        workflow_path: &Path,
        cli_vars: HashMap<String, Value>,
        inventory: Arc<dyn InventoryProvider>,
    ) -> Result<AssembledWorkflow, WireflowError> {
        let (definition, tasks, tiers) = self.expand(workflow_path, cli_vars).await?;

        self.validate_task_names(&tasks)?;
        let hosts = self.select_hosts(&definition, inventory.as_ref())?;

        let resolver = VariableResolver::new(tiers, inventory);
        resolver.create_contexts(hosts.iter().map(String::as_str));

        info!(
            workflow = %definition.name,
            hosts = hosts.len(),
            "workflow assembled"
        );
        Ok(AssembledWorkflow {
            name: definition.name.clone(),
            description: definition.description.clone(),
            failure_strategy: definition.failure_strategy.unwrap_or_default(),
            processors: definition.processors.clone().unwrap_or_default(),
            hosts,
            tasks,
            resolver,
            tracker: ResolutionTracker::new(),
        })
    }

    /// Builds the assembly-time tier snapshots: CLI, inline-workflow,
    /// paired-workflow, domain-default, global-default, environment. The
    /// runtime and inventory tiers do not exist yet at this point.
    fn build_tiers(
        &self,
        workflow_path: &Path,
        definition: &WorkflowDefinition,
        cli_vars: HashMap<String, Value>,
    ) -> Result<TierSnapshots, WireflowError> {
        let mut tiers = TierSnapshots {
            cli: cli_vars,
            environment: load_env_vars(),
            ..Default::default()
        };

        let defaults_path = self.settings.vars_dir.join(DEFAULTS_FILENAME);
        tiers.global_default = load_vars_file(&defaults_path)?;

        if let Some(domain) = derive_domain(workflow_path, &self.settings.workflow_roots) {
            let domain_path = self.settings.vars_dir.join(&domain).join(DEFAULTS_FILENAME);
            tiers.domain_default = load_vars_file(&domain_path)?;
        }

        tiers.paired_workflow = load_vars_file(&paired_vars_path(workflow_path))?;

        if let Some(inline) = &definition.vars {
            tiers.inline_workflow = inline
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
        }

        Ok(tiers)
    }

    fn validate_task_names(&self, tasks: &[ExpandedTask]) -> Result<(), WorkflowError> {
        let mut unknown: Vec<String> = tasks
            .iter()
            .map(|t| t.name().to_string())
            .filter(|name| !self.tasks.contains(name))
            .collect();
        unknown.sort();
        unknown.dedup();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(WorkflowError::UnknownTasks { names: unknown })
        }
    }

    fn select_hosts(
        &self,
        definition: &WorkflowDefinition,
        inventory: &dyn InventoryProvider,
    ) -> Result<Vec<String>, WorkflowError> {
        let mut hosts = inventory.host_names();
        if let Some(filters) = &definition.inventory_filters {
            for (name, filter_args) in filters {
                let filter = self
                    .filters
                    .get(name)
                    .ok_or_else(|| WorkflowError::UnknownFilter { name: name.clone() })?;
                hosts.retain(|host| {
                    inventory
                        .host(host)
                        .map(|data| filter(data, filter_args))
                        .unwrap_or(false)
                });
                debug!(filter = %name, remaining = hosts.len(), "applied inventory filter");
            }
        }
        Ok(hosts)
    }
}

/// The paired vars file sits next to the workflow file, named
/// `<stem>.vars.yaml`.
fn paired_vars_path(workflow_path: &Path) -> std::path::PathBuf {
    let stem = workflow_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    workflow_path.with_file_name(format!("{stem}.vars.yaml"))
}

/// Flattens the assembly-time tiers into one map, lowest precedence first:
/// environment, global-default, domain-default, paired-workflow,
/// inline-workflow, CLI.
fn flatten_assembly(tiers: &TierSnapshots) -> HashMap<String, Value> {
    let mut flat = HashMap::new();
    for layer in [
        &tiers.environment,
        &tiers.global_default,
        &tiers.domain_default,
        &tiers.paired_workflow,
        &tiers.inline_workflow,
        &tiers.cli,
    ] {
        for (name, value) in layer {
            flat.insert(name.clone(), value.clone());
        }
    }
    flat
}

/// A fully expanded workflow bound to its selected hosts and resolver,
/// handed to the external execution driver.
#[derive(Debug)]
pub struct AssembledWorkflow {
    pub name: String,
    pub description: Option<String>,
    pub failure_strategy: FailureStrategy,
    pub processors: Vec<serde_json::Map<String, Value>>,
    pub hosts: Vec<String>,
    tasks: Vec<ExpandedTask>,
    resolver: VariableResolver,
    tracker: ResolutionTracker,
}

impl AssembledWorkflow {
    pub fn tasks(&self) -> &[ExpandedTask] {
        &self.tasks
    }

    pub fn resolver(&self) -> &VariableResolver {
        &self.resolver
    }

    /// Driver touchpoint (a): called immediately before running `task` on
    /// `host`. Evaluates the task's `if` gate first; only when the gate
    /// passes are the deferred argument templates rendered, using the
    /// current (possibly hook-mutated) context. Returns `None` when the host
    /// is gated out.
    pub fn resolve_task_args(
        &self,
        task: &ExpandedTask,
        host: &str,
    ) -> Result<Option<serde_json::Map<String, Value>>, WireflowError> {
        let run = match &task.def.condition {
            None => true,
            Some(condition) => self.evaluate_gate(task, condition, host)?,
        };
        self.tracker
            .mark_gate_evaluated(task.id, task.name(), host, !run)?;

        if !run {
            debug!(task = %task.name(), host, "host gated out of task");
            return Ok(None);
        }

        let empty = serde_json::Map::new();
        let args = task.def.args.as_ref().unwrap_or(&empty);
        let resolved = self.resolver.resolve_args(args, host, None)?;
        self.tracker
            .mark_args_resolved(task.id, task.name(), host)?;
        Ok(Some(resolved))
    }

    /// Driver touchpoint (b): called after `task` completed on `host`.
    /// Stores the result into the host's runtime tier when the task carries
    /// a `set_to` hook. Legal only once argument resolution finished, so a
    /// task's own result can never feed its own templates.
    pub fn store_task_result(
        &self,
        task: &ExpandedTask,
        host: &str,
        result: Value,
    ) -> Result<(), WireflowError> {
        self.tracker
            .check_can_store(task.id, task.name(), host)?;
        if let Some(variable) = &task.def.set_to {
            self.resolver
                .set_runtime_variable(variable, result, host)?;
            info!(task = %task.name(), host, variable = %variable, "stored task result");
        }
        Ok(())
    }

    /// Diagnostic view: the fully precedence-resolved variables for one
    /// host.
    pub fn effective_variables(&self, host: &str) -> std::collections::BTreeMap<String, Value> {
        self.resolver.effective_variables(host)
    }

    fn evaluate_gate(
        &self,
        task: &ExpandedTask,
        condition: &Value,
        host: &str,
    ) -> Result<bool, WireflowError> {
        let rendered = match condition {
            Value::Bool(b) => return Ok(*b),
            Value::String(s) if has_markers(s) => self.resolver.render_string(s, host, None)?,
            Value::String(s) => s.clone(),
            other => serde_json::to_string(other).unwrap_or_default(),
        };
        parse_bool_str(&rendered).ok_or_else(|| {
            WorkflowError::TaskCondition {
                task: task.name().to_string(),
                host: host.to_string(),
                rendered,
            }
            .into()
        })
    }
}
