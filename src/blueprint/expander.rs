//! Recursive blueprint expansion with circular-dependency detection
//!
//! Expansion happens once, single-threaded, during workflow assembly and
//! strictly before any device context exists. Only the assembly-time
//! variable tiers (CLI, inline-workflow, paired-workflow, domain-default,
//! global-default, environment) are visible here; runtime and inventory
//! variables are not.
//!
//! The walk uses an explicit frame stack instead of call-stack recursion, so
//! expansion depth and error chains stay deterministic. An identifier
//! appearing twice simultaneously on the stack is a circular dependency;
//! sequential reuse of a blueprint (siblings, or after its prior expansion
//! fully popped) is valid.

use super::{parse_bool_str, BlueprintCatalog, TaskDef, TaskNode};
use crate::error::BlueprintError;
use crate::template::{has_markers, resolve_value_deep, MapSource, TemplateEngine};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

pub struct BlueprintExpander<'a> {
    catalog: &'a BlueprintCatalog,
    engine: TemplateEngine,
    cwd: PathBuf,
    cache: HashMap<PathBuf, Arc<Vec<TaskNode>>>,
}

struct Frame {
    nodes: std::vec::IntoIter<TaskNode>,
    ctx: Arc<HashMap<String, Value>>,
    owns_identifier: bool,
}

impl<'a> BlueprintExpander<'a> {
    pub fn new(catalog: &'a BlueprintCatalog) -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::with_cwd(catalog, cwd)
    }

    /// Path references resolve against `cwd`; injected for deterministic
    /// tests.
    pub fn with_cwd(catalog: &'a BlueprintCatalog, cwd: PathBuf) -> Self {
        Self {
            catalog,
            engine: TemplateEngine::new(),
            cwd,
            cache: HashMap::new(),
        }
    }

    /// Expands every blueprint reference in `tasks`, recursively, returning
    /// a task list containing only literal tasks. Any failure aborts the
    /// whole expansion; no partial task list is produced.
    pub fn expand_workflow(
        &mut self,
        tasks: &[TaskNode],
        assembly_vars: &HashMap<String, Value>,
    ) -> Result<Vec<TaskDef>, BlueprintError> {
        let mut output = Vec::new();
        let mut frames = vec![Frame {
            nodes: tasks.to_vec().into_iter(),
            ctx: Arc::new(assembly_vars.clone()),
            owns_identifier: false,
        }];
        // Identifiers currently being expanded, outermost first. id_stack
        // holds canonical paths for cycle detection; name_stack the display
        // names reported in error chains.
        let mut id_stack: Vec<PathBuf> = Vec::new();
        let mut name_stack: Vec<String> = Vec::new();

        loop {
            let next = match frames.last_mut() {
                Some(frame) => frame.nodes.next(),
                None => break,
            };
            let Some(node) = next else {
                let finished = frames.pop().unwrap();
                if finished.owns_identifier {
                    id_stack.pop();
                    name_stack.pop();
                }
                continue;
            };
            let ctx = frames.last().unwrap().ctx.clone();

            match node {
                TaskNode::Task(task) => output.push(task),
                TaskNode::Blueprint(reference) => {
                    let resolved_ref = if has_markers(&reference.blueprint) {
                        self.engine.render(&reference.blueprint, &MapSource::new(&ctx))?
                    } else {
                        reference.blueprint.clone()
                    };

                    if let Some(condition) = &reference.condition {
                        if !self.evaluate_condition(condition, &ctx)? {
                            debug!(blueprint = %resolved_ref, "condition false, dropping reference");
                            continue;
                        }
                    }

                    let path = self.resolve_reference(&resolved_ref)?;
                    let identifier = path.canonicalize().unwrap_or(path);
                    let disp = display_name(&identifier);

                    if let Some(first) = id_stack.iter().position(|p| p == &identifier) {
                        let mut chain: Vec<String> = name_stack[first..].to_vec();
                        chain.push(disp);
                        return Err(BlueprintError::Circular { chain });
                    }

                    let blueprint_tasks = self.load_blueprint(&identifier)?;
                    let child_ctx = match &reference.vars {
                        Some(overrides) => {
                            Arc::new(self.layer_overrides(&ctx, overrides)?)
                        }
                        None => ctx,
                    };

                    debug!(blueprint = %disp, depth = id_stack.len(), "expanding blueprint");
                    id_stack.push(identifier);
                    name_stack.push(disp);
                    frames.push(Frame {
                        nodes: blueprint_tasks.as_ref().clone().into_iter(),
                        ctx: child_ctx,
                        owns_identifier: true,
                    });
                }
            }
        }

        Ok(output)
    }

    /// Evaluates a blueprint `if` condition against the assembly context.
    /// YAML booleans pass through; strings are rendered when templated and
    /// must land in the truthy/falsy string sets.
    fn evaluate_condition(
        &self,
        condition: &Value,
        ctx: &HashMap<String, Value>,
    ) -> Result<bool, BlueprintError> {
        match condition {
            Value::Bool(b) => Ok(*b),
            Value::String(s) => {
                let rendered = if has_markers(s) {
                    self.engine.render(s, &MapSource::new(ctx))?
                } else {
                    s.clone()
                };
                parse_bool_str(&rendered).ok_or_else(|| BlueprintError::Condition {
                    condition: s.clone(),
                    rendered,
                })
            }
            other => {
                let text = serde_json::to_string(other).unwrap_or_default();
                Err(BlueprintError::Condition {
                    condition: text.clone(),
                    rendered: text,
                })
            }
        }
    }

    /// Resolution order: catalog lookup for bare names, then the filesystem.
    /// Relative paths resolve against the current working directory, not the
    /// referencing file.
    fn resolve_reference(&self, reference: &str) -> Result<PathBuf, BlueprintError> {
        let as_path = Path::new(reference);
        let is_pathish = as_path.is_absolute() || reference.contains('/');

        if !is_pathish {
            if let Some(path) = self.catalog.get(reference) {
                return Ok(path.clone());
            }
        }

        let mut searched = Vec::new();
        if !is_pathish {
            searched.push(format!("catalog ({} entries)", self.catalog.len()));
        }

        if as_path.is_absolute() {
            if as_path.exists() {
                return Ok(as_path.to_path_buf());
            }
            searched.push(reference.to_string());
        } else {
            let candidate = self.cwd.join(as_path);
            if candidate.exists() {
                return Ok(candidate);
            }
            searched.push(format!(
                "{} (relative paths resolve against the current working directory)",
                candidate.display()
            ));
        }

        Err(BlueprintError::NotFound {
            reference: reference.to_string(),
            searched,
        })
    }

    /// Loads and validates a blueprint file: the top level must contain
    /// exactly one key, `tasks`, holding a sequence. Parsed files are cached
    /// so repeated references load once.
    fn load_blueprint(&mut self, path: &Path) -> Result<Arc<Vec<TaskNode>>, BlueprintError> {
        if let Some(cached) = self.cache.get(path) {
            return Ok(cached.clone());
        }

        let content = std::fs::read_to_string(path).map_err(|e| BlueprintError::Load {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let doc: serde_yaml::Value =
            serde_yaml::from_str(&content).map_err(|e| BlueprintError::Load {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let serde_yaml::Value::Mapping(map) = doc else {
            return Err(BlueprintError::InvalidStructure {
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
        if keys != ["tasks"] {
            return Err(BlueprintError::InvalidStructure {
                path: path.to_path_buf(),
                reason: format!(
                    "must contain only the 'tasks' key, found: {}",
                    keys.join(", ")
                ),
            });
        }

        let tasks_value = map.get("tasks").cloned().unwrap();
        if !tasks_value.is_sequence() {
            return Err(BlueprintError::InvalidStructure {
                path: path.to_path_buf(),
                reason: "'tasks' must be a sequence".to_string(),
            });
        }
        let tasks: Vec<TaskNode> =
            serde_yaml::from_value(tasks_value).map_err(|e| BlueprintError::InvalidStructure {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let tasks = Arc::new(tasks);
        self.cache.insert(path.to_path_buf(), tasks.clone());
        Ok(tasks)
    }

    /// Layers per-instance overrides over the parent context. Override
    /// values may themselves be templates over the parent context.
    fn layer_overrides(
        &self,
        parent: &HashMap<String, Value>,
        overrides: &serde_json::Map<String, Value>,
    ) -> Result<HashMap<String, Value>, BlueprintError> {
        let mut merged = parent.clone();
        let source = MapSource::new(parent);
        for (name, value) in overrides {
            let resolved = resolve_value_deep(&self.engine, value, &source)?;
            merged.insert(name.clone(), resolved);
        }
        Ok(merged)
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) -> PathBuf {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    fn parse_tasks(yaml: &str) -> Vec<TaskNode> {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn expand(
        dir: &TempDir,
        workflow_tasks: &str,
        vars: &[(&str, Value)],
    ) -> Result<Vec<TaskDef>, BlueprintError> {
        let catalog = BlueprintCatalog::discover(&[dir.path().to_path_buf()]);
        let mut expander =
            BlueprintExpander::with_cwd(&catalog, dir.path().to_path_buf());
        let assembly_vars = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        expander.expand_workflow(&parse_tasks(workflow_tasks), &assembly_vars)
    }

    #[test]
    fn literal_tasks_pass_through() {
        let dir = tempfile::tempdir().unwrap();
        let tasks = expand(&dir, "- name: a\n- name: b\n", &[]).unwrap();
        assert_eq!(
            tasks.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            ["a", "b"]
        );
    }

    #[test]
    fn expands_nested_blueprints_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "outer.yaml",
            "tasks:\n  - name: pre\n  - blueprint: inner\n  - name: post\n",
        );
        write(dir.path(), "inner.yaml", "tasks:\n  - name: middle\n");

        let tasks = expand(&dir, "- blueprint: outer\n- name: last\n", &[]).unwrap();
        assert_eq!(
            tasks.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            ["pre", "middle", "post", "last"]
        );
    }

    #[test]
    fn direct_self_reference_reports_two_entry_chain() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.yaml", "tasks:\n  - blueprint: a\n");

        let err = expand(&dir, "- blueprint: a\n", &[]).unwrap_err();
        match err {
            BlueprintError::Circular { chain } => {
                assert_eq!(chain, vec!["a.yaml", "a.yaml"]);
            }
            other => panic!("expected circular error, got {other}"),
        }
    }

    #[test]
    fn indirect_cycle_reports_full_chain() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.yaml", "tasks:\n  - blueprint: b\n");
        write(dir.path(), "b.yaml", "tasks:\n  - blueprint: c\n");
        write(dir.path(), "c.yaml", "tasks:\n  - blueprint: a\n");

        let err = expand(&dir, "- blueprint: a\n", &[]).unwrap_err();
        match err {
            BlueprintError::Circular { chain } => {
                assert_eq!(chain, vec!["a.yaml", "b.yaml", "c.yaml", "a.yaml"]);
            }
            other => panic!("expected circular error, got {other}"),
        }
    }

    #[test]
    fn sibling_reuse_is_not_circular() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "twice.yaml", "tasks:\n  - name: x\n  - name: y\n");

        let tasks = expand(&dir, "- blueprint: twice\n- blueprint: twice\n", &[]).unwrap();
        assert_eq!(
            tasks.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            ["x", "y", "x", "y"]
        );
    }

    #[test]
    fn reuse_after_nested_expansion_completes_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "leaf.yaml", "tasks:\n  - name: leaf\n");
        write(
            dir.path(),
            "mid.yaml",
            "tasks:\n  - blueprint: leaf\n  - blueprint: leaf\n",
        );

        let tasks = expand(&dir, "- blueprint: mid\n- blueprint: leaf\n", &[]).unwrap();
        assert_eq!(tasks.len(), 3);
    }

    #[test]
    fn false_condition_drops_reference_without_loading() {
        let dir = tempfile::tempdir().unwrap();
        // The referenced blueprint does not exist; a false condition must
        // short-circuit before any path resolution or load is attempted.
        let tasks = expand(
            &dir,
            "- blueprint: does_not_exist\n  if: false\n- name: kept\n",
            &[],
        )
        .unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].name, "kept");
    }

    #[test]
    fn templated_condition_uses_assembly_vars() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "maybe.yaml", "tasks:\n  - name: included\n");

        let tasks = expand(
            &dir,
            "- blueprint: maybe\n  if: \"${enable}\"\n",
            &[("enable", json!("yes"))],
        )
        .unwrap();
        assert_eq!(tasks[0].name, "included");

        let tasks = expand(
            &dir,
            "- blueprint: maybe\n  if: \"${enable}\"\n",
            &[("enable", json!(false))],
        )
        .unwrap();
        assert!(tasks.is_empty());
    }

    #[test]
    fn non_boolean_condition_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "maybe.yaml", "tasks: []");

        let err = expand(
            &dir,
            "- blueprint: maybe\n  if: \"${word}\"\n",
            &[("word", json!("perhaps"))],
        )
        .unwrap_err();
        assert!(matches!(err, BlueprintError::Condition { .. }));
    }

    #[test]
    fn templated_reference_name() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "prod_rollout.yaml", "tasks:\n  - name: rollout\n");

        let tasks = expand(
            &dir,
            "- blueprint: \"${env}_rollout\"\n",
            &[("env", json!("prod"))],
        )
        .unwrap();
        assert_eq!(tasks[0].name, "rollout");
    }

    #[test]
    fn path_references_resolve_against_cwd() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "external/x.yaml", "tasks:\n  - name: ext\n");

        let tasks = expand(&dir, "- blueprint: external/x.yaml\n", &[]).unwrap();
        assert_eq!(tasks[0].name, "ext");

        // `./x.yaml` is not directly under the working directory.
        let err = expand(&dir, "- blueprint: ./x.yaml\n", &[]).unwrap_err();
        assert!(matches!(err, BlueprintError::NotFound { .. }));
    }

    #[test]
    fn missing_blueprint_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = expand(&dir, "- blueprint: nope\n", &[]).unwrap_err();
        match err {
            BlueprintError::NotFound { reference, .. } => assert_eq!(reference, "nope"),
            other => panic!("expected not-found, got {other}"),
        }
    }

    #[test]
    fn instance_vars_scope_to_their_subtree() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "set_vlan.yaml",
            "tasks:\n  - name: set_vlan\n    args:\n      vlan: \"${vlan}\"\n",
        );

        let tasks = expand(
            &dir,
            concat!(
                "- blueprint: set_vlan\n  vars:\n    vlan: 200\n",
                "- blueprint: set_vlan\n",
            ),
            &[("vlan", json!(100))],
        )
        .unwrap();

        // Expansion leaves argument templates unresolved; the override
        // scoping is visible through the blueprint-reference templates
        // instead, so assert on the expanded structure here.
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].args.as_ref().unwrap()["vlan"], json!("${vlan}"));
    }

    #[test]
    fn instance_vars_affect_nested_references() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "by_env.yaml", "tasks:\n  - blueprint: \"${env}_tasks\"\n");
        write(dir.path(), "prod_tasks.yaml", "tasks:\n  - name: prod_task\n");
        write(dir.path(), "lab_tasks.yaml", "tasks:\n  - name: lab_task\n");

        let tasks = expand(
            &dir,
            concat!(
                "- blueprint: by_env\n  vars:\n    env: lab\n",
                "- blueprint: by_env\n",
            ),
            &[("env", json!("prod"))],
        )
        .unwrap();
        assert_eq!(
            tasks.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            ["lab_task", "prod_task"]
        );
    }

    #[test]
    fn blueprint_with_extra_keys_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "bad.yaml", "tasks: []\ndescription: nope\n");

        let err = expand(&dir, "- blueprint: bad\n", &[]).unwrap_err();
        assert!(matches!(err, BlueprintError::InvalidStructure { .. }));
    }
}
