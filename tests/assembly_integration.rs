//! End-to-end assembly tests: a workflow tree on disk is loaded, expanded,
//! and driven through the resolver the way the external execution driver
//! would.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use wireflow::config::Settings;
use wireflow::error::{BlueprintError, WireflowError};
use wireflow::inventory::{InventoryProvider, YamlInventory};
use wireflow::registry::{FilterRegistry, TaskRegistry};
use wireflow::workflow::{AssembledWorkflow, WorkflowAssembler};

struct Project {
    _dir: TempDir,
    root: PathBuf,
}

impl Project {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        for sub in ["workflows", "vars", "blueprints"] {
            fs::create_dir_all(root.join(sub)).unwrap();
        }
        Self { _dir: dir, root }
    }

    fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    fn settings(&self) -> Settings {
        Settings {
            workflow_roots: vec![self.root.join("workflows")],
            vars_dir: self.root.join("vars"),
            blueprint_dirs: vec![self.root.join("blueprints")],
            inventory_file: None,
        }
    }

    fn assembler(&self) -> WorkflowAssembler {
        let mut tasks = TaskRegistry::with_builtins();
        tasks.register("configure_vlan", |_ctx| Ok(json!("configured")));
        tasks.register("collect_facts", |_ctx| Ok(json!({"serial": "abc123"})));
        tasks.register("verify", |_ctx| Ok(json!(true)));
        WorkflowAssembler::new(self.settings(), tasks, FilterRegistry::with_builtins())
    }

    fn inventory(&self) -> Arc<dyn InventoryProvider> {
        self.write(
            "inventory.yaml",
            concat!(
                "hosts:\n",
                "  sw01:\n    platform: eos\n    data:\n      site: dc1\n      enabled: \"yes\"\n      mgmt_vlan: 99\n",
                "  sw02:\n    platform: eos\n    data:\n      site: dc2\n      enabled: \"no\"\n",
                "  fw01:\n    platform: panos\n",
            ),
        );
        Arc::new(YamlInventory::load(&self.root.join("inventory.yaml")).unwrap())
    }
}

async fn assemble(project: &Project, workflow: &Path) -> AssembledWorkflow {
    project
        .assembler()
        .assemble(workflow, HashMap::new(), project.inventory())
        .await
        .unwrap()
}

#[tokio::test]
async fn domain_defaults_load_from_first_segment_under_root() {
    let project = Project::new();
    project.write("vars/defaults.yaml", "x: global\nonly_global: yes\n");
    project.write("vars/net/defaults.yaml", "x: net\n");
    // A decoy domain matching the second path segment must not load.
    project.write("vars/prod/defaults.yaml", "x: prod\n");
    let workflow = project.write(
        "workflows/net/prod/deploy.yaml",
        "workflow:\n  name: deploy\n  tasks:\n    - name: verify\n",
    );

    let assembled = assemble(&project, &workflow).await;
    assert_eq!(
        assembled.resolver().get_variable("x", "sw01").unwrap(),
        json!("net")
    );
    assert_eq!(
        assembled
            .resolver()
            .get_variable("only_global", "sw01")
            .unwrap(),
        json!(true)
    );
}

#[tokio::test]
async fn workflow_directly_in_root_gets_no_domain_tier() {
    let project = Project::new();
    project.write("vars/defaults.yaml", "x: global\n");
    project.write("vars/deploy/defaults.yaml", "x: decoy\n");
    let workflow = project.write(
        "workflows/deploy.yaml",
        "workflow:\n  name: deploy\n  tasks:\n    - name: verify\n",
    );

    let assembled = assemble(&project, &workflow).await;
    assert_eq!(
        assembled.resolver().get_variable("x", "sw01").unwrap(),
        json!("global")
    );
}

#[tokio::test]
async fn paired_vars_file_sits_between_inline_and_domain() {
    let project = Project::new();
    project.write("vars/defaults.yaml", "a: default\nb: default\nc: default\n");
    project.write("workflows/deploy.vars.yaml", "a: paired\nb: paired\n");
    let workflow = project.write(
        "workflows/deploy.yaml",
        concat!(
            "workflow:\n  name: deploy\n  vars:\n    a: inline\n",
            "  tasks:\n    - name: verify\n",
        ),
    );

    let assembled = assemble(&project, &workflow).await;
    let resolver = assembled.resolver();
    assert_eq!(resolver.get_variable("a", "sw01").unwrap(), json!("inline"));
    assert_eq!(resolver.get_variable("b", "sw01").unwrap(), json!("paired"));
    assert_eq!(resolver.get_variable("c", "sw01").unwrap(), json!("default"));
}

#[tokio::test]
async fn cli_vars_outrank_inline_vars() {
    let project = Project::new();
    let workflow = project.write(
        "workflows/deploy.yaml",
        "workflow:\n  name: deploy\n  vars:\n    vlan: 1\n  tasks:\n    - name: verify\n",
    );

    let assembled = project
        .assembler()
        .assemble(
            &workflow,
            [("vlan".to_string(), json!(42))].into(),
            project.inventory(),
        )
        .await
        .unwrap();
    assert_eq!(
        assembled.resolver().get_variable("vlan", "sw01").unwrap(),
        json!(42)
    );
}

#[tokio::test]
async fn inventory_filters_select_hosts() {
    let project = Project::new();
    let workflow = project.write(
        "workflows/deploy.yaml",
        concat!(
            "workflow:\n  name: deploy\n",
            "  inventory_filters:\n    platform: eos\n",
            "  tasks:\n    - name: verify\n",
        ),
    );

    let assembled = assemble(&project, &workflow).await;
    assert_eq!(assembled.hosts, vec!["sw01", "sw02"]);
}

#[tokio::test]
async fn unknown_task_aborts_assembly() {
    let project = Project::new();
    let workflow = project.write(
        "workflows/deploy.yaml",
        "workflow:\n  name: deploy\n  tasks:\n    - name: not_registered\n",
    );

    let err = project
        .assembler()
        .assemble(&workflow, HashMap::new(), project.inventory())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not_registered"));
}

#[tokio::test]
async fn blueprints_expand_through_the_workflow_tiers() {
    let project = Project::new();
    project.write("vars/defaults.yaml", "flavor: baseline\n");
    project.write(
        "blueprints/baseline_checks.yaml",
        "tasks:\n  - name: collect_facts\n  - name: verify\n",
    );
    let workflow = project.write(
        "workflows/deploy.yaml",
        concat!(
            "workflow:\n  name: deploy\n  tasks:\n",
            "    - blueprint: \"${flavor}_checks\"\n",
            "    - name: configure_vlan\n",
        ),
    );

    let assembled = assemble(&project, &workflow).await;
    let names: Vec<_> = assembled.tasks().iter().map(|t| t.name()).collect();
    assert_eq!(names, ["collect_facts", "verify", "configure_vlan"]);
}

#[tokio::test]
async fn circular_blueprint_aborts_assembly_with_chain() {
    let project = Project::new();
    project.write("blueprints/a.yaml", "tasks:\n  - blueprint: b\n");
    project.write("blueprints/b.yaml", "tasks:\n  - blueprint: a\n");
    let workflow = project.write(
        "workflows/deploy.yaml",
        "workflow:\n  name: deploy\n  tasks:\n    - blueprint: a\n",
    );

    let err = project
        .assembler()
        .assemble(&workflow, HashMap::new(), project.inventory())
        .await
        .unwrap_err();
    match err {
        WireflowError::Blueprint(BlueprintError::Circular { chain }) => {
            assert_eq!(chain, vec!["a.yaml", "b.yaml", "a.yaml"]);
        }
        other => panic!("expected circular error, got {other}"),
    }
}

#[tokio::test]
async fn gate_skips_host_without_touching_its_argument_templates() {
    let project = Project::new();
    let workflow = project.write(
        "workflows/deploy.yaml",
        concat!(
            "workflow:\n  name: deploy\n  tasks:\n",
            "    - name: configure_vlan\n",
            "      if: \"${host.data.enabled}\"\n",
            "      args:\n        vlan: \"${host.data.mgmt_vlan}\"\n",
        ),
    );

    let assembled = assemble(&project, &workflow).await;
    let task = &assembled.tasks()[0];

    // sw01: enabled, mgmt_vlan present; args resolve.
    let args = assembled.resolve_task_args(task, "sw01").unwrap().unwrap();
    assert_eq!(args["vlan"], json!(99));

    // sw02: gated out. Its args reference mgmt_vlan, which sw02 does not
    // have; skipping must short-circuit before argument resolution so no
    // error surfaces.
    assert!(assembled.resolve_task_args(task, "sw02").unwrap().is_none());
}

#[tokio::test]
async fn runtime_failure_is_scoped_to_one_host() {
    let project = Project::new();
    let workflow = project.write(
        "workflows/deploy.yaml",
        concat!(
            "workflow:\n  name: deploy\n  tasks:\n",
            "    - name: configure_vlan\n",
            "      args:\n        vlan: \"${host.data.mgmt_vlan}\"\n",
        ),
    );

    let assembled = assemble(&project, &workflow).await;
    let task = &assembled.tasks()[0];

    // sw02 lacks mgmt_vlan: its step fails, sw01's is unaffected.
    assert!(assembled.resolve_task_args(task, "sw02").is_err());
    assert!(assembled.resolve_task_args(task, "sw01").unwrap().is_some());
}

#[tokio::test]
async fn set_to_stores_result_for_later_tasks_on_the_same_host_only() {
    let project = Project::new();
    let workflow = project.write(
        "workflows/deploy.yaml",
        concat!(
            "workflow:\n  name: deploy\n  tasks:\n",
            "    - name: collect_facts\n      set_to: facts\n",
            "    - name: verify\n      args:\n        serial: \"${facts.serial}\"\n",
        ),
    );

    let assembled = assemble(&project, &workflow).await;
    let collect = &assembled.tasks()[0];
    let verify = &assembled.tasks()[1];

    // Driver flow on sw01: resolve, run, store.
    assembled.resolve_task_args(collect, "sw01").unwrap();
    assembled
        .store_task_result(collect, "sw01", json!({"serial": "abc123"}))
        .unwrap();

    let args = assembled.resolve_task_args(verify, "sw01").unwrap().unwrap();
    assert_eq!(args["serial"], json!("abc123"));

    // sw02 never stored facts; its step fails in isolation.
    assembled.resolve_task_args(collect, "sw02").unwrap();
    assert!(assembled.resolve_task_args(verify, "sw02").is_err());
}

#[tokio::test]
async fn result_storage_requires_resolved_args() {
    let project = Project::new();
    let workflow = project.write(
        "workflows/deploy.yaml",
        "workflow:\n  name: deploy\n  tasks:\n    - name: collect_facts\n      set_to: facts\n",
    );

    let assembled = assemble(&project, &workflow).await;
    let task = &assembled.tasks()[0];

    // Storing before the task's arguments resolved is an ordering bug.
    let err = assembled
        .store_task_result(task, "sw01", json!(1))
        .unwrap_err();
    assert!(err.to_string().contains("ArgsResolved"));
}

#[tokio::test]
async fn global_namespace_is_visible_across_hosts_after_the_barrier() {
    let project = Project::new();
    let workflow = project.write(
        "workflows/deploy.yaml",
        concat!(
            "workflow:\n  name: deploy\n  tasks:\n",
            "    - name: collect_facts\n",
            "    - name: verify\n      args:\n        total: \"${global.counter}\"\n",
        ),
    );

    let assembled = assemble(&project, &workflow).await;
    let collect = &assembled.tasks()[0];
    let verify = &assembled.tasks()[1];

    // Task N on sw01 bumps the shared counter.
    assembled.resolve_task_args(collect, "sw01").unwrap();
    assembled.resolver().globals().update("counter", |current| {
        json!(current.and_then(Value::as_i64).unwrap_or(0) + 1)
    });

    // Task N+1 on a different host observes the write.
    let args = assembled.resolve_task_args(verify, "sw02").unwrap().unwrap();
    assert_eq!(args["total"], json!(1));
}

#[tokio::test]
async fn runtime_variables_stay_isolated_between_hosts() {
    let project = Project::new();
    let workflow = project.write(
        "workflows/deploy.yaml",
        "workflow:\n  name: deploy\n  tasks:\n    - name: verify\n",
    );

    let assembled = assemble(&project, &workflow).await;
    let resolver = assembled.resolver();

    resolver
        .set_runtime_variable("scratch", json!("sw01-only"), "sw01")
        .unwrap();
    assert_eq!(
        resolver.get_variable("scratch", "sw01").unwrap(),
        json!("sw01-only")
    );
    assert!(resolver.get_variable("scratch", "sw02").is_err());
}

#[tokio::test]
async fn effective_variables_merge_every_tier_for_diagnostics() {
    let project = Project::new();
    project.write("vars/defaults.yaml", "region: emea\n");
    let workflow = project.write(
        "workflows/deploy.yaml",
        "workflow:\n  name: deploy\n  vars:\n    vlan: 7\n  tasks:\n    - name: verify\n",
    );

    let assembled = assemble(&project, &workflow).await;
    let flat = assembled.effective_variables("sw01");
    assert_eq!(flat["region"], json!("emea"));
    assert_eq!(flat["vlan"], json!(7));
    assert_eq!(flat["site"], json!("dc1"));
    assert_eq!(flat["platform"], json!("eos"));
}
