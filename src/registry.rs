//! Task and inventory-filter registries
//!
//! Discovery of tasks and filters is capability-based: a mapping from string
//! key to a callable with a fixed signature, populated by explicit
//! registration. Workflow task names are validated against the task registry
//! at assembly time; the callables themselves are invoked by the external
//! execution driver.

use crate::inventory::HostData;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Context handed to a task function by the execution driver: the target
/// host's inventory view and the fully resolved arguments.
pub struct TaskContext<'a> {
    pub host: &'a HostData,
    pub args: &'a serde_json::Map<String, Value>,
}

/// A task function produces a result value for one host.
pub type TaskFn = Arc<dyn Fn(&TaskContext) -> anyhow::Result<Value> + Send + Sync>;

/// An inventory filter decides per host whether it is selected. The argument
/// value carries the filter's configuration from the workflow file (scalar,
/// sequence, or mapping).
pub type FilterFn = Arc<dyn Fn(&HostData, &Value) -> bool + Send + Sync>;

#[derive(Default, Clone)]
pub struct TaskRegistry {
    entries: BTreeMap<String, TaskFn>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry seeded with the built-in tasks.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("echo", |ctx: &TaskContext| {
            let message = ctx
                .args
                .get("message")
                .cloned()
                .unwrap_or_else(|| Value::String(String::new()));
            Ok(message)
        });
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&TaskContext) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.entries.insert(name.into(), Arc::new(f));
    }

    pub fn get(&self, name: &str) -> Option<&TaskFn> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Default, Clone)]
pub struct FilterRegistry {
    entries: BTreeMap<String, FilterFn>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry seeded with the built-in filters: `platform` (string match)
    /// and `hosts` (name membership).
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        registry.register("platform", |host: &HostData, args: &Value| {
            let wanted = match args {
                Value::String(s) => s.as_str(),
                Value::Object(map) => match map.get("platform").and_then(Value::as_str) {
                    Some(s) => s,
                    None => return false,
                },
                _ => return false,
            };
            host.platform.as_deref() == Some(wanted)
        });

        registry.register("hosts", |host: &HostData, args: &Value| {
            let names = match args {
                Value::Array(items) => items.iter().filter_map(Value::as_str).collect::<Vec<_>>(),
                Value::String(s) => vec![s.as_str()],
                _ => return false,
            };
            names.contains(&host.name.as_str())
        });

        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&HostData, &Value) -> bool + Send + Sync + 'static,
    {
        self.entries.insert(name.into(), Arc::new(f));
    }

    pub fn get(&self, name: &str) -> Option<&FilterFn> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn host(name: &str, platform: &str) -> HostData {
        HostData {
            name: name.into(),
            platform: Some(platform.into()),
            data: serde_json::Map::new(),
        }
    }

    #[test]
    fn platform_filter_matches_string_and_mapping_forms() {
        let registry = FilterRegistry::with_builtins();
        let filter = registry.get("platform").unwrap();
        let sw = host("sw01", "eos");

        assert!(filter(&sw, &json!("eos")));
        assert!(!filter(&sw, &json!("junos")));
        assert!(filter(&sw, &json!({"platform": "eos"})));
    }

    #[test]
    fn hosts_filter_checks_membership() {
        let registry = FilterRegistry::with_builtins();
        let filter = registry.get("hosts").unwrap();
        let sw = host("sw01", "eos");

        assert!(filter(&sw, &json!(["sw01", "sw02"])));
        assert!(!filter(&sw, &json!(["sw02"])));
        assert!(filter(&sw, &json!("sw01")));
    }

    #[test]
    fn echo_task_returns_its_message() {
        let registry = TaskRegistry::with_builtins();
        let task = registry.get("echo").unwrap();
        let sw = host("sw01", "eos");
        let args: serde_json::Map<String, Value> =
            serde_json::from_value(json!({"message": "hello"})).unwrap();

        let result = task(&TaskContext {
            host: &sw,
            args: &args,
        })
        .unwrap();
        assert_eq!(result, json!("hello"));
    }

    #[test]
    fn custom_registration_overrides_by_name() {
        let mut registry = TaskRegistry::with_builtins();
        registry.register("echo", |_ctx: &TaskContext| Ok(json!("patched")));
        let sw = host("sw01", "eos");
        let args = serde_json::Map::new();
        let result = registry.get("echo").unwrap()(&TaskContext {
            host: &sw,
            args: &args,
        })
        .unwrap();
        assert_eq!(result, json!("patched"));
    }
}
