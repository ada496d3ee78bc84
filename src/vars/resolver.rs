//! Precedence-ordered variable resolution and template rendering
//!
//! The resolver owns every device context for a run plus the shared global
//! namespace and the (externally owned, read-only) inventory handle. Lookup
//! order is fixed: runtime > CLI > inline-workflow > paired-workflow >
//! domain-default > global-default > inventory > environment. Names are
//! compared byte-for-byte; a tier entry holding `null` still wins over lower
//! tiers.

use super::{DeviceContext, GlobalNamespace, Tier, TierSnapshots};
use crate::error::TemplateError;
use crate::inventory::InventoryProvider;
use crate::template::{walk_value, MapSource, TemplateEngine, VarSource};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tracing::debug;

pub struct VariableResolver {
    engine: TemplateEngine,
    base: Arc<TierSnapshots>,
    contexts: RwLock<HashMap<String, DeviceContext>>,
    globals: GlobalNamespace,
    inventory: Arc<dyn InventoryProvider>,
}

impl std::fmt::Debug for VariableResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariableResolver").finish_non_exhaustive()
    }
}

impl VariableResolver {
    pub fn new(base: TierSnapshots, inventory: Arc<dyn InventoryProvider>) -> Self {
        Self {
            engine: TemplateEngine::new(),
            base: Arc::new(base),
            contexts: RwLock::new(HashMap::new()),
            globals: GlobalNamespace::new(),
            inventory,
        }
    }

    /// Pre-creates contexts for the selected hosts. Contexts are otherwise
    /// created lazily on first access.
    pub fn create_contexts<'a>(&self, hosts: impl IntoIterator<Item = &'a str>) {
        let mut contexts = self.contexts.write().unwrap();
        for host in hosts {
            contexts
                .entry(host.to_string())
                .or_insert_with(|| DeviceContext::new(host, self.base.clone()));
        }
    }

    pub fn globals(&self) -> &GlobalNamespace {
        &self.globals
    }

    fn with_context<R>(&self, host: &str, f: impl FnOnce(&DeviceContext) -> R) -> R {
        {
            let contexts = self.contexts.read().unwrap();
            if let Some(ctx) = contexts.get(host) {
                return f(ctx);
            }
        }
        let mut contexts = self.contexts.write().unwrap();
        let ctx = contexts
            .entry(host.to_string())
            .or_insert_with(|| DeviceContext::new(host, self.base.clone()));
        f(ctx)
    }

    /// Finds the first tier containing `name` for `host`, in precedence
    /// order. `None` means no tier defines the variable at all.
    pub fn lookup_tier(&self, name: &str, host: &str) -> Option<(Tier, Value)> {
        let above = self.with_context(host, |ctx| {
            ctx.get_above_inventory(name).map(|(t, v)| (t, v.clone()))
        });
        if let Some(found) = above {
            return Some(found);
        }
        if let Some(data) = self.inventory.host(host) {
            if let Some(value) = data.attribute(name) {
                return Some((Tier::Inventory, value));
            }
        }
        self.with_context(host, |ctx| {
            ctx.get_environment(name).map(|v| (Tier::Environment, v.clone()))
        })
    }

    /// The effective value of `name` for `host`.
    pub fn get_variable(&self, name: &str, host: &str) -> Result<Value, TemplateError> {
        self.lookup_tier(name, host)
            .map(|(tier, value)| {
                debug!(host, name, %tier, "resolved variable");
                value
            })
            .ok_or_else(|| TemplateError::Resolution {
                variable: name.to_string(),
                host: Some(host.to_string()),
            })
    }

    /// Writes into `host`'s runtime tier only; no other host can observe the
    /// write. Writes to the inventory (`host.`) or reserved `global.`
    /// namespace are rejected.
    pub fn set_runtime_variable(
        &self,
        name: &str,
        value: Value,
        host: &str,
    ) -> Result<(), TemplateError> {
        if name == "host" || name.starts_with("host.") || name == "global" || name.starts_with("global.")
        {
            return Err(TemplateError::ReadOnlyVariable {
                variable: name.to_string(),
                host: Some(host.to_string()),
            });
        }
        let mut contexts = self.contexts.write().unwrap();
        let ctx = contexts
            .entry(host.to_string())
            .or_insert_with(|| DeviceContext::new(host, self.base.clone()));
        ctx.set_runtime(name, value);
        Ok(())
    }

    /// Renders a template for `host`. `extra` bindings outrank every tier.
    /// A bare-placeholder template preserves the value's type.
    pub fn render(
        &self,
        template: &str,
        host: &str,
        extra: Option<&HashMap<String, Value>>,
    ) -> Result<Value, TemplateError> {
        let view = HostView {
            resolver: self,
            host,
            extra,
        };
        self.engine.render_value(template, &view)
    }

    /// Renders a template for `host` to its string form.
    pub fn render_string(
        &self,
        template: &str,
        host: &str,
        extra: Option<&HashMap<String, Value>>,
    ) -> Result<String, TemplateError> {
        let view = HostView {
            resolver: self,
            host,
            extra,
        };
        self.engine.render(template, &view)
    }

    /// Deep resolution over a YAML/JSON tree: strings carrying template
    /// markers are rendered, sequences and mappings are recursed, all other
    /// scalars pass through untouched.
    pub fn resolve_value(
        &self,
        data: &Value,
        host: &str,
        extra: Option<&HashMap<String, Value>>,
    ) -> Result<Value, TemplateError> {
        let view = HostView {
            resolver: self,
            host,
            extra,
        };
        crate::template::resolve_value_deep(&self.engine, data, &view)
    }

    /// Deep resolution of a task argument mapping for one host.
    pub fn resolve_args(
        &self,
        args: &serde_json::Map<String, Value>,
        host: &str,
        extra: Option<&HashMap<String, Value>>,
    ) -> Result<serde_json::Map<String, Value>, TemplateError> {
        args.iter()
            .map(|(k, v)| Ok((k.clone(), self.resolve_value(v, host, extra)?)))
            .collect()
    }

    /// Fully precedence-flattened view for one host, used by diagnostics
    /// (`wireflow show vars`). Inventory attributes sit between the
    /// environment and global-default tiers.
    pub fn effective_variables(&self, host: &str) -> BTreeMap<String, Value> {
        let mut flat = BTreeMap::new();

        self.with_context(host, |ctx| {
            let layers = ctx.flatten_layers();
            let (env_layer, upper_layers) = layers.split_first().unwrap();
            for (name, value) in env_layer.1 {
                flat.insert(name.clone(), value.clone());
            }
            if let Some(data) = self.inventory.host(host) {
                if let Value::Object(attrs) = data.as_value() {
                    for (name, value) in attrs {
                        if name != "data" {
                            flat.insert(name, value);
                        }
                    }
                }
            }
            for (_, layer) in upper_layers {
                for (name, value) in layer.iter() {
                    flat.insert(name.clone(), value.clone());
                }
            }
        });

        flat
    }
}

/// Template variable source routing paths by their first segment: `extra`
/// bindings, then the reserved `global.` and `host.` namespaces, then the
/// tier precedence scan.
struct HostView<'a> {
    resolver: &'a VariableResolver,
    host: &'a str,
    extra: Option<&'a HashMap<String, Value>>,
}

impl VarSource for HostView<'_> {
    fn lookup(&self, path: &[String]) -> Result<Value, TemplateError> {
        let name = &path[0];

        if let Some(extra) = self.extra {
            let source = MapSource::new(extra);
            match source.lookup(path) {
                Ok(value) => return Ok(value),
                Err(TemplateError::Resolution { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        match name.as_str() {
            "global" => {
                if path.len() == 1 {
                    return Ok(Value::Object(
                        self.resolver.globals.snapshot().into_iter().collect(),
                    ));
                }
                let value = self.resolver.globals.get(&path[1]).ok_or_else(|| {
                    TemplateError::Resolution {
                        variable: format!("global.{}", path[1]),
                        host: Some(self.host.to_string()),
                    }
                })?;
                walk_value(&format!("global.{}", path[1]), &value, &path[2..], Some(self.host))
            }
            "host" => {
                let data = self.resolver.inventory.host(self.host).ok_or_else(|| {
                    TemplateError::Resolution {
                        variable: "host".to_string(),
                        host: Some(self.host.to_string()),
                    }
                })?;
                walk_value("host", &data.as_value(), &path[1..], Some(self.host))
            }
            _ => {
                let root = self.resolver.get_variable(name, self.host)?;
                walk_value(name, &root, &path[1..], Some(self.host))
            }
        }
    }
}
