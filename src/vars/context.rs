//! Per-host variable contexts
//!
//! The assembly-time tiers (CLI through environment) are loaded once and
//! shared between hosts as immutable snapshots; only the runtime tier is
//! owned per host. This keeps contexts cheap to create for large inventories
//! while guaranteeing that nothing a host writes is visible to any other
//! host.

use super::Tier;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Immutable snapshots of the non-runtime, non-inventory tiers, taken once
/// at assembly and shared by every device context in the run.
#[derive(Debug, Default)]
pub struct TierSnapshots {
    pub cli: HashMap<String, Value>,
    pub inline_workflow: HashMap<String, Value>,
    pub paired_workflow: HashMap<String, Value>,
    pub domain_default: HashMap<String, Value>,
    pub global_default: HashMap<String, Value>,
    pub environment: HashMap<String, Value>,
}

/// Isolated variable context for one host.
///
/// A `null` entry in a tier still counts as found: a variable deliberately
/// set to null short-circuits every lower tier.
#[derive(Debug)]
pub struct DeviceContext {
    host_name: String,
    runtime: HashMap<String, Value>,
    base: Arc<TierSnapshots>,
}

impl DeviceContext {
    pub fn new(host_name: impl Into<String>, base: Arc<TierSnapshots>) -> Self {
        Self {
            host_name: host_name.into(),
            runtime: HashMap::new(),
            base,
        }
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn set_runtime(&mut self, name: impl Into<String>, value: Value) {
        self.runtime.insert(name.into(), value);
    }

    /// Scans the tiers above the inventory tier in precedence order.
    /// Inventory and environment sit below these and are consulted by the
    /// resolver, which owns the inventory handle.
    pub fn get_above_inventory(&self, name: &str) -> Option<(Tier, &Value)> {
        if let Some(v) = self.runtime.get(name) {
            return Some((Tier::Runtime, v));
        }
        if let Some(v) = self.base.cli.get(name) {
            return Some((Tier::Cli, v));
        }
        if let Some(v) = self.base.inline_workflow.get(name) {
            return Some((Tier::InlineWorkflow, v));
        }
        if let Some(v) = self.base.paired_workflow.get(name) {
            return Some((Tier::PairedWorkflow, v));
        }
        if let Some(v) = self.base.domain_default.get(name) {
            return Some((Tier::DomainDefault, v));
        }
        if let Some(v) = self.base.global_default.get(name) {
            return Some((Tier::GlobalDefault, v));
        }
        None
    }

    pub fn get_environment(&self, name: &str) -> Option<&Value> {
        self.base.environment.get(name)
    }

    /// Flattens all tiers this context knows about (everything except
    /// inventory) from lowest to highest precedence. The resolver layers the
    /// inventory tier in between environment and global-default.
    pub fn flatten_layers(&self) -> [(Tier, &HashMap<String, Value>); 7] {
        [
            (Tier::Environment, &self.base.environment),
            (Tier::GlobalDefault, &self.base.global_default),
            (Tier::DomainDefault, &self.base.domain_default),
            (Tier::PairedWorkflow, &self.base.paired_workflow),
            (Tier::InlineWorkflow, &self.base.inline_workflow),
            (Tier::Cli, &self.base.cli),
            (Tier::Runtime, &self.runtime),
        ]
    }
}
