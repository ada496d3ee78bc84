//! Tiered variable system
//!
//! Variables come from eight precedence-ordered tiers. Highest first:
//! runtime, CLI, inline-workflow, paired-workflow, domain-default,
//! global-default, inventory (read-only), environment. Each selected host
//! gets an isolated [`DeviceContext`]; the only cross-host mutable state is
//! the shared [`GlobalNamespace`], reached in templates via the `global.`
//! prefix.

mod context;
mod deferred;
mod global;
mod resolver;

pub use context::{DeviceContext, TierSnapshots};
pub use deferred::{ResolutionPhase, ResolutionTracker};
pub use global::GlobalNamespace;
pub use resolver::VariableResolver;

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Environment variables carrying this prefix are loaded into the
/// environment tier with the prefix stripped.
pub const ENV_VAR_PREFIX: &str = "WIREFLOW_VAR_";

/// One precedence-ordered source of variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Runtime,
    Cli,
    InlineWorkflow,
    PairedWorkflow,
    DomainDefault,
    GlobalDefault,
    Inventory,
    Environment,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tier::Runtime => "runtime",
            Tier::Cli => "cli",
            Tier::InlineWorkflow => "inline-workflow",
            Tier::PairedWorkflow => "paired-workflow",
            Tier::DomainDefault => "domain-default",
            Tier::GlobalDefault => "global-default",
            Tier::Inventory => "inventory",
            Tier::Environment => "environment",
        };
        f.write_str(name)
    }
}

/// Loads `WIREFLOW_VAR_*` environment variables, prefix stripped.
pub fn load_env_vars() -> HashMap<String, Value> {
    std::env::vars()
        .filter_map(|(key, value)| {
            key.strip_prefix(ENV_VAR_PREFIX)
                .map(|name| (name.to_string(), Value::String(value)))
        })
        .collect()
}
