//! Read-only inventory abstraction
//!
//! The inventory itself is an external collaborator; wireflow only consumes a
//! per-host attribute view through [`InventoryProvider`]. The `host.`
//! template namespace and the inventory variable tier are both served from
//! here. A YAML-file-backed implementation is provided for the CLI and tests.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Per-host attributes exposed by an inventory.
#[derive(Debug, Clone, Deserialize)]
pub struct HostData {
    #[serde(skip)]
    pub name: String,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub data: serde_json::Map<String, Value>,
}

impl HostData {
    /// Looks up an attribute by name: the `data` mapping first, then the
    /// intrinsic attributes (`name`, `platform`).
    pub fn attribute(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.data.get(name) {
            return Some(value.clone());
        }
        match name {
            "name" => Some(Value::String(self.name.clone())),
            "platform" => self.platform.clone().map(Value::String),
            _ => None,
        }
    }

    /// The full attribute view as a JSON object, as seen by the `host.`
    /// template namespace.
    pub fn as_value(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert("name".into(), Value::String(self.name.clone()));
        if let Some(platform) = &self.platform {
            map.insert("platform".into(), Value::String(platform.clone()));
        }
        map.insert("data".into(), Value::Object(self.data.clone()));
        for (key, value) in &self.data {
            map.entry(key.clone()).or_insert_with(|| value.clone());
        }
        Value::Object(map)
    }
}

/// Read-only per-host inventory view consumed by the variable resolver.
pub trait InventoryProvider: Send + Sync {
    fn host(&self, name: &str) -> Option<&HostData>;

    /// All host names, in stable order.
    fn host_names(&self) -> Vec<String>;
}

/// Empty inventory for assembly-only operation (e.g. `wireflow expand`).
#[derive(Debug, Default)]
pub struct EmptyInventory;

impl InventoryProvider for EmptyInventory {
    fn host(&self, _name: &str) -> Option<&HostData> {
        None
    }

    fn host_names(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Inventory loaded from a YAML file of the form:
///
/// ```yaml
/// hosts:
///   sw01:
///     platform: eos
///     data:
///       site: dc1
/// ```
#[derive(Debug, Default)]
pub struct YamlInventory {
    hosts: BTreeMap<String, HostData>,
}

#[derive(Deserialize)]
struct InventoryFile {
    #[serde(default)]
    hosts: BTreeMap<String, HostData>,
}

impl YamlInventory {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let parsed: InventoryFile = serde_yaml::from_str(&content)?;
        let hosts = parsed
            .hosts
            .into_iter()
            .map(|(name, mut host)| {
                host.name = name.clone();
                (name, host)
            })
            .collect();
        Ok(Self { hosts })
    }

    pub fn from_hosts(hosts: impl IntoIterator<Item = HostData>) -> Self {
        Self {
            hosts: hosts
                .into_iter()
                .map(|h| (h.name.clone(), h))
                .collect(),
        }
    }
}

impl InventoryProvider for YamlInventory {
    fn host(&self, name: &str) -> Option<&HostData> {
        self.hosts.get(name)
    }

    fn host_names(&self) -> Vec<String> {
        self.hosts.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn host(name: &str, platform: &str, data: &[(&str, Value)]) -> HostData {
        HostData {
            name: name.into(),
            platform: Some(platform.into()),
            data: data
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    #[test]
    fn attribute_checks_data_before_intrinsics() {
        let mut h = host("sw01", "eos", &[("site", json!("dc1"))]);
        assert_eq!(h.attribute("site"), Some(json!("dc1")));
        assert_eq!(h.attribute("platform"), Some(json!("eos")));
        assert_eq!(h.attribute("name"), Some(json!("sw01")));
        assert_eq!(h.attribute("missing"), None);

        // A data key shadows the intrinsic attribute of the same name.
        h.data.insert("platform".into(), json!("junos"));
        assert_eq!(h.attribute("platform"), Some(json!("junos")));
    }

    #[test]
    fn loads_yaml_inventory() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "hosts:\n  sw01:\n    platform: eos\n    data:\n      site: dc1\n  sw02:\n    platform: junos"
        )
        .unwrap();

        let inv = YamlInventory::load(file.path()).unwrap();
        assert_eq!(inv.host_names(), vec!["sw01", "sw02"]);
        assert_eq!(inv.host("sw01").unwrap().attribute("site"), Some(json!("dc1")));
        assert!(inv.host("sw03").is_none());
    }
}
