//! Settings loading
//!
//! Settings come from a YAML file (`wireflow.yaml` by default). The path is
//! chosen in order of preference: explicit CLI argument, the
//! `WIREFLOW_CONFIG` environment variable, then the default file name. A
//! missing default file yields built-in defaults; an explicitly requested
//! file that does not exist is an error.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable overriding the settings file location.
pub const SETTINGS_ENV_VAR: &str = "WIREFLOW_CONFIG";

/// Default settings file name, looked up in the working directory.
pub const DEFAULT_SETTINGS_FILE: &str = "wireflow.yaml";

/// File name of tier default files inside the vars directory (and inside
/// each domain subdirectory).
pub const DEFAULTS_FILENAME: &str = "defaults.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directories holding workflow files. The first path segment of a
    /// workflow beneath one of these roots is its domain.
    pub workflow_roots: Vec<PathBuf>,

    /// Directory holding `defaults.yaml` and per-domain default files.
    pub vars_dir: PathBuf,

    /// Directories scanned recursively for blueprint files.
    pub blueprint_dirs: Vec<PathBuf>,

    /// Inventory file used by the CLI; library callers supply their own
    /// inventory provider.
    pub inventory_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workflow_roots: vec![PathBuf::from("workflows")],
            vars_dir: PathBuf::from("vars"),
            blueprint_dirs: vec![PathBuf::from("blueprints")],
            inventory_file: None,
        }
    }
}

impl Settings {
    /// Loads settings, preferring `explicit` over `WIREFLOW_CONFIG` over the
    /// default file.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match explicit {
            Some(path) => (path.to_path_buf(), true),
            None => match std::env::var(SETTINGS_ENV_VAR) {
                Ok(path) => (PathBuf::from(path), true),
                Err(_) => (PathBuf::from(DEFAULT_SETTINGS_FILE), false),
            },
        };

        if !path.exists() {
            if required {
                return Err(ConfigError::NotFound { path });
            }
            debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(Self::default());
        }

        Self::from_file(&path)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let settings: Settings =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        settings.validate()?;
        debug!(path = %path.display(), "settings loaded");
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.workflow_roots.is_empty() {
            return Err(ConfigError::Invalid {
                setting: "workflow_roots".to_string(),
                reason: "must list at least one directory".to_string(),
            });
        }
        if self.blueprint_dirs.is_empty() {
            return Err(ConfigError::Invalid {
                setting: "blueprint_dirs".to_string(),
                reason: "must list at least one directory".to_string(),
            });
        }
        Ok(())
    }
}

/// Loads one variable-tier file into a map. A missing file yields an empty
/// tier; a malformed file is an error.
pub fn load_vars_file(
    path: &Path,
) -> Result<std::collections::HashMap<String, serde_json::Value>, ConfigError> {
    if !path.exists() {
        debug!(path = %path.display(), "vars file not present, tier is empty");
        return Ok(std::collections::HashMap::new());
    }
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}
