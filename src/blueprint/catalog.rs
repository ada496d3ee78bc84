//! Blueprint catalog discovery
//!
//! Recursively scans the configured blueprint directories for `.yaml`/`.yml`
//! files and maps file stems to paths. The catalog is rebuilt at process
//! start; on name collision the last-discovered file wins.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, Default)]
pub struct BlueprintCatalog {
    entries: BTreeMap<String, PathBuf>,
}

impl BlueprintCatalog {
    /// Builds the catalog by scanning `dirs` in order. Directories that do
    /// not exist are skipped with a warning.
    pub fn discover(dirs: &[PathBuf]) -> Self {
        let mut catalog = Self::default();
        for dir in dirs {
            if !dir.is_dir() {
                warn!(dir = %dir.display(), "blueprint directory not found, skipping");
                continue;
            }
            for entry in WalkDir::new(dir)
                .sort_by_file_name()
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file())
            {
                let path = entry.path();
                if !is_yaml(path) {
                    continue;
                }
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                if let Some(previous) = catalog.entries.insert(stem.to_string(), path.to_path_buf())
                {
                    debug!(
                        name = stem,
                        previous = %previous.display(),
                        replacement = %path.display(),
                        "blueprint name collision, last discovered wins"
                    );
                }
            }
        }
        debug!(count = catalog.entries.len(), "blueprint catalog built");
        catalog
    }

    /// Looks a reference up by catalog key. Bare references with a YAML
    /// extension are matched by their stem.
    pub fn get(&self, reference: &str) -> Option<&PathBuf> {
        if let Some(path) = self.entries.get(reference) {
            return Some(path);
        }
        let as_path = Path::new(reference);
        if as_path.parent() == Some(Path::new("")) && is_yaml(as_path) {
            if let Some(stem) = as_path.file_stem().and_then(|s| s.to_str()) {
                return self.entries.get(stem);
            }
        }
        None
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PathBuf)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}
