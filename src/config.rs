//! Loader configuration (`spec.md` §6), buildable either programmatically
//! via chained builder methods or loaded from a TOML/JSON file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use az_logger::debug;
use serde::{Deserialize, Serialize};

use crate::errors::{LoaderError, LoaderResult};
use crate::registry::BackendOptions;

/// Per-image options: the two keys the orchestrator treats as universally
/// meaningful (`spec.md` §4.2), plus everything backend-specific.
#[derive(Debug, Clone)]
pub struct ImageOptions {
    pub custom_base_addr: Option<u64>,
    pub backend: BackendOptions,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            custom_base_addr: None,
            backend: BackendOptions::default(),
        }
    }
}

/// Top-level loader configuration. Every field is optional and defaults
/// the way `spec.md` §6 specifies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderOptions {
    #[serde(default = "default_true")]
    pub auto_load_libs: bool,

    #[serde(default)]
    pub force_load_libs: Vec<String>,

    #[serde(default)]
    pub skip_libs: Vec<String>,

    #[serde(skip)]
    pub main_opts: ImageOptions,

    #[serde(skip)]
    pub lib_opts: BTreeMap<String, ImageOptions>,

    #[serde(default)]
    pub custom_ld_path: Vec<PathBuf>,

    #[serde(default = "default_true")]
    pub ignore_import_version_numbers: bool,

    #[serde(default = "default_rebase_granularity")]
    pub rebase_granularity: u64,

    #[serde(default = "default_true")]
    pub except_missing_libs: bool,
}

fn default_true() -> bool {
    true
}

fn default_rebase_granularity() -> u64 {
    0x0100_0000
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            auto_load_libs: true,
            force_load_libs: Vec::new(),
            skip_libs: Vec::new(),
            main_opts: ImageOptions::default(),
            lib_opts: BTreeMap::new(),
            custom_ld_path: Vec::new(),
            ignore_import_version_numbers: true,
            rebase_granularity: default_rebase_granularity(),
            except_missing_libs: true,
        }
    }
}

impl LoaderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn auto_load_libs(mut self, value: bool) -> Self {
        self.auto_load_libs = value;
        self
    }

    pub fn force_load_libs(mut self, libs: Vec<String>) -> Self {
        self.force_load_libs = libs;
        self
    }

    pub fn skip_libs(mut self, libs: Vec<String>) -> Self {
        self.skip_libs = libs;
        self
    }

    pub fn main_opts(mut self, opts: ImageOptions) -> Self {
        self.main_opts = opts;
        self
    }

    pub fn lib_opts(mut self, name: impl Into<String>, opts: ImageOptions) -> Self {
        self.lib_opts.insert(name.into(), opts);
        self
    }

    pub fn custom_ld_path(mut self, dirs: Vec<PathBuf>) -> Self {
        self.custom_ld_path = dirs;
        self
    }

    pub fn ignore_import_version_numbers(mut self, value: bool) -> Self {
        self.ignore_import_version_numbers = value;
        self
    }

    pub fn rebase_granularity(mut self, granularity: u64) -> Self {
        self.rebase_granularity = granularity;
        self
    }

    pub fn except_missing_libs(mut self, value: bool) -> Self {
        self.except_missing_libs = value;
        self
    }

    /// Loads the scalar options (everything but `main_opts`/`lib_opts`,
    /// which are backend-specific and code-only) from a `.toml` or
    /// `.json` file.
    pub fn from_file(path: impl AsRef<Path>) -> LoaderResult<Self> {
        let path = path.as_ref();
        debug!("reading loader config file {}", path.display());
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => toml::from_str(&content)
                .map_err(|e| LoaderError::InvalidConfig(e.to_string())),
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| LoaderError::InvalidConfig(e.to_string())),
            _ => Err(LoaderError::InvalidConfig(format!(
                "{}: unrecognized config extension, expected .toml or .json",
                path.display()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let opts = LoaderOptions::default();
        assert!(opts.auto_load_libs);
        assert!(opts.ignore_import_version_numbers);
        assert!(opts.except_missing_libs);
        assert_eq!(opts.rebase_granularity, 0x0100_0000);
        assert!(opts.force_load_libs.is_empty());
        assert!(opts.skip_libs.is_empty());
    }

    #[test]
    fn from_file_rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.yaml");
        std::fs::write(&path, "auto_load_libs: true").unwrap();
        assert!(LoaderOptions::from_file(&path).is_err());
    }

    #[test]
    fn from_file_loads_toml_scalars() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.toml");
        std::fs::write(
            &path,
            "auto_load_libs = false\nexcept_missing_libs = false\nrebase_granularity = 4096\n",
        )
        .unwrap();
        let opts = LoaderOptions::from_file(&path).unwrap();
        assert!(!opts.auto_load_libs);
        assert!(!opts.except_missing_libs);
        assert_eq!(opts.rebase_granularity, 4096);
    }
}
