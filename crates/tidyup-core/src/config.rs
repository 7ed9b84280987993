use crate::hasher::HashAlgorithm;
use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Engine-wide knobs. Every field has a default so a missing `Tidyup.toml` is fine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub backup_dir: PathBuf,
    pub log_limit: usize,
    pub file_limit: usize,
    pub duplicate_limit: usize,
    pub registry_limit: usize,
    pub backup_limit: usize,
    /// Number of trailing log entries copied into each backup document.
    pub backup_log_tail: usize,
    pub duplicate_roots: Vec<String>,
    pub ignore_patterns: Vec<String>,
    pub hash_algorithm: HashAlgorithm,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            backup_dir: PathBuf::from("backups"),
            log_limit: 5000,
            file_limit: 20_000,
            duplicate_limit: 5000,
            registry_limit: 8000,
            backup_limit: 500,
            backup_log_tail: 2000,
            duplicate_roots: Vec::new(),
            ignore_patterns: Vec::new(),
            hash_algorithm: HashAlgorithm::default(),
        }
    }
}

/// Loads settings from `file` (or `Tidyup.*` in the working directory when
/// `None`), then overlays `TIDYUP_*` environment variables.
pub fn load_configuration_from(file: Option<&Path>) -> Result<EngineSettings, ConfigError> {
    let file_source = match file {
        Some(path) => ConfigFile::from(path).required(true),
        None => ConfigFile::with_name("Tidyup").required(false),
    };

    let builder = Config::builder()
        .add_source(file_source)
        .add_source(
            Environment::with_prefix("TIDYUP")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("duplicate_roots")
                .with_list_parse_key("ignore_patterns"),
        )
        .build()?;
    builder.try_deserialize::<EngineSettings>()
}

/// Remove directories that are subdirectories of other directories in the list.
/// Exact repeats collapse to one entry. Order of first appearance is kept.
pub fn non_overlapping_directories(dirs: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for dir in dirs {
        if result.iter().any(|kept| dir.starts_with(kept)) {
            continue;
        }
        result.retain(|kept| !kept.starts_with(&dir));
        result.push(dir);
    }

    result
}
