//! YAML run configuration.
//!
//! ```yaml
//! database: impulso.sqlite
//! source_root: https://dados.example.org/sihsus
//! batch_size: 100000
//! descriptors: [descriptors/extra.yaml]
//! operations:
//!   - id: 69bb7a34-05a8-4d9d-bc7e-c4e9e9722ece
//!     dataset: sihsus_aih_rd
//! ```

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    catalog::Catalog,
    error::ConfigError,
    pipeline::{DEFAULT_BATCH_SIZE, DEFAULT_DRY_RUN_ROW_LIMIT},
    scheduler::Operation,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperationConfig {
    pub id: String,
    pub dataset: String,
    /// Overrides the top-level source root for this operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_root: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EtlConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
    #[serde(default = "EtlConfig::default_source_root")]
    pub source_root: String,
    #[serde(default = "EtlConfig::default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "EtlConfig::default_dry_run_row_limit")]
    pub dry_run_row_limit: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub descriptors: Vec<PathBuf>,
    #[serde(default)]
    pub operations: Vec<OperationConfig>,
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            database: None,
            source_root: Self::default_source_root(),
            batch_size: DEFAULT_BATCH_SIZE,
            dry_run_row_limit: DEFAULT_DRY_RUN_ROW_LIMIT,
            descriptors: Vec::new(),
            operations: Vec::new(),
        }
    }
}

impl EtlConfig {
    fn default_source_root() -> String {
        ".".to_string()
    }

    const fn default_batch_size() -> usize {
        DEFAULT_BATCH_SIZE
    }

    const fn default_dry_run_row_limit() -> usize {
        DEFAULT_DRY_RUN_ROW_LIMIT
    }

    pub fn from_yaml_str(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: EtlConfig = serde_yaml::from_str(text).map_err(|err| ConfigError::Parse {
            path: origin.to_path_buf(),
            message: err.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration file; relative paths inside it are taken from the
    /// file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_yaml_str(&text, path)?;
        if let Some(base) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            config.rebase(base);
        }
        Ok(config)
    }

    fn rebase(&mut self, base: &Path) {
        let rebase = |p: &PathBuf| if p.is_relative() { base.join(p) } else { p.clone() };
        self.database = self.database.as_ref().map(rebase);
        self.descriptors = self.descriptors.iter().map(rebase).collect();
        if !self.source_root.contains("://") && Path::new(&self.source_root).is_relative() {
            self.source_root = base.join(&self.source_root).display().to_string();
        }
        for operation in &mut self.operations {
            if let Some(root) = operation.source_root.as_mut() {
                if !root.contains("://") && Path::new(root.as_str()).is_relative() {
                    *root = base.join(root.as_str()).display().to_string();
                }
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "batch_size",
                reason: "must be greater than zero".to_string(),
            });
        }
        let mut seen = HashSet::new();
        for operation in &self.operations {
            if operation.id.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field: "operations.id",
                    reason: "must not be empty".to_string(),
                });
            }
            if !seen.insert(operation.id.as_str()) {
                return Err(ConfigError::DuplicateOperation(operation.id.clone()));
            }
        }
        Ok(())
    }

    /// Registers extra descriptors into `catalog`.
    pub fn extend_catalog(&self, catalog: &mut Catalog) -> crate::error::Result<()> {
        for path in &self.descriptors {
            catalog.load_file(path)?;
        }
        Ok(())
    }

    /// Binds configured operations to descriptors, keeping only `selected` ids
    /// when any are given.
    pub fn operations(&self, catalog: &Catalog, selected: &[String]) -> Result<Vec<Operation>, ConfigError> {
        let wanted = selected.iter().map(String::as_str).collect::<HashSet<_>>();
        for id in &wanted {
            if !self.operations.iter().any(|op| op.id == *id) {
                return Err(ConfigError::Invalid {
                    field: "operation",
                    reason: format!("'{id}' is not configured"),
                });
            }
        }
        self.operations
            .iter()
            .filter(|op| wanted.is_empty() || wanted.contains(op.id.as_str()))
            .map(|op| -> Result<Operation, ConfigError> {
                let descriptor = catalog
                    .get(&op.dataset)
                    .map_err(|_| ConfigError::UnknownDataset {
                        operation: op.id.clone(),
                        dataset: op.dataset.clone(),
                    })?;
                Ok(Operation {
                    id: op.id.clone(),
                    descriptor,
                    source_root: op
                        .source_root
                        .clone()
                        .unwrap_or_else(|| self.source_root.clone()),
                })
            })
            .collect()
    }
}
