//! Engine configuration
//!
//! Loaded from YAML or built in code. Unknown keys are rejected so a typo in
//! a config file fails loudly instead of silently keeping a default.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Upper bound for `max_workers`
pub const MAX_WORKERS_LIMIT: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Base directory for relative `file` node paths
    pub database_dir: PathBuf,

    /// Concurrent kernel executions (0 = one per CPU)
    pub max_workers: usize,

    /// Prefix for shared in-memory database names (None = random per graph)
    pub memory_namespace: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_dir: PathBuf::from("databases"),
            max_workers: 0,
            memory_namespace: None,
        }
    }
}

impl EngineConfig {
    pub fn with_database_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.database_dir = dir.into();
        self
    }

    pub fn with_max_workers(mut self, n: usize) -> Self {
        self.max_workers = n;
        self
    }

    pub fn with_memory_namespace(mut self, ns: impl Into<String>) -> Self {
        self.memory_namespace = Some(ns.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_workers > MAX_WORKERS_LIMIT {
            return Err(EngineError::range_with_hint(
                "max_workers",
                self.max_workers,
                0,
                MAX_WORKERS_LIMIT,
                "Use 0 to size the pool from the CPU count",
            ));
        }
        if self.database_dir.as_os_str().is_empty() {
            return Err(EngineError::config("database_dir must not be empty"));
        }
        if let Some(ns) = &self.memory_namespace {
            if ns.trim().is_empty() || ns.contains(['?', '#', '\0']) {
                return Err(EngineError::config(format!(
                    "memory_namespace '{}' cannot be used in a database URI",
                    ns
                )));
            }
        }
        Ok(())
    }

    /// Effective number of worker permits
    pub fn worker_budget(&self) -> usize {
        if self.max_workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.max_workers
        }
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}
