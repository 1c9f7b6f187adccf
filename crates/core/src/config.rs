//! Run configuration: concurrency, failure policy, fingerprinting, and the
//! initial substitution namespace.

use crate::target::FingerprintMode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_fail_fast() -> bool {
    true
}

fn default_workdir() -> PathBuf {
    PathBuf::from(".")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Worker pool size; bounds how many substeps run at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Abort on the first failed step (default) or keep executing
    /// independent branches.
    #[serde(default = "default_fail_fast")]
    pub fail_fast: bool,

    #[serde(default)]
    pub fingerprint: FingerprintMode,

    /// Directory that relative file targets and the signature file resolve
    /// against.
    #[serde(default = "default_workdir")]
    pub workdir: PathBuf,

    /// Initial template-substitution namespace, e.g. `report_output`.
    #[serde(default)]
    pub vars: HashMap<String, serde_json::Value>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            fail_fast: default_fail_fast(),
            fingerprint: FingerprintMode::default(),
            workdir: default_workdir(),
            vars: HashMap::new(),
        }
    }
}

impl RunConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = workdir.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_fingerprint(mut self, mode: FingerprintMode) -> Self {
        self.fingerprint = mode;
        self
    }

    pub fn with_var(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.vars.insert(name.into(), value);
        self
    }
}
