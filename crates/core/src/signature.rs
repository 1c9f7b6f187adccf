//! Persisted execution signatures backing skip-if-unchanged caching.
//!
//! One versioned JSON file per workflow working directory. The store is
//! loaded at run start, flushed after every successful substep with an
//! atomic temp-then-rename, and tolerates being absent (cold cache) or
//! corrupt (cache miss, never fatal).

use crate::target::{Fingerprint, Target};
use crate::types::StepId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const STORE_VERSION: u32 = 1;
const STORE_DIR: &str = ".polyflow";
const STORE_FILE: &str = "signatures.json";

/// A target as observed at one point in time. Variable outputs carry their
/// value so a skipped substep can still republish them to the run context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetState {
    pub target: Target,
    pub fingerprint: Fingerprint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl TargetState {
    pub fn new(target: Target, fingerprint: Fingerprint) -> Self {
        Self {
            target,
            fingerprint,
            value: None,
        }
    }

    pub fn with_value(mut self, value: serde_json::Value) -> Self {
        self.value = Some(value);
        self
    }
}

/// Fingerprint record of one successful substep execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signature {
    pub inputs: Vec<TargetState>,
    pub outputs: Vec<TargetState>,
    pub recorded_at: DateTime<Utc>,
}

impl Signature {
    /// Variable outputs stored with this signature, for republication when
    /// the substep is skipped.
    pub fn stored_vars(&self) -> HashMap<String, serde_json::Value> {
        self.outputs
            .iter()
            .filter_map(|state| match (&state.target, &state.value) {
                (Target::Var { name }, Some(value)) => Some((name.clone(), value.clone())),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    entries: HashMap<String, Signature>,
}

/// File-backed signature map keyed by `(step, substep parameter key)`.
#[derive(Debug)]
pub struct SignatureStore {
    path: PathBuf,
    entries: HashMap<String, Signature>,
}

fn entry_key(step: &StepId, param_key: &str) -> String {
    format!("{}::{}", step, param_key)
}

impl SignatureStore {
    /// Load the store for a working directory. A missing file is a cold
    /// cache; an unreadable or wrong-version file is treated as empty and
    /// logged, never fatal.
    pub fn open(workdir: &Path) -> Self {
        let path = workdir.join(STORE_DIR).join(STORE_FILE);
        let entries = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<StoreFile>(&content) {
                Ok(file) if file.version == STORE_VERSION => file.entries,
                Ok(file) => {
                    tracing::warn!(
                        path = %path.display(),
                        version = file.version,
                        "signature store has unsupported version, starting cold"
                    );
                    HashMap::new()
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "signature store unreadable, starting cold"
                    );
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };

        Self { path, entries }
    }

    /// No side effects.
    pub fn lookup(&self, step: &StepId, param_key: &str) -> Option<&Signature> {
        self.entries.get(&entry_key(step, param_key))
    }

    /// True iff a signature exists, every stored input fingerprint equals
    /// the current one (and the input set itself is unchanged), and every
    /// stored output is still present with its recorded fingerprint.
    /// `current_output_fp` observes file outputs on disk; variable outputs
    /// are satisfied by their stored value.
    pub fn is_unchanged(
        &self,
        step: &StepId,
        param_key: &str,
        current_inputs: &[TargetState],
        current_output_fp: impl Fn(&Target) -> Option<Fingerprint>,
    ) -> bool {
        let Some(signature) = self.lookup(step, param_key) else {
            return false;
        };

        if signature.inputs.len() != current_inputs.len() {
            return false;
        }
        for stored in &signature.inputs {
            let matches = current_inputs
                .iter()
                .any(|now| now.target == stored.target && now.fingerprint == stored.fingerprint);
            if !matches {
                return false;
            }
        }

        for stored in &signature.outputs {
            let satisfied = match &stored.target {
                Target::File { .. } => {
                    current_output_fp(&stored.target).as_ref() == Some(&stored.fingerprint)
                }
                Target::Var { .. } => stored.value.is_some(),
                Target::StepRef { .. } => true,
            };
            if !satisfied {
                return false;
            }
        }

        true
    }

    /// Atomically overwrite the signature for a key and flush to disk.
    /// Called only after a substep succeeds.
    pub fn record(
        &mut self,
        step: &StepId,
        param_key: &str,
        inputs: Vec<TargetState>,
        outputs: Vec<TargetState>,
    ) -> std::io::Result<()> {
        self.entries.insert(
            entry_key(step, param_key),
            Signature {
                inputs,
                outputs,
                recorded_at: Utc::now(),
            },
        );
        self.flush()
    }

    fn flush(&self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = StoreFile {
            version: STORE_VERSION,
            entries: self.entries.clone(),
        };
        let content = serde_json::to_vec_pretty(&file)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        // Write-temp-then-rename keeps a crash from leaving a torn file.
        let tmp = self.path.with_extension(format!("tmp-{}", std::process::id()));
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{fingerprint_path, fingerprint_value, FingerprintMode};

    fn file_state(path: &Path) -> TargetState {
        TargetState::new(
            Target::file(path.file_name().unwrap().to_str().unwrap()),
            fingerprint_path(path, FingerprintMode::MtimeSize).unwrap(),
        )
    }

    #[test]
    fn test_cold_cache() {
        let dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::open(dir.path());
        assert!(store.is_empty());
        assert!(store.lookup(&StepId::new("a"), "").is_none());
    }

    #[test]
    fn test_record_then_lookup_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.txt");
        std::fs::write(&input, "data").unwrap();

        let mut store = SignatureStore::open(dir.path());
        store
            .record(&StepId::new("a"), "", vec![file_state(&input)], vec![])
            .unwrap();

        let reopened = SignatureStore::open(dir.path());
        assert_eq!(reopened.len(), 1);
        assert!(reopened.lookup(&StepId::new("a"), "").is_some());
    }

    #[test]
    fn test_is_unchanged_happy_path() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.txt");
        let output = dir.path().join("out.txt");
        std::fs::write(&input, "in").unwrap();
        std::fs::write(&output, "out").unwrap();

        let out_state = TargetState::new(
            Target::file("out.txt"),
            fingerprint_path(&output, FingerprintMode::MtimeSize).unwrap(),
        );
        let mut store = SignatureStore::open(dir.path());
        store
            .record(
                &StepId::new("a"),
                "",
                vec![file_state(&input)],
                vec![out_state],
            )
            .unwrap();

        let unchanged = store.is_unchanged(&StepId::new("a"), "", &[file_state(&input)], |t| {
            t.resolved_path(dir.path())
                .and_then(|p| fingerprint_path(&p, FingerprintMode::MtimeSize))
        });
        assert!(unchanged);
    }

    #[test]
    fn test_changed_input_invalidates() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.txt");
        std::fs::write(&input, "v1").unwrap();

        let mut store = SignatureStore::open(dir.path());
        store
            .record(&StepId::new("a"), "", vec![file_state(&input)], vec![])
            .unwrap();

        std::fs::write(&input, "v2 with different length").unwrap();
        let unchanged =
            store.is_unchanged(&StepId::new("a"), "", &[file_state(&input)], |_| None);
        assert!(!unchanged);
    }

    #[test]
    fn test_missing_output_forces_rerun() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.txt");
        let output = dir.path().join("out.txt");
        std::fs::write(&input, "in").unwrap();
        std::fs::write(&output, "out").unwrap();

        let out_state = TargetState::new(
            Target::file("out.txt"),
            fingerprint_path(&output, FingerprintMode::MtimeSize).unwrap(),
        );
        let mut store = SignatureStore::open(dir.path());
        store
            .record(
                &StepId::new("a"),
                "",
                vec![file_state(&input)],
                vec![out_state],
            )
            .unwrap();

        std::fs::remove_file(&output).unwrap();

        // Inputs untouched, output deleted: must not be skippable.
        let unchanged = store.is_unchanged(&StepId::new("a"), "", &[file_state(&input)], |t| {
            t.resolved_path(dir.path())
                .and_then(|p| fingerprint_path(&p, FingerprintMode::MtimeSize))
        });
        assert!(!unchanged);
    }

    #[test]
    fn test_var_outputs_restorable() {
        let dir = tempfile::tempdir().unwrap();
        let value = serde_json::json!({"rows": 42});
        let state = TargetState::new(Target::var("summary"), fingerprint_value(&value))
            .with_value(value.clone());

        let mut store = SignatureStore::open(dir.path());
        store
            .record(&StepId::new("a"), "", vec![], vec![state])
            .unwrap();

        let signature = store.lookup(&StepId::new("a"), "").unwrap();
        assert_eq!(signature.stored_vars().get("summary"), Some(&value));
        assert!(store.is_unchanged(&StepId::new("a"), "", &[], |_| None));
    }

    #[test]
    fn test_corrupt_store_is_cache_miss() {
        let dir = tempfile::tempdir().unwrap();
        let store_dir = dir.path().join(STORE_DIR);
        std::fs::create_dir_all(&store_dir).unwrap();
        std::fs::write(store_dir.join(STORE_FILE), "{ not json").unwrap();

        let store = SignatureStore::open(dir.path());
        assert!(store.is_empty());
    }

    #[test]
    fn test_param_keys_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SignatureStore::open(dir.path());
        store
            .record(&StepId::new("fan"), "key-one", vec![], vec![])
            .unwrap();

        assert!(store.lookup(&StepId::new("fan"), "key-one").is_some());
        assert!(store.lookup(&StepId::new("fan"), "key-two").is_none());
    }
}
