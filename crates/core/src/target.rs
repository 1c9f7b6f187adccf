//! Typed identifiers for the things steps consume and produce, and the
//! fingerprints used to decide whether they have changed.

use crate::types::StepId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Something a step depends on or produces. Equality is variant + key and
/// defines dependency-edge identity in the DAG.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Target {
    /// A file on disk, staleness tracked by mtime+size or content hash.
    File { path: PathBuf },
    /// An in-memory value produced by a step, tracked by value hash.
    Var { name: String },
    /// A dependency on another step's completion, no concrete artifact.
    StepRef { step: StepId },
}

impl Target {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Target::File { path: path.into() }
    }

    pub fn var(name: impl Into<String>) -> Self {
        Target::Var { name: name.into() }
    }

    pub fn step(id: impl Into<String>) -> Self {
        Target::StepRef {
            step: StepId::new(id),
        }
    }

    /// Resolve a file target against the run working directory. Non-file
    /// targets and absolute paths are unaffected.
    pub fn resolved_path(&self, workdir: &Path) -> Option<PathBuf> {
        match self {
            Target::File { path } if path.is_absolute() => Some(path.clone()),
            Target::File { path } => Some(workdir.join(path)),
            _ => None,
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::File { path } => write!(f, "file:{}", path.display()),
            Target::Var { name } => write!(f, "var:{}", name),
            Target::StepRef { step } => write!(f, "step:{}", step),
        }
    }
}

/// How file targets are fingerprinted. The default is size+mtime; content
/// hashing is the opt-in for filesystems with unreliable mtimes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintMode {
    #[default]
    MtimeSize,
    ContentHash,
}

/// A point-in-time fingerprint of a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Fingerprint {
    MtimeSize { size: u64, mtime_ns: u64 },
    Hash { digest: String },
    Value { digest: String },
}

/// Fingerprint a file, or `None` if it does not exist. I/O errors other
/// than absence also read as absence: a target we cannot stat cannot
/// satisfy a signature.
pub fn fingerprint_path(path: &Path, mode: FingerprintMode) -> Option<Fingerprint> {
    let meta = std::fs::metadata(path).ok()?;
    if !meta.is_file() {
        return None;
    }
    match mode {
        FingerprintMode::MtimeSize => {
            let mtime_ns = meta
                .modified()
                .ok()?
                .duration_since(UNIX_EPOCH)
                .ok()?
                .as_nanos() as u64;
            Some(Fingerprint::MtimeSize {
                size: meta.len(),
                mtime_ns,
            })
        }
        FingerprintMode::ContentHash => {
            let content = std::fs::read(path).ok()?;
            Some(Fingerprint::Hash {
                digest: hex::encode(Sha256::digest(&content)),
            })
        }
    }
}

/// Deterministic hash of a serialized in-memory value.
pub fn fingerprint_value(value: &serde_json::Value) -> Fingerprint {
    let canonical = serde_json::to_string(value).unwrap_or_default();
    Fingerprint::Value {
        digest: hex::encode(Sha256::digest(canonical.as_bytes())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_equality_is_variant_plus_key() {
        assert_eq!(Target::file("a.md"), Target::file("a.md"));
        assert_ne!(Target::file("a.md"), Target::var("a.md"));
        assert_ne!(Target::var("x"), Target::var("y"));
        assert_eq!(Target::step("s"), Target::step("s"));
    }

    #[test]
    fn test_resolved_path_joins_workdir() {
        let t = Target::file("out/a.md");
        assert_eq!(
            t.resolved_path(Path::new("/work")),
            Some(PathBuf::from("/work/out/a.md"))
        );
        assert_eq!(Target::var("x").resolved_path(Path::new("/work")), None);
    }

    #[test]
    fn test_fingerprint_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.txt");
        assert!(fingerprint_path(&path, FingerprintMode::MtimeSize).is_none());
        assert!(fingerprint_path(&path, FingerprintMode::ContentHash).is_none());
    }

    #[test]
    fn test_fingerprint_mtime_size_changes_with_content_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.txt");
        std::fs::write(&path, "one").unwrap();
        let before = fingerprint_path(&path, FingerprintMode::MtimeSize).unwrap();
        std::fs::write(&path, "different length").unwrap();
        let after = fingerprint_path(&path, FingerprintMode::MtimeSize).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn test_fingerprint_content_hash_stable_across_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.txt");
        std::fs::write(&path, "same bytes").unwrap();
        let before = fingerprint_path(&path, FingerprintMode::ContentHash).unwrap();
        std::fs::write(&path, "same bytes").unwrap();
        let after = fingerprint_path(&path, FingerprintMode::ContentHash).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_fingerprint_value_deterministic() {
        let a = serde_json::json!({"n": 1});
        let b = serde_json::json!({"n": 1});
        assert_eq!(fingerprint_value(&a), fingerprint_value(&b));
        assert_ne!(
            fingerprint_value(&a),
            fingerprint_value(&serde_json::json!({"n": 2}))
        );
    }
}
