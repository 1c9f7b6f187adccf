//! The pluggable execution capability behind every step body.
//!
//! Concrete adapters (one per language) live outside the engine core and
//! are registered once at startup; the executor resolves them by language
//! tag and never branches on strings itself.

use crate::error::ActionError;
use crate::types::StepId;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

/// Everything an adapter gets for one substep invocation. The body and
/// string options arrive already rendered against the step's namespace.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub step: StepId,
    /// Substep parameter key; empty for a parameterless step.
    pub substep: String,
    pub body: String,
    /// Declared file inputs, resolved against the working directory.
    pub inputs: Vec<PathBuf>,
    /// Immutable variable snapshot at dispatch time.
    pub vars: HashMap<String, serde_json::Value>,
    /// Adapter options, e.g. `{output: path}` or explicit input overrides.
    pub options: BTreeMap<String, serde_json::Value>,
    pub workdir: PathBuf,
}

/// What an adapter reports back on success. Declared file outputs are
/// verified by the executor, not the adapter.
#[derive(Debug, Clone, Default)]
pub struct ActionOutcome {
    /// Variables the substep publishes back to the run context.
    pub vars: HashMap<String, serde_json::Value>,
    pub exit_code: Option<i32>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

impl ActionOutcome {
    pub fn success() -> Self {
        Self {
            exit_code: Some(0),
            ..Default::default()
        }
    }

    pub fn with_var(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.vars.insert(name.into(), value);
        self
    }
}

/// A language adapter. Execution is synchronous from the executor's point
/// of view: the substep's worker awaits the adapter, which may block on a
/// subprocess or interpreter internally.
#[async_trait]
pub trait Action: Send + Sync {
    /// Language tag this adapter supports (e.g. "shell", "python", "r").
    fn language(&self) -> &str;

    async fn execute(&self, request: &ActionRequest) -> Result<ActionOutcome, ActionError>;
}

/// Language-tag dispatch table, resolved once at startup.
#[derive(Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<A: Action + 'static>(&mut self, action: A) {
        self.actions
            .insert(action.language().to_string(), Arc::new(action));
    }

    pub fn supports(&self, language: &str) -> bool {
        self.actions.contains_key(language)
    }

    pub fn get(&self, language: &str) -> Result<Arc<dyn Action>, ActionError> {
        self.actions
            .get(language)
            .cloned()
            .ok_or_else(|| ActionError::Unsupported(language.to_string()))
    }

    pub fn languages(&self) -> Vec<&str> {
        self.actions.keys().map(|s| s.as_str()).collect()
    }
}

impl std::fmt::Debug for dyn Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action")
            .field("language", &self.language())
            .finish()
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("languages", &self.actions.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoAction;

    #[async_trait]
    impl Action for EchoAction {
        fn language(&self) -> &str {
            "echo"
        }

        async fn execute(&self, request: &ActionRequest) -> Result<ActionOutcome, ActionError> {
            Ok(ActionOutcome::success()
                .with_var("echoed", serde_json::Value::String(request.body.clone())))
        }
    }

    fn request(body: &str) -> ActionRequest {
        ActionRequest {
            step: StepId::new("s"),
            substep: String::new(),
            body: body.to_string(),
            inputs: vec![],
            vars: HashMap::new(),
            options: BTreeMap::new(),
            workdir: PathBuf::from("."),
        }
    }

    #[tokio::test]
    async fn test_registry_dispatch() {
        let mut registry = ActionRegistry::new();
        registry.register(EchoAction);

        assert!(registry.supports("echo"));
        assert!(!registry.supports("shell"));

        let action = registry.get("echo").unwrap();
        let outcome = action.execute(&request("hello")).await.unwrap();
        assert_eq!(outcome.vars.get("echoed"), Some(&serde_json::json!("hello")));
    }

    #[tokio::test]
    async fn test_registry_unknown_language() {
        let registry = ActionRegistry::new();
        let err = registry.get("fortran").unwrap_err();
        assert!(matches!(err, ActionError::Unsupported(lang) if lang == "fortran"));
    }
}
