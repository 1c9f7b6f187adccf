//! Engine error taxonomy.

use crate::template::TemplateError;
use thiserror::Error;

/// Fatal errors raised before or during a run. DAG construction errors
/// abort the run before any execution; action errors are isolated to the
/// failing step and its dependents unless fail-fast is configured.
#[derive(Debug, Error)]
pub enum EngineError {
    /// DAG construction found a cycle; reported as the ordered step path.
    #[error("workflow contains a dependency cycle: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    /// A declared input/depends target has no producer and does not exist
    /// externally.
    #[error("step `{step}` requires `{target}` which no step produces and which does not exist")]
    UnresolvedTarget { step: String, target: String },

    /// An explicit step reference names a step that is not declared.
    #[error("step `{step}` depends on undeclared step `{reference}`")]
    UnknownStep { step: String, reference: String },

    /// Two steps share a name; step identity must be unique.
    #[error("duplicate step name `{0}`")]
    DuplicateStep(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of an invoked action, recorded against the substep that ran it.
#[derive(Debug, Error)]
pub enum ActionError {
    /// The action reported failure (non-zero exit, raised fault, or
    /// malformed output).
    #[error("{message}")]
    Failed {
        message: String,
        exit_code: Option<i32>,
    },

    /// No adapter is registered for the step's language tag.
    #[error("no action registered for language `{0}`")]
    Unsupported(String),

    #[error("action timed out after {0} seconds")]
    Timeout(u64),

    /// The action process could not be launched or awaited.
    #[error("process error: {0}")]
    Process(String),

    /// The action reported success but a declared output target is
    /// missing, so downstream consumers cannot be satisfied.
    #[error("declared output `{target}` missing after action reported success")]
    MissingOutput { target: String },

    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ActionError {
    fn from(e: std::io::Error) -> Self {
        ActionError::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_names_the_path() {
        let err = EngineError::Cycle {
            path: vec!["a".to_string(), "b".to_string(), "a".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "workflow contains a dependency cycle: a -> b -> a"
        );
    }

    #[test]
    fn test_action_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: ActionError = io.into();
        assert!(matches!(err, ActionError::Io(_)));
    }
}
