//! Interpreter adapter: writes the rendered body to a temporary script and
//! hands it to a language runtime such as `python3` or `Rscript`.

use crate::process;
use async_trait::async_trait;
use polyflow_core::action::{Action, ActionOutcome, ActionRequest};
use polyflow_core::error::ActionError;
use tempfile::NamedTempFile;
use tokio::process::Command;

/// One adapter instance per interpreted language, configured with the
/// program to invoke and any fixed leading arguments.
#[derive(Debug)]
pub struct InterpreterAction {
    language: String,
    program: String,
    args: Vec<String>,
}

impl InterpreterAction {
    pub fn new(
        language: impl Into<String>,
        program: impl Into<String>,
        args: Vec<String>,
    ) -> Self {
        Self {
            language: language.into(),
            program: program.into(),
            args,
        }
    }

    /// Python adapter; honors `POLYFLOW_PYTHON` for the interpreter path.
    pub fn python() -> Self {
        let program = std::env::var("POLYFLOW_PYTHON").unwrap_or_else(|_| "python3".to_string());
        Self::new("python", program, vec![])
    }

    /// R adapter; honors `POLYFLOW_RSCRIPT` for the interpreter path.
    pub fn rscript() -> Self {
        let program = std::env::var("POLYFLOW_RSCRIPT").unwrap_or_else(|_| "Rscript".to_string());
        Self::new("r", program, vec!["--vanilla".to_string()])
    }
}

#[async_trait]
impl Action for InterpreterAction {
    fn language(&self) -> &str {
        &self.language
    }

    async fn execute(&self, request: &ActionRequest) -> Result<ActionOutcome, ActionError> {
        // The temp file must stay alive until the interpreter exits.
        let script = NamedTempFile::new()
            .map_err(|e| ActionError::Process(format!("failed to create script file: {}", e)))?;
        tokio::fs::write(script.path(), request.body.as_bytes())
            .await
            .map_err(|e| ActionError::Process(format!("failed to write script: {}", e)))?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.arg(script.path());
        process::apply_request_env(&mut cmd, request);

        let timeout_secs = process::timeout_option(request);
        tracing::debug!(
            step = %request.step,
            language = %self.language,
            program = %self.program,
            "executing interpreter script"
        );

        let captured = process::run(cmd, timeout_secs).await?;
        process::into_outcome(captured)
    }
}
