//! Shell adapter: runs the step body through `bash -c`.

use crate::process;
use async_trait::async_trait;
use polyflow_core::action::{Action, ActionOutcome, ActionRequest};
use polyflow_core::error::ActionError;
use tokio::process::Command;

fn default_shell() -> String {
    "bash".to_string()
}

/// Executes rendered step bodies as shell commands. The shell defaults to
/// bash and can be overridden per step with the `shell` option.
#[derive(Debug, Default)]
pub struct ShellAction;

impl ShellAction {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Action for ShellAction {
    fn language(&self) -> &str {
        "shell"
    }

    async fn execute(&self, request: &ActionRequest) -> Result<ActionOutcome, ActionError> {
        let shell = request
            .options
            .get("shell")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(default_shell);
        let timeout_secs = process::timeout_option(request);

        let mut cmd = Command::new(&shell);
        cmd.arg("-c").arg(&request.body);
        process::apply_request_env(&mut cmd, request);

        tracing::debug!(
            step = %request.step,
            %shell,
            timeout = ?timeout_secs,
            "executing shell body"
        );

        let captured = process::run(cmd, timeout_secs).await?;
        process::into_outcome(captured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyflow_core::types::StepId;
    use std::collections::{BTreeMap, HashMap};
    use std::path::Path;

    fn request(body: &str, workdir: &Path) -> ActionRequest {
        ActionRequest {
            step: StepId::new("s"),
            substep: String::new(),
            body: body.to_string(),
            inputs: vec![],
            vars: HashMap::new(),
            options: BTreeMap::new(),
            workdir: workdir.to_path_buf(),
        }
    }

    #[tokio::test]
    async fn test_echo() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = ShellAction::new()
            .execute(&request("echo 'hello world'", dir.path()))
            .await
            .unwrap();

        assert_eq!(outcome.exit_code, Some(0));
        assert!(outcome.stdout.unwrap().contains("hello world"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = ShellAction::new()
            .execute(&request("exit 3", dir.path()))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ActionError::Failed {
                exit_code: Some(3),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_var_protocol() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = ShellAction::new()
            .execute(&request("echo 'polyflow:var count=42'", dir.path()))
            .await
            .unwrap();

        assert_eq!(outcome.vars.get("count"), Some(&serde_json::json!(42)));
    }

    #[tokio::test]
    async fn test_env_option() {
        let dir = tempfile::tempdir().unwrap();
        let mut req = request("echo \"$GREETING\"", dir.path());
        req.options
            .insert("env".to_string(), serde_json::json!({"GREETING": "hi"}));

        let outcome = ShellAction::new().execute(&req).await.unwrap();
        assert!(outcome.stdout.unwrap().contains("hi"));
    }

    #[tokio::test]
    async fn test_runs_in_workdir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.txt"), "payload").unwrap();

        let outcome = ShellAction::new()
            .execute(&request("cat data.txt", dir.path()))
            .await
            .unwrap();
        assert!(outcome.stdout.unwrap().contains("payload"));
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let mut req = request("sleep 5", dir.path());
        req.options.insert("timeout".to_string(), serde_json::json!(1));

        let err = ShellAction::new().execute(&req).await.unwrap_err();
        assert!(matches!(err, ActionError::Timeout(1)));
    }
}
