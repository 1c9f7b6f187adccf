//! Subprocess plumbing shared by the language adapters.

use crate::protocol;
use polyflow_core::action::{ActionOutcome, ActionRequest};
use polyflow_core::error::ActionError;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::time::timeout;

pub(crate) struct CapturedOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Spawn the command with captured output, enforcing an optional timeout.
/// A timed-out process is killed before the error is returned.
pub(crate) async fn run(
    mut cmd: Command,
    timeout_secs: Option<u64>,
) -> Result<CapturedOutput, ActionError> {
    cmd.stdin(std::process::Stdio::null());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());

    let mut child = cmd
        .spawn()
        .map_err(|e| ActionError::Process(format!("failed to spawn process: {}", e)))?;

    let stdout_handle = tokio::spawn(read_to_string(child.stdout.take()));
    let stderr_handle = tokio::spawn(read_to_string(child.stderr.take()));

    let status = match timeout_secs {
        Some(secs) => match timeout(Duration::from_secs(secs), child.wait()).await {
            Ok(result) => result,
            Err(_) => {
                let _ = child.kill().await;
                return Err(ActionError::Timeout(secs));
            }
        },
        None => child.wait().await,
    };
    let status =
        status.map_err(|e| ActionError::Process(format!("failed to wait for process: {}", e)))?;

    Ok(CapturedOutput {
        exit_code: status.code().unwrap_or(-1),
        stdout: stdout_handle.await.unwrap_or_default(),
        stderr: stderr_handle.await.unwrap_or_default(),
    })
}

/// Map a finished process onto the adapter contract: zero exit yields an
/// outcome with any protocol-published variables, non-zero exit fails the
/// substep with the last stderr line as detail.
pub(crate) fn into_outcome(captured: CapturedOutput) -> Result<ActionOutcome, ActionError> {
    if captured.exit_code != 0 {
        let detail = captured.stderr.lines().last().unwrap_or("").trim();
        let message = if detail.is_empty() {
            format!("process exited with status {}", captured.exit_code)
        } else {
            format!(
                "process exited with status {}: {}",
                captured.exit_code, detail
            )
        };
        return Err(ActionError::Failed {
            message,
            exit_code: Some(captured.exit_code),
        });
    }

    Ok(ActionOutcome {
        vars: protocol::parse_vars(&captured.stdout),
        exit_code: Some(captured.exit_code),
        stdout: Some(captured.stdout),
        stderr: Some(captured.stderr),
    })
}

/// Apply the invocation environment common to every adapter: the working
/// directory, the substep identity, and any `env` option entries.
pub(crate) fn apply_request_env(cmd: &mut Command, request: &ActionRequest) {
    cmd.current_dir(&request.workdir);
    cmd.env("POLYFLOW_STEP", request.step.to_string());
    cmd.env("POLYFLOW_SUBSTEP", &request.substep);
    if let Some(env) = request.options.get("env").and_then(|v| v.as_object()) {
        for (name, value) in env {
            if let Some(s) = value.as_str() {
                cmd.env(name, s);
            }
        }
    }
}

pub(crate) fn timeout_option(request: &ActionRequest) -> Option<u64> {
    request.options.get("timeout").and_then(|v| v.as_u64())
}

async fn read_to_string<R: AsyncRead + Unpin + Send + 'static>(pipe: Option<R>) -> String {
    let mut output = String::new();
    if let Some(pipe) = pipe {
        let mut reader = BufReader::new(pipe).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            output.push_str(&line);
            output.push('\n');
        }
    }
    output
}
