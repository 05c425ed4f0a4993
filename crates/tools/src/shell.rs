//! Shell tool — run a command inside the task workspace with a hard
//! timeout and cancel support.
//!
//! Commands run under `sh -c` (or `$SHELL` when set). Output is the
//! combined stdout+stderr; the caller's result ceiling applies on top.

use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;

use ami_domain::error::{Error, Result};
use ami_domain::event::{EventAction, TaskEvent};

use crate::protocol::{Tool, ToolContext, ToolOutput};

#[derive(Debug, Deserialize)]
struct ShellRequest {
    command: String,
    /// Override the default timeout, clamped to the cap.
    #[serde(default)]
    timeout_secs: Option<u64>,
}

pub struct ShellTool {
    default_timeout: Duration,
    timeout_cap: Duration,
}

impl ShellTool {
    pub fn new(default_timeout_secs: u64, timeout_cap_secs: u64) -> Self {
        Self {
            default_timeout: Duration::from_secs(default_timeout_secs),
            timeout_cap: Duration::from_secs(timeout_cap_secs),
        }
    }
}

impl Default for ShellTool {
    fn default() -> Self {
        Self::new(120, 600)
    }
}

#[async_trait::async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell_exec"
    }
    fn label(&self) -> &str {
        "Shell"
    }
    fn description(&self) -> &str {
        "Run a shell command in the task workspace. Returns combined stdout and stderr."
    }
    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Shell command to execute" },
                "timeout_secs": { "type": "integer", "description": "Hard timeout in seconds (capped)" }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, _call_id: &str, params: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let req: ShellRequest =
            serde_json::from_value(params).map_err(|e| Error::InvalidInput(e.to_string()))?;
        if req.command.trim().is_empty() {
            return Err(Error::InvalidInput("empty command".into()));
        }

        let timeout = req
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout)
            .min(self.timeout_cap);

        let shell = std::env::var("SHELL").unwrap_or_else(|_| "sh".into());
        let mut cmd = Command::new(shell);
        cmd.arg("-c")
            .arg(&req.command)
            .current_dir(&ctx.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(Error::Io)?;

        let output = tokio::select! {
            _ = ctx.cancel.cancelled() => {
                return Err(Error::Cancelled("shell command interrupted".into()));
            }
            out = tokio::time::timeout(timeout, child.wait_with_output()) => match out {
                Err(_) => {
                    return Err(Error::Timeout(format!(
                        "command exceeded {}s: {}",
                        timeout.as_secs(),
                        req.command
                    )));
                }
                Ok(res) => res.map_err(Error::Io)?,
            },
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str(&stderr);
        }

        if let Some(events) = &ctx.events {
            events.emit(TaskEvent::new(
                &ctx.task_id,
                EventAction::Terminal {
                    output: crate::truncate::preview(&combined, 2000),
                },
            ));
        }

        let exit = output.status.code().unwrap_or(-1);
        let text = if combined.is_empty() {
            format!("(no output, exit code {exit})")
        } else if output.status.success() {
            combined
        } else {
            format!("exit code {exit}\n{combined}")
        };

        Ok(ToolOutput::text(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn ctx(ws: &TempDir) -> ToolContext {
        ToolContext::new("t1", ws.path().to_path_buf())
    }

    #[tokio::test]
    async fn runs_in_workspace_cwd() {
        let ws = TempDir::new().unwrap();
        std::fs::write(ws.path().join("probe.txt"), "x").unwrap();
        let out = ShellTool::default()
            .execute("c1", serde_json::json!({"command": "ls"}), &ctx(&ws))
            .await
            .unwrap();
        assert!(out.text_content().contains("probe.txt"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_not_an_error() {
        let ws = TempDir::new().unwrap();
        let out = ShellTool::default()
            .execute("c1", serde_json::json!({"command": "exit 3"}), &ctx(&ws))
            .await
            .unwrap();
        assert!(out.text_content().contains("exit code 3"));
    }

    #[tokio::test]
    async fn timeout_kills_the_command() {
        let ws = TempDir::new().unwrap();
        let tool = ShellTool::new(1, 600);
        let err = tool
            .execute("c1", serde_json::json!({"command": "sleep 30"}), &ctx(&ws))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "TIMEOUT");
    }

    #[tokio::test]
    async fn requested_timeout_is_capped() {
        let tool = ShellTool::new(120, 2);
        let ws = TempDir::new().unwrap();
        let start = std::time::Instant::now();
        let err = tool
            .execute(
                "c1",
                serde_json::json!({"command": "sleep 30", "timeout_secs": 9999}),
                &ctx(&ws),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "TIMEOUT");
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn cancel_interrupts_promptly() {
        let ws = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        let c = ctx(&ws).with_cancel(cancel.clone());

        let handle = tokio::spawn(async move {
            ShellTool::default()
                .execute("c1", serde_json::json!({"command": "sleep 30"}), &c)
                .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), "CANCELLED");
    }
}
