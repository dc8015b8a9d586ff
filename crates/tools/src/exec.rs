//! Exec tool — run a shell command inside the workspace with a hard
//! timeout. Output is captured and truncated to a sane size before it is
//! handed back to the LLM.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::Command;

use owlia_domain::tool::{SecurityLevel, ToolCall, ToolResult};

use crate::registry::{Tool, ToolContext};

/// Hard ceiling on captured output (per stream).
const MAX_CAPTURE: usize = 64 * 1024;

const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Deserialize)]
struct ExecParams {
    command: String,
    /// Hard timeout in seconds.
    #[serde(default)]
    timeout_secs: Option<u64>,
}

fn truncate(mut s: String) -> String {
    if s.len() > MAX_CAPTURE {
        let mut cut = MAX_CAPTURE;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push_str("\n…[truncated]");
    }
    s
}

pub struct ExecTool;

#[async_trait]
impl Tool for ExecTool {
    fn name(&self) -> &str {
        "exec"
    }

    fn description(&self) -> &str {
        "Run a shell command in the workspace directory and return its output."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Shell command to execute" },
                "timeout_secs": { "type": "integer", "description": "Hard timeout in seconds" }
            },
            "required": ["command"]
        })
    }

    fn security(&self) -> SecurityLevel {
        SecurityLevel::Write
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolResult {
        let params: ExecParams = match serde_json::from_value(call.arguments.clone()) {
            Ok(p) => p,
            Err(e) => return ToolResult::fail(call, format!("invalid arguments: {e}")),
        };

        let timeout = Duration::from_secs(params.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&params.command)
            .current_dir(&ctx.workspace)
            .kill_on_drop(true);

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return ToolResult::fail(call, format!("spawn failed: {e}")),
            Err(_) => {
                return ToolResult::fail(
                    call,
                    format!("command timed out after {}s", timeout.as_secs()),
                )
            }
        };

        let stdout = truncate(String::from_utf8_lossy(&output.stdout).into_owned());
        let stderr = truncate(String::from_utf8_lossy(&output.stderr).into_owned());
        let exit_code = output.status.code();

        if output.status.success() {
            ToolResult::ok(
                call,
                json!({ "exit_code": exit_code, "stdout": stdout, "stderr": stderr }),
            )
        } else {
            ToolResult::fail(
                call,
                format!(
                    "exit code {:?}: {}",
                    exit_code,
                    if stderr.is_empty() { &stdout } else { &stderr }
                ),
            )
        }
    }
}
