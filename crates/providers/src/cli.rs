//! CLI provider — a provider whose backend is an external CLI binary
//! rather than an HTTP API.
//!
//! The binary receives the conversation as JSON lines on stdin and prints
//! the final answer on stdout. Tool use happens inside the binary, so the
//! agent loop suppresses its own tool fan-out for CLI providers.

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use owlia_domain::error::{Error, Result};

use crate::traits::{ChatRequest, ChatResponse, LlmProvider, Usage};

const CLI_TIMEOUT_SECS: u64 = 600;

pub struct CliProvider {
    id: String,
    command: String,
    args: Vec<String>,
}

impl CliProvider {
    pub fn new(id: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            args,
        }
    }
}

#[async_trait::async_trait]
impl LlmProvider for CliProvider {
    async fn complete(&self, req: ChatRequest) -> Result<ChatResponse> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        if let Some(model) = &req.model {
            cmd.arg("--model").arg(model);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Transport(format!("spawning '{}': {e}", self.command)))?;

        // Feed the conversation as one JSON object per line.
        {
            let mut stdin = child.stdin.take().ok_or_else(|| {
                Error::Transport(format!("'{}': failed to open stdin", self.command))
            })?;
            for msg in &req.messages {
                let line = serde_json::to_string(msg).map_err(Error::Json)?;
                stdin
                    .write_all(line.as_bytes())
                    .await
                    .map_err(|e| Error::Transport(format!("writing to CLI provider: {e}")))?;
                stdin
                    .write_all(b"\n")
                    .await
                    .map_err(|e| Error::Transport(format!("writing to CLI provider: {e}")))?;
            }
            // Dropping stdin closes it and signals end of input.
        }

        let timeout = std::time::Duration::from_secs(CLI_TIMEOUT_SECS);
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| Error::Timeout(format!("CLI provider '{}' timed out", self.id)))?
            .map_err(|e| Error::Transport(format!("waiting for CLI provider: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Transport(format!(
                "CLI provider '{}' exited with {:?}: {}",
                self.id,
                output.status.code(),
                stderr.trim()
            )));
        }

        let content = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        Ok(ChatResponse {
            content,
            tool_calls: Vec::new(),
            usage: Usage::default(),
            provider: self.id.clone(),
            model: req.model.unwrap_or_else(|| self.command.clone()),
        })
    }

    fn provider_id(&self) -> &str {
        &self.id
    }

    fn is_cli(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use owlia_domain::tool::Message;

    #[tokio::test]
    async fn cat_binary_echoes_conversation() {
        let provider = CliProvider::new("local", "cat", vec![]);
        let resp = provider
            .complete(ChatRequest {
                messages: vec![Message::user("hello cli")],
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(resp.content.contains("hello cli"));
        assert!(provider.is_cli());
    }

    #[tokio::test]
    async fn missing_binary_is_transport_error() {
        let provider = CliProvider::new("ghost", "definitely-not-a-binary-xyz", vec![]);
        let err = provider
            .complete(ChatRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn failing_binary_surfaces_stderr() {
        let provider = CliProvider::new(
            "bad",
            "sh",
            vec!["-c".into(), "echo broken >&2; exit 1".into()],
        );
        let err = provider
            .complete(ChatRequest::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("broken"));
    }
}
