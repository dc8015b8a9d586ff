//! Stdio transport for MCP servers.
//!
//! Spawns the server as a child process and speaks newline-delimited
//! JSON-RPC over its stdin/stdout. A dedicated reader task owns stdout:
//! it parses each line, looks the response id up in the pending table,
//! and resolves the waiting caller. Concurrent requests multiplex over
//! the single pipe; per-call timeouts remove their pending entry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{oneshot, watch, OnceCell};

use owlia_domain::config::McpServerConfig;

use crate::protocol::{Notification, Request, Response};

/// Grace period between closing stdin and killing the child.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("MCP server process has exited")]
    ProcessExited,

    #[error("timeout waiting for response")]
    Timeout,

    #[error("transport is stopping")]
    Stopping,

    #[error("transport not supported: {0}")]
    Unsupported(String),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stdio transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

type PendingTable = Arc<Mutex<HashMap<u64, oneshot::Sender<Response>>>>;

pub struct StdioTransport {
    stdin: tokio::sync::Mutex<ChildStdin>,
    child: tokio::sync::Mutex<Child>,
    pending: PendingTable,
    next_id: AtomicU64,
    alive: Arc<AtomicBool>,
    exited_rx: watch::Receiver<bool>,
    call_timeout: Duration,
    shutdown_once: OnceCell<()>,
}

impl StdioTransport {
    /// Spawn the child process and start the reader task.
    pub fn spawn(
        config: &McpServerConfig,
        call_timeout: Duration,
    ) -> Result<Arc<Self>, TransportError> {
        let mut cmd = tokio::process::Command::new(&config.command);
        cmd.args(&config.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        for (key, value) in &config.env {
            cmd.env(key, value);
        }
        if let Some(cwd) = &config.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(TransportError::Io)?;

        let stdin = child.stdin.take().ok_or_else(|| {
            TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "failed to capture child stdin",
            ))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "failed to capture child stdout",
            ))
        })?;
        let stderr = child.stderr.take();

        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));
        let (exited_tx, exited_rx) = watch::channel(false);

        // Reader task: owns stdout until EOF.
        {
            let pending = pending.clone();
            let alive = alive.clone();
            let server = config.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            let trimmed = line.trim();
                            if trimmed.is_empty() {
                                continue;
                            }
                            match serde_json::from_str::<Response>(trimmed) {
                                Ok(resp) => {
                                    let waiter = pending.lock().remove(&resp.id);
                                    match waiter {
                                        Some(tx) => {
                                            let _ = tx.send(resp);
                                        }
                                        None => {
                                            tracing::debug!(
                                                server = %server,
                                                id = resp.id,
                                                "response with no pending request (timed out?)"
                                            );
                                        }
                                    }
                                }
                                Err(e) => {
                                    // Server notifications and stray output
                                    // land here; neither kills the pipe.
                                    tracing::debug!(
                                        server = %server,
                                        error = %e,
                                        line = %trimmed,
                                        "skipping non-response line from MCP server"
                                    );
                                }
                            }
                        }
                        Ok(None) | Err(_) => break,
                    }
                }
                alive.store(false, Ordering::SeqCst);
                // Reject everyone still waiting.
                pending.lock().clear();
                let _ = exited_tx.send(true);
                tracing::debug!(server = %server, "MCP server stdout closed");
            });
        }

        // Drain stderr so the child never blocks on a full pipe.
        if let Some(stderr) = stderr {
            let server = config.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(server = %server, stderr = %line, "MCP server stderr");
                }
            });
        }

        Ok(Arc::new(Self {
            stdin: tokio::sync::Mutex::new(stdin),
            child: tokio::sync::Mutex::new(child),
            pending,
            next_id: AtomicU64::new(1),
            alive,
            exited_rx,
            call_timeout,
            shutdown_once: OnceCell::new(),
        }))
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// A watch that flips to `true` when the child's stdout closes.
    pub fn exit_signal(&self) -> watch::Receiver<bool> {
        self.exited_rx.clone()
    }

    async fn write_line(&self, json: &str) -> Result<(), TransportError> {
        if !self.is_alive() {
            return Err(TransportError::ProcessExited);
        }
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(json.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Send a request and wait for its response.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Response, TransportError> {
        if !self.is_alive() {
            return Err(TransportError::ProcessExited);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let req = Request::new(id, method, params);
        let json = serde_json::to_string(&req)?;
        tracing::debug!(id, method, "sending MCP request");
        if let Err(e) = self.write_line(&json).await {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(resp)) => Ok(resp),
            // Sender dropped: the reader drained the table on exit/close.
            Ok(Err(_)) => Err(TransportError::Stopping),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(TransportError::Timeout)
            }
        }
    }

    /// Send a notification (no response expected).
    pub async fn notify(&self, method: &str) -> Result<(), TransportError> {
        let json = serde_json::to_string(&Notification::new(method))?;
        tracing::debug!(method, "sending MCP notification");
        self.write_line(&json).await
    }

    /// Gracefully shut down: close stdin, give the child a grace window,
    /// then kill. Idempotent — concurrent callers share one shutdown.
    pub async fn shutdown(&self) {
        self.shutdown_once
            .get_or_init(|| async {
                self.alive.store(false, Ordering::SeqCst);
                // Reject pending callers with `Stopping`.
                self.pending.lock().clear();

                {
                    let mut stdin = self.stdin.lock().await;
                    if let Err(e) = stdin.shutdown().await {
                        tracing::debug!(error = %e, "error closing MCP server stdin");
                    }
                }

                let mut child = self.child.lock().await;
                match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
                    Ok(Ok(status)) => {
                        tracing::debug!(?status, "MCP server exited");
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "error waiting for MCP server");
                    }
                    Err(_) => {
                        tracing::warn!("MCP server did not exit within grace period, killing");
                        if let Err(e) = child.kill().await {
                            tracing::warn!(error = %e, "failed to kill MCP server");
                        }
                    }
                }
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a config that runs an inline shell script as the server.
    fn script_server(script: &str) -> McpServerConfig {
        serde_json::from_value(serde_json::json!({
            "name": "test",
            "command": "sh",
            "args": ["-c", script],
        }))
        .unwrap()
    }

    /// A POSIX-shell echo server: answers every request with `{"ok":true}`.
    const ECHO_SERVER: &str = r#"
        while read line; do
            id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
            if [ -n "$id" ]; then
                printf '{"jsonrpc":"2.0","id":%s,"result":{"ok":true}}\n' "$id"
            fi
        done
    "#;

    #[tokio::test]
    async fn request_response_roundtrip() {
        let transport =
            StdioTransport::spawn(&script_server(ECHO_SERVER), Duration::from_secs(5)).unwrap();
        let resp = transport.request("tools/list", None).await.unwrap();
        assert_eq!(resp.into_result().unwrap()["ok"], true);
        transport.shutdown().await;
    }

    #[tokio::test]
    async fn concurrent_requests_multiplex() {
        let transport =
            StdioTransport::spawn(&script_server(ECHO_SERVER), Duration::from_secs(5)).unwrap();

        let a = transport.request("one", None);
        let b = transport.request("two", None);
        let (ra, rb) = tokio::join!(a, b);
        assert!(ra.is_ok());
        assert!(rb.is_ok());
        // Distinct ids were matched back to distinct callers.
        assert_ne!(ra.unwrap().id, rb.unwrap().id);
        transport.shutdown().await;
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let transport = StdioTransport::spawn(
            &script_server("sleep 30"),
            Duration::from_millis(100),
        )
        .unwrap();
        let err = transport.request("ping", None).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout));
        // The pending entry was cleaned up.
        assert!(transport.pending.lock().is_empty());
        transport.shutdown().await;
    }

    #[tokio::test]
    async fn process_exit_fails_pending_and_future_requests() {
        let transport = StdioTransport::spawn(
            &script_server("read line; exit 0"),
            Duration::from_secs(5),
        )
        .unwrap();

        // The request triggers the script to exit without answering.
        let err = transport.request("ping", None).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::Stopping | TransportError::ProcessExited
        ));

        // Wait for the reader to observe EOF.
        let mut exit = transport.exit_signal();
        let _ = tokio::time::timeout(Duration::from_secs(2), exit.wait_for(|v| *v)).await;
        assert!(!transport.is_alive());

        let err = transport.request("ping", None).await.unwrap_err();
        assert!(matches!(err, TransportError::ProcessExited));
    }

    #[tokio::test]
    async fn garbage_lines_do_not_kill_the_connection() {
        let script = r#"
            while read line; do
                id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
                echo "not json at all"
                echo '{"jsonrpc":"2.0","method":"notifications/progress"}'
                if [ -n "$id" ]; then
                    printf '{"jsonrpc":"2.0","id":%s,"result":{}}\n' "$id"
                fi
            done
        "#;
        let transport =
            StdioTransport::spawn(&script_server(script), Duration::from_secs(5)).unwrap();
        let resp = transport.request("ping", None).await.unwrap();
        assert!(resp.error.is_none());
        transport.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let transport =
            StdioTransport::spawn(&script_server(ECHO_SERVER), Duration::from_secs(5)).unwrap();
        let t1 = transport.clone();
        let t2 = transport.clone();
        tokio::join!(t1.shutdown(), t2.shutdown());
        assert!(!transport.is_alive());
    }
}
