//! Supervised MCP client — one per configured server.
//!
//! Owns the transport, performs the MCP handshake (`initialize` →
//! `notifications/initialized` → `tools/list`), and supervises crashes:
//! when the child exits unexpectedly and restarts are enabled, it
//! reconnects after an exponential backoff, re-fetches the tool list, and
//! fires the `tools-changed` callback so registries can invalidate.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;

use owlia_domain::config::{McpDefaults, McpServerConfig, McpTransportKind};
use owlia_domain::trace::TraceEvent;

use crate::manager::McpError;
use crate::protocol::{self, McpToolDef, ToolCallResult, ToolsListResult};
use crate::transport::{StdioTransport, TransportError};

/// Health of one server connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Unhealthy,
}

/// Invoked with the server name after a reconnect refreshed the tool list.
pub type ToolsChangedCallback = Arc<dyn Fn(&str) + Send + Sync>;

pub struct McpClient {
    config: McpServerConfig,
    defaults: McpDefaults,
    transport: RwLock<Option<Arc<StdioTransport>>>,
    tools: RwLock<Vec<McpToolDef>>,
    health: RwLock<HealthStatus>,
    restart_attempts: AtomicU32,
    on_tools_changed: Option<ToolsChangedCallback>,
    closed: AtomicBool,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("config", &self.config)
            .field("defaults", &self.defaults)
            .field("health", &self.health)
            .field("restart_attempts", &self.restart_attempts)
            .field("closed", &self.closed)
            .finish()
    }
}

impl McpClient {
    /// Spawn, handshake, and start supervision.
    pub async fn start(
        config: McpServerConfig,
        defaults: McpDefaults,
        on_tools_changed: Option<ToolsChangedCallback>,
    ) -> Result<Arc<Self>, McpError> {
        if config.transport == McpTransportKind::Sse {
            return Err(McpError::Transport(TransportError::Unsupported(
                "SSE transport is not yet implemented".into(),
            )));
        }

        let client = Arc::new(Self {
            config,
            defaults,
            transport: RwLock::new(None),
            tools: RwLock::new(Vec::new()),
            health: RwLock::new(HealthStatus::Unknown),
            restart_attempts: AtomicU32::new(0),
            on_tools_changed,
            closed: AtomicBool::new(false),
        });

        client.connect().await?;
        Self::spawn_supervisor(client.clone());
        Ok(client)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn health(&self) -> HealthStatus {
        *self.health.read()
    }

    /// Tools discovered by the most recent `tools/list`.
    pub fn tools(&self) -> Vec<McpToolDef> {
        self.tools.read().clone()
    }

    /// Spawn the process and run the handshake within `connect_timeout`.
    async fn connect(&self) -> Result<(), McpError> {
        let call_timeout = Duration::from_secs(self.defaults.timeout_secs);
        let transport = StdioTransport::spawn(&self.config, call_timeout)?;

        let handshake = async {
            let resp = transport
                .request("initialize", Some(protocol::initialize_params()))
                .await?;
            if let Err(e) = resp.into_result() {
                return Err(McpError::Protocol(format!("initialize failed: {e}")));
            }

            transport.notify("notifications/initialized").await?;

            let resp = transport.request("tools/list", None).await?;
            let tools = match resp.into_result() {
                Ok(value) => serde_json::from_value::<ToolsListResult>(value)
                    .map(|r| r.tools)
                    .unwrap_or_else(|e| {
                        tracing::warn!(
                            server = %self.config.name,
                            error = %e,
                            "failed to parse tools/list result"
                        );
                        Vec::new()
                    }),
                Err(e) => {
                    tracing::warn!(
                        server = %self.config.name,
                        error = %e,
                        "tools/list returned error, server will have no tools"
                    );
                    Vec::new()
                }
            };
            Ok(tools)
        };

        let connect_timeout = Duration::from_secs(self.defaults.connect_timeout_secs);
        let tools = match tokio::time::timeout(connect_timeout, handshake).await {
            Ok(Ok(tools)) => tools,
            Ok(Err(e)) => {
                transport.shutdown().await;
                return Err(e);
            }
            Err(_) => {
                transport.shutdown().await;
                return Err(McpError::ConnectTimeout(self.config.name.clone()));
            }
        };

        tracing::info!(
            server = %self.config.name,
            tool_count = tools.len(),
            "MCP server initialized"
        );

        *self.transport.write() = Some(transport);
        *self.tools.write() = tools;
        *self.health.write() = HealthStatus::Healthy;
        Ok(())
    }

    /// Watch for unexpected child exits and restart with backoff.
    fn spawn_supervisor(client: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                let Some(mut exit) = client
                    .transport
                    .read()
                    .as_ref()
                    .map(|t| t.exit_signal())
                else {
                    break;
                };

                // Either the watch resolves to `true` or its sender is
                // gone; both mean the reader task saw EOF.
                let _ = exit.wait_for(|v| *v).await;

                if client.closed.load(Ordering::SeqCst) {
                    break;
                }

                *client.health.write() = HealthStatus::Unhealthy;
                tracing::warn!(server = %client.config.name, "MCP server exited unexpectedly");

                if !client.defaults.restart_on_crash {
                    break;
                }

                let mut reconnected = false;
                while !client.closed.load(Ordering::SeqCst) {
                    let attempt = client.restart_attempts.fetch_add(1, Ordering::SeqCst);
                    if attempt >= client.defaults.max_restarts {
                        tracing::error!(
                            server = %client.config.name,
                            attempts = attempt,
                            "MCP server exceeded max restarts, giving up"
                        );
                        return;
                    }

                    let delay_ms = client.defaults.backoff_delay_ms(attempt);
                    TraceEvent::McpServerRestart {
                        server: client.config.name.clone(),
                        attempt: attempt + 1,
                        delay_ms,
                    }
                    .emit();
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;

                    match client.connect().await {
                        Ok(()) => {
                            if let Some(cb) = &client.on_tools_changed {
                                cb(&client.config.name);
                            }
                            reconnected = true;
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(
                                server = %client.config.name,
                                error = %e,
                                "MCP restart attempt failed"
                            );
                        }
                    }
                }

                if !reconnected {
                    break;
                }
            }
        });
    }

    /// Call a tool on this server (unqualified tool name).
    pub async fn call_tool(&self, tool_name: &str, arguments: Value) -> Result<ToolCallResult, McpError> {
        let transport = self
            .transport
            .read()
            .clone()
            .ok_or_else(|| McpError::ServerDown(self.config.name.clone()))?;
        if !transport.is_alive() {
            return Err(McpError::ServerDown(self.config.name.clone()));
        }

        let params = serde_json::json!({ "name": tool_name, "arguments": arguments });
        let resp = transport.request("tools/call", Some(params)).await?;
        let value = resp
            .into_result()
            .map_err(|e| McpError::Protocol(format!("tools/call failed: {e}")))?;
        serde_json::from_value::<ToolCallResult>(value)
            .map_err(|e| McpError::Protocol(format!("failed to parse tools/call result: {e}")))
    }

    /// Close the connection. Idempotent; pending requests are rejected.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let transport = self.transport.write().take();
        if let Some(transport) = transport {
            transport.shutdown().await;
        }
        *self.health.write() = HealthStatus::Unknown;
        tracing::info!(server = %self.config.name, "MCP client closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A POSIX-shell MCP server handling the handshake plus `tools/call`.
    const FULL_SERVER: &str = r#"
        while read line; do
            id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
            case "$line" in
                *'"method":"initialize"'*)
                    printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{}}}\n' "$id";;
                *'"method":"tools/list"'*)
                    printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"echo","description":"Echo a value"}]}}\n' "$id";;
                *'"method":"tools/call"'*)
                    printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"echoed"}]}}\n' "$id";;
                *) ;;
            esac
        done
    "#;

    fn config(script: &str) -> McpServerConfig {
        serde_json::from_value(serde_json::json!({
            "name": "test",
            "command": "sh",
            "args": ["-c", script],
        }))
        .unwrap()
    }

    fn fast_defaults() -> McpDefaults {
        serde_json::from_value(serde_json::json!({
            "timeout_secs": 5,
            "connect_timeout_secs": 2,
            "restart_on_crash": false,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn start_discovers_tools_and_reports_healthy() {
        let client = McpClient::start(config(FULL_SERVER), fast_defaults(), None)
            .await
            .unwrap();
        assert_eq!(client.health(), HealthStatus::Healthy);
        let tools = client.tools();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");
        client.close().await;
        assert_eq!(client.health(), HealthStatus::Unknown);
    }

    #[tokio::test]
    async fn call_tool_returns_content() {
        let client = McpClient::start(config(FULL_SERVER), fast_defaults(), None)
            .await
            .unwrap();
        let result = client
            .call_tool("echo", serde_json::json!({ "value": 1 }))
            .await
            .unwrap();
        assert_eq!(result.text(), "echoed");
        assert!(!result.is_error);
        client.close().await;
    }

    #[tokio::test]
    async fn silent_server_fails_connect_with_timeout() {
        let err = McpClient::start(config("sleep 30"), fast_defaults(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::ConnectTimeout(_)));
    }

    #[tokio::test]
    async fn crash_triggers_restart_and_tools_changed() {
        // Handshake, then exit as soon as the first tools/call arrives.
        let crashy = r#"
            while read line; do
                id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
                case "$line" in
                    *'"method":"initialize"'*)
                        printf '{"jsonrpc":"2.0","id":%s,"result":{}}\n' "$id";;
                    *'"method":"tools/list"'*)
                        printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[]}}\n' "$id";;
                    *'"method":"tools/call"'*)
                        exit 1;;
                    *) ;;
                esac
            done
        "#;
        let defaults: McpDefaults = serde_json::from_value(serde_json::json!({
            "timeout_secs": 2,
            "connect_timeout_secs": 2,
            "restart_on_crash": true,
            "max_restarts": 3,
            "restart_delay_ms": 10,
            "backoff_multiplier": 1.0,
            "max_backoff_ms": 50,
        }))
        .unwrap();

        let changed = Arc::new(AtomicBool::new(false));
        let flag = changed.clone();
        let client = McpClient::start(
            config(crashy),
            defaults,
            Some(Arc::new(move |_server: &str| {
                flag.store(true, Ordering::SeqCst);
            })),
        )
        .await
        .unwrap();

        // Trip the crash.
        let _ = client.call_tool("boom", serde_json::json!({})).await;

        // Wait for the supervisor to reconnect.
        for _ in 0..100 {
            if changed.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(changed.load(Ordering::SeqCst), "tools-changed never fired");
        assert_eq!(client.health(), HealthStatus::Healthy);
        client.close().await;
    }
}
