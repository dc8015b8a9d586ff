//! MCP manager — holds all server clients and owns tool namespacing.
//!
//! Every tool discovered on server `S` is exposed as `S__<tool>`.
//! Security levels come from the per-server override map in config,
//! keyed by the fully qualified name; unqualified tools default to
//! `write` (fail-closed).

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use owlia_domain::config::McpConfig;
use owlia_domain::tool::SecurityLevel;

use crate::client::{McpClient, ToolsChangedCallback};
use crate::protocol::{McpToolDef, ToolCallResult};
use crate::transport::TransportError;

/// Separator between server name and tool name.
const NAMESPACE_SEP: &str = "__";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("MCP transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("MCP protocol error: {0}")]
    Protocol(String),

    #[error("MCP connect timeout: {0}")]
    ConnectTimeout(String),

    #[error("MCP server not found: {0}")]
    ServerNotFound(String),

    #[error("MCP server is down: {0}")]
    ServerDown(String),
}

impl From<McpError> for owlia_domain::error::Error {
    fn from(e: McpError) -> Self {
        owlia_domain::error::Error::Transport(e.to_string())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Namespacing helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `<server>__<tool>`.
pub fn qualify(server: &str, tool: &str) -> String {
    format!("{server}{NAMESPACE_SEP}{tool}")
}

/// The registry prefix for one server's tools.
pub fn server_prefix(server: &str) -> String {
    format!("{server}{NAMESPACE_SEP}")
}

/// Split a qualified name back into `(server, tool)`.
pub fn split_qualified(name: &str) -> Option<(&str, &str)> {
    name.split_once(NAMESPACE_SEP)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct McpManager {
    clients: HashMap<String, Arc<McpClient>>,
    security: HashMap<String, SecurityLevel>,
}

impl McpManager {
    /// An empty manager (no MCP servers configured).
    pub fn empty() -> Self {
        Self {
            clients: HashMap::new(),
            security: HashMap::new(),
        }
    }

    /// Initialize every configured server. Servers that fail to start are
    /// logged and skipped, not fatal.
    pub async fn from_config(
        config: &McpConfig,
        on_tools_changed: Option<ToolsChangedCallback>,
    ) -> Self {
        let mut clients = HashMap::new();

        for server_config in &config.servers {
            tracing::info!(
                server = %server_config.name,
                command = %server_config.command,
                "initializing MCP server"
            );
            match McpClient::start(
                server_config.clone(),
                config.defaults.clone(),
                on_tools_changed.clone(),
            )
            .await
            {
                Ok(client) => {
                    clients.insert(server_config.name.clone(), client);
                }
                Err(e) => {
                    tracing::warn!(
                        server = %server_config.name,
                        error = %e,
                        "failed to initialize MCP server, skipping"
                    );
                }
            }
        }

        if !clients.is_empty() {
            tracing::info!(count = clients.len(), "MCP manager ready");
        }

        Self {
            clients,
            security: config.security.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn server_count(&self) -> usize {
        self.clients.len()
    }

    pub fn client(&self, server: &str) -> Option<Arc<McpClient>> {
        self.clients.get(server).cloned()
    }

    /// All discovered tools as `(qualified_name, definition, security)`.
    pub fn list_tools(&self) -> Vec<(String, McpToolDef, SecurityLevel)> {
        self.clients
            .values()
            .flat_map(|client| {
                client.tools().into_iter().map(|def| {
                    let qualified = qualify(client.name(), &def.name);
                    let security = self.security_for(&qualified);
                    (qualified, def, security)
                })
            })
            .collect()
    }

    /// Security level for a fully qualified tool name; defaults to `write`.
    pub fn security_for(&self, qualified: &str) -> SecurityLevel {
        self.security
            .get(qualified)
            .copied()
            .unwrap_or(SecurityLevel::Write)
    }

    /// Call a tool by fully qualified name.
    pub async fn call(&self, qualified: &str, arguments: Value) -> Result<ToolCallResult, McpError> {
        let (server, tool) = split_qualified(qualified)
            .ok_or_else(|| McpError::ServerNotFound(qualified.to_owned()))?;
        let client = self
            .clients
            .get(server)
            .ok_or_else(|| McpError::ServerNotFound(server.to_owned()))?;
        client.call_tool(tool, arguments).await
    }

    /// Close every client concurrently.
    pub async fn shutdown(&self) {
        let futs: Vec<_> = self.clients.values().map(|c| c.close()).collect();
        futures_util::future::join_all(futs).await;
    }
}
