//! MCP (Model Context Protocol) configuration types for the domain layer.
//!
//! Lightweight config structs used to deserialize the `[mcp]` section of
//! the gateway config. The actual client logic lives in `owlia-mcp-client`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::tool::SecurityLevel;

/// Top-level MCP configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct McpConfig {
    #[serde(default)]
    pub servers: Vec<McpServerConfig>,
    #[serde(default)]
    pub defaults: McpDefaults,
    /// Security level overrides keyed by fully qualified tool name
    /// (`<server>__<tool>`). Tools without an override default to `write`.
    #[serde(default)]
    pub security: HashMap<String, SecurityLevel>,
}

/// Configuration for a single MCP server connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Unique server name, used in tool namespacing: `<name>__<tool>`.
    pub name: String,
    #[serde(default)]
    pub transport: McpTransportKind,
    /// The command to spawn (e.g. `"npx"`). Stdio transport only.
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory for the spawned process.
    #[serde(default)]
    pub cwd: Option<std::path::PathBuf>,
    /// Endpoint URL for SSE transport.
    #[serde(default)]
    pub url: Option<String>,
}

/// Transport kind for connecting to an MCP server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum McpTransportKind {
    #[default]
    Stdio,
    Sse,
}

/// Defaults shared by all servers unless overridden.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpDefaults {
    /// Per-call timeout in seconds.
    #[serde(default = "d_timeout")]
    pub timeout_secs: u64,
    /// Connect handshake deadline in seconds.
    #[serde(default = "d_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "d_true")]
    pub restart_on_crash: bool,
    #[serde(default = "d_max_restarts")]
    pub max_restarts: u32,
    /// Base restart delay in milliseconds.
    #[serde(default = "d_restart_delay")]
    pub restart_delay_ms: u64,
    #[serde(default = "d_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Cap on the computed restart delay in milliseconds.
    #[serde(default = "d_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for McpDefaults {
    fn default() -> Self {
        Self {
            timeout_secs: d_timeout(),
            connect_timeout_secs: d_connect_timeout(),
            restart_on_crash: true,
            max_restarts: d_max_restarts(),
            restart_delay_ms: d_restart_delay(),
            backoff_multiplier: d_backoff_multiplier(),
            max_backoff_ms: d_max_backoff(),
        }
    }
}

impl McpDefaults {
    /// Restart delay for the given attempt:
    /// `min(max_backoff, restart_delay * backoff_multiplier^attempt)`.
    pub fn backoff_delay_ms(&self, attempt: u32) -> u64 {
        let raw = self.restart_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        (raw as u64).min(self.max_backoff_ms)
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_timeout() -> u64 {
    30
}
fn d_connect_timeout() -> u64 {
    10
}
fn d_true() -> bool {
    true
}
fn d_max_restarts() -> u32 {
    5
}
fn d_restart_delay() -> u64 {
    500
}
fn d_backoff_multiplier() -> f64 {
    2.0
}
fn d_max_backoff() -> u64 {
    30_000
}
