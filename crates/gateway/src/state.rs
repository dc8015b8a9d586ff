use std::sync::Arc;

use chrono::{DateTime, Utc};

use owlia_agent::{AgentLoop, CancelMap, ToolExecutor};
use owlia_channels::ChannelManager;
use owlia_domain::config::Config;
use owlia_mcp_client::McpManager;
use owlia_providers::ProviderRegistry;
use owlia_sessions::{SessionStore, TranscriptStore};

use crate::store::GatewayStore;

/// Shared application state passed to all API handlers.
///
/// Fields are grouped by concern:
/// - **Core services** — config, persistent store, providers
/// - **Agent core** — executor, loop, cancellation
/// - **Sessions** — session store, transcripts
/// - **Channels & MCP** — channel manager, MCP manager
/// - **Security (startup-computed)** — admin token hash
#[derive(Clone)]
pub struct AppState {
    // ── Core services ────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub store: Arc<GatewayStore>,
    pub providers: Arc<ProviderRegistry>,

    // ── Agent core ───────────────────────────────────────────────────
    pub executor: Arc<ToolExecutor>,
    pub agent: Arc<AgentLoop>,
    pub cancel_map: Arc<CancelMap>,

    // ── Sessions ─────────────────────────────────────────────────────
    pub sessions: Arc<SessionStore>,
    pub transcripts: Arc<TranscriptStore>,

    // ── Channels & MCP ───────────────────────────────────────────────
    pub channels: Arc<ChannelManager>,
    pub mcp: Arc<McpManager>,

    // ── Security (startup-computed) ──────────────────────────────────
    /// SHA-256 hash of the gateway admin token (read once at startup).
    /// `None` disables the admin endpoints entirely.
    pub admin_token_hash: Option<Vec<u8>>,

    pub started_at: DateTime<Utc>,
}
