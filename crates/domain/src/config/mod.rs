//! Typed configuration for the whole platform.
//!
//! Deserialized from a single TOML file by the gateway binary. Every field
//! carries a serde default so a partial (or empty) file is valid.

mod agent;
mod llm;
mod mcp;
mod policy;
mod server;
mod sessions;
mod write_gate;

pub use agent::*;
pub use llm::*;
pub use mcp::*;
pub use policy::*;
pub use server::*;
pub use sessions::*;
pub use write_gate::*;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub write_gate: WriteGateConfig,
    #[serde(default)]
    pub mcp: McpConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
}

impl Config {
    /// Load configuration from a TOML file. A missing file yields the
    /// default configuration (every section has serde defaults).
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(Error::Io)?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Workspace
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Root directory file tools may touch.
    #[serde(default = "d_workspace_path")]
    pub path: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            path: d_workspace_path(),
        }
    }
}

fn d_workspace_path() -> PathBuf {
    PathBuf::from("./workspace")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Channels
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How inbound group messages activate the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GroupActivation {
    /// Group messages must mention the bot to start a turn.
    #[default]
    Mention,
    /// Every group message starts a turn.
    All,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub group_activation: GroupActivation,
    /// Mention prefix that activates the bot in groups (e.g. `"@owlia"`).
    #[serde(default = "d_mention")]
    pub mention: String,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            group_activation: GroupActivation::default(),
            mention: d_mention(),
        }
    }
}

fn d_mention() -> String {
    "@owlia".into()
}
