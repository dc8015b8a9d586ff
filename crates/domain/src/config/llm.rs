//! LLM provider configuration.
//!
//! Providers are tried in ascending `priority` order by the agent loop's
//! failover rotation. Wire adapters live outside the core; the config only
//! names the provider kind, its key env var, and its default model.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique provider id (e.g. `"anthropic-main"`).
    pub id: String,
    #[serde(default)]
    pub kind: ProviderKind,
    /// Lower number = tried first.
    #[serde(default = "d_priority")]
    pub priority: u32,
    /// Environment variable holding the API key. Not used for `cli` providers.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Default model identifier for this provider.
    #[serde(default)]
    pub model: Option<String>,
    /// For `cli` providers: the binary to invoke per turn.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    Anthropic,
    OpenaiCompat,
    /// Backend is an external CLI binary that handles tools internally;
    /// the loop delegates whole turns to it.
    Cli,
}

fn d_priority() -> u32 {
    100
}
