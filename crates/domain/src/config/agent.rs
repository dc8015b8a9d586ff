use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum LLM turns per loop (one LLM call = one iteration).
    #[serde(default = "d_max_iterations")]
    pub max_iterations: u32,
    /// Wall-clock budget for the whole loop, in seconds.
    #[serde(default = "d_timeout")]
    pub timeout_secs: u64,
    /// System prompt prepended to every conversation.
    #[serde(default = "d_system_prompt")]
    pub system_prompt: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: d_max_iterations(),
            timeout_secs: d_timeout(),
            system_prompt: d_system_prompt(),
        }
    }
}

fn d_max_iterations() -> u32 {
    10
}
fn d_timeout() -> u64 {
    300
}
fn d_system_prompt() -> String {
    "You are Owlia, a helpful assistant with access to tools.".into()
}
