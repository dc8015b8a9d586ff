use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Write gate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Allowlist + interactive confirmation for non-read tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteGateConfig {
    /// Stable user ids permitted to confirm write-level tools.
    #[serde(default)]
    pub allowed_users: Vec<String>,
    /// How long to wait for a confirmation reply.
    #[serde(default = "d_gate_timeout")]
    pub timeout_secs: u64,
    /// JSONL log of every gate outcome, kept beside the workspace.
    #[serde(default = "d_gate_log")]
    pub log_file: PathBuf,
}

impl Default for WriteGateConfig {
    fn default() -> Self {
        Self {
            allowed_users: Vec::new(),
            timeout_secs: d_gate_timeout(),
            log_file: d_gate_log(),
        }
    }
}

fn d_gate_timeout() -> u64 {
    120
}
fn d_gate_log() -> PathBuf {
    PathBuf::from("./workspace/write-gate.jsonl")
}
