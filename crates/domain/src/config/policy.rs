//! Tier policy configuration for the tool executor.
//!
//! Each rule binds a tool name to a tier (1 = highest escalation depth),
//! an optional user allowlist, an optional cooldown, and an optional
//! daily USD spending limit.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Tier applied to tools without an explicit rule.
    #[serde(default = "d_default_tier")]
    pub default_tier: u8,
    /// Consecutive denials after which decisions escalate.
    #[serde(default = "d_denial_threshold")]
    pub denial_escalate_threshold: u32,
    #[serde(default)]
    pub rules: Vec<ToolPolicy>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            default_tier: d_default_tier(),
            denial_escalate_threshold: d_denial_threshold(),
            rules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolPolicy {
    /// Tool name the rule applies to (post-alias resolution).
    pub tool: String,
    #[serde(default = "d_default_tier")]
    pub tier: u8,
    /// When present, only these stable user ids may invoke the tool.
    /// Absent means no user restriction.
    #[serde(default)]
    pub allowed_users: Option<Vec<String>>,
    #[serde(default)]
    pub cooldown: Option<CooldownConfig>,
    #[serde(default)]
    pub daily_limit_usd: Option<f64>,
    /// When set, the decision is `confirm` instead of `allow`.
    #[serde(default)]
    pub confirm: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CooldownConfig {
    pub max_calls: u32,
    pub window_secs: u64,
}

fn d_default_tier() -> u8 {
    3
}
fn d_denial_threshold() -> u32 {
    3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_defaults() {
        let raw = r#"{ "tool": "transfer_funds" }"#;
        let rule: ToolPolicy = serde_json::from_str(raw).unwrap();
        assert_eq!(rule.tier, 3);
        assert!(rule.allowed_users.is_none());
        assert!(rule.cooldown.is_none());
        assert!(!rule.confirm);
    }

    #[test]
    fn full_rule_parses() {
        let raw = r#"{
            "tool": "transfer_funds",
            "tier": 1,
            "allowed_users": ["alice"],
            "cooldown": { "max_calls": 2, "window_secs": 3600 },
            "daily_limit_usd": 100.0
        }"#;
        let rule: ToolPolicy = serde_json::from_str(raw).unwrap();
        assert_eq!(rule.tier, 1);
        assert_eq!(rule.allowed_users.as_deref(), Some(&["alice".to_string()][..]));
        assert_eq!(rule.cooldown.unwrap().max_calls, 2);
        assert_eq!(rule.daily_limit_usd, Some(100.0));
    }
}
