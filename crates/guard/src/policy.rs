//! Tier policy engine.
//!
//! Maps a tool invocation (tool name, security level, arguments) plus
//! escalation context (daily spend, denial streak) to a
//! [`PolicyDecision`]. Tiers 1/2/3 denote escalation depth, 1 highest.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use owlia_domain::config::{PolicyConfig, ToolPolicy};
use owlia_domain::tool::SecurityLevel;
use owlia_domain::trace::TraceEvent;

use crate::amount::extract_amount_usd;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Decision types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyAction {
    Allow,
    Confirm,
    Escalate,
    Deny,
}

#[derive(Debug, Clone, Serialize)]
pub struct PolicyDecision {
    pub action: PolicyAction,
    pub tier: u8,
    /// Tier after escalation adjustments (lower = deeper scrutiny).
    pub effective_tier: u8,
    pub signer_tier: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Per-user context computed from the audit log before deciding.
#[derive(Debug, Clone, Copy, Default)]
pub struct EscalationContext {
    pub daily_spent_usd: f64,
    pub consecutive_denials: u32,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct PolicyEngine {
    rules: HashMap<String, ToolPolicy>,
    default_tier: u8,
    denial_escalate_threshold: u32,
}

impl PolicyEngine {
    pub fn new(config: &PolicyConfig) -> Self {
        let mut rules = HashMap::new();
        for rule in &config.rules {
            if rules.insert(rule.tool.clone(), rule.clone()).is_some() {
                tracing::warn!(tool = %rule.tool, "duplicate policy rule, last one wins");
            }
        }
        Self {
            rules,
            default_tier: config.default_tier,
            denial_escalate_threshold: config.denial_escalate_threshold,
        }
    }

    /// The explicit rule for a tool, if configured.
    pub fn rule(&self, tool: &str) -> Option<&ToolPolicy> {
        self.rules.get(tool)
    }

    /// Decide the fate of a tool invocation.
    pub fn decide(
        &self,
        tool: &str,
        user: &str,
        security: SecurityLevel,
        args: &Value,
        ctx: &EscalationContext,
    ) -> PolicyDecision {
        let rule = self.rules.get(tool);
        let tier = rule.map(|r| r.tier).unwrap_or(self.default_tier);
        let amount = extract_amount_usd(args);

        let decision = self.decide_inner(rule, tier, security, amount, ctx);

        TraceEvent::PolicyDecision {
            tool: tool.to_owned(),
            user: user.to_owned(),
            action: format!("{:?}", decision.action).to_lowercase(),
            tier: decision.tier,
            effective_tier: decision.effective_tier,
        }
        .emit();

        decision
    }

    fn decide_inner(
        &self,
        rule: Option<&ToolPolicy>,
        tier: u8,
        security: SecurityLevel,
        amount: Option<f64>,
        ctx: &EscalationContext,
    ) -> PolicyDecision {
        // Daily spend ceiling: a call that would cross the line is denied.
        if let Some(limit) = rule.and_then(|r| r.daily_limit_usd) {
            let projected = ctx.daily_spent_usd + amount.unwrap_or(0.0);
            if projected > limit {
                return PolicyDecision {
                    action: PolicyAction::Deny,
                    tier,
                    effective_tier: tier,
                    signer_tier: tier,
                    reason: Some(format!(
                        "daily limit exceeded: {projected:.2} of {limit:.2} USD"
                    )),
                };
            }
        }

        // A denial streak tightens the effective tier by one.
        if ctx.consecutive_denials >= self.denial_escalate_threshold {
            let effective = tier.saturating_sub(1).max(1);
            return PolicyDecision {
                action: PolicyAction::Escalate,
                tier,
                effective_tier: effective,
                signer_tier: effective,
                reason: Some(format!(
                    "{} consecutive denials",
                    ctx.consecutive_denials
                )),
            };
        }

        // Sign-level tools without an explicit rule are never auto-allowed.
        if security == SecurityLevel::Sign && rule.is_none() {
            let effective = tier.saturating_sub(1).max(1);
            return PolicyDecision {
                action: PolicyAction::Escalate,
                tier,
                effective_tier: effective,
                signer_tier: effective,
                reason: Some("sign-level tool has no policy rule".into()),
            };
        }

        if rule.map(|r| r.confirm).unwrap_or(false) {
            return PolicyDecision {
                action: PolicyAction::Confirm,
                tier,
                effective_tier: tier,
                signer_tier: tier,
                reason: None,
            };
        }

        PolicyDecision {
            action: PolicyAction::Allow,
            tier,
            effective_tier: tier,
            signer_tier: tier,
            reason: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine_with(rules: Vec<ToolPolicy>) -> PolicyEngine {
        PolicyEngine::new(&PolicyConfig {
            default_tier: 3,
            denial_escalate_threshold: 3,
            rules,
        })
    }

    fn rule(tool: &str) -> ToolPolicy {
        ToolPolicy {
            tool: tool.into(),
            tier: 2,
            allowed_users: None,
            cooldown: None,
            daily_limit_usd: None,
            confirm: false,
        }
    }

    #[test]
    fn unconfigured_tool_allows_at_default_tier() {
        let engine = engine_with(vec![]);
        let d = engine.decide(
            "read_text_file",
            "alice",
            SecurityLevel::Read,
            &json!({}),
            &EscalationContext::default(),
        );
        assert_eq!(d.action, PolicyAction::Allow);
        assert_eq!(d.tier, 3);
        assert_eq!(d.effective_tier, 3);
    }

    #[test]
    fn daily_limit_denies_when_projected_over() {
        let mut r = rule("pay");
        r.daily_limit_usd = Some(100.0);
        let engine = engine_with(vec![r]);

        let ctx = EscalationContext {
            daily_spent_usd: 90.0,
            consecutive_denials: 0,
        };
        let d = engine.decide(
            "pay",
            "alice",
            SecurityLevel::Sign,
            &json!({ "amountUsd": 20.0 }),
            &ctx,
        );
        assert_eq!(d.action, PolicyAction::Deny);
        assert!(d.reason.unwrap().contains("daily limit"));

        // Under the limit proceeds.
        let d = engine.decide(
            "pay",
            "alice",
            SecurityLevel::Sign,
            &json!({ "amountUsd": 5.0 }),
            &ctx,
        );
        assert_ne!(d.action, PolicyAction::Deny);
    }

    #[test]
    fn denial_streak_escalates_and_tightens_tier() {
        let engine = engine_with(vec![rule("exec")]);
        let ctx = EscalationContext {
            daily_spent_usd: 0.0,
            consecutive_denials: 3,
        };
        let d = engine.decide("exec", "alice", SecurityLevel::Write, &json!({}), &ctx);
        assert_eq!(d.action, PolicyAction::Escalate);
        assert_eq!(d.tier, 2);
        assert_eq!(d.effective_tier, 1);
        assert_eq!(d.signer_tier, 1);
    }

    #[test]
    fn unruled_sign_tool_escalates() {
        let engine = engine_with(vec![]);
        let d = engine.decide(
            "wallet__send",
            "alice",
            SecurityLevel::Sign,
            &json!({}),
            &EscalationContext::default(),
        );
        assert_eq!(d.action, PolicyAction::Escalate);
        assert_eq!(d.effective_tier, 2);
    }

    #[test]
    fn confirm_flag_yields_confirm() {
        let mut r = rule("deploy");
        r.confirm = true;
        let engine = engine_with(vec![r]);
        let d = engine.decide(
            "deploy",
            "alice",
            SecurityLevel::Write,
            &json!({}),
            &EscalationContext::default(),
        );
        assert_eq!(d.action, PolicyAction::Confirm);
    }

    #[test]
    fn effective_tier_never_below_one() {
        let mut r = rule("exec");
        r.tier = 1;
        let engine = engine_with(vec![r]);
        let ctx = EscalationContext {
            daily_spent_usd: 0.0,
            consecutive_denials: 5,
        };
        let d = engine.decide("exec", "alice", SecurityLevel::Write, &json!({}), &ctx);
        assert_eq!(d.effective_tier, 1);
    }
}
