//! The tool executor — every tool invocation passes through this
//! fail-closed pipeline:
//!
//! resolve → emergency stop → write gate → policy decision →
//! allowed-users → cooldown → audit pre-log → execute → audit finalize.
//!
//! Safe to call concurrently from different sessions; the write gate's
//! pending map serializes confirmations per session.

use std::sync::Arc;
use std::time::Instant;

use owlia_channels::Channel;
use owlia_domain::tool::{SecurityLevel, ToolCall, ToolDefinition, ToolResult};
use owlia_domain::trace::TraceEvent;
use owlia_guard::{
    AnomalyDetector, AuditEntry, AuditLogger, AuditResult, CooldownTracker, EmergencyStop,
    EscalationContext, GateOutcome, PolicyAction, PolicyEngine, WriteGate,
};
use owlia_tools::{ToolContext, ToolRegistry};

/// Process-wide services shared by all tool calls, constructed once at
/// startup and threaded through explicitly.
#[derive(Clone)]
pub struct CoreServices {
    pub registry: Arc<ToolRegistry>,
    pub policy: Arc<PolicyEngine>,
    pub audit: Arc<AuditLogger>,
    pub cooldowns: Arc<CooldownTracker>,
    pub write_gate: Arc<WriteGate>,
    pub emergency: Arc<EmergencyStop>,
    pub anomaly: Arc<AnomalyDetector>,
}

pub struct ToolExecutor {
    services: CoreServices,
}

impl ToolExecutor {
    pub fn new(services: CoreServices) -> Self {
        Self { services }
    }

    /// Tool definitions snapshot for the LLM.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.services.registry.definitions()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.services.registry
    }

    /// Run one tool call through the full pipeline.
    ///
    /// `channel` carries the session's channel for write-gate prompts;
    /// non-read tools are denied when it is absent.
    pub async fn execute(
        &self,
        call: &ToolCall,
        ctx: &ToolContext,
        channel: Option<&Arc<dyn Channel>>,
    ) -> ToolResult {
        let services = &self.services;

        // ── 1. Resolve (alias-aware) ─────────────────────────────────
        let Some(tool) = services.registry.resolve(&call.tool_name) else {
            return ToolResult::fail(call, format!("Unknown tool: {}", call.tool_name));
        };
        let tool_name = tool.name().to_owned();
        let security = tool.security();

        // ── 2. Emergency stop ────────────────────────────────────────
        if services.emergency.is_engaged() {
            return ToolResult::fail(call, "emergency stop is engaged");
        }

        // ── 3. Write gate for non-read tools ─────────────────────────
        if security != SecurityLevel::Read {
            let Some(channel) = channel else {
                return ToolResult::fail(
                    call,
                    "write-level tool requires a channel for confirmation, none configured",
                );
            };
            let outcome = services
                .write_gate
                .confirm(
                    channel.as_ref(),
                    &ctx.target,
                    &ctx.session_key,
                    &ctx.user_id,
                    &tool_name,
                    &call.arguments,
                )
                .await;
            match outcome {
                GateOutcome::Approved => {}
                GateOutcome::NotInAllowlist => {
                    return ToolResult::fail(call, "write gate: user not in allowlist");
                }
                GateOutcome::Busy => {
                    return ToolResult::fail(
                        call,
                        "write gate: another confirmation is pending on this session",
                    );
                }
                GateOutcome::TimedOut => {
                    return ToolResult::fail(call, "write gate: confirmation timed out");
                }
                GateOutcome::Denied { .. } => {
                    return ToolResult::fail(call, "write gate: denied by user");
                }
            }
        }

        // ── 4. Pre-policy audit context ──────────────────────────────
        let amount_usd = owlia_guard::extract_amount_usd(&call.arguments);
        let esc = EscalationContext {
            daily_spent_usd: services.audit.daily_spent_usd(&ctx.user_id),
            consecutive_denials: services.audit.consecutive_denials(&ctx.user_id),
        };

        // ── 5. Policy decision ───────────────────────────────────────
        let decision =
            services
                .policy
                .decide(&tool_name, &ctx.user_id, security, &call.arguments, &esc);

        let entry = AuditEntry::pending(
            &tool_name,
            decision.tier,
            decision.effective_tier,
            security,
            &ctx.user_id,
            &ctx.channel_id,
            call.arguments.clone(),
            amount_usd,
        );

        match decision.action {
            PolicyAction::Deny => {
                let reason = decision
                    .reason
                    .clone()
                    .unwrap_or_else(|| "denied by policy".into());
                self.record_refusal(entry, AuditResult::Denied, &reason);
                return ToolResult::fail(call, format!("Policy denied: {reason}"));
            }
            PolicyAction::Escalate => {
                let reason = decision.reason.clone().unwrap_or_default();
                self.record_refusal(entry, AuditResult::Escalated, &reason);
                return ToolResult::fail(
                    call,
                    format!("requires Tier {} confirmation", decision.effective_tier),
                );
            }
            PolicyAction::Confirm => {
                // The confirm flow is deliberately unimplemented.
                self.record_refusal(entry, AuditResult::Denied, "confirmation-not-implemented");
                return ToolResult::fail(
                    call,
                    "Policy denied: confirmation-not-implemented",
                );
            }
            PolicyAction::Allow => {}
        }

        let rule = services.policy.rule(&tool_name).cloned();

        // ── 6. allowed_users (only when an explicit list exists) ─────
        if let Some(allowed) = rule.as_ref().and_then(|r| r.allowed_users.as_ref()) {
            if !allowed.iter().any(|u| u == &ctx.user_id) {
                self.record_refusal(entry, AuditResult::Denied, "not-in-allowedUsers");
                return ToolResult::fail(call, "Policy denied: not-in-allowedUsers");
            }
        }

        // ── 7. Cooldown ──────────────────────────────────────────────
        let cooldown_cfg = rule.as_ref().and_then(|r| r.cooldown);
        if let Some(cd) = &cooldown_cfg {
            let check = services.cooldowns.check(&tool_name, &ctx.user_id, cd);
            if !check.allowed {
                let reason = check.reason.unwrap_or_else(|| "cooldown".into());
                self.record_refusal(entry, AuditResult::Denied, &reason);
                return ToolResult::fail(call, reason);
            }
        }

        // ── 8. Audit pre-log (fail-closed) ───────────────────────────
        let audit_id = match services.audit.pre_log(entry) {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(error = %e, tool = %tool_name, "audit pre-log failed, denying call");
                return ToolResult::fail(call, "Audit system failure");
            }
        };

        // ── 9. Execute ───────────────────────────────────────────────
        let start = Instant::now();
        let result = tool.execute(call, ctx).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        // ── 10. Finalize ─────────────────────────────────────────────
        let tx_hash = result
            .data
            .as_ref()
            .and_then(owlia_guard::extract_tx_hash);
        let audit_result = if result.success {
            AuditResult::Success
        } else {
            AuditResult::Error
        };
        match services.audit.finalize(
            audit_id,
            audit_result,
            Some(duration_ms),
            tx_hash,
            result.error.clone(),
        ) {
            Ok(final_entry) => services.anomaly.observe(&final_entry),
            Err(e) => {
                tracing::error!(error = %e, audit_id = %audit_id, "audit finalize failed");
            }
        }

        if result.success {
            if let Some(cd) = &cooldown_cfg {
                services.cooldowns.record(&tool_name, &ctx.user_id, cd);
            }
        }

        TraceEvent::ToolExecuted {
            tool: tool_name,
            user: ctx.user_id.clone(),
            success: result.success,
            duration_ms,
        }
        .emit();

        result
    }

    /// Record a pre-execution refusal and feed the anomaly detector.
    fn record_refusal(&self, entry: AuditEntry, result: AuditResult, reason: &str) {
        match self
            .services
            .audit
            .record(entry, result, Some(reason.to_owned()))
        {
            Ok(final_entry) => self.services.anomaly.observe(&final_entry),
            Err(e) => tracing::error!(error = %e, "failed to record audit refusal"),
        }
    }
}
