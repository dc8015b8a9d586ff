//! The write gate — allowlist + interactive confirmation for non-read
//! tools.
//!
//! A write-level call pauses while a confirmation prompt goes out on the
//! session's channel; the user's next reply (within the timeout) decides
//! the call. One confirmation may be outstanding per session; overlapping
//! requests on the same session are denied. Every outcome is appended to a
//! JSONL gate log kept beside the workspace, separate from the structured
//! audit log.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use owlia_channels::{Channel, OutboundMessage};
use owlia_domain::config::WriteGateConfig;
use owlia_domain::trace::TraceEvent;

/// Replies accepted as approval (after trim + lowercase).
const APPROVAL_WORDS: [&str; 5] = ["yes", "y", "confirm", "ok", "approve"];

/// Longest argument preview included in the confirmation prompt.
const ARGS_PREVIEW_LEN: usize = 200;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    Approved,
    /// The user replied with something other than an approval word.
    Denied { reply: String },
    TimedOut,
    NotInAllowlist,
    /// Another confirmation is already pending on this session.
    Busy,
}

impl GateOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateOutcome::Approved => "approved",
            GateOutcome::Denied { .. } => "denied",
            GateOutcome::TimedOut => "timeout",
            GateOutcome::NotInAllowlist => "not_in_allowlist",
            GateOutcome::Busy => "busy",
        }
    }
}

/// One line in the gate's JSONL log.
#[derive(Debug, Serialize)]
struct GateLogEntry<'a> {
    ts: chrono::DateTime<chrono::Utc>,
    session_key: &'a str,
    user: &'a str,
    tool: &'a str,
    outcome: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply: Option<&'a str>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// WriteGate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct WriteGate {
    allowed_users: Vec<String>,
    timeout: Duration,
    log_path: PathBuf,
    /// Session keys with an outstanding confirmation.
    pending: Arc<Mutex<HashSet<String>>>,
}

/// Clears the session's pending flag when the confirmation resolves,
/// whichever way it resolves.
struct PendingGuard {
    pending: Arc<Mutex<HashSet<String>>>,
    session_key: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.session_key);
    }
}

impl WriteGate {
    pub fn new(config: &WriteGateConfig) -> Self {
        Self {
            allowed_users: config.allowed_users.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            log_path: config.log_file.clone(),
            pending: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Is a confirmation currently outstanding for this session?
    pub fn is_pending(&self, session_key: &str) -> bool {
        self.pending.lock().contains(session_key)
    }

    /// Run the full confirmation flow for a non-read tool call.
    pub async fn confirm(
        &self,
        channel: &dyn Channel,
        target: &str,
        session_key: &str,
        user_id: &str,
        tool_name: &str,
        args: &Value,
    ) -> GateOutcome {
        let outcome = self
            .confirm_inner(channel, target, session_key, user_id, tool_name, args)
            .await;

        self.log_outcome(session_key, user_id, tool_name, &outcome);
        TraceEvent::WriteGateOutcome {
            session_key: session_key.to_owned(),
            tool: tool_name.to_owned(),
            outcome: outcome.as_str().to_owned(),
        }
        .emit();

        outcome
    }

    async fn confirm_inner(
        &self,
        channel: &dyn Channel,
        target: &str,
        session_key: &str,
        user_id: &str,
        tool_name: &str,
        args: &Value,
    ) -> GateOutcome {
        if !self.allowed_users.iter().any(|u| u == user_id) {
            return GateOutcome::NotInAllowlist;
        }

        // Claim the session's pending slot, or bail if taken.
        let _guard = {
            let mut pending = self.pending.lock();
            if !pending.insert(session_key.to_owned()) {
                return GateOutcome::Busy;
            }
            PendingGuard {
                pending: self.pending.clone(),
                session_key: session_key.to_owned(),
            }
        };

        let prompt = format_prompt(tool_name, args, self.timeout.as_secs());
        if let Err(e) = channel.send(target, OutboundMessage::text(prompt)).await {
            tracing::warn!(error = %e, tool = tool_name, "failed to send confirmation prompt");
            return GateOutcome::TimedOut;
        }

        match channel.wait_for_reply(target, user_id, self.timeout).await {
            Some(reply) => {
                if is_approval(&reply) {
                    GateOutcome::Approved
                } else {
                    GateOutcome::Denied { reply }
                }
            }
            None => GateOutcome::TimedOut,
        }
    }

    fn log_outcome(&self, session_key: &str, user: &str, tool: &str, outcome: &GateOutcome) {
        let reply = match outcome {
            GateOutcome::Denied { reply } => Some(reply.as_str()),
            _ => None,
        };
        let entry = GateLogEntry {
            ts: chrono::Utc::now(),
            session_key,
            user,
            tool,
            outcome: outcome.as_str(),
            reply,
        };
        if let Err(e) = append_jsonl(&self.log_path, &entry) {
            tracing::error!(error = %e, "failed to write write-gate log");
        }
    }
}

/// Is the reply an approval word? Case-insensitive, whitespace-trimmed.
pub(crate) fn is_approval(reply: &str) -> bool {
    let normalized = reply.trim().to_lowercase();
    APPROVAL_WORDS.contains(&normalized.as_str())
}

fn format_prompt(tool_name: &str, args: &Value, timeout_secs: u64) -> String {
    let mut preview = args.to_string();
    if preview.len() > ARGS_PREVIEW_LEN {
        let mut cut = ARGS_PREVIEW_LEN;
        while !preview.is_char_boundary(cut) {
            cut -= 1;
        }
        preview.truncate(cut);
        preview.push('…');
    }
    format!(
        "Confirmation required for `{tool_name}` with arguments {preview}.\n\
         Reply \"yes\" to approve or anything else to deny ({timeout_secs}s)."
    )
}

fn append_jsonl<T: Serialize>(path: &Path, entry: &T) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    let json = serde_json::to_string(entry)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    file.write_all(json.as_bytes())?;
    file.write_all(b"\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use owlia_channels::ChannelCapabilities;
    use owlia_domain::error::Result;

    /// Fake channel that records prompts and returns a scripted reply.
    struct ScriptedChannel {
        reply: Option<String>,
        sent: Mutex<Vec<String>>,
        /// Delay before the reply resolves.
        delay: Duration,
    }

    impl ScriptedChannel {
        fn replying(reply: &str) -> Self {
            Self {
                reply: Some(reply.to_owned()),
                sent: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
            }
        }

        fn silent() -> Self {
            Self {
                reply: None,
                sent: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl Channel for ScriptedChannel {
        fn id(&self) -> &str {
            "scripted"
        }
        fn capabilities(&self) -> ChannelCapabilities {
            ChannelCapabilities::default()
        }
        async fn start(&self) -> Result<()> {
            Ok(())
        }
        async fn stop(&self) {}
        async fn send(&self, _target: &str, msg: OutboundMessage) -> Result<()> {
            self.sent.lock().push(msg.text);
            Ok(())
        }
        async fn wait_for_reply(
            &self,
            _target: &str,
            _from_user: &str,
            timeout: Duration,
        ) -> Option<String> {
            if self.delay > timeout {
                return None;
            }
            tokio::time::sleep(self.delay).await;
            self.reply.clone()
        }
    }

    fn gate(dir: &tempfile::TempDir, allowed: &[&str]) -> WriteGate {
        WriteGate::new(&WriteGateConfig {
            allowed_users: allowed.iter().map(|s| s.to_string()).collect(),
            timeout_secs: 1,
            log_file: dir.path().join("gate.jsonl"),
        })
    }

    #[test]
    fn approval_vocabulary() {
        for word in ["yes", "y", "confirm", "ok", "approve", "  Yes  ", "OK", "APPROVE"] {
            assert!(is_approval(word), "{word:?} should approve");
        }
        for word in ["no", "nope", "yess", "cancel", "", "maybe"] {
            assert!(!is_approval(word), "{word:?} should not approve");
        }
    }

    #[tokio::test]
    async fn approved_flow() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate(&dir, &["alice"]);
        let channel = ScriptedChannel::replying("  Yes  ");

        let outcome = gate
            .confirm(
                &channel,
                "chat1",
                "discord:alice",
                "alice",
                "write_text_file",
                &serde_json::json!({ "path": "a.txt" }),
            )
            .await;
        assert_eq!(outcome, GateOutcome::Approved);

        // Prompt went out and names the tool.
        assert!(channel.sent.lock()[0].contains("write_text_file"));
        // Outcome was logged.
        let log = std::fs::read_to_string(dir.path().join("gate.jsonl")).unwrap();
        assert!(log.contains("\"approved\""));
    }

    #[tokio::test]
    async fn non_approval_reply_denies() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate(&dir, &["alice"]);
        let channel = ScriptedChannel::replying("absolutely not");

        let outcome = gate
            .confirm(&channel, "c", "k", "alice", "exec", &serde_json::json!({}))
            .await;
        assert_eq!(
            outcome,
            GateOutcome::Denied {
                reply: "absolutely not".into()
            }
        );
    }

    #[tokio::test]
    async fn silence_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate(&dir, &["alice"]);
        let channel = ScriptedChannel::silent();

        let outcome = gate
            .confirm(&channel, "c", "k", "alice", "exec", &serde_json::json!({}))
            .await;
        assert_eq!(outcome, GateOutcome::TimedOut);
    }

    #[tokio::test]
    async fn user_outside_allowlist_is_rejected_without_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate(&dir, &["alice"]);
        let channel = ScriptedChannel::replying("yes");

        let outcome = gate
            .confirm(&channel, "c", "k", "mallory", "exec", &serde_json::json!({}))
            .await;
        assert_eq!(outcome, GateOutcome::NotInAllowlist);
        assert!(channel.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn overlapping_confirmation_on_same_session_is_busy() {
        let dir = tempfile::tempdir().unwrap();
        let gate = Arc::new(gate(&dir, &["alice"]));

        let mut slow = ScriptedChannel::replying("yes");
        slow.delay = Duration::from_millis(200);
        let slow = Arc::new(slow);

        let g = gate.clone();
        let ch = slow.clone();
        let first = tokio::spawn(async move {
            g.confirm(ch.as_ref(), "c", "session-1", "alice", "exec", &serde_json::json!({}))
                .await
        });

        // Give the first confirmation time to claim the slot.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let fast = ScriptedChannel::replying("yes");
        let second = gate
            .confirm(&fast, "c", "session-1", "alice", "exec", &serde_json::json!({}))
            .await;
        assert_eq!(second, GateOutcome::Busy);

        assert_eq!(first.await.unwrap(), GateOutcome::Approved);
        // Slot released after resolution.
        assert!(!gate.is_pending("session-1"));
    }

    #[tokio::test]
    async fn different_sessions_do_not_block_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate(&dir, &["alice"]);
        let channel = ScriptedChannel::replying("yes");

        let a = gate
            .confirm(&channel, "c", "session-a", "alice", "exec", &serde_json::json!({}))
            .await;
        let b = gate
            .confirm(&channel, "c", "session-b", "alice", "exec", &serde_json::json!({}))
            .await;
        assert_eq!(a, GateOutcome::Approved);
        assert_eq!(b, GateOutcome::Approved);
    }
}
