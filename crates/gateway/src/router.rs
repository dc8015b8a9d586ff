//! The message router — the mediator between channels and the agent
//! core.
//!
//! Owns the channel fan-in queue, session resolution, and the outbound
//! reply; channels, executor, and loop never hold references to each
//! other. One tokio task per inbound message keeps sessions independent.

use std::time::Duration;

use tokio::sync::mpsc;

use owlia_agent::{LoopConfig, LoopContext};
use owlia_channels::{InboundMessage, OutboundMessage};
use owlia_domain::config::{ChannelsConfig, GroupActivation};
use owlia_domain::tool::Message;
use owlia_sessions::SessionKey;

use crate::state::AppState;

pub struct MessageRouter {
    state: AppState,
    inbound: mpsc::Receiver<InboundMessage>,
}

impl MessageRouter {
    pub fn new(state: AppState, inbound: mpsc::Receiver<InboundMessage>) -> Self {
        Self { state, inbound }
    }

    /// Drain the inbound queue until every channel sender is dropped.
    pub async fn run(mut self) {
        while let Some(msg) = self.inbound.recv().await {
            let state = self.state.clone();
            tokio::spawn(async move {
                handle_message(state, msg).await;
            });
        }
        tracing::info!("message router stopped");
    }
}

/// Group messages only activate the agent per the configured rule;
/// returns the effective text (mention stripped) or `None` to ignore.
fn activation_filter(config: &ChannelsConfig, msg: &InboundMessage) -> Option<String> {
    if msg.is_direct {
        return Some(msg.text.clone());
    }
    match config.group_activation {
        GroupActivation::All => Some(msg.text.clone()),
        GroupActivation::Mention => msg
            .text
            .trim_start()
            .strip_prefix(&config.mention)
            .map(|rest| rest.trim().to_owned()),
    }
}

pub(crate) async fn handle_message(state: AppState, msg: InboundMessage) {
    let Some(text) = activation_filter(&state.config.channels, &msg) else {
        return;
    };
    if text.trim().is_empty() {
        return;
    }

    let key = if msg.is_direct {
        SessionKey::direct(&msg.channel, &msg.sender_id)
    } else {
        SessionKey::group(&msg.channel, &msg.target)
    };

    // `/new` rotates the session id; the old transcript stays on disk.
    if text.trim() == "/new" {
        state.sessions.resolve_or_create(&key);
        state.sessions.rotate(&key, "user-command");
        if let Err(e) = state.sessions.flush() {
            tracing::warn!(error = %e, "failed to flush sessions");
        }
        send_reply(&state, &msg, "Started a new session.").await;
        return;
    }

    let (entry, is_new) = state.sessions.resolve_or_create(&key);
    if is_new {
        if let Err(e) = state.sessions.flush() {
            tracing::warn!(error = %e, "failed to flush sessions");
        }
    }
    state.sessions.touch(&key);

    // Conversation: system prompt, persisted history, then this message.
    let history = state
        .transcripts
        .history(&entry.session_id, state.config.sessions.history_limit)
        .unwrap_or_default();
    let mut initial = vec![Message::system(&state.config.agent.system_prompt)];
    initial.extend(history.into_iter().map(Message::from));

    let user_msg = Message::user(text);
    if let Err(e) = state.transcripts.append_message(&entry.session_id, &user_msg) {
        tracing::error!(error = %e, session_id = %entry.session_id, "failed to persist user message");
    }
    initial.push(user_msg);

    let ctx = LoopContext {
        session_key: key.as_str().to_owned(),
        session_id: entry.session_id.clone(),
        user_id: msg.sender_id.clone(),
        channel_id: msg.channel.clone(),
        target: msg.target.clone(),
        workspace: state.config.workspace.path.clone(),
    };
    let loop_config = LoopConfig {
        max_iterations: state.config.agent.max_iterations,
        timeout: Duration::from_secs(state.config.agent.timeout_secs),
    };

    let cancel = state.cancel_map.register(key.as_str());
    let channel = state.channels.get(&msg.channel);
    let result = state
        .agent
        .run(&ctx, initial, &loop_config, cancel, channel)
        .await;
    state.cancel_map.remove(key.as_str());

    if let Some(error) = &result.error {
        tracing::warn!(session_key = %key, error = %error, "agent loop ended with error");
    }
    send_reply(&state, &msg, &result.content).await;
}

async fn send_reply(state: &AppState, msg: &InboundMessage, text: &str) {
    if let Err(e) = state
        .channels
        .send(&msg.channel, &msg.target, OutboundMessage::text(text))
        .await
    {
        tracing::error!(
            channel = %msg.channel,
            target = %msg.target,
            error = %e,
            "failed to deliver reply"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(activation: GroupActivation) -> ChannelsConfig {
        ChannelsConfig {
            group_activation: activation,
            mention: "@owlia".into(),
        }
    }

    fn inbound(text: &str, is_direct: bool) -> InboundMessage {
        InboundMessage {
            channel: "discord".into(),
            sender_id: "alice".into(),
            target: "chat-1".into(),
            text: text.into(),
            is_direct,
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn direct_messages_always_activate() {
        let cfg = config(GroupActivation::Mention);
        assert_eq!(
            activation_filter(&cfg, &inbound("hello", true)).as_deref(),
            Some("hello")
        );
    }

    #[test]
    fn group_messages_require_mention() {
        let cfg = config(GroupActivation::Mention);
        assert!(activation_filter(&cfg, &inbound("hello", false)).is_none());
        assert_eq!(
            activation_filter(&cfg, &inbound("@owlia do the thing", false)).as_deref(),
            Some("do the thing")
        );
    }

    #[test]
    fn group_activation_all_passes_everything() {
        let cfg = config(GroupActivation::All);
        assert_eq!(
            activation_filter(&cfg, &inbound("no mention", false)).as_deref(),
            Some("no mention")
        );
    }
}
