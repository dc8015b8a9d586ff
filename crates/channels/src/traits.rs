use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use owlia_domain::error::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A message received from a channel peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Which channel this message came from (e.g. `"discord"`, `"http"`).
    pub channel: String,
    /// Stable id of the sending user.
    pub sender_id: String,
    /// Where a reply should go (chat id, device id, …).
    pub target: String,
    pub text: String,
    /// Direct message vs. group traffic (drives session keying and
    /// activation filtering).
    pub is_direct: bool,
    pub timestamp: DateTime<Utc>,
}

/// A message to deliver to a channel peer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<String>,
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// What a channel transport can express.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChannelCapabilities {
    pub reactions: bool,
    pub threads: bool,
    pub buttons: bool,
    pub markdown: bool,
    pub max_message_length: usize,
}

impl Default for ChannelCapabilities {
    fn default() -> Self {
        Self {
            reactions: false,
            threads: false,
            buttons: false,
            markdown: true,
            max_message_length: 4096,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Channel trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Transport abstraction for sending and receiving messages.
///
/// Implementations must be `Send + Sync` so they can be stored in a shared
/// [`crate::ChannelManager`] behind an `Arc`.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Unique channel id (`"discord"`, `"telegram"`, `"http"`).
    fn id(&self) -> &str;

    fn capabilities(&self) -> ChannelCapabilities;

    /// Begin receiving; inbound messages flow into the manager's queue.
    async fn start(&self) -> Result<()>;

    async fn stop(&self);

    /// Deliver a message to `target` on this channel.
    async fn send(&self, target: &str, msg: OutboundMessage) -> Result<()>;

    /// Wait for the next textual reply from `from_user` in `target`.
    ///
    /// Returns `None` on timeout or when the transport cannot wait
    /// (the HTTP device channel never resolves replies).
    async fn wait_for_reply(
        &self,
        target: &str,
        from_user: &str,
        timeout: std::time::Duration,
    ) -> Option<String>;
}
