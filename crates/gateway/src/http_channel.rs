//! The HTTP device channel — the gateway acting as a channel peer.
//!
//! `send(target, msg)` stores an event addressed to device `target`;
//! devices pick it up via `/events/poll`. `start`/`stop` are no-ops and
//! `wait_for_reply` never resolves (interactive confirmations cannot run
//! over a long-poll transport).

use std::sync::Arc;

use async_trait::async_trait;

use owlia_channels::{Channel, ChannelCapabilities, OutboundMessage};
use owlia_domain::error::Result;

use crate::store::GatewayStore;

pub const CHANNEL_ID: &str = "http";

pub struct HttpChannel {
    store: Arc<GatewayStore>,
    event_ttl: chrono::Duration,
}

impl HttpChannel {
    pub fn new(store: Arc<GatewayStore>, event_ttl_secs: u64) -> Self {
        Self {
            store,
            event_ttl: chrono::Duration::seconds(event_ttl_secs as i64),
        }
    }
}

#[async_trait]
impl Channel for HttpChannel {
    fn id(&self) -> &str {
        CHANNEL_ID
    }

    fn capabilities(&self) -> ChannelCapabilities {
        ChannelCapabilities {
            reactions: false,
            threads: false,
            buttons: false,
            markdown: true,
            max_message_length: 16 * 1024,
        }
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) {}

    async fn send(&self, target: &str, msg: OutboundMessage) -> Result<()> {
        let metadata = msg
            .reply_to_id
            .map(|id| serde_json::json!({ "reply_to_id": id }));
        self.store.insert_event(
            "message",
            "ok",
            "agent",
            &msg.text,
            metadata.as_ref(),
            self.event_ttl,
            target,
        )?;
        Ok(())
    }

    async fn wait_for_reply(
        &self,
        _target: &str,
        _from_user: &str,
        _timeout: std::time::Duration,
    ) -> Option<String> {
        // Not implemented for the long-poll transport.
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_stores_an_event_for_the_target_device() {
        let store = Arc::new(GatewayStore::open_in_memory().unwrap());
        let channel = HttpChannel::new(store.clone(), 3600);

        channel
            .send("dev-1", OutboundMessage::text("hello device"))
            .await
            .unwrap();

        let (_, events, _) = store.poll_events("dev-1", None, 10).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, "hello device");
        assert_eq!(events[0].source, "agent");
    }

    #[tokio::test]
    async fn wait_for_reply_is_unimplemented() {
        let store = Arc::new(GatewayStore::open_in_memory().unwrap());
        let channel = HttpChannel::new(store, 3600);
        let reply = channel
            .wait_for_reply("dev-1", "dev-1", std::time::Duration::from_millis(10))
            .await;
        assert!(reply.is_none());
    }
}
