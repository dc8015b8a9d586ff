//! Channel manager — registry of live channels and the inbound fan-in
//! queue the message router consumes.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use owlia_domain::error::{Error, Result};

use crate::traits::{Channel, InboundMessage, OutboundMessage};

/// Holds all registered channels and fans their inbound messages into a
/// single queue.
pub struct ChannelManager {
    channels: RwLock<HashMap<String, Arc<dyn Channel>>>,
    inbound_tx: mpsc::Sender<InboundMessage>,
}

impl ChannelManager {
    /// Create a manager and the receiver half of the inbound queue.
    pub fn new(queue_depth: usize) -> (Self, mpsc::Receiver<InboundMessage>) {
        let (tx, rx) = mpsc::channel(queue_depth);
        (
            Self {
                channels: RwLock::new(HashMap::new()),
                inbound_tx: tx,
            },
            rx,
        )
    }

    /// Register a channel. Re-registering an id replaces the previous
    /// channel and is logged.
    pub fn register(&self, channel: Arc<dyn Channel>) {
        let id = channel.id().to_owned();
        let mut channels = self.channels.write();
        if channels.insert(id.clone(), channel).is_some() {
            tracing::warn!(channel = %id, "channel re-registered, previous instance replaced");
        } else {
            tracing::info!(channel = %id, "channel registered");
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Channel>> {
        self.channels.read().get(id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.channels.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// A sender handle channel implementations use to push inbound traffic.
    pub fn inbound_sender(&self) -> mpsc::Sender<InboundMessage> {
        self.inbound_tx.clone()
    }

    /// Start every registered channel. Failures are logged and skipped so
    /// one broken transport does not take the platform down.
    pub async fn start_all(&self) {
        let channels: Vec<_> = self.channels.read().values().cloned().collect();
        for channel in channels {
            if let Err(e) = channel.start().await {
                tracing::warn!(channel = %channel.id(), error = %e, "channel failed to start");
            }
        }
    }

    pub async fn stop_all(&self) {
        let channels: Vec<_> = self.channels.read().values().cloned().collect();
        for channel in channels {
            channel.stop().await;
        }
    }

    /// Send a message through a channel by id.
    pub async fn send(&self, channel_id: &str, target: &str, msg: OutboundMessage) -> Result<()> {
        let channel = self
            .get(channel_id)
            .ok_or_else(|| Error::Other(format!("unknown channel: {channel_id}")))?;
        channel.send(target, msg).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    use crate::traits::ChannelCapabilities;

    struct RecordingChannel {
        id: String,
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Channel for RecordingChannel {
        fn id(&self) -> &str {
            &self.id
        }
        fn capabilities(&self) -> ChannelCapabilities {
            ChannelCapabilities::default()
        }
        async fn start(&self) -> Result<()> {
            Ok(())
        }
        async fn stop(&self) {}
        async fn send(&self, target: &str, msg: OutboundMessage) -> Result<()> {
            self.sent.lock().push((target.to_owned(), msg.text));
            Ok(())
        }
        async fn wait_for_reply(
            &self,
            _target: &str,
            _from_user: &str,
            _timeout: std::time::Duration,
        ) -> Option<String> {
            None
        }
    }

    #[tokio::test]
    async fn register_and_send() {
        let (manager, _rx) = ChannelManager::new(8);
        let ch = Arc::new(RecordingChannel {
            id: "test".into(),
            sent: Mutex::new(Vec::new()),
        });
        manager.register(ch.clone());

        manager
            .send("test", "chat1", OutboundMessage::text("hello"))
            .await
            .unwrap();
        assert_eq!(ch.sent.lock()[0], ("chat1".into(), "hello".into()));
    }

    #[tokio::test]
    async fn send_to_unknown_channel_errors() {
        let (manager, _rx) = ChannelManager::new(8);
        let err = manager
            .send("ghost", "t", OutboundMessage::text("x"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown channel"));
    }

    #[tokio::test]
    async fn inbound_fan_in() {
        let (manager, mut rx) = ChannelManager::new(8);
        let tx = manager.inbound_sender();
        tx.send(InboundMessage {
            channel: "test".into(),
            sender_id: "alice".into(),
            target: "chat1".into(),
            text: "hi".into(),
            is_direct: true,
            timestamp: chrono::Utc::now(),
        })
        .await
        .unwrap();

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.sender_id, "alice");
    }
}
