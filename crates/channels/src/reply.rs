//! Reply routing for interactive confirmations.
//!
//! `wait_for_reply` needs to intercept the *next* message from a specific
//! user in a specific chat before normal inbound handling sees it. Each
//! waiter registers a oneshot slot keyed `(target, user)`; a channel's
//! inbound path offers every message to the router first and only forwards
//! it when no waiter consumed it.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;

/// Pending reply slots keyed by `(target, user)`.
///
/// A second registration for the same key replaces the first (the replaced
/// waiter resolves to `None`, as its sender is dropped).
#[derive(Default)]
pub struct ReplyRouter {
    pending: Mutex<HashMap<(String, String), oneshot::Sender<String>>>,
}

impl ReplyRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for the next message from `user` in `target`.
    pub fn register(&self, target: &str, user: &str) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .insert((target.to_owned(), user.to_owned()), tx);
        rx
    }

    /// Drop a waiter without resolving it (used after a timeout).
    pub fn unregister(&self, target: &str, user: &str) {
        self.pending
            .lock()
            .remove(&(target.to_owned(), user.to_owned()));
    }

    /// Offer an inbound message to a waiter.
    ///
    /// Returns `true` when a waiter consumed it (the message must not be
    /// forwarded to normal handling).
    pub fn offer(&self, target: &str, user: &str, text: &str) -> bool {
        let waiter = self
            .pending
            .lock()
            .remove(&(target.to_owned(), user.to_owned()));
        match waiter {
            Some(tx) => tx.send(text.to_owned()).is_ok(),
            None => false,
        }
    }

    /// Convenience: register, then wait up to `timeout` for the reply.
    pub async fn wait(
        &self,
        target: &str,
        user: &str,
        timeout: std::time::Duration,
    ) -> Option<String> {
        let rx = self.register(target, user);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(text)) => Some(text),
            // Timeout, or the slot was replaced by a newer waiter.
            _ => {
                self.unregister(target, user);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn offer_resolves_waiter() {
        let router = ReplyRouter::new();
        let rx = router.register("chat1", "alice");
        assert!(router.offer("chat1", "alice", "yes"));
        assert_eq!(rx.await.unwrap(), "yes");
    }

    #[tokio::test]
    async fn offer_without_waiter_returns_false() {
        let router = ReplyRouter::new();
        assert!(!router.offer("chat1", "alice", "hello"));
    }

    #[tokio::test]
    async fn offer_is_keyed_by_target_and_user() {
        let router = ReplyRouter::new();
        let _rx = router.register("chat1", "alice");
        // Same chat, different user: not consumed.
        assert!(!router.offer("chat1", "bob", "yes"));
        // Same user, different chat: not consumed.
        assert!(!router.offer("chat2", "alice", "yes"));
    }

    #[tokio::test]
    async fn wait_times_out() {
        let router = ReplyRouter::new();
        let reply = router.wait("chat1", "alice", Duration::from_millis(20)).await;
        assert!(reply.is_none());
        // The slot was cleaned up.
        assert!(!router.offer("chat1", "alice", "late"));
    }

    #[tokio::test]
    async fn second_registration_replaces_first() {
        let router = ReplyRouter::new();
        let rx1 = router.register("chat1", "alice");
        let rx2 = router.register("chat1", "alice");
        assert!(router.offer("chat1", "alice", "yes"));
        assert!(rx1.await.is_err());
        assert_eq!(rx2.await.unwrap(), "yes");
    }
}
