//! Per-tool per-user cooldown tracking.
//!
//! Each `(tool, user)` slot counts calls within a sliding window.
//! `check` is read-only; `record` ticks the counter after a successful
//! execution. Check + record are intentionally not atomic — a race may
//! admit one extra call.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use owlia_domain::config::CooldownConfig;

#[derive(Debug, Clone, Copy)]
struct CooldownSlot {
    count: u32,
    window_start: Instant,
}

/// Result of a cooldown check.
#[derive(Debug, Clone)]
pub struct CooldownCheck {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl CooldownCheck {
    fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }
}

/// In-memory cooldown state shared by all sessions.
#[derive(Default)]
pub struct CooldownTracker {
    slots: Mutex<HashMap<(String, String), CooldownSlot>>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only check: does `user` have budget left for `tool`?
    pub fn check(&self, tool: &str, user: &str, cfg: &CooldownConfig) -> CooldownCheck {
        self.check_at(tool, user, cfg, Instant::now())
    }

    fn check_at(&self, tool: &str, user: &str, cfg: &CooldownConfig, now: Instant) -> CooldownCheck {
        let slots = self.slots.lock();
        let Some(slot) = slots.get(&(tool.to_owned(), user.to_owned())) else {
            return CooldownCheck::allowed();
        };

        let window = Duration::from_secs(cfg.window_secs);
        let elapsed = now.saturating_duration_since(slot.window_start);
        if elapsed >= window {
            return CooldownCheck::allowed();
        }
        if slot.count >= cfg.max_calls {
            let retry_in = (window - elapsed).as_secs().max(1);
            return CooldownCheck {
                allowed: false,
                reason: Some(format!(
                    "cooldown: {tool} limited to {} calls per {}s, retry in {}s",
                    cfg.max_calls, cfg.window_secs, retry_in
                )),
            };
        }
        CooldownCheck::allowed()
    }

    /// Record a successful call against the slot.
    pub fn record(&self, tool: &str, user: &str, cfg: &CooldownConfig) {
        self.record_at(tool, user, cfg, Instant::now());
    }

    fn record_at(&self, tool: &str, user: &str, cfg: &CooldownConfig, now: Instant) {
        let mut slots = self.slots.lock();
        let slot = slots
            .entry((tool.to_owned(), user.to_owned()))
            .or_insert(CooldownSlot {
                count: 0,
                window_start: now,
            });

        let window = Duration::from_secs(cfg.window_secs);
        if now.saturating_duration_since(slot.window_start) >= window {
            slot.count = 0;
            slot.window_start = now;
        }
        slot.count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(max_calls: u32, window_secs: u64) -> CooldownConfig {
        CooldownConfig {
            max_calls,
            window_secs,
        }
    }

    #[test]
    fn fresh_slot_is_allowed() {
        let tracker = CooldownTracker::new();
        assert!(tracker.check("exec", "alice", &cfg(1, 60)).allowed);
    }

    #[test]
    fn limit_reached_denies_with_reason() {
        let tracker = CooldownTracker::new();
        let c = cfg(2, 60);
        tracker.record("exec", "alice", &c);
        assert!(tracker.check("exec", "alice", &c).allowed);
        tracker.record("exec", "alice", &c);

        let check = tracker.check("exec", "alice", &c);
        assert!(!check.allowed);
        assert!(check.reason.unwrap().contains("cooldown"));
    }

    #[test]
    fn check_does_not_mutate() {
        let tracker = CooldownTracker::new();
        let c = cfg(1, 60);
        tracker.record("exec", "alice", &c);
        // Repeated denials must not extend or reset the window.
        for _ in 0..5 {
            assert!(!tracker.check("exec", "alice", &c).allowed);
        }
        let slots = tracker.slots.lock();
        assert_eq!(slots[&("exec".to_owned(), "alice".to_owned())].count, 1);
    }

    #[test]
    fn slots_are_independent_per_tool_and_user() {
        let tracker = CooldownTracker::new();
        let c = cfg(1, 60);
        tracker.record("exec", "alice", &c);
        assert!(!tracker.check("exec", "alice", &c).allowed);
        assert!(tracker.check("exec", "bob", &c).allowed);
        assert!(tracker.check("read_text_file", "alice", &c).allowed);
    }

    #[test]
    fn expired_window_allows_and_resets_on_record() {
        let tracker = CooldownTracker::new();
        let c = cfg(1, 60);
        let start = Instant::now();
        tracker.record_at("exec", "alice", &c, start);
        assert!(!tracker.check_at("exec", "alice", &c, start).allowed);

        let later = start + Duration::from_secs(61);
        assert!(tracker.check_at("exec", "alice", &c, later).allowed);

        tracker.record_at("exec", "alice", &c, later);
        let slots = tracker.slots.lock();
        assert_eq!(slots[&("exec".to_owned(), "alice".to_owned())].count, 1);
    }
}
