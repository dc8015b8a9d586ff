//! Anomaly detection over finalized audit entries.
//!
//! Tracks per-user denial streaks and call bursts. Purely advisory: it
//! logs warnings; escalation itself happens in the policy engine via
//! [`crate::AuditLogger::consecutive_denials`].

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::audit::{AuditEntry, AuditResult};

/// Denial streak length that triggers a warning.
const STREAK_WARN_THRESHOLD: u32 = 3;

/// Calls within [`BURST_WINDOW`] that trigger a warning.
const BURST_WARN_THRESHOLD: usize = 20;
const BURST_WINDOW: Duration = Duration::from_secs(60);

#[derive(Default)]
struct UserStats {
    denial_streak: u32,
    call_times: VecDeque<Instant>,
}

/// Fed every finalized audit entry by the executor.
#[derive(Default)]
pub struct AnomalyDetector {
    users: Mutex<HashMap<String, UserStats>>,
}

impl AnomalyDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe a finalized audit entry.
    pub fn observe(&self, entry: &AuditEntry) {
        let mut users = self.users.lock();
        let stats = users.entry(entry.user.clone()).or_default();

        match entry.result {
            AuditResult::Denied | AuditResult::Error => {
                stats.denial_streak += 1;
                if stats.denial_streak == STREAK_WARN_THRESHOLD {
                    tracing::warn!(
                        user = %entry.user,
                        streak = stats.denial_streak,
                        tool = %entry.tool,
                        "anomaly: repeated denials"
                    );
                }
            }
            AuditResult::Success => {
                stats.denial_streak = 0;
            }
            AuditResult::Escalated | AuditResult::Pending => {}
        }

        let now = Instant::now();
        stats.call_times.push_back(now);
        while let Some(front) = stats.call_times.front() {
            if now.duration_since(*front) > BURST_WINDOW {
                stats.call_times.pop_front();
            } else {
                break;
            }
        }
        if stats.call_times.len() == BURST_WARN_THRESHOLD {
            tracing::warn!(
                user = %entry.user,
                calls = stats.call_times.len(),
                window_secs = BURST_WINDOW.as_secs(),
                "anomaly: call burst"
            );
        }
    }

    /// Current denial streak for a user (0 when unseen).
    pub fn denial_streak(&self, user: &str) -> u32 {
        self.users
            .lock()
            .get(user)
            .map(|s| s.denial_streak)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use owlia_domain::tool::SecurityLevel;
    use serde_json::json;

    fn entry(user: &str, result: AuditResult) -> AuditEntry {
        let mut e = AuditEntry::pending(
            "exec",
            3,
            3,
            SecurityLevel::Write,
            user,
            "discord",
            json!({}),
            None,
        );
        e.result = result;
        e
    }

    #[test]
    fn streak_counts_denials_and_errors() {
        let detector = AnomalyDetector::new();
        detector.observe(&entry("alice", AuditResult::Denied));
        detector.observe(&entry("alice", AuditResult::Error));
        assert_eq!(detector.denial_streak("alice"), 2);
    }

    #[test]
    fn success_resets_streak() {
        let detector = AnomalyDetector::new();
        detector.observe(&entry("alice", AuditResult::Denied));
        detector.observe(&entry("alice", AuditResult::Success));
        assert_eq!(detector.denial_streak("alice"), 0);
    }

    #[test]
    fn escalated_leaves_streak_untouched() {
        let detector = AnomalyDetector::new();
        detector.observe(&entry("alice", AuditResult::Denied));
        detector.observe(&entry("alice", AuditResult::Escalated));
        assert_eq!(detector.denial_streak("alice"), 1);
    }

    #[test]
    fn streaks_are_per_user() {
        let detector = AnomalyDetector::new();
        detector.observe(&entry("alice", AuditResult::Denied));
        assert_eq!(detector.denial_streak("bob"), 0);
    }
}
