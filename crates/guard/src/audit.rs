//! Append-only structured audit log for tool invocations.
//!
//! Every executed tool produces exactly one audit entry with a two-step
//! lifecycle: [`AuditLogger::pre_log`] appends a `pending` row before the
//! tool runs, [`AuditLogger::finalize`] appends the terminal row with the
//! same id. Readers take the last row per id. Fail-closed: the executor
//! denies the call when `pre_log` errors.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use owlia_domain::error::{Error, Result};
use owlia_domain::tool::SecurityLevel;

/// Entries kept in memory for spend / denial-streak queries.
const RECENT_CAP: usize = 1024;

/// Audit schema version stamped on every row.
const AUDIT_VERSION: u32 = 1;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditResult {
    Pending,
    Success,
    Denied,
    Escalated,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub ts: DateTime<Utc>,
    pub version: u32,
    pub tool: String,
    pub tier: u8,
    pub effective_tier: u8,
    pub security_level: SecurityLevel,
    pub user: String,
    pub channel: String,
    pub params: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_usd: Option<f64>,
    pub result: AuditResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
}

impl AuditEntry {
    /// A fresh pending entry for a tool invocation attempt.
    #[allow(clippy::too_many_arguments)]
    pub fn pending(
        tool: &str,
        tier: u8,
        effective_tier: u8,
        security_level: SecurityLevel,
        user: &str,
        channel: &str,
        params: Value,
        amount_usd: Option<f64>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            ts: Utc::now(),
            version: AUDIT_VERSION,
            tool: tool.to_owned(),
            tier,
            effective_tier,
            security_level,
            user: user.to_owned(),
            channel: channel.to_owned(),
            params,
            amount_usd,
            result: AuditResult::Pending,
            reason: None,
            duration_ms: None,
            tx_hash: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Logger
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct AuditState {
    pending: HashMap<Uuid, AuditEntry>,
    /// Finalized entries, newest last.
    recent: VecDeque<AuditEntry>,
}

/// Append-only JSONL audit log with an in-memory tail for queries.
pub struct AuditLogger {
    path: PathBuf,
    state: Mutex<AuditState>,
}

impl AuditLogger {
    /// Open (or create) the audit log at `path`. The tail of the existing
    /// file seeds the in-memory window so daily-spend and denial-streak
    /// queries survive restarts.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(Error::Io)?;
        }

        let mut recent = VecDeque::new();
        if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(Error::Io)?;
            // Last row per id wins; pending rows without a terminal row are
            // abandoned (process died mid-call) and excluded from queries.
            let mut latest: HashMap<Uuid, AuditEntry> = HashMap::new();
            let mut order: Vec<Uuid> = Vec::new();
            for line in raw.lines().filter(|l| !l.trim().is_empty()) {
                match serde_json::from_str::<AuditEntry>(line) {
                    Ok(entry) => {
                        if !latest.contains_key(&entry.id) {
                            order.push(entry.id);
                        }
                        latest.insert(entry.id, entry);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping malformed audit line");
                    }
                }
            }
            for id in order {
                if let Some(entry) = latest.remove(&id) {
                    if entry.result != AuditResult::Pending {
                        recent.push_back(entry);
                    }
                }
            }
            while recent.len() > RECENT_CAP {
                recent.pop_front();
            }
        }

        tracing::info!(
            path = %path.display(),
            loaded = recent.len(),
            "audit log opened"
        );

        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(AuditState {
                pending: HashMap::new(),
                recent,
            }),
        })
    }

    fn append_row(&self, entry: &AuditEntry) -> Result<()> {
        let json = serde_json::to_string(entry)
            .map_err(|e| Error::Audit(format!("serializing audit entry: {e}")))?;
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::Audit(format!("opening audit log: {e}")))?;
        file.write_all(json.as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .map_err(|e| Error::Audit(format!("writing audit log: {e}")))?;
        Ok(())
    }

    /// Write the pending row. Returns the id used for [`Self::finalize`].
    pub fn pre_log(&self, entry: AuditEntry) -> Result<Uuid> {
        let id = entry.id;
        self.append_row(&entry)?;
        self.state.lock().pending.insert(id, entry);
        Ok(id)
    }

    /// Write the terminal row for a pre-logged entry.
    pub fn finalize(
        &self,
        id: Uuid,
        result: AuditResult,
        duration_ms: Option<u64>,
        tx_hash: Option<String>,
        reason: Option<String>,
    ) -> Result<AuditEntry> {
        let mut entry = self
            .state
            .lock()
            .pending
            .remove(&id)
            .ok_or_else(|| Error::Audit(format!("no pending audit entry {id}")))?;

        entry.result = result;
        entry.duration_ms = duration_ms;
        entry.tx_hash = tx_hash;
        entry.reason = reason;

        // A finalize-row write failure is logged but does not fail the
        // call: the tool already ran, and the in-memory tail stays correct.
        if let Err(e) = self.append_row(&entry) {
            tracing::error!(error = %e, audit_id = %id, "failed to write audit finalize row");
        }

        let mut state = self.state.lock();
        state.recent.push_back(entry.clone());
        while state.recent.len() > RECENT_CAP {
            state.recent.pop_front();
        }
        Ok(entry)
    }

    /// Record an entry that never reaches execution (policy denial,
    /// cooldown, allowlist miss): one terminal row, no pending phase.
    pub fn record(
        &self,
        mut entry: AuditEntry,
        result: AuditResult,
        reason: Option<String>,
    ) -> Result<AuditEntry> {
        entry.result = result;
        entry.reason = reason;
        self.append_row(&entry)?;

        let mut state = self.state.lock();
        state.recent.push_back(entry.clone());
        while state.recent.len() > RECENT_CAP {
            state.recent.pop_front();
        }
        Ok(entry)
    }

    /// True when a pre-logged entry has not been finalized yet.
    pub fn is_pending(&self, id: &Uuid) -> bool {
        self.state.lock().pending.contains_key(id)
    }

    /// USD spent by `user` in successful calls since UTC midnight.
    pub fn daily_spent_usd(&self, user: &str) -> f64 {
        let midnight = Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or_else(Utc::now);
        self.state
            .lock()
            .recent
            .iter()
            .filter(|e| e.user == user && e.result == AuditResult::Success && e.ts >= midnight)
            .filter_map(|e| e.amount_usd)
            .sum()
    }

    /// Length of the denial streak at the tail of `user`'s entries.
    pub fn consecutive_denials(&self, user: &str) -> u32 {
        let state = self.state.lock();
        let mut count = 0;
        for entry in state.recent.iter().rev().filter(|e| e.user == user) {
            if entry.result == AuditResult::Denied {
                count += 1;
            } else {
                break;
            }
        }
        count
    }

    /// The most recent finalized entries (newest last), for introspection.
    pub fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        let state = self.state.lock();
        state
            .recent
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect()
    }
}
