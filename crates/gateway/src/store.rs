//! Persistent gateway state on SQLite: paired devices, pending pairings,
//! the event queue, idempotency records, rate-limit buckets, HTTP audit
//! rows, and gateway-issued API keys.
//!
//! A single [`rusqlite::Connection`] behind a mutex keeps SQLite's
//! single-writer discipline while making the store `Send + Sync`. Event
//! ids come from `AUTOINCREMENT` and form the total order devices poll
//! against.

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use owlia_domain::error::{Error, Result};
use owlia_domain::tool::SecurityLevel;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Schema
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS devices (
    device_id TEXT PRIMARY KEY,
    token_hash TEXT NOT NULL,
    scope_json TEXT NOT NULL,
    paired_at TEXT NOT NULL,
    last_seen_at TEXT,
    revoked_at TEXT
);

CREATE TABLE IF NOT EXISTS pairing_pending (
    device_id TEXT PRIMARY KEY,
    requested_at TEXT NOT NULL,
    ip TEXT,
    user_agent TEXT
);

CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    type TEXT NOT NULL,
    time TEXT NOT NULL,
    status TEXT NOT NULL,
    source TEXT NOT NULL,
    message TEXT NOT NULL,
    metadata_json TEXT,
    expires_at TEXT NOT NULL,
    acked_at TEXT,
    target_device_id TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_events_target ON events (target_device_id, id);

CREATE TABLE IF NOT EXISTS idempotency (
    key TEXT PRIMARY KEY,
    request_hash TEXT NOT NULL,
    response_json TEXT NOT NULL,
    expires_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS audit_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    time TEXT NOT NULL,
    actor_id TEXT,
    device_id TEXT,
    route TEXT NOT NULL,
    ip TEXT,
    request_id TEXT,
    trace_id TEXT,
    action TEXT NOT NULL,
    level TEXT NOT NULL,
    result TEXT NOT NULL,
    metadata_json TEXT
);

CREATE TABLE IF NOT EXISTS rate_limits (
    bucket TEXT PRIMARY KEY,
    count INTEGER NOT NULL,
    reset_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS api_keys (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    scope_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    expires_at TEXT,
    revoked_at TEXT,
    last_used_at TEXT
);
"#;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rows
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Capability set of a paired device.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceScope {
    /// Highest tool security level the device may invoke.
    #[serde(default = "d_tools_scope")]
    pub tools: SecurityLevel,
    #[serde(default)]
    pub system: bool,
    #[serde(default)]
    pub mcp: bool,
}

fn d_tools_scope() -> SecurityLevel {
    SecurityLevel::Read
}

impl Default for DeviceScope {
    fn default() -> Self {
        Self {
            tools: SecurityLevel::Read,
            system: false,
            mcp: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Device {
    pub device_id: String,
    pub token_hash: String,
    pub scope: DeviceScope,
    pub paired_at: DateTime<Utc>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingPairing {
    pub device_id: String,
    pub requested_at: DateTime<Utc>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub id: i64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub time: DateTime<Utc>,
    pub status: String,
    pub source: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acked_at: Option<DateTime<Utc>>,
    pub target_device_id: String,
}

/// Outcome of authenticating a device token.
#[derive(Debug)]
pub enum DeviceAuth {
    Ok(Device),
    UnknownDevice,
    Revoked,
    BadToken,
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Limited { retry_after_secs: i64 },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct GatewayStore {
    conn: Mutex<Connection>,
}

/// SHA-256 hex digest of a token.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Mint a fresh bearer token (64 hex chars).
fn mint_token() -> String {
    format!(
        "{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    )
}

fn sql_err(e: rusqlite::Error) -> Error {
    Error::Other(format!("sqlite: {e}"))
}

fn parse_ts(raw: String) -> DateTime<Utc> {
    raw.parse().unwrap_or_else(|_| Utc::now())
}

fn parse_opt_ts(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| s.parse().ok())
}

impl GatewayStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(Error::Io)?;
        }
        let conn = Connection::open(path).map_err(sql_err)?;
        conn.execute_batch(SCHEMA_SQL).map_err(sql_err)?;
        tracing::info!(path = %path.display(), "gateway store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(sql_err)?;
        conn.execute_batch(SCHEMA_SQL).map_err(sql_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ── Pairing ──────────────────────────────────────────────────────

    /// Record (or refresh) a pending pairing request.
    pub fn create_pairing(
        &self,
        device_id: &str,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<()> {
        self.conn
            .lock()
            .execute(
                "INSERT OR REPLACE INTO pairing_pending (device_id, requested_at, ip, user_agent)
                 VALUES (?1, ?2, ?3, ?4)",
                params![device_id, Utc::now().to_rfc3339(), ip, user_agent],
            )
            .map_err(sql_err)?;
        Ok(())
    }

    pub fn list_pending(&self) -> Result<Vec<PendingPairing>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT device_id, requested_at, ip, user_agent
                 FROM pairing_pending ORDER BY requested_at",
            )
            .map_err(sql_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(PendingPairing {
                    device_id: row.get(0)?,
                    requested_at: parse_ts(row.get(1)?),
                    ip: row.get(2)?,
                    user_agent: row.get(3)?,
                })
            })
            .map_err(sql_err)?;
        rows.collect::<std::result::Result<_, _>>().map_err(sql_err)
    }

    /// Approve a device: mint a token, store its hash and scope, and
    /// remove the pending row. Idempotent: approving an already-paired
    /// device re-issues a token (last write wins). Returns the plaintext
    /// token (only ever returned here).
    pub fn approve_device(&self, device_id: &str, scope: DeviceScope) -> Result<String> {
        let token = mint_token();
        let scope_json = serde_json::to_string(&scope).map_err(Error::Json)?;
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction().map_err(sql_err)?;
        tx.execute(
            "INSERT OR REPLACE INTO devices
                 (device_id, token_hash, scope_json, paired_at, last_seen_at, revoked_at)
             VALUES (?1, ?2, ?3, ?4, NULL, NULL)",
            params![device_id, hash_token(&token), scope_json, Utc::now().to_rfc3339()],
        )
        .map_err(sql_err)?;
        tx.execute(
            "DELETE FROM pairing_pending WHERE device_id = ?1",
            params![device_id],
        )
        .map_err(sql_err)?;
        tx.commit().map_err(sql_err)?;

        owlia_domain::trace::TraceEvent::DevicePaired {
            device_id: device_id.to_owned(),
        }
        .emit();
        Ok(token)
    }

    /// Mark a device revoked. Returns `false` when unknown.
    pub fn revoke_device(&self, device_id: &str) -> Result<bool> {
        let changed = self
            .conn
            .lock()
            .execute(
                "UPDATE devices SET revoked_at = ?2 WHERE device_id = ?1 AND revoked_at IS NULL",
                params![device_id, Utc::now().to_rfc3339()],
            )
            .map_err(sql_err)?;
        if changed > 0 {
            owlia_domain::trace::TraceEvent::DeviceRevoked {
                device_id: device_id.to_owned(),
            }
            .emit();
        }
        Ok(changed > 0)
    }

    /// Update the scope of a paired (non-revoked) device.
    pub fn update_scope(&self, device_id: &str, scope: DeviceScope) -> Result<bool> {
        let scope_json = serde_json::to_string(&scope).map_err(Error::Json)?;
        let changed = self
            .conn
            .lock()
            .execute(
                "UPDATE devices SET scope_json = ?2 WHERE device_id = ?1 AND revoked_at IS NULL",
                params![device_id, scope_json],
            )
            .map_err(sql_err)?;
        Ok(changed > 0)
    }

    /// Rotate the token of a paired device, preserving scope and
    /// `paired_at`. Returns the new plaintext token.
    pub fn rotate_token(&self, device_id: &str) -> Result<Option<String>> {
        let token = mint_token();
        let changed = self
            .conn
            .lock()
            .execute(
                "UPDATE devices SET token_hash = ?2 WHERE device_id = ?1 AND revoked_at IS NULL",
                params![device_id, hash_token(&token)],
            )
            .map_err(sql_err)?;
        Ok((changed > 0).then_some(token))
    }

    pub fn get_device(&self, device_id: &str) -> Result<Option<Device>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT device_id, token_hash, scope_json, paired_at, last_seen_at, revoked_at
             FROM devices WHERE device_id = ?1",
            params![device_id],
            |row| {
                let scope_json: String = row.get(2)?;
                Ok(Device {
                    device_id: row.get(0)?,
                    token_hash: row.get(1)?,
                    scope: serde_json::from_str(&scope_json).unwrap_or_default(),
                    paired_at: parse_ts(row.get(3)?),
                    last_seen_at: parse_opt_ts(row.get(4)?),
                    revoked_at: parse_opt_ts(row.get(5)?),
                })
            },
        )
        .optional()
        .map_err(sql_err)
    }

    /// Authenticate a device token (constant-time hash comparison).
    pub fn authenticate(&self, device_id: &str, token: &str) -> Result<DeviceAuth> {
        let Some(device) = self.get_device(device_id)? else {
            return Ok(DeviceAuth::UnknownDevice);
        };
        if device.revoked_at.is_some() {
            return Ok(DeviceAuth::Revoked);
        }
        let provided = hash_token(token);
        if bool::from(provided.as_bytes().ct_eq(device.token_hash.as_bytes())) {
            Ok(DeviceAuth::Ok(device))
        } else {
            Ok(DeviceAuth::BadToken)
        }
    }

    pub fn touch_last_seen(&self, device_id: &str) -> Result<()> {
        self.conn
            .lock()
            .execute(
                "UPDATE devices SET last_seen_at = ?2 WHERE device_id = ?1",
                params![device_id, Utc::now().to_rfc3339()],
            )
            .map_err(sql_err)?;
        Ok(())
    }

    // ── Events ───────────────────────────────────────────────────────

    /// Insert an event addressed to a device; returns its id.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_event(
        &self,
        event_type: &str,
        status: &str,
        source: &str,
        message: &str,
        metadata: Option<&serde_json::Value>,
        ttl: chrono::Duration,
        target_device_id: &str,
    ) -> Result<i64> {
        let now = Utc::now();
        let metadata_json = metadata
            .map(serde_json::to_string)
            .transpose()
            .map_err(Error::Json)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO events
                 (type, time, status, source, message, metadata_json, expires_at, acked_at, target_device_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, ?8)",
            params![
                event_type,
                now.to_rfc3339(),
                status,
                source,
                message,
                metadata_json,
                (now + ttl).to_rfc3339(),
                target_device_id
            ],
        )
        .map_err(sql_err)?;
        let id = conn.last_insert_rowid();

        owlia_domain::trace::TraceEvent::EventStored {
            event_id: id,
            target_device_id: target_device_id.to_owned(),
        }
        .emit();
        Ok(id)
    }

    /// Poll deliverable events for a device.
    ///
    /// With `since`, returns events `id > since`; without, the most
    /// recent batch (ascending). Expired events are invisible; `dropped`
    /// counts events past the cursor that expired before delivery.
    pub fn poll_events(
        &self,
        device_id: &str,
        since: Option<i64>,
        limit: u32,
    ) -> Result<(i64, Vec<Event>, u64)> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock();

        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<Event> {
            let metadata_json: Option<String> = row.get(6)?;
            Ok(Event {
                id: row.get(0)?,
                event_type: row.get(1)?,
                time: parse_ts(row.get(2)?),
                status: row.get(3)?,
                source: row.get(4)?,
                message: row.get(5)?,
                metadata: metadata_json.and_then(|s| serde_json::from_str(&s).ok()),
                expires_at: parse_ts(row.get(7)?),
                acked_at: parse_opt_ts(row.get(8)?),
                target_device_id: row.get(9)?,
            })
        };

        const COLS: &str =
            "id, type, time, status, source, message, metadata_json, expires_at, acked_at, target_device_id";

        let mut events: Vec<Event> = match since {
            Some(cursor) => {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {COLS} FROM events
                         WHERE target_device_id = ?1 AND id > ?2
                           AND acked_at IS NULL AND expires_at > ?3
                         ORDER BY id ASC LIMIT ?4"
                    ))
                    .map_err(sql_err)?;
                let rows = stmt
                    .query_map(params![device_id, cursor, now, limit], map_row)
                    .map_err(sql_err)?;
                rows.collect::<std::result::Result<_, _>>().map_err(sql_err)?
            }
            None => {
                // Most recent batch, returned ascending.
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {COLS} FROM events
                         WHERE target_device_id = ?1
                           AND acked_at IS NULL AND expires_at > ?2
                         ORDER BY id DESC LIMIT ?3"
                    ))
                    .map_err(sql_err)?;
                let rows = stmt
                    .query_map(params![device_id, now, limit], map_row)
                    .map_err(sql_err)?;
                let mut events: Vec<Event> =
                    rows.collect::<std::result::Result<_, _>>().map_err(sql_err)?;
                events.reverse();
                events
            }
        };

        let cursor = events
            .iter()
            .map(|e| e.id)
            .max()
            .unwrap_or(since.unwrap_or(0));

        let dropped: u64 = conn
            .query_row(
                "SELECT COUNT(*) FROM events
                 WHERE target_device_id = ?1 AND id > ?2
                   AND acked_at IS NULL AND expires_at <= ?3",
                params![device_id, since.unwrap_or(0), now],
                |row| row.get(0),
            )
            .map_err(sql_err)?;

        // Never hand out more than `limit` even after the reverse.
        events.truncate(limit as usize);
        Ok((cursor, events, dropped))
    }

    /// Mark all events with `id <= upto` for the device as acked.
    pub fn ack_events(&self, device_id: &str, upto: i64) -> Result<usize> {
        self.conn
            .lock()
            .execute(
                "UPDATE events SET acked_at = ?3
                 WHERE target_device_id = ?1 AND id <= ?2 AND acked_at IS NULL",
                params![device_id, upto, Utc::now().to_rfc3339()],
            )
            .map_err(sql_err)
    }

    // ── Idempotency ──────────────────────────────────────────────────

    /// Stored response for a key, if present and unexpired.
    pub fn idempotency_get(&self, key: &str) -> Result<Option<(String, String)>> {
        self.conn
            .lock()
            .query_row(
                "SELECT request_hash, response_json FROM idempotency
                 WHERE key = ?1 AND expires_at > ?2",
                params![key, Utc::now().to_rfc3339()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(sql_err)
    }

    pub fn idempotency_put(
        &self,
        key: &str,
        request_hash: &str,
        response_json: &str,
        ttl: chrono::Duration,
    ) -> Result<()> {
        self.conn
            .lock()
            .execute(
                "INSERT OR REPLACE INTO idempotency (key, request_hash, response_json, expires_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![key, request_hash, response_json, (Utc::now() + ttl).to_rfc3339()],
            )
            .map_err(sql_err)?;
        Ok(())
    }

    // ── Rate limits ──────────────────────────────────────────────────

    /// Atomically check-and-increment a sliding-window bucket.
    pub fn rate_limit_check(&self, bucket: &str, max: u32, window_secs: u64) -> Result<RateDecision> {
        let now = Utc::now().timestamp();
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction().map_err(sql_err)?;

        let row: Option<(u32, i64)> = tx
            .query_row(
                "SELECT count, reset_at FROM rate_limits WHERE bucket = ?1",
                params![bucket],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(sql_err)?;

        let decision = match row {
            None => {
                tx.execute(
                    "INSERT OR REPLACE INTO rate_limits (bucket, count, reset_at)
                     VALUES (?1, 1, ?2)",
                    params![bucket, now + window_secs as i64],
                )
                .map_err(sql_err)?;
                RateDecision::Allowed
            }
            Some((_, reset_at)) if reset_at <= now => {
                tx.execute(
                    "UPDATE rate_limits SET count = 1, reset_at = ?2 WHERE bucket = ?1",
                    params![bucket, now + window_secs as i64],
                )
                .map_err(sql_err)?;
                RateDecision::Allowed
            }
            Some((count, reset_at)) if count >= max => RateDecision::Limited {
                retry_after_secs: (reset_at - now).max(1),
            },
            Some(_) => {
                tx.execute(
                    "UPDATE rate_limits SET count = count + 1 WHERE bucket = ?1",
                    params![bucket],
                )
                .map_err(sql_err)?;
                RateDecision::Allowed
            }
        };

        tx.commit().map_err(sql_err)?;
        Ok(decision)
    }

    // ── HTTP audit ───────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub fn http_audit(
        &self,
        actor_id: Option<&str>,
        device_id: Option<&str>,
        route: &str,
        ip: Option<&str>,
        request_id: Option<&str>,
        action: &str,
        result: &str,
    ) -> Result<()> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO audit_logs
                     (time, actor_id, device_id, route, ip, request_id, trace_id, action, level, result, metadata_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, ?7, 'info', ?8, NULL)",
                params![
                    Utc::now().to_rfc3339(),
                    actor_id,
                    device_id,
                    route,
                    ip,
                    request_id,
                    action,
                    result
                ],
            )
            .map_err(sql_err)?;
        Ok(())
    }

    // ── API keys ─────────────────────────────────────────────────────

    /// Create a gateway service key. Returns `(id, plaintext_key)`.
    pub fn create_api_key(&self, name: &str, scope: DeviceScope) -> Result<(String, String)> {
        let id = uuid::Uuid::new_v4().to_string();
        let key = mint_token();
        let scope_json = serde_json::to_string(&scope).map_err(Error::Json)?;
        self.conn
            .lock()
            .execute(
                "INSERT INTO api_keys (id, name, key_hash, scope_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, name, hash_token(&key), scope_json, Utc::now().to_rfc3339()],
            )
            .map_err(sql_err)?;
        Ok((id, key))
    }

    pub fn revoke_api_key(&self, id: &str) -> Result<bool> {
        let changed = self
            .conn
            .lock()
            .execute(
                "UPDATE api_keys SET revoked_at = ?2 WHERE id = ?1 AND revoked_at IS NULL",
                params![id, Utc::now().to_rfc3339()],
            )
            .map_err(sql_err)?;
        Ok(changed > 0)
    }

    /// Authenticate a service key; touches `last_used_at` on success.
    pub fn authenticate_api_key(&self, key: &str) -> Result<Option<DeviceScope>> {
        let hash = hash_token(key);
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock();
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT id, scope_json FROM api_keys
                 WHERE key_hash = ?1 AND revoked_at IS NULL
                   AND (expires_at IS NULL OR expires_at > ?2)",
                params![hash, now],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(sql_err)?;
        match row {
            Some((id, scope_json)) => {
                conn.execute(
                    "UPDATE api_keys SET last_used_at = ?2 WHERE id = ?1",
                    params![id, now],
                )
                .map_err(sql_err)?;
                Ok(Some(serde_json::from_str(&scope_json).unwrap_or_default()))
            }
            None => Ok(None),
        }
    }

    // ── Cleanup ──────────────────────────────────────────────────────

    /// Remove expired events and idempotency rows. Returns `(events,
    /// idempotency)` counts.
    pub fn cleanup_expired(&self) -> Result<(usize, usize)> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock();
        let events = conn
            .execute("DELETE FROM events WHERE expires_at <= ?1", params![now])
            .map_err(sql_err)?;
        let idem = conn
            .execute("DELETE FROM idempotency WHERE expires_at <= ?1", params![now])
            .map_err(sql_err)?;
        if events + idem > 0 {
            tracing::debug!(events, idempotency = idem, "expired rows swept");
        }
        Ok((events, idem))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> GatewayStore {
        GatewayStore::open_in_memory().unwrap()
    }

    fn scope(tools: SecurityLevel) -> DeviceScope {
        DeviceScope {
            tools,
            system: false,
            mcp: false,
        }
    }

    #[test]
    fn pairing_lifecycle() {
        let store = store();
        store
            .create_pairing("dev-1", Some("10.0.0.1"), Some("curl/8"))
            .unwrap();
        assert_eq!(store.list_pending().unwrap().len(), 1);

        let token = store.approve_device("dev-1", scope(SecurityLevel::Read)).unwrap();
        assert_eq!(token.len(), 64);
        // Pending row removed.
        assert!(store.list_pending().unwrap().is_empty());

        match store.authenticate("dev-1", &token).unwrap() {
            DeviceAuth::Ok(device) => {
                assert_eq!(device.scope.tools, SecurityLevel::Read);
                assert!(!device.scope.system);
            }
            other => panic!("expected Ok, got {other:?}"),
        }
    }

    #[test]
    fn bad_token_and_unknown_device() {
        let store = store();
        assert!(matches!(
            store.authenticate("ghost", "x").unwrap(),
            DeviceAuth::UnknownDevice
        ));
        store.approve_device("dev-1", DeviceScope::default()).unwrap();
        assert!(matches!(
            store.authenticate("dev-1", "wrong").unwrap(),
            DeviceAuth::BadToken
        ));
    }

    #[test]
    fn revoked_device_fails_auth() {
        let store = store();
        let token = store.approve_device("dev-1", DeviceScope::default()).unwrap();
        assert!(store.revoke_device("dev-1").unwrap());
        assert!(matches!(
            store.authenticate("dev-1", &token).unwrap(),
            DeviceAuth::Revoked
        ));
        // Revoking again is a no-op.
        assert!(!store.revoke_device("dev-1").unwrap());
    }

    #[test]
    fn approve_revoke_approve_resets() {
        let store = store();
        let t1 = store.approve_device("dev-1", scope(SecurityLevel::Sign)).unwrap();
        store.revoke_device("dev-1").unwrap();
        let t2 = store.approve_device("dev-1", scope(SecurityLevel::Read)).unwrap();
        assert_ne!(t1, t2);

        match store.authenticate("dev-1", &t2).unwrap() {
            DeviceAuth::Ok(device) => {
                assert_eq!(device.scope.tools, SecurityLevel::Read);
                assert!(device.revoked_at.is_none());
            }
            other => panic!("expected Ok, got {other:?}"),
        }
        assert!(store.list_pending().unwrap().is_empty());
    }

    #[test]
    fn rotate_preserves_scope_and_paired_at() {
        let store = store();
        let t1 = store.approve_device("dev-1", scope(SecurityLevel::Write)).unwrap();
        let before = store.get_device("dev-1").unwrap().unwrap();

        let t2 = store.rotate_token("dev-1").unwrap().unwrap();
        assert_ne!(t1, t2);

        let after = store.get_device("dev-1").unwrap().unwrap();
        assert_eq!(after.scope, before.scope);
        assert_eq!(after.paired_at, before.paired_at);

        assert!(matches!(
            store.authenticate("dev-1", &t1).unwrap(),
            DeviceAuth::BadToken
        ));
        assert!(matches!(
            store.authenticate("dev-1", &t2).unwrap(),
            DeviceAuth::Ok(_)
        ));
    }

    #[test]
    fn event_poll_and_ack_cycle() {
        let store = store();
        let ttl = chrono::Duration::hours(1);
        let e1 = store
            .insert_event("message", "ok", "agent", "Event 1", None, ttl, "dev-1")
            .unwrap();
        let e2 = store
            .insert_event("message", "ok", "agent", "Event 2", None, ttl, "dev-1")
            .unwrap();
        assert!(e2 > e1);

        // First poll without a cursor returns both, ascending.
        let (cursor, events, dropped) = store.poll_events("dev-1", None, 100).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message, "Event 1");
        assert_eq!(cursor, e2);
        assert_eq!(dropped, 0);

        // Poll past the cursor: empty.
        let (_, events, _) = store.poll_events("dev-1", Some(cursor), 100).unwrap();
        assert!(events.is_empty());

        // New event appears after the cursor.
        let e3 = store
            .insert_event("message", "ok", "agent", "Event 3", None, ttl, "dev-1")
            .unwrap();
        let (c2, events, _) = store.poll_events("dev-1", Some(cursor), 100).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, "Event 3");
        assert_eq!(c2, e3);

        // Ack everything; nothing is redelivered even without a cursor.
        let acked = store.ack_events("dev-1", e3).unwrap();
        assert_eq!(acked, 3);
        let (_, events, _) = store.poll_events("dev-1", None, 100).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn events_are_per_device() {
        let store = store();
        let ttl = chrono::Duration::hours(1);
        store
            .insert_event("message", "ok", "agent", "for dev-1", None, ttl, "dev-1")
            .unwrap();
        let (_, events, _) = store.poll_events("dev-2", None, 100).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn expired_events_are_invisible_and_counted_as_dropped() {
        let store = store();
        store
            .insert_event(
                "message",
                "ok",
                "agent",
                "already gone",
                None,
                chrono::Duration::seconds(-1),
                "dev-1",
            )
            .unwrap();
        store
            .insert_event(
                "message",
                "ok",
                "agent",
                "still here",
                None,
                chrono::Duration::hours(1),
                "dev-1",
            )
            .unwrap();

        let (_, events, dropped) = store.poll_events("dev-1", Some(0), 100).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, "still here");
        assert_eq!(dropped, 1);
    }

    #[test]
    fn poll_respects_limit() {
        let store = store();
        let ttl = chrono::Duration::hours(1);
        for i in 0..5 {
            store
                .insert_event("message", "ok", "agent", &format!("m{i}"), None, ttl, "d")
                .unwrap();
        }
        let (_, events, _) = store.poll_events("d", Some(0), 2).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message, "m0");
    }

    #[test]
    fn idempotency_roundtrip_and_expiry() {
        let store = store();
        store
            .idempotency_put("k1", "hash-a", "{\"ok\":true}", chrono::Duration::hours(1))
            .unwrap();
        let (hash, response) = store.idempotency_get("k1").unwrap().unwrap();
        assert_eq!(hash, "hash-a");
        assert_eq!(response, "{\"ok\":true}");

        store
            .idempotency_put("k2", "hash-b", "{}", chrono::Duration::seconds(-1))
            .unwrap();
        assert!(store.idempotency_get("k2").unwrap().is_none());
    }

    #[test]
    fn rate_limit_window() {
        let store = store();
        for _ in 0..3 {
            assert_eq!(
                store.rate_limit_check("dev-1:poll", 3, 60).unwrap(),
                RateDecision::Allowed
            );
        }
        match store.rate_limit_check("dev-1:poll", 3, 60).unwrap() {
            RateDecision::Limited { retry_after_secs } => assert!(retry_after_secs >= 1),
            other => panic!("expected Limited, got {other:?}"),
        }
        // Separate buckets are unaffected.
        assert_eq!(
            store.rate_limit_check("dev-2:poll", 3, 60).unwrap(),
            RateDecision::Allowed
        );
    }

    #[test]
    fn cleanup_sweeps_expired_rows() {
        let store = store();
        store
            .insert_event(
                "message",
                "ok",
                "agent",
                "old",
                None,
                chrono::Duration::seconds(-1),
                "d",
            )
            .unwrap();
        store
            .idempotency_put("k", "h", "{}", chrono::Duration::seconds(-1))
            .unwrap();
        let (events, idem) = store.cleanup_expired().unwrap();
        assert_eq!(events, 1);
        assert_eq!(idem, 1);
    }

    #[test]
    fn api_key_lifecycle() {
        let store = store();
        let (id, key) = store
            .create_api_key("ci-runner", scope(SecurityLevel::Read))
            .unwrap();
        let auth = store.authenticate_api_key(&key).unwrap().unwrap();
        assert_eq!(auth.tools, SecurityLevel::Read);

        assert!(store.revoke_api_key(&id).unwrap());
        assert!(store.authenticate_api_key(&key).unwrap().is_none());
    }
}
