//! Gateway-owned session store.
//!
//! Persists session state in `sessions.json` under the configured state
//! path. Each session key maps to a [`SessionEntry`] tracking the current
//! session id and timestamps. Sessions are created on first message,
//! rotated (a new session id minted) on `/new`, and never deleted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use owlia_domain::error::{Error, Result};
use owlia_domain::trace::TraceEvent;

use crate::session_key::SessionKey;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session entry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A single session tracked by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEntry {
    pub session_key: SessionKey,
    /// Opaque id the transcript file is keyed by; rotated on reset.
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Session store backed by a JSON file.
pub struct SessionStore {
    sessions_path: PathBuf,
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl SessionStore {
    /// Load or create the session store at `state_path/sessions.json`.
    pub fn new(state_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_path).map_err(Error::Io)?;

        let sessions_path = state_path.join("sessions.json");
        let sessions = if sessions_path.exists() {
            let raw = std::fs::read_to_string(&sessions_path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };

        tracing::info!(
            sessions = sessions.len(),
            path = %sessions_path.display(),
            "session store loaded"
        );

        Ok(Self {
            sessions_path,
            sessions: RwLock::new(sessions),
        })
    }

    /// Look up a session by its key.
    pub fn get(&self, key: &SessionKey) -> Option<SessionEntry> {
        self.sessions.read().get(key.as_str()).cloned()
    }

    /// Resolve or create a session for the given key. Returns `(entry, is_new)`.
    pub fn resolve_or_create(&self, key: &SessionKey) -> (SessionEntry, bool) {
        // Fast path: session already exists.
        {
            let sessions = self.sessions.read();
            if let Some(entry) = sessions.get(key.as_str()) {
                return (entry.clone(), false);
            }
        }

        let now = Utc::now();
        let session_id = uuid::Uuid::new_v4().to_string();
        let entry = SessionEntry {
            session_key: key.clone(),
            session_id: session_id.clone(),
            created_at: now,
            updated_at: now,
            metadata: None,
        };

        let mut sessions = self.sessions.write();
        // Lost the race to another creator: keep the first entry.
        if let Some(existing) = sessions.get(key.as_str()) {
            return (existing.clone(), false);
        }
        sessions.insert(key.as_str().to_owned(), entry.clone());

        TraceEvent::SessionResolved {
            session_key: key.as_str().to_owned(),
            session_id,
            is_new: true,
        }
        .emit();

        (entry, true)
    }

    /// Rotate the session: mint a new session id for the same key.
    /// Returns `None` when the key has never been seen.
    pub fn rotate(&self, key: &SessionKey, reason: &str) -> Option<SessionEntry> {
        let mut sessions = self.sessions.write();
        let entry = sessions.get_mut(key.as_str())?;

        let old_id = entry.session_id.clone();
        let new_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        entry.session_id = new_id.clone();
        entry.created_at = now;
        entry.updated_at = now;

        TraceEvent::SessionReset {
            session_key: key.as_str().to_owned(),
            old_session_id: old_id,
            new_session_id: new_id,
            reason: reason.to_owned(),
        }
        .emit();

        Some(entry.clone())
    }

    /// Touch the updated_at timestamp.
    pub fn touch(&self, key: &SessionKey) {
        let mut sessions = self.sessions.write();
        if let Some(entry) = sessions.get_mut(key.as_str()) {
            entry.updated_at = Utc::now();
        }
    }

    /// List all session entries.
    pub fn list(&self) -> Vec<SessionEntry> {
        self.sessions.read().values().cloned().collect()
    }

    /// Persist the current session state to disk.
    pub fn flush(&self) -> Result<()> {
        let sessions = self.sessions.read();
        let json = serde_json::to_string_pretty(&*sessions)
            .map_err(|e| Error::Other(format!("serializing sessions: {e}")))?;
        std::fs::write(&self.sessions_path, json).map_err(Error::Io)?;
        Ok(())
    }
}
