//! Session key computation.
//!
//! A session key is `<channel>:<userOrGroupId>` — the identity under which
//! transcripts and pending confirmations are grouped. Direct messages key
//! on the peer id; group messages key on the group id so every participant
//! shares one session.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A stable `<channel>:<userOrGroupId>` session identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    /// Key for a direct-message conversation.
    pub fn direct(channel: &str, peer_id: &str) -> Self {
        Self(format!("{channel}:{peer_id}"))
    }

    /// Key for a group conversation.
    pub fn group(channel: &str, group_id: &str) -> Self {
        Self(format!("{channel}:{group_id}"))
    }

    /// Reconstruct from a raw stored key.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The channel component (everything before the first `:`).
    pub fn channel(&self) -> &str {
        self.0.split_once(':').map(|(c, _)| c).unwrap_or(&self.0)
    }

    /// The user-or-group component (everything after the first `:`).
    pub fn scope_id(&self) -> &str {
        self.0.split_once(':').map(|(_, s)| s).unwrap_or("")
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
