use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Gateway server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    /// Environment variable holding the gateway admin token.
    /// If the env var is unset, admin endpoints are **disabled** (401).
    #[serde(default = "d_admin_token_env")]
    pub admin_token_env: String,
    /// Path to the gateway's SQLite database.
    #[serde(default = "d_db_path")]
    pub db_path: std::path::PathBuf,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub events: EventConfig,
    /// Idempotency record TTL in seconds.
    #[serde(default = "d_idempotency_ttl")]
    pub idempotency_ttl_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: d_port(),
            host: d_host(),
            admin_token_env: d_admin_token_env(),
            db_path: d_db_path(),
            rate_limit: RateLimitConfig::default(),
            events: EventConfig::default(),
            idempotency_ttl_secs: d_idempotency_ttl(),
        }
    }
}

/// Sliding-window rate limits applied per device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum requests per window per bucket.
    #[serde(default = "d_rate_max")]
    pub max_requests: u32,
    #[serde(default = "d_rate_window")]
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: d_rate_max(),
            window_secs: d_rate_window(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    /// Time-to-live for stored events in seconds.
    #[serde(default = "d_event_ttl")]
    pub ttl_secs: u64,
    /// Default / maximum batch size for `/events/poll`.
    #[serde(default = "d_poll_limit")]
    pub poll_limit: u32,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            ttl_secs: d_event_ttl(),
            poll_limit: d_poll_limit(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_port() -> u16 {
    3210
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_admin_token_env() -> String {
    "OWLIA_GATEWAY_TOKEN".into()
}
fn d_db_path() -> std::path::PathBuf {
    std::path::PathBuf::from("./data/gateway.db")
}
fn d_rate_max() -> u32 {
    60
}
fn d_rate_window() -> u64 {
    60
}
fn d_event_ttl() -> u64 {
    24 * 60 * 60
}
fn d_poll_limit() -> u32 {
    100
}
fn d_idempotency_ttl() -> u64 {
    24 * 60 * 60
}
