//! The device HTTP API.
//!
//! Routes split three ways: **public** (pairing, health), **admin**
//! (gated by `X-Gateway-Token`), and **device** (gated by `X-Device-Id`
//! + `X-Device-Token`, rate-limited, idempotency-aware).
//!
//! Every response uses the `ok` envelope: `{"ok":true,"data":…}` or
//! `{"ok":false,"error":{"code":…,"message":…}}`.

pub mod admin;
pub mod auth;
pub mod command;
pub mod events;
pub mod idempotency;
pub mod pairing;

use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;

use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Success envelope.
pub fn ok_body<T: Serialize>(data: T) -> Json<serde_json::Value> {
    Json(json!({ "ok": true, "data": data }))
}

/// Error with a stable machine-readable code.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "ERR_UNAUTHORIZED",
            "missing or invalid credentials",
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "ERR_INTERNAL",
            message,
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "ok": false,
            "error": { "code": self.code, "message": self.message }
        }));
        (self.status, body).into_response()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Router
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build the full gateway router.
pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/healthz", get(health))
        .route("/pair/request", post(pairing::pair_request));

    let admin = Router::new()
        .route("/admin/approve", post(admin::approve))
        .route("/admin/revoke", post(admin::revoke))
        .route("/admin/scope", post(admin::update_scope))
        .route("/admin/rotate", post(admin::rotate))
        .route("/admin/apikeys", post(admin::create_api_key))
        .route("/admin/apikeys/revoke", post(admin::revoke_api_key))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_admin_token,
        ));

    // Layer order: device auth runs first, then idempotency replay.
    let device = Router::new()
        .route("/events/poll", get(events::poll))
        .route("/command/tool", post(command::command_tool))
        .route("/command/system", post(command::command_system))
        .route("/mcp", post(command::mcp_passthrough))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            idempotency::replay_layer,
        ))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_device_token,
        ));

    public
        .merge(admin)
        .merge(device)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Public liveness probe.
async fn health(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Json<serde_json::Value> {
    let uptime = (chrono::Utc::now() - state.started_at).num_seconds();
    Json(json!({
        "ok": true,
        "data": {
            "status": "up",
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_secs": uptime,
        }
    }))
}
