//! Authentication middleware.
//!
//! Device routes require `X-Device-Id` + `X-Device-Token`; the token is
//! hashed and compared in constant time against the stored digest, the
//! device must not be revoked, and a per-device rate-limit bucket is
//! charged before the handler runs. Admin routes require
//! `X-Gateway-Token`, whose SHA-256 digest is computed once at startup.

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;
use crate::store::{DeviceAuth, RateDecision};

use super::ApiError;

/// The authenticated device, injected as a request extension.
#[derive(Clone)]
pub struct DeviceIdentity(pub crate::store::Device);

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Device auth
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn require_device_token(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let (device_id, token) = match (
        header(req.headers(), "x-device-id"),
        header(req.headers(), "x-device-token"),
    ) {
        (Some(id), Some(token)) => (id.to_owned(), token.to_owned()),
        _ => return ApiError::unauthorized().into_response(),
    };

    let device = match state.store.authenticate(&device_id, &token) {
        Ok(DeviceAuth::Ok(device)) => device,
        Ok(DeviceAuth::UnknownDevice | DeviceAuth::Revoked | DeviceAuth::BadToken) => {
            return ApiError::unauthorized().into_response();
        }
        Err(e) => return ApiError::internal(e.to_string()).into_response(),
    };

    // Per-device sliding-window rate limit, persisted in the store.
    let rl = &state.config.server.rate_limit;
    match state.store.rate_limit_check(
        &format!("device:{device_id}"),
        rl.max_requests,
        rl.window_secs,
    ) {
        Ok(RateDecision::Allowed) => {}
        Ok(RateDecision::Limited { retry_after_secs }) => {
            let mut response = ApiError::new(
                StatusCode::TOO_MANY_REQUESTS,
                "ERR_RATE_LIMITED",
                "rate limit exceeded",
            )
            .into_response();
            if let Ok(value) = retry_after_secs.to_string().parse() {
                response.headers_mut().insert("retry-after", value);
            }
            return response;
        }
        Err(e) => return ApiError::internal(e.to_string()).into_response(),
    }

    if let Err(e) = state.store.touch_last_seen(&device_id) {
        tracing::warn!(error = %e, device_id, "failed to touch last_seen_at");
    }

    req.extensions_mut().insert(DeviceIdentity(device));
    next.run(req).await
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Admin auth
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn require_admin_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    // No configured token means admin endpoints are disabled outright.
    let Some(expected_hash) = &state.admin_token_hash else {
        return ApiError::unauthorized().into_response();
    };

    let provided = header(req.headers(), "x-gateway-token").unwrap_or("");
    let provided_hash = Sha256::digest(provided.as_bytes());

    if !bool::from(provided_hash.ct_eq(expected_hash.as_slice())) {
        return ApiError::unauthorized().into_response();
    }

    next.run(req).await
}
