//! Unauthenticated pairing intake. A device announces itself with
//! `X-Device-Id`; an operator later approves it via the admin API.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;

use crate::state::AppState;

use super::{ok_body, ApiError};

pub async fn pair_request(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let device_id = headers
        .get("x-device-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| {
            ApiError::new(
                axum::http::StatusCode::BAD_REQUEST,
                "ERR_MISSING_DEVICE_ID",
                "X-Device-Id header is required",
            )
        })?;

    let ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_owned());
    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    state
        .store
        .create_pairing(device_id, ip.as_deref(), user_agent.as_deref())
        .map_err(|e| ApiError::internal(e.to_string()))?;

    if let Err(e) = state.store.http_audit(
        None,
        Some(device_id),
        "/pair/request",
        ip.as_deref(),
        None,
        "pair_request",
        "pending",
    ) {
        tracing::warn!(error = %e, "failed to write pairing audit row");
    }

    tracing::info!(device_id, ip = ?ip, "pairing requested");
    Ok(ok_body(serde_json::json!({ "status": "pending" })))
}
