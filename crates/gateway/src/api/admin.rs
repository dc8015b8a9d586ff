//! Admin endpoints: approve/revoke pairings, adjust scopes, rotate
//! tokens. All gated by the gateway admin token middleware.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::state::AppState;
use crate::store::DeviceScope;

use super::{ok_body, ApiError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveRequest {
    pub device_id: String,
    #[serde(default)]
    pub scope: Option<DeviceScope>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRequest {
    pub device_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeRequest {
    pub device_id: String,
    pub scope: DeviceScope,
}

fn not_found(device_id: &str) -> ApiError {
    ApiError::new(
        StatusCode::NOT_FOUND,
        "ERR_UNKNOWN_DEVICE",
        format!("no paired device '{device_id}'"),
    )
}

/// Approve a pending pairing; issues the device token (returned once).
pub async fn approve(
    State(state): State<AppState>,
    Json(req): Json<ApproveRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let scope = req.scope.unwrap_or_default();
    let token = state
        .store
        .approve_device(&req.device_id, scope)
        .map_err(|e| ApiError::internal(e.to_string()))?;

    audit(&state, &req.device_id, "/admin/approve", "approve");
    Ok(ok_body(json!({ "deviceToken": token, "scope": scope })))
}

pub async fn revoke(
    State(state): State<AppState>,
    Json(req): Json<DeviceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let revoked = state
        .store
        .revoke_device(&req.device_id)
        .map_err(|e| ApiError::internal(e.to_string()))?;
    if !revoked {
        return Err(not_found(&req.device_id));
    }

    audit(&state, &req.device_id, "/admin/revoke", "revoke");
    Ok(ok_body(json!({ "deviceId": req.device_id, "revoked": true })))
}

pub async fn update_scope(
    State(state): State<AppState>,
    Json(req): Json<ScopeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let updated = state
        .store
        .update_scope(&req.device_id, req.scope)
        .map_err(|e| ApiError::internal(e.to_string()))?;
    if !updated {
        return Err(not_found(&req.device_id));
    }

    audit(&state, &req.device_id, "/admin/scope", "update_scope");
    Ok(ok_body(json!({ "deviceId": req.device_id, "scope": req.scope })))
}

/// Rotate a device token; scope and `pairedAt` are preserved.
pub async fn rotate(
    State(state): State<AppState>,
    Json(req): Json<DeviceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let token = state
        .store
        .rotate_token(&req.device_id)
        .map_err(|e| ApiError::internal(e.to_string()))?
        .ok_or_else(|| not_found(&req.device_id))?;

    audit(&state, &req.device_id, "/admin/rotate", "rotate");
    Ok(ok_body(json!({ "deviceToken": token })))
}

// ── Service keys ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateApiKeyRequest {
    pub name: String,
    #[serde(default)]
    pub scope: Option<DeviceScope>,
}

#[derive(Debug, Deserialize)]
pub struct RevokeApiKeyRequest {
    pub id: String,
}

/// Issue a gateway service key (returned once, only its hash is kept).
pub async fn create_api_key(
    State(state): State<AppState>,
    Json(req): Json<CreateApiKeyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let scope = req.scope.unwrap_or_default();
    let (id, key) = state
        .store
        .create_api_key(&req.name, scope)
        .map_err(|e| ApiError::internal(e.to_string()))?;

    audit(&state, &req.name, "/admin/apikeys", "create_api_key");
    Ok(ok_body(json!({ "id": id, "apiKey": key, "scope": scope })))
}

pub async fn revoke_api_key(
    State(state): State<AppState>,
    Json(req): Json<RevokeApiKeyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let revoked = state
        .store
        .revoke_api_key(&req.id)
        .map_err(|e| ApiError::internal(e.to_string()))?;
    if !revoked {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "ERR_UNKNOWN_KEY",
            format!("no active api key '{}'", req.id),
        ));
    }

    audit(&state, &req.id, "/admin/apikeys/revoke", "revoke_api_key");
    Ok(ok_body(json!({ "id": req.id, "revoked": true })))
}

fn audit(state: &AppState, device_id: &str, route: &str, action: &str) {
    if let Err(e) =
        state
            .store
            .http_audit(Some("admin"), Some(device_id), route, None, None, action, "ok")
    {
        tracing::warn!(error = %e, route, "failed to write admin audit row");
    }
}
