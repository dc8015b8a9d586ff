//! Idempotency replay for device POST requests.
//!
//! Requests carrying an `Idempotency-Key` header hash
//! `method + path + body`. The first response is stored with an expiry;
//! a retry with the same key and hash gets the stored response back
//! byte-for-byte, and the same key with a *different* hash is rejected.

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::state::AppState;

use super::ApiError;

/// Cap on buffered request/response bodies.
const MAX_BODY: usize = 1024 * 1024;

/// What we persist per key: enough to replay the response exactly.
#[derive(Serialize, Deserialize)]
struct StoredResponse {
    status: u16,
    body: String,
}

fn request_hash(method: &str, path: &str, body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update(b"\n");
    hasher.update(path.as_bytes());
    hasher.update(b"\n");
    hasher.update(body);
    hex::encode(hasher.finalize())
}

fn replay(stored: &StoredResponse) -> Response {
    let status = StatusCode::from_u16(stored.status).unwrap_or(StatusCode::OK);
    (
        status,
        [("content-type", "application/json")],
        stored.body.clone(),
    )
        .into_response()
}

pub async fn replay_layer(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(key) = req
        .headers()
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
    else {
        return next.run(req).await;
    };

    let method = req.method().to_string();
    let path = req.uri().path().to_owned();

    let (parts, body) = req.into_parts();
    let bytes: Bytes = match axum::body::to_bytes(body, MAX_BODY).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return ApiError::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                "ERR_BODY_TOO_LARGE",
                "request body exceeds idempotency buffer",
            )
            .into_response();
        }
    };
    let hash = request_hash(&method, &path, &bytes);

    match state.store.idempotency_get(&key) {
        Ok(Some((stored_hash, stored_response))) => {
            if stored_hash != hash {
                return ApiError::new(
                    StatusCode::CONFLICT,
                    "ERR_IDEMPOTENCY_MISMATCH",
                    "idempotency key reused with a different request",
                )
                .into_response();
            }
            match serde_json::from_str::<StoredResponse>(&stored_response) {
                Ok(stored) => return replay(&stored),
                Err(e) => {
                    tracing::error!(error = %e, key, "corrupt idempotency record, re-executing");
                }
            }
        }
        Ok(None) => {}
        Err(e) => return ApiError::internal(e.to_string()).into_response(),
    }

    let req = Request::from_parts(parts, Body::from(bytes));
    let response = next.run(req).await;

    // Buffer the response so it can be stored and replayed verbatim.
    let (res_parts, res_body) = response.into_parts();
    let res_bytes = match axum::body::to_bytes(res_body, MAX_BODY).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(error = %e, "failed to buffer response for idempotency");
            return ApiError::internal("response buffering failed").into_response();
        }
    };

    let stored = StoredResponse {
        status: res_parts.status.as_u16(),
        body: String::from_utf8_lossy(&res_bytes).into_owned(),
    };
    match serde_json::to_string(&stored) {
        Ok(json) => {
            let ttl = chrono::Duration::seconds(state.config.server.idempotency_ttl_secs as i64);
            if let Err(e) = state.store.idempotency_put(&key, &hash, &json, ttl) {
                tracing::error!(error = %e, key, "failed to store idempotency record");
            }
        }
        Err(e) => tracing::error!(error = %e, "failed to serialize idempotency record"),
    }

    Response::from_parts(res_parts, Body::from(res_bytes))
}
