//! Long-poll event delivery with cursor + ACK semantics.
//!
//! `GET /events/poll[?since=N&ack=M&limit=L]`: `ack=M` first marks all
//! events with `id <= M` as consumed, then events with `id > since`
//! addressed to the device (unacked, unexpired) are returned ascending.

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Extension;
use serde::Deserialize;
use serde_json::json;

use crate::state::AppState;

use super::auth::DeviceIdentity;
use super::{ok_body, ApiError};

#[derive(Debug, Deserialize)]
pub struct PollParams {
    #[serde(default)]
    pub since: Option<i64>,
    #[serde(default)]
    pub ack: Option<i64>,
    #[serde(default)]
    pub limit: Option<u32>,
}

pub async fn poll(
    State(state): State<AppState>,
    Extension(DeviceIdentity(device)): Extension<DeviceIdentity>,
    Query(params): Query<PollParams>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(upto) = params.ack {
        let acked = state
            .store
            .ack_events(&device.device_id, upto)
            .map_err(|e| ApiError::internal(e.to_string()))?;
        tracing::debug!(device_id = %device.device_id, upto, acked, "events acked");
    }

    let max = state.config.server.events.poll_limit;
    let limit = params.limit.unwrap_or(max).min(max);
    let (cursor, events, dropped) = state
        .store
        .poll_events(&device.device_id, params.since, limit)
        .map_err(|e| ApiError::internal(e.to_string()))?;

    Ok(ok_body(json!({
        "cursor": cursor,
        "events": events,
        "dropped": dropped,
    })))
}
