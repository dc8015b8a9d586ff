//! Device command dispatch: tool invocation through the executor
//! pipeline, system commands, and the MCP passthrough stub.
//!
//! Scope enforcement is fail-closed: an unknown tool name is a 403
//! before any scope logic, and a tool above the device's ladder rung
//! (`read < write < sign`) is refused without execution.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;

use owlia_channels::Channel;
use owlia_domain::tool::ToolCall;
use owlia_tools::ToolContext;

use crate::state::AppState;

use super::auth::DeviceIdentity;
use super::{ok_body, ApiError};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// /command/tool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ToolCommandRequest {
    pub payload: ToolCommandPayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCommandPayload {
    pub tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
pub struct WireToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

pub async fn command_tool(
    State(state): State<AppState>,
    Extension(DeviceIdentity(device)): Extension<DeviceIdentity>,
    Json(req): Json<ToolCommandRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let calls: Vec<ToolCall> = req
        .payload
        .tool_calls
        .into_iter()
        .map(|c| ToolCall {
            call_id: c.id,
            tool_name: c.name,
            arguments: c.arguments,
        })
        .collect();

    // Pre-flight every call before executing any: unknown tools and
    // scope violations refuse the whole request.
    for call in &calls {
        let Some(tool) = state.executor.registry().resolve(&call.tool_name) else {
            return Err(ApiError::new(
                StatusCode::FORBIDDEN,
                "ERR_UNKNOWN_TOOL",
                format!("unknown tool: {}", call.tool_name),
            ));
        };
        if tool.security() > device.scope.tools {
            return Err(ApiError::new(
                StatusCode::FORBIDDEN,
                "ERR_SCOPE_INSUFFICIENT_TOOLS",
                format!(
                    "tool '{}' requires {} scope, device has {}",
                    call.tool_name,
                    tool.security().as_str(),
                    device.scope.tools.as_str()
                ),
            ));
        }
    }

    let ctx = ToolContext {
        session_key: format!("http:{}", device.device_id),
        user_id: device.device_id.clone(),
        channel_id: "http".into(),
        target: device.device_id.clone(),
        workspace: state.config.workspace.path.clone(),
    };
    let channel: Option<Arc<dyn Channel>> = state.channels.get("http");

    // Sequential execution in request order, mirroring the agent loop.
    let mut results = Vec::with_capacity(calls.len());
    for call in &calls {
        let result = state.executor.execute(call, &ctx, channel.as_ref()).await;
        results.push(result);
    }

    if let Err(e) = state.store.http_audit(
        Some(&device.device_id),
        Some(&device.device_id),
        "/command/tool",
        None,
        None,
        "tool_command",
        "ok",
    ) {
        tracing::warn!(error = %e, "failed to write command audit row");
    }

    Ok(ok_body(json!({ "results": results })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// /command/system
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct SystemCommandRequest {
    pub payload: SystemCommandPayload,
}

#[derive(Debug, Deserialize)]
pub struct SystemCommandPayload {
    pub action: String,
}

pub async fn command_system(
    State(state): State<AppState>,
    Extension(DeviceIdentity(device)): Extension<DeviceIdentity>,
    Json(req): Json<SystemCommandRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !device.scope.system {
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            "ERR_SCOPE_INSUFFICIENT_SYSTEM",
            "device lacks the system scope",
        ));
    }

    match req.payload.action.as_str() {
        "ping" => Ok(ok_body(json!({ "reply": "pong" }))),
        "status" => {
            let uptime = (chrono::Utc::now() - state.started_at).num_seconds();
            Ok(ok_body(json!({
                "version": env!("CARGO_PKG_VERSION"),
                "uptime_secs": uptime,
                "sessions": state.sessions.list().len(),
                "mcp_servers": state.mcp.server_count(),
            })))
        }
        other => Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "ERR_UNKNOWN_ACTION",
            format!("unknown system action: {other}"),
        )),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// /mcp
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn mcp_passthrough(
    Extension(DeviceIdentity(device)): Extension<DeviceIdentity>,
) -> Result<impl IntoResponse, ApiError> {
    if !device.scope.mcp {
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            "ERR_SCOPE_INSUFFICIENT_MCP",
            "device lacks the mcp scope",
        ));
    }
    Err::<(), _>(ApiError::new(
        StatusCode::NOT_IMPLEMENTED,
        "ERR_NOT_IMPLEMENTED",
        "MCP passthrough is not implemented",
    ))
}
