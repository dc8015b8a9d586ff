//! End-to-end tests for the device HTTP API: pairing lifecycle, scope
//! enforcement, event polling, idempotency, and rate limiting, all over
//! an in-memory store.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tower::ServiceExt;

use owlia_agent::{AgentLoop, CancelMap, CoreServices, ToolExecutor};
use owlia_channels::ChannelManager;
use owlia_domain::config::Config;
use owlia_domain::tool::{SecurityLevel, ToolCall, ToolResult};
use owlia_guard::{
    AnomalyDetector, AuditLogger, CooldownTracker, EmergencyStop, PolicyEngine, WriteGate,
};
use owlia_providers::ProviderRegistry;
use owlia_sessions::{SessionStore, TranscriptStore};
use owlia_tools::{Tool, ToolContext, ToolRegistry};

use owlia_gateway::api;
use owlia_gateway::http_channel::HttpChannel;
use owlia_gateway::state::AppState;
use owlia_gateway::store::GatewayStore;

const ADMIN_TOKEN: &str = "test-admin-token";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct FixedTool {
    name: &'static str,
    level: SecurityLevel,
}

#[async_trait]
impl Tool for FixedTool {
    fn name(&self) -> &str {
        self.name
    }
    fn description(&self) -> &str {
        "test tool"
    }
    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }
    fn security(&self) -> SecurityLevel {
        self.level
    }
    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> ToolResult {
        ToolResult::ok(call, json!({ "tool": self.name }))
    }
}

struct TestApp {
    state: AppState,
    _dir: tempfile::TempDir,
}

fn app(configure: impl FnOnce(&mut Config)) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    configure(&mut config);
    let config = Arc::new(config);

    let store = Arc::new(GatewayStore::open_in_memory().unwrap());

    let registry = Arc::new(ToolRegistry::new());
    registry.register(Arc::new(FixedTool {
        name: "test_read",
        level: SecurityLevel::Read,
    }));
    registry.register(Arc::new(FixedTool {
        name: "edit_file",
        level: SecurityLevel::Write,
    }));

    let services = CoreServices {
        registry,
        policy: Arc::new(PolicyEngine::new(&config.policy)),
        audit: Arc::new(AuditLogger::open(&dir.path().join("audit.jsonl")).unwrap()),
        cooldowns: Arc::new(CooldownTracker::new()),
        write_gate: Arc::new(WriteGate::new(&config.write_gate)),
        emergency: Arc::new(EmergencyStop::new()),
        anomaly: Arc::new(AnomalyDetector::new()),
    };
    let executor = Arc::new(ToolExecutor::new(services));
    let providers = Arc::new(ProviderRegistry::new(vec![]));

    let (channels, _inbound) = ChannelManager::new(8);
    let channels = Arc::new(channels);
    channels.register(Arc::new(HttpChannel::new(store.clone(), 3600)));

    let sessions = Arc::new(SessionStore::new(dir.path()).unwrap());
    let transcripts = Arc::new(TranscriptStore::new(&dir.path().join("transcripts")).unwrap());
    let agent = Arc::new(AgentLoop::new(
        providers.clone(),
        executor.clone(),
        transcripts.clone(),
    ));

    let state = AppState {
        config,
        store,
        providers,
        executor,
        agent,
        cancel_map: Arc::new(CancelMap::new()),
        sessions,
        transcripts,
        channels,
        mcp: Arc::new(owlia_mcp_client::McpManager::empty()),
        admin_token_hash: Some(Sha256::digest(ADMIN_TOKEN.as_bytes()).to_vec()),
        started_at: chrono::Utc::now(),
    };
    TestApp { state, _dir: dir }
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = api::router(self.state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    /// Pair and approve a device; returns its token.
    async fn pair_device(&self, device_id: &str, scope: Value) -> String {
        let (status, _) = self
            .send(
                Request::post("/pair/request")
                    .header("x-device-id", device_id)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = self
            .send(
                Request::post("/admin/approve")
                    .header("x-gateway-token", ADMIN_TOKEN)
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({ "deviceId": device_id, "scope": scope }).to_string(),
                    ))
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "approve failed: {body}");
        body["data"]["deviceToken"].as_str().unwrap().to_owned()
    }
}

fn device_post(path: &str, device: &str, token: &str, body: Value) -> Request<Body> {
    Request::post(path)
        .header("x-device-id", device)
        .header("x-device-token", token)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn device_get(path: &str, device: &str, token: &str) -> Request<Body> {
    Request::get(path)
        .header("x-device-id", device)
        .header("x-device-token", token)
        .body(Body::empty())
        .unwrap()
}

fn tool_call_body(name: &str) -> Value {
    json!({ "payload": { "toolCalls": [{ "id": "1", "name": name, "arguments": {} }] } })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenarios
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn happy_path_read_tool() {
    let app = app(|_| {});
    let token = app
        .pair_device("dev-1", json!({ "tools": "read", "system": false, "mcp": false }))
        .await;

    let (status, body) = app
        .send(device_post(
            "/command/tool",
            "dev-1",
            &token,
            tool_call_body("test_read"),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    let results = body["data"]["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["success"], true);
    assert_eq!(results[0]["call_id"], "1");
}

#[tokio::test]
async fn write_tool_blocked_by_read_scope() {
    let app = app(|_| {});
    let token = app.pair_device("dev-1", json!({ "tools": "read" })).await;

    let (status, body) = app
        .send(device_post(
            "/command/tool",
            "dev-1",
            &token,
            tool_call_body("edit_file"),
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "ERR_SCOPE_INSUFFICIENT_TOOLS");
}

#[tokio::test]
async fn unknown_tool_is_fail_closed_even_for_sign_scope() {
    let app = app(|_| {});
    let token = app.pair_device("dev-1", json!({ "tools": "sign" })).await;

    let (status, body) = app
        .send(device_post(
            "/command/tool",
            "dev-1",
            &token,
            tool_call_body("some_write_tool_not_registered"),
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "ERR_UNKNOWN_TOOL");
}

#[tokio::test]
async fn event_poll_and_ack_cycle() {
    let app = app(|_| {});
    let token = app.pair_device("dev-cursor", json!({ "tools": "read" })).await;

    // The gateway's channel stores events addressed to the device.
    let http = app.state.channels.get("http").unwrap();
    http.send("dev-cursor", owlia_channels::OutboundMessage::text("Event 1"))
        .await
        .unwrap();
    http.send("dev-cursor", owlia_channels::OutboundMessage::text("Event 2"))
        .await
        .unwrap();

    let (status, body) = app
        .send(device_get("/events/poll", "dev-cursor", &token))
        .await;
    assert_eq!(status, StatusCode::OK);
    let events = body["data"]["events"].as_array().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["message"], "Event 1");
    assert_eq!(events[1]["message"], "Event 2");
    assert_eq!(body["data"]["dropped"], 0);
    let cursor = body["data"]["cursor"].as_i64().unwrap();

    // Nothing after the cursor.
    let (_, body) = app
        .send(device_get(
            &format!("/events/poll?since={cursor}"),
            "dev-cursor",
            &token,
        ))
        .await;
    assert!(body["data"]["events"].as_array().unwrap().is_empty());

    // A third event lands past the cursor.
    http.send("dev-cursor", owlia_channels::OutboundMessage::text("Event 3"))
        .await
        .unwrap();
    let (_, body) = app
        .send(device_get(
            &format!("/events/poll?since={cursor}"),
            "dev-cursor",
            &token,
        ))
        .await;
    let events = body["data"]["events"].as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["message"], "Event 3");

    // Acking everything stops redelivery from the start of time.
    let c3 = body["data"]["cursor"].as_i64().unwrap();
    let (_, body) = app
        .send(device_get(
            &format!("/events/poll?since=0&ack={c3}"),
            "dev-cursor",
            &token,
        ))
        .await;
    assert!(body["data"]["events"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn admin_requires_gateway_token() {
    let app = app(|_| {});
    let (status, body) = app
        .send(
            Request::post("/admin/approve")
                .header("content-type", "application/json")
                .body(Body::from(json!({ "deviceId": "dev-1" }).to_string()))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "ERR_UNAUTHORIZED");
}

#[tokio::test]
async fn revoked_device_is_rejected() {
    let app = app(|_| {});
    let token = app.pair_device("dev-1", json!({ "tools": "read" })).await;

    let (status, _) = app
        .send(
            Request::post("/admin/revoke")
                .header("x-gateway-token", ADMIN_TOKEN)
                .header("content-type", "application/json")
                .body(Body::from(json!({ "deviceId": "dev-1" }).to_string()))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .send(device_post(
            "/command/tool",
            "dev-1",
            &token,
            tool_call_body("test_read"),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "ERR_UNAUTHORIZED");
}

#[tokio::test]
async fn rotate_issues_new_token_preserving_scope() {
    let app = app(|_| {});
    let old_token = app.pair_device("dev-1", json!({ "tools": "write" })).await;

    let (status, body) = app
        .send(
            Request::post("/admin/rotate")
                .header("x-gateway-token", ADMIN_TOKEN)
                .header("content-type", "application/json")
                .body(Body::from(json!({ "deviceId": "dev-1" }).to_string()))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let new_token = body["data"]["deviceToken"].as_str().unwrap().to_owned();
    assert_ne!(new_token, old_token);

    // Old token is dead, new token works, scope survived (write-level
    // tools still pass the scope gate and reach the write gate).
    let (status, _) = app
        .send(device_post(
            "/command/tool",
            "dev-1",
            &old_token,
            tool_call_body("test_read"),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .send(device_post(
            "/command/tool",
            "dev-1",
            &new_token,
            tool_call_body("test_read"),
        ))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
}

#[tokio::test]
async fn idempotent_replay_and_mismatch() {
    let app = app(|_| {});
    let token = app.pair_device("dev-1", json!({ "tools": "read" })).await;

    let make = |body: Value| {
        Request::post("/command/tool")
            .header("x-device-id", "dev-1")
            .header("x-device-token", token.as_str())
            .header("content-type", "application/json")
            .header("idempotency-key", "key-1")
            .body(Body::from(body.to_string()))
            .unwrap()
    };

    let (status1, body1) = app.send(make(tool_call_body("test_read"))).await;
    assert_eq!(status1, StatusCode::OK);

    // Same key + same payload: byte-identical replay.
    let (status2, body2) = app.send(make(tool_call_body("test_read"))).await;
    assert_eq!(status2, StatusCode::OK);
    assert_eq!(body1, body2);

    // Same key + different payload: conflict.
    let (status3, body3) = app
        .send(make(json!({
            "payload": { "toolCalls": [{ "id": "2", "name": "test_read", "arguments": {} }] }
        })))
        .await;
    assert_eq!(status3, StatusCode::CONFLICT);
    assert_eq!(body3["error"]["code"], "ERR_IDEMPOTENCY_MISMATCH");
}

#[tokio::test]
async fn rate_limit_returns_429_with_retry_after() {
    let app = app(|config| {
        config.server.rate_limit.max_requests = 2;
        config.server.rate_limit.window_secs = 60;
    });
    let token = app.pair_device("dev-1", json!({ "tools": "read" })).await;

    for _ in 0..2 {
        let (status, _) = app
            .send(device_get("/events/poll", "dev-1", &token))
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let response = api::router(app.state.clone())
        .oneshot(device_get("/events/poll", "dev-1", &token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: i64 = response
        .headers()
        .get("retry-after")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after >= 1);
}

#[tokio::test]
async fn system_command_requires_system_scope() {
    let app = app(|_| {});
    let token = app
        .pair_device("dev-1", json!({ "tools": "read", "system": false }))
        .await;

    let (status, body) = app
        .send(device_post(
            "/command/system",
            "dev-1",
            &token,
            json!({ "payload": { "action": "status" } }),
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "ERR_SCOPE_INSUFFICIENT_SYSTEM");

    let token2 = app
        .pair_device("dev-2", json!({ "tools": "read", "system": true }))
        .await;
    let (status, body) = app
        .send(device_post(
            "/command/system",
            "dev-2",
            &token2,
            json!({ "payload": { "action": "ping" } }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["reply"], "pong");
}

#[tokio::test]
async fn mcp_passthrough_is_stubbed() {
    let app = app(|_| {});
    let token = app
        .pair_device("dev-1", json!({ "tools": "read", "mcp": true }))
        .await;

    let (status, body) = app
        .send(device_post("/mcp", "dev-1", &token, json!({})))
        .await;
    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
    assert_eq!(body["error"]["code"], "ERR_NOT_IMPLEMENTED");

    let token2 = app
        .pair_device("dev-2", json!({ "tools": "read", "mcp": false }))
        .await;
    let (status, body) = app
        .send(device_post("/mcp", "dev-2", &token2, json!({})))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "ERR_SCOPE_INSUFFICIENT_MCP");
}

#[tokio::test]
async fn health_is_public() {
    let app = app(|_| {});
    let (status, body) = app
        .send(Request::get("/healthz").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "up");
}
