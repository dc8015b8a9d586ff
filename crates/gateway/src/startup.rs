//! Startup wiring: build every service from config, connect MCP
//! servers, register channels, and serve the HTTP API.

use std::sync::{Arc, OnceLock};

use anyhow::Context;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;

use owlia_agent::{AgentLoop, CancelMap, CoreServices, ToolExecutor};
use owlia_channels::{ChannelManager, InboundMessage};
use owlia_domain::config::{Config, ProviderKind};
use owlia_guard::{
    AnomalyDetector, AuditLogger, CooldownTracker, EmergencyStop, PolicyEngine, WriteGate,
};
use owlia_mcp_client::{adapter, McpManager};
use owlia_providers::{CliProvider, ProviderEntry, ProviderRegistry};
use owlia_sessions::{SessionStore, TranscriptStore};
use owlia_tools::{
    exec::ExecTool,
    file_ops::{ListDirTool, ReadTextFileTool, WriteTextFileTool},
    ToolRegistry,
};

use crate::http_channel::HttpChannel;
use crate::router::MessageRouter;
use crate::state::AppState;
use crate::store::GatewayStore;

/// Fully constructed runtime, ready to serve.
pub struct Runtime {
    pub state: AppState,
    pub inbound: mpsc::Receiver<InboundMessage>,
}

/// Build every service from config.
pub async fn build(config: Arc<Config>) -> anyhow::Result<Runtime> {
    std::fs::create_dir_all(&config.workspace.path)
        .with_context(|| format!("creating workspace at {}", config.workspace.path.display()))?;

    // ── Persistence ──────────────────────────────────────────────────
    let store = Arc::new(GatewayStore::open(&config.server.db_path)?);
    let sessions = Arc::new(SessionStore::new(&config.sessions.state_path)?);
    let transcripts = Arc::new(TranscriptStore::new(
        &config.sessions.state_path.join("transcripts"),
    )?);

    // ── Tool registry: built-ins, then MCP-discovered tools ──────────
    let registry = Arc::new(ToolRegistry::new());
    registry.register(Arc::new(ReadTextFileTool));
    registry.register(Arc::new(WriteTextFileTool));
    registry.register(Arc::new(ListDirTool));
    registry.register(Arc::new(ExecTool));

    // The tools-changed callback re-syncs a server's registry entries
    // after a supervised restart. The manager does not exist yet when
    // the callback is built, so it goes through a OnceLock.
    let manager_slot: Arc<OnceLock<Arc<McpManager>>> = Arc::new(OnceLock::new());
    let mcp = {
        let registry = registry.clone();
        let slot = manager_slot.clone();
        let callback = Arc::new(move |server: &str| {
            if let Some(manager) = slot.get() {
                adapter::sync_server_tools(manager, &registry, server);
            }
        });
        Arc::new(McpManager::from_config(&config.mcp, Some(callback)).await)
    };
    let _ = manager_slot.set(mcp.clone());
    adapter::register_all(&mcp, &registry);

    // ── Guard services ───────────────────────────────────────────────
    let services = CoreServices {
        registry: registry.clone(),
        policy: Arc::new(PolicyEngine::new(&config.policy)),
        audit: Arc::new(AuditLogger::open(
            &config.sessions.state_path.join("audit.jsonl"),
        )?),
        cooldowns: Arc::new(CooldownTracker::new()),
        write_gate: Arc::new(WriteGate::new(&config.write_gate)),
        emergency: Arc::new(EmergencyStop::new()),
        anomaly: Arc::new(AnomalyDetector::new()),
    };
    let executor = Arc::new(ToolExecutor::new(services));

    // ── Providers ────────────────────────────────────────────────────
    let providers = Arc::new(ProviderRegistry::new(build_providers(&config)));
    if providers.is_empty() {
        tracing::warn!("no usable LLM providers configured; chat turns will fail");
    }

    // ── Channels ─────────────────────────────────────────────────────
    let (channels, inbound) = ChannelManager::new(256);
    let channels = Arc::new(channels);
    channels.register(Arc::new(HttpChannel::new(
        store.clone(),
        config.server.events.ttl_secs,
    )));

    // ── Agent loop ───────────────────────────────────────────────────
    let agent = Arc::new(AgentLoop::new(
        providers.clone(),
        executor.clone(),
        transcripts.clone(),
    ));

    let admin_token_hash = read_admin_token(&config.server.admin_token_env);

    Ok(Runtime {
        state: AppState {
            config,
            store,
            providers,
            executor,
            agent,
            cancel_map: Arc::new(CancelMap::new()),
            sessions,
            transcripts,
            channels,
            mcp,
            admin_token_hash,
            started_at: chrono::Utc::now(),
        },
        inbound,
    })
}

/// Instantiate providers from config. Hosted-API kinds need an external
/// wire adapter; without one registered they are skipped, not fatal.
fn build_providers(config: &Config) -> Vec<ProviderEntry> {
    let mut entries = Vec::new();
    for pc in &config.llm.providers {
        match pc.kind {
            ProviderKind::Cli => {
                let Some(command) = pc.command.clone() else {
                    tracing::warn!(provider_id = %pc.id, "cli provider missing command, skipping");
                    continue;
                };
                entries.push(ProviderEntry {
                    id: pc.id.clone(),
                    priority: pc.priority,
                    api_key_env: None,
                    provider: Arc::new(CliProvider::new(&pc.id, command, pc.args.clone())),
                });
            }
            ProviderKind::Anthropic | ProviderKind::OpenaiCompat => {
                tracing::warn!(
                    provider_id = %pc.id,
                    kind = ?pc.kind,
                    "no wire adapter bundled for this provider kind, skipping"
                );
            }
        }
    }
    entries
}

fn read_admin_token(env_name: &str) -> Option<Vec<u8>> {
    match std::env::var(env_name) {
        Ok(token) if !token.trim().is_empty() => {
            Some(Sha256::digest(token.trim().as_bytes()).to_vec())
        }
        _ => {
            tracing::warn!(env = env_name, "admin token env unset, admin endpoints disabled");
            None
        }
    }
}

/// Serve the gateway until the process is stopped.
pub async fn serve(runtime: Runtime) -> anyhow::Result<()> {
    let Runtime { state, inbound } = runtime;

    state.channels.start_all().await;

    // Message router: channels → sessions → agent loop → channels.
    tokio::spawn(MessageRouter::new(state.clone(), inbound).run());

    // Expired-row sweeper and session flusher.
    {
        let state = state.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                tick.tick().await;
                if let Err(e) = state.store.cleanup_expired() {
                    tracing::warn!(error = %e, "cleanup sweep failed");
                }
                if let Err(e) = state.sessions.flush() {
                    tracing::warn!(error = %e, "session flush failed");
                }
            }
        });
    }

    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(addr = %addr, "gateway listening");

    let app = crate::api::router(state);
    axum::serve(listener, app).await.context("server error")
}
