//! Tool registry — the process-wide map of LLM-invocable tools.
//!
//! Mutated only at initialization and on MCP reload; readers take `Arc`
//! snapshots. Registration of an existing name overwrites and is logged.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use owlia_domain::tool::{SecurityLevel, ToolCall, ToolDefinition, ToolResult};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Execution context threaded into every tool call.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub session_key: String,
    pub user_id: String,
    pub channel_id: String,
    /// Reply target on the channel (chat id / device id).
    pub target: String,
    pub workspace: PathBuf,
}

/// A function exposed to the LLM.
///
/// Arguments arrive as raw JSON; each tool owns the parse into its typed
/// parameter struct and reports malformed input through the result.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for the tool's parameters.
    fn parameters(&self) -> Value;

    fn security(&self) -> SecurityLevel;

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolResult;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fixed alias table: LLMs reach for common names; we map them onto the
/// registered canonical tools.
const ALIASES: [(&str, &str); 4] = [
    ("read_file", "read_text_file"),
    ("write_file", "write_text_file"),
    ("run_command", "exec"),
    ("ls", "list_dir"),
];

pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Register a tool. Overwrites (and logs) an existing registration.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_owned();
        let mut tools = self.tools.write();
        if tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "tool re-registered, previous definition replaced");
        } else {
            tracing::debug!(tool = %name, "tool registered");
        }
    }

    /// Resolve a tool by name, following the alias table.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let tools = self.tools.read();
        if let Some(tool) = tools.get(name) {
            return Some(tool.clone());
        }
        ALIASES
            .iter()
            .find(|(alias, _)| *alias == name)
            .and_then(|(_, canonical)| tools.get(*canonical).cloned())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    /// Remove every tool whose name starts with `prefix`; returns how many
    /// were dropped. Used to invalidate an MCP server's tools on reload.
    pub fn remove_prefixed(&self, prefix: &str) -> usize {
        let mut tools = self.tools.write();
        let doomed: Vec<String> = tools
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect();
        for name in &doomed {
            tools.remove(name);
        }
        if !doomed.is_empty() {
            tracing::info!(prefix = prefix, removed = doomed.len(), "tools invalidated");
        }
        doomed.len()
    }

    /// Definitions snapshot for the LLM, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let tools = self.tools.read();
        let mut defs: Vec<ToolDefinition> = tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_owned(),
                description: t.description().to_owned(),
                parameters: t.parameters(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }
}
