//! Registry adapter — exposes each MCP tool as an [`owlia_tools::Tool`]
//! so the executor's policy pipeline applies uniformly to local and
//! MCP-hosted tools.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use owlia_domain::tool::{SecurityLevel, ToolCall, ToolResult};
use owlia_tools::{Tool, ToolContext, ToolRegistry};

use crate::manager::{server_prefix, McpManager};
use crate::protocol::McpToolDef;

/// One MCP tool wrapped for the core registry.
pub struct McpTool {
    manager: Arc<McpManager>,
    qualified_name: String,
    description: String,
    parameters: Value,
    security: SecurityLevel,
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.qualified_name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        self.parameters.clone()
    }

    fn security(&self) -> SecurityLevel {
        self.security
    }

    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> ToolResult {
        match self
            .manager
            .call(&self.qualified_name, call.arguments.clone())
            .await
        {
            Ok(result) if result.is_error => ToolResult::fail(call, result.text()),
            Ok(result) => ToolResult::ok(call, Value::String(result.text())),
            Err(e) => ToolResult::fail(call, e.to_string()),
        }
    }
}

impl McpTool {
    fn new(
        manager: Arc<McpManager>,
        qualified_name: String,
        def: McpToolDef,
        security: SecurityLevel,
    ) -> Self {
        Self {
            manager,
            qualified_name,
            description: def.description,
            parameters: def.input_schema,
            security,
        }
    }
}

/// Re-register one server's tools, invalidating its previous entries.
/// Wired as the manager's `tools-changed` callback.
pub fn sync_server_tools(manager: &Arc<McpManager>, registry: &ToolRegistry, server: &str) {
    registry.remove_prefixed(&server_prefix(server));

    let Some(client) = manager.client(server) else {
        return;
    };
    for def in client.tools() {
        let qualified = crate::manager::qualify(server, &def.name);
        let security = manager.security_for(&qualified);
        registry.register(Arc::new(McpTool::new(
            manager.clone(),
            qualified,
            def,
            security,
        )));
    }
}

/// Register every discovered MCP tool into the core registry.
pub fn register_all(manager: &Arc<McpManager>, registry: &ToolRegistry) {
    for (qualified, def, security) in manager.list_tools() {
        registry.register(Arc::new(McpTool::new(
            manager.clone(),
            qualified,
            def,
            security,
        )));
    }
}
