//! Provider-agnostic message and tool-call data model.
//!
//! Every channel adapter, LLM provider, and tool host converts to/from
//! these types at its boundary.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Security levels
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Security classification of a tool.
///
/// Forms a total order: `Read < Write < Sign`. A device whose tool scope
/// is `Write` may call `Read` and `Write` tools but not `Sign` tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    Read,
    Write,
    Sign,
}

impl SecurityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityLevel::Read => "read",
            SecurityLevel::Write => "write",
            SecurityLevel::Sign => "sign",
        }
    }

    /// Parse from a lowercase string; unknown strings default to `Write`
    /// (fail-closed: an unclassified tool is treated as mutating).
    pub fn parse_or_write(s: &str) -> Self {
        match s {
            "read" => SecurityLevel::Read,
            "sign" => SecurityLevel::Sign,
            _ => SecurityLevel::Write,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool calls and results
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A tool invocation emitted by the LLM within a turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
}

/// The result of one tool invocation, paired to its call by `call_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub call_id: String,
    pub tool_name: String,
}

impl ToolResult {
    pub fn ok(call: &ToolCall, data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
        }
    }

    pub fn fail(call: &ToolCall, error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
        }
    }

    /// A human-readable rendering for transcript / LLM feedback.
    pub fn render(&self) -> String {
        if self.success {
            self.data
                .as_ref()
                .map(|d| match d {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_else(|| "ok".into())
        } else {
            format!("error: {}", self.error.as_deref().unwrap_or("unknown"))
        }
    }
}

/// Tool definition exposed to the LLM (name + JSON Schema parameters).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: Value,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// A message in the conversation.
///
/// An assistant message may carry `tool_calls`; the following tool message
/// carries the matching `tool_results` array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_results: Option<Vec<ToolResult>>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: chrono::Utc::now(),
            tool_calls: None,
            tool_results: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    /// An assistant message that requests tool invocations.
    pub fn assistant_tool_calls(text: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::new(Role::Assistant, text);
        msg.tool_calls = Some(calls);
        msg
    }

    /// The single tool message carrying all results for one turn.
    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        let mut msg = Self::new(Role::Tool, String::new());
        msg.tool_results = Some(results);
        msg
    }
}
