//! File operation tools — safe file I/O constrained to the workspace root.
//!
//! Paths containing `..` or resolving outside the workspace are rejected
//! before any I/O happens.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;

use owlia_domain::tool::{SecurityLevel, ToolCall, ToolResult};

use crate::registry::{Tool, ToolContext};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Path validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validate and resolve a requested path within the workspace root.
///
/// 1. Rejects absolute paths and raw `..` components.
/// 2. Canonicalizes the workspace root and checks the resolved path is
///    still contained within it (walking up to the nearest existing
///    ancestor for not-yet-created targets).
pub fn validate_path(workspace_root: &Path, requested: &str) -> Result<PathBuf, String> {
    let requested_path = Path::new(requested);
    if requested_path.is_absolute() {
        return Err(format!(
            "absolute paths are not allowed; use a path relative to the workspace (got '{requested}')"
        ));
    }
    for component in requested_path.components() {
        if matches!(component, Component::ParentDir) {
            return Err("path must not contain '..' components".to_owned());
        }
    }

    let canonical_root = workspace_root.canonicalize().map_err(|e| {
        format!(
            "cannot resolve workspace root '{}': {e}",
            workspace_root.display()
        )
    })?;

    let candidate = canonical_root.join(requested_path);
    let resolved = if candidate.exists() {
        candidate
            .canonicalize()
            .map_err(|e| format!("cannot resolve path '{}': {e}", candidate.display()))?
    } else {
        let mut existing = candidate.as_path();
        let mut tail: Vec<&std::ffi::OsStr> = Vec::new();
        while !existing.exists() {
            match existing.parent() {
                Some(parent) => {
                    if let Some(name) = existing.file_name() {
                        tail.push(name);
                    }
                    existing = parent;
                }
                None => break,
            }
        }
        let mut resolved = existing
            .canonicalize()
            .map_err(|e| format!("cannot resolve ancestor of '{}': {e}", candidate.display()))?;
        for part in tail.into_iter().rev() {
            resolved.push(part);
        }
        resolved
    };

    if !resolved.starts_with(&canonical_root) {
        return Err(format!(
            "path '{requested}' resolves outside the workspace root"
        ));
    }
    Ok(resolved)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// read_text_file
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct ReadParams {
    path: String,
    /// Line number to start from (0-indexed).
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

pub struct ReadTextFileTool;

#[async_trait]
impl Tool for ReadTextFileTool {
    fn name(&self) -> &str {
        "read_text_file"
    }

    fn description(&self) -> &str {
        "Read a UTF-8 text file from the workspace. Supports offset/limit line windows."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path relative to the workspace root" },
                "offset": { "type": "integer", "description": "First line to return (0-indexed)" },
                "limit": { "type": "integer", "description": "Maximum number of lines" }
            },
            "required": ["path"]
        })
    }

    fn security(&self) -> SecurityLevel {
        SecurityLevel::Read
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolResult {
        let params: ReadParams = match serde_json::from_value(call.arguments.clone()) {
            Ok(p) => p,
            Err(e) => return ToolResult::fail(call, format!("invalid arguments: {e}")),
        };
        let path = match validate_path(&ctx.workspace, &params.path) {
            Ok(p) => p,
            Err(e) => return ToolResult::fail(call, e),
        };

        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(r) => r,
            Err(e) => return ToolResult::fail(call, format!("reading '{}': {e}", params.path)),
        };

        let content: String = match (params.offset, params.limit) {
            (None, None) => raw,
            (offset, limit) => {
                let start = offset.unwrap_or(0);
                let lines: Vec<&str> = raw.lines().skip(start).take(limit.unwrap_or(usize::MAX)).collect();
                lines.join("\n")
            }
        };

        ToolResult::ok(call, json!({ "path": params.path, "content": content }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// write_text_file
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct WriteParams {
    path: String,
    content: String,
    #[serde(default)]
    append: bool,
}

pub struct WriteTextFileTool;

#[async_trait]
impl Tool for WriteTextFileTool {
    fn name(&self) -> &str {
        "write_text_file"
    }

    fn description(&self) -> &str {
        "Write (or append) a UTF-8 text file inside the workspace, creating parent directories."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path relative to the workspace root" },
                "content": { "type": "string" },
                "append": { "type": "boolean", "description": "Append instead of overwrite" }
            },
            "required": ["path", "content"]
        })
    }

    fn security(&self) -> SecurityLevel {
        SecurityLevel::Write
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolResult {
        let params: WriteParams = match serde_json::from_value(call.arguments.clone()) {
            Ok(p) => p,
            Err(e) => return ToolResult::fail(call, format!("invalid arguments: {e}")),
        };
        let path = match validate_path(&ctx.workspace, &params.path) {
            Ok(p) => p,
            Err(e) => return ToolResult::fail(call, e),
        };

        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolResult::fail(call, format!("creating directories: {e}"));
            }
        }

        let result = if params.append {
            match tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
            {
                Ok(mut file) => file.write_all(params.content.as_bytes()).await,
                Err(e) => Err(e),
            }
        } else {
            tokio::fs::write(&path, params.content.as_bytes()).await
        };

        match result {
            Ok(()) => ToolResult::ok(
                call,
                json!({ "path": params.path, "bytes": params.content.len() }),
            ),
            Err(e) => ToolResult::fail(call, format!("writing '{}': {e}", params.path)),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// list_dir
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct ListParams {
    #[serde(default = "default_dot")]
    path: String,
}

fn default_dot() -> String {
    ".".into()
}

pub struct ListDirTool;

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List directory entries inside the workspace."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory relative to the workspace root" }
            }
        })
    }

    fn security(&self) -> SecurityLevel {
        SecurityLevel::Read
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolResult {
        let params: ListParams = match serde_json::from_value(call.arguments.clone()) {
            Ok(p) => p,
            Err(e) => return ToolResult::fail(call, format!("invalid arguments: {e}")),
        };
        let path = match validate_path(&ctx.workspace, &params.path) {
            Ok(p) => p,
            Err(e) => return ToolResult::fail(call, e),
        };

        let mut read_dir = match tokio::fs::read_dir(&path).await {
            Ok(rd) => rd,
            Err(e) => return ToolResult::fail(call, format!("listing '{}': {e}", params.path)),
        };

        let mut entries = Vec::new();
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            entries.push(json!({ "name": name, "is_dir": is_dir }));
        }
        entries.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

        ToolResult::ok(call, json!({ "path": params.path, "entries": entries }))
    }
}
