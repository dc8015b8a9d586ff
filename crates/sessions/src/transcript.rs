//! Append-only JSONL transcripts.
//!
//! Each session gets a `<sessionId>.jsonl` file under the transcripts
//! directory. Every message is appended as a single JSON line; the file on
//! disk is the source of truth, nothing is cached in memory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use owlia_domain::error::{Error, Result};
use owlia_domain::tool::{Message, Role, ToolCall, ToolResult};
use owlia_domain::trace::TraceEvent;

/// A single transcript line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptLine {
    pub timestamp: DateTime<Utc>,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_results: Option<Vec<ToolResult>>,
}

impl From<&Message> for TranscriptLine {
    fn from(msg: &Message) -> Self {
        Self {
            timestamp: msg.timestamp,
            role: msg.role,
            content: msg.content.clone(),
            tool_calls: msg.tool_calls.clone(),
            tool_results: msg.tool_results.clone(),
        }
    }
}

impl From<TranscriptLine> for Message {
    fn from(line: TranscriptLine) -> Self {
        Message {
            role: line.role,
            content: line.content,
            timestamp: line.timestamp,
            tool_calls: line.tool_calls,
            tool_results: line.tool_results,
        }
    }
}

/// Callback invoked after each append (summarization hook slot).
pub type TranscriptHook = Arc<dyn Fn(&str, &TranscriptLine) + Send + Sync>;

/// Reads and writes append-only JSONL transcript files.
pub struct TranscriptStore {
    base_dir: PathBuf,
    hook: Option<TranscriptHook>,
}

impl TranscriptStore {
    pub fn new(base_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(base_dir).map_err(Error::Io)?;
        Ok(Self {
            base_dir: base_dir.to_path_buf(),
            hook: None,
        })
    }

    /// Install a post-append hook (e.g. a summarizer trigger).
    pub fn with_hook(mut self, hook: TranscriptHook) -> Self {
        self.hook = Some(hook);
        self
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.base_dir.join(format!("{session_id}.jsonl"))
    }

    /// Append one line to a session's transcript.
    pub fn append(&self, session_id: &str, line: &TranscriptLine) -> Result<()> {
        let json = serde_json::to_string(line)
            .map_err(|e| Error::Other(format!("serializing transcript line: {e}")))?;

        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(session_id))
            .map_err(Error::Io)?;
        file.write_all(json.as_bytes()).map_err(Error::Io)?;
        file.write_all(b"\n").map_err(Error::Io)?;

        TraceEvent::TranscriptAppend {
            session_id: session_id.to_owned(),
            lines: 1,
        }
        .emit();

        if let Some(hook) = &self.hook {
            hook(session_id, line);
        }

        Ok(())
    }

    /// Append a full message (convenience over [`Self::append`]).
    pub fn append_message(&self, session_id: &str, msg: &Message) -> Result<()> {
        self.append(session_id, &TranscriptLine::from(msg))
    }

    /// Read back the whole transcript, skipping malformed lines.
    pub fn read_all(&self, session_id: &str) -> Result<Vec<TranscriptLine>> {
        let path = self.path_for(session_id);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
        let mut lines = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TranscriptLine>(line) {
                Ok(tl) => lines.push(tl),
                Err(e) => {
                    tracing::warn!(
                        session_id = session_id,
                        error = %e,
                        "skipping malformed transcript line"
                    );
                }
            }
        }
        Ok(lines)
    }

    /// The most recent `limit` lines, oldest first.
    pub fn history(&self, session_id: &str, limit: usize) -> Result<Vec<TranscriptLine>> {
        let mut lines = self.read_all(session_id)?;
        if lines.len() > limit {
            lines.drain(..lines.len() - limit);
        }
        Ok(lines)
    }

    /// Remove a session's transcript file.
    pub fn clear(&self, session_id: &str) -> Result<()> {
        let path = self.path_for(session_id);
        if path.exists() {
            std::fs::remove_file(path).map_err(Error::Io)?;
        }
        Ok(())
    }
}
