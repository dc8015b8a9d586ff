use serde::Serialize;

/// Structured trace events emitted across all OwliaBot crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SessionResolved {
        session_key: String,
        session_id: String,
        is_new: bool,
    },
    SessionReset {
        session_key: String,
        old_session_id: String,
        new_session_id: String,
        reason: String,
    },
    TranscriptAppend {
        session_id: String,
        lines: usize,
    },
    PolicyDecision {
        tool: String,
        user: String,
        action: String,
        tier: u8,
        effective_tier: u8,
    },
    WriteGateOutcome {
        session_key: String,
        tool: String,
        outcome: String,
    },
    ToolExecuted {
        tool: String,
        user: String,
        success: bool,
        duration_ms: u64,
    },
    McpServerRestart {
        server: String,
        attempt: u32,
        delay_ms: u64,
    },
    DevicePaired {
        device_id: String,
    },
    DeviceRevoked {
        device_id: String,
    },
    EventStored {
        event_id: i64,
        target_device_id: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "owlia_event");
    }
}
