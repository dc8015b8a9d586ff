//! The agentic loop — the turn-by-turn LLM driver.
//!
//! Each iteration calls the active provider; a response without tool
//! calls is the final answer, otherwise the calls are executed
//! sequentially and their results are fed back. The loop is bounded by
//! an iteration budget and a wall clock, composes caller cancellation
//! with the internal deadline, and fails over between providers in
//! priority order (sticky after the first success).

use std::path::PathBuf;
use std::sync::Arc;

use owlia_channels::Channel;
use owlia_domain::tool::{Message, ToolResult};
use owlia_providers::{ChatRequest, ProviderRegistry};
use owlia_sessions::TranscriptStore;

use crate::cancel::CancelToken;
use crate::executor::ToolExecutor;
use crate::outcome::TurnOutcome;

/// Shown to the user when the loop ends without a final text answer.
const FALLBACK_CONTENT: &str = "I could not complete the request.";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inputs / outputs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// One LLM call = one iteration.
    pub max_iterations: u32,
    /// Wall clock over the whole loop.
    pub timeout: std::time::Duration,
}

/// Identity and placement of the conversation the loop runs for.
#[derive(Debug, Clone)]
pub struct LoopContext {
    pub session_key: String,
    pub session_id: String,
    pub user_id: String,
    pub channel_id: String,
    /// Reply target on the channel.
    pub target: String,
    pub workspace: PathBuf,
}

impl LoopContext {
    fn tool_context(&self) -> owlia_tools::ToolContext {
        owlia_tools::ToolContext {
            session_key: self.session_key.clone(),
            user_id: self.user_id.clone(),
            channel_id: self.channel_id.clone(),
            target: self.target.clone(),
            workspace: self.workspace.clone(),
        }
    }
}

/// What one loop run produced.
#[derive(Debug)]
pub struct LoopResult {
    pub content: String,
    pub iterations: u32,
    pub tool_calls_count: u32,
    /// The full working conversation, including everything appended
    /// before the loop ended.
    pub messages: Vec<Message>,
    pub max_iterations_reached: bool,
    pub timed_out: bool,
    pub error: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AgentLoop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AgentLoop {
    providers: Arc<ProviderRegistry>,
    executor: Arc<ToolExecutor>,
    transcripts: Arc<TranscriptStore>,
}

impl AgentLoop {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        executor: Arc<ToolExecutor>,
        transcripts: Arc<TranscriptStore>,
    ) -> Self {
        Self {
            providers,
            executor,
            transcripts,
        }
    }

    /// Run the loop to completion.
    ///
    /// `initial` must include the system message and the triggering user
    /// message (both already transcripted by the caller). Every message
    /// the loop itself produces is appended to the transcript as it is
    /// created, so errors never erase prior tool-call/result pairs.
    pub async fn run(
        &self,
        ctx: &LoopContext,
        initial: Vec<Message>,
        config: &LoopConfig,
        cancel: CancelToken,
        channel: Option<Arc<dyn Channel>>,
    ) -> LoopResult {
        let deadline = tokio::time::Instant::now() + config.timeout;
        let mut messages = initial;
        let mut iterations: u32 = 0;
        let mut tool_calls_count: u32 = 0;
        let mut rotation = self.providers.rotation();
        let tool_ctx = ctx.tool_context();

        let outcome = 'turns: loop {
            if cancel.is_cancelled() {
                break TurnOutcome::Cancelled;
            }
            if iterations >= config.max_iterations {
                break TurnOutcome::MaxIterations;
            }
            if tokio::time::Instant::now() >= deadline {
                break TurnOutcome::Timeout;
            }

            // Failover: skip providers whose key cannot be resolved; the
            // first success is sticky for the rest of the loop.
            let (provider, provider_id) = match rotation.current() {
                Ok(entry) => (entry.provider.clone(), entry.id.clone()),
                Err(e) => break TurnOutcome::Fatal(e),
            };

            iterations += 1;
            tracing::debug!(
                session_key = %ctx.session_key,
                iteration = iterations,
                provider = %provider_id,
                "agent turn"
            );

            // CLI providers run tools internally; delegate the whole turn
            // and suppress the tool loop.
            if provider.is_cli() {
                let req = ChatRequest {
                    messages: messages.clone(),
                    tools: Vec::new(),
                    model: None,
                };
                break match tokio::time::timeout_at(deadline, provider.complete(req)).await {
                    Err(_) => TurnOutcome::Timeout,
                    Ok(Err(e)) => TurnOutcome::Fatal(e),
                    Ok(Ok(resp)) => TurnOutcome::Done(resp.content),
                };
            }

            let req = ChatRequest {
                messages: messages.clone(),
                tools: self.executor.definitions(),
                model: None,
            };
            let resp = match tokio::time::timeout_at(deadline, provider.complete(req)).await {
                Err(_) => break TurnOutcome::Timeout,
                Ok(Err(e)) => break TurnOutcome::Fatal(e),
                Ok(Ok(resp)) => resp,
            };

            if resp.tool_calls.is_empty() {
                break TurnOutcome::Done(resp.content);
            }

            // Guard the per-turn invariant: call ids must be unique.
            {
                let mut seen = std::collections::HashSet::new();
                for call in &resp.tool_calls {
                    if !seen.insert(call.call_id.as_str()) {
                        tracing::warn!(
                            call_id = %call.call_id,
                            "duplicate tool call id within a turn"
                        );
                    }
                }
            }

            let assistant =
                Message::assistant_tool_calls(resp.content.clone(), resp.tool_calls.clone());
            self.append_transcript(&ctx.session_id, &assistant);
            messages.push(assistant);

            // Execute sequentially in emission order; results are
            // correlated by id and later calls may depend on earlier ones.
            let mut results: Vec<ToolResult> = Vec::with_capacity(resp.tool_calls.len());
            let mut cancelled_mid_turn = false;
            for call in &resp.tool_calls {
                if cancel.is_cancelled() {
                    // Suppress further calls; already-produced results are
                    // still recorded below.
                    cancelled_mid_turn = true;
                    break;
                }
                let result = self
                    .executor
                    .execute(call, &tool_ctx, channel.as_ref())
                    .await;
                tool_calls_count += 1;
                results.push(result);
            }

            let tool_msg = Message::tool_results(results);
            self.append_transcript(&ctx.session_id, &tool_msg);
            messages.push(tool_msg);

            if cancelled_mid_turn {
                break 'turns TurnOutcome::Cancelled;
            }
        };

        self.finish(ctx, outcome, messages, iterations, tool_calls_count)
    }

    fn append_transcript(&self, session_id: &str, msg: &Message) {
        if let Err(e) = self.transcripts.append_message(session_id, msg) {
            tracing::error!(error = %e, session_id, "failed to append transcript");
        }
    }

    fn finish(
        &self,
        ctx: &LoopContext,
        outcome: TurnOutcome,
        mut messages: Vec<Message>,
        iterations: u32,
        tool_calls_count: u32,
    ) -> LoopResult {
        let mut max_iterations_reached = false;
        let mut timed_out = false;
        let mut error = None;

        let content = match outcome {
            TurnOutcome::Done(text) => {
                // A turn that ended tool-only still owes the user text.
                let content = if text.trim().is_empty() {
                    FALLBACK_CONTENT.to_owned()
                } else {
                    text
                };
                let final_msg = Message::assistant(content.clone());
                self.append_transcript(&ctx.session_id, &final_msg);
                messages.push(final_msg);
                content
            }
            TurnOutcome::ToolCalls(_) => {
                // Turns resolve tool calls inline; reaching here is a bug.
                tracing::error!("loop ended with unprocessed tool calls");
                FALLBACK_CONTENT.to_owned()
            }
            TurnOutcome::MaxIterations => {
                max_iterations_reached = true;
                FALLBACK_CONTENT.to_owned()
            }
            TurnOutcome::Timeout => {
                timed_out = true;
                FALLBACK_CONTENT.to_owned()
            }
            TurnOutcome::Cancelled => FALLBACK_CONTENT.to_owned(),
            TurnOutcome::Fatal(e) => {
                tracing::error!(error = %e, session_key = %ctx.session_key, "agent loop failed");
                error = Some(e.to_string());
                FALLBACK_CONTENT.to_owned()
            }
        };

        LoopResult {
            content,
            iterations,
            tool_calls_count,
            messages,
            max_iterations_reached,
            timed_out,
            error,
        }
    }
}
