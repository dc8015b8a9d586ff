//! Turn outcomes.
//!
//! Each turn of the loop resolves to a tagged outcome; the loop
//! dispatches on it instead of unwinding through sentinel errors, so
//! accumulated messages survive every exit path.

use owlia_domain::error::Error;
use owlia_domain::tool::ToolCall;

/// How one turn of the agent loop resolved.
#[derive(Debug)]
pub enum TurnOutcome {
    /// The model produced a final textual answer.
    Done(String),
    /// The model requested tool invocations; the loop continues.
    ToolCalls(Vec<ToolCall>),
    /// The iteration budget ran out before a final answer.
    MaxIterations,
    /// The wall-clock budget ran out.
    Timeout,
    /// The caller cancelled; further turns are suppressed.
    Cancelled,
    /// An unrecoverable provider or transport failure.
    Fatal(Error),
}
