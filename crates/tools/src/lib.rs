//! The tool surface exposed to the LLM: the [`Tool`] trait, the process-wide
//! [`ToolRegistry`] with its alias table, and the built-in file and exec
//! tools.

pub mod exec;
pub mod file_ops;
mod registry;

pub use registry::{Tool, ToolContext, ToolRegistry};
