//! MCP (Model Context Protocol) client — spawns external tool servers
//! over stdio, speaks line-delimited JSON-RPC 2.0, supervises crashes
//! with exponential-backoff restarts, and exposes every discovered tool
//! to the core registry under a `<server>__<tool>` name.

pub mod adapter;
pub mod client;
pub mod manager;
pub mod protocol;
pub mod transport;

pub use client::{HealthStatus, McpClient};
pub use manager::{McpError, McpManager};
pub use transport::TransportError;
