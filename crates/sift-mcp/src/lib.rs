//! # sift-mcp
//!
//! The MCP layer of Sift: a tool server exposing the catalog over two
//! transports (line-delimited JSON-RPC on stdio, and SSE over HTTP),
//! and an outbound client bridge the agent orchestrator uses to reach
//! a peer MCP server.
//!
//! Every tool call runs through one gate: ACL check, input-schema
//! validation, handler body, and error folding into an `isError`
//! result. Denials and validation failures are expected, non-fatal
//! outcomes; only transport-level problems become JSON-RPC errors.

pub mod catalog;
pub mod client;
pub mod error;
pub mod handlers;
pub mod protocol;
pub mod redash;
pub mod server;
pub mod sse;

pub use catalog::{ToolCatalog, ToolContext};
pub use client::McpClient;
pub use error::McpError;
pub use protocol::{
    CallToolParams, CallToolResult, JsonRpcRequest, JsonRpcResponse, RequestContext, RequestMeta,
    ToolContent, ToolDefinition,
};
pub use redash::{parse_query_ids, RedashClient, RedashQuery};
pub use server::McpServer;
pub use sse::{sse_router, SseServerState};
