//! Error types for the MCP crate.

use thiserror::Error;

/// Errors that can occur in the MCP server, catalog handlers and
/// client bridge.
#[derive(Debug, Error)]
pub enum McpError {
    /// Failed to start a transport.
    #[error("failed to start MCP transport: {0}")]
    StartupFailed(String),

    /// Input failed schema validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A query-id list that did not parse.
    #[error("invalid query ids: {0}")]
    InvalidQueryIds(String),

    /// Unknown pattern, tool or BI id.
    #[error("not found: {0}")]
    NotFound(String),

    /// A backing service (database, BI store) failed.
    #[error("backend failure: {0}")]
    Backend(String),

    /// The peer reported a tool failure (`isError` result).
    #[error("{0}")]
    ToolFailed(String),

    /// Transport-level failure in the client bridge.
    #[error("transport error: {0}")]
    Transport(String),

    /// Database error from the read-only pool.
    #[error(transparent)]
    Pool(#[from] sift_adapter_pg::PoolError),

    /// Rules layer error.
    #[error(transparent)]
    Rules(#[from] sift_rules::RulesError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error (stdio transport).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
