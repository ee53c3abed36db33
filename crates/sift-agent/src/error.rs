//! Error types for the agent crate.

use thiserror::Error;

/// Errors surfaced by the orchestrator and LLM client.
///
/// Note the asymmetry mandated by the loop contract: an LLM failure is
/// fatal for the turn, while a single tool failure is recorded as a
/// tool result and the loop continues.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The LLM call itself failed (connection, status, parse).
    #[error("LLM request failed: {0}")]
    Llm(String),

    /// The tool bridge failed outside an individual tool call.
    #[error("tool bridge error: {0}")]
    Bridge(String),

    /// Transcript persistence failed.
    #[error(transparent)]
    Store(#[from] sift_store::StoreError),

    /// The conversation session does not exist.
    #[error("session not found: {0}")]
    SessionNotFound(String),
}
