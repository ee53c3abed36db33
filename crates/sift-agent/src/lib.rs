//! # sift-agent
//!
//! The agent path: an LLM client speaking a messages endpoint with
//! tool-use semantics, and the orchestrator that drives it in a
//! bounded tool-calling loop over a durable transcript.
//!
//! Both collaborators sit behind traits ([`LlmClient`], [`ToolBridge`])
//! so the loop is exercised in tests with scripted fakes.

mod error;
pub mod llm;
pub mod orchestrator;

pub use error::AgentError;
pub use llm::{
    AnthropicClient, ContentBlock, LlmClient, LlmMessage, LlmResponse, LlmRole, LlmToolDef,
    StopReason, TokenUsage,
};
pub use orchestrator::{
    translate_transcript, AgentOrchestrator, ToolBridge, ToolCallRecord, TurnOutcome,
};
