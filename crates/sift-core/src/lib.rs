//! # sift-core
//!
//! Shared configuration and domain types for Sift.
//!
//! Sift is a bridge that lets an LLM assistant query a production SQL
//! store through MCP tools. This crate holds the pieces every other
//! crate needs: the environment-driven application config, the YAML ACL
//! policy document, the chat message sum type that the transcript store
//! and the agent loop both speak, and the log-redaction helpers.

pub mod config;
pub mod identity;
pub mod message;
pub mod redact;

pub use config::{AclConfig, AppConfig, ConfigError, DefaultPolicy};
pub use identity::{normalize_email, UserIdentity};
pub use message::ChatMessage;
pub use redact::mask_email;
