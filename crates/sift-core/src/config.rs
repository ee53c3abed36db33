//! Configuration types for Sift.
//!
//! Runtime settings come from the environment (`AppConfig::from_env`);
//! the tool access policy comes from a YAML file (`AclConfig::from_file`).
//!
//! # ACL config file
//!
//! ```yaml
//! default_policy: deny
//! superuser_acls: [ADMIN]
//! public_tools: [list_query_patterns]
//! tool_acls:
//!   query: [DB_VIEW, ANALYST]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("missing required environment variable {0}")]
    MissingEnv(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnv { var: String, reason: String },
}

/// Complete runtime configuration, assembled from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Primary relational store (Postgres) connection URL.
    pub database_url: String,
    /// Max connections in the read-only pool.
    pub pg_max_connections: u32,
    /// How long to wait for a pooled connection before failing.
    pub pg_acquire_timeout: Duration,
    /// Idle timeout for pooled connections.
    pub pg_idle_timeout: Duration,
    /// Hard cap on rows returned by the `query` tool.
    pub query_row_cap: usize,

    /// Document store (conversation + auth sessions) URI.
    pub docstore_url: String,

    /// LLM messages endpoint base URL.
    pub llm_base_url: String,
    /// LLM API key.
    pub llm_api_key: String,
    /// Model identifier sent with every request.
    pub llm_model: String,
    /// Max tokens per completion.
    pub llm_max_tokens: u32,
    /// Upper bound on tool-calling rounds per user turn.
    pub agent_max_rounds: u32,

    /// BI query store base URL (e.g. `https://redash.example.com`).
    pub redash_base_url: String,
    /// BI query store API key.
    pub redash_api_key: String,

    /// Identity assumed when a tool call carries no email at all.
    pub fallback_user_email: Option<String>,
    /// Path to the ACL policy YAML.
    pub acl_config_path: String,

    /// HTTP API bind address.
    pub http_bind: String,
    /// MCP SSE server bind address.
    pub mcp_bind: String,
    /// URL the in-process client bridge connects to.
    pub mcp_server_url: String,
}

impl AppConfig {
    /// Assemble the configuration from the process environment.
    ///
    /// `DATABASE_URL` and `LLM_API_KEY` are required; everything else
    /// has a workable default for local development.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database_url: require_env("DATABASE_URL")?,
            pg_max_connections: parse_env("SIFT_PG_MAX_CONNECTIONS", 10)?,
            pg_acquire_timeout: Duration::from_secs(parse_env("SIFT_PG_ACQUIRE_TIMEOUT_SECS", 5)?),
            pg_idle_timeout: Duration::from_secs(parse_env("SIFT_PG_IDLE_TIMEOUT_SECS", 300)?),
            query_row_cap: parse_env("SIFT_QUERY_ROW_CAP", 1000)?,
            docstore_url: optional_env("SIFT_DOCSTORE_URL")
                .unwrap_or_else(|| "sqlite://sift.db".to_string()),
            llm_base_url: optional_env("LLM_BASE_URL")
                .unwrap_or_else(|| "https://api.anthropic.com".to_string()),
            llm_api_key: require_env("LLM_API_KEY")?,
            llm_model: optional_env("LLM_MODEL")
                .unwrap_or_else(|| "claude-sonnet-4-20250514".to_string()),
            llm_max_tokens: parse_env("LLM_MAX_TOKENS", 4096)?,
            agent_max_rounds: parse_env("SIFT_AGENT_MAX_ROUNDS", 20)?,
            redash_base_url: optional_env("REDASH_BASE_URL").unwrap_or_default(),
            redash_api_key: optional_env("REDASH_API_KEY").unwrap_or_default(),
            fallback_user_email: optional_env("SIFT_FALLBACK_USER_EMAIL"),
            acl_config_path: optional_env("SIFT_ACL_CONFIG")
                .unwrap_or_else(|| "acl.yaml".to_string()),
            http_bind: optional_env("SIFT_HTTP_BIND")
                .unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            mcp_bind: optional_env("SIFT_MCP_BIND")
                .unwrap_or_else(|| "127.0.0.1:8765".to_string()),
            mcp_server_url: optional_env("SIFT_MCP_SERVER_URL")
                .unwrap_or_else(|| "http://127.0.0.1:8765/sse".to_string()),
        })
    }
}

fn require_env(var: &str) -> Result<String, ConfigError> {
    std::env::var(var).map_err(|_| ConfigError::MissingEnv(var.to_string()))
}

fn optional_env(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(var: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
            var: var.to_string(),
            reason: format!("could not parse {:?}", raw),
        }),
        Err(_) => Ok(default),
    }
}

/// What happens to a tool that no ACL rule mentions.
///
/// Only the lowercase spellings are accepted; a capitalized value in the
/// YAML is a parse error, not a silent fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DefaultPolicy {
    /// Unlisted tools are callable by any authenticated staff member.
    Open,
    /// Unlisted tools are denied.
    #[default]
    Deny,
}

/// Declarative tool access policy.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AclConfig {
    /// Policy applied to tools absent from `tool_acls`.
    #[serde(default)]
    pub default_policy: DefaultPolicy,

    /// ACL tags that grant access to every tool.
    #[serde(default)]
    pub superuser_acls: Vec<String>,

    /// Tools callable without any authenticated identity.
    #[serde(default)]
    pub public_tools: Vec<String>,

    /// Tool name -> required ACL tags (any one suffices).
    #[serde(default)]
    pub tool_acls: HashMap<String, Vec<String>>,
}

impl AclConfig {
    /// Load the policy from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse the policy from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(ConfigError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acl_config_parses() {
        let cfg = AclConfig::from_yaml(
            r#"
default_policy: deny
superuser_acls: [ADMIN]
public_tools: [list_query_patterns]
tool_acls:
  query: [DB_VIEW]
"#,
        )
        .unwrap();
        assert_eq!(cfg.default_policy, DefaultPolicy::Deny);
        assert_eq!(cfg.superuser_acls, vec!["ADMIN"]);
        assert_eq!(cfg.tool_acls["query"], vec!["DB_VIEW"]);
    }

    #[test]
    fn acl_config_rejects_capitalized_policy() {
        let res = AclConfig::from_yaml("default_policy: Deny\n");
        assert!(res.is_err());
    }

    #[test]
    fn acl_config_defaults_to_deny() {
        let cfg = AclConfig::from_yaml("superuser_acls: []\n").unwrap();
        assert_eq!(cfg.default_policy, DefaultPolicy::Deny);
        assert!(cfg.public_tools.is_empty());
    }
}
