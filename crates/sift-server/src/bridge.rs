//! Glue between the agent loop and the MCP client bridge.

use async_trait::async_trait;
use serde_json::Value;
use sift_agent::{AgentError, LlmToolDef, ToolBridge};
use sift_mcp::McpClient;
use std::sync::Arc;

/// Adapts the MCP client to the orchestrator's tool seam.
pub struct AgentToolBridge {
    client: Arc<McpClient>,
}

impl AgentToolBridge {
    pub fn new(client: Arc<McpClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ToolBridge for AgentToolBridge {
    async fn tools(&self) -> Vec<LlmToolDef> {
        self.client
            .cached_tools()
            .await
            .into_iter()
            .map(|t| LlmToolDef {
                name: t.name,
                description: t.description.unwrap_or_default(),
                input_schema: t.input_schema,
            })
            .collect()
    }

    async fn call_tool(&self, name: &str, input: &Value) -> Result<String, AgentError> {
        self.client
            .call_tool(name, input.clone())
            .await
            .map_err(|e| AgentError::Bridge(e.to_string()))
    }
}
