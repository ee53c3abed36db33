//! MCP server: method dispatch and the tool-call gate.

use crate::catalog::{ToolCatalog, ToolContext};
use crate::error::McpError;
use crate::protocol::*;
use serde_json::{json, Value};
use sift_acl::resolve_email;
use sift_core::mask_email;
use std::io::{BufRead, Write};
use std::sync::Arc;

/// The MCP server. One instance serves every transport; per-request
/// identity arrives through [`RequestContext`].
pub struct McpServer {
    catalog: ToolCatalog,
    context: Arc<ToolContext>,
}

impl McpServer {
    /// Build the server with the standard catalog.
    pub fn new(context: ToolContext) -> Result<Self, McpError> {
        Ok(Self {
            catalog: ToolCatalog::standard()?,
            context: Arc::new(context),
        })
    }

    /// Build the server with an explicit catalog (tests, restricted
    /// deployments).
    pub fn with_catalog(context: ToolContext, catalog: ToolCatalog) -> Self {
        Self {
            catalog,
            context: Arc::new(context),
        }
    }

    pub fn context(&self) -> &Arc<ToolContext> {
        &self.context
    }

    /// Handle one JSON-RPC request.
    pub async fn handle_request(
        &self,
        request: JsonRpcRequest,
        ctx: &RequestContext,
    ) -> JsonRpcResponse {
        let id = request.id.clone();

        match request.method.as_str() {
            "initialize" => self.handle_initialize(id),
            "notifications/initialized" | "initialized" => JsonRpcResponse::success(id, json!({})),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => self.handle_list_tools(id, request.params, ctx).await,
            "tools/call" => self.handle_call_tool(id, request.params, ctx).await,
            _ => JsonRpcResponse::error(
                id,
                -32601,
                format!("Method not found: {}", request.method),
            ),
        }
    }

    fn handle_initialize(&self, id: Option<Value>) -> JsonRpcResponse {
        let result = json!({
            "protocolVersion": "2024-11-05",
            "serverInfo": {
                "name": "sift-mcp",
                "version": env!("CARGO_PKG_VERSION")
            },
            "capabilities": {
                "tools": {
                    "listChanged": false
                }
            }
        });
        JsonRpcResponse::success(id, result)
    }

    /// Resolve the caller email: call meta, then the transport
    /// session, then the configured fallback.
    fn effective_email(&self, meta: Option<&RequestMeta>, ctx: &RequestContext) -> Option<String> {
        resolve_email(
            meta.and_then(|m| m.user_email.as_deref()),
            ctx.session_email.as_deref(),
            self.context.fallback_email.as_deref(),
        )
    }

    async fn handle_list_tools(
        &self,
        id: Option<Value>,
        params: Option<Value>,
        ctx: &RequestContext,
    ) -> JsonRpcResponse {
        let params: ListToolsParams = match params {
            Some(p) => match serde_json::from_value(p) {
                Ok(p) => p,
                Err(e) => {
                    return JsonRpcResponse::error(id, -32602, format!("Invalid params: {e}"))
                }
            },
            None => ListToolsParams::default(),
        };

        let email = self.effective_email(params.meta.as_ref(), ctx);
        let visible = match self
            .context
            .acl
            .filter_tools(self.catalog.names(), email.as_deref())
            .await
        {
            Ok(names) => names,
            Err(e) => return JsonRpcResponse::error(id, -32603, e.to_string()),
        };

        let tools: Vec<&ToolDefinition> = self
            .catalog
            .definitions()
            .into_iter()
            .filter(|d| visible.contains(&d.name.as_str()))
            .collect();

        tracing::debug!(
            visible = tools.len(),
            email = %email.as_deref().map(mask_email).unwrap_or_default(),
            "answered tools/list"
        );

        JsonRpcResponse::success(id, json!({ "tools": tools }))
    }

    async fn handle_call_tool(
        &self,
        id: Option<Value>,
        params: Option<Value>,
        ctx: &RequestContext,
    ) -> JsonRpcResponse {
        let params: CallToolParams = match params {
            Some(p) => match serde_json::from_value(p) {
                Ok(p) => p,
                Err(e) => {
                    return JsonRpcResponse::error(id, -32602, format!("Invalid params: {e}"))
                }
            },
            None => return JsonRpcResponse::error(id, -32602, "Missing params"),
        };

        if self.catalog.get(&params.name).is_none() {
            return JsonRpcResponse::error(
                id,
                -32602,
                format!("Tool not found: {}", params.name),
            );
        }

        let email = self.effective_email(params.meta.as_ref(), ctx);
        let result = self.gated_call(&params.name, params.arguments, email).await;

        match serde_json::to_value(&result) {
            Ok(v) => JsonRpcResponse::success(id, v),
            Err(e) => JsonRpcResponse::error(id, -32603, e.to_string()),
        }
    }

    /// The common gate: ACL check, input validation, handler body.
    /// Every failure becomes an `isError` result with a textual
    /// message; the call itself always "succeeds" at the RPC level.
    pub async fn gated_call(
        &self,
        name: &str,
        arguments: Value,
        email: Option<String>,
    ) -> CallToolResult {
        let decision = match self
            .context
            .acl
            .check_tool_access(name, email.as_deref())
            .await
        {
            Ok(d) => d,
            Err(e) => return CallToolResult::error(e.to_string()),
        };
        if !decision.allowed {
            tracing::info!(
                tool = name,
                email = %email.as_deref().map(mask_email).unwrap_or_default(),
                reason = %decision.reason,
                "tool access denied"
            );
            return CallToolResult::error(decision.reason);
        }

        if let Err(e) = self.catalog.validate_input(name, &arguments) {
            return CallToolResult::error(e.to_string());
        }

        // The existence check ran in handle_call_tool; gated_call is
        // also used directly by tests and the stdio path.
        let Some(spec) = self.catalog.get(name) else {
            return CallToolResult::error(format!("Tool not found: {name}"));
        };

        match spec.invoke(self.context.clone(), arguments).await {
            Ok(text) => CallToolResult::text(text),
            Err(e) => CallToolResult::error(e.to_string()),
        }
    }

    /// Run the pipe transport: line-delimited JSON-RPC on
    /// stdin/stdout, a single peer, identity from the environment
    /// fallback.
    pub async fn run_stdio(&self) -> Result<(), McpError> {
        tracing::info!("MCP server listening on stdio");

        let ctx = RequestContext::default();
        let stdin = std::io::stdin();
        let stdout = std::io::stdout();
        let mut stdout_lock = stdout.lock();

        for line in stdin.lock().lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }

            let request: JsonRpcRequest = match serde_json::from_str(&line) {
                Ok(r) => r,
                Err(e) => {
                    let response = JsonRpcResponse::error(None, -32700, format!("Parse error: {e}"));
                    writeln!(stdout_lock, "{}", serde_json::to_string(&response)?)?;
                    stdout_lock.flush()?;
                    continue;
                }
            };

            let is_notification = request.id.is_none();
            let response = self.handle_request(request, &ctx).await;
            if !is_notification {
                writeln!(stdout_lock, "{}", serde_json::to_string(&response)?)?;
                stdout_lock.flush()?;
            }
        }

        Ok(())
    }
}
