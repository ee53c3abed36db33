//! Outbound MCP client bridge.
//!
//! One SSE connection to a peer MCP server: `GET /sse` yields the
//! event stream, the server's first `endpoint` event names the URL to
//! POST frames to, and responses come back over the stream correlated
//! by request id. The tool list is fetched once on connect and cached;
//! `reconnect` and `refresh_tools` are explicit.

use crate::error::McpError;
use crate::protocol::{
    CallToolResult, JsonRpcRequest, JsonRpcResponse, ListToolsResult, ToolDefinition,
};
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// One parsed SSE event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: Option<String>,
}

/// Incremental SSE wire parser: feed it byte chunks, get events out.
#[derive(Default)]
struct SseParser {
    buffer: String,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    fn push_chunk(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            if let Some(event) = self.push_line(line.trim_end_matches(['\r', '\n'])) {
                events.push(event);
            }
        }
        events
    }

    fn push_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            if self.event.is_none() && self.data.is_empty() {
                return None;
            }
            let event = SseEvent {
                event: self.event.take(),
                data: if self.data.is_empty() {
                    None
                } else {
                    Some(self.data.drain(..).collect::<Vec<_>>().join("\n"))
                },
            };
            return Some(event);
        }
        if let Some(rest) = line.strip_prefix("event:") {
            self.event = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            self.data.push(rest.trim_start().to_string());
        }
        // Comments (`:`) and other fields are ignored.
        None
    }
}

/// Resolve the endpoint URL the server advertised, relative to the
/// SSE base URL's origin when it is not absolute.
fn resolve_endpoint_url(base_url: &str, endpoint: &str) -> String {
    let endpoint = endpoint.trim();
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return endpoint.to_string();
    }
    let origin = base_url
        .find("://")
        .and_then(|scheme_end| {
            base_url[scheme_end + 3..]
                .find('/')
                .map(|path_start| &base_url[..scheme_end + 3 + path_start])
        })
        .unwrap_or(base_url);
    if endpoint.starts_with('/') {
        format!("{origin}{endpoint}")
    } else {
        format!("{origin}/{endpoint}")
    }
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

struct Connection {
    endpoint: String,
    pending: PendingMap,
    cancel: CancellationToken,
}

/// The MCP client bridge.
pub struct McpClient {
    base_url: String,
    user_email: Option<String>,
    http: reqwest::Client,
    connection: Mutex<Option<Connection>>,
    tools: RwLock<Vec<ToolDefinition>>,
    next_id: AtomicU64,
}

impl McpClient {
    /// Create a disconnected bridge. `user_email` is sent as the
    /// `X-User-Email` session header on connect.
    pub fn new(base_url: impl Into<String>, user_email: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            user_email,
            http: reqwest::Client::new(),
            connection: Mutex::new(None),
            tools: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Establish the SSE connection, perform the initialize handshake
    /// and cache the peer's tool list.
    pub async fn connect(&self) -> Result<(), McpError> {
        self.open_stream().await?;

        self.request(
            "initialize",
            Some(json!({
                "protocolVersion": "2024-11-05",
                "clientInfo": { "name": "sift-agent", "version": env!("CARGO_PKG_VERSION") },
                "capabilities": {}
            })),
        )
        .await?;
        self.notify("notifications/initialized", None).await?;

        self.refresh_tools().await?;
        Ok(())
    }

    /// Tear down any existing connection and connect again.
    pub async fn reconnect(&self) -> Result<(), McpError> {
        self.close().await;
        self.connect().await
    }

    /// Close the connection, cancelling the reader task.
    pub async fn close(&self) {
        if let Some(conn) = self.connection.lock().await.take() {
            conn.cancel.cancel();
        }
    }

    /// Re-fetch and cache the peer's tool list.
    pub async fn refresh_tools(&self) -> Result<(), McpError> {
        let result = self.request("tools/list", None).await?;
        let listed: ListToolsResult = serde_json::from_value(result)?;
        debug!(tool_count = listed.tools.len(), "cached peer tool list");
        *self.tools.write().await = listed.tools;
        Ok(())
    }

    /// The cached tool list.
    pub async fn cached_tools(&self) -> Vec<ToolDefinition> {
        self.tools.read().await.clone()
    }

    /// Invoke a tool on the peer and join the text blocks of the
    /// result. An `isError` result surfaces as `ToolFailed`.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<String, McpError> {
        let result = self
            .request("tools/call", Some(json!({ "name": name, "arguments": arguments })))
            .await?;
        let call_result: CallToolResult = serde_json::from_value(result)?;
        let text = call_result.joined_text();
        if call_result.is_error == Some(true) {
            return Err(McpError::ToolFailed(text));
        }
        Ok(text)
    }

    /// Open the SSE stream and wait for the `endpoint` event.
    async fn open_stream(&self) -> Result<(), McpError> {
        let mut request = self
            .http
            .get(&self.base_url)
            .header("Accept", "text/event-stream");
        if let Some(email) = &self.user_email {
            request = request.header("X-User-Email", email);
        }

        let response = request
            .send()
            .await
            .map_err(|e| McpError::Transport(format!("SSE connect failed: {e}")))?;
        if !response.status().is_success() {
            return Err(McpError::Transport(format!(
                "SSE connect returned status {}",
                response.status()
            )));
        }

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();
        let (endpoint_tx, endpoint_rx) = oneshot::channel::<String>();

        let reader_pending = pending.clone();
        let reader_cancel = cancel.clone();
        let base_url = self.base_url.clone();
        tokio::spawn(async move {
            run_reader(
                response,
                base_url,
                reader_pending,
                endpoint_tx,
                reader_cancel,
            )
            .await;
        });

        let endpoint = tokio::time::timeout(CONNECT_TIMEOUT, endpoint_rx)
            .await
            .map_err(|_| McpError::Transport("timed out waiting for endpoint event".into()))?
            .map_err(|_| McpError::Transport("stream closed before endpoint event".into()))?;
        debug!(endpoint = %endpoint, "SSE endpoint discovered");

        *self.connection.lock().await = Some(Connection {
            endpoint,
            pending,
            cancel,
        });
        Ok(())
    }

    async fn current_connection(&self) -> Result<(String, PendingMap), McpError> {
        let guard = self.connection.lock().await;
        let conn = guard
            .as_ref()
            .ok_or_else(|| McpError::Transport("not connected".into()))?;
        Ok((conn.endpoint.clone(), conn.pending.clone()))
    }

    /// Send a request frame and wait for the correlated response.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let (endpoint, pending) = self.current_connection().await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let (tx, rx) = oneshot::channel();
        pending.lock().await.insert(id, tx);

        let frame = JsonRpcRequest::new(id, method, params);
        let posted = self.post_frame(&endpoint, &frame).await;
        if let Err(e) = posted {
            pending.lock().await.remove(&id);
            return Err(e);
        }

        let response = tokio::time::timeout(REQUEST_TIMEOUT, rx)
            .await
            .map_err(|_| {
                McpError::Transport(format!("request {method} timed out"))
            })?
            .map_err(|_| McpError::Transport("connection closed mid-request".into()))?;

        if let Some(error) = response.error {
            return Err(McpError::Transport(format!(
                "peer returned error {}: {}",
                error.code, error.message
            )));
        }
        response
            .result
            .ok_or_else(|| McpError::Transport("response carried neither result nor error".into()))
    }

    /// Send a notification frame (no response expected).
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let (endpoint, _) = self.current_connection().await?;
        self.post_frame(&endpoint, &JsonRpcRequest::notification(method, params))
            .await
    }

    async fn post_frame(&self, endpoint: &str, frame: &JsonRpcRequest) -> Result<(), McpError> {
        let mut request = self.http.post(endpoint).json(frame);
        if let Some(email) = &self.user_email {
            request = request.header("X-User-Email", email);
        }
        let response = request
            .send()
            .await
            .map_err(|e| McpError::Transport(format!("POST to {endpoint} failed: {e}")))?;
        if !response.status().is_success() {
            return Err(McpError::Transport(format!(
                "POST to {endpoint} returned status {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Reader task: parse the byte stream into events, surface the
/// endpoint, route response frames to their waiters.
async fn run_reader(
    response: reqwest::Response,
    base_url: String,
    pending: PendingMap,
    endpoint_tx: oneshot::Sender<String>,
    cancel: CancellationToken,
) {
    let mut stream = response.bytes_stream();
    let mut parser = SseParser::default();
    let mut endpoint_tx = Some(endpoint_tx);

    loop {
        let chunk = tokio::select! {
            chunk = stream.next() => chunk,
            _ = cancel.cancelled() => break,
        };
        let Some(chunk) = chunk else {
            debug!("SSE stream ended");
            break;
        };
        let chunk = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("SSE stream error: {e}");
                break;
            }
        };

        for event in parser.push_chunk(&String::from_utf8_lossy(&chunk)) {
            route_event(event, &base_url, &pending, &mut endpoint_tx).await;
        }
    }

    // Wake every waiter with a closed channel.
    pending.lock().await.clear();
}

async fn route_event(
    event: SseEvent,
    base_url: &str,
    pending: &PendingMap,
    endpoint_tx: &mut Option<oneshot::Sender<String>>,
) {
    match event.event.as_deref() {
        Some("endpoint") => {
            if let (Some(tx), Some(data)) = (endpoint_tx.take(), event.data.as_deref()) {
                let _ = tx.send(resolve_endpoint_url(base_url, data));
            }
        }
        None | Some("message") => {
            let Some(data) = event.data.as_deref() else {
                return;
            };
            match serde_json::from_str::<JsonRpcResponse>(data) {
                Ok(frame) => {
                    let Some(id) = frame.id.as_ref().and_then(Value::as_u64) else {
                        return;
                    };
                    if let Some(waiter) = pending.lock().await.remove(&id) {
                        let _ = waiter.send(frame);
                    }
                }
                Err(e) => warn!("unparseable frame on SSE stream: {e}"),
            }
        }
        // Keep-alive pings and unknown event types are ignored.
        _ => {}
    }
}
