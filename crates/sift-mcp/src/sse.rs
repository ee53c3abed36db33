//! SSE server transport.
//!
//! `GET /sse` opens a long-lived event stream and registers a session:
//! a fresh handle, a frame channel, and the caller identity from the
//! `X-User-Email` header. The first event is `endpoint`, advertising
//! where to POST frames; every response frame then travels back over
//! the stream as a `message` event.
//!
//! `POST /messages?session_id=<id>` accepts one client frame, threads
//! that session's identity into the request context, and pushes the
//! response onto that session's stream. Identity lives on the session
//! entry and is only ever reached through the session handle, so
//! concurrent sessions with different users cannot cross.

use crate::error::McpError;
use crate::protocol::{JsonRpcRequest, JsonRpcResponse, RequestContext};
use crate::server::McpServer;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

struct SseSession {
    email: Option<String>,
    tx: mpsc::Sender<JsonRpcResponse>,
}

/// Shared state: the server plus the live session registry.
pub struct SseServerState {
    server: McpServer,
    sessions: RwLock<HashMap<String, SseSession>>,
}

impl SseServerState {
    pub fn new(server: McpServer) -> Arc<Self> {
        Arc::new(Self {
            server,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// Register a new session and hand back its handle and frame
    /// receiver.
    pub async fn register_session(
        &self,
        email: Option<String>,
    ) -> (String, mpsc::Receiver<JsonRpcResponse>) {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(64);
        self.sessions
            .write()
            .await
            .insert(id.clone(), SseSession { email, tx });
        tracing::debug!(session = %id, "SSE session opened");
        (id, rx)
    }

    /// Drop a session.
    pub async fn remove_session(&self, id: &str) {
        if self.sessions.write().await.remove(id).is_some() {
            tracing::debug!(session = %id, "SSE session closed");
        }
    }

    /// Handle one inbound frame for a session. The response frame is
    /// pushed onto that session's stream; notifications produce none.
    pub async fn handle_frame(
        &self,
        session_id: &str,
        request: JsonRpcRequest,
    ) -> Result<(), McpError> {
        let (email, tx) = {
            let sessions = self.sessions.read().await;
            let session = sessions
                .get(session_id)
                .ok_or_else(|| McpError::NotFound(format!("session {session_id}")))?;
            (session.email.clone(), session.tx.clone())
        };

        let is_notification = request.id.is_none();
        let ctx = RequestContext {
            session_email: email,
        };
        let response = self.server.handle_request(request, &ctx).await;

        if !is_notification && tx.send(response).await.is_err() {
            // Receiver gone: the stream was dropped mid-request.
            self.remove_session(session_id).await;
            return Err(McpError::Transport(format!(
                "session {session_id} is no longer connected"
            )));
        }
        Ok(())
    }
}

/// Build the transport router.
pub fn sse_router(state: Arc<SseServerState>) -> Router {
    Router::new()
        .route("/sse", get(handle_sse_open))
        .route("/messages", post(handle_message_post))
        .route("/health", get(handle_health))
        .with_state(state)
}

/// Removes the session when the stream is dropped.
struct SessionGuard {
    state: Arc<SseServerState>,
    id: String,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let state = self.state.clone();
        let id = self.id.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { state.remove_session(&id).await });
        }
    }
}

async fn handle_sse_open(
    State(state): State<Arc<SseServerState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let email = headers
        .get("x-user-email")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let (session_id, mut rx) = state.register_session(email).await;
    let endpoint = format!("/messages?session_id={session_id}");
    let guard = SessionGuard {
        state: state.clone(),
        id: session_id,
    };

    let stream = async_stream::stream! {
        let _guard = guard;
        yield Ok::<_, Infallible>(Event::default().event("endpoint").data(endpoint));
        while let Some(frame) = rx.recv().await {
            if let Ok(data) = serde_json::to_string(&frame) {
                yield Ok(Event::default().event("message").data(data));
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("ping"),
    )
}

#[derive(Debug, Deserialize)]
struct MessagesQuery {
    session_id: String,
}

async fn handle_message_post(
    State(state): State<Arc<SseServerState>>,
    Query(query): Query<MessagesQuery>,
    Json(request): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    match state.handle_frame(&query.session_id, request).await {
        Ok(()) => (StatusCode::ACCEPTED, Json(json!({ "status": "accepted" }))),
        Err(McpError::NotFound(msg)) => {
            (StatusCode::NOT_FOUND, Json(json!({ "error": msg })))
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

async fn handle_health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "sift-mcp",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
