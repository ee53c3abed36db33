//! The user-facing REST surface.

use crate::auth::{self, CurrentUser};
use crate::error::ApiError;
use crate::state::SharedContext;
use axum::extract::{Path, Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use sift_agent::TurnOutcome;
use sift_store::Session;
use tower_http::trace::TraceLayer;
use tracing::Instrument;
use uuid::Uuid;

/// Build the HTTP application.
pub fn router(ctx: SharedContext) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/auth/google", post(auth::login))
        .route("/auth/me", get(auth::me))
        .route("/auth/logout", post(auth::logout))
        .route("/sessions", get(list_sessions).post(create_session))
        .route("/sessions/{id}", get(get_session).delete(delete_session))
        .route("/sessions/{id}/messages", post(post_message))
        .layer(axum::middleware::from_fn_with_state(
            ctx.clone(),
            auth::auth_gate,
        ))
        .layer(axum::middleware::from_fn(correlation_id))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Tag every request with a correlation id: a span for the trace
/// pipeline, a response header for the client.
async fn correlation_id(request: Request, next: Next) -> Response {
    let id = Uuid::new_v4().to_string();
    let span = tracing::info_span!(
        "http_request",
        correlation_id = %id,
        method = %request.method(),
        path = %request.uri().path(),
    );
    let mut response = next.run(request).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": true, "service": "sift-server" }))
}

async fn list_sessions(
    State(ctx): State<SharedContext>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<Vec<Session>>, ApiError> {
    Ok(Json(ctx.store.list_sessions(&user.user_id).await?))
}

#[derive(Debug, Deserialize)]
struct CreateSessionRequest {
    #[serde(default)]
    title: Option<String>,
}

async fn create_session(
    State(ctx): State<SharedContext>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(body): Json<CreateSessionRequest>,
) -> Result<Json<Session>, ApiError> {
    let session = ctx
        .store
        .create_session(&user.user_id, body.title.as_deref())
        .await?;
    Ok(Json(session))
}

/// Load a session and verify ownership; missing and foreign sessions
/// are indistinguishable to the caller.
async fn owned_session(
    ctx: &SharedContext,
    user_id: &str,
    session_id: &str,
) -> Result<Session, ApiError> {
    let session = ctx
        .store
        .get_session(session_id)
        .await?
        .filter(|s| s.user_id == user_id)
        .ok_or_else(|| ApiError::NotFound(format!("session {session_id}")))?;
    Ok(session)
}

async fn get_session(
    State(ctx): State<SharedContext>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let session = owned_session(&ctx, &user.user_id, &id).await?;
    let messages = ctx.store.list_messages(&id).await?;
    Ok(Json(json!({ "session": session, "messages": messages })))
}

async fn delete_session(
    State(ctx): State<SharedContext>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    owned_session(&ctx, &user.user_id, &id).await?;
    ctx.store.delete_session(&id).await?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
struct PostMessageRequest {
    message: String,
}

async fn post_message(
    State(ctx): State<SharedContext>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(body): Json<PostMessageRequest>,
) -> Result<Json<TurnOutcome>, ApiError> {
    if body.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".to_string()));
    }
    owned_session(&ctx, &user.user_id, &id).await?;
    let outcome = ctx.orchestrator.run_turn(&id, &body.message).await?;
    Ok(Json(outcome))
}
