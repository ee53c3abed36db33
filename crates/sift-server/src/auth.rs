//! Session and auth layer.
//!
//! Login turns the identity provider's opaque base64 JSON profile into
//! an auth session gated by the staff allow-list. Everything outside
//! the public routes must carry `Authorization: Bearer <token>`; the
//! gate middleware resolves the token and attaches the caller to the
//! request.

use crate::error::ApiError;
use crate::state::SharedContext;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::Response;
use axum::Json;
use base64::Engine;
use rand::RngCore;
use serde::Deserialize;
use serde_json::{json, Value};
use sift_core::{mask_email, normalize_email, UserIdentity};
use sift_store::AuthSession;

/// Routes reachable without a bearer token.
const PUBLIC_PREFIXES: [&str; 2] = ["/auth/", "/health"];

fn is_public(path: &str) -> bool {
    PUBLIC_PREFIXES
        .iter()
        .any(|p| path == p.trim_end_matches('/') || path.starts_with(p))
}

/// The authenticated caller, attached to the request by the gate.
#[derive(Clone)]
pub struct CurrentUser(pub AuthSession);

/// Bearer-token gate. Public routes pass through untouched; everything
/// else 401s unless the token resolves to a live auth session.
pub async fn auth_gate(
    State(ctx): State<SharedContext>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if is_public(request.uri().path()) {
        return Ok(next.run(request).await);
    }

    let session = session_from_headers(&ctx, request.headers()).await?;
    request.extensions_mut().insert(CurrentUser(session));
    Ok(next.run(request).await)
}

/// Resolve the bearer token from headers into an auth session.
pub async fn session_from_headers(
    ctx: &SharedContext,
    headers: &HeaderMap,
) -> Result<AuthSession, ApiError> {
    let token = bearer_token(headers).ok_or(ApiError::Unauthorized)?;
    ctx.store
        .find_auth_session_by_token(&token)
        .await?
        .ok_or(ApiError::Unauthorized)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(rename = "userProfile")]
    pub user_profile: String,
}

/// `POST /auth/google`.
///
/// The body carries the provider's base64-encoded JSON profile. The
/// profile's email must match an active staff record; the resulting
/// session token is stable across repeat logins for the same email.
pub async fn login(
    State(ctx): State<SharedContext>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<Value>, ApiError> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(body.user_profile.trim())
        .map_err(|e| ApiError::BadRequest(format!("user profile is not valid base64: {e}")))?;
    let profile: Value = serde_json::from_slice(&decoded)
        .map_err(|e| ApiError::BadRequest(format!("user profile is not valid JSON: {e}")))?;

    let email = profile
        .get("email")
        .and_then(Value::as_str)
        .map(normalize_email)
        .filter(|e| !e.is_empty())
        .ok_or_else(|| ApiError::BadRequest("user profile has no email".to_string()))?;

    let staff = ctx
        .acl
        .resolve_acls(&email)
        .await?
        .ok_or_else(|| ApiError::Forbidden("not a registered staff member".to_string()))?;
    if !staff.active {
        return Err(ApiError::Forbidden("staff account is inactive".to_string()));
    }

    let user = UserIdentity::from_profile(
        &email,
        profile.get("name").and_then(Value::as_str).map(String::from),
        profile
            .get("picture")
            .and_then(Value::as_str)
            .map(String::from),
    );

    let session = ctx
        .store
        .upsert_auth_session(&user, &generate_token())
        .await?;

    tracing::info!(email = %mask_email(&session.email), "login succeeded");
    Ok(Json(json!({ "token": session.token, "user": user })))
}

/// `GET /auth/me`.
pub async fn me(
    State(ctx): State<SharedContext>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let session = session_from_headers(&ctx, &headers).await?;
    Ok(Json(json!({
        "user": {
            "user_id": session.user_id,
            "email": session.email,
            "name": session.name,
            "picture": session.picture,
        }
    })))
}

/// `POST /auth/logout`. The client is logged out regardless of
/// whether a session existed server-side.
pub async fn logout(
    State(ctx): State<SharedContext>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    if let Some(token) = bearer_token(&headers) {
        ctx.store.delete_auth_session(&token).await?;
    }
    Ok(Json(json!({ "ok": true })))
}

/// 32 random bytes from the OS, hex-encoded.
fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_route_matching() {
        assert!(is_public("/health"));
        assert!(is_public("/auth/google"));
        assert!(is_public("/auth/me"));
        assert!(!is_public("/sessions"));
        assert!(!is_public("/sessions/abc/messages"));
        assert!(!is_public("/authx"));
    }

    #[test]
    fn tokens_are_long_and_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn bearer_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer abc123".parse().unwrap());
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc123"));

        headers.insert(header::AUTHORIZATION, "Basic abc123".parse().unwrap());
        assert!(bearer_token(&headers).is_none());

        headers.insert(header::AUTHORIZATION, "Bearer   ".parse().unwrap());
        assert!(bearer_token(&headers).is_none());
    }
}
