//! Stored record shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sift_core::ChatMessage;

/// A conversation session owned by one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One transcript entry with its storage metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub session_id: String,
    #[serde(flatten)]
    pub message: ChatMessage,
    pub created_at: DateTime<Utc>,
}

/// An opaque bearer token bound to a staff identity. No expiry; lives
/// until logout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSession {
    pub token: String,
    pub user_id: String,
    pub email: String,
    pub name: Option<String>,
    pub picture: Option<String>,
    pub created_at: DateTime<Utc>,
}
