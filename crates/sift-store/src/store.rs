//! SQLite-backed document store.

use crate::models::{AuthSession, Session, StoredMessage};
use chrono::{DateTime, Utc};
use sift_core::{ChatMessage, UserIdentity};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use uuid::Uuid;

/// Errors surfaced by the document store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("invalid document store URL: {0}")]
    BadUrl(String),

    #[error("malformed stored message {id}: {reason}")]
    Malformed { id: i64, reason: String },

    #[error("session not found: {0}")]
    SessionNotFound(String),
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    session_id TEXT PRIMARY KEY,
    user_id    TEXT NOT NULL,
    title      TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sessions_user_updated
    ON sessions (user_id, updated_at DESC);

CREATE TABLE IF NOT EXISTS messages (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id  TEXT NOT NULL,
    role        TEXT NOT NULL,
    content     TEXT NOT NULL DEFAULT '',
    tool_name   TEXT,
    tool_input  TEXT,
    tool_use_id TEXT,
    created_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_session_created
    ON messages (session_id, created_at);

CREATE TABLE IF NOT EXISTS auth_sessions (
    token      TEXT PRIMARY KEY,
    user_id    TEXT NOT NULL,
    email      TEXT NOT NULL UNIQUE,
    name       TEXT,
    picture    TEXT,
    created_at TEXT NOT NULL
);
"#;

/// The shared document-store handle.
#[derive(Clone)]
pub struct DocStore {
    pool: SqlitePool,
}

impl DocStore {
    /// Open (creating if missing) and ensure the schema and indexes
    /// exist.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::BadUrl(e.to_string()))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// In-memory store for tests. A single connection keeps the shared
    /// memory database alive.
    pub async fn connect_in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        for stmt in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        tracing::debug!("document store schema ensured");
        Ok(())
    }

    /// Close the underlying pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ---- conversation sessions ----

    /// Create a session for a user. Title defaults to "New Chat".
    pub async fn create_session(
        &self,
        user_id: &str,
        title: Option<&str>,
    ) -> Result<Session, StoreError> {
        let now = Utc::now();
        let session = Session {
            session_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: title.unwrap_or("New Chat").to_string(),
            created_at: now,
            updated_at: now,
        };
        sqlx::query(
            "INSERT INTO sessions (session_id, user_id, title, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&session.session_id)
        .bind(&session.user_id)
        .bind(&session.title)
        .bind(fmt_ts(&session.created_at))
        .bind(fmt_ts(&session.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(session)
    }

    /// Fetch one session by id.
    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query(
            "SELECT session_id, user_id, title, created_at, updated_at
             FROM sessions WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(session_from_row).transpose()
    }

    /// List a user's sessions, most recently updated first.
    pub async fn list_sessions(&self, user_id: &str) -> Result<Vec<Session>, StoreError> {
        let rows = sqlx::query(
            "SELECT session_id, user_id, title, created_at, updated_at
             FROM sessions WHERE user_id = $1
             ORDER BY updated_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(session_from_row).collect()
    }

    /// Delete a session and all of its messages.
    pub async fn delete_session(&self, session_id: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM messages WHERE session_id = $1")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM sessions WHERE session_id = $1")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Retitle a session, advancing `updated_at`.
    pub async fn set_title(&self, session_id: &str, title: &str) -> Result<(), StoreError> {
        let res = sqlx::query(
            "UPDATE sessions SET title = $1, updated_at = $2 WHERE session_id = $3",
        )
        .bind(title)
        .bind(fmt_ts(&Utc::now()))
        .bind(session_id)
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::SessionNotFound(session_id.to_string()));
        }
        Ok(())
    }

    // ---- messages ----

    /// Append one message and touch the parent session's `updated_at`
    /// in the same transaction.
    pub async fn append_message(
        &self,
        session_id: &str,
        message: &ChatMessage,
    ) -> Result<StoredMessage, StoreError> {
        let now = Utc::now();
        let (content, tool_name, tool_input, tool_use_id) = match message {
            ChatMessage::User { content } | ChatMessage::Assistant { content } => {
                (content.clone(), None, None, None)
            }
            ChatMessage::ToolUse {
                tool_name,
                tool_input,
                tool_use_id,
            } => (
                String::new(),
                Some(tool_name.clone()),
                Some(tool_input.to_string()),
                Some(tool_use_id.clone()),
            ),
            ChatMessage::ToolResult {
                tool_use_id,
                content,
            } => (content.clone(), None, None, Some(tool_use_id.clone())),
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO messages (session_id, role, content, tool_name, tool_input, tool_use_id, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(session_id)
        .bind(message.role())
        .bind(&content)
        .bind(&tool_name)
        .bind(&tool_input)
        .bind(&tool_use_id)
        .bind(fmt_ts(&now))
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE sessions SET updated_at = $1 WHERE session_id = $2")
            .bind(fmt_ts(&now))
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(StoredMessage {
            session_id: session_id.to_string(),
            message: message.clone(),
            created_at: now,
        })
    }

    /// Fetch a session's transcript in order: `created_at`, then
    /// insertion order for ties.
    pub async fn list_messages(&self, session_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, session_id, role, content, tool_name, tool_input, tool_use_id, created_at
             FROM messages WHERE session_id = $1
             ORDER BY created_at ASC, id ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(message_from_row).collect()
    }

    /// Number of messages in a session.
    pub async fn count_messages(&self, session_id: &str) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM messages WHERE session_id = $1")
            .bind(session_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n"))
    }

    // ---- auth sessions ----

    /// Create or refresh the auth session for an identity.
    ///
    /// One session per email: if one exists, its profile fields are
    /// refreshed and its token is preserved; `candidate_token` is only
    /// used when no session exists yet.
    pub async fn upsert_auth_session(
        &self,
        user: &UserIdentity,
        candidate_token: &str,
    ) -> Result<AuthSession, StoreError> {
        if let Some(existing) = self.find_auth_session_by_email(&user.email).await? {
            sqlx::query("UPDATE auth_sessions SET name = $1, picture = $2 WHERE email = $3")
                .bind(&user.name)
                .bind(&user.picture)
                .bind(&user.email)
                .execute(&self.pool)
                .await?;
            return Ok(AuthSession {
                name: user.name.clone(),
                picture: user.picture.clone(),
                ..existing
            });
        }

        let now = Utc::now();
        sqlx::query(
            "INSERT INTO auth_sessions (token, user_id, email, name, picture, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(candidate_token)
        .bind(&user.user_id)
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.picture)
        .bind(fmt_ts(&now))
        .execute(&self.pool)
        .await?;

        Ok(AuthSession {
            token: candidate_token.to_string(),
            user_id: user.user_id.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            picture: user.picture.clone(),
            created_at: now,
        })
    }

    /// O(1) token lookup (primary key index).
    pub async fn find_auth_session_by_token(
        &self,
        token: &str,
    ) -> Result<Option<AuthSession>, StoreError> {
        let row = sqlx::query(
            "SELECT token, user_id, email, name, picture, created_at
             FROM auth_sessions WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        row.map(auth_session_from_row).transpose()
    }

    /// Unique email lookup.
    pub async fn find_auth_session_by_email(
        &self,
        email: &str,
    ) -> Result<Option<AuthSession>, StoreError> {
        let row = sqlx::query(
            "SELECT token, user_id, email, name, picture, created_at
             FROM auth_sessions WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        row.map(auth_session_from_row).transpose()
    }

    /// Delete by token (logout).
    pub async fn delete_auth_session(&self, token: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM auth_sessions WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// RFC 3339 with microseconds; lexicographic order matches time order.
fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Malformed {
            id: 0,
            reason: format!("bad timestamp {:?}: {}", raw, e),
        })
}

fn session_from_row(row: SqliteRow) -> Result<Session, StoreError> {
    Ok(Session {
        session_id: row.get("session_id"),
        user_id: row.get("user_id"),
        title: row.get("title"),
        created_at: parse_ts(&row.get::<String, _>("created_at"))?,
        updated_at: parse_ts(&row.get::<String, _>("updated_at"))?,
    })
}

fn auth_session_from_row(row: SqliteRow) -> Result<AuthSession, StoreError> {
    Ok(AuthSession {
        token: row.get("token"),
        user_id: row.get("user_id"),
        email: row.get("email"),
        name: row.get("name"),
        picture: row.get("picture"),
        created_at: parse_ts(&row.get::<String, _>("created_at"))?,
    })
}

fn message_from_row(row: SqliteRow) -> Result<StoredMessage, StoreError> {
    let id: i64 = row.get("id");
    let role: String = row.get("role");
    let content: String = row.get("content");
    let tool_name: Option<String> = row.get("tool_name");
    let tool_input: Option<String> = row.get("tool_input");
    let tool_use_id: Option<String> = row.get("tool_use_id");

    let malformed = |reason: &str| StoreError::Malformed {
        id,
        reason: reason.to_string(),
    };

    let message = match role.as_str() {
        "user" => ChatMessage::User { content },
        "assistant" => ChatMessage::Assistant { content },
        "tool_use" => ChatMessage::ToolUse {
            tool_name: tool_name.ok_or_else(|| malformed("tool_use without tool_name"))?,
            tool_input: tool_input
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .map_err(|e| malformed(&format!("bad tool_input: {e}")))?
                .unwrap_or(serde_json::Value::Null),
            tool_use_id: tool_use_id.ok_or_else(|| malformed("tool_use without tool_use_id"))?,
        },
        "tool_result" => ChatMessage::ToolResult {
            tool_use_id: tool_use_id.ok_or_else(|| malformed("tool_result without tool_use_id"))?,
            content,
        },
        other => return Err(malformed(&format!("unknown role {:?}", other))),
    };

    Ok(StoredMessage {
        session_id: row.get("session_id"),
        message,
        created_at: parse_ts(&row.get::<String, _>("created_at"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sift_core::UserIdentity;

    async fn store() -> DocStore {
        DocStore::connect_in_memory().await.unwrap()
    }

    fn identity(email: &str) -> UserIdentity {
        UserIdentity::from_profile(email, Some("Test".into()), None)
    }

    #[tokio::test]
    async fn create_and_list_sessions_orders_by_updated_at() {
        let store = store().await;
        let a = store.create_session("u1", Some("first")).await.unwrap();
        let b = store.create_session("u1", Some("second")).await.unwrap();
        store.create_session("u2", Some("other user")).await.unwrap();

        // Touch `a` so it becomes the most recently updated.
        store
            .append_message(&a.session_id, &ChatMessage::user("hi"))
            .await
            .unwrap();

        let listed = store.list_sessions("u1").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].session_id, a.session_id);
        assert_eq!(listed[1].session_id, b.session_id);
    }

    #[tokio::test]
    async fn append_touches_updated_at() {
        let store = store().await;
        let s = store.create_session("u1", None).await.unwrap();
        store
            .append_message(&s.session_id, &ChatMessage::user("hello"))
            .await
            .unwrap();
        let after = store.get_session(&s.session_id).await.unwrap().unwrap();
        assert!(after.updated_at >= s.updated_at);
    }

    #[tokio::test]
    async fn messages_round_trip_all_variants_in_order() {
        let store = store().await;
        let s = store.create_session("u1", None).await.unwrap();

        let msgs = vec![
            ChatMessage::user("hi"),
            ChatMessage::assistant("checking"),
            ChatMessage::tool_use("query", json!({"sql": "SELECT 1"}), "u1"),
            ChatMessage::tool_result("u1", "1"),
            ChatMessage::assistant("one"),
        ];
        for m in &msgs {
            store.append_message(&s.session_id, m).await.unwrap();
        }

        let stored = store.list_messages(&s.session_id).await.unwrap();
        let roundtrip: Vec<ChatMessage> = stored.into_iter().map(|m| m.message).collect();
        assert_eq!(roundtrip, msgs);
    }

    #[tokio::test]
    async fn tool_use_and_results_stay_in_bijection() {
        let store = store().await;
        let s = store.create_session("u1", None).await.unwrap();
        for i in 0..3 {
            let id = format!("use-{i}");
            store
                .append_message(&s.session_id, &ChatMessage::tool_use("query", json!({}), &id))
                .await
                .unwrap();
            store
                .append_message(&s.session_id, &ChatMessage::tool_result(&id, "ok"))
                .await
                .unwrap();
        }

        let stored = store.list_messages(&s.session_id).await.unwrap();
        let uses: Vec<String> = stored
            .iter()
            .filter_map(|m| match &m.message {
                ChatMessage::ToolUse { tool_use_id, .. } => Some(tool_use_id.clone()),
                _ => None,
            })
            .collect();
        let results: Vec<String> = stored
            .iter()
            .filter_map(|m| match &m.message {
                ChatMessage::ToolResult { tool_use_id, .. } => Some(tool_use_id.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(uses, results);
    }

    #[tokio::test]
    async fn delete_session_cascades_to_messages() {
        let store = store().await;
        let s = store.create_session("u1", None).await.unwrap();
        store
            .append_message(&s.session_id, &ChatMessage::user("hi"))
            .await
            .unwrap();
        store.delete_session(&s.session_id).await.unwrap();

        assert!(store.get_session(&s.session_id).await.unwrap().is_none());
        assert_eq!(store.count_messages(&s.session_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn auth_session_upsert_preserves_token() {
        let store = store().await;
        let first = store
            .upsert_auth_session(&identity("a@x.io"), "token-1")
            .await
            .unwrap();
        assert_eq!(first.token, "token-1");

        let mut refreshed = identity("a@x.io");
        refreshed.name = Some("New Name".into());
        let second = store
            .upsert_auth_session(&refreshed, "token-2")
            .await
            .unwrap();
        assert_eq!(second.token, "token-1");
        assert_eq!(second.name.as_deref(), Some("New Name"));

        let by_token = store
            .find_auth_session_by_token("token-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_token.name.as_deref(), Some("New Name"));
    }

    #[tokio::test]
    async fn logout_deletes_by_token() {
        let store = store().await;
        store
            .upsert_auth_session(&identity("a@x.io"), "tok")
            .await
            .unwrap();
        store.delete_auth_session("tok").await.unwrap();
        assert!(store
            .find_auth_session_by_token("tok")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn token_uniqueness_is_engine_enforced() {
        // The token column is the primary key; reusing one for a
        // different email must fail at the engine, not silently
        // overwrite.
        let store = store().await;
        store
            .upsert_auth_session(&identity("a@x.io"), "same-token")
            .await
            .unwrap();
        let res = store
            .upsert_auth_session(&identity("b@x.io"), "same-token")
            .await;
        assert!(matches!(res, Err(StoreError::Sql(_))));
    }

    #[tokio::test]
    async fn set_title_on_missing_session_errors() {
        let store = store().await;
        let res = store.set_title("nope", "title").await;
        assert!(matches!(res, Err(StoreError::SessionNotFound(_))));
    }
}
