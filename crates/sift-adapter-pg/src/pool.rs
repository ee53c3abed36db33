//! The bounded read-only connection pool.

use crate::rows::row_to_json;
use serde::Serialize;
use serde_json::Value;
use sift_core::AppConfig;
use sqlx::postgres::{PgArguments, PgPoolOptions};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Transaction};

/// Errors surfaced by the relational adapter.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// No connection became available within the acquire deadline.
    #[error("connection pool exhausted: no connection available within the acquire deadline")]
    Exhausted,

    /// A parameter value the binder cannot represent.
    #[error("unsupported query parameter at position {position}: {reason}")]
    UnsupportedParam { position: usize, reason: String },

    /// Any other database failure.
    #[error("database error: {0}")]
    Sql(#[from] sqlx::Error),
}

/// Result of a read-only query.
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutput {
    #[serde(rename = "rowCount")]
    pub row_count: usize,
    pub rows: Vec<Value>,
    /// Set when the row cap cut the result short.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncated: Option<bool>,
}

/// Bounded pool over the primary store. All statements run inside
/// transactions declared `READ ONLY` at the engine level.
#[derive(Clone)]
pub struct ReadOnlyPg {
    pool: PgPool,
    row_cap: usize,
}

impl ReadOnlyPg {
    /// Connect using the pool settings from [`AppConfig`].
    pub async fn connect(cfg: &AppConfig) -> Result<Self, PoolError> {
        let pool = PgPoolOptions::new()
            .max_connections(cfg.pg_max_connections)
            .acquire_timeout(cfg.pg_acquire_timeout)
            .idle_timeout(cfg.pg_idle_timeout)
            .connect(&cfg.database_url)
            .await?;
        Ok(Self {
            pool,
            row_cap: cfg.query_row_cap,
        })
    }

    /// Wrap an existing pool (tests, tooling).
    pub fn from_pool(pool: PgPool, row_cap: usize) -> Self {
        Self { pool, row_cap }
    }

    /// Open a transaction and declare it read-only before anything else
    /// runs in it.
    pub async fn begin_read_only(&self) -> Result<Transaction<'static, Postgres>, PoolError> {
        let mut tx = self.pool.begin().await.map_err(map_acquire_err)?;
        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    /// Execute one statement with positional JSON parameters inside its
    /// own read-only transaction. Commits on success, rolls back on any
    /// error.
    pub async fn execute_read_only(
        &self,
        sql: &str,
        params: &[Value],
    ) -> Result<QueryOutput, PoolError> {
        let mut tx = self.begin_read_only().await?;

        let query = bind_params(sqlx::query(sql), params)?;
        let fetched = query.fetch_all(&mut *tx).await;

        let rows = match fetched {
            Ok(rows) => {
                tx.commit().await?;
                rows
            }
            Err(e) => {
                // Rollback failures are secondary to the original error.
                let _ = tx.rollback().await;
                return Err(PoolError::Sql(e));
            }
        };

        let total = rows.len();
        let truncated = total > self.row_cap;
        let rows: Vec<Value> = rows.iter().take(self.row_cap).map(row_to_json).collect();

        tracing::debug!(row_count = total, truncated, "read-only query finished");

        Ok(QueryOutput {
            row_count: rows.len(),
            rows,
            truncated: truncated.then_some(true),
        })
    }

    /// Close the pool, waiting for in-flight statements.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn map_acquire_err(e: sqlx::Error) -> PoolError {
    match e {
        sqlx::Error::PoolTimedOut => PoolError::Exhausted,
        other => PoolError::Sql(other),
    }
}

/// Bind JSON scalars positionally. Arrays and objects bind as `jsonb`;
/// the tool layer never interpolates values into SQL text.
fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &'q [Value],
) -> Result<Query<'q, Postgres, PgArguments>, PoolError> {
    for (i, param) in params.iter().enumerate() {
        query = match param {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Number(n) => {
                if let Some(v) = n.as_i64() {
                    query.bind(v)
                } else if let Some(v) = n.as_f64() {
                    query.bind(v)
                } else {
                    return Err(PoolError::UnsupportedParam {
                        position: i + 1,
                        reason: format!("numeric value {} out of range", n),
                    });
                }
            }
            Value::String(s) => query.bind(s.as_str()),
            other @ (Value::Array(_) | Value::Object(_)) => query.bind(other),
        };
    }
    Ok(query)
}
