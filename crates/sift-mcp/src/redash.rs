//! BI query store access.
//!
//! Fetches saved query definitions from a Redash-compatible HTTP API,
//! one id at a time, with the API key in a header. The id-list parser
//! is deliberately forgiving about separators.

use crate::error::McpError;
use serde::{Deserialize, Serialize};

/// Parse query ids from a free-form string. Accepts commas,
/// whitespace, or any mix; rejects anything that is not a number,
/// naming the offending token.
pub fn parse_query_ids(input: &str) -> Result<Vec<u32>, McpError> {
    let mut ids = Vec::new();
    for token in input.split(|c: char| c == ',' || c.is_whitespace()) {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        let id = token
            .parse::<u32>()
            .map_err(|_| McpError::InvalidQueryIds(format!("{token:?} is not a query id")))?;
        ids.push(id);
    }
    if ids.is_empty() {
        return Err(McpError::InvalidQueryIds(
            "no query ids found in input".to_string(),
        ));
    }
    Ok(ids)
}

/// A saved query as returned by `GET /api/queries/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedashQuery {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub query: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Client for the BI query store.
#[derive(Clone)]
pub struct RedashClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl RedashClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    /// Whether a base URL was configured at all.
    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty()
    }

    /// Fetch one saved query.
    pub async fn fetch_query(&self, id: u32) -> Result<RedashQuery, McpError> {
        if !self.is_configured() {
            return Err(McpError::Backend(
                "BI query store is not configured".to_string(),
            ));
        }

        let url = format!("{}/api/queries/{}", self.base_url, id);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Key {}", self.api_key))
            .send()
            .await
            .map_err(|e| McpError::Backend(format!("BI request failed: {e}")))?;

        match response.status() {
            status if status.is_success() => response
                .json::<RedashQuery>()
                .await
                .map_err(|e| McpError::Backend(format!("malformed BI response: {e}"))),
            reqwest::StatusCode::NOT_FOUND => {
                Err(McpError::NotFound(format!("query {id} does not exist")))
            }
            status => Err(McpError::Backend(format!(
                "BI request for query {id} returned status {status}"
            ))),
        }
    }
}
