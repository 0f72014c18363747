//! PostgREST-style HTTP store.
//!
//! Reads go to `GET {base}/rest/v1/{collection}` with PostgREST filter
//! syntax (`status=eq.paid`, `or=(status.eq.delivered,status.eq.completed)`).
//!
//! ## Resilience
//!
//! * Transport errors and `429 Too Many Requests` are retried with
//!   exponential back-off, up to [`MAX_ATTEMPTS`] tries per request.
//! * Any other non-success status is a hard failure carrying the server's
//!   `message`.
//!
//! The HTTP API has no push channel; change notifications are produced by
//! [`crate::watcher`], which publishes onto this store's [`ChangeFeed`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::{ChangeFeed, DataStore};
use crate::errors::{Result, StorefrontError};
use crate::records::{Collection, Filter, Record};

const MAX_ATTEMPTS: u32 = 4;
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(8);

/// PostgREST error body.
#[derive(Debug, Deserialize)]
struct ApiError {
    message: Option<String>,
    code: Option<String>,
}

#[derive(Clone)]
pub struct RestStore {
    client: Client,
    base_url: String,
    api_key: String,
    feed: ChangeFeed,
    initial_backoff: Duration,
}

impl RestStore {
    pub fn new(client: Client, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            feed: ChangeFeed::new(),
            initial_backoff: INITIAL_BACKOFF,
        }
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    async fn get(&self, collection: Collection, params: Vec<(String, String)>) -> Result<Vec<Record>> {
        let url = format!("{}/rest/v1/{}", self.base_url, collection.as_str());
        let mut backoff = self.initial_backoff;
        let mut attempt = 1;

        loop {
            let response = self
                .client
                .get(&url)
                .query(&params)
                .header("apikey", &self.api_key)
                .bearer_auth(&self.api_key)
                .header("Accept", "application/json")
                .send()
                .await;

            let retry_reason = match response {
                Err(e) if attempt < MAX_ATTEMPTS => format!("request failed: {e}"),
                Err(e) => return Err(e.into()),
                Ok(resp) if resp.status() == StatusCode::TOO_MANY_REQUESTS => {
                    if attempt >= MAX_ATTEMPTS {
                        return Err(StorefrontError::Rejected {
                            status: resp.status().as_u16(),
                            message: "rate limited".to_string(),
                        });
                    }
                    "rate limited".to_string()
                }
                Ok(resp) => return read_rows(resp).await,
            };

            warn!(
                %collection,
                attempt,
                "Store {retry_reason} (will retry in {}ms)",
                backoff.as_millis()
            );
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
            attempt += 1;
        }
    }
}

async fn read_rows(resp: reqwest::Response) -> Result<Vec<Record>> {
    let status = resp.status();
    let body = resp.text().await?;

    if !status.is_success() {
        return Err(StorefrontError::Rejected {
            status: status.as_u16(),
            message: error_message(&body),
        });
    }

    let rows: Vec<Value> = serde_json::from_str(&body)?;
    debug!("Fetched {} rows", rows.len());
    Ok(rows
        .into_iter()
        .filter_map(|row| match row {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .collect())
}

fn error_message(body: &str) -> String {
    match serde_json::from_str::<ApiError>(body) {
        Ok(ApiError {
            message: Some(message),
            code: Some(code),
        }) => format!("{message} ({code})"),
        Ok(ApiError {
            message: Some(message),
            ..
        }) => message,
        _ if body.trim().is_empty() => "empty response".to_string(),
        _ => body.trim().to_string(),
    }
}

#[async_trait]
impl DataStore for RestStore {
    async fn query_rows(&self, collection: Collection, filter: &Filter) -> Result<Vec<Record>> {
        filter.validate(collection)?;
        let params = vec![select_param(collection), filter_param(filter)];
        self.get(collection, params).await
    }

    async fn fetch_all(&self, collection: Collection) -> Result<Vec<Record>> {
        let order = ("order".to_string(), "id.asc".to_string());
        self.get(collection, vec![select_param(collection), order]).await
    }

    fn feed(&self) -> &ChangeFeed {
        &self.feed
    }
}

// ─────────────────────────────────────────────────────────
// Query-string building
// ─────────────────────────────────────────────────────────

fn select_param(collection: Collection) -> (String, String) {
    ("select".to_string(), collection.fields().join(","))
}

/// Translate a [`Filter`] into one PostgREST query parameter.
fn filter_param(filter: &Filter) -> (String, String) {
    match filter {
        Filter::Eq { field, value } => (field.clone(), format!("eq.{value}")),
        Filter::AnyOf { field, values } => {
            let terms: Vec<String> = values
                .iter()
                .map(|v| format!("{field}.eq.{}", quote_value(v)))
                .collect();
            ("or".to_string(), format!("({})", terms.join(",")))
        }
    }
}

/// Values inside logical operators must be double-quoted when they contain
/// PostgREST reserved characters.
fn quote_value(value: &str) -> String {
    let reserved = |c: char| matches!(c, ',' | '.' | ':' | '(' | ')' | '"') || c.is_whitespace();
    if value.is_empty() || value.contains(reserved) {
        let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
        format!("\"{escaped}\"")
    } else {
        value.to_string()
    }
}

// ─────────────────────────────────────────────────────────
// Test server
// ─────────────────────────────────────────────────────────
