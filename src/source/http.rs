//! HTTP adapter for a GitHub-style REST API.

use super::{PageRequest, Quota, RateInfo, RawResponse, RemoteSource};
use crate::error::SourceError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::header::{HeaderMap, ACCEPT, LINK};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Configuration for the HTTP source.
#[derive(Debug, Clone)]
pub struct HttpSourceConfig {
    pub api_url: String,
    pub token: Option<String>,
    pub timeout_seconds: u64,
}

/// Remote source backed by reqwest.
pub struct HttpSource {
    config: HttpSourceConfig,
    http_client: reqwest::Client,
}

impl HttpSource {
    pub fn new(config: HttpSourceConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(concat!("contrib-tally/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            config,
            http_client,
        })
    }

    fn url_for(&self, endpoint: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), endpoint)
    }
}

#[async_trait]
impl RemoteSource for HttpSource {
    async fn fetch(&self, request: &PageRequest) -> Result<RawResponse, SourceError> {
        let url = self.url_for(&request.query.endpoint);

        let mut params = request.query.params.clone();
        params.push(("per_page".to_string(), request.per_page.to_string()));
        params.push(("page".to_string(), request.page.to_string()));

        let mut builder = self
            .http_client
            .get(&url)
            .query(&params)
            .header(ACCEPT, "application/vnd.github+json");
        if let Some(ref token) = self.config.token {
            builder = builder.bearer_auth(token);
        }

        debug!("GET {} page {}", request.query, request.page);

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                SourceError::transient(format!(
                    "request timed out after {}s",
                    self.config.timeout_seconds
                ))
            } else if e.is_connect() {
                SourceError::transient(format!("cannot connect to {}", self.config.api_url))
            } else {
                SourceError::transient(format!("failed to send request: {}", e))
            }
        })?;

        let status = response.status().as_u16();
        let rate = rate_info(response.headers());
        let retry_after = header_u64(response.headers(), "retry-after").map(Duration::from_secs);
        let has_next = response
            .headers()
            .get(LINK)
            .and_then(|v| v.to_str().ok())
            .map(link_has_next);

        let body = response
            .text()
            .await
            .map_err(|e| SourceError::transient(format!("failed to read body: {}", e)))?;

        let mut raw = RawResponse {
            status,
            items: Vec::new(),
            rate,
            has_next,
            retry_after,
            message: None,
        };

        if !(200..300).contains(&status) {
            raw.message = Some(error_message(&body));
            return Ok(raw);
        }

        let value: Value = if body.trim().is_empty() {
            Value::Array(Vec::new())
        } else {
            serde_json::from_str(&body)
                .map_err(|e| SourceError::permanent(status, format!("undecodable body: {}", e)))?
        };
        raw.items = extract_items(value)
            .ok_or_else(|| SourceError::permanent(status, "unexpected body shape"))?;

        Ok(raw)
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}

fn rate_info(headers: &HeaderMap) -> RateInfo {
    RateInfo {
        remaining: header_u64(headers, "x-ratelimit-remaining"),
        reset_at: header_u64(headers, "x-ratelimit-reset")
            .and_then(|epoch| i64::try_from(epoch).ok())
            .and_then(|epoch| Utc.timestamp_opt(epoch, 0).single()),
        resource: headers
            .get("x-ratelimit-resource")
            .and_then(|v| v.to_str().ok())
            .and_then(Quota::from_resource),
    }
}

/// Whether a `Link` header advertises a `rel="next"` page.
pub fn link_has_next(link: &str) -> bool {
    link.split(',')
        .any(|part| part.split(';').skip(1).any(|p| p.trim() == "rel=\"next\""))
}

/// List endpoints return arrays; search endpoints wrap them in `items`.
fn extract_items(value: Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(mut map) => match map.remove("items") {
            Some(Value::Array(items)) => Some(items),
            _ => None,
        },
        _ => None,
    }
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
        .unwrap_or_else(|| body.chars().take(200).collect())
}
