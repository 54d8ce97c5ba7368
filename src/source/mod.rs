//! Remote activity data source.
//!
//! The pipeline talks to the remote API only through [`RemoteSource`]: one
//! call fetches one page of a query. Classification of statuses and
//! rate-limit bookkeeping happen above this layer, in the client.

pub mod http;

pub use http::{HttpSource, HttpSourceConfig};

use crate::error::SourceError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// A logical query: endpoint path plus ordered filter parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Query {
    pub endpoint: String,
    pub params: Vec<(String, String)>,
}

impl Query {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            params: Vec::new(),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Look up a filter parameter by key.
    #[allow(dead_code)] // Used when inspecting recorded queries
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.endpoint)?;
        for (i, (k, v)) in self.params.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{}{}={}", sep, k, v)?;
        }
        Ok(())
    }
}

/// One page of a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub query: Query,
    /// 1-indexed page number.
    pub page: u32,
    pub per_page: u32,
}

/// Separately metered request quota. Search endpoints draw on their own
/// short-window quota; everything else shares the core one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Quota {
    Core,
    Search,
}

impl Quota {
    /// The quota a request to `endpoint` is charged against.
    pub fn for_endpoint(endpoint: &str) -> Self {
        if endpoint.starts_with("/search/") {
            Quota::Search
        } else {
            Quota::Core
        }
    }

    /// Parse an `x-ratelimit-resource` value. Other resources are not tracked.
    pub fn from_resource(name: &str) -> Option<Self> {
        match name.trim() {
            "core" => Some(Quota::Core),
            "search" => Some(Quota::Search),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Quota::Core => "core",
            Quota::Search => "search",
        }
    }
}

impl fmt::Display for Quota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Rate-limit metadata carried by every response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateInfo {
    pub remaining: Option<u64>,
    pub reset_at: Option<DateTime<Utc>>,
    /// The quota the source says it charged, when it says.
    pub resource: Option<Quota>,
}

/// Unclassified response from the source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub items: Vec<Value>,
    pub rate: RateInfo,
    /// Explicit next-page marker, when the source provides one.
    pub has_next: Option<bool>,
    pub retry_after: Option<Duration>,
    /// Error message from the body of a non-success response.
    pub message: Option<String>,
}

#[cfg(test)]
impl RawResponse {
    pub fn ok(items: Vec<Value>) -> Self {
        Self {
            status: 200,
            items,
            ..Self::default()
        }
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_rate(mut self, remaining: u64, reset_at: DateTime<Utc>) -> Self {
        self.rate.remaining = Some(remaining);
        self.rate.reset_at = Some(reset_at);
        self
    }

    pub fn with_resource(mut self, quota: Quota) -> Self {
        self.rate.resource = Some(quota);
        self
    }

    pub fn with_next(mut self, has_next: bool) -> Self {
        self.has_next = Some(has_next);
        self
    }
}

/// Paginated remote data source.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Fetch one page. Only transport failures are errors here; non-2xx
    /// statuses come back as a [`RawResponse`].
    async fn fetch(&self, request: &PageRequest) -> Result<RawResponse, SourceError>;
}
