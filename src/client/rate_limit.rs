//! Rate-limited client over a [`RemoteSource`].
//!
//! The client owns the process-wide request budget, one per [`Quota`].
//! Every request reserves one unit of its quota; when that quota is at or
//! below the floor the caller is suspended until the advertised reset. The
//! client never retries.

use crate::error::SourceError;
use crate::source::{PageRequest, Quota, RateInfo, RawResponse, RemoteSource};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// Budget settings for the client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Suspend when the remaining budget is at or below this value.
    pub budget_floor: u64,
    /// Upper bound on a single reset wait.
    pub max_reset_wait: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            budget_floor: 1,
            max_reset_wait: Duration::from_secs(900),
        }
    }
}

/// Last observed state of one quota.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BudgetState {
    pub remaining: Option<u64>,
    pub reset_at: Option<DateTime<Utc>>,
}

impl BudgetState {
    /// How long to wait before the next request may be issued.
    fn wait_needed(&self, floor: u64, now: DateTime<Utc>) -> Option<Duration> {
        match (self.remaining, self.reset_at) {
            (Some(remaining), Some(reset_at)) if remaining <= floor && reset_at > now => {
                (reset_at - now).to_std().ok()
            }
            _ => None,
        }
    }

    /// Fold response metadata into the state. Within one reset window the
    /// smaller remaining value wins; in-flight requests may report stale counts.
    fn observe(&mut self, rate: RateInfo) {
        match (rate.remaining, rate.reset_at) {
            (Some(remaining), Some(reset_at)) => match self.reset_at {
                Some(current) if current == reset_at => {
                    self.remaining = Some(self.remaining.map_or(remaining, |r| r.min(remaining)));
                }
                // Response from an older window of the same quota.
                Some(current) if current > reset_at => {}
                _ => {
                    self.remaining = Some(remaining);
                    self.reset_at = Some(reset_at);
                }
            },
            (Some(remaining), None) => {
                self.remaining = Some(self.remaining.map_or(remaining, |r| r.min(remaining)));
            }
            _ => {}
        }
    }
}

/// One quota's bookkeeping.
struct Bucket {
    /// Held by the caller that reserves next, including across a reset wait.
    gate: tokio::sync::Mutex<()>,
    /// Never held across an await.
    state: Mutex<BudgetState>,
}

impl Bucket {
    fn new(state: BudgetState) -> Self {
        Self {
            gate: tokio::sync::Mutex::new(()),
            state: Mutex::new(state),
        }
    }

    fn state(&self) -> MutexGuard<'_, BudgetState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Client enforcing the request budget. Share it through `Arc`.
pub struct RateLimitedClient {
    source: Arc<dyn RemoteSource>,
    config: ClientConfig,
    core: Bucket,
    search: Bucket,
}

impl RateLimitedClient {
    pub fn new(source: Arc<dyn RemoteSource>, config: ClientConfig) -> Self {
        Self {
            source,
            config,
            core: Bucket::new(BudgetState::default()),
            search: Bucket::new(BudgetState::default()),
        }
    }

    /// Start one quota from a known budget instead of an unknown one.
    #[allow(dead_code)] // Seeds a known quota in tests
    pub fn with_budget(mut self, quota: Quota, budget: BudgetState) -> Self {
        match quota {
            Quota::Core => self.core = Bucket::new(budget),
            Quota::Search => self.search = Bucket::new(budget),
        }
        self
    }

    fn bucket(&self, quota: Quota) -> &Bucket {
        match quota {
            Quota::Core => &self.core,
            Quota::Search => &self.search,
        }
    }

    /// Snapshot of one quota's budget.
    pub fn budget(&self, quota: Quota) -> BudgetState {
        *self.bucket(quota).state()
    }

    /// Send one page request and classify the response.
    pub async fn send(&self, request: &PageRequest) -> Result<RawResponse, SourceError> {
        let quota = Quota::for_endpoint(&request.query.endpoint);
        self.acquire(quota).await;

        let response = self.source.fetch(request).await?;

        let charged = response.rate.resource.unwrap_or(quota);
        self.bucket(charged).state().observe(response.rate);

        classify(response)
    }

    /// Reserve one unit of `quota`, waiting for the reset when exhausted.
    ///
    /// The gate stays held across the wait, so the next reservation on the
    /// same quota waits too. Responses still arrive and are observed while a
    /// caller waits.
    async fn acquire(&self, quota: Quota) {
        let bucket = self.bucket(quota);
        let _gate = bucket.gate.lock().await;

        let snapshot = *bucket.state();
        if let Some(wait) = snapshot.wait_needed(self.config.budget_floor, Utc::now()) {
            let wait = wait.min(self.config.max_reset_wait);
            warn!(
                "Rate limit budget for {} at {:?} (floor {}), waiting {}s for reset",
                quota,
                snapshot.remaining,
                self.config.budget_floor,
                wait.as_secs()
            );
            tokio::time::sleep(wait).await;
            // New window: unknown until a response reports it.
            *bucket.state() = BudgetState::default();
        }

        let mut state = bucket.state();
        if let Some(remaining) = state.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
        }
        debug!("Request budget for {} remaining: {:?}", quota, state.remaining);
    }
}

/// Map a raw status to success, transient, or permanent.
fn classify(response: RawResponse) -> Result<RawResponse, SourceError> {
    let status = response.status;
    if (200..300).contains(&status) {
        return Ok(response);
    }

    let reason = response
        .message
        .clone()
        .unwrap_or_else(|| format!("HTTP {}", status));

    let exhausted = response.rate.remaining == Some(0) || response.retry_after.is_some();
    let rate_limited = status == 429 || (status == 403 && exhausted);

    if rate_limited {
        let retry_after = response.retry_after.or_else(|| {
            response
                .rate
                .reset_at
                .and_then(|reset_at| (reset_at - Utc::now()).to_std().ok())
        });
        return Err(SourceError::Transient {
            reason: format!("rate limited: {}", reason),
            retry_after,
        });
    }

    if (500..600).contains(&status) {
        return Err(SourceError::Transient {
            reason: format!("server error {}: {}", status, reason),
            retry_after: response.retry_after,
        });
    }

    Err(SourceError::permanent(status, reason))
}
