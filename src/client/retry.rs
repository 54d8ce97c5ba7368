//! Bounded exponential backoff for transient source errors.

use super::Paginator;
use crate::error::SourceError;
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Retry settings applied by callers of the paginator.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per page, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (0-based). A reset hint from the
    /// source wins over a shorter exponential delay.
    pub fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        let exponential = self.base_delay.saturating_mul(factor).min(self.max_delay);
        hint.map_or(exponential, |h| h.max(exponential))
    }

    /// Pull the next page, retrying transient failures.
    pub async fn next_page(
        &self,
        pager: &mut Paginator<'_>,
    ) -> Option<Result<Vec<Value>, SourceError>> {
        let mut attempt = 0;
        loop {
            match pager.next_page().await {
                Some(Err(e)) if e.is_transient() && attempt + 1 < self.max_attempts.max(1) => {
                    let delay = self.delay_for(attempt, e.retry_after());
                    warn!(
                        "{} (attempt {}/{}), retrying in {}ms",
                        e,
                        attempt + 1,
                        self.max_attempts,
                        delay.as_millis()
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Drain every page into one list. Stops at the first unrecoverable error.
    pub async fn collect(&self, pager: &mut Paginator<'_>) -> Result<Vec<Value>, SourceError> {
        let mut all = Vec::new();
        while let Some(page) = self.next_page(pager).await {
            all.extend(page?);
        }
        Ok(all)
    }
}
