//! Run orchestration.
//!
//! Resolves identities, fetches and scores each one through a bounded worker
//! pool, and assembles the report. The timeout and external cancellation
//! cover the whole run. During resolution they abort it; afterwards they stop
//! the pool promptly and unfinished identities are reported as cancelled.

use crate::error::{ResolutionError, RunError};
use crate::fetcher::ActivityFetcher;
use crate::models::{Identity, Report, ReportMetadata, Rubric, ScoreEntry, TimeWindow};
use crate::report;
use crate::resolver::{IdentityResolver, Scope};
use crate::scoring::score_entry;
use futures::future::{self, Future};
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Scheduling settings for a run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Identities processed at once.
    pub concurrency: usize,
    /// Run-level deadline.
    pub timeout: Option<Duration>,
    pub show_progress: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            timeout: None,
            show_progress: false,
        }
    }
}

/// The contribution aggregation pipeline.
pub struct Pipeline {
    resolver: IdentityResolver,
    fetcher: Arc<ActivityFetcher>,
    rubric: Arc<Rubric>,
    settings: RunSettings,
}

impl Pipeline {
    pub fn new(
        resolver: IdentityResolver,
        fetcher: Arc<ActivityFetcher>,
        rubric: Arc<Rubric>,
        settings: RunSettings,
    ) -> Self {
        Self {
            resolver,
            fetcher,
            rubric,
            settings,
        }
    }

    /// Run once. Stops early when `cancel` resolves.
    pub async fn run(
        &self,
        scope: &Scope,
        window: TimeWindow,
        lookback_days: u32,
        cancel: impl Future<Output = ()>,
    ) -> Result<Report, RunError> {
        let deadline = deadline(self.settings.timeout);
        tokio::pin!(deadline);
        tokio::pin!(cancel);

        let identities = tokio::select! {
            biased;
            _ = &mut cancel => {
                warn!("Run cancelled while resolving {}", scope);
                return Err(ResolutionError::Interrupted(scope.to_string()).into());
            }
            _ = &mut deadline => {
                warn!("Run timed out while resolving {}", scope);
                return Err(ResolutionError::TimedOut(scope.to_string()).into());
            }
            resolved = self.resolver.resolve(scope) => resolved?,
        };
        let entries = self
            .score_all(&identities, window, cancel.as_mut(), deadline.as_mut())
            .await;

        let metadata = ReportMetadata {
            scope: scope.to_string(),
            window,
            lookback_days,
            rubric: *self.rubric,
            unattributed_rejected_items: self.fetcher.unattributed_rejections(),
        };
        let report = report::build(metadata, &identities, entries)?;

        info!(
            "Scored {} identities ({} partial)",
            report.entries.len(),
            report.partial_failures()
        );
        Ok(report)
    }

    async fn score_all<C, D>(
        &self,
        identities: &[Identity],
        window: TimeWindow,
        mut cancel: Pin<&mut C>,
        mut deadline: Pin<&mut D>,
    ) -> Vec<ScoreEntry>
    where
        C: Future<Output = ()>,
        D: Future<Output = ()>,
    {
        let progress = self.progress_bar(identities.len() as u64);

        let fetcher = &self.fetcher;
        let rubric = &self.rubric;
        let mut workers = stream::iter(identities.iter().cloned())
            .map(|identity| async move {
                let outcome = fetcher.fetch(&identity, &window).await;
                score_entry(identity, &outcome, &window, rubric)
            })
            .buffer_unordered(self.settings.concurrency.max(1));

        let mut entries = Vec::with_capacity(identities.len());
        loop {
            tokio::select! {
                biased;
                _ = &mut cancel => {
                    warn!(
                        "Run cancelled after {} of {} identities",
                        entries.len(),
                        identities.len()
                    );
                    break;
                }
                _ = &mut deadline => {
                    warn!(
                        "Run timed out after {} of {} identities",
                        entries.len(),
                        identities.len()
                    );
                    break;
                }
                next = workers.next() => match next {
                    Some(entry) => {
                        if let Some(ref pb) = progress {
                            pb.set_message(entry.identity.to_string());
                            pb.inc(1);
                        }
                        entries.push(entry);
                    }
                    None => break,
                },
            }
        }

        if let Some(pb) = progress {
            pb.finish_and_clear();
        }
        entries
    }

    fn progress_bar(&self, len: u64) -> Option<ProgressBar> {
        if !self.settings.show_progress {
            return None;
        }
        let pb = ProgressBar::new(len);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        Some(pb)
    }
}

/// Completes when the run limit expires, or never.
async fn deadline(limit: Option<Duration>) {
    match limit {
        Some(limit) => tokio::time::sleep(limit).await,
        None => future::pending::<()>().await,
    }
}
