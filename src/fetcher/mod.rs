//! Per-identity activity fetching.
//!
//! Each identity's activity is gathered by five independent query groups.
//! A group that fails is recorded and the others still run, so one broken
//! endpoint degrades an identity's row instead of dropping it.

pub mod shapes;

use crate::client::{Paginator, RateLimitedClient, RetryPolicy};
use crate::error::SourceError;
use crate::models::{ActivityRecord, Identity, TimeWindow};
use crate::source::Query;
use shapes::{CommentStream, Mapped, RepoItem};
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// The isolated kind-queries issued for every identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QueryGroup {
    Commits,
    ChangeRequests,
    Discussions,
    Comments,
    Events,
}

impl QueryGroup {
    pub fn name(&self) -> &'static str {
        match self {
            QueryGroup::Commits => "commits",
            QueryGroup::ChangeRequests => "change_requests",
            QueryGroup::Discussions => "discussions",
            QueryGroup::Comments => "comments",
            QueryGroup::Events => "events",
        }
    }
}

impl fmt::Display for QueryGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A query group that could not be completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindFailure {
    pub group: QueryGroup,
    pub reason: String,
}

/// Everything gathered for one identity.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub records: Vec<ActivityRecord>,
    pub failures: Vec<KindFailure>,
    pub rejected: u64,
}

impl FetchOutcome {
    fn absorb(&mut self, group: QueryGroup, result: Result<Mapped, SourceError>) {
        match result {
            Ok(mapped) => {
                if mapped.rejected > 0 {
                    warn!("{}: rejected {} unrecognized items", group, mapped.rejected);
                }
                if mapped.truncated {
                    warn!("{}: results truncated at the page limit", group);
                    self.failures.push(KindFailure {
                        group,
                        reason: "results truncated at page limit".to_string(),
                    });
                }
                self.rejected += mapped.rejected;
                self.records.extend(mapped.records);
            }
            Err(e) => {
                warn!("{} query failed: {}", group, e);
                self.failures.push(KindFailure {
                    group,
                    reason: e.to_string(),
                });
            }
        }
    }
}

/// Settings for the fetcher.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub organization: String,
    pub page_size: u32,
    pub max_pages: u32,
    pub retry: RetryPolicy,
}

/// Every page of one query, and whether the page cap stopped the traversal.
struct Pages {
    items: Vec<serde_json::Value>,
    truncated: bool,
}

type SharedComments = Result<Arc<CommentStream>, SourceError>;

/// Fetches and normalizes activity for identities of one organization.
pub struct ActivityFetcher {
    client: Arc<RateLimitedClient>,
    config: FetcherConfig,
    /// The shared comment stream, loaded once per window.
    comments: OnceCell<(TimeWindow, SharedComments)>,
}

impl ActivityFetcher {
    pub fn new(client: Arc<RateLimitedClient>, config: FetcherConfig) -> Self {
        Self {
            client,
            config,
            comments: OnceCell::new(),
        }
    }

    /// Gather every activity kind for `identity` within `window`.
    pub async fn fetch(&self, identity: &Identity, window: &TimeWindow) -> FetchOutcome {
        debug!("Fetching activity for {}", identity);

        let (commits, change_requests, discussions, comments, events) = tokio::join!(
            self.fetch_commits(identity, window),
            self.fetch_change_requests(identity, window),
            self.fetch_discussions(identity, window),
            self.fetch_comments(identity, window),
            self.fetch_events(identity, window),
        );

        let mut outcome = FetchOutcome::default();
        outcome.absorb(QueryGroup::Commits, commits);
        outcome.absorb(QueryGroup::ChangeRequests, change_requests);
        outcome.absorb(QueryGroup::Discussions, discussions);
        outcome.absorb(QueryGroup::Comments, comments);
        outcome.absorb(QueryGroup::Events, events);

        debug!(
            "{}: {} records, {} failed groups",
            identity,
            outcome.records.len(),
            outcome.failures.len()
        );
        outcome
    }

    /// Shared-stream items rejected without a readable author, for the
    /// window the stream was loaded for.
    pub fn unattributed_rejections(&self) -> u64 {
        self.comments
            .get()
            .and_then(|(_, stream)| stream.as_ref().ok())
            .map_or(0, |stream| stream.unattributed)
    }

    async fn collect(&self, query: Query) -> Result<Pages, SourceError> {
        let mut pager = Paginator::new(
            &self.client,
            query,
            self.config.page_size,
            self.config.max_pages,
        );
        let items = self.config.retry.collect(&mut pager).await?;
        Ok(Pages {
            items,
            truncated: pager.truncated(),
        })
    }

    fn search(&self, endpoint: &str, q: String) -> Query {
        Query::new(endpoint).param("q", q)
    }

    async fn fetch_commits(
        &self,
        identity: &Identity,
        window: &TimeWindow,
    ) -> Result<Mapped, SourceError> {
        let q = format!(
            "author:{} org:{} author-date:>={}",
            identity,
            self.config.organization,
            window.since_date()
        );
        let pages = self.collect(self.search("/search/commits", q)).await?;
        Ok(shapes::map_commits(identity, pages.items, window).truncated_if(pages.truncated))
    }

    async fn fetch_change_requests(
        &self,
        identity: &Identity,
        window: &TimeWindow,
    ) -> Result<Mapped, SourceError> {
        // `updated` covers both requests created and requests merged in the window.
        let q = format!(
            "type:pr author:{} org:{} updated:>={}",
            identity,
            self.config.organization,
            window.since_date()
        );
        let pages = self.collect(self.search("/search/issues", q)).await?;
        Ok(shapes::map_change_requests(identity, pages.items, window)
            .truncated_if(pages.truncated))
    }

    async fn fetch_discussions(
        &self,
        identity: &Identity,
        window: &TimeWindow,
    ) -> Result<Mapped, SourceError> {
        let q = format!(
            "type:issue author:{} org:{} created:>={}",
            identity,
            self.config.organization,
            window.since_date()
        );
        let pages = self.collect(self.search("/search/issues", q)).await?;
        Ok(shapes::map_discussions(identity, pages.items, window).truncated_if(pages.truncated))
    }

    async fn fetch_events(
        &self,
        identity: &Identity,
        window: &TimeWindow,
    ) -> Result<Mapped, SourceError> {
        let query = Query::new(format!("/users/{}/events", identity));
        let pages = self.collect(query).await?;
        let mapped = shapes::map_events(identity, pages.items, window, &self.config.organization);
        Ok(mapped.truncated_if(pages.truncated))
    }

    async fn fetch_comments(
        &self,
        identity: &Identity,
        window: &TimeWindow,
    ) -> Result<Mapped, SourceError> {
        let stream = self.comment_stream(window).await?;
        Ok(shapes::attribute_comments(identity, &stream, window))
    }

    /// The organization-wide comment stream. It is not identity-scoped at the
    /// source, so it is loaded once (failure included) and filtered per
    /// identity.
    async fn comment_stream(&self, window: &TimeWindow) -> SharedComments {
        let (cached_window, cached) = self
            .comments
            .get_or_init(|| async { (*window, self.load_comment_stream(window).await) })
            .await;

        if cached_window == window {
            cached.clone()
        } else {
            self.load_comment_stream(window).await
        }
    }

    async fn load_comment_stream(&self, window: &TimeWindow) -> SharedComments {
        let org = &self.config.organization;
        let repos = self
            .collect(Query::new(format!("/orgs/{}/repos", org)).param("type", "all"))
            .await?;

        let mut stream = CommentStream {
            truncated: repos.truncated,
            ..CommentStream::default()
        };
        for item in repos.items {
            let repo: RepoItem = match shapes::parse_item(item) {
                Ok(repo) => repo,
                Err(e) => {
                    warn!("Skipping unrecognized repository item: {}", e);
                    stream.reject_unattributed("repository", e);
                    continue;
                }
            };
            let query = Query::new(format!("/repos/{}/{}/issues/comments", org, repo.name))
                .param("since", window.since.to_rfc3339());
            let pages = self.collect(query).await?;
            stream.truncated |= pages.truncated;
            stream.add_repository(&format!("{}/{}", org, repo.name), pages.items);
        }

        if stream.rejected() > 0 {
            warn!(
                "comments: rejected {} unrecognized items ({} without an author)",
                stream.rejected(),
                stream.unattributed
            );
        }
        info!("Loaded {} comments from {}", stream.comments.len(), org);
        Ok(Arc::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientConfig;
    use crate::models::ActivityKind;
    use crate::source::testing::ScriptedSource;
    use crate::source::{PageRequest, RawResponse};
    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};
    use std::time::Duration;

    fn window() -> TimeWindow {
        TimeWindow::lookback(Utc.with_ymd_and_hms(2024, 3, 31, 0, 0, 0).unwrap(), 30)
    }

    fn fetcher_for(source: Arc<ScriptedSource>) -> ActivityFetcher {
        let client = Arc::new(RateLimitedClient::new(source, ClientConfig::default()));
        ActivityFetcher::new(
            client,
            FetcherConfig {
                organization: "acme".to_string(),
                page_size: 50,
                max_pages: 5,
                retry: RetryPolicy {
                    max_attempts: 2,
                    base_delay: Duration::from_millis(10),
                    max_delay: Duration::from_millis(50),
                },
            },
        )
    }

    fn search_user(req: &PageRequest) -> Option<String> {
        req.query.get("q").and_then(|q| {
            q.split_whitespace()
                .find_map(|term| term.strip_prefix("author:"))
                .map(String::from)
        })
    }

    /// A small organization: alice and bob, one repository.
    fn healthy(req: &PageRequest) -> Result<RawResponse, SourceError> {
        let endpoint = req.query.endpoint.as_str();
        let q = req.query.get("q").unwrap_or("");
        let user = search_user(req).unwrap_or_default();
        let items: Vec<Value> = match endpoint {
            "/search/commits" => vec![
                json!({
                    "sha": format!("{}-1", user),
                    "commit": {"author": {"date": "2024-03-02T10:00:00Z"}}
                }),
                json!({
                    "sha": format!("{}-2", user),
                    "commit": {"author": {"date": "2024-03-03T10:00:00Z"}}
                }),
            ],
            "/search/issues" if q.starts_with("type:pr") => vec![json!({
                "number": 7, "state": "closed", "created_at": "2024-03-02T11:00:00Z",
                "pull_request": {"merged_at": "2024-03-04T11:00:00Z"}
            })],
            "/search/issues" => vec![json!({
                "number": 8, "state": "open", "created_at": "2024-03-05T11:00:00Z"
            })],
            "/orgs/acme/repos" => vec![json!({"name": "widgets"})],
            "/repos/acme/widgets/issues/comments" => vec![
                json!({"id": 1, "created_at": "2024-03-06T00:00:00Z", "user": {"login": "alice"}}),
                json!({"id": 2, "created_at": "2024-03-06T00:00:00Z", "user": {"login": "bob"}}),
            ],
            e if e.ends_with("/events") => vec![
                json!({"id": "e1", "type": "PushEvent", "created_at": "2024-03-07T00:00:00Z",
                       "repo": {"name": "acme/widgets"}}),
            ],
            other => panic!("unexpected endpoint {}", other),
        };
        Ok(RawResponse::ok(items))
    }

    #[tokio::test]
    async fn test_fetch_all_groups() {
        let source = Arc::new(ScriptedSource::new(healthy));
        let fetcher = fetcher_for(source);

        let outcome = fetcher.fetch(&Identity::new("alice"), &window()).await;

        assert!(outcome.failures.is_empty());
        let count = |kind| outcome.records.iter().filter(|r| r.kind == kind).count();
        assert_eq!(count(ActivityKind::Commit), 2);
        assert_eq!(count(ActivityKind::ChangeRequestMerged), 1);
        assert_eq!(count(ActivityKind::ChangeRequestOpened), 0);
        assert_eq!(count(ActivityKind::DiscussionOpened), 1);
        assert_eq!(count(ActivityKind::DiscussionComment), 1);
        assert_eq!(count(ActivityKind::GenericEvent), 1);
    }

    #[tokio::test]
    async fn test_failed_group_does_not_abort_others() {
        let source = Arc::new(ScriptedSource::new(|req| {
            let q = req.query.get("q").unwrap_or("");
            if q.starts_with("type:pr") {
                Ok(RawResponse::status(422, "Validation Failed"))
            } else {
                healthy(req)
            }
        }));
        let fetcher = fetcher_for(source);

        let outcome = fetcher.fetch(&Identity::new("alice"), &window()).await;

        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].group, QueryGroup::ChangeRequests);
        assert!(outcome.failures[0].reason.contains("422"));
        assert!(outcome
            .records
            .iter()
            .any(|r| r.kind == ActivityKind::Commit));
        assert!(outcome
            .records
            .iter()
            .all(|r| r.kind != ActivityKind::ChangeRequestMerged));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_exhaustion_becomes_failure() {
        let source = Arc::new(ScriptedSource::new(|req| {
            if req.query.endpoint.ends_with("/events") {
                Ok(RawResponse::status(503, "unavailable"))
            } else {
                healthy(req)
            }
        }));
        let fetcher = fetcher_for(source.clone());

        let outcome = fetcher.fetch(&Identity::new("bob"), &window()).await;

        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].group, QueryGroup::Events);
        let event_calls = source
            .calls()
            .iter()
            .filter(|r| r.query.endpoint.ends_with("/events"))
            .count();
        assert_eq!(event_calls, 2);
    }

    #[tokio::test]
    async fn test_comment_stream_loaded_once() {
        let source = Arc::new(ScriptedSource::new(healthy));
        let fetcher = fetcher_for(source.clone());

        let alice = fetcher.fetch(&Identity::new("alice"), &window()).await;
        let bob = fetcher.fetch(&Identity::new("bob"), &window()).await;

        let comment_of = |outcome: &FetchOutcome| {
            outcome
                .records
                .iter()
                .filter(|r| r.kind == ActivityKind::DiscussionComment)
                .map(|r| r.metadata.source_id.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(comment_of(&alice), vec!["1"]);
        assert_eq!(comment_of(&bob), vec!["2"]);

        let repo_listings = source
            .calls()
            .iter()
            .filter(|r| r.query.endpoint == "/orgs/acme/repos")
            .count();
        assert_eq!(repo_listings, 1);
    }

    #[tokio::test]
    async fn test_search_query_carries_window_since() {
        let source = Arc::new(ScriptedSource::new(healthy));
        let fetcher = fetcher_for(source.clone());

        fetcher.fetch(&Identity::new("alice"), &window()).await;

        let commit_query = source
            .calls()
            .into_iter()
            .find(|r| r.query.endpoint == "/search/commits")
            .unwrap();
        assert_eq!(
            commit_query.query.get("q"),
            Some("author:alice org:acme author-date:>=2024-03-01")
        );
        let comment_query = source
            .calls()
            .into_iter()
            .find(|r| r.query.endpoint.ends_with("/issues/comments"))
            .unwrap();
        assert_eq!(
            comment_query.query.get("since"),
            Some("2024-03-01T00:00:00+00:00")
        );
    }

    #[tokio::test]
    async fn test_truncated_group_is_partial_failure() {
        // Every search page is full, so the page cap is what stops it.
        let source = Arc::new(ScriptedSource::new(|req| {
            if req.query.endpoint == "/search/commits" {
                let items = (0..50)
                    .map(|i| {
                        json!({
                            "sha": format!("{}-{}", req.page, i),
                            "commit": {"author": {"date": "2024-03-02T10:00:00Z"}}
                        })
                    })
                    .collect();
                Ok(RawResponse::ok(items))
            } else {
                healthy(req)
            }
        }));
        let fetcher = fetcher_for(source);

        let outcome = fetcher.fetch(&Identity::new("alice"), &window()).await;

        assert_eq!(
            outcome.failures,
            vec![KindFailure {
                group: QueryGroup::Commits,
                reason: "results truncated at page limit".to_string(),
            }]
        );
        // What was fetched before the cap still counts.
        let commits = outcome
            .records
            .iter()
            .filter(|r| r.kind == ActivityKind::Commit)
            .count();
        assert_eq!(commits, 250);
    }

    #[tokio::test]
    async fn test_stream_rejections_are_counted() {
        let source = Arc::new(ScriptedSource::new(|req| match req.query.endpoint.as_str() {
            "/orgs/acme/repos" => Ok(RawResponse::ok(vec![
                json!({"name": "widgets"}),
                json!({"full_name": "acme/nameless"}),
            ])),
            "/repos/acme/widgets/issues/comments" => Ok(RawResponse::ok(vec![
                json!({"id": 1, "created_at": "2024-03-06T00:00:00Z", "user": {"login": "alice"}}),
                json!({"id": 2, "created_at": "someday", "user": {"login": "alice"}}),
                json!({"id": 3, "created_at": "someday"}),
            ])),
            _ => healthy(req),
        }));
        let fetcher = fetcher_for(source);

        let alice = fetcher.fetch(&Identity::new("alice"), &window()).await;
        let bob = fetcher.fetch(&Identity::new("bob"), &window()).await;

        assert!(alice.failures.is_empty());
        assert_eq!(alice.rejected, 1);
        assert_eq!(bob.rejected, 0);
        // The nameless repository and the authorless comment.
        assert_eq!(fetcher.unattributed_rejections(), 2);
    }
}
