//! Strict shapes for remote items and their mapping into activity records.
//!
//! Items are deserialized one at a time: an item that does not fit its shape,
//! carries an unparseable timestamp, or names an unknown event type is
//! counted as rejected instead of being skipped silently.

use crate::models::{ActivityKind, ActivityRecord, Identity, RecordMetadata, TimeWindow};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Records mapped from one query group, plus the rejected item count.
#[derive(Debug, Default)]
pub struct Mapped {
    pub records: Vec<ActivityRecord>,
    pub rejected: u64,
    /// The page cap cut one of the group's traversals short.
    pub truncated: bool,
}

impl Mapped {
    pub fn truncated_if(mut self, truncated: bool) -> Self {
        self.truncated |= truncated;
        self
    }

    fn push(
        &mut self,
        identity: &Identity,
        kind: ActivityKind,
        at: DateTime<Utc>,
        metadata: RecordMetadata,
    ) {
        self.records.push(ActivityRecord {
            identity: identity.clone(),
            kind,
            timestamp: at,
            metadata,
        });
    }

    fn reject(&mut self, what: &str, reason: impl std::fmt::Display) {
        debug!("Rejected {} item: {}", what, reason);
        self.rejected += 1;
    }
}

#[derive(Debug, Deserialize)]
pub struct CommitItem {
    pub sha: String,
    #[serde(default)]
    pub html_url: Option<String>,
    pub commit: CommitDetail,
    #[serde(default)]
    pub repository: Option<RepositoryRef>,
}

#[derive(Debug, Deserialize)]
pub struct CommitDetail {
    pub author: Option<CommitAuthor>,
}

#[derive(Debug, Deserialize)]
pub struct CommitAuthor {
    pub date: String,
}

#[derive(Debug, Deserialize)]
pub struct RepositoryRef {
    pub full_name: String,
}

/// Search result for issues and change requests.
#[derive(Debug, Deserialize)]
pub struct IssueItem {
    pub number: u64,
    #[serde(default)]
    pub html_url: Option<String>,
    pub state: String,
    pub created_at: String,
    #[serde(default)]
    pub repository_url: Option<String>,
    #[serde(default)]
    pub pull_request: Option<PullRequestRef>,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestRef {
    #[serde(default)]
    pub merged_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CommentItem {
    pub id: u64,
    #[serde(default)]
    pub html_url: Option<String>,
    pub created_at: String,
    pub user: Option<UserRef>,
}

#[derive(Debug, Deserialize)]
pub struct UserRef {
    pub login: String,
}

#[derive(Debug, Deserialize)]
pub struct EventItem {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub created_at: String,
    #[serde(default)]
    pub repo: Option<EventRepo>,
}

#[derive(Debug, Deserialize)]
pub struct EventRepo {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct RepoItem {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct MemberItem {
    pub login: String,
}

/// Event types the public events feed is known to emit.
pub const KNOWN_EVENT_TYPES: &[&str] = &[
    "CommitCommentEvent",
    "CreateEvent",
    "DeleteEvent",
    "DiscussionEvent",
    "ForkEvent",
    "GollumEvent",
    "IssueCommentEvent",
    "IssuesEvent",
    "MemberEvent",
    "PublicEvent",
    "PullRequestEvent",
    "PullRequestReviewCommentEvent",
    "PullRequestReviewEvent",
    "PullRequestReviewThreadEvent",
    "PushEvent",
    "ReleaseEvent",
    "SponsorshipEvent",
    "WatchEvent",
];

/// A comment from the shared stream, already parsed.
#[derive(Debug, Clone)]
pub struct StreamComment {
    pub id: u64,
    pub login: Option<String>,
    pub created_at: DateTime<Utc>,
    pub url: Option<String>,
    pub repository: String,
}

pub fn parse_item<T: DeserializeOwned>(item: Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(item)
}

/// Parse an ISO-8601 timestamp into UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|ts| ts.with_timezone(&Utc))
}

/// `owner/name` from an API repository URL.
fn repo_from_url(url: &str) -> Option<String> {
    let mut parts = url.trim_end_matches('/').rsplit('/');
    let name = parts.next()?;
    let owner = parts.next()?;
    Some(format!("{}/{}", owner, name))
}

pub fn map_commits(identity: &Identity, items: Vec<Value>, window: &TimeWindow) -> Mapped {
    let mut mapped = Mapped::default();
    for item in items {
        let commit: CommitItem = match parse_item(item) {
            Ok(c) => c,
            Err(e) => {
                mapped.reject("commit", e);
                continue;
            }
        };
        let Some(author) = commit.commit.author else {
            mapped.reject("commit", format!("{} has no author date", commit.sha));
            continue;
        };
        let at = match parse_timestamp(&author.date) {
            Ok(at) => at,
            Err(e) => {
                mapped.reject("commit", e);
                continue;
            }
        };
        if window.contains(at) {
            let metadata = RecordMetadata {
                source_id: commit.sha,
                url: commit.html_url,
                repository: commit.repository.map(|r| r.full_name),
                detail: None,
            };
            mapped.push(identity, ActivityKind::Commit, at, metadata);
        }
    }
    mapped
}

/// Merged: a merge timestamp inside the window. Opened: `state == open`, or
/// unmerged and created inside the window (so requests opened in-window and
/// closed unmerged are counted too). One request may yield both.
pub fn map_change_requests(identity: &Identity, items: Vec<Value>, window: &TimeWindow) -> Mapped {
    let mut mapped = Mapped::default();
    for item in items {
        let issue: IssueItem = match parse_item(item) {
            Ok(i) => i,
            Err(e) => {
                mapped.reject("change request", e);
                continue;
            }
        };
        let Some(ref pull_request) = issue.pull_request else {
            mapped.reject("change request", format!("#{} is not a change request", issue.number));
            continue;
        };
        let created = match parse_timestamp(&issue.created_at) {
            Ok(at) => at,
            Err(e) => {
                mapped.reject("change request", e);
                continue;
            }
        };
        let merged = match pull_request.merged_at.as_deref().map(parse_timestamp) {
            Some(Ok(at)) => Some(at),
            Some(Err(e)) => {
                mapped.reject("change request", e);
                continue;
            }
            None => None,
        };

        let metadata = RecordMetadata {
            source_id: issue.number.to_string(),
            url: issue.html_url.clone(),
            repository: issue.repository_url.as_deref().and_then(repo_from_url),
            detail: Some(issue.state.clone()),
        };

        if let Some(merged_at) = merged {
            if window.contains(merged_at) {
                let kind = ActivityKind::ChangeRequestMerged;
                mapped.push(identity, kind, merged_at, metadata.clone());
            }
        }
        if issue.state == "open" || (merged.is_none() && window.contains(created)) {
            mapped.push(identity, ActivityKind::ChangeRequestOpened, created, metadata);
        }
    }
    mapped
}

pub fn map_discussions(identity: &Identity, items: Vec<Value>, window: &TimeWindow) -> Mapped {
    let mut mapped = Mapped::default();
    for item in items {
        let issue: IssueItem = match parse_item(item) {
            Ok(i) => i,
            Err(e) => {
                mapped.reject("discussion", e);
                continue;
            }
        };
        if issue.pull_request.is_some() {
            mapped.reject("discussion", format!("#{} is a change request", issue.number));
            continue;
        }
        let created = match parse_timestamp(&issue.created_at) {
            Ok(at) => at,
            Err(e) => {
                mapped.reject("discussion", e);
                continue;
            }
        };
        if window.contains(created) {
            let metadata = RecordMetadata {
                source_id: issue.number.to_string(),
                url: issue.html_url,
                repository: issue.repository_url.as_deref().and_then(repo_from_url),
                detail: Some(issue.state),
            };
            mapped.push(identity, ActivityKind::DiscussionOpened, created, metadata);
        }
    }
    mapped
}

/// Events outside the organization's repositories are out of scope, not
/// rejected.
pub fn map_events(
    identity: &Identity,
    items: Vec<Value>,
    window: &TimeWindow,
    organization: &str,
) -> Mapped {
    let mut mapped = Mapped::default();
    let prefix = format!("{}/", organization.to_lowercase());
    for item in items {
        let event: EventItem = match parse_item(item) {
            Ok(e) => e,
            Err(e) => {
                mapped.reject("event", e);
                continue;
            }
        };
        if !KNOWN_EVENT_TYPES.contains(&event.event_type.as_str()) {
            mapped.reject("event", format!("unrecognized event type {}", event.event_type));
            continue;
        }
        let at = match parse_timestamp(&event.created_at) {
            Ok(at) => at,
            Err(e) => {
                mapped.reject("event", e);
                continue;
            }
        };
        let repository = event.repo.map(|r| r.name);
        let in_org = repository
            .as_deref()
            .is_some_and(|name| name.to_lowercase().starts_with(&prefix));
        if in_org && window.contains(at) {
            let metadata = RecordMetadata {
                source_id: event.id,
                url: None,
                repository,
                detail: Some(event.event_type),
            };
            mapped.push(identity, ActivityKind::GenericEvent, at, metadata);
        }
    }
    mapped
}

/// The organization-wide comment stream, parsed once and shared by every
/// identity.
#[derive(Debug, Default)]
pub struct CommentStream {
    pub comments: Vec<StreamComment>,
    /// Rejected comments whose author login could still be read.
    pub rejected_by_login: BTreeMap<String, u64>,
    /// Rejected items with no readable author, including repository items.
    pub unattributed: u64,
    pub truncated: bool,
}

impl CommentStream {
    /// Parse one repository's comments into the stream.
    pub fn add_repository(&mut self, repository: &str, items: Vec<Value>) {
        for item in items {
            let login = item
                .get("user")
                .and_then(|user| user.get("login"))
                .and_then(Value::as_str)
                .map(String::from);
            let comment: CommentItem = match parse_item(item) {
                Ok(c) => c,
                Err(e) => {
                    self.reject(login, e);
                    continue;
                }
            };
            match parse_timestamp(&comment.created_at) {
                Ok(created_at) => self.comments.push(StreamComment {
                    id: comment.id,
                    login: comment.user.map(|u| u.login),
                    created_at,
                    url: comment.html_url,
                    repository: repository.to_string(),
                }),
                Err(e) => self.reject(login, format!("comment {}: {}", comment.id, e)),
            }
        }
    }

    /// Count an item that could not be read at all.
    pub fn reject_unattributed(&mut self, what: &str, reason: impl std::fmt::Display) {
        debug!("Rejected {} item: {}", what, reason);
        self.unattributed += 1;
    }

    fn reject(&mut self, login: Option<String>, reason: impl std::fmt::Display) {
        match login {
            Some(login) => {
                debug!("Rejected comment item by {}: {}", login, reason);
                *self.rejected_by_login.entry(login).or_insert(0) += 1;
            }
            None => self.reject_unattributed("comment", reason),
        }
    }

    pub fn rejected(&self) -> u64 {
        self.rejected_by_login.values().sum::<u64>() + self.unattributed
    }
}

/// Filter the shared comment stream down to one identity's in-window
/// comments. Rejected comments by the identity count against its row.
pub fn attribute_comments(
    identity: &Identity,
    stream: &CommentStream,
    window: &TimeWindow,
) -> Mapped {
    let mut mapped = Mapped {
        rejected: stream
            .rejected_by_login
            .get(identity.as_str())
            .copied()
            .unwrap_or(0),
        truncated: stream.truncated,
        ..Mapped::default()
    };
    for comment in &stream.comments {
        let authored = comment
            .login
            .as_deref()
            .is_some_and(|login| login == identity.as_str());
        if authored && window.contains(comment.created_at) {
            let metadata = RecordMetadata {
                source_id: comment.id.to_string(),
                url: comment.url.clone(),
                repository: Some(comment.repository.clone()),
                detail: None,
            };
            mapped.push(identity, ActivityKind::DiscussionComment, comment.created_at, metadata);
        }
    }
    mapped
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn window() -> TimeWindow {
        TimeWindow::lookback(Utc.with_ymd_and_hms(2024, 3, 31, 0, 0, 0).unwrap(), 30)
    }

    fn alice() -> Identity {
        Identity::new("alice")
    }

    fn pr(number: u64, state: &str, created: &str, merged: Option<&str>) -> Value {
        json!({
            "number": number,
            "state": state,
            "created_at": created,
            "repository_url": "https://api.github.com/repos/acme/widgets",
            "pull_request": {"merged_at": merged}
        })
    }

    #[test]
    fn test_commit_window_boundaries() {
        let items = vec![
            json!({"sha": "a", "commit": {"author": {"date": "2024-03-01T00:00:00Z"}}}),
            json!({"sha": "b", "commit": {"author": {"date": "2024-03-31T00:00:00Z"}}}),
            json!({"sha": "c", "commit": {"author": {"date": "2024-03-15T09:30:00.000+02:00"}},
                   "repository": {"full_name": "acme/widgets"}}),
        ];
        let mapped = map_commits(&alice(), items, &window());
        let shas: Vec<_> = mapped.records.iter().map(|r| r.metadata.source_id.as_str()).collect();
        assert_eq!(shas, vec!["a", "c"]);
        assert_eq!(mapped.records[1].metadata.repository.as_deref(), Some("acme/widgets"));
        assert_eq!(mapped.rejected, 0);
    }

    #[test]
    fn test_malformed_items_are_rejected() {
        let items = vec![
            json!({"sha": "a", "commit": {"author": {"date": "yesterday"}}}),
            json!({"sha": "b", "commit": {"author": null}}),
            json!({"unexpected": true}),
        ];
        let mapped = map_commits(&alice(), items, &window());
        assert!(mapped.records.is_empty());
        assert_eq!(mapped.rejected, 3);
    }

    #[test]
    fn test_change_request_rules() {
        let items = vec![
            // Opened and merged inside the window: merged only.
            pr(1, "closed", "2024-03-05T10:00:00Z", Some("2024-03-06T10:00:00Z")),
            // Opened in window, closed unmerged: opened.
            pr(2, "closed", "2024-03-07T10:00:00Z", None),
            // Old but still open: opened.
            pr(3, "open", "2023-12-01T10:00:00Z", None),
            // Opened before the window, merged inside: merged only.
            pr(4, "closed", "2024-02-01T10:00:00Z", Some("2024-03-02T10:00:00Z")),
            // Merged after the window ended: nothing.
            pr(5, "closed", "2024-02-01T10:00:00Z", Some("2024-04-02T10:00:00Z")),
        ];
        let mapped = map_change_requests(&alice(), items, &window());
        let summary: Vec<_> = mapped
            .records
            .iter()
            .map(|r| (r.metadata.source_id.as_str(), r.kind))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("1", ActivityKind::ChangeRequestMerged),
                ("2", ActivityKind::ChangeRequestOpened),
                ("3", ActivityKind::ChangeRequestOpened),
                ("4", ActivityKind::ChangeRequestMerged),
            ]
        );
        assert_eq!(mapped.records[0].metadata.repository.as_deref(), Some("acme/widgets"));
    }

    #[test]
    fn test_open_merged_request_yields_both_kinds() {
        // An open request carrying a merge timestamp counts on both rules.
        let items = vec![pr(9, "open", "2024-03-05T10:00:00Z", Some("2024-03-06T10:00:00Z"))];
        let mapped = map_change_requests(&alice(), items, &window());
        let kinds: Vec<_> = mapped.records.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![ActivityKind::ChangeRequestMerged, ActivityKind::ChangeRequestOpened]
        );
    }

    #[test]
    fn test_discussions_skip_change_requests() {
        let items = vec![
            json!({"number": 1, "state": "open", "created_at": "2024-03-03T00:00:00Z"}),
            pr(2, "open", "2024-03-03T00:00:00Z", None),
            json!({"number": 3, "state": "closed", "created_at": "2024-01-03T00:00:00Z"}),
        ];
        let mapped = map_discussions(&alice(), items, &window());
        assert_eq!(mapped.records.len(), 1);
        assert_eq!(mapped.rejected, 1);
    }

    #[test]
    fn test_events_reject_unknown_types_and_skip_other_orgs() {
        let items = vec![
            json!({"id": "1", "type": "PushEvent", "created_at": "2024-03-03T00:00:00Z",
                   "repo": {"name": "Acme/widgets"}}),
            json!({"id": "2", "type": "TeleportEvent", "created_at": "2024-03-03T00:00:00Z",
                   "repo": {"name": "acme/widgets"}}),
            json!({"id": "3", "type": "WatchEvent", "created_at": "2024-03-03T00:00:00Z",
                   "repo": {"name": "other/thing"}}),
        ];
        let mapped = map_events(&alice(), items, &window(), "acme");
        assert_eq!(mapped.records.len(), 1);
        assert_eq!(mapped.records[0].metadata.detail.as_deref(), Some("PushEvent"));
        assert_eq!(mapped.rejected, 1);
    }

    #[test]
    fn test_comment_attribution_filters_by_author() {
        let mut stream = CommentStream::default();
        stream.add_repository(
            "acme/widgets",
            vec![
                json!({"id": 1, "created_at": "2024-03-03T00:00:00Z", "user": {"login": "alice"}}),
                json!({"id": 2, "created_at": "2024-03-04T00:00:00Z", "user": {"login": "bob"}}),
                json!({"id": 3, "created_at": "2024-02-01T00:00:00Z", "user": {"login": "alice"}}),
                json!({"id": 4, "created_at": "2024-03-05T00:00:00Z", "user": null}),
                json!({"id": 5, "created_at": "garbage", "user": {"login": "alice"}}),
            ],
        );
        assert_eq!(stream.comments.len(), 4);
        assert_eq!(stream.rejected(), 1);

        let mapped = attribute_comments(&alice(), &stream, &window());
        assert_eq!(mapped.records.len(), 1);
        assert_eq!(mapped.records[0].metadata.source_id, "1");
        assert_eq!(mapped.records[0].kind, ActivityKind::DiscussionComment);
        assert_eq!(mapped.rejected, 1);
    }

    #[test]
    fn test_rejected_comments_reach_their_author() {
        let mut stream = CommentStream::default();
        stream.add_repository(
            "acme/widgets",
            vec![
                json!({"id": "not-a-number", "created_at": "2024-03-03T00:00:00Z",
                       "user": {"login": "bob"}}),
                json!({"id": 2, "created_at": "2024-03-04T00:00:00Z", "user": {"login": "bob"}}),
                json!({"unexpected": true}),
            ],
        );
        stream.reject_unattributed("repository", "missing name");

        assert_eq!(stream.rejected_by_login.get("bob"), Some(&1));
        assert_eq!(stream.unattributed, 2);
        assert_eq!(stream.rejected(), 3);

        let bob = attribute_comments(&Identity::new("bob"), &stream, &window());
        assert_eq!(bob.records.len(), 1);
        assert_eq!(bob.rejected, 1);
        assert_eq!(attribute_comments(&alice(), &stream, &window()).rejected, 0);
    }

    #[test]
    fn test_repo_from_url() {
        assert_eq!(
            repo_from_url("https://api.github.com/repos/acme/widgets").as_deref(),
            Some("acme/widgets")
        );
    }
}
