//! Data models for the contribution tally.
//!
//! This module contains the core data structures shared across the
//! pipeline: identities, time windows, activity records, rubric weights,
//! score entries and the final report.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A contributor handle (a login). Ordered lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Half-open lookback interval `[since, until)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

impl TimeWindow {
    /// Window of `lookback_days` days ending (exclusively) at `until`.
    pub fn lookback(until: DateTime<Utc>, lookback_days: u32) -> Self {
        Self {
            since: until - Duration::days(i64::from(lookback_days)),
            until,
        }
    }

    /// Inclusive lower bound, exclusive upper bound.
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.since <= ts && ts < self.until
    }

    /// `since` in the `YYYY-MM-DD` form used by date-qualified search filters.
    pub fn since_date(&self) -> String {
        self.since.format("%Y-%m-%d").to_string()
    }
}

/// Kind of an observed activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Commit,
    ChangeRequestOpened,
    ChangeRequestMerged,
    DiscussionOpened,
    DiscussionComment,
    GenericEvent,
}

impl ActivityKind {
    /// Canonical order. Report columns and score summation follow it.
    pub const ALL: [ActivityKind; 6] = [
        ActivityKind::Commit,
        ActivityKind::ChangeRequestOpened,
        ActivityKind::ChangeRequestMerged,
        ActivityKind::DiscussionOpened,
        ActivityKind::DiscussionComment,
        ActivityKind::GenericEvent,
    ];

    /// Column name used by tabular sinks.
    pub fn column(&self) -> &'static str {
        match self {
            ActivityKind::Commit => "commit",
            ActivityKind::ChangeRequestOpened => "change_request_opened",
            ActivityKind::ChangeRequestMerged => "change_request_merged",
            ActivityKind::DiscussionOpened => "discussion_opened",
            ActivityKind::DiscussionComment => "discussion_comment",
            ActivityKind::GenericEvent => "generic_event",
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivityKind::Commit => write!(f, "Commit"),
            ActivityKind::ChangeRequestOpened => write!(f, "Change Request Opened"),
            ActivityKind::ChangeRequestMerged => write!(f, "Change Request Merged"),
            ActivityKind::DiscussionOpened => write!(f, "Discussion Opened"),
            ActivityKind::DiscussionComment => write!(f, "Discussion Comment"),
            ActivityKind::GenericEvent => write!(f, "Event"),
        }
    }
}

/// Source details kept alongside a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// Identifier of the item at the source (sha, number, event id).
    pub source_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    /// Free-form detail, e.g. the event type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// One observed event, owned by a single identity's aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub identity: Identity,
    pub kind: ActivityKind,
    pub timestamp: DateTime<Utc>,
    pub metadata: RecordMetadata,
}

/// Weight table converting activity counts into points.
///
/// Every kind has a field, so a weight can never be silently absent: one
/// missing from the config file is an explicit `0.0` via `#[serde(default)]`.
/// Negative weights are allowed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rubric {
    pub commit: f64,
    pub change_request_opened: f64,
    pub change_request_merged: f64,
    pub discussion_opened: f64,
    pub discussion_comment: f64,
    pub generic_event: f64,
    /// Weight per active day.
    pub active_day: f64,
}

impl Rubric {
    pub fn weight(&self, kind: ActivityKind) -> f64 {
        match kind {
            ActivityKind::Commit => self.commit,
            ActivityKind::ChangeRequestOpened => self.change_request_opened,
            ActivityKind::ChangeRequestMerged => self.change_request_merged,
            ActivityKind::DiscussionOpened => self.discussion_opened,
            ActivityKind::DiscussionComment => self.discussion_comment,
            ActivityKind::GenericEvent => self.generic_event,
        }
    }

    /// Returns the name of the first non-finite weight, if any.
    pub fn first_non_finite(&self) -> Option<&'static str> {
        ActivityKind::ALL
            .iter()
            .map(|kind| (kind.column(), self.weight(*kind)))
            .chain(std::iter::once(("active_day", self.active_day)))
            .find(|(_, w)| !w.is_finite())
            .map(|(name, _)| name)
    }
}

/// Per-kind counts with every kind present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCounts(BTreeMap<ActivityKind, u64>);

impl Default for RawCounts {
    fn default() -> Self {
        Self(ActivityKind::ALL.iter().map(|k| (*k, 0)).collect())
    }
}

impl RawCounts {
    pub fn from_records(records: &[ActivityRecord]) -> Self {
        let mut counts = Self::default();
        for record in records {
            counts.add(record.kind, 1);
        }
        counts
    }

    pub fn get(&self, kind: ActivityKind) -> u64 {
        self.0.get(&kind).copied().unwrap_or(0)
    }

    #[cfg(test)]
    pub fn set(&mut self, kind: ActivityKind, count: u64) {
        self.0.insert(kind, count);
    }

    pub fn add(&mut self, kind: ActivityKind, count: u64) {
        *self.0.entry(kind).or_insert(0) += count;
    }

    pub fn iter(&self) -> impl Iterator<Item = (ActivityKind, u64)> + '_ {
        ActivityKind::ALL.iter().map(move |k| (*k, self.get(*k)))
    }
}

/// Distinct UTC dates with at least one in-window record.
///
/// This is a presence proxy inferred from activity timestamps, not a record
/// of actual sign-ins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveDaySet(BTreeSet<NaiveDate>);

impl ActiveDaySet {
    pub fn derive(records: &[ActivityRecord], window: &TimeWindow) -> Self {
        Self(
            records
                .iter()
                .filter(|r| window.contains(r.timestamp))
                .map(|r| r.timestamp.date_naive())
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[allow(dead_code)] // Paired with len()
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Outcome of scoring one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum EntryStatus {
    Ok,
    PartialFailure(String),
}

impl EntryStatus {
    pub fn cancelled() -> Self {
        EntryStatus::PartialFailure("cancelled".to_string())
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, EntryStatus::Ok)
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryStatus::Ok => write!(f, "ok"),
            EntryStatus::PartialFailure(reason) => write!(f, "partial_failure: {}", reason),
        }
    }
}

/// Scored row for one identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub identity: Identity,
    pub raw_counts: RawCounts,
    /// Distinct active UTC dates (proxy metric).
    pub active_days: u64,
    pub total_score: f64,
    pub status: EntryStatus,
    /// Remote items that could not be mapped to a record.
    #[serde(default)]
    pub rejected_items: u64,
}

impl ScoreEntry {
    /// Zero row for an identity that never finished.
    pub fn cancelled(identity: Identity) -> Self {
        Self {
            identity,
            raw_counts: RawCounts::default(),
            active_days: 0,
            total_score: 0.0,
            status: EntryStatus::cancelled(),
            rejected_items: 0,
        }
    }
}

/// Deterministic inputs that shaped a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// Scope the identities were resolved from.
    pub scope: String,
    pub window: TimeWindow,
    pub lookback_days: u32,
    pub rubric: Rubric,
    /// Shared-stream items rejected without a readable author.
    #[serde(default)]
    pub unattributed_rejected_items: u64,
}

/// The final report: entries sorted by identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub metadata: ReportMetadata,
    pub entries: Vec<ScoreEntry>,
}

impl Report {
    pub fn partial_failures(&self) -> usize {
        self.entries.iter().filter(|e| !e.status.is_ok()).count()
    }
}
