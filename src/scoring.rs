//! Rubric scoring.

use crate::fetcher::FetchOutcome;
use crate::models::{
    ActiveDaySet, ActivityKind, EntryStatus, Identity, RawCounts, Rubric, ScoreEntry, TimeWindow,
};

/// Weighted total: every kind's count times its weight, plus active days
/// times the active-day weight. Summed in canonical kind order; never clamped.
pub fn score(raw_counts: &RawCounts, active_days: u64, rubric: &Rubric) -> f64 {
    let activity: f64 = ActivityKind::ALL
        .iter()
        .map(|kind| raw_counts.get(*kind) as f64 * rubric.weight(*kind))
        .sum();
    activity + active_days as f64 * rubric.active_day
}

/// Turn one identity's fetch outcome into its report row.
pub fn score_entry(
    identity: Identity,
    outcome: &FetchOutcome,
    window: &TimeWindow,
    rubric: &Rubric,
) -> ScoreEntry {
    let raw_counts = RawCounts::from_records(&outcome.records);
    let active_days = ActiveDaySet::derive(&outcome.records, window).len() as u64;
    let total_score = score(&raw_counts, active_days, rubric);

    let status = if outcome.failures.is_empty() {
        EntryStatus::Ok
    } else {
        let mut failures = outcome.failures.clone();
        failures.sort_by_key(|f| f.group);
        let reason = failures
            .iter()
            .map(|f| format!("{}: {}", f.group, f.reason))
            .collect::<Vec<_>>()
            .join("; ");
        EntryStatus::PartialFailure(reason)
    };

    ScoreEntry {
        identity,
        raw_counts,
        active_days,
        total_score,
        status,
        rejected_items: outcome.rejected,
    }
}
