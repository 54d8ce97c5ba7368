//! Report assembly.

use crate::error::ReportError;
use crate::models::{Identity, Report, ReportMetadata, ScoreEntry};
use std::collections::BTreeMap;
use tracing::warn;

/// Assemble the final report from per-identity entries.
///
/// Ordering is by identity regardless of completion order. Every expected
/// identity appears exactly once: one without an entry gets a zero row
/// marked cancelled. Duplicate or unexpected entries fail the whole
/// assembly.
pub fn build(
    metadata: ReportMetadata,
    expected: &[Identity],
    entries: Vec<ScoreEntry>,
) -> Result<Report, ReportError> {
    let mut rows: BTreeMap<Identity, Option<ScoreEntry>> =
        expected.iter().map(|id| (id.clone(), None)).collect();

    for entry in entries {
        match rows.get_mut(&entry.identity) {
            None => return Err(ReportError::UnexpectedEntry(entry.identity.to_string())),
            Some(Some(_)) => return Err(ReportError::DuplicateEntry(entry.identity.to_string())),
            Some(slot) => *slot = Some(entry),
        }
    }

    let entries = rows
        .into_iter()
        .map(|(identity, entry)| {
            entry.unwrap_or_else(|| {
                warn!("{} did not finish, marking cancelled", identity);
                ScoreEntry::cancelled(identity)
            })
        })
        .collect();

    Ok(Report { metadata, entries })
}
