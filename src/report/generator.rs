//! Report serialization.
//!
//! This module renders an assembled report as CSV, JSON or Markdown. The
//! output depends only on the report, so identical reports serialize to
//! identical bytes.

use crate::cli::OutputFormat;
use crate::models::{ActivityKind, EntryStatus, Report, ReportMetadata, ScoreEntry};
use anyhow::Result;

/// Serialize a report for a sink.
pub fn serialize(report: &Report, format: OutputFormat) -> Result<Vec<u8>> {
    let content = match format {
        OutputFormat::Csv => generate_csv_report(report),
        OutputFormat::Json => generate_json_report(report)?,
        OutputFormat::Markdown => generate_markdown_report(report),
    };
    Ok(content.into_bytes())
}

/// Header row: identity, score, one column per kind, active days, status.
pub fn csv_header() -> String {
    let mut columns = vec!["identity", "total_score"];
    columns.extend(ActivityKind::ALL.iter().map(|k| k.column()));
    columns.push("active_days");
    columns.push("status");
    columns.join(",")
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn csv_row(entry: &ScoreEntry) -> String {
    let mut fields = vec![
        csv_field(entry.identity.as_str()),
        entry.total_score.to_string(),
    ];
    fields.extend(entry.raw_counts.iter().map(|(_, count)| count.to_string()));
    fields.push(entry.active_days.to_string());
    fields.push(csv_field(&entry.status.to_string()));
    fields.join(",")
}

/// Generate a CSV report with a fixed column order.
pub fn generate_csv_report(report: &Report) -> String {
    let mut output = csv_header();
    output.push('\n');
    for entry in &report.entries {
        output.push_str(&csv_row(entry));
        output.push('\n');
    }
    output
}

/// Generate a JSON report.
pub fn generate_json_report(report: &Report) -> Result<String> {
    let mut json = serde_json::to_string_pretty(report)?;
    json.push('\n');
    Ok(json)
}

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &Report) -> String {
    let mut output = String::new();

    output.push_str("# Contribution Report\n\n");
    output.push_str(&generate_metadata_section(&report.metadata));
    output.push_str(&generate_scores_section(report));
    output.push_str(&generate_failures_section(report));
    output.push_str(&generate_rubric_section(&report.metadata));
    output.push_str(&generate_footer());

    output
}

fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Scope:** {}\n", metadata.scope));
    section.push_str(&format!(
        "- **Window:** {} to {} (exclusive)\n",
        metadata.window.since.format("%Y-%m-%d %H:%M:%S UTC"),
        metadata.window.until.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Lookback:** {} days\n", metadata.lookback_days));
    section.push('\n');

    section
}

fn generate_scores_section(report: &Report) -> String {
    let mut section = String::new();

    section.push_str("## Scores\n\n");
    if report.entries.is_empty() {
        section.push_str("No identities in scope.\n\n");
        return section;
    }

    section.push_str("| Identity | Score |");
    for kind in ActivityKind::ALL {
        section.push_str(&format!(" {} |", kind));
    }
    section.push_str(" Active Days | Status |\n");
    section.push_str("|:---|---:|");
    for _ in ActivityKind::ALL {
        section.push_str("---:|");
    }
    section.push_str("---:|:---|\n");

    for entry in &report.entries {
        section.push_str(&format!("| {} | {} |", entry.identity, entry.total_score));
        for (_, count) in entry.raw_counts.iter() {
            section.push_str(&format!(" {} |", count));
        }
        let status = match entry.status {
            EntryStatus::Ok => "ok",
            EntryStatus::PartialFailure(_) => "partial",
        };
        section.push_str(&format!(" {} | {} |\n", entry.active_days, status));
    }
    section.push('\n');
    section.push_str(
        "*Active days are inferred from activity timestamps. They approximate presence \
         and are not sign-in records.*\n\n",
    );

    section
}

fn generate_failures_section(report: &Report) -> String {
    let failed: Vec<_> = report
        .entries
        .iter()
        .filter_map(|e| match e.status {
            EntryStatus::PartialFailure(ref reason) => Some((e, reason)),
            EntryStatus::Ok => None,
        })
        .collect();
    let rejected: u64 = report.entries.iter().map(|e| e.rejected_items).sum();
    let unattributed = report.metadata.unattributed_rejected_items;

    if failed.is_empty() && rejected == 0 && unattributed == 0 {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("## Partial Results\n\n");
    for (entry, reason) in failed {
        section.push_str(&format!("- **{}**: {}\n", entry.identity, reason));
    }
    if rejected > 0 {
        section.push_str(&format!(
            "- {} remote items could not be recognized and were not scored\n",
            rejected
        ));
    }
    if unattributed > 0 {
        section.push_str(&format!(
            "- {} shared comment items had no readable author and were not attributed\n",
            unattributed
        ));
    }
    section.push('\n');

    section
}

fn generate_rubric_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Rubric\n\n");
    section.push_str("| Kind | Weight |\n");
    section.push_str("|:---|---:|\n");
    for kind in ActivityKind::ALL {
        section.push_str(&format!("| {} | {} |\n", kind, metadata.rubric.weight(kind)));
    }
    section.push_str(&format!("| Active Day | {} |\n\n", metadata.rubric.active_day));

    section
}

fn generate_footer() -> String {
    "---\n\n*Report generated by contrib-tally*\n".to_string()
}
