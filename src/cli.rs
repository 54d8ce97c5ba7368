//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation. Most flags are optional so that values from
//! `.contrib-tally.toml` apply unless overridden here.

use chrono::{DateTime, Utc};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// contrib-tally - score contribution activity for an organization
///
/// Collects commits, pull requests, issues, comments and events for every
/// member of a GitHub organization over a lookback window, weighs them with
/// a configurable rubric, and writes one report.
///
/// Examples:
///   contrib-tally --org acme
///   contrib-tally --org acme --members alice,bob --lookback-days 14
///   contrib-tally --org acme --format markdown --output team.md
///   contrib-tally --org acme --as-of 2024-04-01T00:00:00Z
///   contrib-tally --org acme --dry-run
///   contrib-tally --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Organization to score
    ///
    /// Can also be set in the [scope] section of .contrib-tally.toml.
    #[arg(long, value_name = "ORG", env = "CONTRIB_TALLY_ORG")]
    pub org: Option<String>,

    /// Explicit member handles (comma-separated)
    ///
    /// Skips enumerating the organization's members.
    /// Example: --members alice,bob
    #[arg(long, value_name = "HANDLES", value_delimiter = ',')]
    pub members: Option<Vec<String>>,

    /// Number of days to look back
    #[arg(long, value_name = "DAYS")]
    pub lookback_days: Option<u32>,

    /// End of the window (RFC 3339, exclusive)
    ///
    /// Defaults to the run start. Pinning it makes reruns reproducible.
    #[arg(long, value_name = "TIMESTAMP")]
    pub as_of: Option<String>,

    /// Output file path for the report
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (csv, json, markdown)
    #[arg(long, value_name = "FORMAT")]
    pub format: Option<OutputFormat>,

    /// Number of identities processed concurrently
    #[arg(long, value_name = "NUM")]
    pub concurrency: Option<usize>,

    /// Items requested per page (1-100)
    #[arg(long, value_name = "NUM")]
    pub page_size: Option<u32>,

    /// Maximum pages fetched per query
    #[arg(long, value_name = "NUM")]
    pub max_pages: Option<u32>,

    /// Run timeout in seconds
    ///
    /// Identities still in flight when it expires are reported as cancelled.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .contrib-tally.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// API base URL
    #[arg(long, value_name = "URL", env = "CONTRIB_TALLY_API_URL")]
    pub api_url: Option<String>,

    /// Access token for the API
    #[arg(long, value_name = "TOKEN", env = "CONTRIB_TALLY_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Dry run: resolve identities without fetching activity
    #[arg(long)]
    pub dry_run: bool,

    /// Generate a default .contrib-tally.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// CSV format (default)
    #[default]
    Csv,
    /// JSON format
    Json,
    /// Markdown format
    Markdown,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if self.concurrency == Some(0) {
            return Err("Concurrency must be at least 1".to_string());
        }

        if let Some(page_size) = self.page_size {
            if !(1..=100).contains(&page_size) {
                return Err("Page size must be between 1 and 100".to_string());
            }
        }

        if self.max_pages == Some(0) {
            return Err("Max pages must be at least 1".to_string());
        }

        if self.lookback_days == Some(0) {
            return Err("Lookback must be at least 1 day".to_string());
        }

        // Validate timeout if provided
        if self.timeout == Some(0) {
            return Err("Timeout must be at least 1 second".to_string());
        }

        if let Some(ref url) = self.api_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("API URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if let Some(ref members) = self.members {
            if members.iter().all(|m| m.trim().is_empty()) {
                return Err("--members needs at least one handle".to_string());
            }
        }

        self.parse_as_of()?;

        Ok(())
    }

    /// The pinned window end, if given.
    pub fn parse_as_of(&self) -> Result<Option<DateTime<Utc>>, String> {
        self.as_of
            .as_deref()
            .map(|raw| {
                DateTime::parse_from_rfc3339(raw)
                    .map(|ts| ts.with_timezone(&Utc))
                    .map_err(|e| format!("Invalid --as-of timestamp '{}': {}", raw, e))
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn make_args() -> Args {
        Args {
            org: Some("acme".to_string()),
            members: None,
            lookback_days: None,
            as_of: None,
            output: None,
            format: None,
            concurrency: None,
            page_size: None,
            max_pages: None,
            timeout: None,
            config: None,
            api_url: None,
            token: None,
            verbose: false,
            quiet: false,
            dry_run: false,
            init_config: false,
        }
    }

    #[test]
    fn test_parse_from_command_line() {
        let args = Args::try_parse_from([
            "contrib-tally",
            "--org",
            "acme",
            "--members",
            "alice,bob",
            "--format",
            "markdown",
            "--lookback-days",
            "14",
        ])
        .unwrap();

        assert_eq!(args.org.as_deref(), Some("acme"));
        assert_eq!(args.members, Some(vec!["alice".to_string(), "bob".to_string()]));
        assert_eq!(args.format, Some(OutputFormat::Markdown));
        assert_eq!(args.lookback_days, Some(14));
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut args = make_args();
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_ranges() {
        assert!(make_args().validate().is_ok());

        let mut args = make_args();
        args.page_size = Some(0);
        assert!(args.validate().is_err());

        let mut args = make_args();
        args.concurrency = Some(0);
        assert!(args.validate().is_err());

        let mut args = make_args();
        args.api_url = Some("ftp://example.com".to_string());
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_parse_as_of() {
        let mut args = make_args();
        assert_eq!(args.parse_as_of().unwrap(), None);

        args.as_of = Some("2024-04-01T02:00:00+02:00".to_string());
        assert_eq!(
            args.parse_as_of().unwrap(),
            Some(Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap())
        );

        args.as_of = Some("yesterday".to_string());
        assert!(args.validate().is_err());
    }
}
