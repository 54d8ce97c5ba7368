//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.contrib-tally.toml` files.

use crate::cli::{Args, OutputFormat};
use crate::client::{ClientConfig, RetryPolicy};
use crate::fetcher::FetcherConfig;
use crate::models::Rubric;
use crate::resolver::Scope;
use crate::source::HttpSourceConfig;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name.
pub const CONFIG_FILE: &str = ".contrib-tally.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Remote source settings.
    #[serde(default)]
    pub source: SourceConfig,

    /// Backoff for transient failures.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Which identities to score.
    #[serde(default)]
    pub scope: ScopeConfig,

    /// Lookback window.
    #[serde(default)]
    pub window: WindowConfig,

    /// Scoring weights. A weight missing from the section is 0.
    #[serde(default = "default_rubric")]
    pub rubric: Rubric,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            source: SourceConfig::default(),
            retry: RetryConfig::default(),
            scope: ScopeConfig::default(),
            window: WindowConfig::default(),
            rubric: default_rubric(),
        }
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default output file path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Report format.
    #[serde(default)]
    pub format: OutputFormat,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,

    /// Number of identities processed concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Run-level deadline in seconds. Unset means no deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            format: OutputFormat::default(),
            verbose: false,
            concurrency: default_concurrency(),
            timeout_seconds: None,
        }
    }
}

fn default_output() -> String {
    "contrib_report.csv".to_string()
}

fn default_concurrency() -> usize {
    4
}

/// Remote source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// API base URL.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Access token. Falls back to `GITHUB_TOKEN`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Items per page (1-100).
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Page cap per query.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Requests held back from the quota.
    #[serde(default = "default_budget_floor")]
    pub budget_floor: u64,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// Longest single wait for a quota reset.
    #[serde(default = "default_max_reset_wait")]
    pub max_reset_wait_seconds: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            token: None,
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            budget_floor: default_budget_floor(),
            request_timeout_seconds: default_request_timeout(),
            max_reset_wait_seconds: default_max_reset_wait(),
        }
    }
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_page_size() -> u32 {
    100
}

fn default_max_pages() -> u32 {
    10 // search results stop at 1000 items
}

fn default_budget_floor() -> u64 {
    1
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_reset_wait() -> u64 {
    900
}

/// Retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per page, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    500
}

fn default_max_delay() -> u64 {
    30_000
}

/// Scope settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScopeConfig {
    /// Organization whose members and repositories are in scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,

    /// Explicit member handles. Wins over enumeration when non-empty.
    #[serde(default)]
    pub members: Vec<String>,
}

/// Window settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            lookback_days: default_lookback_days(),
        }
    }
}

fn default_lookback_days() -> u32 {
    30
}

fn default_rubric() -> Rubric {
    Rubric {
        commit: 5.0,
        change_request_opened: 3.0,
        change_request_merged: 10.0,
        discussion_opened: 4.0,
        discussion_comment: 2.0,
        generic_event: 0.0,
        active_day: 2.0,
    }
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// Only values given explicitly on the command line override.
    pub fn merge_with_args(&mut self, args: &Args) {
        if let Some(ref org) = args.org {
            self.scope.organization = Some(org.clone());
        }
        if let Some(ref members) = args.members {
            self.scope.members = members.clone();
        }
        if let Some(days) = args.lookback_days {
            self.window.lookback_days = days;
        }

        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }
        if let Some(format) = args.format {
            self.general.format = format;
        }
        if let Some(concurrency) = args.concurrency {
            self.general.concurrency = concurrency;
        }
        if let Some(timeout) = args.timeout {
            self.general.timeout_seconds = Some(timeout);
        }

        if let Some(page_size) = args.page_size {
            self.source.page_size = page_size;
        }
        if let Some(max_pages) = args.max_pages {
            self.source.max_pages = max_pages;
        }
        if let Some(ref api_url) = args.api_url {
            self.source.api_url = api_url.clone();
        }
        if let Some(ref token) = args.token {
            self.source.token = Some(token.clone());
        }

        // Flags always override
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.general.concurrency == 0 {
            bail!("Concurrency must be at least 1");
        }
        if !(1..=100).contains(&self.source.page_size) {
            bail!("Page size must be between 1 and 100");
        }
        if self.source.max_pages == 0 {
            bail!("Max pages must be at least 1");
        }
        if self.window.lookback_days == 0 {
            bail!("Lookback must be at least 1 day");
        }
        if self.general.timeout_seconds == Some(0) {
            bail!("Timeout must be at least 1 second");
        }
        if self.retry.max_attempts == 0 {
            bail!("Retry attempts must be at least 1");
        }
        let api_url = &self.source.api_url;
        if !api_url.starts_with("http://") && !api_url.starts_with("https://") {
            bail!("API URL must start with 'http://' or 'https://'");
        }
        if let Some(name) = self.rubric.first_non_finite() {
            bail!("Rubric weight '{}' must be a finite number", name);
        }
        self.scope()?;
        Ok(())
    }

    /// The run scope. An explicit member list wins over enumeration.
    pub fn scope(&self) -> Result<Scope> {
        let organization = match self.scope.organization.as_deref().map(str::trim) {
            Some(org) if !org.is_empty() => org.to_string(),
            _ => bail!("No organization configured (use --org or [scope] organization)"),
        };
        let members = if self.scope.members.is_empty() {
            None
        } else {
            Some(self.scope.members.clone())
        };
        Ok(Scope {
            organization,
            members,
        })
    }

    /// Token from the config or CLI, else from `GITHUB_TOKEN`.
    pub fn token(&self) -> Option<String> {
        self.source
            .token
            .clone()
            .or_else(|| std::env::var("GITHUB_TOKEN").ok())
            .filter(|t| !t.trim().is_empty())
    }

    /// Log level after merging. `--quiet` wins over a configured `verbose`.
    pub fn log_level(&self, quiet: bool) -> tracing::Level {
        if quiet {
            tracing::Level::ERROR
        } else if self.general.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    pub fn output_path(&self) -> PathBuf {
        PathBuf::from(&self.general.output)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.general.timeout_seconds.map(Duration::from_secs)
    }

    pub fn http_config(&self) -> HttpSourceConfig {
        HttpSourceConfig {
            api_url: self.source.api_url.clone(),
            token: self.token(),
            timeout_seconds: self.source.request_timeout_seconds,
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            budget_floor: self.source.budget_floor,
            max_reset_wait: Duration::from_secs(self.source.max_reset_wait_seconds),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }

    pub fn fetcher_config(&self, organization: &str) -> FetcherConfig {
        FetcherConfig {
            organization: organization.to_string(),
            page_size: self.source.page_size,
            max_pages: self.source.max_pages,
            retry: self.retry_policy(),
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config {
            scope: ScopeConfig {
                organization: Some("my-org".to_string()),
                members: Vec::new(),
            },
            ..Config::default()
        };
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_org() -> Config {
        let mut config = Config::default();
        config.scope.organization = Some("acme".to_string());
        config
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.general.concurrency, 4);
        assert_eq!(config.general.format, OutputFormat::Csv);
        assert_eq!(config.source.page_size, 100);
        assert_eq!(config.window.lookback_days, 30);
        assert_eq!(config.rubric.change_request_merged, 10.0);
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
output = "team.json"
format = "json"
concurrency = 8

[source]
page_size = 50

[scope]
organization = "acme"
members = ["alice", "bob"]

[rubric]
commit = 1.5
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.general.output, "team.json");
        assert_eq!(config.general.format, OutputFormat::Json);
        assert_eq!(config.general.concurrency, 8);
        assert_eq!(config.source.page_size, 50);
        assert_eq!(config.source.max_pages, 10);
        assert_eq!(config.rubric.commit, 1.5);
        // Missing weights inside the section are zero, not defaults.
        assert_eq!(config.rubric.change_request_merged, 0.0);

        let scope = config.scope().unwrap();
        assert_eq!(scope.organization, "acme");
        assert_eq!(scope.members, Some(vec!["alice".to_string(), "bob".to_string()]));
    }

    #[test]
    fn test_missing_rubric_section_uses_defaults() {
        let config: Config = toml::from_str("[scope]\norganization = \"acme\"\n").unwrap();
        assert_eq!(config.rubric, default_rubric());
        assert_eq!(config.scope().unwrap().members, None);
    }

    #[test]
    fn test_validation() {
        assert!(with_org().validate().is_ok());
        assert!(Config::default().validate().is_err());

        let mut config = with_org();
        config.source.page_size = 101;
        assert!(config.validate().is_err());

        let mut config = with_org();
        config.window.lookback_days = 0;
        assert!(config.validate().is_err());

        let mut config = with_org();
        config.general.concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = with_org();
        config.rubric.discussion_comment = f64::NAN;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("discussion_comment"));
    }

    #[test]
    fn test_policies_from_config() {
        let mut config = with_org();
        config.retry.base_delay_ms = 250;
        config.source.max_reset_wait_seconds = 60;

        assert_eq!(config.retry_policy().base_delay, Duration::from_millis(250));
        assert_eq!(config.client_config().max_reset_wait, Duration::from_secs(60));
        assert_eq!(config.fetcher_config("acme").organization, "acme");
        assert_eq!(config.run_timeout(), None);
    }

    #[test]
    fn test_log_level_from_config() {
        let config: Config = toml::from_str("[general]\nverbose = true\n").unwrap();
        assert_eq!(config.log_level(false), tracing::Level::DEBUG);
        assert_eq!(config.log_level(true), tracing::Level::ERROR);
        assert_eq!(Config::default().log_level(false), tracing::Level::INFO);
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[source]"));
        assert!(toml_str.contains("[rubric]"));
        assert!(!toml_str.contains("token"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert!(parsed.validate().is_ok());
    }
}
