//! contrib-tally - contribution activity scoring for GitHub organizations
//!
//! Resolves the members of an organization, collects their activity over a
//! lookback window through the rate-limited REST API, scores it with a
//! weighted rubric, and writes a CSV, JSON or Markdown report.
//!
//! Exit codes:
//!   0 - Report written (possibly with partial failures)
//!   1 - Invalid arguments or configuration, identity resolution failure,
//!       or the report could not be written

mod cli;
mod client;
mod config;
mod error;
mod fetcher;
mod models;
mod pipeline;
mod report;
mod resolver;
mod scoring;
mod source;

use anyhow::{Context, Result};
use chrono::Utc;
use cli::Args;
use client::RateLimitedClient;
use config::{Config, CONFIG_FILE};
use fetcher::ActivityFetcher;
use models::{Report, TimeWindow};
use pipeline::{Pipeline, RunSettings};
use report::{FileSink, ReportSink};
use resolver::IdentityResolver;
use source::{HttpSource, Quota};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Load configuration first so its verbosity applies to logging
    let (mut config, config_path) = match load_config(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };
    config.merge_with_args(&args);

    // Initialize logging
    init_logging(config.log_level(args.quiet));

    info!("contrib-tally v{}", env!("CARGO_PKG_VERSION"));
    match config_path {
        Some(path) => info!("Loaded config from {}", path.display()),
        None => debug!("No config file found, using defaults"),
    }

    match run(args, config).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Run failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .contrib-tally.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!("⚠️  {} already exists. Remove it first or edit it manually.", CONFIG_FILE);
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Edit it to set the organization, rubric weights, and limits.");
    Ok(())
}

/// Initialize logging at the given level. `RUST_LOG` wins when set.
fn init_logging(level: tracing::Level) {
    let builder = FmtSubscriber::builder()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    let result = if std::env::var_os("RUST_LOG").is_some() {
        tracing::subscriber::set_global_default(
            builder.with_env_filter(EnvFilter::from_default_env()).finish(),
        )
    } else {
        tracing::subscriber::set_global_default(builder.with_max_level(level).finish())
    };

    if let Err(e) = result {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Run the complete scoring workflow. Returns the exit code.
async fn run(args: Args, config: Config) -> Result<i32> {
    let start_time = Instant::now();

    config.validate().context("Invalid configuration")?;

    let scope = config.scope()?;
    let as_of = args.parse_as_of().map_err(anyhow::Error::msg)?;
    let lookback_days = config.window.lookback_days;
    let window = TimeWindow::lookback(as_of.unwrap_or_else(Utc::now), lookback_days);

    // Step 1: Connect to the source
    let http_config = config.http_config();
    if http_config.token.is_none() {
        info!("No access token configured, using unauthenticated requests");
    }
    let source = Arc::new(HttpSource::new(http_config)?);
    let client = Arc::new(RateLimitedClient::new(source, config.client_config()));

    let resolver = IdentityResolver::new(
        client.clone(),
        config.source.page_size,
        config.source.max_pages,
        config.retry_policy(),
    );

    // Handle --dry-run: resolve identities and exit
    if args.dry_run {
        return handle_dry_run(&resolver, &scope).await;
    }

    println!("🔎 Scoring {} over {}", scope, window_label(&window));
    println!("   Lookback: {} days", lookback_days);
    println!("   Concurrency: {}", config.general.concurrency);
    if let Some(timeout) = config.general.timeout_seconds {
        println!("   Timeout: {}s", timeout);
    }

    // Step 2: Fetch and score every identity
    let fetcher = Arc::new(ActivityFetcher::new(
        client.clone(),
        config.fetcher_config(&scope.organization),
    ));
    let settings = RunSettings {
        concurrency: config.general.concurrency,
        timeout: config.run_timeout(),
        show_progress: !args.quiet,
    };
    let pipeline = Pipeline::new(resolver, fetcher, Arc::new(config.rubric), settings);

    let report = pipeline
        .run(&scope, window, lookback_days, interrupted())
        .await?;
    debug!(
        "Final request budget: core {:?}, search {:?}",
        client.budget(Quota::Core),
        client.budget(Quota::Search)
    );

    // Step 3: Serialize and save the report
    let output_path = config.output_path();
    let bytes = report::serialize(&report, config.general.format)?;
    let sink = FileSink::new(&output_path);
    sink.write(&bytes)
        .with_context(|| format!("Failed to write report to {}", sink.path().display()))?;

    print_summary(&report, start_time.elapsed().as_secs_f64());
    println!("\n✅ Report saved to: {}", output_path.display());

    Ok(0)
}

/// Resolves once Ctrl-C is received.
async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler available; never cancel.
        futures::future::pending::<()>().await;
    }
    info!("Interrupt received, finishing with completed identities");
}

/// Handle --dry-run: resolve identities, print them, exit.
async fn handle_dry_run(resolver: &IdentityResolver, scope: &resolver::Scope) -> Result<i32> {
    println!("\n🔍 Dry run: resolving identities (no activity fetched)...\n");

    let identities = resolver.resolve(scope).await?;

    println!("   Found {} identities in {}:\n", identities.len(), scope);
    for identity in &identities {
        println!("     👤 {}", identity);
    }

    println!("\n✅ Dry run complete. No activity was fetched.");
    Ok(0)
}

fn print_summary(report: &Report, duration: f64) {
    let partial = report.partial_failures();
    let rejected: u64 = report.entries.iter().map(|e| e.rejected_items).sum();

    println!("\n📊 Run Summary:");
    println!("   Identities: {}", report.entries.len());
    println!("   Complete: {} | Partial: {}", report.entries.len() - partial, partial);
    let rejected = rejected + report.metadata.unattributed_rejected_items;
    if rejected > 0 {
        println!("   Unrecognized items skipped: {}", rejected);
    }
    if let Some(top) = report
        .entries
        .iter()
        .max_by(|a, b| a.total_score.total_cmp(&b.total_score))
    {
        println!("   Top score: {} ({})", top.identity, top.total_score);
    }
    println!("   Duration: {:.1}s", duration);
}

fn window_label(window: &TimeWindow) -> String {
    format!(
        "{} to {}",
        window.since.format("%Y-%m-%d %H:%M"),
        window.until.format("%Y-%m-%d %H:%M")
    )
}

/// Load configuration from file or use defaults, with the path it came from.
fn load_config(args: &Args) -> Result<(Config, Option<PathBuf>)> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        return Ok((Config::load(config_path)?, Some(config_path.clone())));
    }

    // Try default location
    Ok(match Config::load_default()? {
        Some(config) => (config, Some(PathBuf::from(CONFIG_FILE))),
        None => (Config::default(), None),
    })
}
