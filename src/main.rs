//! Prompt-Harvest main entry point
//!
//! This is the command-line interface for the Prompt-Harvest harvester.

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use prompt_harvest::cache::{CacheMode, ResultCache};
use prompt_harvest::config::{load_config_with_hash, Config};
use prompt_harvest::output::{print_summary, TargetStatus};
use prompt_harvest::{canonicalize_url, Harvester};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Prompt-Harvest: an adaptive, polite prompt harvester
///
/// Prompt-Harvest fetches a list of category pages from one site while an
/// adaptive control loop spaces requests out, backs off after failures and
/// stops hammering the site when it starts refusing. Results are cached so
/// interrupted runs pick up where they left off.
#[derive(Parser, Debug)]
#[command(name = "prompt-harvest")]
#[command(version)]
#[command(about = "An adaptive, polite prompt harvester", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Ignore the persisted cache and overwrite it
    #[arg(long)]
    fresh: bool,

    /// Validate config and show what would be harvested without sending requests
    #[arg(long, conflicts_with = "cache_stats")]
    dry_run: bool,

    /// Show the contents of the result cache and exit
    #[arg(long, conflicts_with = "dry_run")]
    cache_stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.cache_stats {
        handle_cache_stats(&config);
    } else {
        handle_harvest(config, config_hash, cli.fresh).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("prompt_harvest=info,warn"),
            1 => EnvFilter::new("prompt_harvest=debug,info"),
            2 => EnvFilter::new("prompt_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows what would be harvested
fn handle_dry_run(config: &Config) {
    println!("=== Prompt-Harvest Dry Run ===\n");

    println!("Run:");
    println!("  Workers: {}", config.run.workers);
    println!("  Attempts per target: {}", config.run.max_retries);
    println!("  Request timeout: {}s", config.run.request_timeout_secs);
    println!("  Pause when unhealthy: {}s", config.run.pause_secs);
    println!("  Summary: {}", config.run.summary_path);

    println!("\nDelays:");
    println!(
        "  {}s to {}s, backoff base {}s",
        config.delay.min_delay_secs,
        config.delay.max_delay_secs,
        config.delay.error_backoff_base_secs
    );

    println!("\nCircuit Breaker:");
    println!(
        "  Opens after {} failures, probes after {}s",
        config.breaker.failure_threshold, config.breaker.recovery_timeout_secs
    );

    println!("\nCache:");
    if config.cache.enabled {
        println!("  Path: {}", config.cache.path);
        println!(
            "  TTL: {}h, capacity {}",
            config.cache.ttl_hours, config.cache.max_entries
        );
    } else {
        println!("  Disabled");
    }

    println!("\nTargets ({}):", config.targets.len());
    for target in &config.targets {
        match canonicalize_url(&target.url) {
            Ok(url) => println!("  - [{}] {}", target.category, url),
            Err(e) => println!("  - [{}] {} (invalid: {})", target.category, target.url, e),
        }
    }

    println!("\n✓ Configuration is valid");
    println!("✓ Would harvest {} targets", config.targets.len());
}

/// Handles the --cache-stats mode: prints cached entries with their ages
fn handle_cache_stats(config: &Config) {
    let cache = ResultCache::open(&config.cache);
    let stats = cache.stats();

    println!("=== Result Cache ===\n");
    match cache.mode() {
        CacheMode::Disabled => {
            println!("Cache is disabled in the configuration");
            return;
        }
        CacheMode::Degraded => {
            println!("Cache at {} could not be read", config.cache.path);
            return;
        }
        CacheMode::Active => {}
    }

    if let Some(backend) = &stats.backend {
        println!("Backend: {}", backend);
    }
    println!(
        "Entries: {} ({} fresh, TTL {}h)\n",
        stats.entries, stats.fresh_entries, config.cache.ttl_hours
    );

    let now = Utc::now();
    for (key, entry) in cache.entries() {
        let age = entry.age(now);
        let marker = if entry.is_expired(cache.ttl(), now) {
            " (expired)"
        } else {
            ""
        };
        println!(
            "  {} - {} items, {}h {}m old{}",
            key,
            entry.item_count,
            age.num_hours(),
            age.num_minutes() % 60,
            marker
        );
    }
}

/// Handles the main harvest operation
async fn handle_harvest(config: Config, config_hash: String, fresh: bool) -> anyhow::Result<()> {
    if fresh {
        tracing::info!("Starting fresh harvest (ignoring cached results)");
    }

    let harvester = Harvester::new(config, fresh)
        .context("Failed to initialize harvester")?
        .with_config_hash(config_hash);

    let summary = harvester.run().await;
    print_summary(&summary);

    if summary.interrupted {
        tracing::warn!("Harvest interrupted; rerun to continue from the cache");
    } else if summary.count(TargetStatus::Failed) > 0 {
        tracing::warn!("{} targets failed", summary.count(TargetStatus::Failed));
    } else {
        tracing::info!("Harvest completed successfully");
    }

    Ok(())
}
