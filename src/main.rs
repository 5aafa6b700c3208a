use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

mod cli;

use cli::Cli;
use cli::commands::Commands;
use vitrine::cache::{DiskCacheStore, purge_stale_namespaces};
use vitrine::catalog::Catalog;
use vitrine::clock::format_ms;
use vitrine::config::Config;
use vitrine::fetch::HttpFetcher;
use vitrine::ledger::{FileSlot, LoadLedger, ResourceStatus};
use vitrine::resource::ResourceId;
use vitrine::scheduler::{DrainOutcome, ImageScheduler, RetryReport, SchedulerConfig, SchedulerEvent};

fn setup_logging(config: &Config) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vitrine")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("vitrine.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    let mut builder = env_logger::Builder::from_default_env();
    if std::env::var_os("RUST_LOG").is_none()
        && let Some(level) = &config.log_level
    {
        builder.parse_filters(level);
    }
    builder.target(env_logger::Target::Pipe(target)).init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn build_scheduler(config: &Config) -> Result<ImageScheduler> {
    let store = Arc::new(DiskCacheStore::new(&config.cache.dir, &config.cache.namespace));
    let fetcher = HttpFetcher::new(config.network.user_agent.as_deref()).context("Failed to create HTTP client")?;
    let fetcher = Arc::new(fetcher);
    let slot = Arc::new(FileSlot::new(&config.ledger.path));
    Ok(ImageScheduler::new(SchedulerConfig::from(config), store, fetcher, slot))
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Warm { catalog, no_retry } => handle_warm_command(catalog, *no_retry, cli.is_verbose(), config).await,
        Commands::Promote { urls } => handle_promote_command(urls, config).await,
        Commands::Status { detailed } => handle_status_command(*detailed, config),
        Commands::Forget { url, keep_cache } => handle_forget_command(url, *keep_cache, config).await,
        Commands::Purge => handle_purge_command(config),
    }
}

fn purge_namespaces(config: &Config) -> Result<Vec<String>> {
    purge_stale_namespaces(&config.cache.dir, &config.cache.namespace).context("Failed to purge cache namespaces")
}

async fn handle_warm_command(path: &PathBuf, no_retry: bool, verbose: bool, config: &Config) -> Result<()> {
    info!("Warming cache from catalog: {}", path.display());

    for name in purge_namespaces(config)? {
        println!("{} stale namespace {}", "Removed".yellow(), name);
    }

    let catalog = Catalog::from_path(path).context("Failed to load catalog")?;
    let (ids, invalid) = catalog.image_ids(&config.images);
    for label in &invalid {
        println!("{} invalid image URL for {}", "Skipping:".yellow(), label);
    }

    let scheduler = build_scheduler(config)?;
    if verbose {
        let mut events = scheduler.subscribe();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                print_event(&event);
            }
        });
    }

    let interrupt = scheduler.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.shutdown();
        }
    });

    let summary = scheduler.enqueue(ids);
    println!(
        "{} {} images queued ({} already cached, {} given up on)",
        "Catalog:".cyan(),
        summary.queued,
        summary.already_loaded,
        summary.permanently_failed
    );
    if summary.catalog_changed {
        println!("  catalog image set changed since last run");
    }

    let (drain, retry) = if no_retry {
        (scheduler.drain().await, None)
    } else {
        let report = scheduler.run().await;
        (report.drain, report.retry)
    };

    match drain {
        DrainOutcome::Exhausted {
            loaded,
            residual_failures,
        } => {
            println!("{} {} images cached", "Done:".green(), loaded);
            if residual_failures > 0 {
                println!("  {} images still failing, run again to retry", residual_failures);
            }
        }
        DrainOutcome::Shutdown => println!("{}", "Interrupted, progress saved".yellow()),
        DrainOutcome::Paused | DrainOutcome::AlreadyDraining => {}
    }
    if let Some(report) = retry {
        print_retry_report(&report);
    }

    scheduler.shutdown();
    Ok(())
}

fn print_event(event: &SchedulerEvent) {
    match event {
        SchedulerEvent::BatchCompleted {
            batch,
            loaded,
            failed,
            pending,
        } => println!(
            "  batch {}: {} cached, {} failed, {} pending",
            batch, loaded, failed, pending
        ),
        SchedulerEvent::RetryRound {
            round,
            attempted,
            recovered,
        } => println!("  retry round {}: {}/{} recovered", round, recovered, attempted),
        other => println!("  {:?}", other),
    }
}

fn print_retry_report(report: &RetryReport) {
    println!(
        "{} {} rounds, {} recovered",
        "Retry:".cyan(),
        report.rounds,
        report.recovered
    );
    if !report.permanently_failed.is_empty() {
        println!("{}", "Permanently failed:".red());
        for (id, attempts) in &report.permanently_failed {
            println!("  {} ({} attempts)", id, attempts);
        }
    }
}

async fn handle_promote_command(urls: &[String], config: &Config) -> Result<()> {
    info!("Promoting {} images", urls.len());
    let scheduler = build_scheduler(config)?;
    let report = scheduler.promote_urls(urls).await;

    for id in &report.loaded {
        println!("{} {}", "Cached:".green(), id);
    }
    for (id, reason) in &report.failed {
        println!("{} {} ({})", "Failed:".red(), id, reason);
    }
    if !report.already_loaded.is_empty() {
        println!("{} already cached", report.already_loaded.len());
    }
    if report.filtered > 0 {
        println!("{} not on a cacheable host", report.filtered);
    }
    scheduler.shutdown();
    Ok(())
}

fn handle_status_command(detailed: bool, config: &Config) -> Result<()> {
    info!("Showing ledger status (detailed: {})", detailed);
    let slot = FileSlot::new(&config.ledger.path);
    let ledger = LoadLedger::load(&slot);
    let ceiling = config.retry.ceiling;

    println!("{} {}", "Ledger:".green(), slot.path().display());
    println!("  cached:       {}", ledger.loaded_len());
    println!("  failing:      {}", ledger.retry_candidates(ceiling).len());
    println!("  given up:     {}", ledger.permanently_failed(ceiling).len());
    println!("  last update:  {}", format_ms(ledger.last_update()));

    if detailed {
        let mut failed: Vec<_> = ledger.failed().keys().collect();
        failed.sort();
        for id in failed {
            match ledger.status(id, ceiling) {
                ResourceStatus::PermanentFailure { attempts } => {
                    println!("  {} {} ({} attempts)", "x".red(), id, attempts)
                }
                ResourceStatus::TransientFailure { attempts } => {
                    println!("  {} {} ({} attempts)", "!".yellow(), id, attempts)
                }
                _ => {}
            }
        }
    }
    Ok(())
}

async fn handle_forget_command(url: &str, keep_cache: bool, config: &Config) -> Result<()> {
    let id = ResourceId::normalize(url, &config.images).context("Invalid image URL")?;
    info!("Forgetting {} (keep cache: {})", id, keep_cache);

    let scheduler = build_scheduler(config)?;
    if scheduler.forget(&id, !keep_cache).await.context("Failed to forget image")? {
        println!("{} {}", "Forgot:".green(), id);
    } else {
        println!("{} {} was not known", "Nothing to do:".yellow(), id);
    }
    Ok(())
}

fn handle_purge_command(config: &Config) -> Result<()> {
    let removed = purge_namespaces(config)?;
    if removed.is_empty() {
        println!("{}", "No stale namespaces".green());
    }
    for name in removed {
        println!("{} {}", "Removed:".yellow(), name);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    setup_logging(&config).context("Failed to setup logging")?;
    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
