//! CLI entry point for the invoice document harvester.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use nfe_harvest::{
    ApiClient, Database, Downloader, HarvestConfig, Harvester, PathResolver, RateLimiter,
    RecordStore, reconcile,
};
use tracing::{debug, info};

mod cli;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args.command, "CLI arguments parsed");

    let db = Database::new(&args.db_path)
        .await
        .context("opening database")?;
    let store = RecordStore::new(db);
    let resolver = PathResolver::new(args.base_dir.clone());

    match &args.command {
        Command::Run => {
            let config = build_config(&args)?;
            let client = Arc::new(build_client(&config));
            run_harvest(&client, &store, &config).await?;
            run_download(&client, &store, &resolver, &config).await?;
        }
        Command::Harvest => {
            let config = build_config(&args)?;
            let client = Arc::new(build_client(&config));
            run_harvest(&client, &store, &config).await?;
        }
        Command::Download => {
            let config = build_config(&args)?;
            let client = Arc::new(build_client(&config));
            run_download(&client, &store, &resolver, &config).await?;
        }
        Command::Reconcile => {
            let summary = reconcile(&store, &resolver).await?;
            println!(
                "scanned {} files, matched {}, repaired {}",
                summary.scanned, summary.matched, summary.fixed
            );
        }
        Command::Purge => {
            let dates = store.purge_invalid().await?;
            if dates.is_empty() {
                println!("no invalid records found");
            } else {
                println!("purged records; re-harvest these dates:");
                for date in dates {
                    println!("  {date}");
                }
            }
        }
    }

    Ok(())
}

/// Assembles and validates the run configuration from CLI arguments.
fn build_config(args: &Args) -> Result<HarvestConfig> {
    let (Some(app_key), Some(app_secret)) = (args.app_key.clone(), args.app_secret.clone())
    else {
        bail!("--app-key and --app-secret (or NFE_APP_KEY/NFE_APP_SECRET) are required");
    };
    let (Some(date_from), Some(date_to)) = (args.date_from, args.date_to) else {
        bail!("--date-from and --date-to are required");
    };

    let config = HarvestConfig {
        app_key,
        app_secret,
        date_from,
        date_to,
        page_size: args.page_size,
        calls_per_second: args.calls_per_second,
        max_attempts: args.max_attempts,
        timeout_secs: args.timeout_secs,
        base_dir: args.base_dir.clone(),
        db_path: args.db_path.clone(),
        listing_url: args.listing_url.clone(),
        document_url: args.document_url.clone(),
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Builds the shared API client from a validated configuration.
fn build_client(config: &HarvestConfig) -> ApiClient {
    ApiClient::new(
        config.credentials(),
        config.endpoints(),
        Arc::new(RateLimiter::new(config.calls_per_second)),
        config.retry_policy(),
        config.timeout(),
    )
}

async fn run_harvest(
    client: &Arc<ApiClient>,
    store: &RecordStore,
    config: &HarvestConfig,
) -> Result<()> {
    let harvester = Harvester::new(
        client,
        store,
        config.page_size,
        config.date_from,
        config.date_to,
    );
    let summary = harvester.run().await.context("harvest failed")?;
    println!(
        "harvested {} pages: {} new, {} duplicate, {} skipped",
        summary.pages, summary.inserted, summary.duplicates, summary.skipped
    );
    Ok(())
}

async fn run_download(
    client: &Arc<ApiClient>,
    store: &RecordStore,
    resolver: &PathResolver,
    config: &HarvestConfig,
) -> Result<()> {
    // One worker per rate-limiter slot; more would only queue on the limiter.
    let downloader = Downloader::new(
        Arc::clone(client),
        store.clone(),
        resolver.clone(),
        config.calls_per_second,
    );
    let summary = downloader.run().await.context("download run failed")?;
    let pending = store.count_pending().await?;
    println!(
        "downloaded {} documents, {} failed, {} still pending",
        summary.fetched(),
        summary.failed(),
        pending
    );
    if pending > 0 {
        info!(pending, "re-run `download` to pick up remaining records");
    }
    Ok(())
}
