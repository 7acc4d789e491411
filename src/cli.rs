//! Command-line argument definitions.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use nfe_harvest::config::{DEFAULT_DOCUMENT_URL, DEFAULT_LISTING_URL, DEFAULT_TIMEOUT_SECS};

/// Harvest invoice records and archive their XML documents.
#[derive(Debug, Parser)]
#[command(name = "nfe-harvest", version, about)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// API application key.
    #[arg(long, env = "NFE_APP_KEY", global = true)]
    pub app_key: Option<String>,

    /// API application secret.
    #[arg(long, env = "NFE_APP_SECRET", global = true)]
    pub app_secret: Option<String>,

    /// Start of the emission-date range (YYYY-MM-DD).
    #[arg(long, global = true)]
    pub date_from: Option<NaiveDate>,

    /// End of the emission-date range (YYYY-MM-DD).
    #[arg(long, global = true)]
    pub date_to: Option<NaiveDate>,

    /// Listing page size.
    #[arg(long, default_value_t = 500, global = true)]
    pub page_size: u32,

    /// Rate ceiling: remote calls per second and in-flight bound.
    #[arg(long, default_value_t = 4, global = true)]
    pub calls_per_second: usize,

    /// Attempts per remote call, including the first.
    #[arg(long, default_value_t = 3, global = true)]
    pub max_attempts: u32,

    /// Remote-call timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS, global = true)]
    pub timeout_secs: u64,

    /// Directory documents are written under.
    #[arg(long, default_value = "resultado", global = true)]
    pub base_dir: PathBuf,

    /// SQLite database path.
    #[arg(long, default_value = "harvest.db", global = true)]
    pub db_path: PathBuf,

    /// Record-listing endpoint URL.
    #[arg(long, default_value = DEFAULT_LISTING_URL, global = true)]
    pub listing_url: String,

    /// Document-fetch endpoint URL.
    #[arg(long, default_value = DEFAULT_DOCUMENT_URL, global = true)]
    pub document_url: String,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Pipeline stages runnable on their own or combined.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Harvest records, then download all pending documents.
    Run,
    /// Harvest records for the date range into the store.
    Harvest,
    /// Download documents for all pending records.
    Download,
    /// Repair store status from documents already on disk.
    Reconcile,
    /// Delete structurally invalid records; prints dates to re-harvest.
    Purge,
}
