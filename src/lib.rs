//! Invoice document harvester core library.
//!
//! Harvests paginated invoice records from a remote API, downloads one XML
//! document per record under a global rate ceiling, and persists metadata
//! plus download status in SQLite so interrupted runs resume without
//! re-fetching already-archived documents.
//!
//! # Architecture
//!
//! - [`api`] - rate-limited, retrying client for the two remote operations
//! - [`store`] - durable record table with idempotent upserts
//! - [`harvest`] - sequential pagination into the store
//! - [`download`] - bounded-concurrency document fetching
//! - [`paths`] - deterministic file placement and discovery
//! - [`reconcile`] - repairs store status from files found on disk
//! - [`config`] - the validated configuration record a run consumes

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod config;
pub mod db;
pub mod download;
pub mod harvest;
pub mod paths;
pub mod reconcile;
pub mod store;

// Re-export commonly used types
pub use api::{ApiClient, ApiError, ApiMethod, RateLimiter, RetryPolicy};
pub use config::HarvestConfig;
pub use db::Database;
pub use download::{DownloadSummary, Downloader};
pub use harvest::{HarvestSummary, Harvester};
pub use paths::PathResolver;
pub use reconcile::{ReconcileSummary, reconcile};
pub use store::{NewRecord, Record, RecordStore};
