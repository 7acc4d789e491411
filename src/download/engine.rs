//! Concurrent downloader for pending record documents.
//!
//! The [`Downloader`] drains every pending row from the store, fetches each
//! document through the API client and writes it to its resolved path. A
//! semaphore bounds the in-flight tasks; sizing it to the client's
//! calls-per-second ceiling means one worker per rate-limiter slot, so the
//! pool never queues up behind the limiter.
//!
//! Correctness invariant: a record transitions to downloaded only after its
//! file write returned successfully - never before, and never from an
//! unconfirmed network response. A failed task leaves the row pending for
//! the next run and never cancels sibling tasks.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::json;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use super::unescape::unescape_document;
use crate::api::{ApiClient, ApiError, ApiMethod};
use crate::paths::PathResolver;
use crate::store::{Record, RecordStore, StoreError, parse_emission_date};

/// Error that fails one record's task without affecting siblings.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The remote call failed permanently or exhausted its retries.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The record lacks a field needed to fetch or place its document.
    #[error("record {key} cannot be processed: {reason}")]
    Unresolvable {
        /// Record key.
        key: String,
        /// Which field is missing.
        reason: &'static str,
    },

    /// The response object carried no document payload.
    #[error("record {key}: response has no document payload")]
    MissingPayload {
        /// Record key.
        key: String,
    },

    /// Directory creation or file write failed; the record stays pending.
    #[error("IO error writing {path}: {source}")]
    Io {
        /// Target path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The status update after a confirmed write failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Error that aborts the whole download run.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The pending-rows read failed; nothing can proceed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Semaphore was closed unexpectedly.
    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,
}

/// Counters from one download run.
///
/// Uses atomics so concurrent tasks update them without coordination.
#[derive(Debug, Default)]
pub struct DownloadSummary {
    fetched: AtomicUsize,
    failed: AtomicUsize,
}

impl DownloadSummary {
    /// Records fetched, written and marked downloaded.
    #[must_use]
    pub fn fetched(&self) -> usize {
        self.fetched.load(Ordering::SeqCst)
    }

    /// Records whose task failed; they remain pending.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }
}

/// Bounded-concurrency document downloader.
#[derive(Debug)]
pub struct Downloader {
    client: Arc<ApiClient>,
    store: RecordStore,
    resolver: PathResolver,
    concurrency: usize,
}

impl Downloader {
    /// Creates a downloader.
    ///
    /// `concurrency` is clamped to at least 1; callers normally pass the
    /// client's calls-per-second ceiling.
    #[must_use]
    pub fn new(
        client: Arc<ApiClient>,
        store: RecordStore,
        resolver: PathResolver,
        concurrency: usize,
    ) -> Self {
        Self {
            client,
            store,
            resolver,
            concurrency: concurrency.max(1),
        }
    }

    /// Returns the configured concurrency bound.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Fetches every pending record's document.
    ///
    /// Per-record failures are logged with the record key and counted;
    /// a completed run with failures is still `Ok` - those rows stay
    /// pending and are picked up by the next run.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if the pending read fails, or
    /// [`EngineError::SemaphoreClosed`] if the semaphore is closed.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<DownloadSummary, EngineError> {
        let pending = self.store.query_pending().await?;
        info!(
            pending = pending.len(),
            concurrency = self.concurrency,
            "starting document downloads"
        );

        let summary = Arc::new(DownloadSummary::default());
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(pending.len());

        for record in pending {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|_| EngineError::SemaphoreClosed)?;

            let client = Arc::clone(&self.client);
            let store = self.store.clone();
            let resolver = self.resolver.clone();
            let summary = Arc::clone(&summary);

            handles.push(tokio::spawn(async move {
                // Permit released when this block exits (RAII).
                let _permit = permit;

                match fetch_one(&client, &store, &resolver, &record).await {
                    Ok(path) => {
                        info!(key = %record.record_key, path = %path.display(), "document saved");
                        summary.fetched.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(e) => {
                        warn!(key = %record.record_key, error = %e, "document download failed");
                        summary.failed.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }));
        }

        for handle in handles {
            // A panicked task never updated the counters; its record is
            // still pending, so it counts as failed.
            if let Err(e) = handle.await {
                warn!(error = %e, "download task panicked");
                summary.failed.fetch_add(1, Ordering::SeqCst);
            }
        }

        info!(
            fetched = summary.fetched(),
            failed = summary.failed(),
            "download run complete"
        );

        match Arc::try_unwrap(summary) {
            Ok(summary) => Ok(summary),
            Err(shared) => {
                // All tasks are joined, so this branch is unreachable in
                // practice; rebuild from the atomic values if it happens.
                let rebuilt = DownloadSummary::default();
                rebuilt.fetched.store(shared.fetched(), Ordering::SeqCst);
                rebuilt.failed.store(shared.failed(), Ordering::SeqCst);
                Ok(rebuilt)
            }
        }
    }
}

/// Fetches, writes and marks one record's document.
///
/// The store update runs strictly after the file write succeeds.
#[instrument(skip_all, fields(key = %record.record_key))]
async fn fetch_one(
    client: &ApiClient,
    store: &RecordStore,
    resolver: &PathResolver,
    record: &Record,
) -> Result<PathBuf, TaskError> {
    let date = record
        .emission_date
        .as_deref()
        .and_then(parse_emission_date)
        .ok_or_else(|| TaskError::Unresolvable {
            key: record.record_key.clone(),
            reason: "missing or invalid emission date",
        })?;
    let sequence = record
        .sequence_number
        .as_deref()
        .ok_or_else(|| TaskError::Unresolvable {
            key: record.record_key.clone(),
            reason: "missing sequence number",
        })?;
    let external_id = record.external_id.ok_or_else(|| TaskError::Unresolvable {
        key: record.record_key.clone(),
        reason: "missing external id",
    })?;

    let resolved = resolver.resolve(&record.record_key, date, sequence);
    tokio::fs::create_dir_all(&resolved.dir)
        .await
        .map_err(|source| TaskError::Io {
            path: resolved.dir.clone(),
            source,
        })?;

    // A pre-existing file (possibly relocated by compaction) is refreshed
    // at the canonical path; note the re-download. The directory walk
    // blocks, so it runs off the async workers.
    let existing = {
        let resolver = resolver.clone();
        let key = record.record_key.clone();
        let sequence = sequence.to_string();
        tokio::task::spawn_blocking(move || resolver.discover(&key, date, &sequence))
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "discovery task failed; assuming no existing file");
                None
            })
    };
    let redownloaded = existing.is_some();
    if let Some(found) = existing {
        debug!(found = %found.display(), "document already on disk; re-downloading");
    }

    let data = client
        .invoke(ApiMethod::FetchDocument, json!({ "nIdNfe": external_id }))
        .await?;
    let payload = data["cXmlNfe"]
        .as_str()
        .ok_or_else(|| TaskError::MissingPayload {
            key: record.record_key.clone(),
        })?;
    let document = unescape_document(payload);

    tokio::fs::write(&resolved.path, document.as_bytes())
        .await
        .map_err(|source| TaskError::Io {
            path: resolved.path.clone(),
            source,
        })?;

    // Write confirmed; only now may the row leave the pending state.
    store
        .mark_downloaded(
            &record.record_key,
            &resolved.path,
            document.trim().is_empty(),
            redownloaded,
        )
        .await?;

    Ok(resolved.path)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    // End-to-end behavior (write-before-mark, resumability, failure
    // isolation) is exercised against a fake API in
    // tests/pipeline_integration.rs.

    use super::*;

    #[test]
    fn test_download_summary_counters() {
        let summary = DownloadSummary::default();
        summary.fetched.fetch_add(2, Ordering::SeqCst);
        summary.failed.fetch_add(1, Ordering::SeqCst);
        assert_eq!(summary.fetched(), 2);
        assert_eq!(summary.failed(), 1);
    }

    #[test]
    fn test_task_error_unresolvable_names_key() {
        let error = TaskError::Unresolvable {
            key: "k".repeat(44),
            reason: "missing external id",
        };
        let msg = error.to_string();
        assert!(msg.contains("missing external id"));
        assert!(msg.contains(&"k".repeat(44)));
    }
}
