//! Filesystem/store reconciliation.
//!
//! After a crash between a file write and its status update, or after
//! out-of-band file placement, the store can show a record pending whose
//! document already exists on disk. The reconciler repairs that divergence
//! without touching the remote API: one recursive scan of the base
//! directory builds a key index from file names, and every pending record
//! with a matching readable file is marked downloaded.
//!
//! Safe to run alongside the harvester (it never writes new rows). It
//! should not race the downloader on the same record set; both converge to
//! the same terminal state, so last-writer-wins is acceptable, but the
//! usual arrangement is to run it between runs.

use std::collections::HashMap;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::paths::{PathResolver, parse_key_from_name, scan_documents};
use crate::store::{RecordStore, StoreError};

/// Errors that abort reconciliation.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The store could not be read or updated.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The filesystem scan task was cancelled.
    #[error("filesystem scan failed: {0}")]
    Scan(#[from] tokio::task::JoinError),
}

/// Counters from one reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Document files found on disk.
    pub scanned: usize,
    /// Pending records whose key appeared in the scan.
    pub matched: usize,
    /// Records actually repaired to downloaded.
    pub fixed: usize,
}

/// Brings store status in line with the files actually on disk.
///
/// # Errors
///
/// Returns [`ReconcileError::Store`] when the store fails; unreadable
/// individual files are logged and left pending.
#[instrument(skip(store, resolver), fields(base_dir = %resolver.base_dir().display()))]
pub async fn reconcile(
    store: &RecordStore,
    resolver: &PathResolver,
) -> Result<ReconcileSummary, ReconcileError> {
    // Derived columns first, so older rows sort correctly below.
    let backfilled = store.backfill_date_keys().await?;
    if backfilled > 0 {
        debug!(backfilled, "derived missing date keys");
    }

    let base_dir = resolver.base_dir().to_path_buf();
    let files = tokio::task::spawn_blocking(move || scan_documents(&base_dir)).await?;

    let mut summary = ReconcileSummary {
        scanned: files.len(),
        ..ReconcileSummary::default()
    };

    let index: HashMap<String, PathBuf> = files
        .into_iter()
        .filter_map(|path| {
            let key = path
                .file_name()
                .and_then(|n| parse_key_from_name(&n.to_string_lossy()))?;
            Some((key, path))
        })
        .collect();
    debug!(indexed = index.len(), "built key index from disk scan");

    for record in store.query_pending().await? {
        let Some(path) = index.get(&record.record_key) else {
            continue;
        };
        summary.matched += 1;

        // Confirm the file is readable before repairing the row; an
        // unreadable file is no better than a missing one.
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) => {
                warn!(key = %record.record_key, path = %path.display(), error = %e,
                      "matched file is unreadable; leaving record pending");
                continue;
            }
        };

        store
            .mark_downloaded(&record.record_key, path, content.trim().is_empty(), false)
            .await?;
        summary.fixed += 1;
        debug!(key = %record.record_key, path = %path.display(), "repaired record status");
    }

    info!(
        scanned = summary.scanned,
        matched = summary.matched,
        fixed = summary.fixed,
        "reconciliation complete"
    );
    Ok(summary)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::store::{KEY_LENGTH, NewRecord, parse_emission_date};
    use std::fs;

    fn sample(fill: char) -> NewRecord {
        NewRecord {
            record_key: fill.to_string().repeat(KEY_LENGTH),
            external_id: Some(1),
            sequence_number: Some("10".to_string()),
            series: None,
            emission_date: parse_emission_date("2024-04-01"),
            counterparty_id: None,
            counterparty_name: None,
            total_value: None,
        }
    }

    #[tokio::test]
    async fn test_reconcile_marks_pending_record_with_file_on_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RecordStore::new(Database::new_in_memory().await.unwrap());
        let resolver = PathResolver::new(tmp.path());

        let record = sample('1');
        store.upsert_batch(&[record.clone()]).await.unwrap();

        // Out-of-band placement, not through the downloader.
        let resolved = resolver.resolve(&record.record_key, record.emission_date.unwrap(), "10");
        fs::create_dir_all(&resolved.dir).unwrap();
        fs::write(&resolved.path, "<nfeProc/>").unwrap();

        let summary = reconcile(&store, &resolver).await.unwrap();
        assert_eq!(summary.scanned, 1);
        assert_eq!(summary.matched, 1);
        assert_eq!(summary.fixed, 1);

        let stored = store.get(&record.record_key).await.unwrap().unwrap();
        assert!(stored.downloaded);
        assert!(!stored.empty);
        assert_eq!(
            stored.file_path.as_deref(),
            Some(resolved.path.to_string_lossy().as_ref())
        );
    }

    #[tokio::test]
    async fn test_reconcile_flags_blank_document_as_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RecordStore::new(Database::new_in_memory().await.unwrap());
        let resolver = PathResolver::new(tmp.path());

        let record = sample('2');
        store.upsert_batch(&[record.clone()]).await.unwrap();

        let resolved = resolver.resolve(&record.record_key, record.emission_date.unwrap(), "10");
        fs::create_dir_all(&resolved.dir).unwrap();
        fs::write(&resolved.path, "   \n").unwrap();

        reconcile(&store, &resolver).await.unwrap();

        let stored = store.get(&record.record_key).await.unwrap().unwrap();
        assert!(stored.downloaded);
        assert!(stored.empty);
    }

    #[tokio::test]
    async fn test_reconcile_ignores_unmatched_records_and_files() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RecordStore::new(Database::new_in_memory().await.unwrap());
        let resolver = PathResolver::new(tmp.path());

        // Pending record with no file, and a file with no record.
        store.upsert_batch(&[sample('3')]).await.unwrap();
        fs::create_dir_all(tmp.path().join("2024")).unwrap();
        fs::write(
            tmp.path().join("2024").join(format!("1_20240401_{}.xml", "9".repeat(KEY_LENGTH))),
            "<xml/>",
        )
        .unwrap();

        let summary = reconcile(&store, &resolver).await.unwrap();
        assert_eq!(summary.scanned, 1);
        assert_eq!(summary.matched, 0);
        assert_eq!(summary.fixed, 0);
        assert_eq!(store.count_pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_finds_files_in_relocated_subfolders() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RecordStore::new(Database::new_in_memory().await.unwrap());
        let resolver = PathResolver::new(tmp.path());

        let record = sample('4');
        store.upsert_batch(&[record.clone()]).await.unwrap();

        // Compaction moved the day folder's contents into a numbered split.
        let sub = tmp.path().join("2024/04/01/3");
        fs::create_dir_all(&sub).unwrap();
        fs::write(
            sub.join(format!("10_20240401_{}.xml", record.record_key)),
            "<nfeProc/>",
        )
        .unwrap();

        let summary = reconcile(&store, &resolver).await.unwrap();
        assert_eq!(summary.fixed, 1);
    }
}
