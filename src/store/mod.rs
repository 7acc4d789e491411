//! Persistent store of harvested records.
//!
//! This module provides the SQLite-backed [`RecordStore`] that makes the
//! harvest/download pipeline idempotent and resumable:
//!
//! - [`RecordStore::upsert_batch`] - insert-or-ignore by record key
//! - [`RecordStore::query_pending`] - rows awaiting download
//! - [`RecordStore::mark_downloaded`] - status update after a confirmed write
//! - [`RecordStore::purge_invalid`] - maintenance removal of broken rows
//!
//! All multi-row writes run inside one transaction per batch; single-row
//! status updates are individually transactional. WAL mode (see
//! [`crate::db::Database`]) lets downloader workers read while updates
//! commit.

mod error;
mod record;

pub use error::StoreError;
pub use record::{
    KEY_LENGTH, NewRecord, Record, ValidationError, date_key_of, parse_emission_date,
};

use std::path::Path;

use chrono::NaiveDate;
use tracing::{debug, instrument, warn};

use crate::db::Database;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Counts returned by [`RecordStore::upsert_batch`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// Rows newly inserted.
    pub inserted: u64,
    /// Rows ignored because the key already existed.
    pub duplicates: u64,
}

/// SQLite-backed table of harvested records.
#[derive(Debug, Clone)]
pub struct RecordStore {
    db: Database,
}

impl RecordStore {
    /// Creates a store over an open database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Inserts a batch of records, ignoring keys that already exist.
    ///
    /// First write wins: an existing row is never modified by a later
    /// insert of the same key. The whole batch commits in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the transaction fails.
    #[instrument(skip(self, records), fields(batch = records.len()))]
    pub async fn upsert_batch(&self, records: &[NewRecord]) -> Result<UpsertOutcome> {
        let mut outcome = UpsertOutcome::default();
        let mut tx = self.db.pool().begin().await?;

        for record in records {
            let result = sqlx::query(
                r"INSERT INTO records (
                    record_key,
                    external_id,
                    sequence_number,
                    series,
                    emission_date,
                    date_key,
                    counterparty_id,
                    counterparty_name,
                    total_value
                  )
                  VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                  ON CONFLICT(record_key) DO NOTHING",
            )
            .bind(&record.record_key)
            .bind(record.external_id)
            .bind(&record.sequence_number)
            .bind(&record.series)
            .bind(record.emission_date_iso())
            .bind(record.date_key())
            .bind(&record.counterparty_id)
            .bind(&record.counterparty_name)
            .bind(record.total_value)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                debug!(key = %record.record_key, "duplicate record ignored");
                outcome.duplicates += 1;
            } else {
                outcome.inserted += 1;
            }
        }

        tx.commit().await?;
        Ok(outcome)
    }

    /// Returns all records whose document has not been downloaded yet.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn query_pending(&self) -> Result<Vec<Record>> {
        let records = sqlx::query_as::<_, Record>(
            r"SELECT * FROM records
              WHERE downloaded = 0
              ORDER BY date_key ASC, record_key ASC",
        )
        .fetch_all(self.db.pool())
        .await?;

        Ok(records)
    }

    /// Marks one record downloaded after its file is confirmed on disk.
    ///
    /// A missing key is a logged no-op, not an error: the row may have been
    /// purged between the pending read and this update.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self, path), fields(key = %key, path = %path.display()))]
    pub async fn mark_downloaded(
        &self,
        key: &str,
        path: &Path,
        empty: bool,
        redownloaded: bool,
    ) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE records
              SET downloaded = 1,
                  file_path = ?,
                  empty = ?,
                  redownloaded = ?,
                  updated_at = datetime('now')
              WHERE record_key = ?",
        )
        .bind(path.to_string_lossy().into_owned())
        .bind(empty)
        .bind(redownloaded)
        .bind(key)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            warn!(key = %key, "no record found for downloaded-status update");
        }
        Ok(())
    }

    /// Derives `date_key` for rows that have an emission date but no key.
    ///
    /// `date_key` is never required at insert time; this backfill keeps
    /// range queries usable for rows harvested by older versions.
    ///
    /// # Returns
    ///
    /// The number of rows updated.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn backfill_date_keys(&self) -> Result<u64> {
        let result = sqlx::query(
            r"UPDATE records
              SET date_key = CAST(strftime('%Y%m%d', emission_date) AS INTEGER),
                  updated_at = datetime('now')
              WHERE date_key IS NULL
                AND emission_date IS NOT NULL
                AND emission_date != ''",
        )
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// Deletes rows missing mandatory fields and returns the affected dates.
    ///
    /// Mandatory fields are the record key (canonical length), the emission
    /// date and the sequence number. The distinct emission dates of purged
    /// rows are returned so those days can be re-harvested.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the delete fails.
    #[instrument(skip(self))]
    pub async fn purge_invalid(&self) -> Result<Vec<NaiveDate>> {
        let purged: Vec<(Option<String>,)> = sqlx::query_as(
            r"DELETE FROM records
              WHERE length(record_key) != ?
                 OR emission_date IS NULL OR emission_date = ''
                 OR sequence_number IS NULL OR sequence_number = ''
              RETURNING emission_date",
        )
        .bind(KEY_LENGTH as i64)
        .fetch_all(self.db.pool())
        .await?;

        let mut dates: Vec<NaiveDate> = purged
            .into_iter()
            .filter_map(|(date,)| date.as_deref().and_then(parse_emission_date))
            .collect();
        dates.sort_unstable();
        dates.dedup();

        if !dates.is_empty() {
            warn!(dates = dates.len(), "purged invalid records; re-harvest affected dates");
        }
        Ok(dates)
    }

    /// Counts records still pending download.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn count_pending(&self) -> Result<i64> {
        let row: (i64,) =
            sqlx::query_as(r"SELECT COUNT(*) FROM records WHERE downloaded = 0")
                .fetch_one(self.db.pool())
                .await?;
        Ok(row.0)
    }

    /// Counts records already downloaded.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn count_downloaded(&self) -> Result<i64> {
        let row: (i64,) =
            sqlx::query_as(r"SELECT COUNT(*) FROM records WHERE downloaded = 1")
                .fetch_one(self.db.pool())
                .await?;
        Ok(row.0)
    }

    /// Gets one record by key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get(&self, key: &str) -> Result<Option<Record>> {
        let record =
            sqlx::query_as::<_, Record>(r"SELECT * FROM records WHERE record_key = ?")
                .bind(key)
                .fetch_optional(self.db.pool())
                .await?;
        Ok(record)
    }
}
