//! Error types for record store operations.

use thiserror::Error;

/// Errors raised by [`super::RecordStore`] operations.
///
/// Storage failures are fatal for the current run; callers do not retry them.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
