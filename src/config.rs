//! Runtime configuration for a harvest/download run.
//!
//! The configuration record is assembled and validated outside the core
//! pipeline (by the CLI in this binary) and handed in whole; the pipeline
//! itself never reads files or the environment.

use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use thiserror::Error;

use crate::api::{ApiCredentials, ApiEndpoints, RetryPolicy};

/// Default URL of the record-listing endpoint.
pub const DEFAULT_LISTING_URL: &str = "https://app.omie.com.br/api/v1/produtos/nfconsultar/";

/// Default URL of the document-fetch endpoint.
pub const DEFAULT_DOCUMENT_URL: &str = "https://app.omie.com.br/api/v1/produtos/dfedocs/";

/// Default remote-call timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Configuration errors found during validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Credentials must both be present.
    #[error("app_key and app_secret must be non-empty")]
    MissingCredentials,

    /// The date range is inverted.
    #[error("date_from {date_from} is after date_to {date_to}")]
    InvertedDateRange {
        /// Range start.
        date_from: NaiveDate,
        /// Range end.
        date_to: NaiveDate,
    },

    /// Page size must be positive.
    #[error("page_size must be greater than zero")]
    ZeroPageSize,
}

/// Everything one run needs, validated before the pipeline starts.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    /// API application key.
    pub app_key: String,
    /// API application secret.
    pub app_secret: String,
    /// Start of the emission-date range (inclusive).
    pub date_from: NaiveDate,
    /// End of the emission-date range (inclusive).
    pub date_to: NaiveDate,
    /// Listing page size.
    pub page_size: u32,
    /// Global rate ceiling, calls per second and in-flight bound.
    pub calls_per_second: usize,
    /// Retry ceiling per remote call, including the first attempt.
    pub max_attempts: u32,
    /// Remote-call timeout in seconds.
    pub timeout_secs: u64,
    /// Base directory documents are written under.
    pub base_dir: PathBuf,
    /// SQLite database path.
    pub db_path: PathBuf,
    /// Record-listing endpoint URL.
    pub listing_url: String,
    /// Document-fetch endpoint URL.
    pub document_url: String,
}

impl HarvestConfig {
    /// Validates cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_key.trim().is_empty() || self.app_secret.trim().is_empty() {
            return Err(ConfigError::MissingCredentials);
        }
        if self.date_from > self.date_to {
            return Err(ConfigError::InvertedDateRange {
                date_from: self.date_from,
                date_to: self.date_to,
            });
        }
        if self.page_size == 0 {
            return Err(ConfigError::ZeroPageSize);
        }
        Ok(())
    }

    /// Returns the credentials for the API client.
    #[must_use]
    pub fn credentials(&self) -> ApiCredentials {
        ApiCredentials {
            app_key: self.app_key.clone(),
            app_secret: self.app_secret.clone(),
        }
    }

    /// Returns the endpoint pair for the API client.
    #[must_use]
    pub fn endpoints(&self) -> ApiEndpoints {
        ApiEndpoints {
            listing_url: self.listing_url.clone(),
            document_url: self.document_url.clone(),
        }
    }

    /// Returns the retry policy for the API client.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_max_attempts(self.max_attempts)
    }

    /// Returns the remote-call timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn valid() -> HarvestConfig {
        HarvestConfig {
            app_key: "key".into(),
            app_secret: "secret".into(),
            date_from: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            date_to: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            page_size: 500,
            calls_per_second: 4,
            max_attempts: 3,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            base_dir: PathBuf::from("resultado"),
            db_path: PathBuf::from("harvest.db"),
            listing_url: DEFAULT_LISTING_URL.into(),
            document_url: DEFAULT_DOCUMENT_URL.into(),
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let mut config = valid();
        config.app_secret = "  ".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingCredentials)
        ));
    }

    #[test]
    fn test_inverted_date_range_rejected() {
        let mut config = valid();
        config.date_to = NaiveDate::from_ymd_opt(2023, 12, 31).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvertedDateRange { .. })
        ));
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let mut config = valid();
        config.page_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroPageSize)));
    }
}
