//! Paginated harvest of invoice records into the store.
//!
//! The harvester is strictly sequential: page N+1 is only requested after
//! page N was processed, because the keep-paging decision depends on the
//! server-reported total page count. Each page's batch commits before the
//! next page is fetched, so an aborted harvest leaves durable partial
//! progress and re-running from page 1 is safe (upsert is idempotent).

use chrono::NaiveDate;
use serde_json::json;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::api::{ApiClient, ApiError, ApiMethod};
use crate::store::{NewRecord, RecordStore, StoreError};

/// Wire date format of the listing endpoint.
const WIRE_DATE_FORMAT: &str = "%d/%m/%Y";

/// Errors that abort a harvest run.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// A page could not be listed; progress up to it is committed.
    #[error("harvest aborted on page {page}: {source}")]
    Aborted {
        /// Page that failed.
        page: u32,
        /// The API failure.
        #[source]
        source: ApiError,
    },

    /// The store rejected a write; fatal for the run.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Counters accumulated over one harvest run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HarvestSummary {
    /// Pages fully processed.
    pub pages: u32,
    /// Records newly inserted.
    pub inserted: u64,
    /// Records already present (ignored).
    pub duplicates: u64,
    /// Listing items skipped because they failed validation.
    pub skipped: u64,
}

/// Drives the paginated listing and populates the record store.
#[derive(Debug)]
pub struct Harvester<'a> {
    client: &'a ApiClient,
    store: &'a RecordStore,
    page_size: u32,
    date_from: NaiveDate,
    date_to: NaiveDate,
}

impl<'a> Harvester<'a> {
    /// Creates a harvester for the given date range.
    #[must_use]
    pub fn new(
        client: &'a ApiClient,
        store: &'a RecordStore,
        page_size: u32,
        date_from: NaiveDate,
        date_to: NaiveDate,
    ) -> Self {
        Self {
            client,
            store,
            page_size,
            date_from,
            date_to,
        }
    }

    /// Runs the harvest from page 1 until the server reports no more pages.
    ///
    /// An empty page ends the harvest normally; a transport or envelope
    /// error aborts it with the pages processed so far already committed.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Aborted`] for an API failure on a page, or
    /// [`HarvestError::Store`] when a batch cannot be committed.
    #[instrument(skip(self), fields(date_from = %self.date_from, date_to = %self.date_to))]
    pub async fn run(&self) -> Result<HarvestSummary, HarvestError> {
        let mut summary = HarvestSummary::default();
        let mut page: u32 = 1;

        loop {
            let params = self.page_params(page);
            let data = self
                .client
                .invoke(ApiMethod::ListRecords, params)
                .await
                .map_err(|source| HarvestError::Aborted { page, source })?;

            let items = data["nfCadastro"].as_array().cloned().unwrap_or_default();
            if items.is_empty() {
                info!(page, "page returned no records; harvest complete");
                break;
            }

            let mut batch = Vec::with_capacity(items.len());
            for item in &items {
                match NewRecord::from_listing(item) {
                    Ok(record) => batch.push(record),
                    Err(e) => {
                        warn!(page, error = %e, "skipping invalid listing item");
                        summary.skipped += 1;
                    }
                }
            }

            let outcome = self.store.upsert_batch(&batch).await?;
            summary.inserted += outcome.inserted;
            summary.duplicates += outcome.duplicates;
            summary.pages += 1;

            let total_pages = data["total_de_paginas"].as_u64().unwrap_or(1);
            info!(
                page,
                total_pages,
                inserted = outcome.inserted,
                duplicates = outcome.duplicates,
                "page processed"
            );

            if u64::from(page) >= total_pages {
                break;
            }
            page += 1;
        }

        info!(
            pages = summary.pages,
            inserted = summary.inserted,
            duplicates = summary.duplicates,
            skipped = summary.skipped,
            "harvest finished"
        );
        Ok(summary)
    }

    /// Builds the listing parameters for one page.
    ///
    /// The fixed filters select issued production invoices, summary shape,
    /// ordered by code, matching what the document archive expects.
    fn page_params(&self, page: u32) -> serde_json::Value {
        json!({
            "pagina": page,
            "registros_por_pagina": self.page_size,
            "apenas_importado_api": "N",
            "dEmiInicial": self.date_from.format(WIRE_DATE_FORMAT).to_string(),
            "dEmiFinal": self.date_to.format(WIRE_DATE_FORMAT).to_string(),
            "tpNF": 1,
            "tpAmb": 1,
            "cDetalhesPedido": "N",
            "cApenasResumo": "S",
            "ordenar_por": "CODIGO",
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    // Page-loop behavior against a fake remote API lives in
    // tests/pipeline_integration.rs; here we only cover parameter shaping.

    use super::*;
    use crate::api::{ApiCredentials, ApiEndpoints, RateLimiter, RetryPolicy};
    use crate::db::Database;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_page_params_shape() {
        let client = ApiClient::new(
            ApiCredentials {
                app_key: "k".into(),
                app_secret: "s".into(),
            },
            ApiEndpoints {
                listing_url: "http://unused.invalid".into(),
                document_url: "http://unused.invalid".into(),
            },
            Arc::new(RateLimiter::new(1)),
            RetryPolicy::default(),
            Duration::from_secs(5),
        );
        let store = RecordStore::new(Database::new_in_memory().await.unwrap());
        let harvester = Harvester::new(
            &client,
            &store,
            500,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        );

        let params = harvester.page_params(3);
        assert_eq!(params["pagina"], 3);
        assert_eq!(params["registros_por_pagina"], 500);
        assert_eq!(params["dEmiInicial"], "01/01/2024");
        assert_eq!(params["dEmiFinal"], "31/01/2024");
        assert_eq!(params["cApenasResumo"], "S");
    }
}
