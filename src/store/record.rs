//! Record types and normalization of raw listing items.
//!
//! The listing endpoint returns loosely-typed JSON; [`NewRecord::from_listing`]
//! is the single boundary where that shape is validated and defaulted into a
//! typed record. Optional numeric fields that fail to parse become `None`,
//! never an error; only a missing record key rejects an item.

use chrono::NaiveDate;
use serde_json::Value;
use sqlx::FromRow;
use thiserror::Error;

/// Canonical length of a record key.
pub const KEY_LENGTH: usize = 44;

/// A listing item that cannot be turned into a record.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The item carries no record key; it cannot be stored or fetched.
    #[error("listing item has no record key")]
    MissingKey,
}

/// One harvested invoice record as stored.
#[derive(Debug, Clone, FromRow)]
pub struct Record {
    /// 44-character access key, primary key, immutable once inserted.
    pub record_key: String,
    /// Remote numeric id used to fetch the document.
    pub external_id: Option<i64>,
    /// Invoice number used in the generated file name.
    pub sequence_number: Option<String>,
    /// Invoice series.
    pub series: Option<String>,
    /// Emission date, ISO `YYYY-MM-DD`.
    pub emission_date: Option<String>,
    /// Emission date mirrored as `YYYYMMDD` for range queries.
    pub date_key: Option<i64>,
    /// Counterparty tax id (reporting only).
    pub counterparty_id: Option<String>,
    /// Counterparty legal name (reporting only).
    pub counterparty_name: Option<String>,
    /// Invoice total value (reporting only).
    pub total_value: Option<f64>,
    /// Whether the document has been downloaded and written to disk.
    pub downloaded: bool,
    /// Whether the downloaded document was blank.
    pub empty: bool,
    /// Whether the download overwrote a file that already existed.
    pub redownloaded: bool,
    /// Absolute path of the written document once downloaded.
    pub file_path: Option<String>,
    /// When the row was created.
    pub created_at: String,
    /// When the row was last updated.
    pub updated_at: String,
}

/// A normalized record ready for insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    /// 44-character access key.
    pub record_key: String,
    /// Remote numeric id used to fetch the document.
    pub external_id: Option<i64>,
    /// Invoice number used in the generated file name.
    pub sequence_number: Option<String>,
    /// Invoice series.
    pub series: Option<String>,
    /// Emission date.
    pub emission_date: Option<NaiveDate>,
    /// Counterparty tax id.
    pub counterparty_id: Option<String>,
    /// Counterparty legal name.
    pub counterparty_name: Option<String>,
    /// Invoice total value.
    pub total_value: Option<f64>,
}

impl NewRecord {
    /// Normalizes one raw listing item into a record.
    ///
    /// The listing nests fields under `compl` (identifiers), `ide` (issue
    /// data), `nfDestInt` (counterparty) and `total.ICMSTot` (totals).
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MissingKey`] when the item has no
    /// non-empty record key.
    pub fn from_listing(item: &Value) -> Result<Self, ValidationError> {
        let record_key = item["compl"]["cChaveNFe"]
            .as_str()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(ValidationError::MissingKey)?
            .to_string();

        Ok(Self {
            record_key,
            external_id: lenient_i64(&item["compl"]["nIdNF"]),
            sequence_number: lenient_string(&item["ide"]["nNF"]),
            series: lenient_string(&item["ide"]["serie"]),
            emission_date: item["ide"]["dEmi"].as_str().and_then(parse_emission_date),
            counterparty_id: lenient_string(&item["nfDestInt"]["cnpj_cpf"]),
            counterparty_name: lenient_string(&item["nfDestInt"]["cRazao"]),
            total_value: lenient_f64(&item["total"]["ICMSTot"]["vNF"]),
        })
    }

    /// Returns the emission date as an ISO string, when present.
    #[must_use]
    pub fn emission_date_iso(&self) -> Option<String> {
        self.emission_date.map(|d| d.format("%Y-%m-%d").to_string())
    }

    /// Returns the `YYYYMMDD` integer mirror of the emission date.
    #[must_use]
    pub fn date_key(&self) -> Option<i64> {
        self.emission_date.map(date_key_of)
    }
}

/// Computes the `YYYYMMDD` integer form of a date.
#[must_use]
pub fn date_key_of(date: NaiveDate) -> i64 {
    date.format("%Y%m%d")
        .to_string()
        .parse()
        .unwrap_or_default()
}

/// Parses an emission date in either the API's `DD/MM/YYYY` form or ISO
/// `YYYY-MM-DD`. Returns `None` for anything else.
#[must_use]
pub fn parse_emission_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%d/%m/%Y")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
        .ok()
}

/// Reads a JSON value as a string, accepting numbers.
fn lenient_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Reads a JSON value as an i64, accepting numeric strings.
fn lenient_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Reads a JSON value as an f64, accepting numeric strings.
fn lenient_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
