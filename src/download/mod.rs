//! Document download pipeline.
//!
//! - [`Downloader`] - drains pending records under bounded concurrency
//! - [`unescape_document`] - decodes the entity-encoded payload

mod engine;
mod unescape;

pub use engine::{DownloadSummary, Downloader, EngineError, TaskError};
pub use unescape::unescape_document;
