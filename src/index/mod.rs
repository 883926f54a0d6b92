//! Search index sinks
//!
//! Every record is written to the index independently of detection. Writes
//! are best-effort: the processor logs a failed write and moves on.

pub mod elasticsearch;
pub mod sqlite_store;

pub use elasticsearch::ElasticsearchSink;
pub use sqlite_store::SqliteIndexSink;

use crate::models::EventRecord;
use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur while indexing a record
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Index rejected document (status {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Invalid index URL: {0}")]
    InvalidUrl(String),

    #[error("Index unavailable: {0}")]
    Unavailable(String),
}

/// Trait for durable, searchable record storage
#[async_trait]
pub trait IndexSink: Send + Sync {
    /// Store one record as one document
    async fn write(&self, record: &EventRecord) -> Result<(), IndexError>;

    /// Round-trip check used at startup
    async fn health_check(&self) -> Result<(), IndexError>;

    /// Short backend name for log lines
    fn name(&self) -> &'static str;
}
