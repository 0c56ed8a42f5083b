//! Error taxonomy for the ingestion, index, and retrieval core.
//!
//! Duplicate uploads are not errors (see [`IngestOutcome`](crate::ingest::IngestOutcome)),
//! and consistency gaps between the vector index and the metadata store are
//! logged and counted rather than raised.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("Text extraction failed: {0}")]
    Extraction(String),

    #[error("Tokenizer unavailable: {0}")]
    Tokenizer(String),

    #[error("Invalid chunking parameters: overlap {overlap} must be < max_tokens {max_tokens}")]
    InvalidChunking { max_tokens: usize, overlap: usize },

    #[error("All {capability} providers failed ({attempted} backends tried)")]
    ProviderExhausted {
        capability: &'static str,
        attempted: usize,
    },

    #[error("Vector index dimension mismatch: expected {expected}, found {found}")]
    IndexDimensionMismatch { expected: usize, found: usize },

    #[error("Vector index file is corrupt: {0}")]
    IndexCorrupt(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
