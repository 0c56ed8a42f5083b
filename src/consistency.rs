//! Cross-store consistency diagnosis.
//!
//! Compares the metadata store's mapping table with the vector index and
//! reports the three ways they can drift apart:
//!
//! - **unmapped chunks**: chunk rows with no vector (ingestion failed after
//!   the chunks were written; fixable with `Ingestor::repair`)
//! - **dangling mappings**: mappings whose vector id the index does not hold
//!   (index file replaced or truncated)
//! - **orphan vectors**: vectors no mapping points at (a crash between the
//!   vector insert and the mapping commit; harmless)

use serde::Serialize;

use crate::error::Result;
use crate::index::{VectorId, VectorIndex};
use crate::store::MetadataStore;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConsistencyReport {
    pub documents: i64,
    pub chunks: i64,
    pub mappings: i64,
    pub vectors: i64,
    pub unmapped_chunks: Vec<i64>,
    pub dangling_mappings: Vec<(i64, VectorId)>,
    pub orphan_vectors: i64,
}

impl ConsistencyReport {
    /// True when no chunk lacks a vector and no mapping points past the index.
    /// Orphan vectors do not count against this.
    pub fn is_consistent(&self) -> bool {
        self.unmapped_chunks.is_empty() && self.dangling_mappings.is_empty()
    }
}

pub async fn check(store: &MetadataStore, index: &VectorIndex) -> Result<ConsistencyReport> {
    let vectors = index.len().await as i64;
    let mappings = store.mapping_count().await?;
    let dangling_mappings = store.mappings_beyond(vectors).await?;
    let unmapped_chunks = store
        .unmapped_chunks(None)
        .await?
        .into_iter()
        .map(|c| c.id)
        .collect();

    let valid_mappings = mappings - dangling_mappings.len() as i64;

    Ok(ConsistencyReport {
        documents: store.document_count().await?,
        chunks: store.chunk_count().await?,
        mappings,
        vectors,
        unmapped_chunks,
        dangling_mappings,
        orphan_vectors: (vectors - valid_mappings).max(0),
    })
}
