//! Retrieval pipeline: query → embedding → nearest vectors → citations.
//!
//! Each neighbor id is resolved through the mapping table to its chunk and
//! document. Neighbors that do not resolve (orphan vectors from an
//! interrupted ingestion, or rows that disappeared) are skipped, logged, and
//! counted; they never fail the query. Result order is the index's
//! ascending-distance order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::embedding::EmbeddingGateway;
use crate::error::Result;
use crate::index::VectorIndex;
use crate::models::Citation;
use crate::store::MetadataStore;

pub struct Retriever {
    store: Arc<MetadataStore>,
    index: Arc<VectorIndex>,
    embeddings: Arc<EmbeddingGateway>,
    snippet_chars: usize,
    gaps: AtomicU64,
}

impl Retriever {
    pub fn new(
        store: Arc<MetadataStore>,
        index: Arc<VectorIndex>,
        embeddings: Arc<EmbeddingGateway>,
        snippet_chars: usize,
    ) -> Self {
        Self {
            store,
            index,
            embeddings,
            snippet_chars,
            gaps: AtomicU64::new(0),
        }
    }

    /// Top-`k` citations for `query`, closest first.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<Citation>> {
        let query_vec = self.embeddings.embed_query(query).await?;
        let neighbors = self.index.search(&query_vec, k).await?;

        let mut citations = Vec::with_capacity(neighbors.len());
        for (vector_id, distance) in neighbors {
            let Some(chunk_id) = self.store.chunk_for_vector(vector_id).await? else {
                self.gap(vector_id, "vector has no chunk mapping");
                continue;
            };
            let Some(chunk) = self.store.get_chunk(chunk_id).await? else {
                self.gap(vector_id, "mapped chunk is missing");
                continue;
            };
            let Some(document) = self.store.get_document(chunk.document_id).await? else {
                self.gap(vector_id, "chunk's document is missing");
                continue;
            };

            citations.push(Citation {
                document_id: document.id,
                filename: document.filename,
                page: chunk.page_start,
                chunk_id: chunk.id,
                snippet: snippet(&chunk.text, self.snippet_chars),
                distance,
            });
        }

        debug!(k, hits = citations.len(), "retrieval complete");
        Ok(citations)
    }

    /// Neighbors skipped since startup because they did not resolve.
    pub fn consistency_gaps(&self) -> u64 {
        self.gaps.load(Ordering::Relaxed)
    }

    fn gap(&self, vector_id: i64, reason: &str) {
        self.gaps.fetch_add(1, Ordering::Relaxed);
        warn!(vector_id, reason, "consistency gap; skipping neighbor");
    }
}

/// First `max_chars` characters of `text`.
pub fn snippet(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::embedding::HashingEmbedder;
    use crate::migrate::run_migrations;
    use crate::models::{DocType, NewChunk, NewDocument};
    use crate::provider::RetryPolicy;

    const DIMS: usize = 64;

    #[test]
    fn snippet_is_char_safe() {
        assert_eq!(snippet("héllo wörld", 4), "héll");
        assert_eq!(snippet("short", 400), "short");
        assert_eq!(snippet("", 10), "");
    }

    #[tokio::test]
    async fn orphan_vectors_are_skipped_and_counted() {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = db::connect(&tmp.path().join("r.sqlite")).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let store = Arc::new(MetadataStore::new(pool));
        let index = Arc::new(VectorIndex::open(tmp.path().join("r.idx"), DIMS).await.unwrap());
        let gateway = Arc::new(EmbeddingGateway::new(vec![], DIMS, 8, RetryPolicy::default()));
        let hashing = HashingEmbedder::new(DIMS);

        let doc_id = store
            .insert_document(&NewDocument {
                filename: "branch-audit.pdf".to_string(),
                file_hash: "h1".to_string(),
                doc_type: DocType::Pdf,
                uploaded_at: 0,
                source_unit: Some("Branch A".to_string()),
                year: Some(2024),
                tags: None,
                stored_path: String::new(),
            })
            .await
            .unwrap()
            .unwrap();
        let text = "petty cash reconciliation was not performed monthly";
        let chunk_ids = store
            .insert_chunks(
                doc_id,
                &[NewChunk {
                    chunk_index: 0,
                    text: text.to_string(),
                    page_start: Some(2),
                    page_end: Some(2),
                    token_count: 13,
                }],
            )
            .await
            .unwrap();

        // Vector 0 is an orphan (no mapping), vector 1 is mapped.
        let ids = index
            .add(&[hashing.embed_one(text), hashing.embed_one(text)])
            .await
            .unwrap();
        store.insert_mappings(&[(chunk_ids[0], ids[1])]).await.unwrap();

        let retriever = Retriever::new(store, index, gateway, 10);
        let citations = retriever.retrieve(text, 5).await.unwrap();

        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].chunk_id, chunk_ids[0]);
        assert_eq!(citations[0].page, Some(2));
        assert_eq!(citations[0].filename, "branch-audit.pdf");
        assert_eq!(citations[0].snippet, "petty cash");
        assert_eq!(retriever.consistency_gaps(), 1);
    }

    #[tokio::test]
    async fn empty_index_returns_nothing() {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = db::connect(&tmp.path().join("e.sqlite")).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let retriever = Retriever::new(
            Arc::new(MetadataStore::new(pool)),
            Arc::new(VectorIndex::open(tmp.path().join("e.idx"), DIMS).await.unwrap()),
            Arc::new(EmbeddingGateway::new(vec![], DIMS, 8, RetryPolicy::default())),
            400,
        );
        assert!(retriever.retrieve("anything", 5).await.unwrap().is_empty());
        assert_eq!(retriever.consistency_gaps(), 0);
    }
}
