//! Ingestion pipeline orchestration.
//!
//! Coordinates the full flow for one uploaded file: hash → dedup → store raw
//! bytes → document row → extraction → chunking → embedding → vector index →
//! mapping rows.
//!
//! The vector insert and the mapping insert are two separate writes to two
//! physical stores. The mapping transaction is the commit point: a crash
//! between them leaves orphan vectors (harmless, never returned by
//! retrieval) but never a mapping that points nowhere. Chunks left without a
//! mapping by a failed run are picked up by [`Ingestor::repair`].

use std::path::PathBuf;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::chunk::chunk_text;
use crate::embedding::EmbeddingGateway;
use crate::error::{Error, Result};
use crate::extract::Extractor;
use crate::index::VectorIndex;
use crate::models::{Chunk, DocType, NewChunk, NewDocument, PageText, UploadMeta};
use crate::store::MetadataStore;

/// Result of an ingest call. A re-upload of identical bytes is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Created(i64),
    Duplicate(i64),
}

impl IngestOutcome {
    pub fn id(&self) -> i64 {
        match self {
            IngestOutcome::Created(id) | IngestOutcome::Duplicate(id) => *id,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, IngestOutcome::Duplicate(_))
    }
}

pub struct Ingestor {
    store: Arc<MetadataStore>,
    index: Arc<VectorIndex>,
    embeddings: Arc<EmbeddingGateway>,
    extractor: Arc<dyn Extractor>,
    upload_dir: PathBuf,
    max_tokens: usize,
    overlap_tokens: usize,
}

impl Ingestor {
    pub fn new(
        store: Arc<MetadataStore>,
        index: Arc<VectorIndex>,
        embeddings: Arc<EmbeddingGateway>,
        extractor: Arc<dyn Extractor>,
        upload_dir: PathBuf,
        max_tokens: usize,
        overlap_tokens: usize,
    ) -> Result<Self> {
        if max_tokens == 0 || overlap_tokens >= max_tokens {
            return Err(Error::InvalidChunking {
                max_tokens,
                overlap: overlap_tokens,
            });
        }
        if embeddings.dims() != index.dim() {
            return Err(Error::IndexDimensionMismatch {
                expected: index.dim(),
                found: embeddings.dims(),
            });
        }
        Ok(Self {
            store,
            index,
            embeddings,
            extractor,
            upload_dir,
            max_tokens,
            overlap_tokens,
        })
    }

    /// Ingest one file. Identical bytes return the existing document id
    /// without any further work.
    pub async fn ingest(&self, bytes: &[u8], filename: &str, meta: UploadMeta) -> Result<IngestOutcome> {
        let file_hash = sha256_hex(bytes);

        if let Some(id) = self.store.find_document_by_hash(&file_hash).await? {
            info!(document_id = id, filename, "duplicate upload; skipping");
            return Ok(IngestOutcome::Duplicate(id));
        }

        let doc_type = DocType::from_filename(filename)?;
        let stored_path = self.store_file(bytes, &file_hash, doc_type).await?;

        let new_doc = NewDocument {
            filename: filename.to_string(),
            file_hash: file_hash.clone(),
            doc_type,
            uploaded_at: chrono::Utc::now().timestamp(),
            source_unit: meta.source_unit,
            year: meta.year,
            tags: meta.tags,
            stored_path: stored_path.display().to_string(),
        };

        let document_id = match self.store.insert_document(&new_doc).await? {
            Some(id) => id,
            None => {
                // Lost a race with a concurrent upload of the same bytes.
                let id = self
                    .store
                    .find_document_by_hash(&file_hash)
                    .await?
                    .ok_or(Error::Database(sqlx::Error::RowNotFound))?;
                info!(document_id = id, filename, "duplicate upload; skipping");
                return Ok(IngestOutcome::Duplicate(id));
            }
        };

        let units = self.extract(bytes, doc_type).await?;
        let chunks = self.chunk_units(&units)?;
        if chunks.is_empty() {
            warn!(document_id, filename, "no text extracted; document has no chunks");
            return Ok(IngestOutcome::Created(document_id));
        }

        let chunk_ids = self.store.insert_chunks(document_id, &chunks).await?;
        let texts: Vec<String> = chunks.into_iter().map(|c| c.text).collect();
        let mapped = self.embed_and_map(&chunk_ids, &texts).await?;

        info!(
            document_id,
            filename,
            pages = units.len(),
            chunks = mapped,
            "ingested document"
        );
        Ok(IngestOutcome::Created(document_id))
    }

    /// Embed and map every chunk that has no vector mapping. Returns the
    /// number of chunks repaired.
    pub async fn repair(&self) -> Result<usize> {
        let pending: Vec<Chunk> = self.store.unmapped_chunks(None).await?;
        if pending.is_empty() {
            return Ok(0);
        }

        let ids: Vec<i64> = pending.iter().map(|c| c.id).collect();
        let texts: Vec<String> = pending.into_iter().map(|c| c.text).collect();
        let repaired = self.embed_and_map(&ids, &texts).await?;
        info!(repaired, "mapped previously unmapped chunks");
        Ok(repaired)
    }

    /// PDF and DOCX parsing is CPU-bound; keep it off the async workers.
    async fn extract(&self, bytes: &[u8], doc_type: DocType) -> Result<Vec<PageText>> {
        let extractor = Arc::clone(&self.extractor);
        let bytes = bytes.to_vec();
        tokio::task::spawn_blocking(move || extractor.extract(&bytes, doc_type))
            .await
            .map_err(|e| Error::Extraction(format!("extraction task failed: {}", e)))?
    }

    /// Split extraction units into chunks with document-wide ordinals.
    fn chunk_units(&self, units: &[PageText]) -> Result<Vec<NewChunk>> {
        let mut chunks = Vec::new();

        for unit in units {
            if unit.text.trim().is_empty() {
                debug!(page = ?unit.page, "skipping empty extraction unit");
                continue;
            }
            for window in chunk_text(&unit.text, self.max_tokens, self.overlap_tokens)? {
                chunks.push(NewChunk {
                    chunk_index: chunks.len() as i64,
                    text: window.text,
                    page_start: unit.page,
                    page_end: unit.page,
                    token_count: window.token_count as i64,
                });
            }
        }

        Ok(chunks)
    }

    /// Vector insert first, then the mapping transaction as the commit signal.
    async fn embed_and_map(&self, chunk_ids: &[i64], texts: &[String]) -> Result<usize> {
        let vectors = self.embeddings.embed(texts).await?;
        let vector_ids = self.index.add(&vectors).await?;

        let pairs: Vec<(i64, i64)> = chunk_ids.iter().copied().zip(vector_ids).collect();
        self.store.insert_mappings(&pairs).await?;
        Ok(pairs.len())
    }

    async fn store_file(&self, bytes: &[u8], file_hash: &str, doc_type: DocType) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.upload_dir).await?;
        let path = self
            .upload_dir
            .join(format!("{}.{}", file_hash, doc_type.as_str()));
        if tokio::fs::try_exists(&path).await? {
            return Ok(path);
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
