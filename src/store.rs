//! SQLite metadata store for documents, chunks, and the chunk ↔ vector mapping.
//!
//! The `chunk_vectors` table is the join key between this store and the
//! [`VectorIndex`](crate::index::VectorIndex). Mapping rows for one batch are
//! written in a single transaction: either every chunk of the batch becomes
//! reachable from the index or none does.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::error::Result;
use crate::index::VectorId;
use crate::models::{Chunk, DocType, Document, NewChunk, NewDocument};

pub struct MetadataStore {
    pool: SqlitePool,
}

const DOCUMENT_COLUMNS: &str =
    "id, filename, file_hash, doc_type, uploaded_at, source_unit, year, tags_json, stored_path";
const CHUNK_COLUMNS: &str =
    "id, document_id, chunk_index, text, page_start, page_end, token_count";

impl MetadataStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn find_document_by_hash(&self, file_hash: &str) -> Result<Option<i64>> {
        let id: Option<i64> = sqlx::query_scalar("SELECT id FROM documents WHERE file_hash = ?")
            .bind(file_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    /// Insert a document. Returns `None` when another row already holds the
    /// same content hash (a concurrent upload of identical bytes won).
    pub async fn insert_document(&self, doc: &NewDocument) -> Result<Option<i64>> {
        let tags_json = doc
            .tags
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let id: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO documents (filename, file_hash, doc_type, uploaded_at, source_unit, year, tags_json, stored_path)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(file_hash) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&doc.filename)
        .bind(&doc.file_hash)
        .bind(doc.doc_type.as_str())
        .bind(doc.uploaded_at)
        .bind(&doc.source_unit)
        .bind(doc.year)
        .bind(&tags_json)
        .bind(&doc.stored_path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(id)
    }

    /// Insert chunk rows for a document in one transaction, returning their
    /// ids in input order.
    pub async fn insert_chunks(&self, document_id: i64, chunks: &[NewChunk]) -> Result<Vec<i64>> {
        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(chunks.len());

        for chunk in chunks {
            let result = sqlx::query(
                r#"
                INSERT INTO chunks (document_id, chunk_index, text, page_start, page_end, token_count)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(document_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(chunk.page_start)
            .bind(chunk.page_end)
            .bind(chunk.token_count)
            .execute(&mut *tx)
            .await?;
            ids.push(result.last_insert_rowid());
        }

        tx.commit().await?;
        Ok(ids)
    }

    /// Record `(chunk_id, vector_id)` pairs atomically.
    pub async fn insert_mappings(&self, pairs: &[(i64, VectorId)]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (chunk_id, vector_id) in pairs {
            sqlx::query("INSERT INTO chunk_vectors (chunk_id, vector_id) VALUES (?, ?)")
                .bind(chunk_id)
                .bind(vector_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn chunk_for_vector(&self, vector_id: VectorId) -> Result<Option<i64>> {
        let id: Option<i64> =
            sqlx::query_scalar("SELECT chunk_id FROM chunk_vectors WHERE vector_id = ?")
                .bind(vector_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(id)
    }

    pub async fn vector_for_chunk(&self, chunk_id: i64) -> Result<Option<VectorId>> {
        let id: Option<i64> =
            sqlx::query_scalar("SELECT vector_id FROM chunk_vectors WHERE chunk_id = ?")
                .bind(chunk_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(id)
    }

    pub async fn get_chunk(&self, id: i64) -> Result<Option<Chunk>> {
        let row = sqlx::query(&format!("SELECT {} FROM chunks WHERE id = ?", CHUNK_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(chunk_from_row))
    }

    pub async fn get_document(&self, id: i64) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE id = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(document_from_row))
    }

    /// All documents, newest upload first.
    pub async fn list_documents(&self) -> Result<Vec<Document>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM documents ORDER BY uploaded_at DESC, id DESC",
            DOCUMENT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(document_from_row).collect())
    }

    pub async fn chunks_for_document(&self, document_id: i64) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM chunks WHERE document_id = ? ORDER BY chunk_index",
            CHUNK_COLUMNS
        ))
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(chunk_from_row).collect())
    }

    /// Chunks that have no vector mapping, oldest first.
    pub async fn unmapped_chunks(&self, limit: Option<i64>) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.document_id, c.chunk_index, c.text, c.page_start, c.page_end, c.token_count
            FROM chunks c
            LEFT JOIN chunk_vectors cv ON cv.chunk_id = c.id
            WHERE cv.chunk_id IS NULL
            ORDER BY c.id
            LIMIT ?
            "#,
        )
        .bind(limit.unwrap_or(-1))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(chunk_from_row).collect())
    }

    /// Mappings pointing at vector ids the index does not hold.
    pub async fn mappings_beyond(&self, index_len: i64) -> Result<Vec<(i64, VectorId)>> {
        let rows = sqlx::query(
            "SELECT chunk_id, vector_id FROM chunk_vectors WHERE vector_id >= ? OR vector_id < 0 ORDER BY vector_id",
        )
        .bind(index_len)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| (r.get::<i64, _>("chunk_id"), r.get::<i64, _>("vector_id")))
            .collect())
    }

    pub async fn mapping_count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    pub async fn chunk_count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    pub async fn document_count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}

fn document_from_row(row: &SqliteRow) -> Document {
    let doc_type: String = row.get("doc_type");
    let tags_json: Option<String> = row.get("tags_json");
    Document {
        id: row.get("id"),
        filename: row.get("filename"),
        file_hash: row.get("file_hash"),
        doc_type: DocType::parse(&doc_type).unwrap_or(DocType::Docx),
        uploaded_at: row.get("uploaded_at"),
        source_unit: row.get("source_unit"),
        year: row.get("year"),
        tags: tags_json.and_then(|t| serde_json::from_str(&t).ok()),
        stored_path: row.get("stored_path"),
    }
}

fn chunk_from_row(row: &SqliteRow) -> Chunk {
    Chunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        chunk_index: row.get("chunk_index"),
        text: row.get("text"),
        page_start: row.get("page_start"),
        page_end: row.get("page_end"),
        token_count: row.get("token_count"),
    }
}
