//! Core data models.
//!
//! These types represent the documents, chunks, and citations that flow
//! through the ingestion and retrieval pipeline.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Source format of an uploaded file, inferred from its suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocType {
    Pdf,
    Docx,
}

impl DocType {
    /// Infer the type from a filename suffix (case-insensitive).
    pub fn from_filename(filename: &str) -> Result<Self> {
        let ext = std::path::Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("pdf") => Ok(DocType::Pdf),
            Some("docx") => Ok(DocType::Docx),
            _ => Err(Error::UnsupportedFileType(filename.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Pdf => "pdf",
            DocType::Docx => "docx",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pdf" => Some(DocType::Pdf),
            "docx" => Some(DocType::Docx),
            _ => None,
        }
    }
}

/// Caller-supplied metadata attached to an upload.
#[derive(Debug, Clone, Default)]
pub struct UploadMeta {
    pub source_unit: Option<String>,
    pub year: Option<i64>,
    pub tags: Option<serde_json::Value>,
}

/// Document row. Identity is the SHA-256 of the raw bytes (`file_hash`).
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: i64,
    pub filename: String,
    pub file_hash: String,
    pub doc_type: DocType,
    pub uploaded_at: i64,
    pub source_unit: Option<String>,
    pub year: Option<i64>,
    pub tags: Option<serde_json::Value>,
    pub stored_path: String,
}

/// A document about to be written; the store assigns its id.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub filename: String,
    pub file_hash: String,
    pub doc_type: DocType,
    pub uploaded_at: i64,
    pub source_unit: Option<String>,
    pub year: Option<i64>,
    pub tags: Option<serde_json::Value>,
    pub stored_path: String,
}

/// A window of a document's text.
#[derive(Debug, Clone, Serialize)]
pub struct Chunk {
    pub id: i64,
    pub document_id: i64,
    pub chunk_index: i64,
    pub text: String,
    pub page_start: Option<i64>,
    pub page_end: Option<i64>,
    pub token_count: i64,
}

/// A chunk about to be written; the store assigns its id.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub chunk_index: i64,
    pub text: String,
    pub page_start: Option<i64>,
    pub page_end: Option<i64>,
    pub token_count: i64,
}

/// One extraction unit: a PDF page (numbered from 1) or a whole DOCX body.
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    pub page: Option<i64>,
    pub text: String,
}

/// Retrieval hit resolved back to its document.
#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    pub document_id: i64,
    pub filename: String,
    pub page: Option<i64>,
    pub chunk_id: i64,
    pub snippet: String,
    /// Squared Euclidean distance between query and chunk vectors.
    pub distance: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}
