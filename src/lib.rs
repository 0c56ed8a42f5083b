//! # Audit Context
//!
//! Document ingestion, vector indexing, and cited retrieval for audit
//! knowledge bases.
//!
//! Uploaded PDF and DOCX files are hashed, stored, split into overlapping
//! token windows, embedded, and appended to a persisted vector index. A
//! SQLite metadata store keeps documents, chunks, and the chunk ↔ vector
//! mapping that joins the two stores. Retrieval embeds a query, searches the
//! index, and resolves each hit back to a citation (document, page, snippet).
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌───────────────┐
//! │ Extract  │──▶│  Chunk +   │──▶│ Vector index  │
//! │ PDF/DOCX │   │  Embed     │   │ (append-only) │
//! └──────────┘   └─────┬──────┘   └───────┬───────┘
//!                      │ mapping           │ search
//!                      ▼                   ▼
//!                ┌───────────┐       ┌───────────┐
//!                │  SQLite   │◀──────│ Retrieval │
//!                │ metadata  │       │ citations │
//!                └───────────┘       └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! actx init
//! actx ingest ./reports --source-unit "Branch A" --year 2024
//! actx retrieve "cash count variance" -k 5
//! actx check
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`store`] | Metadata store |
//! | [`chunk`] | Token-window chunking |
//! | [`extract`] | PDF/DOCX text extraction |
//! | [`provider`] | Retry and backoff for remote backends |
//! | [`embedding`] | Embedding gateway and backends |
//! | [`generation`] | Generation gateway and backends |
//! | [`index`] | Persisted vector index |
//! | [`ingest`] | Ingestion pipeline |
//! | [`retrieve`] | Retrieval pipeline |
//! | [`consistency`] | Cross-store diagnosis |
//! | [`engine`] | Shared component handle |

pub mod chunk;
pub mod config;
pub mod consistency;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod extract;
pub mod generation;
pub mod index;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod provider;
pub mod retrieve;
pub mod store;

pub use engine::Engine;
pub use error::{Error, Result};
