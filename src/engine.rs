//! Shared component handle.
//!
//! [`Engine`] owns one metadata store, one vector index, and one instance of
//! each provider gateway, constructed once from [`Config`] and shared by
//! every request. The ingestor and retriever hold `Arc`s to the same
//! components.

use std::sync::Arc;

use tracing::info;

use crate::config::{validate, Config};
use crate::consistency::{self, ConsistencyReport};
use crate::db;
use crate::embedding::EmbeddingGateway;
use crate::error::Result;
use crate::extract::{DocumentExtractor, Extractor};
use crate::generation::GenerationGateway;
use crate::index::VectorIndex;
use crate::ingest::Ingestor;
use crate::migrate::run_migrations;
use crate::retrieve::Retriever;
use crate::store::MetadataStore;

pub struct Engine {
    pub config: Config,
    pub store: Arc<MetadataStore>,
    pub index: Arc<VectorIndex>,
    pub embeddings: Arc<EmbeddingGateway>,
    pub generation: Arc<GenerationGateway>,
    pub ingestor: Ingestor,
    pub retriever: Retriever,
}

impl Engine {
    /// Open every component with the default document extractor.
    pub async fn open(config: &Config) -> Result<Self> {
        Self::open_with_extractor(config, Arc::new(DocumentExtractor)).await
    }

    pub async fn open_with_extractor(config: &Config, extractor: Arc<dyn Extractor>) -> Result<Self> {
        validate(config)?;

        let pool = db::connect(&config.db.path).await?;
        run_migrations(&pool).await?;
        let store = Arc::new(MetadataStore::new(pool));

        let index = Arc::new(VectorIndex::open(&config.index.path, config.embedding.dims).await?);
        let embeddings = Arc::new(EmbeddingGateway::from_config(&config.embedding)?);
        let generation = Arc::new(GenerationGateway::from_config(&config.generation)?);

        let ingestor = Ingestor::new(
            store.clone(),
            index.clone(),
            embeddings.clone(),
            extractor,
            config.storage.upload_dir.clone(),
            config.chunking.max_tokens,
            config.chunking.overlap_tokens,
        )?;
        let retriever = Retriever::new(
            store.clone(),
            index.clone(),
            embeddings.clone(),
            config.retrieval.snippet_chars,
        );

        info!(
            db = %config.db.path.display(),
            index = %config.index.path.display(),
            dims = config.embedding.dims,
            "engine ready"
        );

        Ok(Self {
            config: config.clone(),
            store,
            index,
            embeddings,
            generation,
            ingestor,
            retriever,
        })
    }

    pub async fn check(&self) -> Result<ConsistencyReport> {
        consistency::check(&self.store, &self.index).await
    }

    /// Close the database pool. The index needs no teardown: every `add`
    /// is durable when it returns.
    pub async fn close(&self) {
        self.store.close().await;
    }
}
