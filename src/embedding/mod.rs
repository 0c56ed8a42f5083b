//! Embedding provider gateway.
//!
//! Defines the [`EmbeddingBackend`] trait and the [`EmbeddingGateway`] that
//! sequences backends in a fixed order:
//!
//! 1. the configured `provider`,
//! 2. each entry of `fallbacks`,
//! 3. `LocalEmbedder` when built with `local-embeddings-fastembed`,
//! 4. the offline [`HashingEmbedder`], which is always present.
//!
//! Naming `hashing` earlier in the chain ends it there, since it never fails.
//!
//! Remote backends run under the retry policy from [`crate::provider`]. A
//! failing backend is logged and skipped; only when every backend fails does
//! the gateway return [`Error::ProviderExhausted`].
//!
//! A single call never mixes backends: all batches of one `embed` call come
//! from the same backend, and every vector is checked against the configured
//! dimensionality before it is accepted.
//!
//! | Config Value | Backend |
//! |-------------|----------|
//! | `"hashing"` | [`HashingEmbedder`] (offline, deterministic) |
//! | `"openai"` | [`OpenAiEmbedder`] against api.openai.com |
//! | `"openrouter"` | [`OpenAiEmbedder`] against openrouter.ai |
//! | `"ollama"` | [`OllamaEmbedder`] |
//! | `"gemini"` | [`GeminiEmbedder`] |
//! | `"local"` | `LocalEmbedder` (fastembed, behind `local-embeddings-fastembed`) |

mod hashing;
#[cfg(feature = "local-embeddings-fastembed")]
mod local;
mod remote;

pub use hashing::HashingEmbedder;
#[cfg(feature = "local-embeddings-fastembed")]
pub use local::LocalEmbedder;
pub use remote::{GeminiEmbedder, OllamaEmbedder, OpenAiEmbedder};

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::{resolve_api_key, EmbeddingConfig};
use crate::error::{Error, Result};
use crate::provider::{with_retry, AttemptError, RetryPolicy};

/// A single embedding backend.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Backend identifier used in logs (e.g. `"openai"`).
    fn name(&self) -> &str;

    /// Whether failures are worth retrying. Local backends fail
    /// deterministically and are called once.
    fn retryable(&self) -> bool {
        true
    }

    /// Embed a batch of texts, one vector per text, in input order.
    async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, AttemptError>;
}

/// Ordered composite of embedding backends.
pub struct EmbeddingGateway {
    backends: Vec<Arc<dyn EmbeddingBackend>>,
    dims: usize,
    batch_size: usize,
    policy: RetryPolicy,
}

impl EmbeddingGateway {
    /// Build a gateway over explicit backends. The offline fallback is
    /// appended unless the list already ends with one.
    pub fn new(
        mut backends: Vec<Arc<dyn EmbeddingBackend>>,
        dims: usize,
        batch_size: usize,
        policy: RetryPolicy,
    ) -> Self {
        if backends.last().map(|b| b.name()) != Some(HashingEmbedder::NAME) {
            backends.push(Arc::new(HashingEmbedder::new(dims)));
        }
        Self {
            backends,
            dims,
            batch_size: batch_size.max(1),
            policy,
        }
    }

    /// Build the backend chain described by `[embedding]`.
    ///
    /// Remote backends without a credential are skipped with a warning.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let timeout = config.retry.request_timeout();
        let mut backends: Vec<Arc<dyn EmbeddingBackend>> = Vec::new();

        let local = cfg!(feature = "local-embeddings-fastembed");
        for (i, name) in provider_order(&config.provider, &config.fallbacks, local)
            .into_iter()
            .enumerate()
        {
            // Model, URL, and key overrides apply to the primary provider only.
            let overrides = if i == 0 {
                Overrides {
                    model: config.model.clone(),
                    url: config.url.clone(),
                    api_key: config.api_key.clone(),
                }
            } else {
                Overrides::default()
            };

            match build_backend(&name, overrides, config, timeout) {
                Ok(Some(backend)) => backends.push(backend),
                Ok(None) => {}
                Err(e) => warn!(backend = %name, error = %e, "embedding backend unavailable; skipping"),
            }
        }

        let gateway = Self::new(
            backends,
            config.dims,
            config.batch_size,
            config.retry.policy(),
        );
        info!(backends = ?gateway.backend_names(), dims = config.dims, "embedding gateway ready");
        Ok(gateway)
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// Embed texts with the first backend that succeeds.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        for backend in &self.backends {
            match self.embed_with(backend.as_ref(), texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) => warn!(
                    backend = backend.name(),
                    error = %e,
                    "embedding backend failed; falling back"
                ),
            }
        }

        Err(Error::ProviderExhausted {
            capability: "embedding",
            attempted: self.backends.len(),
        })
    }

    /// Embed a single query text.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        vectors.pop().ok_or(Error::ProviderExhausted {
            capability: "embedding",
            attempted: self.backends.len(),
        })
    }

    async fn embed_with(
        &self,
        backend: &dyn EmbeddingBackend,
        texts: &[String],
    ) -> anyhow::Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            let vectors = if backend.retryable() {
                with_retry(&self.policy, backend.name(), || backend.embed(batch)).await?
            } else {
                backend.embed(batch).await.map_err(AttemptError::into_inner)?
            };
            self.validate(backend.name(), batch.len(), &vectors)?;
            out.extend(vectors);
        }

        Ok(out)
    }

    fn validate(&self, backend: &str, expected: usize, vectors: &[Vec<f32>]) -> anyhow::Result<()> {
        if vectors.len() != expected {
            return Err(anyhow!(
                "{} returned {} vectors for {} texts",
                backend,
                vectors.len(),
                expected
            ));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dims) {
            return Err(anyhow!(
                "{} returned {}-dimensional vectors; configured dims is {}",
                backend,
                bad.len(),
                self.dims
            ));
        }
        Ok(())
    }
}

/// Primary provider, then fallbacks, then `local` when compiled in, then the
/// offline backend. Duplicates are removed and nothing follows `hashing`.
fn provider_order(primary: &str, fallbacks: &[String], local: bool) -> Vec<String> {
    let names = std::iter::once(primary)
        .chain(fallbacks.iter().map(String::as_str))
        .chain(local.then_some("local"))
        .chain(std::iter::once(HashingEmbedder::NAME));

    let mut order: Vec<String> = Vec::new();
    for name in names {
        if order.iter().any(|n| n == name) {
            continue;
        }
        order.push(name.to_string());
        if name == HashingEmbedder::NAME {
            break;
        }
    }
    order
}

#[derive(Default)]
struct Overrides {
    model: Option<String>,
    url: Option<String>,
    api_key: Option<String>,
}

fn build_backend(
    name: &str,
    overrides: Overrides,
    config: &EmbeddingConfig,
    timeout: std::time::Duration,
) -> anyhow::Result<Option<Arc<dyn EmbeddingBackend>>> {
    let Overrides { model, url, api_key } = overrides;
    let key = || {
        resolve_api_key(name, api_key.as_deref())
            .ok_or_else(|| anyhow!("no API key configured for '{}'", name))
    };

    let backend: Arc<dyn EmbeddingBackend> = match name {
        "openai" => Arc::new(OpenAiEmbedder::openai(key()?, model, url, config.dims, timeout)?),
        "openrouter" => Arc::new(OpenAiEmbedder::openrouter(key()?, model, url, timeout)?),
        "ollama" => Arc::new(OllamaEmbedder::new(model, url, timeout)?),
        "gemini" => Arc::new(GeminiEmbedder::new(key()?, model, config.dims, timeout)?),
        "hashing" => Arc::new(HashingEmbedder::new(config.dims)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Arc::new(LocalEmbedder::new(model)?),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => {
            warn!("local embedding backend requires --features local-embeddings-fastembed; skipping");
            return Ok(None);
        }
        other => return Err(anyhow!("unknown embedding provider '{}'", other)),
    };
    Ok(Some(backend))
}
