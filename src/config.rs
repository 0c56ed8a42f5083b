//! TOML configuration.
//!
//! Every section carries defaults, so an empty file yields a working offline
//! setup: SQLite under `./data`, the `hashing` embedder at 384 dimensions, and
//! the `heuristic` generator.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::provider::RetryPolicy;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/actx.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
        }
    }
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("./data/uploads")
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("./data/index/vectors.idx")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap(),
        }
    }
}

fn default_max_tokens() -> usize {
    900
}
fn default_overlap() -> usize {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub default_k: usize,
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
            snippet_chars: default_snippet_chars(),
        }
    }
}

fn default_k() -> usize {
    5
}
fn default_snippet_chars() -> usize {
    400
}

/// Retry and timeout settings shared by both provider sections.
#[derive(Debug, Deserialize, Clone)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            deadline_secs: default_deadline_secs(),
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.backoff_base_ms),
            max_delay: Duration::from_millis(self.backoff_cap_ms),
            deadline: Duration::from_secs(self.deadline_secs),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_backoff_cap_ms() -> u64 {
    4000
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_deadline_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Providers tried after `provider`, before the offline fallback.
    #[serde(default)]
    pub fallbacks: Vec<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(flatten)]
    pub retry: RetrySettings,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: default_dims(),
            api_key: None,
            url: None,
            fallbacks: Vec::new(),
            batch_size: default_batch_size(),
            retry: RetrySettings::default(),
        }
    }
}

fn default_embedding_provider() -> String {
    "hashing".to_string()
}
fn default_dims() -> usize {
    384
}
fn default_batch_size() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub fallbacks: Vec<String>,
    #[serde(flatten)]
    pub retry: RetrySettings,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: None,
            api_key: None,
            url: None,
            fallbacks: Vec::new(),
            retry: RetrySettings::default(),
        }
    }
}

fn default_generation_provider() -> String {
    "heuristic".to_string()
}

pub const EMBEDDING_PROVIDERS: &[&str] =
    &["hashing", "openai", "openrouter", "ollama", "gemini", "local"];
pub const GENERATION_PROVIDERS: &[&str] =
    &["heuristic", "openai", "groq", "openrouter", "ollama", "gemini"];

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content)
        .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.max_tokens == 0 {
        return Err(Error::Config("chunking.max_tokens must be > 0".into()));
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        return Err(Error::Config(format!(
            "chunking.overlap_tokens ({}) must be < chunking.max_tokens ({})",
            config.chunking.overlap_tokens, config.chunking.max_tokens
        )));
    }

    // Validate retrieval
    if config.retrieval.default_k < 1 {
        return Err(Error::Config("retrieval.default_k must be >= 1".into()));
    }

    // Validate embedding
    if config.embedding.dims == 0 {
        return Err(Error::Config("embedding.dims must be > 0".into()));
    }
    if config.embedding.batch_size == 0 {
        return Err(Error::Config("embedding.batch_size must be > 0".into()));
    }
    check_providers(
        "embedding",
        &config.embedding.provider,
        &config.embedding.fallbacks,
        EMBEDDING_PROVIDERS,
    )?;
    check_retry("embedding", &config.embedding.retry)?;

    // Validate generation
    check_providers(
        "generation",
        &config.generation.provider,
        &config.generation.fallbacks,
        GENERATION_PROVIDERS,
    )?;
    check_retry("generation", &config.generation.retry)?;

    Ok(())
}

fn check_providers(section: &str, primary: &str, fallbacks: &[String], known: &[&str]) -> Result<()> {
    for name in std::iter::once(primary).chain(fallbacks.iter().map(String::as_str)) {
        if !known.contains(&name) {
            return Err(Error::Config(format!(
                "Unknown {} provider: '{}'. Must be one of: {}",
                section,
                name,
                known.join(", ")
            )));
        }
    }
    Ok(())
}

fn check_retry(section: &str, retry: &RetrySettings) -> Result<()> {
    if retry.max_attempts < 1 {
        return Err(Error::Config(format!("{}.max_attempts must be >= 1", section)));
    }
    if retry.backoff_cap_ms < retry.backoff_base_ms {
        return Err(Error::Config(format!(
            "{}.backoff_cap_ms must be >= backoff_base_ms",
            section
        )));
    }
    Ok(())
}

/// Resolve an API credential: explicit config value first, then the
/// provider's conventional environment variable.
pub fn resolve_api_key(provider: &str, configured: Option<&str>) -> Option<String> {
    if let Some(key) = configured.filter(|k| !k.is_empty()) {
        return Some(key.to_string());
    }
    let var = match provider {
        "openai" => "OPENAI_API_KEY",
        "openrouter" => "OPENROUTER_API_KEY",
        "groq" => "GROQ_API_KEY",
        "gemini" => "GEMINI_API_KEY",
        _ => return None,
    };
    std::env::var(var).ok().filter(|k| !k.is_empty())
}
