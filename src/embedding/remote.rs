//! HTTP embedding backends: OpenAI-compatible, Ollama, and Gemini.

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::EmbeddingBackend;
use crate::provider::{http_client, send_json, AttemptError};

const OPENAI_URL: &str = "https://api.openai.com/v1";
const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1";
const OLLAMA_URL: &str = "http://localhost:11434";
const GEMINI_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Embeddings via `POST {base}/embeddings` (OpenAI and OpenRouter).
pub struct OpenAiEmbedder {
    name: &'static str,
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    /// Requested output size; only OpenAI honors the `dimensions` field.
    dimensions: Option<usize>,
}

impl OpenAiEmbedder {
    pub fn openai(
        api_key: String,
        model: Option<String>,
        url: Option<String>,
        dims: usize,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            name: "openai",
            client: http_client(timeout)?,
            base_url: url.unwrap_or_else(|| OPENAI_URL.to_string()),
            api_key,
            model: model.unwrap_or_else(|| "text-embedding-3-small".to_string()),
            dimensions: Some(dims),
        })
    }

    pub fn openrouter(
        api_key: String,
        model: Option<String>,
        url: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            name: "openrouter",
            client: http_client(timeout)?,
            base_url: url.unwrap_or_else(|| OPENROUTER_URL.to_string()),
            api_key,
            model: model.unwrap_or_else(|| "openai/text-embedding-3-small".to_string()),
            dimensions: None,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAiEmbedder {
    fn name(&self) -> &str {
        self.name
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AttemptError> {
        let mut body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        if let Some(dims) = self.dimensions {
            body["dimensions"] = serde_json::json!(dims);
        }

        let request = self
            .client
            .post(format!("{}/embeddings", self.base_url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&body);
        let json = send_json(request, self.name).await?;
        parse_openai_response(&json).map_err(AttemptError::Permanent)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, float_array(embedding)?));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

/// Embeddings via a local Ollama instance (`POST /api/embed`).
pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(model: Option<String>, url: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            url: url.unwrap_or_else(|| OLLAMA_URL.to_string()),
            model: model.unwrap_or_else(|| "nomic-embed-text".to_string()),
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OllamaEmbedder {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AttemptError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let request = self
            .client
            .post(format!("{}/api/embed", self.url.trim_end_matches('/')))
            .json(&body);
        let json = send_json(request, "ollama").await?;
        parse_ollama_response(&json).map_err(AttemptError::Permanent)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?
        .iter()
        .map(float_array)
        .collect()
}

/// Embeddings via Gemini `batchEmbedContents`.
pub struct GeminiEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dims: usize,
}

impl GeminiEmbedder {
    pub fn new(api_key: String, model: Option<String>, dims: usize, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            api_key,
            model: model.unwrap_or_else(|| "text-embedding-004".to_string()),
            dims,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for GeminiEmbedder {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AttemptError> {
        let model = format!("models/{}", self.model);
        let requests: Vec<serde_json::Value> = texts
            .iter()
            .map(|text| {
                serde_json::json!({
                    "model": model,
                    "content": { "parts": [{ "text": text }] },
                    "outputDimensionality": self.dims,
                })
            })
            .collect();

        let request = self
            .client
            .post(format!("{}/{}:batchEmbedContents", GEMINI_URL, model))
            .header("x-goog-api-key", &self.api_key)
            .json(&serde_json::json!({ "requests": requests }));
        let json = send_json(request, "gemini").await?;
        parse_gemini_response(&json).map_err(AttemptError::Permanent)
    }
}

fn parse_gemini_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid Gemini response: missing embeddings array"))?
        .iter()
        .map(|item| {
            item.get("values")
                .ok_or_else(|| anyhow!("Invalid Gemini response: missing values"))
                .and_then(float_array)
        })
        .collect()
}

fn float_array(value: &serde_json::Value) -> Result<Vec<f32>> {
    value
        .as_array()
        .ok_or_else(|| anyhow!("embedding is not an array"))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| anyhow!("embedding contains a non-numeric value"))
        })
        .collect()
}
