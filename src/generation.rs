//! Generation provider gateway.
//!
//! Same ordered-fallback discipline as [`crate::embedding`]: the configured
//! provider, then `fallbacks`, then the offline [`HeuristicGenerator`], which
//! never fails. Remote backends run under the shared retry policy.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::{resolve_api_key, GenerationConfig};
use crate::error::{Error, Result};
use crate::models::{ChatMessage, Role};
use crate::provider::{http_client, send_json, with_retry, AttemptError, RetryPolicy};

/// A single text-generation backend.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn name(&self) -> &str;

    fn retryable(&self) -> bool {
        true
    }

    async fn generate(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
    ) -> std::result::Result<String, AttemptError>;
}

/// Ordered composite of generation backends.
pub struct GenerationGateway {
    backends: Vec<Arc<dyn GenerationBackend>>,
    policy: RetryPolicy,
}

impl GenerationGateway {
    pub fn new(mut backends: Vec<Arc<dyn GenerationBackend>>, policy: RetryPolicy) -> Self {
        if backends.last().map(|b| b.name()) != Some(HeuristicGenerator::NAME) {
            backends.push(Arc::new(HeuristicGenerator));
        }
        Self { backends, policy }
    }

    pub fn from_config(config: &GenerationConfig) -> Result<Self> {
        let timeout = config.retry.request_timeout();
        let mut backends: Vec<Arc<dyn GenerationBackend>> = Vec::new();

        for (i, name) in provider_order(&config.provider, &config.fallbacks)
            .into_iter()
            .enumerate()
        {
            let (model, url, api_key) = if i == 0 {
                (config.model.clone(), config.url.clone(), config.api_key.clone())
            } else {
                (None, None, None)
            };

            match build_backend(&name, model, url, api_key.as_deref(), timeout) {
                Ok(backend) => backends.push(backend),
                Err(e) => warn!(backend = %name, error = %e, "generation backend unavailable; skipping"),
            }
        }

        let gateway = Self::new(backends, config.retry.policy());
        info!(backends = ?gateway.backend_names(), "generation gateway ready");
        Ok(gateway)
    }

    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// Generate text from a system prompt and conversation, with fallback.
    pub async fn generate(&self, system_prompt: &str, messages: &[ChatMessage]) -> Result<String> {
        for backend in &self.backends {
            let result = if backend.retryable() {
                with_retry(&self.policy, backend.name(), || {
                    backend.generate(system_prompt, messages)
                })
                .await
            } else {
                backend
                    .generate(system_prompt, messages)
                    .await
                    .map_err(AttemptError::into_inner)
            };

            match result {
                Ok(text) => return Ok(text),
                Err(e) => warn!(
                    backend = backend.name(),
                    error = %e,
                    "generation backend failed; falling back"
                ),
            }
        }

        Err(Error::ProviderExhausted {
            capability: "generation",
            attempted: self.backends.len(),
        })
    }
}

fn provider_order(primary: &str, fallbacks: &[String]) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    for name in std::iter::once(primary).chain(fallbacks.iter().map(String::as_str)) {
        if name != HeuristicGenerator::NAME && !order.iter().any(|n| n == name) {
            order.push(name.to_string());
        }
    }
    order
}

fn build_backend(
    name: &str,
    model: Option<String>,
    url: Option<String>,
    api_key: Option<&str>,
    timeout: Duration,
) -> anyhow::Result<Arc<dyn GenerationBackend>> {
    let key = || {
        resolve_api_key(name, api_key).ok_or_else(|| anyhow!("no API key configured for '{}'", name))
    };

    let backend: Arc<dyn GenerationBackend> = match name {
        "openai" => Arc::new(ChatCompletions::new(
            "openai",
            key()?,
            url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model.unwrap_or_else(|| "gpt-4o-mini".to_string()),
            timeout,
        )?),
        "groq" => Arc::new(ChatCompletions::new(
            "groq",
            key()?,
            url.unwrap_or_else(|| "https://api.groq.com/openai/v1".to_string()),
            model.unwrap_or_else(|| "llama-3.1-70b-versatile".to_string()),
            timeout,
        )?),
        "openrouter" => Arc::new(ChatCompletions::new(
            "openrouter",
            key()?,
            url.unwrap_or_else(|| "https://openrouter.ai/api/v1".to_string()),
            model.unwrap_or_else(|| "openrouter/auto".to_string()),
            timeout,
        )?),
        "ollama" => Arc::new(OllamaChat {
            client: http_client(timeout)?,
            url: url.unwrap_or_else(|| "http://localhost:11434".to_string()),
            model: model.unwrap_or_else(|| "llama3.1".to_string()),
        }),
        "gemini" => Arc::new(GeminiChat {
            client: http_client(timeout)?,
            api_key: key()?,
            model: model.unwrap_or_else(|| "gemini-1.5-flash".to_string()),
        }),
        other => return Err(anyhow!("unknown generation provider '{}'", other)),
    };
    Ok(backend)
}

fn openai_messages(system_prompt: &str, messages: &[ChatMessage]) -> Vec<serde_json::Value> {
    std::iter::once(serde_json::json!({ "role": "system", "content": system_prompt }))
        .chain(
            messages
                .iter()
                .map(|m| serde_json::json!({ "role": m.role.as_str(), "content": m.content })),
        )
        .collect()
}

/// OpenAI-compatible `POST {base}/chat/completions` (OpenAI, Groq, OpenRouter).
pub struct ChatCompletions {
    name: &'static str,
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl ChatCompletions {
    pub fn new(
        name: &'static str,
        api_key: String,
        base_url: String,
        model: String,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            name,
            client: http_client(timeout)?,
            base_url,
            api_key,
            model,
        })
    }
}

#[async_trait]
impl GenerationBackend for ChatCompletions {
    fn name(&self) -> &str {
        self.name
    }

    async fn generate(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
    ) -> std::result::Result<String, AttemptError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": openai_messages(system_prompt, messages),
        });
        let request = self
            .client
            .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&body);
        let json = send_json(request, self.name).await?;

        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| AttemptError::Permanent(anyhow!("{} response has no message content", self.name)))
    }
}

/// Ollama `POST /api/chat` without streaming.
pub struct OllamaChat {
    client: reqwest::Client,
    url: String,
    model: String,
}

#[async_trait]
impl GenerationBackend for OllamaChat {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
    ) -> std::result::Result<String, AttemptError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": openai_messages(system_prompt, messages),
            "stream": false,
        });
        let request = self
            .client
            .post(format!("{}/api/chat", self.url.trim_end_matches('/')))
            .json(&body);
        let json = send_json(request, "ollama").await?;

        json.pointer("/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| AttemptError::Permanent(anyhow!("ollama response has no message content")))
    }
}

/// Gemini `generateContent`.
pub struct GeminiChat {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

#[async_trait]
impl GenerationBackend for GeminiChat {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
    ) -> std::result::Result<String, AttemptError> {
        let contents: Vec<serde_json::Value> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                let role = if m.role == Role::Assistant { "model" } else { "user" };
                serde_json::json!({ "role": role, "parts": [{ "text": m.content }] })
            })
            .collect();
        let body = serde_json::json!({
            "systemInstruction": { "parts": [{ "text": system_prompt }] },
            "contents": contents,
        });
        let request = self
            .client
            .post(format!(
                "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
                self.model
            ))
            .header("x-goog-api-key", &self.api_key)
            .json(&body);
        let json = send_json(request, "gemini").await?;

        let parts = json
            .pointer("/candidates/0/content/parts")
            .and_then(|p| p.as_array())
            .ok_or_else(|| AttemptError::Permanent(anyhow!("gemini response has no candidates")))?;
        Ok(parts
            .iter()
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect())
    }
}

/// Offline fallback: lists the user messages under a fixed heading.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicGenerator;

impl HeuristicGenerator {
    pub const NAME: &'static str = "heuristic";
    pub const HEADING: &'static str = "(Fallback) Based on the available context, here is a summary:";

    pub fn summarize(messages: &[ChatMessage]) -> String {
        let bullets: Vec<String> = messages
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| format!("- {}", m.content))
            .collect();
        format!("{}\n{}", Self::HEADING, bullets.join("\n\n"))
    }
}

#[async_trait]
impl GenerationBackend for HeuristicGenerator {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn retryable(&self) -> bool {
        false
    }

    async fn generate(
        &self,
        _system_prompt: &str,
        messages: &[ChatMessage],
    ) -> std::result::Result<String, AttemptError> {
        Ok(Self::summarize(messages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            deadline: Duration::from_secs(5),
        }
    }

    struct Scripted {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl GenerationBackend for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(
            &self,
            system_prompt: &str,
            _messages: &[ChatMessage],
        ) -> std::result::Result<String, AttemptError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(AttemptError::Transient(anyhow!("503 on attempt {}", n)))
            } else {
                Ok(format!("answer to: {}", system_prompt))
            }
        }
    }

    struct Hangs;

    #[async_trait]
    impl GenerationBackend for Hangs {
        fn name(&self) -> &str {
            "hangs"
        }

        async fn generate(
            &self,
            _system_prompt: &str,
            _messages: &[ChatMessage],
        ) -> std::result::Result<String, AttemptError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("too late".to_string())
        }
    }

    struct AlwaysFails(&'static str);

    #[async_trait]
    impl GenerationBackend for AlwaysFails {
        fn name(&self) -> &str {
            self.0
        }

        fn retryable(&self) -> bool {
            false
        }

        async fn generate(
            &self,
            _system_prompt: &str,
            _messages: &[ChatMessage],
        ) -> std::result::Result<String, AttemptError> {
            Err(AttemptError::Permanent(anyhow!("down")))
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let scripted = Arc::new(Scripted {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let gateway = GenerationGateway::new(vec![scripted.clone()], fast_policy());
        let text = gateway.generate("audit", &[ChatMessage::user("q")]).await.unwrap();
        assert_eq!(text, "answer to: audit");
        assert_eq!(scripted.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_remote_falls_back_to_heuristic() {
        let scripted = Arc::new(Scripted {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let gateway = GenerationGateway::new(vec![scripted.clone()], fast_policy());
        let messages = vec![
            ChatMessage::user("Summarize finding A"),
            ChatMessage::assistant("ignored"),
            ChatMessage::user("and finding B"),
        ];
        let text = gateway.generate("sys", &messages).await.unwrap();
        assert_eq!(
            text,
            format!(
                "{}\n- Summarize finding A\n\n- and finding B",
                HeuristicGenerator::HEADING
            )
        );
        assert_eq!(scripted.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn hanging_backend_is_cut_off_by_deadline() {
        let policy = RetryPolicy {
            deadline: Duration::from_millis(50),
            ..fast_policy()
        };
        let gateway = GenerationGateway::new(vec![Arc::new(Hangs)], policy);
        let started = std::time::Instant::now();
        let text = gateway.generate("sys", &[ChatMessage::user("x")]).await.unwrap();
        assert!(text.starts_with(HeuristicGenerator::HEADING));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn every_backend_failing_is_exhausted() {
        let gateway = GenerationGateway::new(
            vec![Arc::new(AlwaysFails("remote")), Arc::new(AlwaysFails("heuristic"))],
            fast_policy(),
        );
        let err = gateway.generate("sys", &[]).await.unwrap_err();
        assert!(matches!(
            err,
            Error::ProviderExhausted {
                capability: "generation",
                attempted: 2
            }
        ));
    }

    #[test]
    fn keyless_remote_is_skipped() {
        std::env::remove_var("GROQ_API_KEY");
        let config = GenerationConfig {
            provider: "groq".to_string(),
            fallbacks: vec!["ollama".to_string()],
            ..GenerationConfig::default()
        };
        let gateway = GenerationGateway::from_config(&config).unwrap();
        assert_eq!(gateway.backend_names(), vec!["ollama", "heuristic"]);
    }
}
