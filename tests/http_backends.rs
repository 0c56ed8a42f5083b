//! HTTP backends against a mocked provider: retry on 429/5xx, no retry on
//! other 4xx, per-request timeouts, and fall-through to the offline backends.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use audit_context::embedding::{EmbeddingGateway, HashingEmbedder, OpenAiEmbedder};
use audit_context::generation::{ChatCompletions, GenerationGateway, HeuristicGenerator};
use audit_context::models::ChatMessage;
use audit_context::provider::RetryPolicy;

const DIMS: usize = 4;

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
        deadline: Duration::from_secs(10),
    }
}

fn openai_gateway(server: &MockServer, timeout: Duration) -> EmbeddingGateway {
    let backend = OpenAiEmbedder::openai(
        "sk-test".to_string(),
        None,
        Some(server.uri()),
        DIMS,
        timeout,
    )
    .unwrap();
    EmbeddingGateway::new(vec![Arc::new(backend)], DIMS, 16, fast_policy())
}

fn embeddings_body() -> serde_json::Value {
    json!({
        "data": [
            { "index": 0, "embedding": [0.1, 0.2, 0.3, 0.4] }
        ]
    })
}

async fn request_count(server: &MockServer) -> usize {
    server.received_requests().await.unwrap().len()
}

#[tokio::test]
async fn rate_limited_twice_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(embeddings_body()))
        .mount(&server)
        .await;

    let gateway = openai_gateway(&server, Duration::from_secs(5));
    let vectors = gateway.embed(&["petty cash".to_string()]).await.unwrap();

    assert_eq!(vectors, vec![vec![0.1, 0.2, 0.3, 0.4]]);
    assert_eq!(request_count(&server).await, 3);
}

#[tokio::test]
async fn client_error_is_not_retried_and_falls_through() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad model"))
        .mount(&server)
        .await;

    let gateway = openai_gateway(&server, Duration::from_secs(5));
    let vectors = gateway.embed(&["petty cash".to_string()]).await.unwrap();

    assert_eq!(request_count(&server).await, 1);
    assert_eq!(vectors, vec![HashingEmbedder::new(DIMS).embed_one("petty cash")]);
}

#[tokio::test]
async fn server_errors_exhaust_attempts_then_fall_through() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let gateway = openai_gateway(&server, Duration::from_secs(5));
    let vectors = gateway.embed(&["petty cash".to_string()]).await.unwrap();

    assert_eq!(request_count(&server).await, 3);
    assert_eq!(vectors, vec![HashingEmbedder::new(DIMS).embed_one("petty cash")]);
}

#[tokio::test]
async fn slow_responder_hits_request_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(embeddings_body())
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let gateway = openai_gateway(&server, Duration::from_millis(100));
    let started = Instant::now();
    let vectors = gateway.embed(&["petty cash".to_string()]).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(4), "{:?}", started.elapsed());
    assert_eq!(vectors, vec![HashingEmbedder::new(DIMS).embed_one("petty cash")]);
}

#[tokio::test]
async fn chat_completions_recover_from_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": "Three findings remain open." } }]
        })))
        .mount(&server)
        .await;

    let backend = ChatCompletions::new(
        "openai",
        "sk-test".to_string(),
        server.uri(),
        "gpt-4o-mini".to_string(),
        Duration::from_secs(5),
    )
    .unwrap();
    let gateway = GenerationGateway::new(vec![Arc::new(backend)], fast_policy());

    let messages = vec![ChatMessage::user("How many findings are open?")];
    let text = gateway.generate("Be brief.", &messages).await.unwrap();
    assert_eq!(text, "Three findings remain open.");
    assert_eq!(request_count(&server).await, 2);
}

#[tokio::test]
async fn chat_unauthorized_falls_back_to_heuristic() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let backend = ChatCompletions::new(
        "groq",
        "bad-key".to_string(),
        server.uri(),
        "llama-3.1-8b-instant".to_string(),
        Duration::from_secs(5),
    )
    .unwrap();
    let gateway = GenerationGateway::new(vec![Arc::new(backend)], fast_policy());

    let messages = vec![ChatMessage::user("List overdue reconciliations")];
    let text = gateway.generate("Be brief.", &messages).await.unwrap();
    assert_eq!(request_count(&server).await, 1);
    assert_eq!(text, HeuristicGenerator::summarize(&messages));
}
