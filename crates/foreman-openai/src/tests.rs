// Wiremock tests for the OpenAI client

use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use foreman_core::provider::{ChatMessage, ProviderClient, ProviderError, ProviderRequest};

use crate::OpenAiClient;

fn request() -> ProviderRequest {
    ProviderRequest::new("gpt-4o", vec![ChatMessage::user("Review this diff.")])
}

async fn client_for(server: &MockServer) -> OpenAiClient {
    OpenAiClient::with_base_url("test-key", format!("{}/v1/chat/completions", server.uri()))
}

#[tokio::test]
async fn test_successful_call_parses_usage_and_cost() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "gpt-4o",
            "choices": [{"message": {"role": "assistant", "content": "looks good"}}],
            "usage": {"prompt_tokens": 200, "completion_tokens": 20}
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let response = client
        .execute(request(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.provider, "openai");
    assert_eq!(response.text, "looks good");
    assert_eq!(response.tokens_in, 200);
    assert_eq!(response.tokens_out, 20);
    // 200 * $2.5/MTok + 20 * $10/MTok
    assert!((response.cost_usd - 0.0007).abs() < 1e-9);
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(503)
                .set_body_json(json!({"error": {"message": "overloaded"}})),
        )
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let err = client
        .execute(request(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Unavailable(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_auth_failure_is_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"error": {"message": "bad key"}})),
        )
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let err = client
        .execute(request(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Auth(_)));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_cancel_token_aborts_promptly() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(30))
                .set_body_json(json!({})),
        )
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = client.execute(request(), &cancel).await.unwrap_err();
    assert!(matches!(err, ProviderError::Cancelled));
}

#[test]
fn test_cost_estimate_prefix_match() {
    let client = OpenAiClient::new("k");
    // gpt-4o-mini must match before the gpt-4o prefix
    let mini = client.cost_estimate(1000, 1000, "gpt-4o-mini-2024-07-18");
    let full = client.cost_estimate(1000, 1000, "gpt-4o-2024-08-06");
    assert!(mini < full);
}
