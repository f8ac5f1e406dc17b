//! Integration tests for Anthropic provider
//!
//! Tests behavioral contracts without testing implementation details:
//! - API request/response handling
//! - Error scenarios (rate limits, auth failures, server errors)
//! - Token usage tracking
//! - System prompt lifting
//! - Finish reason handling

use chatgate::llm::provider::{CompletionRequest, FinishReason, LlmError, LlmProvider, Message};
use chatgate::llm::providers::anthropic::{AnthropicConfig, AnthropicProvider};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(base_url: &str) -> AnthropicConfig {
    AnthropicConfig {
        api_key: "test-api-key".to_string(),
        base_url: base_url.to_string(),
        timeout: Duration::from_secs(5),
        version: "2023-06-01".to_string(),
    }
}

fn test_request() -> CompletionRequest {
    CompletionRequest::new("claude-3-haiku-20240307", vec![Message::user("Hello")])
        .with_max_tokens(Some(100))
        .with_temperature(Some(0.7))
}

fn message_body(text: &str, stop_reason: &str) -> serde_json::Value {
    json!({
        "id": "msg_123",
        "type": "message",
        "role": "assistant",
        "content": [{ "type": "text", "text": text }],
        "model": "claude-3-haiku-20240307",
        "stop_reason": stop_reason,
        "usage": { "input_tokens": 10, "output_tokens": 15 }
    })
}

async fn provider_for(response: ResponseTemplate) -> (MockServer, AnthropicProvider) {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(response)
        .mount(&mock_server)
        .await;
    let provider = AnthropicProvider::new(test_config(&mock_server.uri())).unwrap();
    (mock_server, provider)
}

#[tokio::test]
async fn test_anthropic_provider_returns_successful_completion_with_valid_response() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(header("x-api-key", "test-api-key"))
        .and(header("anthropic-version", "2023-06-01"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(message_body("Hello! How can I help you?", "end_turn")),
        )
        .mount(&mock_server)
        .await;

    let provider = AnthropicProvider::new(test_config(&mock_server.uri())).unwrap();
    let response = provider.complete(test_request()).await.unwrap();

    assert_eq!(
        response.content,
        Some("Hello! How can I help you?".to_string())
    );
    assert_eq!(response.model, "claude-3-haiku-20240307");
    assert_eq!(response.usage.prompt_tokens, 10);
    assert_eq!(response.usage.completion_tokens, 15);
    assert_eq!(response.usage.total_tokens, 25);
    assert_eq!(response.finish_reason, FinishReason::Stop);
}

#[tokio::test]
async fn test_anthropic_provider_joins_multiple_text_blocks() {
    let body = json!({
        "content": [
            { "type": "text", "text": "First part. " },
            { "type": "tool_use", "id": "t1", "name": "x", "input": {} },
            { "type": "text", "text": "Second part." }
        ],
        "model": "claude-3-haiku-20240307",
        "stop_reason": "end_turn",
        "usage": { "input_tokens": 10, "output_tokens": 20 }
    });
    let (_server, provider) = provider_for(ResponseTemplate::new(200).set_body_json(body)).await;

    let response = provider.complete(test_request()).await.unwrap();

    assert_eq!(
        response.content,
        Some("First part. Second part.".to_string())
    );
}

#[tokio::test]
async fn test_anthropic_provider_lifts_system_messages_into_system_field() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(body_partial_json(json!({
            "system": "You are helpful\n\nLive data from feed:\n{}",
            "max_tokens": 1024,
            "messages": [
                { "role": "user", "content": "Earlier" },
                { "role": "assistant", "content": "Reply" },
                { "role": "user", "content": "Now" }
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(message_body("ok", "end_turn")))
        .mount(&mock_server)
        .await;

    let provider = AnthropicProvider::new(test_config(&mock_server.uri())).unwrap();
    let request = CompletionRequest::new(
        "claude-3-haiku-20240307",
        vec![
            Message::system("You are helpful"),
            Message::system("Live data from feed:\n{}"),
            Message::user("Earlier"),
            Message::assistant("Reply"),
            Message::user("Now"),
        ],
    );

    let response = provider.complete(request).await.unwrap();
    assert_eq!(response.content.as_deref(), Some("ok"));
}

#[tokio::test]
async fn test_anthropic_provider_rejects_system_only_conversation() {
    let provider = AnthropicProvider::new(test_config("http://127.0.0.1:9")).unwrap();
    let request = CompletionRequest::new(
        "claude-3-haiku-20240307",
        vec![Message::system("You are helpful")],
    );

    let result = provider.complete(request).await;

    assert!(matches!(result, Err(LlmError::InvalidRequest(_))));
}

#[tokio::test]
async fn test_anthropic_provider_maps_401_to_authentication_failure() {
    let (_server, provider) =
        provider_for(ResponseTemplate::new(401).set_body_string("Invalid API key")).await;

    match provider.complete(test_request()).await.unwrap_err() {
        LlmError::AuthenticationFailed(msg) => {
            assert!(msg.contains("401"));
            assert!(msg.contains("Invalid API key"));
        }
        other => panic!("Expected AuthenticationFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_anthropic_provider_maps_429_to_rate_limit() {
    let (_server, provider) =
        provider_for(ResponseTemplate::new(429).set_body_string("slow down")).await;

    let error = provider.complete(test_request()).await.unwrap_err();

    assert!(matches!(error, LlmError::RateLimitExceeded(_)));
    assert!(error.is_retryable());
}

#[tokio::test]
async fn test_anthropic_provider_marks_server_errors_retryable() {
    let (_server, provider) =
        provider_for(ResponseTemplate::new(529).set_body_string("overloaded")).await;

    let error = provider.complete(test_request()).await.unwrap_err();

    assert!(matches!(error, LlmError::ApiError(_)));
    assert!(error.is_retryable());
}

#[tokio::test]
async fn test_anthropic_provider_returns_none_for_empty_content() {
    let body = json!({
        "content": [],
        "model": "claude-3-haiku-20240307",
        "stop_reason": "end_turn",
        "usage": { "input_tokens": 10, "output_tokens": 0 }
    });
    let (_server, provider) = provider_for(ResponseTemplate::new(200).set_body_json(body)).await;

    let response = provider.complete(test_request()).await.unwrap();

    assert_eq!(response.content, None);
}

#[tokio::test]
async fn test_anthropic_provider_converts_finish_reasons() {
    for (stop_reason, expected) in [
        ("max_tokens", FinishReason::Length),
        ("stop_sequence", FinishReason::Stop),
        ("refusal", FinishReason::ContentFilter),
    ] {
        let (_server, provider) = provider_for(
            ResponseTemplate::new(200).set_body_json(message_body("text", stop_reason)),
        )
        .await;

        let response = provider.complete(test_request()).await.unwrap();
        assert_eq!(response.finish_reason, expected, "stop_reason {stop_reason}");
    }
}

#[tokio::test]
async fn test_anthropic_provider_returns_error_when_json_parsing_fails() {
    let (_server, provider) =
        provider_for(ResponseTemplate::new(200).set_body_string("not json")).await;

    let result = provider.complete(test_request()).await;

    assert!(matches!(result, Err(LlmError::InvalidResponse(_))));
}

#[tokio::test]
async fn test_anthropic_health_check_succeeds_when_api_available() {
    let (_server, provider) = provider_for(
        ResponseTemplate::new(200).set_body_json(message_body("Hi", "end_turn")),
    )
    .await;

    assert!(provider.health_check().await.is_ok());
}

#[tokio::test]
async fn test_anthropic_health_check_fails_when_auth_invalid() {
    let (_server, provider) = provider_for(ResponseTemplate::new(401)).await;

    assert!(matches!(
        provider.health_check().await,
        Err(LlmError::AuthenticationFailed(_))
    ));
}

#[tokio::test]
async fn test_anthropic_provider_preserves_request_metadata() {
    let (_server, provider) = provider_for(
        ResponseTemplate::new(200).set_body_json(message_body("Response", "end_turn")),
    )
    .await;

    let request = test_request().with_metadata("request_id", "test-123");
    let response = provider.complete(request).await.unwrap();

    assert_eq!(
        response.metadata.get("request_id"),
        Some(&"test-123".to_string())
    );
}

#[test]
fn test_anthropic_provider_creation_requires_api_key() {
    let result = AnthropicProvider::new(AnthropicConfig::default());

    match result {
        Err(LlmError::NotConfigured(msg)) => assert!(msg.contains("API key")),
        _ => panic!("Expected NotConfigured error"),
    }
}

#[test]
fn test_anthropic_provider_reports_name_and_models() {
    let provider = AnthropicProvider::new(AnthropicConfig {
        api_key: "test-key".to_string(),
        ..Default::default()
    })
    .unwrap();

    assert_eq!(provider.name(), "anthropic");
    assert!(provider
        .available_models()
        .contains(&"claude-3-haiku-20240307".to_string()));
}
