// HTTP completion client: payload mapping and error classification
use httpmock::prelude::*;
use serde_json::json;

use smartreply::core::config::ProviderConfig;
use smartreply::core::error::ClientError;
use smartreply::providers::http::HttpCompletionClient;
use smartreply::providers::CompletionClient;

use smartreply::context::ContextMessage;

fn make_cfg(base: &str) -> ProviderConfig {
    ProviderConfig {
        api_base: base.to_string(),
        api_key: "test-key".to_string(),
        model: "reply-model".to_string(),
        timeout_seconds: 5,
        max_suggestions: 3,
    }
}

fn context_line(sender: &str, content: &str, is_self: bool) -> ContextMessage {
    ContextMessage {
        sender: sender.to_string(),
        content: content.to_string(),
        is_self,
        timestamp_ms: 1_700_000_000_000,
        identifier: None,
    }
}

#[tokio::test]
async fn test_multi_choice_response_maps_to_ordered_options() {
    let server = MockServer::start();

    let m = server.mock(|when, then| {
        when.method(POST)
            .path("/chat/completions")
            .header("authorization", "Bearer test-key")
            .header("content-type", "application/json")
            // Payload mapping checks
            .body_contains("\"model\":\"reply-model\"")
            .body_contains("\"n\":3")
            .body_contains("\"role\":\"system\"")
            .body_contains("\"role\":\"assistant\"")
            .body_contains("alice: lunch tomorrow?")
            .body_contains("so, are you in?");
        then.status(200).json_body(json!({
            "choices": [
                {"message": {"content": "Sounds good!"}},
                {"message": {"content": "Maybe later"}},
                {"message": {"content": "Can't today"}},
            ]
        }));
    });

    let client = HttpCompletionClient::from_config(&make_cfg(&server.base_url())).unwrap();
    let context = vec![
        context_line("alice", "lunch tomorrow?", false),
        context_line("me", "let me check", true),
    ];
    let options = client.call("so, are you in?", &context).await.unwrap();

    m.assert();
    assert_eq!(options, vec!["Sounds good!", "Maybe later", "Can't today"]);
}

#[tokio::test]
async fn test_single_choice_is_split_per_line() {
    let server = MockServer::start();

    server.mock(|when, then| {
        when.method(POST).path("/chat/completions");
        then.status(200).json_body(json!({
            "choices": [
                {"message": {"content": "Sure thing\n\nNot this time\nAsk me tomorrow"}},
            ]
        }));
    });

    let client = HttpCompletionClient::from_config(&make_cfg(&server.base_url())).unwrap();
    let options = client.call("hello?", &[]).await.unwrap();

    assert_eq!(options, vec!["Sure thing", "Not this time", "Ask me tomorrow"]);
}

#[tokio::test]
async fn test_429_classifies_as_throttling() {
    let server = MockServer::start();

    server.mock(|when, then| {
        when.method(POST).path("/chat/completions");
        then.status(429).body("slow down");
    });

    let client = HttpCompletionClient::from_config(&make_cfg(&server.base_url())).unwrap();
    let err = client.call("hi", &[]).await.unwrap_err();

    assert!(err.is_throttled());
    assert!(matches!(err, ClientError::RateLimited { status: Some(429), .. }));
}

#[tokio::test]
async fn test_server_error_is_not_throttling() {
    let server = MockServer::start();

    server.mock(|when, then| {
        when.method(POST).path("/chat/completions");
        then.status(500).body("internal error");
    });

    let client = HttpCompletionClient::from_config(&make_cfg(&server.base_url())).unwrap();
    let err = client.call("hi", &[]).await.unwrap_err();

    assert!(!err.is_throttled());
    assert!(matches!(err, ClientError::Api { status: Some(500), .. }));
}

#[tokio::test]
async fn test_malformed_body_is_rejected() {
    let server = MockServer::start();

    server.mock(|when, then| {
        when.method(POST).path("/chat/completions");
        then.status(200).json_body(json!({"unexpected": true}));
    });

    let client = HttpCompletionClient::from_config(&make_cfg(&server.base_url())).unwrap();
    let err = client.call("hi", &[]).await.unwrap_err();

    assert!(matches!(err, ClientError::MalformedResponse { .. }));
}
