use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::ai::{build_prompt, GeminiClient, PromptContext, ProviderError};

const GENERATE_PATH: &str = "/v1beta/models/gemini-2.5-flash:generateContent";

fn success_body(text: &str) -> serde_json::Value {
    json!({
        "candidates": [{
            "content": { "parts": [{ "text": text }] },
            "finishReason": "STOP"
        }]
    })
}

fn mock_client(server: &MockServer) -> GeminiClient {
    GeminiClient::with_base_url("test-key".to_string(), server.uri())
}

#[test]
fn prompt_without_context_carries_the_persona() {
    let prompt = build_prompt("How should I study fractions?", "advice", None);

    assert!(prompt.contains("gentle educational assistant"));
    assert!(prompt.contains("How should I study fractions?"));
    assert!(!prompt.contains("[Current learning material]"));
}

#[test]
fn prompt_with_context_includes_the_material_block() {
    let context = PromptContext {
        subject: "math".to_string(),
        grade: "3".to_string(),
        learning_objective: "Understand fractions".to_string(),
        keywords: vec!["fractions".to_string(), "shapes".to_string()],
        beginner_goals: vec!["Name a half".to_string()],
        intermediate_goals: vec!["Compare fractions".to_string()],
        advanced_goals: vec![],
    };

    let prompt = build_prompt("Give me practice ideas", "worksheet", Some(&context));

    assert!(prompt.contains("[Current learning material]"));
    assert!(prompt.contains("Subject: math"));
    assert!(prompt.contains("Keywords: fractions, shapes"));
    assert!(prompt.contains("Beginner: Name a half"));
    assert!(prompt.contains("Content type: worksheet"));
    assert!(prompt.contains("Give me practice ideas"));
}

#[rocket::async_test]
async fn generate_returns_candidate_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(success_body("Take small steps.")))
        .mount(&server)
        .await;

    let client = mock_client(&server);
    let text = client.generate("hello").await.unwrap();

    assert_eq!(text, "Take small steps.");
}

#[rocket::async_test]
async fn structured_invalid_key_status_wins() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {
                "message": "API key not valid. Please pass a valid API key. [API_KEY_INVALID]",
                "status": "INVALID_ARGUMENT"
            }
        })))
        .mount(&server)
        .await;

    let client = mock_client(&server);
    let err = client.generate("hello").await.unwrap_err();

    assert!(matches!(err, ProviderError::InvalidApiKey(_)), "got {err:?}");
}

#[rocket::async_test]
async fn structured_resource_exhausted_maps_to_quota() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {
                "message": "Resource has been exhausted",
                "status": "RESOURCE_EXHAUSTED"
            }
        })))
        .mount(&server)
        .await;

    let client = mock_client(&server);
    let err = client.generate("hello").await.unwrap_err();

    assert!(matches!(err, ProviderError::QuotaExceeded(_)), "got {err:?}");
}

#[rocket::async_test]
async fn http_status_fallback_when_body_is_unstructured() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(403).set_body_string("nope"))
        .mount(&server)
        .await;

    let client = mock_client(&server);
    let err = client.generate("hello").await.unwrap_err();

    assert!(matches!(err, ProviderError::PermissionDenied(_)), "got {err:?}");
}

#[rocket::async_test]
async fn safety_finish_reason_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": { "parts": [] },
                "finishReason": "SAFETY"
            }]
        })))
        .mount(&server)
        .await;

    let client = mock_client(&server);
    let err = client.generate("hello").await.unwrap_err();

    assert!(matches!(err, ProviderError::SafetyRejected(_)), "got {err:?}");
}

#[rocket::async_test]
async fn empty_candidates_is_empty_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "candidates": [] })))
        .mount(&server)
        .await;

    let client = mock_client(&server);
    let err = client.generate("hello").await.unwrap_err();

    assert!(matches!(err, ProviderError::EmptyResponse), "got {err:?}");
}

#[rocket::async_test]
async fn blank_candidate_text_is_empty_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(success_body("")))
        .mount(&server)
        .await;

    let client = mock_client(&server);
    let err = client.generate("hello").await.unwrap_err();

    assert!(matches!(err, ProviderError::EmptyResponse), "got {err:?}");
}

#[rocket::async_test]
async fn unreachable_provider_is_a_transport_error() {
    let client = GeminiClient::with_base_url(
        "test-key".to_string(),
        "http://127.0.0.1:1".to_string(),
    );
    let err = client.generate("hello").await.unwrap_err();

    assert!(matches!(err, ProviderError::Transport(_)), "got {err:?}");
}

#[rocket::async_test]
async fn validate_api_key_uses_the_supplied_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .and(wiremock::matchers::query_param("key", "caller-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(success_body("Hi!")))
        .mount(&server)
        .await;

    let client = mock_client(&server);
    client.validate_api_key("caller-key").await.unwrap();
}

#[rocket::async_test]
async fn message_heuristics_classify_when_no_structured_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "error": { "message": "QUOTA_EXCEEDED: daily allowance spent", "status": "" }
        })))
        .mount(&server)
        .await;

    let client = mock_client(&server);
    let err = client.generate("hello").await.unwrap_err();

    assert!(matches!(err, ProviderError::QuotaExceeded(_)), "got {err:?}");
}
