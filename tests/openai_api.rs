use serde_json::json;
use wiremock::matchers::{bearer_token, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use invox::models::TokenUsage;
use invox::services::openai::{InvoiceModel, OpenAiExtractor};
use invox::PipelineError;

#[tokio::test]
async fn successful_call_returns_content_and_reported_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(bearer_token("test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "{\"vendorName\": \"Acme\"}"
                }
            }],
            "usage": {
                "prompt_tokens": 1200,
                "completion_tokens": 340,
                "total_tokens": 1540
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let extractor = OpenAiExtractor::with_base_url("test-key", "gpt-4-turbo-preview", server.uri());
    let reply = extractor.extract("invoice text").await.unwrap();

    assert_eq!(reply.raw_json, "{\"vendorName\": \"Acme\"}");
    assert_eq!(reply.usage, Some(TokenUsage::new(1200, 340)));
}

#[tokio::test]
async fn missing_usage_block_is_tolerated() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": {"role": "assistant", "content": "{}"}
            }]
        })))
        .mount(&server)
        .await;

    let extractor = OpenAiExtractor::with_base_url("test-key", "gpt-4-turbo-preview", server.uri());
    let reply = extractor.extract("invoice text").await.unwrap();
    assert_eq!(reply.usage, None);
}

#[tokio::test]
async fn rejected_credentials_surface_as_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "Incorrect API key provided"}
        })))
        .mount(&server)
        .await;

    let extractor = OpenAiExtractor::with_base_url("bad-key", "gpt-4-turbo-preview", server.uri());
    let err = extractor.extract("invoice text").await.unwrap_err();
    assert!(matches!(err, PipelineError::Unauthorized));
}

#[tokio::test]
async fn server_errors_are_request_failures_not_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&server)
        .await;

    let extractor = OpenAiExtractor::with_base_url("test-key", "gpt-4-turbo-preview", server.uri());
    let err = extractor.extract("invoice text").await.unwrap_err();
    assert!(matches!(err, PipelineError::LlmRequest(_)));
    assert!(err.is_retryable());
}
