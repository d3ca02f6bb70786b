use completion_api::{ChatMessage, ChatRequest, CompletionApiConfig, CompletionClient};
use pretty_assertions::assert_eq;
use serde_json::json;

#[test]
fn payload_serializes_wire_field_names() {
    let request = ChatRequest::new(
        "gpt-4",
        vec![
            ChatMessage::user("hi"),
            ChatMessage::assistant("hello"),
            ChatMessage::user("how are you?"),
        ],
    )
    .with_sampling(0.5, 0.7);

    let value = serde_json::to_value(&request).expect("serialize request");
    assert_eq!(
        value,
        json!({
            "model": "gpt-4",
            "messages": [
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "hello"},
                {"role": "user", "content": "how are you?"},
            ],
            "temperature": 0.7,
            "top_p": 0.5,
            "n": 1,
            "stream": true,
            "presence_penalty": 0.0,
            "frequency_penalty": 0.0,
        })
    );
}

#[test]
fn payload_defaults_fill_missing_transport_fields() {
    let request: ChatRequest = serde_json::from_value(json!({
        "model": "gpt-4",
        "messages": [{"role": "user", "content": "hi"}],
        "temperature": 1.0,
        "top_p": 1.0,
    }))
    .expect("deserialize request");

    assert_eq!(request.n, 1);
    assert!(request.stream);
    assert_eq!(request.presence_penalty, 0.0);
}

#[test]
fn http_request_posts_json_with_bearer_token() {
    let config = CompletionApiConfig::new("sk-test").with_endpoint("https://example.test/v1");
    let client = CompletionClient::new(config).expect("client");
    let request = ChatRequest::new("gpt-4", vec![ChatMessage::user("payload")]);

    let http_request = client
        .build_request(&request)
        .expect("build request")
        .build()
        .expect("request");

    assert_eq!(
        http_request.url().as_str(),
        "https://example.test/v1/chat/completions"
    );
    assert_eq!(http_request.method(), "POST");
    assert_eq!(
        http_request
            .headers()
            .get("authorization")
            .and_then(|value| value.to_str().ok()),
        Some("Bearer sk-test")
    );

    let body = http_request
        .body()
        .and_then(|body| body.as_bytes())
        .expect("buffered json body");
    let body: serde_json::Value = serde_json::from_slice(body).expect("json body");
    assert_eq!(body["messages"][0]["content"], "payload");
    assert_eq!(body["stream"], true);
}

#[test]
fn http_request_rejects_unparseable_endpoint() {
    let config = CompletionApiConfig::new("sk-test").with_endpoint("not a url");
    let client = CompletionClient::new(config).expect("client");
    let request = ChatRequest::new("gpt-4", vec![ChatMessage::user("payload")]);

    assert!(matches!(
        client.build_request(&request),
        Err(completion_api::CompletionApiError::InvalidEndpoint(_))
    ));
}
