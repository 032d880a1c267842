//! Anthropic messages endpoint, including the SSE round trip

mod harness;

use harness::{MockProvider, TestGateway, parse_sse};
use serde_json::json;

fn anthropic_gateway_config(mock: &MockProvider) -> String {
    format!(
        r#"
        [providers.providerB]
        type = "anthropic"
        base_url = "{base}"

        [providers.providerB.auth.keys.main]
        value = "sk-ant-mock"

        [providers.providerB.models."opus-mock"]

        [routing.pools]
        default = ["providerB.opus-mock.main"]
        "#,
        base = mock.base_url_root()
    )
}

/// Non-streaming messages request
#[tokio::test]
async fn messages_json_round_trip() {
    let mock = MockProvider::start().await.unwrap();
    let gateway = TestGateway::start(&anthropic_gateway_config(&mock)).await.unwrap();

    let response = gateway
        .post(
            "/v1/messages",
            &json!({
                "model": "opus-mock",
                "max_tokens": 256,
                "messages": [{"role": "user", "content": "hello"}]
            }),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["type"], "message");
    assert_eq!(body["stop_reason"], "end_turn");
    assert!(!body["content"][0]["text"].as_str().unwrap().is_empty());
    assert_eq!(mock.seen_credentials(), vec!["sk-ant-mock".to_owned()]);
}

/// Streaming messages: terminal `message_stop` after text deltas
#[tokio::test]
async fn messages_sse_round_trip() {
    let mock = MockProvider::start().await.unwrap();
    let gateway = TestGateway::start(&anthropic_gateway_config(&mock)).await.unwrap();

    let response = gateway
        .post(
            "/v1/messages",
            &json!({
                "model": "opus-mock",
                "max_tokens": 256,
                "stream": true,
                "messages": [{"role": "user", "content": "hi"}]
            }),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    let frames = parse_sse(&body);
    let events: Vec<&str> = frames.iter().filter_map(|f| f.event.as_deref()).collect();

    assert!(events.contains(&"message_start"));
    let delta_count = frames
        .iter()
        .filter(|f| f.event.as_deref() == Some("content_block_delta") && f.data.contains("text_delta"))
        .count();
    assert!(delta_count >= 1);

    let stop_pos = events.iter().position(|e| *e == "message_stop").unwrap();
    assert_eq!(stop_pos, events.len() - 1, "stream ends cleanly after message_stop");
}

/// Chat upstream behind the anthropic endpoint: full protocol switch
#[tokio::test]
async fn messages_over_chat_upstream() {
    let mock = MockProvider::start().await.unwrap();
    let gateway = TestGateway::start(&harness::chat_gateway_config(&mock)).await.unwrap();

    let response = gateway
        .post(
            "/v1/messages",
            &json!({
                "model": "glm-4.6",
                "max_tokens": 128,
                "messages": [{"role": "user", "content": "hello"}]
            }),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["type"], "message");
    assert_eq!(body["role"], "assistant");
    assert!(!body["content"][0]["text"].as_str().unwrap().is_empty());
}
