//! Credential rotation and cooldown persistence

mod harness;

use harness::{MockOptions, MockProvider, TestGateway, chat_gateway_config};
use serde_json::json;

/// A 429 on the first key rotates to the second within one client call
#[tokio::test]
async fn rate_limited_key_rotates() {
    let mock = MockProvider::start_with(MockOptions {
        rate_limit_first: 1,
        ..MockOptions::default()
    })
    .await
    .unwrap();
    let gateway = TestGateway::start(&chat_gateway_config(&mock)).await.unwrap();

    let response = gateway
        .post(
            "/v1/chat/completions",
            &json!({"model": "glm-4.6", "messages": [{"role": "user", "content": "hello"}]}),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), 200, "client sees success despite the 429");
    assert_eq!(
        mock.seen_credentials(),
        vec!["sk-key1".to_owned(), "sk-key2".to_owned()],
        "decision log: key1 tried first, key2 second"
    );

    // key1 is cooling; the next request goes straight to key2
    let response = gateway
        .post(
            "/v1/chat/completions",
            &json!({"model": "glm-4.6", "messages": [{"role": "user", "content": "again"}]}),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(mock.seen_credentials().last().unwrap(), "sk-key2");
}

/// All keys exhausted surfaces the rate limit to the client
#[tokio::test]
async fn exhausted_rotation_surfaces_error() {
    let mock = MockProvider::start_with(MockOptions {
        rate_limit_first: 10,
        ..MockOptions::default()
    })
    .await
    .unwrap();
    let gateway = TestGateway::start(&chat_gateway_config(&mock)).await.unwrap();

    let response = gateway
        .post(
            "/v1/chat/completions",
            &json!({"model": "glm-4.6", "messages": [{"role": "user", "content": "hello"}]}),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), 429);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "rate_limit_error");
    // both keys were tried before giving up
    assert_eq!(mock.request_count(), 2);
}

/// Cooldowns are journaled to the configured state directory
#[tokio::test]
async fn cooldown_state_is_persisted() {
    let mock = MockProvider::start_with(MockOptions {
        rate_limit_first: 1,
        ..MockOptions::default()
    })
    .await
    .unwrap();

    let state_dir = tempfile::tempdir().unwrap();
    let config = format!(
        r#"
        [server]
        state_dir = "{state_dir}"

        [providers.providerA]
        type = "chat"
        base_url = "{base}"

        [providers.providerA.auth.keys.key1]
        value = "sk-key1"

        [providers.providerA.auth.keys.key2]
        value = "sk-key2"

        [providers.providerA.models."glm-4.6"]

        [routing.pools]
        default = ["providerA.glm-4.6.key1", "providerA.glm-4.6.key2"]
        "#,
        state_dir = state_dir.path().display(),
        base = mock.base_url()
    );
    let gateway = TestGateway::start(&config).await.unwrap();

    let response = gateway
        .post(
            "/v1/chat/completions",
            &json!({"model": "glm-4.6", "messages": [{"role": "user", "content": "hello"}]}),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    // Give the journal writer a beat
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let journal = std::fs::read_to_string(state_dir.path().join("health.jsonl")).unwrap();
    assert!(journal.lines().count() >= 1);
    let record: serde_json::Value = serde_json::from_str(journal.lines().next_back().unwrap()).unwrap();
    assert_eq!(record["kind"], "snapshot");

    let quota: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(state_dir.path().join("provider-quota.json")).unwrap()).unwrap();
    let key1 = &quota["providers"]["providerA.key1"];
    assert!(key1["cooldown_until"].as_u64().is_some(), "429'd key carries a cooldown");
    assert!(key1["consecutive_error_count"].as_u64().unwrap() >= 1);
}
