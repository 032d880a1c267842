//! Health, auth, and models endpoints

mod harness;

use harness::{MockProvider, TestGateway, chat_gateway_config};
use serde_json::json;

#[tokio::test]
async fn health_reports_ok() {
    let mock = MockProvider::start().await.unwrap();
    let gateway = TestGateway::start(&chat_gateway_config(&mock)).await.unwrap();

    let response = gateway.get("/health").await.unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn models_lists_configured_models() {
    let mock = MockProvider::start().await.unwrap();
    let gateway = TestGateway::start(&chat_gateway_config(&mock)).await.unwrap();

    let response = gateway.get("/v1/models").await.unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["object"], "list");
    let ids: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|m| m["id"].as_str())
        .collect();
    assert_eq!(ids, vec!["providerA/glm-4.6"]);
}

#[tokio::test]
async fn gateway_api_key_is_enforced() {
    let mock = MockProvider::start().await.unwrap();
    let config = format!(
        r#"
        [server]
        api_key = "gw-secret"

        [providers.providerA]
        type = "chat"
        base_url = "{base}"

        [providers.providerA.auth.keys.key1]
        value = "sk-key1"

        [providers.providerA.models."glm-4.6"]

        [routing.pools]
        default = ["providerA.glm-4.6.key1"]
        "#,
        base = mock.base_url()
    );
    let gateway = TestGateway::start(&config).await.unwrap();

    let body = json!({"model": "glm-4.6", "messages": [{"role": "user", "content": "hi"}]});

    // no key
    let response = gateway.post("/v1/chat/completions", &body).await.unwrap();
    assert_eq!(response.status(), 401);

    // wrong key
    let response = gateway
        .client()
        .post(gateway.url("/v1/chat/completions"))
        .bearer_auth("wrong")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    // right key
    let response = gateway
        .client()
        .post(gateway.url("/v1/chat/completions"))
        .bearer_auth("gw-secret")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    // health stays public
    let response = gateway.get("/health").await.unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn request_id_header_is_attached() {
    let mock = MockProvider::start().await.unwrap();
    let gateway = TestGateway::start(&chat_gateway_config(&mock)).await.unwrap();

    let response = gateway
        .post(
            "/v1/chat/completions",
            &json!({"model": "glm-4.6", "messages": [{"role": "user", "content": "hi"}]}),
        )
        .await
        .unwrap();

    let header = response.headers().get("x-request-id").unwrap().to_str().unwrap();
    assert!(header.starts_with("req_"));
}
