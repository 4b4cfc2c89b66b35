//! End-to-end checks of the tool gateway against a stub knowledge-graph API.

use std::time::Duration;

use evokg_assistant::{
    evokg_toolkit, AssistantError, RemoteApiClient, RemoteApiConfig, ToolCall, ToolGateway,
    ToolResult, ToolSpec,
};
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> RemoteApiClient {
    RemoteApiClient::new(RemoteApiConfig::default().with_base_url(server.uri())).unwrap()
}

fn predict_tail_params() -> Vec<(String, String)> {
    vec![
        ("head".into(), "G1".into()),
        ("relation".into(), "GENE_DISEASE".into()),
        ("top_k".into(), "5".into()),
    ]
}

#[tokio::test]
async fn predict_tail_returns_all_predictions() {
    let server = MockServer::start().await;
    let predictions: Vec<_> = (1..=5)
        .map(|i| json!({"tail": format!("D{i}"), "score": 1.0 / i as f64}))
        .collect();
    Mock::given(method("GET"))
        .and(path("/predict_tail"))
        .and(query_param("head", "G1"))
        .and(query_param("relation", "GENE_DISEASE"))
        .and(query_param("top_k", "5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "head": "G1",
            "relation": "GENE_DISEASE",
            "predictions": predictions,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let result = client(&server)
        .call("predict_tail", &predict_tail_params(), Duration::from_secs(5))
        .await;

    let payload = result.payload().expect("expected Ok result");
    assert_eq!(payload["head"], "G1");
    assert_eq!(payload["predictions"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn predict_tail_server_error_has_no_payload() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/predict_tail"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .expect(1)
        .mount(&server)
        .await;

    let result = client(&server)
        .call("predict_tail", &predict_tail_params(), Duration::from_secs(5))
        .await;

    assert!(matches!(result, ToolResult::Error { .. }));
    assert!(result.payload().is_none());
    assert!(result.error_message().unwrap().contains("500"));
}

#[tokio::test]
async fn gateway_routes_model_call_through_catalog() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/predict_tail"))
        .and(query_param("top_k", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"predictions": []})))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = ToolGateway::new(evokg_toolkit().unwrap(), client(&server));
    let call = ToolCall::new("predict_tail", json!({"head": "G1", "relation": "GENE_DISEASE"}));

    let result = gateway.invoke(&call).await;
    assert_eq!(result, ToolResult::ok(json!({"predictions": []})));
}

#[tokio::test]
async fn gateway_applies_per_call_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({}))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let gateway = ToolGateway::new(evokg_toolkit().unwrap(), client(&server))
        .with_timeout(Duration::from_millis(50));
    let result = gateway
        .invoke(&ToolCall::new("get_gene", json!({"gene_id": "BRCA1"})))
        .await;
    assert!(result.error_message().unwrap().contains("timed out"));
}

#[test]
fn duplicate_catalog_entry_is_rejected() {
    let mut registry = evokg_toolkit().unwrap();
    let before = registry.describe();

    let err = registry
        .register(ToolSpec::new("get_gene", "/elsewhere", "Shadow copy"))
        .unwrap_err();

    assert!(matches!(err, AssistantError::DuplicateTool(_)));
    assert_eq!(registry.describe(), before);
    assert_eq!(registry.resolve("get_gene").unwrap().endpoint, "/gene");
}
