//! End-to-end invocation over the real HTTP transport against a mock
//! JSON-RPC server.

use serde_json::json;
use std::time::Duration;
use toolgate::{GlobalConfig, ServerEndpoint, ToolClient};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DEADLINE: Duration = Duration::from_secs(5);

async fn client_for(mock: &MockServer, cache_ttl_seconds: u64) -> ToolClient {
    let client = ToolClient::new(GlobalConfig {
        failover_enabled: false,
        ..Default::default()
    });
    client
        .register_server(ServerEndpoint {
            name: "http-1".to_string(),
            address: format!("{}/rpc", mock.uri()),
            service_type: "search".to_string(),
            cache_ttl_seconds,
            ..Default::default()
        })
        .await
        .unwrap();
    client
}

#[tokio::test]
async fn test_invoke_over_http() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rpc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {"answer": 42},
        })))
        .expect(1)
        .mount(&mock)
        .await;

    let client = client_for(&mock, 0).await;
    let result = client
        .invoke_tool("http-1", "search", json!({"query": "rust"}), DEADLINE)
        .await
        .unwrap();

    assert_eq!(result.value["answer"], 42);
    assert_eq!(result.server, "http-1");
    assert!(!result.cached);
}

#[tokio::test]
async fn test_http_error_status_is_connection_error() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&mock)
        .await;

    let client = client_for(&mock, 0).await;
    let err = client
        .invoke_tool("http-1", "search", json!({}), DEADLINE)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "CONNECTION_ERROR");
}

#[tokio::test]
async fn test_json_rpc_error_body_surfaces_as_tool_failure() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32000, "message": "index unavailable"},
        })))
        .mount(&mock)
        .await;

    let client = client_for(&mock, 0).await;
    let err = client
        .invoke_tool("http-1", "search", json!({}), DEADLINE)
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), "TOOL_EXECUTION_ERROR");
    assert!(err.to_string().contains("index unavailable"));
}

#[tokio::test]
async fn test_repeated_invoke_served_from_cache() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {"answer": 42},
        })))
        .expect(1)
        .mount(&mock)
        .await;

    let client = client_for(&mock, 300).await;
    for expected_cached in [false, true, true] {
        let result = client
            .invoke_tool("http-1", "search", json!({"q": "x"}), DEADLINE)
            .await
            .unwrap();
        assert_eq!(result.cached, expected_cached);
    }
}
