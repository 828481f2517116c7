//! Integration tests for the aria2 JSON-RPC client against a mock HTTP
//! server: request shape (token param, addUri options) and error mapping.

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mqfetch::aria2::{AddUriOptions, Aria2Rpc, Aria2Supervisor, HttpRpcClient, RpcError};

fn client_for(server: &MockServer, secret: &str) -> HttpRpcClient {
    let addr = server.address();
    HttpRpcClient::new(&format!("http://{}", addr.ip()), addr.port(), secret)
}

fn rpc_result(result: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "jsonrpc": "2.0",
        "id": "mqfetch",
        "result": result,
    }))
}

#[tokio::test]
async fn test_get_version_returns_daemon_version() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/jsonrpc"))
        .and(body_partial_json(json!({"method": "aria2.getVersion"})))
        .respond_with(rpc_result(json!({"version": "1.37.0"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, "");
    let version = client.get_version().await.unwrap();
    assert_eq!(version, "1.37.0");
}

#[tokio::test]
async fn test_add_uri_sends_token_as_first_param() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/jsonrpc"))
        .and(body_partial_json(json!({
            "method": "aria2.addUri",
            "params": ["token:s3cret"],
        })))
        .respond_with(rpc_result(json!("gid-0001")))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, "s3cret");
    let gid = client
        .add_uri(
            &["https://host/file.bin".to_string()],
            AddUriOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(gid, "gid-0001");
}

#[tokio::test]
async fn test_add_uri_carries_dir_and_out_options() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/jsonrpc"))
        .and(body_partial_json(json!({
            "method": "aria2.addUri",
            "params": [
                ["https://host/file.bin"],
                {"dir": "/downloads", "out": "file.bin"},
            ],
        })))
        .respond_with(rpc_result(json!("gid-0002")))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, "");
    let gid = client
        .add_uri(
            &["https://host/file.bin".to_string()],
            AddUriOptions {
                dir: Some("/downloads".to_string()),
                out: Some("file.bin".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(gid, "gid-0002");
}

#[tokio::test]
async fn test_json_rpc_error_object_maps_to_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/jsonrpc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": "mqfetch",
            "error": {"code": 1, "message": "Unauthorized"},
        })))
        .mount(&server)
        .await;

    let client = client_for(&server, "wrong");
    let err = client.get_version().await.unwrap_err();
    match err {
        RpcError::Rejected { code, message, .. } => {
            assert_eq!(code, 1);
            assert_eq!(message, "Unauthorized");
        }
        other => panic!("expected Rejected, got {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_result_maps_to_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/jsonrpc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": "mqfetch",
        })))
        .mount(&server)
        .await;

    let client = client_for(&server, "");
    let err = client.get_version().await.unwrap_err();
    assert!(matches!(err, RpcError::Malformed { .. }));
}

#[tokio::test]
async fn test_unreachable_endpoint_maps_to_transport() {
    // Bind then drop the server so the port is closed.
    let server = MockServer::start().await;
    let addr = *server.address();
    drop(server);

    let client = HttpRpcClient::new(&format!("http://{}", addr.ip()), addr.port(), "");
    let err = client.get_version().await.unwrap_err();
    assert!(matches!(err, RpcError::Transport { .. }));
}

#[tokio::test]
async fn test_supervisor_probe_false_against_dead_endpoint() {
    let server = MockServer::start().await;
    let addr = *server.address();
    drop(server);

    let supervisor = Aria2Supervisor::with_http(
        &format!("http://{}", addr.ip()),
        addr.port(),
        "",
        std::path::Path::new("/tmp/dl"),
    );
    assert!(!supervisor.is_running().await);
}

#[tokio::test]
async fn test_supervisor_submit_over_http_returns_gid() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/jsonrpc"))
        .and(body_partial_json(json!({"method": "aria2.addUri"})))
        .respond_with(rpc_result(json!("gid-9")))
        .mount(&server)
        .await;

    let addr = server.address();
    let supervisor = Aria2Supervisor::with_http(
        &format!("http://{}", addr.ip()),
        addr.port(),
        "",
        std::path::Path::new("/tmp/dl"),
    );
    let gid = supervisor
        .submit("https://host/file.bin", None, Some("file.bin"))
        .await
        .unwrap();
    assert_eq!(gid, "gid-9");
}
