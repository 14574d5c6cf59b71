//! Connection lifecycle: handshake, unknown methods, shutdown and exit.

use serde_json::{Value, json};

use crate::common::TestClient;

#[tokio::test]
async fn initialize_advertises_sync_and_file_operations() {
    let mut client = TestClient::spawn();
    let result = client.initialize().await;

    let sync = &result["capabilities"]["textDocumentSync"];
    assert_eq!(sync["openClose"], true);
    assert_eq!(sync["change"], 2);
    assert!(sync["save"].is_object());

    let operations = &result["capabilities"]["workspace"]["fileOperations"];
    assert_eq!(
        operations["didDelete"]["filters"][0]["pattern"]["glob"],
        "**/*.sql"
    );
    assert_eq!(
        operations["didRename"]["filters"][0]["pattern"]["glob"],
        "**/*.sql"
    );
    assert_eq!(result["serverInfo"]["name"], "tsqllint-ls");

    client.shutdown_and_exit().await.unwrap();
}

#[tokio::test]
async fn unknown_request_is_method_not_found() {
    let mut client = TestClient::spawn();
    client.initialize().await;

    let response = client.request("textDocument/hover", json!({})).await;
    assert_eq!(response["error"]["code"], -32601);
    assert!(
        response["error"]["message"]
            .as_str()
            .unwrap()
            .contains("textDocument/hover")
    );

    client.shutdown_and_exit().await.unwrap();
}

#[tokio::test]
async fn malformed_params_are_rejected() {
    let mut client = TestClient::spawn();
    client.initialize().await;

    let response = client
        .request("tsqllint/lintDocument", json!({"uri": 42}))
        .await;
    assert_eq!(response["error"]["code"], -32602);

    client.shutdown_and_exit().await.unwrap();
}

#[tokio::test]
async fn requests_after_shutdown_are_invalid() {
    let mut client = TestClient::spawn();
    client.initialize().await;

    let response = client.request("shutdown", Value::Null).await;
    assert_eq!(response["result"], Value::Null);

    let uri = client.uri("late.sql");
    let response = client
        .request("tsqllint/lintDocument", json!({"uri": uri}))
        .await;
    assert_eq!(response["error"]["code"], -32600);

    client.notify("exit", Value::Null);
    client.join().await.unwrap();
}

#[tokio::test]
async fn exit_without_shutdown_is_an_error() {
    let mut client = TestClient::spawn();
    client.initialize().await;

    client.notify("exit", Value::Null);
    let err = client.join().await.unwrap_err();
    assert!(err.to_string().contains("before shutdown"));
}

#[tokio::test]
async fn closed_input_stops_the_server() {
    let mut client = TestClient::spawn();
    client.initialize().await;

    client.hang_up().await.unwrap();
}
