//! Editor events turning into lint runs and published diagnostics.

use std::time::Duration;

use serde_json::{Value, json};

use crate::common::{FakeTsqllint, TestClient, fast_settings};

fn settings_with(overrides: Value) -> Value {
    let mut settings = fast_settings();
    for (key, value) in overrides.as_object().unwrap() {
        settings[key] = value.clone();
    }
    settings
}

#[tokio::test]
async fn open_with_lint_on_type_publishes_diagnostics() {
    let mut client = TestClient::spawn();
    client.initialize().await;

    let uri = client.uri("query.sql");
    client.open(&uri, "SELECT 1;\n  BAD;\n");

    let diagnostics = client.diagnostics(&uri).await;
    assert_eq!(diagnostics.len(), 1);
    let diagnostic = &diagnostics[0];
    assert_eq!(diagnostic["range"]["start"], json!({"line": 1, "character": 2}));
    assert_eq!(diagnostic["range"]["end"], json!({"line": 1, "character": 3}));
    assert_eq!(diagnostic["severity"], 1);
    assert_eq!(diagnostic["code"], "no-bad");
    assert_eq!(diagnostic["source"], "tsqllint");
    assert_eq!(diagnostic["message"], "Avoid BAD.");

    client.shutdown_and_exit().await.unwrap();
}

#[tokio::test]
async fn rapid_edits_coalesce_into_one_run_on_the_latest_text() {
    let mut client = TestClient::spawn();
    client.initialize().await;
    client
        .change_settings(settings_with(json!({"debounceMs": 200})))
        .await;

    let uri = client.uri("typing.sql");
    client.open(&uri, "SELECT");
    client.change(&uri, 2, "SELECT 1");
    client.change(&uri, 3, "SELECT 1;\nBAD");

    let diagnostics = client.diagnostics(&uri).await;
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0]["range"]["start"]["line"], 1);

    client
        .expect_no("textDocument/publishDiagnostics", Duration::from_millis(300))
        .await;
    assert_eq!(client.linter.runs(), 1);
    assert_eq!(client.linter.seen()[0].content, "SELECT 1;\nBAD");

    client.shutdown_and_exit().await.unwrap();
}

#[tokio::test]
async fn edits_that_fix_the_problem_clear_diagnostics() {
    let mut client = TestClient::spawn();
    client.initialize().await;

    let uri = client.uri("fixme.sql");
    client.open(&uri, "BAD");
    assert_eq!(client.diagnostics(&uri).await.len(), 1);

    client.change(&uri, 2, "SELECT 1;");
    assert!(client.diagnostics(&uri).await.is_empty());

    client.shutdown_and_exit().await.unwrap();
}

#[tokio::test]
async fn save_lints_when_lint_on_type_is_off() {
    let mut client = TestClient::spawn();
    client.initialize().await;
    client
        .change_settings(settings_with(json!({"runOnType": false})))
        .await;

    let uri = client.uri("saved.sql");
    client.open(&uri, "BAD\nBAD");
    client
        .expect_no("textDocument/publishDiagnostics", Duration::from_millis(150))
        .await;

    client.save(&uri);
    assert_eq!(client.diagnostics(&uri).await.len(), 2);

    client.shutdown_and_exit().await.unwrap();
}

#[tokio::test]
async fn save_is_ignored_when_lint_on_save_is_off() {
    let mut client = TestClient::spawn();
    client.initialize().await;
    client
        .change_settings(settings_with(json!({"runOnType": false, "runOnSave": false})))
        .await;

    let uri = client.uri("quiet.sql");
    client.open(&uri, "BAD");
    client.save(&uri);
    client
        .expect_no("textDocument/publishDiagnostics", Duration::from_millis(200))
        .await;
    assert_eq!(client.linter.runs(), 0);

    client.shutdown_and_exit().await.unwrap();
}

#[tokio::test]
async fn lint_document_replies_with_issue_count() {
    let mut client = TestClient::spawn();
    client.initialize().await;
    client
        .change_settings(settings_with(json!({"runOnType": false})))
        .await;

    let uri = client.uri("manual.sql");
    client.open(&uri, "BAD;\nSELECT 1;\nBAD;");

    let response = client
        .request("tsqllint/lintDocument", json!({"uri": uri}))
        .await;
    assert_eq!(response["result"], json!({"ok": true, "issues": 2}));
    assert_eq!(client.diagnostics(&uri).await.len(), 2);

    client.shutdown_and_exit().await.unwrap();
}

#[tokio::test]
async fn lint_document_for_unopened_document_reports_nothing() {
    let mut client = TestClient::spawn();
    client.initialize().await;

    let uri = client.uri("never-opened.sql");
    let response = client
        .request("tsqllint/lintDocument", json!({"uri": uri}))
        .await;
    assert_eq!(response["result"], json!({"ok": true, "issues": 0}));
    assert_eq!(client.linter.runs(), 0);

    client.shutdown_and_exit().await.unwrap();
}

#[tokio::test]
async fn runs_from_the_workspace_root() {
    let mut client = TestClient::spawn();
    client.initialize().await;
    client
        .change_settings(settings_with(json!({"runOnType": false})))
        .await;

    let uri = client.uri("rooted.sql");
    client.open(&uri, "SELECT 1;");
    client
        .request("tsqllint/lintDocument", json!({"uri": uri}))
        .await;

    let seen = client.linter.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].working_dir, client.workspace.path());
    assert_eq!(seen[0].file_path, client.workspace.path().join("rooted.sql"));
    assert_eq!(seen[0].settings.timeout(), Duration::from_millis(2000));

    client.shutdown_and_exit().await.unwrap();
}

#[tokio::test]
async fn timeout_warns_and_clears_diagnostics() {
    let linter = FakeTsqllint::new();
    let mut client = TestClient::spawn_with(linter.clone());
    client.initialize().await;
    client
        .change_settings(settings_with(json!({"runOnType": false, "timeoutMs": 100})))
        .await;

    let uri = client.uri("slow.sql");
    client.open(&uri, "BAD");
    linter.set_delay(Duration::from_secs(2));

    let response = client
        .request("tsqllint/lintDocument", json!({"uri": uri}))
        .await;
    assert_eq!(response["result"]["issues"], 0);

    let shown = client.notification("window/showMessage").await;
    assert_eq!(shown["type"], 2);
    assert_eq!(shown["message"], "tsqllint: lint timed out.");
    assert!(client.diagnostics(&uri).await.is_empty());

    client.shutdown_and_exit().await.unwrap();
}

#[tokio::test]
async fn launch_failure_warns_and_clears_diagnostics() {
    let linter = FakeTsqllint::new();
    linter.set_failure("no such file");
    let mut client = TestClient::spawn_with(linter);
    client.initialize().await;

    let uri = client.uri("broken.sql");
    client.open(&uri, "BAD");

    let shown = client.notification("window/showMessage").await;
    let message = shown["message"].as_str().unwrap();
    assert!(message.starts_with("tsqllint: failed to run ("), "{message}");
    assert!(message.contains("no such file"), "{message}");
    assert!(client.diagnostics(&uri).await.is_empty());

    client.shutdown_and_exit().await.unwrap();
}

#[tokio::test]
async fn stderr_is_forwarded_to_the_log() {
    let linter = FakeTsqllint::new();
    linter.set_stderr("Warning: config not found\n");
    let mut client = TestClient::spawn_with(linter);
    client.initialize().await;

    let uri = client.uri("noisy.sql");
    client.open(&uri, "BAD");

    let logged = client.notification("window/logMessage").await;
    assert_eq!(logged["type"], 2);
    assert_eq!(logged["message"], "tsqllint stderr: Warning: config not found");
    assert_eq!(client.diagnostics(&uri).await.len(), 1);

    client.shutdown_and_exit().await.unwrap();
}
