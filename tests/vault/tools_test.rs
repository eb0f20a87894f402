//! Tests for the JSON-RPC tool surface over a vault session.

use std::sync::Arc;

use serde_json::{json, Value};
use switchboard::vault::tools::{definitions, ToolCallError, PROTOCOL_VERSION};
use switchboard::vault::{VaultError, VaultTools};

use crate::support::{happy_cli, session_with, FakeRunner};

fn call(id: i64, name: &str, arguments: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "tools/call",
        "params": { "name": name, "arguments": arguments },
    })
}

fn text_of(response: &Value) -> &str {
    response["result"]["content"][0]["text"]
        .as_str()
        .unwrap_or_default()
}

#[test]
fn definitions_cover_every_tool() {
    let names: Vec<_> = definitions().iter().map(|d| d.name).collect();
    assert_eq!(
        names,
        vec![
            "vault_status",
            "vault_list_items",
            "vault_get_item",
            "vault_get_password",
            "vault_sync"
        ]
    );
    let encoded = serde_json::to_value(definitions()).expect("serialize");
    assert_eq!(encoded[2]["inputSchema"]["required"], json!(["id"]));
}

#[tokio::test]
async fn initialize_and_list() {
    let runner = Arc::new(FakeRunner::new(happy_cli));
    let tools = VaultTools::new(session_with(&runner, None));

    let init = tools
        .handle_rpc(&json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize" }))
        .await
        .expect("response");
    assert_eq!(init["id"], 1);
    assert_eq!(init["result"]["protocolVersion"], PROTOCOL_VERSION);

    let list = tools
        .handle_rpc(&json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" }))
        .await
        .expect("response");
    assert_eq!(list["result"]["tools"].as_array().map(Vec::len), Some(5));
}

#[tokio::test]
async fn locked_vault_yields_tool_error_not_rpc_error() {
    let runner = Arc::new(FakeRunner::new(happy_cli));
    let tools = VaultTools::new(session_with(&runner, None));
    assert!(!tools.is_ready());

    let response = tools
        .handle_rpc(&call(3, "vault_get_password", json!({ "id": "abc" })))
        .await
        .expect("response");
    assert_eq!(response["result"]["isError"], true);
    assert!(text_of(&response).contains("not unlocked"));
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn get_password_uses_fresh_session_token() {
    let runner = Arc::new(FakeRunner::new(happy_cli));
    let session = session_with(&runner, None);
    session.initialize().await.expect("initialize");
    let tools = VaultTools::new(Arc::clone(&session));
    assert!(tools.is_ready());

    let response = tools
        .handle_rpc(&call(4, "vault_get_password", json!({ "id": "abc" })))
        .await
        .expect("response");
    assert_eq!(response["result"]["isError"], false);
    assert_eq!(text_of(&response), "s3cret");

    let last = runner.calls().pop().expect("a call");
    assert_eq!(last.args, vec!["get", "password", "abc"]);
    assert_eq!(last.session.map(|t| t.expose().to_owned()), Some("TOKEN123".to_owned()));

    session.shutdown().await;
}

#[tokio::test]
async fn list_items_passes_search_term() {
    let runner = Arc::new(FakeRunner::new(happy_cli));
    let session = session_with(&runner, None);
    session.initialize().await.expect("initialize");
    let tools = VaultTools::new(Arc::clone(&session));

    let out = tools
        .call("vault_list_items", &json!({ "search": "github" }))
        .await
        .expect("list");
    assert!(out.contains("github"));
    let last = runner.calls().pop().expect("a call");
    assert_eq!(last.args, vec!["list", "items", "--search", "github"]);

    session.shutdown().await;
}

#[tokio::test]
async fn status_reports_session_and_cli_json() {
    let runner = Arc::new(FakeRunner::new(happy_cli));
    let session = session_with(&runner, None);
    session.initialize().await.expect("initialize");
    let tools = VaultTools::new(Arc::clone(&session));

    let out = tools.call("vault_status", &json!({})).await.expect("status");
    let value: Value = serde_json::from_str(&out).expect("json");
    assert_eq!(value["session"], "unlocked");
    assert_eq!(value["cli"]["userEmail"], "ops@example.com");

    session.shutdown().await;
}

#[tokio::test]
async fn sync_tool_runs_a_sync() {
    let runner = Arc::new(FakeRunner::new(happy_cli));
    let session = session_with(&runner, None);
    session.initialize().await.expect("initialize");
    let tools = VaultTools::new(Arc::clone(&session));

    assert_eq!(tools.call("vault_sync", &json!({})).await.expect("sync"), "synced");
    assert_eq!(session.status().sync_count, 2);

    session.shutdown().await;
}

#[tokio::test]
async fn direct_call_errors_are_typed() {
    let runner = Arc::new(FakeRunner::new(happy_cli));
    let tools = VaultTools::new(session_with(&runner, None));

    assert!(matches!(
        tools.call("vault_get_item", &json!({})).await,
        Err(ToolCallError::InvalidArguments(_))
    ));
    assert!(matches!(
        tools.call("vault_get_item", &json!({ "id": 7 })).await,
        Err(ToolCallError::InvalidArguments(_))
    ));
    assert!(matches!(
        tools.call("vault_delete_everything", &json!({})).await,
        Err(ToolCallError::UnknownTool(_))
    ));
    assert!(matches!(
        tools.call("vault_get_item", &json!({ "id": "abc" })).await,
        Err(ToolCallError::Vault(VaultError::Unauthenticated))
    ));
}

#[tokio::test]
async fn protocol_errors_use_json_rpc_codes() {
    let runner = Arc::new(FakeRunner::new(happy_cli));
    let tools = VaultTools::new(session_with(&runner, None));

    let missing_arg = tools
        .handle_rpc(&call(5, "vault_get_item", json!({})))
        .await
        .expect("response");
    assert_eq!(missing_arg["error"]["code"], -32602);

    let unknown_tool = tools
        .handle_rpc(&call(6, "nope", json!({})))
        .await
        .expect("response");
    assert_eq!(unknown_tool["error"]["code"], -32602);

    let unknown_method = tools
        .handle_rpc(&json!({ "jsonrpc": "2.0", "id": 7, "method": "resources/list" }))
        .await
        .expect("response");
    assert_eq!(unknown_method["error"]["code"], -32601);

    let no_method = tools
        .handle_rpc(&json!({ "jsonrpc": "2.0", "id": 8 }))
        .await
        .expect("response");
    assert_eq!(no_method["error"]["code"], -32600);
}

#[tokio::test]
async fn notifications_get_no_response() {
    let runner = Arc::new(FakeRunner::new(happy_cli));
    let tools = VaultTools::new(session_with(&runner, None));

    let response = tools
        .handle_rpc(&json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }))
        .await;
    assert!(response.is_none());
}
