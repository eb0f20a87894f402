//! Vault operations exposed as protocol tools.
//!
//! [`VaultTools::handle_rpc`] answers JSON-RPC 2.0 requests for
//! `initialize`, `tools/list` and `tools/call`. Serving it over HTTP is
//! left to the caller.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{SessionState, VaultCommand, VaultError, VaultSession};

/// Protocol version reported by `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;
const INVALID_REQUEST: i64 = -32600;

/// Errors from a tool call.
#[derive(Debug, thiserror::Error)]
pub enum ToolCallError {
    /// No tool with this name.
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    /// Arguments missing or of the wrong type.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    /// The vault operation failed.
    #[error(transparent)]
    Vault(#[from] VaultError),
}

/// A tool advertised by `tools/list`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: &'static str,
    /// What the tool does.
    pub description: &'static str,
    /// JSON Schema of the arguments.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Advertised vault tools.
pub fn definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "vault_status",
            description: "Report the vault CLI status and session state.",
            input_schema: json!({ "type": "object", "properties": {} }),
        },
        ToolDefinition {
            name: "vault_list_items",
            description: "List vault items, optionally filtered by a search term.",
            input_schema: json!({
                "type": "object",
                "properties": { "search": { "type": "string" } }
            }),
        },
        ToolDefinition {
            name: "vault_get_item",
            description: "Fetch one vault item by id or exact name.",
            input_schema: json!({
                "type": "object",
                "properties": { "id": { "type": "string" } },
                "required": ["id"]
            }),
        },
        ToolDefinition {
            name: "vault_get_password",
            description: "Fetch the password of one vault item.",
            input_schema: json!({
                "type": "object",
                "properties": { "id": { "type": "string" } },
                "required": ["id"]
            }),
        },
        ToolDefinition {
            name: "vault_sync",
            description: "Pull the latest vault data from the server.",
            input_schema: json!({ "type": "object", "properties": {} }),
        },
    ]
}

/// Tool-protocol front end for a [`VaultSession`].
pub struct VaultTools {
    session: Arc<VaultSession>,
}

impl VaultTools {
    /// Serve tools backed by `session`.
    pub fn new(session: Arc<VaultSession>) -> Self {
        Self { session }
    }

    /// Run one tool and return its text output.
    ///
    /// # Errors
    ///
    /// Returns [`ToolCallError`] for unknown tools, bad arguments, or a
    /// failed vault call (including [`VaultError::Unauthenticated`]).
    pub async fn call(&self, name: &str, args: &Value) -> Result<String, ToolCallError> {
        debug!(tool = name, "vault tool call");
        let queue = self.session.queue();
        match name {
            "vault_status" => {
                let mut command = VaultCommand::new(["status"]);
                if let Ok(token) = self.session.get_session() {
                    command = command.session(token);
                }
                let cli = queue.exec(command).await?;
                let cli = serde_json::from_str::<Value>(cli.trim())
                    .unwrap_or_else(|_| Value::String(cli.trim().to_owned()));
                let state = serde_json::to_value(self.session.state()).unwrap_or(Value::Null);
                Ok(json!({ "session": state, "cli": cli }).to_string())
            }
            "vault_list_items" => {
                let mut command = VaultCommand::new(["list", "items"]);
                if let Some(search) = optional_str(args, "search")? {
                    command.args.push("--search".to_owned());
                    command.args.push(search.to_owned());
                }
                let token = self.session.get_session()?;
                Ok(queue.exec(command.session(token)).await?)
            }
            "vault_get_item" => {
                let id = required_str(args, "id")?;
                let token = self.session.get_session()?;
                Ok(queue
                    .exec(VaultCommand::new(["get", "item", id]).session(token))
                    .await?)
            }
            "vault_get_password" => {
                let id = required_str(args, "id")?;
                let token = self.session.get_session()?;
                Ok(queue
                    .exec(VaultCommand::new(["get", "password", id]).session(token))
                    .await?)
            }
            "vault_sync" => {
                self.session.sync().await?;
                Ok("synced".to_owned())
            }
            other => Err(ToolCallError::UnknownTool(other.to_owned())),
        }
    }

    /// Answer one JSON-RPC request. Returns `None` for notifications.
    pub async fn handle_rpc(&self, request: &Value) -> Option<Value> {
        let id = request.get("id").cloned();
        let Some(method) = request.get("method").and_then(Value::as_str) else {
            return Some(rpc_error(id.unwrap_or(Value::Null), INVALID_REQUEST, "missing method"));
        };
        // Requests without an id are notifications and get no response.
        let id = id?;

        match method {
            "initialize" => Some(rpc_result(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": { "tools": {} },
                    "serverInfo": {
                        "name": "switchboard-vault",
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }),
            )),
            "tools/list" => Some(rpc_result(id, json!({ "tools": definitions() }))),
            "tools/call" => {
                let params = request.get("params").cloned().unwrap_or(Value::Null);
                let Some(name) = params.get("name").and_then(Value::as_str) else {
                    return Some(rpc_error(id, INVALID_PARAMS, "missing tool name"));
                };
                let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
                match self.call(name, &args).await {
                    Ok(text) => Some(rpc_result(id, tool_content(&text, false))),
                    Err(ToolCallError::UnknownTool(tool)) => {
                        Some(rpc_error(id, INVALID_PARAMS, &format!("unknown tool: {tool}")))
                    }
                    Err(ToolCallError::InvalidArguments(detail)) => {
                        Some(rpc_error(id, INVALID_PARAMS, &detail))
                    }
                    Err(ToolCallError::Vault(e)) => {
                        Some(rpc_result(id, tool_content(&e.to_string(), true)))
                    }
                }
            }
            other => Some(rpc_error(
                id,
                METHOD_NOT_FOUND,
                &format!("method not found: {other}"),
            )),
        }
    }

    /// Whether dependent tools can currently run.
    pub fn is_ready(&self) -> bool {
        self.session.state() == SessionState::Unlocked
    }
}

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolCallError> {
    match optional_str(args, key)? {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ToolCallError::InvalidArguments(format!(
            "'{key}' is required"
        ))),
    }
}

fn optional_str<'a>(args: &'a Value, key: &str) -> Result<Option<&'a str>, ToolCallError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(ToolCallError::InvalidArguments(format!(
            "'{key}' must be a string"
        ))),
    }
}

fn tool_content(text: &str, is_error: bool) -> Value {
    json!({
        "content": [{ "type": "text", "text": text }],
        "isError": is_error,
    })
}

fn rpc_result(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn rpc_error(id: Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message },
    })
}
