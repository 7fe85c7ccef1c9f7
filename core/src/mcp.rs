//! Minimal MCP server over stdio
//!
//! Newline-delimited JSON-RPC 2.0. Only what an agent runtime needs to
//! discover and call tools: `initialize`, `ping`, `tools/list` and
//! `tools/call`. Requests are handled concurrently so a tool call waiting
//! on a human does not block pings.

use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::error::Result;
use crate::tool::{Tool, ToolOutput};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

const PARSE_ERROR: i32 = -32700;
const INVALID_REQUEST: i32 = -32600;
const METHOD_NOT_FOUND: i32 = -32601;
const INTERNAL_ERROR: i32 = -32603;

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

impl JsonRpcResponse {
    fn result(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }

    fn into_value(self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

pub struct McpServer {
    name: String,
    version: String,
    tools: Vec<Arc<dyn Tool>>,
}

impl McpServer {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            tools: Vec::new(),
        }
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    fn find_tool(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    /// Handle one JSON-RPC line. Returns the response to write, or `None`
    /// for notifications.
    pub async fn handle_message(&self, line: &str) -> Option<Value> {
        let raw: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Unparseable MCP message: {}", e);
                return Some(JsonRpcResponse::error(Value::Null, PARSE_ERROR, e.to_string()).into_value());
            }
        };
        let request: JsonRpcRequest = match serde_json::from_value(raw.clone()) {
            Ok(r) => r,
            Err(e) => {
                let id = raw.get("id").cloned().unwrap_or(Value::Null);
                return Some(JsonRpcResponse::error(id, INVALID_REQUEST, e.to_string()).into_value());
            }
        };

        let id = match request.id {
            Some(id) if !id.is_null() => id,
            _ => {
                tracing::debug!("MCP notification: {}", request.method);
                return None;
            }
        };
        let params = request.params.unwrap_or_else(|| json!({}));

        let response = match request.method.as_str() {
            "initialize" => {
                let protocol = params
                    .get("protocolVersion")
                    .and_then(|v| v.as_str())
                    .unwrap_or(PROTOCOL_VERSION);
                JsonRpcResponse::result(
                    id,
                    json!({
                        "protocolVersion": protocol,
                        "capabilities": { "tools": {} },
                        "serverInfo": {
                            "name": self.name,
                            "version": self.version
                        }
                    }),
                )
            }
            "ping" => JsonRpcResponse::result(id, json!({})),
            "tools/list" => {
                let tools: Vec<Value> = self
                    .tools
                    .iter()
                    .map(|t| {
                        json!({
                            "name": t.name(),
                            "description": t.description(),
                            "inputSchema": t.parameters()
                        })
                    })
                    .collect();
                JsonRpcResponse::result(id, json!({ "tools": tools }))
            }
            "tools/call" => {
                let name = params.get("name").and_then(|v| v.as_str()).unwrap_or("");
                let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
                let output = match self.find_tool(name) {
                    Some(tool) => tool.call(&arguments).await,
                    None => ToolOutput::error(format!("Unknown tool: {}", name)),
                };
                JsonRpcResponse::result(id, serde_json::to_value(output).unwrap_or(Value::Null))
            }
            other => JsonRpcResponse::error(id, METHOD_NOT_FOUND, format!("method not found: {}", other)),
        };
        Some(response.into_value())
    }

    /// [`McpServer::handle_message`], with a panicking handler reported as
    /// an internal error so the caller is never left without a response.
    async fn dispatch(&self, line: &str) -> Option<Value> {
        match AssertUnwindSafe(self.handle_message(line)).catch_unwind().await {
            Ok(response) => response,
            Err(_) => {
                tracing::error!("MCP request handler panicked");
                request_id(line).map(|id| {
                    JsonRpcResponse::error(id, INTERNAL_ERROR, "internal error while handling request")
                        .into_value()
                })
            }
        }
    }

    /// Serve until `reader` hits EOF. Calls still in flight at EOF are
    /// abandoned: the client that asked is gone.
    pub async fn serve<R, W>(self: Arc<Self>, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
        let mut calls = JoinSet::new();

        loop {
            tokio::select! {
                line = lines.next_line() => match line? {
                    Some(line) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let server = self.clone();
                        let tx = tx.clone();
                        calls.spawn(async move {
                            if let Some(response) = server.dispatch(&line).await {
                                let _ = tx.send(response);
                            }
                        });
                    }
                    None => break,
                },
                Some(response) = rx.recv() => write_message(&mut writer, &response).await?,
                Some(joined) = calls.join_next(), if !calls.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!("MCP call task failed: {}", e);
                    }
                }
            }
        }

        if !calls.is_empty() {
            tracing::info!("Input closed; abandoning {} in-flight call(s)", calls.len());
        }
        calls.abort_all();
        while let Ok(response) = rx.try_recv() {
            write_message(&mut writer, &response).await?;
        }
        Ok(())
    }

    pub async fn serve_stdio(self: Arc<Self>) -> Result<()> {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        self.serve(stdin, tokio::io::stdout()).await
    }
}

/// Id of a request line, if it has one worth answering.
fn request_id(line: &str) -> Option<Value> {
    let raw: Value = serde_json::from_str(line).ok()?;
    raw.get("id").filter(|id| !id.is_null()).cloned()
}

async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, value: &Value) -> Result<()> {
    let mut payload = serde_json::to_vec(value)?;
    payload.push(b'\n');
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::io::BufReader;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the input"
        }

        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }

        async fn call(&self, args: &Value) -> ToolOutput {
            ToolOutput::new(vec![crate::payload::ContentItem::text(args.to_string())])
        }
    }

    struct Broken;

    #[async_trait]
    impl Tool for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn description(&self) -> &str {
            "Always panics"
        }

        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }

        async fn call(&self, _args: &Value) -> ToolOutput {
            panic!("tool exploded")
        }
    }

    fn server() -> McpServer {
        McpServer::new("holdon", "0.0.0").with_tool(Arc::new(Echo))
    }

    #[tokio::test]
    async fn test_initialize() {
        let resp = server()
            .handle_message(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-03-26"}}"#)
            .await
            .unwrap();
        assert_eq!(resp["id"], 1);
        assert_eq!(resp["result"]["protocolVersion"], "2025-03-26");
        assert_eq!(resp["result"]["serverInfo"]["name"], "holdon");
    }

    #[tokio::test]
    async fn test_tools_list_and_call() {
        let srv = server();
        let resp = srv
            .handle_message(r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#)
            .await
            .unwrap();
        assert_eq!(resp["result"]["tools"][0]["name"], "echo");
        assert_eq!(resp["result"]["tools"][0]["inputSchema"]["type"], "object");

        let resp = srv
            .handle_message(r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"echo","arguments":{"a":1}}}"#)
            .await
            .unwrap();
        assert_eq!(resp["result"]["isError"], false);
        assert_eq!(resp["result"]["content"][0]["text"], r#"{"a":1}"#);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error_content() {
        let resp = server()
            .handle_message(r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"nope"}}"#)
            .await
            .unwrap();
        assert_eq!(resp["result"]["isError"], true);
        assert_eq!(resp["result"]["content"][0]["text"], "Unknown tool: nope");
    }

    #[tokio::test]
    async fn test_protocol_errors() {
        let srv = server();
        let resp = srv
            .handle_message(r#"{"jsonrpc":"2.0","id":5,"method":"resources/list"}"#)
            .await
            .unwrap();
        assert_eq!(resp["error"]["code"], METHOD_NOT_FOUND);

        let resp = srv.handle_message("{oops").await.unwrap();
        assert_eq!(resp["error"]["code"], PARSE_ERROR);
        assert_eq!(resp["id"], Value::Null);

        let resp = srv.handle_message(r#"{"jsonrpc":"2.0","id":6}"#).await.unwrap();
        assert_eq!(resp["error"]["code"], INVALID_REQUEST);
        assert_eq!(resp["id"], 6);
    }

    #[tokio::test]
    async fn test_notifications_get_no_response() {
        let srv = server();
        assert!(srv
            .handle_message(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await
            .is_none());
        assert!(srv
            .handle_message(r#"{"jsonrpc":"2.0","id":null,"method":"ping"}"#)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_serve_over_stream() {
        let (client, server_io) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server_io);
        let serve = tokio::spawn(Arc::new(server()).serve(BufReader::new(server_read), server_write));

        let (client_read, mut client_write) = tokio::io::split(client);
        client_write
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n\n")
            .await
            .unwrap();

        let mut responses = BufReader::new(client_read).lines();
        let line = responses.next_line().await.unwrap().unwrap();
        let resp: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(resp, json!({"jsonrpc": "2.0", "id": 1, "result": {}}));

        drop(client_write);
        drop(responses);
        serve.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_panicking_call_gets_error_response() {
        let srv = Arc::new(server().with_tool(Arc::new(Broken)));
        let (client, server_io) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server_io);
        let serve = tokio::spawn(srv.serve(BufReader::new(server_read), server_write));

        let (client_read, mut client_write) = tokio::io::split(client);
        client_write
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":7,\"method\":\"tools/call\",\"params\":{\"name\":\"broken\"}}\n")
            .await
            .unwrap();

        let mut responses = BufReader::new(client_read).lines();
        let line = responses.next_line().await.unwrap().unwrap();
        let resp: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(resp["id"], 7);
        assert_eq!(resp["error"]["code"], INTERNAL_ERROR);

        // The server keeps serving after the failed call.
        client_write
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":8,\"method\":\"ping\"}\n")
            .await
            .unwrap();
        let line = responses.next_line().await.unwrap().unwrap();
        let resp: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(resp, json!({"jsonrpc": "2.0", "id": 8, "result": {}}));

        drop(client_write);
        drop(responses);
        serve.await.unwrap().unwrap();
    }

    #[test]
    fn test_request_id() {
        assert_eq!(request_id(r#"{"id":3,"method":"ping"}"#), Some(json!(3)));
        assert_eq!(request_id(r#"{"id":null,"method":"ping"}"#), None);
        assert_eq!(request_id("{oops"), None);
    }
}
