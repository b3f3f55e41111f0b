//! MCP server over stdio: newline-delimited JSON-RPC 2.0.
//!
//! Requests are handled one at a time in arrival order.  Notifications
//! (messages without an `id`) never get a response.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::tools::{self, ToolContext};

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "vibe";

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
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
    fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: Value, code: i32, message: impl Into<String>) -> Self {
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
}

/// Dispatches parsed requests to the tool layer.
pub struct VibeServer {
    ctx: ToolContext,
}

impl VibeServer {
    pub fn new(ctx: ToolContext) -> Self {
        Self { ctx }
    }

    /// Handle one raw line.  `None` means nothing should be written back.
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let request: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(req) => req,
            Err(e) => {
                return Some(JsonRpcResponse::err(
                    Value::Null,
                    -32700,
                    format!("Parse error: {e}"),
                ))
            }
        };

        let Some(id) = request.id else {
            debug!(method = %request.method, "notification received");
            return None;
        };

        Some(match request.method.as_str() {
            "initialize" => JsonRpcResponse::ok(id, initialize_result()),
            "ping" => JsonRpcResponse::ok(id, json!({})),
            "tools/list" => JsonRpcResponse::ok(id, json!({ "tools": tools::list_tools() })),
            "tools/call" => self.handle_call_tool(id, request.params).await,
            other => JsonRpcResponse::err(id, -32601, format!("Method not found: {other}")),
        })
    }

    async fn handle_call_tool(&self, id: Value, params: Option<Value>) -> JsonRpcResponse {
        let Some(params) = params else {
            return JsonRpcResponse::err(id, -32602, "Missing params");
        };
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return JsonRpcResponse::err(id, -32602, "Missing tool name");
        };
        let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

        info!(tool = name, "tool call");
        match tools::call_tool(&self.ctx, name, arguments).await {
            Ok(text) => JsonRpcResponse::ok(
                id,
                json!({ "content": [{ "type": "text", "text": text }] }),
            ),
            Err(e) => {
                warn!(tool = name, error = %e, "tool call failed");
                JsonRpcResponse::err(id, e.code(), e.to_string())
            }
        }
    }
}

fn initialize_result() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": { "tools": {} },
        "serverInfo": {
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION")
        },
        "instructions": "Runs the Vibe CLI in programmatic mode. vibe_run starts a session for a project directory, vibe_resume continues the last one, vibe_manage checks or installs the binary."
    })
}

/// Serve requests from `reader` until EOF, writing responses to `writer`.
pub async fn serve<R, W>(ctx: ToolContext, reader: R, mut writer: W) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let server = VibeServer::new(ctx);
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(response) = server.handle_line(trimmed).await {
            let mut out = serde_json::to_string(&response)?;
            out.push('\n');
            writer.write_all(out.as_bytes()).await?;
            writer.flush().await?;
        }
    }

    info!("stdin closed; shutting down");
    Ok(())
}

/// [`serve`] on the process's own stdin/stdout.
pub async fn run_stdio(ctx: ToolContext) -> anyhow::Result<()> {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    serve(ctx, stdin, tokio::io::stdout()).await
}
