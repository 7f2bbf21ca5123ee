//! JSON-RPC method dispatch and the line-delimited stdio transport.
//!
//! `McpServer` is shared by every transport. Stdio awaits one call per line,
//! each SSE session calls it from its own task, and the one-shot HTTP
//! endpoint calls it per request.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, error, info, warn};

use crate::db::Database;
use crate::errors::Result;

use super::tools::{get_tool_definitions, handle_tool_call, ToolCallError};
use super::transport::{ErrorCode, JsonRpcRequest, JsonRpcResponse};

/// Protocol revision advertised by `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Server name advertised by `initialize`.
pub const SERVER_NAME: &str = "knowledge-graph-mcp";

/// The method dispatcher wrapping the shared graph store.
#[derive(Clone)]
pub struct McpServer {
    db: Arc<Database>,
}

impl McpServer {
    /// Creates a dispatcher backed by the given store.
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Returns the store this dispatcher writes to.
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Dispatches a request and applies notification semantics.
    ///
    /// The method always runs, so notifications still have their side
    /// effects, but `None` is returned when the request carries no id.
    pub fn handle_request(&self, request: &JsonRpcRequest) -> Option<JsonRpcResponse> {
        let response = self.dispatch(request);
        if request.is_notification() {
            debug!(method = %request.method, "notification processed, no response sent");
            return None;
        }
        Some(response)
    }

    /// Async form of [`McpServer::handle_request`] for transports running on
    /// the runtime. Store work runs on the blocking pool.
    pub async fn call(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let id = request.id.clone();
        let notification = request.is_notification();
        let server = self.clone();

        match tokio::task::spawn_blocking(move || server.handle_request(&request)).await {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "dispatch task failed");
                (!notification).then(|| {
                    JsonRpcResponse::error(id, ErrorCode::InternalError, "internal error".to_string())
                })
            }
        }
    }

    /// Resolves `request.method` and always builds a response envelope.
    pub fn dispatch(&self, request: &JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();

        match request.method.as_str() {
            "initialize" => self.handle_initialize(id),
            "tools/list" => self.handle_tools_list(id),
            "tools/call" => self.handle_tools_call(id, request.params.as_ref()),
            other => JsonRpcResponse::error(
                id,
                ErrorCode::MethodNotFound,
                format!("Method not found: {other}"),
            ),
        }
    }

    /// Handles the `initialize` method, returning server capabilities.
    fn handle_initialize(&self, id: Value) -> JsonRpcResponse {
        JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {
                    "tools": {}
                },
                "serverInfo": {
                    "name": SERVER_NAME,
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
        )
    }

    /// Handles the `tools/list` method, returning all available tool definitions.
    fn handle_tools_list(&self, id: Value) -> JsonRpcResponse {
        let tools = get_tool_definitions();
        JsonRpcResponse::success(id, json!({ "tools": tools }))
    }

    /// Handles the `tools/call` method.
    ///
    /// Missing `name` or `arguments` is a protocol error, and so is an
    /// unknown tool. Failures while running a known tool are reported inside
    /// a successful envelope with `isError: true`.
    fn handle_tools_call(&self, id: Value, params: Option<&Value>) -> JsonRpcResponse {
        let name = params.and_then(|p| p.get("name")).and_then(Value::as_str);
        let arguments = params
            .and_then(|p| p.get("arguments"))
            .and_then(Value::as_object);

        let (tool_name, arguments) = match (name, arguments) {
            (Some(name), Some(arguments)) => (name, arguments),
            _ => {
                return JsonRpcResponse::error(
                    id,
                    ErrorCode::InvalidParams,
                    "Missing name or arguments".to_string(),
                );
            }
        };

        debug!(tool = tool_name, "tools/call");
        match handle_tool_call(&self.db, tool_name, arguments) {
            Ok(result) => match serde_json::to_value(result) {
                Ok(value) => JsonRpcResponse::success(id, value),
                Err(e) => JsonRpcResponse::error(
                    id,
                    ErrorCode::InternalError,
                    format!("failed to encode tool result: {e}"),
                ),
            },
            Err(ToolCallError::UnknownTool(name)) => JsonRpcResponse::error(
                id,
                ErrorCode::MethodNotFound,
                format!("Unknown tool: {name}"),
            ),
            Err(other) => JsonRpcResponse::error(id, ErrorCode::InvalidParams, other.to_string()),
        }
    }

    /// Runs the stdio transport until stdin is closed.
    pub async fn run_stdio(&self) -> Result<()> {
        info!("starting stdio MCP transport");
        let stdin = BufReader::new(tokio::io::stdin());
        let stdout = tokio::io::stdout();
        self.serve_lines(stdin, stdout).await
    }

    /// Reads one JSON-RPC request per line from `reader` and writes one
    /// response line to `writer` per non-notification request.
    ///
    /// Lines are handled strictly one after another. Lines are decoded as raw
    /// bytes, so blank lines, invalid UTF-8 and malformed JSON are all
    /// skipped without ending the loop.
    pub async fn serve_lines<R, W>(&self, mut reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = Vec::new();

        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }

            let line = buf.trim_ascii();
            if line.is_empty() {
                continue;
            }

            let request: JsonRpcRequest = match serde_json::from_slice(line) {
                Ok(request) => request,
                Err(e) => {
                    warn!(error = %e, "stdio: invalid JSON, line skipped");
                    continue;
                }
            };

            let Some(response) = self.call(request).await else {
                continue;
            };

            let mut json_line = match serde_json::to_string(&response) {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "stdio: failed to serialize response");
                    continue;
                }
            };
            json_line.push('\n');
            writer.write_all(json_line.as_bytes()).await?;
            writer.flush().await?;
        }

        info!("stdio MCP transport reached end of input");
        Ok(())
    }
}
