//! Line-delimited JSON-RPC 2.0 server exposing the tool catalogue.

use std::io;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use bytes::BytesMut;
use tokio_util::codec::{Decoder, FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::limits::MAX_MCP_LINE_BYTES;
use crate::tools::{call_tool, tool_definitions};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const PARSE_ERROR: i32 = -32700;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpRequest {
    pub jsonrpc: String,
    /// Absent for notifications.
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpResponse {
    pub jsonrpc: String,
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<McpError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl McpResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(McpError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// Dispatch one request. `None` means no reply is due (notifications).
pub async fn handle(engine: &Engine, request: McpRequest) -> Option<McpResponse> {
    let id = request.id;
    let response = match request.method.as_str() {
        "initialize" => McpResponse::success(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": { "listChanged": false } },
                "serverInfo": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                }
            }),
        ),
        method if method.starts_with("notifications/") => {
            debug!("mcp notification {method}");
            return None;
        }
        "ping" => McpResponse::success(id, json!({})),
        "tools/list" => McpResponse::success(id, json!({ "tools": tool_definitions() })),
        "tools/call" => call(engine, id, &request.params).await,
        _ if id.is_none() => return None,
        _ => McpResponse::error(id, METHOD_NOT_FOUND, "Method not found"),
    };
    Some(response)
}

async fn call(engine: &Engine, id: Option<Value>, params: &Value) -> McpResponse {
    let Some(name) = params.get("name").and_then(Value::as_str) else {
        return McpResponse::error(id, INVALID_PARAMS, "Invalid params: missing tool name");
    };
    let empty = json!({});
    let arguments = match params.get("arguments") {
        None | Some(Value::Null) => &empty,
        Some(args) => args,
    };
    match call_tool(engine, name, arguments).await {
        Ok(payload) => {
            let text = serde_json::to_string_pretty(&payload).unwrap_or_else(|_| payload.to_string());
            McpResponse::success(
                id,
                json!({
                    "content": [{ "type": "text", "text": text }],
                    "isError": false
                }),
            )
        }
        Err(unknown) => McpResponse::error(id, INVALID_PARAMS, unknown.to_string()),
    }
}

async fn handle_line(engine: &Engine, line: &str) -> Option<McpResponse> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<McpRequest>(line) {
        Ok(request) => handle(engine, request).await,
        Err(e) => {
            debug!("unparseable mcp message: {e}");
            Some(McpResponse::error(None, PARSE_ERROR, "Parse error"))
        }
    }
}

fn codec_error(e: LinesCodecError) -> io::Error {
    match e {
        LinesCodecError::Io(e) => e,
        LinesCodecError::MaxLineLengthExceeded => {
            io::Error::new(io::ErrorKind::InvalidData, "line too long")
        }
    }
}

enum Frame {
    Line(String),
    /// An over-long line, already being discarded up to its newline.
    TooLong,
}

/// `LinesCodec` that reports an over-long line as a frame instead of an
/// error, since `FramedRead` ends the stream after the first error.
struct RequestLines(LinesCodec);

impl RequestLines {
    fn frame(result: Result<Option<String>, LinesCodecError>) -> io::Result<Option<Frame>> {
        match result {
            Ok(line) => Ok(line.map(Frame::Line)),
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Frame::TooLong)),
            Err(LinesCodecError::Io(e)) => Err(e),
        }
    }
}

impl Decoder for RequestLines {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<Frame>> {
        Self::frame(self.0.decode(buf))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> io::Result<Option<Frame>> {
        Self::frame(self.0.decode_eof(buf))
    }
}

/// Serve requests from `reader` until EOF, one JSON message per line.
pub async fn serve<R, W>(engine: Arc<Engine>, reader: R, writer: W) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = FramedRead::new(
        reader,
        RequestLines(LinesCodec::new_with_max_length(MAX_MCP_LINE_BYTES)),
    );
    let mut out = FramedWrite::new(writer, LinesCodec::new());
    info!("mcp server ready");

    while let Some(next) = lines.next().await {
        let response = match next? {
            Frame::Line(line) => handle_line(&engine, &line).await,
            Frame::TooLong => {
                warn!("mcp message over {MAX_MCP_LINE_BYTES} bytes dropped");
                Some(McpResponse::error(None, PARSE_ERROR, "Parse error: message too long"))
            }
        };
        if let Some(response) = response {
            let encoded = serde_json::to_string(&response)?;
            out.send(encoded).await.map_err(codec_error)?;
        }
    }
    info!("mcp input closed");
    Ok(())
}
