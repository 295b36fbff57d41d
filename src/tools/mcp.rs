//! MCP (Model Context Protocol) client over stdio.
//!
//! Speaks newline-delimited JSON-RPC 2.0 with a child process: `initialize`,
//! `notifications/initialized`, `tools/list` and `tools/call`.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::{ToolError, ToolInfo, ToolLauncher, ToolSession};
use crate::config::ToolServerConfig;

const PROTOCOL_VERSION: &str = "2024-11-05";

/// Stderr lines kept for startup error messages.
const STDERR_TAIL_LINES: usize = 10;

/// How long a failed startup waits for the rest of the server's stderr.
const STDERR_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ToolsListResult {
    #[serde(default)]
    tools: Vec<ToolInfo>,
}

#[derive(Debug, Default, Deserialize)]
struct CallToolResult {
    #[serde(default)]
    content: Vec<Value>,
    #[serde(default, rename = "isError")]
    is_error: bool,
    #[serde(default, rename = "structuredContent")]
    structured_content: Option<Value>,
}

impl CallToolResult {
    /// Text parts joined by newlines, or the structured result if there is no text.
    fn text(&self) -> String {
        let parts: Vec<&str> = self
            .content
            .iter()
            .filter(|c| c.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|c| c.get("text").and_then(Value::as_str))
            .collect();
        if !parts.is_empty() {
            return parts.join("\n");
        }
        match &self.structured_content {
            Some(Value::Object(map)) if map.len() == 1 && map.contains_key("result") => {
                render_scalar(&map["result"])
            }
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

struct StdioTransport {
    process: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    stderr: JoinHandle<Vec<String>>,
}

/// Starts an MCP server process per session.
#[derive(Debug, Clone)]
pub struct McpLauncher {
    config: ToolServerConfig,
}

impl McpLauncher {
    pub fn new(config: ToolServerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ToolLauncher for McpLauncher {
    async fn start(&self) -> Result<Box<dyn ToolSession>, ToolError> {
        let session = McpSession::connect(&self.config).await?;
        Ok(Box::new(session))
    }
}

/// A running MCP server and the tools it advertised.
pub struct McpSession {
    transport: Mutex<Option<StdioTransport>>,
    tools: Vec<ToolInfo>,
    request_id: AtomicU64,
    timeout: Duration,
}

impl McpSession {
    /// Spawn the server, perform the handshake and list its tools.
    pub async fn connect(config: &ToolServerConfig) -> Result<Self, ToolError> {
        let mut process = Command::new(&config.command)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ToolError::Spawn(format!("{} {}: {}", config.command, config.args.join(" "), e))
            })?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| ToolError::Spawn("failed to capture stdin".to_string()))?;
        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| ToolError::Spawn("failed to capture stdout".to_string()))?;
        let stderr = process
            .stderr
            .take()
            .ok_or_else(|| ToolError::Spawn("failed to capture stderr".to_string()))?;

        tracing::debug!(command = %config.command, pid = ?process.id(), "Tool server spawned");

        let mut session = Self {
            transport: Mutex::new(Some(StdioTransport {
                process,
                stdin,
                stdout: BufReader::new(stdout),
                stderr: collect_stderr(stderr),
            })),
            tools: Vec::new(),
            request_id: AtomicU64::new(1),
            timeout: config.timeout,
        };

        match session.handshake().await {
            Ok(tools) => {
                session.tools = tools;
                Ok(session)
            }
            Err(e) => {
                let tail = match session.shutdown().await {
                    Some(stderr) => tokio::time::timeout(STDERR_GRACE, stderr)
                        .await
                        .ok()
                        .and_then(Result::ok)
                        .unwrap_or_default(),
                    None => Vec::new(),
                };
                Err(with_stderr(e, &tail))
            }
        }
    }

    async fn handshake(&self) -> Result<Vec<ToolInfo>, ToolError> {
        let init = self
            .request(
                "initialize",
                Some(json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": env!("CARGO_PKG_NAME"),
                        "version": env!("CARGO_PKG_VERSION")
                    }
                })),
            )
            .await
            .map_err(during("initialize"))?;

        let server = init.get("serverInfo").cloned().unwrap_or(Value::Null);
        tracing::debug!(server = %server, "Tool server initialized");

        self.notify("notifications/initialized").await?;

        let listed = self
            .request("tools/list", None)
            .await
            .map_err(during("tools/list"))?;
        let listed: ToolsListResult = serde_json::from_value(listed)
            .map_err(|e| ToolError::Protocol(format!("invalid tools/list result: {}", e)))?;

        Ok(listed.tools)
    }

    async fn notify(&self, method: &str) -> Result<(), ToolError> {
        let message = JsonRpcRequest {
            jsonrpc: "2.0",
            id: None,
            method,
            params: Some(json!({})),
        };
        let mut guard = self.transport.lock().await;
        let transport = guard
            .as_mut()
            .ok_or_else(|| ToolError::Protocol("session is closed".to_string()))?;
        write_message(&mut transport.stdin, &message).await
    }

    /// Send a request and wait for the response carrying the same id.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, ToolError> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let message = JsonRpcRequest {
            jsonrpc: "2.0",
            id: Some(id),
            method,
            params,
        };

        let mut guard = self.transport.lock().await;
        let transport = guard
            .as_mut()
            .ok_or_else(|| ToolError::Protocol("session is closed".to_string()))?;

        write_message(&mut transport.stdin, &message).await?;

        let response = tokio::time::timeout(self.timeout, read_response(&mut transport.stdout, id))
            .await
            .map_err(|_| ToolError::Timeout(self.timeout.as_secs()))??;

        if let Some(error) = response.error {
            return Err(ToolError::Rejected {
                code: error.code,
                message: error.message,
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Stop the server. Returns the stderr collector the first time.
    async fn shutdown(&self) -> Option<JoinHandle<Vec<String>>> {
        let mut transport = self.transport.lock().await.take()?;
        let _ = transport.stdin.shutdown().await;
        drop(transport.stdin);
        if let Err(e) = transport.process.kill().await {
            tracing::warn!("Failed to kill tool server: {}", e);
        }
        tracing::debug!("Tool server stopped");
        Some(transport.stderr)
    }
}

#[async_trait]
impl ToolSession for McpSession {
    fn tools(&self) -> &[ToolInfo] {
        &self.tools
    }

    async fn call_tool(&self, name: &str, args: Value) -> Result<String, ToolError> {
        let result = self
            .request("tools/call", Some(json!({"name": name, "arguments": args})))
            .await?;
        let result: CallToolResult = serde_json::from_value(result)
            .map_err(|e| ToolError::Protocol(format!("invalid tools/call result: {}", e)))?;

        let text = result.text();
        if result.is_error {
            return Err(ToolError::Failed(if text.is_empty() {
                format!("tool '{}' reported an error", name)
            } else {
                text
            }));
        }
        Ok(text)
    }

    async fn close(&self) {
        self.shutdown().await;
    }
}

/// Drain the server's stderr into the debug log, keeping the last lines.
fn collect_stderr(stderr: ChildStderr) -> JoinHandle<Vec<String>> {
    tokio::spawn(async move {
        let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!("tool server: {}", line);
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
        Vec::from(tail)
    })
}

/// Append the server's last stderr lines to a startup protocol error.
fn with_stderr(error: ToolError, tail: &[String]) -> ToolError {
    let tail: Vec<&str> = tail
        .iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .collect();
    match error {
        ToolError::Protocol(message) if !tail.is_empty() => {
            ToolError::Protocol(format!("{} (stderr: {})", message, tail.join(" | ")))
        }
        other => other,
    }
}

/// Errors during the handshake are session failures, never tool failures.
fn during(stage: &'static str) -> impl Fn(ToolError) -> ToolError {
    move |e| match e {
        ToolError::Timeout(secs) => ToolError::Timeout(secs),
        other => ToolError::Protocol(format!("{} failed: {}", stage, other)),
    }
}

async fn write_message(
    stdin: &mut ChildStdin,
    message: &JsonRpcRequest<'_>,
) -> Result<(), ToolError> {
    let mut line = serde_json::to_string(message)
        .map_err(|e| ToolError::Protocol(format!("failed to serialize request: {}", e)))?;
    line.push('\n');
    stdin
        .write_all(line.as_bytes())
        .await
        .map_err(|e| ToolError::Protocol(format!("failed to write to tool server: {}", e)))?;
    stdin
        .flush()
        .await
        .map_err(|e| ToolError::Protocol(format!("failed to flush tool server stdin: {}", e)))
}

/// Read lines until a response with `id` arrives. Log output, notifications
/// and responses to other ids are skipped.
async fn read_response(
    reader: &mut BufReader<ChildStdout>,
    id: u64,
) -> Result<JsonRpcResponse, ToolError> {
    let mut line = String::new();
    loop {
        line.clear();
        let read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| ToolError::Protocol(format!("failed to read from tool server: {}", e)))?;
        if read == 0 {
            return Err(ToolError::Protocol(
                "tool server closed stdout (process may have exited)".to_string(),
            ));
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<JsonRpcResponse>(trimmed) {
            Ok(response) if response.id == Some(id) => return Ok(response),
            Ok(_) => continue,
            Err(_) => {
                tracing::trace!("Skipping non-JSON tool server output: {}", trimmed);
                continue;
            }
        }
    }
}
