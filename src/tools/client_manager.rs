// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 skillgraph contributors

//! ToolClientManager: the two tool-server transports a `ToolAdapter` can be
//! pointed at (§4.2, §4.3) — a sub-process speaking JSON-RPC over stdio, or
//! an HTTP(+SSE) server. Both are driven through the same
//! connect/initialize/list_tools/execute_tool/disconnect lifecycle.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::errors::SkillGraphError;
use crate::tools::adapter::{ContentBlock, RawToolResult, ToolDescriptor, ToolTransport};
use crate::tools::schema::from_json_schema;

/// How to reach a tool server.
#[derive(Debug, Clone)]
pub enum ServerTransportConfig {
    Stdio { command: String, args: Vec<String> },
    Http { base_url: String },
}

impl ServerTransportConfig {
    /// Scheme used in a tool result's source annotation (§4.2 step 6).
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Stdio { .. } => "stdio",
            Self::Http { .. } => "http",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub name: String,
    pub transport: ServerTransportConfig,
}

/// One tool as it appears in a server's catalog: both its namespaced and
/// its bare server-local name (§4.3 `getServerInfos`).
#[derive(Debug, Clone)]
pub struct ToolSummary {
    pub qualified_name: String,
    pub original_name: String,
}

/// Summary of a connected server, for diagnostics/CLI display (§4.3
/// `getServerInfos`).
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub name: String,
    pub transport: &'static str,
    pub tools: Vec<ToolSummary>,
    /// Identity string the server advertised during `initialize`, if any.
    pub server_identity: Option<String>,
    pub connected: bool,
}

enum Transport {
    Stdio {
        child: Mutex<Child>,
        stdin: Mutex<ChildStdin>,
        stdout: Mutex<BufReader<ChildStdout>>,
        next_id: AtomicU64,
    },
    Http {
        client: reqwest::Client,
        base_url: String,
    },
}

struct ConnectedServer {
    transport: Transport,
    scheme: &'static str,
    tools: Vec<ToolDescriptor>,
    server_identity: Option<String>,
}

/// Owns every connected tool server and implements [`ToolTransport`] so a
/// [`crate::tools::adapter::ToolAdapter`] can drive calls through it directly.
#[derive(Default)]
pub struct ToolClientManager {
    servers: HashMap<String, ConnectedServer>,
}

impl ToolClientManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the sub-process or record the HTTP base URL for a server.
    /// Does not perform the MCP handshake — call [`Self::initialize`] next.
    pub async fn connect(&mut self, config: ServerConfig) -> Result<(), SkillGraphError> {
        let transport = match &config.transport {
            ServerTransportConfig::Stdio { command, args } => {
                let mut child = Command::new(command)
                    .args(args)
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .spawn()
                    .map_err(|e| SkillGraphError::ToolServerConnectFailed {
                        server: config.name.clone(),
                        reason: e.to_string(),
                    })?;

                let stdin = child.stdin.take().ok_or_else(|| SkillGraphError::ToolServerConnectFailed {
                    server: config.name.clone(),
                    reason: "child process has no stdin".into(),
                })?;
                let stdout = child.stdout.take().ok_or_else(|| SkillGraphError::ToolServerConnectFailed {
                    server: config.name.clone(),
                    reason: "child process has no stdout".into(),
                })?;

                Transport::Stdio {
                    child: Mutex::new(child),
                    stdin: Mutex::new(stdin),
                    stdout: Mutex::new(BufReader::new(stdout)),
                    next_id: AtomicU64::new(1),
                }
            }
            ServerTransportConfig::Http { base_url } => Transport::Http {
                client: reqwest::Client::new(),
                base_url: base_url.clone(),
            },
        };

        let scheme = config.transport.scheme();
        self.servers.insert(
            config.name.clone(),
            ConnectedServer { transport, scheme, tools: Vec::new(), server_identity: None },
        );
        Ok(())
    }

    /// Perform the MCP `initialize` handshake, recording the server's
    /// advertised identity, if any, for [`Self::get_server_infos`].
    pub async fn initialize(&mut self, server: &str) -> Result<(), SkillGraphError> {
        let response = {
            let connected = self.server(server)?;
            Self::rpc_call(connected, server, "initialize", json!({"protocolVersion": "2024-11-05"})).await?
        };
        let identity = response
            .get("serverInfo")
            .and_then(|info| info.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string);
        if let Some(connected) = self.servers.get_mut(server) {
            connected.server_identity = identity;
        }
        Ok(())
    }

    /// Fetch and cache this server's tool catalog, converting each tool's
    /// `inputSchema` into a [`ParamSchema`].
    pub async fn list_tools(&mut self, server: &str) -> Result<Vec<ToolDescriptor>, SkillGraphError> {
        let (response, scheme) = {
            let connected = self.server(server)?;
            (Self::rpc_call(connected, server, "tools/list", json!({})).await?, connected.scheme)
        };

        let empty = json!({});
        let tools_json = response
            .get("tools")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let descriptors: Vec<ToolDescriptor> = tools_json
            .iter()
            .map(|tool| {
                let name = tool.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
                let description = tool
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let input_schema = tool.get("inputSchema").cloned().unwrap_or(json!({}));
                let defs = input_schema.get("$defs").cloned().unwrap_or(empty.clone());
                ToolDescriptor {
                    server: server.to_string(),
                    name,
                    description,
                    params: from_json_schema(&input_schema, &defs),
                    injected_params: HashMap::new(),
                    scheme: scheme.to_string(),
                }
            })
            .collect();

        if let Some(connected) = self.servers.get_mut(server) {
            connected.tools = descriptors.clone();
        }
        Ok(descriptors)
    }

    /// Per-server diagnostics: transport kind, the full qualified+original
    /// tool catalog, and any advertised server identity (§4.3
    /// `getServerInfos`).
    pub fn get_server_infos(&self) -> Vec<ServerInfo> {
        self.servers
            .iter()
            .map(|(name, server)| ServerInfo {
                name: name.clone(),
                transport: server.scheme,
                tools: server
                    .tools
                    .iter()
                    .map(|t| ToolSummary { qualified_name: t.qualified_name(), original_name: t.name.clone() })
                    .collect(),
                server_identity: server.server_identity.clone(),
                connected: true,
            })
            .collect()
    }

    /// Execute a tool call by its qualified name, splitting on the first
    /// `/` to find the owning server (§4.3 `executeTool`).
    pub async fn execute_tool(
        &self,
        qualified_name: &str,
        params: Value,
    ) -> Result<RawToolResult, SkillGraphError> {
        let (server, tool) = qualified_name.split_once('/').ok_or_else(|| SkillGraphError::ToolServerNotFound {
            qualified: qualified_name.to_string(),
        })?;
        let connected = self.server(server)?;
        let response = Self::rpc_call(
            connected,
            server,
            "tools/call",
            json!({"name": tool, "arguments": params}),
        )
        .await?;
        Ok(Self::parse_tool_result(response))
    }

    pub async fn disconnect(&mut self, server: &str) -> Result<(), SkillGraphError> {
        let Some(connected) = self.servers.remove(server) else {
            return Err(SkillGraphError::ToolServerNotFound { qualified: server.into() });
        };
        if let Transport::Stdio { child, .. } = connected.transport {
            let mut child = child.into_inner();
            if let Err(e) = child.kill().await {
                warn!(server, error = %e, "failed to kill tool server process cleanly");
            }
        }
        Ok(())
    }

    fn server(&self, name: &str) -> Result<&ConnectedServer, SkillGraphError> {
        self.servers
            .get(name)
            .ok_or_else(|| SkillGraphError::ToolServerNotFound { qualified: name.into() })
    }

    fn parse_tool_result(response: Value) -> RawToolResult {
        let is_error = response
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let content = response
            .get("content")
            .and_then(Value::as_array)
            .map(|blocks| {
                blocks
                    .iter()
                    .map(|block| match block.get("type").and_then(Value::as_str) {
                        Some("text") => ContentBlock::Text(
                            block.get("text").and_then(Value::as_str).unwrap_or_default().to_string(),
                        ),
                        _ => ContentBlock::Json(block.clone()),
                    })
                    .collect()
            })
            .unwrap_or_default();

        RawToolResult { content, is_error }
    }

    async fn rpc_call(
        connected: &ConnectedServer,
        server: &str,
        method: &str,
        params: Value,
    ) -> Result<Value, SkillGraphError> {
        match &connected.transport {
            Transport::Stdio { stdin, stdout, next_id, .. } => {
                let id = next_id.fetch_add(1, Ordering::SeqCst);
                let request = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
                let mut line = serde_json::to_string(&request).map_err(SkillGraphError::from)?;
                line.push('\n');

                {
                    let mut stdin = stdin.lock().await;
                    stdin
                        .write_all(line.as_bytes())
                        .await
                        .map_err(|e| SkillGraphError::ToolCallFailed {
                            tool: server.to_string(),
                            reason: format!("write to server stdin failed: {e}"),
                        })?;
                }

                let mut response_line = String::new();
                {
                    let mut stdout = stdout.lock().await;
                    stdout
                        .read_line(&mut response_line)
                        .await
                        .map_err(|e| SkillGraphError::ToolCallFailed {
                            tool: server.to_string(),
                            reason: format!("read from server stdout failed: {e}"),
                        })?;
                }

                debug!(server, method, "stdio tool server round-trip complete");
                let response: Value = serde_json::from_str(response_line.trim()).map_err(SkillGraphError::from)?;
                Self::unwrap_rpc_result(response, server)
            }
            Transport::Http { client, base_url } => {
                let response = client
                    .post(base_url)
                    .json(&json!({"jsonrpc": "2.0", "id": 1, "method": method, "params": params}))
                    .send()
                    .await
                    .map_err(|e| SkillGraphError::ToolServerConnectFailed {
                        server: server.to_string(),
                        reason: e.to_string(),
                    })?;

                if let Some(content_type) = response.headers().get(reqwest::header::CONTENT_TYPE) {
                    if content_type.to_str().unwrap_or_default().contains("text/event-stream") {
                        return Self::consume_sse(response, server).await;
                    }
                }

                let body: Value = response
                    .json()
                    .await
                    .map_err(|e| SkillGraphError::ToolCallFailed {
                        tool: server.to_string(),
                        reason: e.to_string(),
                    })?;
                Self::unwrap_rpc_result(body, server)
            }
        }
    }

    async fn consume_sse(response: reqwest::Response, server: &str) -> Result<Value, SkillGraphError> {
        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| SkillGraphError::ToolCallFailed {
                tool: server.to_string(),
                reason: e.to_string(),
            })?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));
        }

        let data_line = buffer
            .lines()
            .find_map(|line| line.strip_prefix("data: "))
            .ok_or_else(|| SkillGraphError::ToolCallFailed {
                tool: server.to_string(),
                reason: "SSE stream carried no data frame".into(),
            })?;

        let body: Value = serde_json::from_str(data_line).map_err(SkillGraphError::from)?;
        Self::unwrap_rpc_result(body, server)
    }

    fn unwrap_rpc_result(body: Value, server: &str) -> Result<Value, SkillGraphError> {
        if let Some(error) = body.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown JSON-RPC error");
            return Err(SkillGraphError::ToolCallFailed {
                tool: server.to_string(),
                reason: message.to_string(),
            });
        }
        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }
}

#[async_trait]
impl ToolTransport for ToolClientManager {
    async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        params: Value,
    ) -> Result<RawToolResult, SkillGraphError> {
        self.execute_tool(&format!("{server}/{tool}"), params).await
    }
}

/// Shared-ownership alias for embedding a manager inside engine context
/// state that is itself cloned across sub-pipeline recursion.
pub type SharedToolClientManager = Arc<Mutex<ToolClientManager>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwrap_rpc_result_surfaces_error() {
        let body = json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32000, "message": "boom"}});
        let err = ToolClientManager::unwrap_rpc_result(body, "srv").unwrap_err();
        assert!(matches!(err, SkillGraphError::ToolCallFailed { .. }));
    }

    #[test]
    fn unwrap_rpc_result_extracts_result() {
        let body = json!({"jsonrpc": "2.0", "id": 1, "result": {"tools": []}});
        let result = ToolClientManager::unwrap_rpc_result(body, "srv").unwrap();
        assert_eq!(result, json!({"tools": []}));
    }

    #[test]
    fn parse_tool_result_extracts_text_blocks() {
        let response = json!({"content": [{"type": "text", "text": "hello"}], "isError": false});
        let raw = ToolClientManager::parse_tool_result(response);
        assert!(!raw.is_error);
        assert_eq!(raw.content.len(), 1);
        assert!(matches!(&raw.content[0], ContentBlock::Text(t) if t == "hello"));
    }

    #[tokio::test]
    async fn unknown_server_errors() {
        let manager = ToolClientManager::new();
        let err = manager.execute_tool("ghost/t", json!({})).await.unwrap_err();
        assert!(matches!(err, SkillGraphError::ToolServerNotFound { .. }));
    }

    #[tokio::test]
    async fn qualified_name_without_separator_errors() {
        let manager = ToolClientManager::new();
        let err = manager.execute_tool("notaslash", json!({})).await.unwrap_err();
        assert!(matches!(err, SkillGraphError::ToolServerNotFound { .. }));
    }
}
