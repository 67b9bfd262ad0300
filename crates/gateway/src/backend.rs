//! Backend clients for upstream MCP servers.
//!
//! Two concrete variants share the post-connect logic in
//! [`ConnectionCore`]: only transport construction differs. HTTP backends
//! speak streamable HTTP to a URL; stdio backends spawn a child process and
//! speak MCP over its stdin/stdout. Reconnection is not automatic: a failed
//! backend stays failed until `connect` is called again.

use crate::config::BackendConfig;
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use rmcp::{
    ClientHandler, RoleClient, ServiceExt,
    model::{CallToolRequestParam, CallToolResult, ClientInfo},
    service::{Peer, RunningService},
    transport::{
        StreamableHttpClientTransport, TokioChildProcess,
        streamable_http_client::StreamableHttpClientTransportConfig,
    },
};
use serde_json::Value;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::process::Command;

/// One tool as seen through the aggregated index.
#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
    /// Name of the backend that owns the tool.
    pub backend: String,
}

/// Abstract backend contract the gateway core programs against.
#[async_trait]
pub trait BackendClient: Send + Sync {
    fn name(&self) -> &str;
    fn config(&self) -> &BackendConfig;
    fn connected(&self) -> bool;

    async fn connect(&self) -> Result<()>;

    /// Tool list, memoized until [`BackendClient::invalidate_tool_cache`].
    async fn list_tools(&self) -> Result<Vec<ToolInfo>>;
    fn invalidate_tool_cache(&self);

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult>;

    async fn close(&self) -> Result<()>;
}

#[derive(Clone)]
struct GatewayClientHandler;

impl ClientHandler for GatewayClientHandler {
    fn get_info(&self) -> ClientInfo {
        ClientInfo::default()
    }
}

type McpClient = RunningService<RoleClient, GatewayClientHandler>;

/// Connection state and post-connect logic shared by both variants.
struct ConnectionCore {
    name: String,
    client: tokio::sync::Mutex<Option<McpClient>>,
    tools: parking_lot::Mutex<Option<Vec<ToolInfo>>>,
    connected: AtomicBool,
}

impl ConnectionCore {
    fn new(name: String) -> Self {
        Self {
            name,
            client: tokio::sync::Mutex::new(None),
            tools: parking_lot::Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    async fn install(&self, client: McpClient) {
        let previous = {
            let mut guard = self.client.lock().await;
            guard.replace(client)
        };
        if let Some(previous) = previous {
            let _ = previous.cancel().await;
        }
        self.connected.store(true, Ordering::Release);
        *self.tools.lock() = None;
    }

    async fn peer(&self) -> Result<Peer<RoleClient>> {
        let guard = self.client.lock().await;
        guard
            .as_ref()
            .map(|client| client.peer().clone())
            .ok_or_else(|| GatewayError::NotConnected(self.name.clone()))
    }

    async fn list_tools(&self) -> Result<Vec<ToolInfo>> {
        if let Some(cached) = self.tools.lock().clone() {
            return Ok(cached);
        }

        let peer = self.peer().await?;
        let tools = peer.list_all_tools().await.map_err(|e| {
            GatewayError::Backend(format!("list tools from '{}': {e}", self.name))
        })?;

        let infos: Vec<ToolInfo> = tools
            .into_iter()
            .map(|tool| ToolInfo {
                name: tool.name.to_string(),
                description: tool.description.as_ref().map(|d| d.to_string()),
                input_schema: Value::Object((*tool.input_schema).clone()),
                backend: self.name.clone(),
            })
            .collect();

        *self.tools.lock() = Some(infos.clone());
        Ok(infos)
    }

    fn invalidate_tool_cache(&self) {
        *self.tools.lock() = None;
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        let peer = self.peer().await?;
        let arguments = match arguments {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => {
                return Err(GatewayError::Backend(format!(
                    "tool arguments must be an object, got {other}"
                )));
            }
        };

        peer.call_tool(CallToolRequestParam {
            name: Cow::Owned(name.to_string()),
            arguments,
        })
        .await
        .map_err(|e| GatewayError::Backend(e.to_string()))
    }

    async fn close(&self) -> Result<()> {
        let client = {
            let mut guard = self.client.lock().await;
            guard.take()
        };
        self.connected.store(false, Ordering::Release);
        *self.tools.lock() = None;

        if let Some(client) = client
            && let Err(e) = client.cancel().await
        {
            tracing::warn!(backend = %self.name, error = %e, "error while closing backend client");
        }
        Ok(())
    }
}

/// Backend reached over streamable HTTP.
pub struct HttpBackendClient {
    config: BackendConfig,
    url: String,
    headers: HashMap<String, String>,
    core: ConnectionCore,
}

impl HttpBackendClient {
    pub fn new(name: impl Into<String>, url: String, headers: HashMap<String, String>) -> Self {
        Self {
            config: BackendConfig::Http {
                url: url.clone(),
                headers: headers.clone(),
            },
            url,
            headers,
            core: ConnectionCore::new(name.into()),
        }
    }

    fn http_client(&self) -> Result<reqwest::Client> {
        let mut header_map = reqwest::header::HeaderMap::new();
        for (key, value) in &self.headers {
            let name = reqwest::header::HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| GatewayError::Config(format!("invalid header name '{key}': {e}")))?;
            let value = reqwest::header::HeaderValue::from_str(value)
                .map_err(|e| GatewayError::Config(format!("invalid header value for '{key}': {e}")))?;
            header_map.insert(name, value);
        }

        reqwest::Client::builder()
            .default_headers(header_map)
            .build()
            .map_err(|e| GatewayError::Backend(format!("build http client: {e}")))
    }
}

#[async_trait]
impl BackendClient for HttpBackendClient {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn connected(&self) -> bool {
        self.core.connected.load(Ordering::Acquire)
    }

    async fn connect(&self) -> Result<()> {
        tracing::info!(backend = %self.core.name, url = %self.url, "connecting http backend");
        let transport = StreamableHttpClientTransport::with_client(
            self.http_client()?,
            StreamableHttpClientTransportConfig::with_uri(self.url.clone()),
        );

        let client = GatewayClientHandler
            .serve(transport)
            .await
            .map_err(|e| GatewayError::Backend(format!("connect to '{}': {e}", self.core.name)))?;
        self.core.install(client).await;
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolInfo>> {
        self.core.list_tools().await
    }

    fn invalidate_tool_cache(&self) {
        self.core.invalidate_tool_cache();
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        self.core.call_tool(name, arguments).await
    }

    async fn close(&self) -> Result<()> {
        self.core.close().await
    }
}

/// Backend spawned as a child process.
pub struct StdioBackendClient {
    config: BackendConfig,
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    core: ConnectionCore,
}

impl StdioBackendClient {
    pub fn new(
        name: impl Into<String>,
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    ) -> Self {
        Self {
            config: BackendConfig::Stdio {
                command: command.clone(),
                args: args.clone(),
                env: env.clone(),
            },
            command,
            args,
            env,
            core: ConnectionCore::new(name.into()),
        }
    }
}

#[async_trait]
impl BackendClient for StdioBackendClient {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn connected(&self) -> bool {
        self.core.connected.load(Ordering::Acquire)
    }

    async fn connect(&self) -> Result<()> {
        tracing::info!(backend = %self.core.name, command = %self.command, "spawning stdio backend");
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        let transport = TokioChildProcess::new(cmd)
            .map_err(|e| GatewayError::Backend(format!("spawn '{}': {e}", self.core.name)))?;

        let client = GatewayClientHandler
            .serve(transport)
            .await
            .map_err(|e| GatewayError::Backend(format!("connect to '{}': {e}", self.core.name)))?;
        self.core.install(client).await;
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolInfo>> {
        self.core.list_tools().await
    }

    fn invalidate_tool_cache(&self) {
        self.core.invalidate_tool_cache();
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        self.core.call_tool(name, arguments).await
    }

    async fn close(&self) -> Result<()> {
        self.core.close().await
    }
}

/// Build the right client variant for a backend declaration.
pub fn backend_from_config(name: &str, config: &BackendConfig) -> Arc<dyn BackendClient> {
    match config {
        BackendConfig::Http { url, headers } => {
            Arc::new(HttpBackendClient::new(name, url.clone(), headers.clone()))
        }
        BackendConfig::Stdio { command, args, env } => Arc::new(StdioBackendClient::new(
            name,
            command.clone(),
            args.clone(),
            env.clone(),
        )),
    }
}
