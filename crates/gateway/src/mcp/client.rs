//! MCP Client for Upstream Connections
//!
//! An [`McpSession`] is one initialized connection to one backend. It owns the
//! transport the negotiator picked and exposes typed MCP calls on top of it.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::http::HttpTransport;
use super::sse::SseTransport;
use super::stdio::StdioTransport;
use super::types::*;

/// Timeout for a single request to an already-initialized backend
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Upper bound on `nextCursor` pages followed by one list call
const MAX_LIST_PAGES: usize = 64;

/// Error type for MCP client operations
#[derive(Debug, thiserror::Error)]
pub enum McpClientError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Timeout waiting for response")]
    Timeout,

    #[error("MCP server returned error {}: {}", .0.code, .0.message)]
    McpError(JsonRpcError),

    #[error("Invalid response from server: {0}")]
    InvalidResponse(String),

    #[error("Process spawn failed: {0}")]
    ProcessError(String),

    #[error("Connection closed")]
    Closed,
}

impl McpClientError {
    /// True when the backend answered "I don't implement that method"
    pub fn is_method_not_found(&self) -> bool {
        matches!(self, McpClientError::McpError(e) if e.code == JsonRpcError::METHOD_NOT_FOUND)
    }
}

/// Result type for MCP client operations
pub type McpResult<T> = Result<T, McpClientError>;

/// Transport a session was negotiated over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionTransport {
    Stdio,
    StreamableHttp,
    Sse,
}

impl fmt::Display for SessionTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionTransport::Stdio => write!(f, "stdio"),
            SessionTransport::StreamableHttp => write!(f, "streamable-http"),
            SessionTransport::Sse => write!(f, "sse"),
        }
    }
}

/// Wire-level transport behind a session
pub enum Transport {
    Stdio(StdioTransport),
    StreamableHttp(HttpTransport),
    Sse(SseTransport),
}

impl Transport {
    pub fn kind(&self) -> SessionTransport {
        match self {
            Transport::Stdio(_) => SessionTransport::Stdio,
            Transport::StreamableHttp(_) => SessionTransport::StreamableHttp,
            Transport::Sse(_) => SessionTransport::Sse,
        }
    }

    async fn send(&self, request: &JsonRpcRequest) -> McpResult<JsonRpcResponse> {
        match self {
            Transport::Stdio(t) => t.send(request).await,
            Transport::StreamableHttp(t) => t.send(request).await,
            Transport::Sse(t) => t.send(request).await,
        }
    }

    async fn notify(&self, notification: &JsonRpcRequest) -> McpResult<()> {
        match self {
            Transport::Stdio(t) => t.notify(notification).await,
            Transport::StreamableHttp(t) => t.notify(notification).await,
            Transport::Sse(t) => t.notify(notification).await,
        }
    }

    async fn close(&self) {
        match self {
            Transport::Stdio(t) => t.close().await,
            Transport::StreamableHttp(t) => t.close().await,
            Transport::Sse(t) => t.close().await,
        }
    }
}

/// An initialized MCP session with one backend
pub struct McpSession {
    backend: String,
    transport: Transport,
    init: InitializeResult,
    next_id: AtomicI64,
}

impl fmt::Debug for McpSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("McpSession")
            .field("backend", &self.backend)
            .field("transport", &self.transport.kind())
            .field("server", &self.init.server_info.name)
            .finish()
    }
}

impl McpSession {
    /// Run the initialize handshake over a freshly opened transport.
    ///
    /// On failure the transport is closed before the error is returned, so a
    /// spawned child is reaped rather than left running.
    pub async fn handshake(backend: &str, transport: Transport) -> McpResult<Self> {
        match Self::initialize(&transport).await {
            Ok(init) => {
                tracing::debug!(
                    backend = %backend,
                    transport = %transport.kind(),
                    server = %init.server_info.name,
                    protocol_version = %init.protocol_version,
                    "MCP session initialized"
                );

                Ok(Self {
                    backend: backend.to_string(),
                    transport,
                    init,
                    next_id: AtomicI64::new(1),
                })
            }
            Err(e) => {
                transport.close().await;
                Err(e)
            }
        }
    }

    async fn initialize(transport: &Transport) -> McpResult<InitializeResult> {
        let request = JsonRpcRequest::new(
            0,
            "initialize",
            Some(serde_json::to_value(InitializeParams {
                protocol_version: PROTOCOL_VERSION.to_string(),
                capabilities: serde_json::json!({}),
                client_info: ClientInfo {
                    name: "mcpmux".to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                },
            })?),
        );

        let response = transport.send(&request).await?;
        let init: InitializeResult = decode_response(response)?;

        transport
            .notify(&JsonRpcRequest::notification(
                "notifications/initialized",
                None,
            ))
            .await?;

        Ok(init)
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn transport_kind(&self) -> SessionTransport {
        self.transport.kind()
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.init.server_info
    }

    /// Capabilities the backend advertised during initialize
    pub fn capabilities(&self) -> &Capabilities {
        &self.init.capabilities
    }

    /// Send a request and decode its result
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> McpResult<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(id, method, params);
        let response = self.transport.send(&request).await?;
        decode_response(response)
    }

    /// Follow `nextCursor` pagination for a list method
    async fn list_all<R, T>(
        &self,
        method: &str,
        split: impl Fn(R) -> (Vec<T>, Option<String>),
    ) -> McpResult<Vec<T>>
    where
        R: DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = serde_json::to_value(ListParams {
                cursor: cursor.take(),
            })?;
            let page: R = self.request(method, Some(params)).await?;
            let (mut page_items, next) = split(page);
            items.append(&mut page_items);

            match next {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(items),
            }
        }

        tracing::warn!(
            backend = %self.backend,
            method = %method,
            pages = MAX_LIST_PAGES,
            "Stopped following pagination cursor"
        );
        Ok(items)
    }

    /// Get tools from the backend
    pub async fn list_tools(&self) -> McpResult<Vec<Tool>> {
        self.list_all("tools/list", |r: ToolsListResult| (r.tools, r.next_cursor))
            .await
    }

    /// Call a tool on the backend by its original name
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: Option<Value>,
    ) -> McpResult<ToolCallResult> {
        let params = serde_json::to_value(ToolCallParams {
            name: tool_name.to_string(),
            arguments,
        })?;
        self.request("tools/call", Some(params)).await
    }

    /// Get prompts from the backend
    pub async fn list_prompts(&self) -> McpResult<Vec<Prompt>> {
        self.list_all("prompts/list", |r: PromptsListResult| {
            (r.prompts, r.next_cursor)
        })
        .await
    }

    /// Render a prompt on the backend by its original name
    pub async fn get_prompt(
        &self,
        prompt_name: &str,
        arguments: Option<Value>,
    ) -> McpResult<PromptGetResult> {
        let params = serde_json::to_value(PromptGetParams {
            name: prompt_name.to_string(),
            arguments,
        })?;
        self.request("prompts/get", Some(params)).await
    }

    /// Get static resources from the backend
    pub async fn list_resources(&self) -> McpResult<Vec<Resource>> {
        self.list_all("resources/list", |r: ResourcesListResult| {
            (r.resources, r.next_cursor)
        })
        .await
    }

    /// Get resource templates from the backend
    pub async fn list_resource_templates(&self) -> McpResult<Vec<ResourceTemplate>> {
        self.list_all(
            "resources/templates/list",
            |r: ResourceTemplatesListResult| (r.resource_templates, r.next_cursor),
        )
        .await
    }

    /// Read a resource from the backend
    pub async fn read_resource(&self, uri: &str) -> McpResult<ResourceReadResult> {
        let params = serde_json::to_value(ResourceReadParams {
            uri: uri.to_string(),
        })?;
        self.request("resources/read", Some(params)).await
    }

    /// Tear the session down. Only called at gateway shutdown.
    pub async fn close(&self) {
        tracing::info!(backend = %self.backend, transport = %self.transport.kind(), "Closing backend session");
        self.transport.close().await;
    }
}

/// Turn a JSON-RPC response into a typed result or an error
fn decode_response<T: DeserializeOwned>(response: JsonRpcResponse) -> McpResult<T> {
    if let Some(error) = response.error {
        return Err(McpClientError::McpError(error));
    }

    let result = response
        .result
        .ok_or_else(|| McpClientError::InvalidResponse("response has no result".to_string()))?;

    Ok(serde_json::from_value(result)?)
}
