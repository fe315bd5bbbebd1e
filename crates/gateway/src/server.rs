//! Aggregate endpoint server
//!
//! Answers frontend JSON-RPC from the capability registry. Two frontends are
//! provided: newline-delimited JSON over stdio, and streamable HTTP via axum.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

use crate::error::{GatewayError, GatewayResult};
use crate::mcp::router::McpMethod;
use crate::mcp::types::*;
use crate::orchestrator::ConnectionReport;
use crate::registry::CapabilityRegistry;

const SERVER_NAME: &str = "mcpmux";

const INSTRUCTIONS: &str = "Tools, prompts and resources from several MCP servers, \
published as <backend>_<name>. Call gateway_status to see which backends are connected.";

/// Handle one frontend message. Notifications produce no response.
pub async fn handle_message(
    registry: &CapabilityRegistry,
    request: JsonRpcRequest,
) -> Option<JsonRpcResponse> {
    if request.is_notification() {
        tracing::debug!(method = %request.method, "Notification received");
        return None;
    }

    let id = request.id.clone();
    let method = request.method.clone();

    if request.jsonrpc != "2.0" {
        return Some(JsonRpcResponse::error(
            id,
            JsonRpcError::invalid_request(format!("unsupported jsonrpc version '{}'", request.jsonrpc)),
        ));
    }

    match dispatch(registry, &request.method, request.params).await {
        Ok(result) => Some(JsonRpcResponse::success(id, result)),
        Err(e) => {
            tracing::debug!(method = %method, error = %e, "Request failed");
            Some(JsonRpcResponse::error(id, e.to_json_rpc()))
        }
    }
}

/// Parse and handle one raw line or body
pub async fn handle_raw(registry: &CapabilityRegistry, raw: &str) -> Option<JsonRpcResponse> {
    match serde_json::from_str::<JsonRpcRequest>(raw) {
        Ok(request) => handle_message(registry, request).await,
        Err(e) => Some(JsonRpcResponse::error(
            None,
            GatewayError::Parse(e.to_string()).to_json_rpc(),
        )),
    }
}

async fn dispatch(
    registry: &CapabilityRegistry,
    method: &str,
    params: Option<Value>,
) -> GatewayResult<Value> {
    match McpMethod::from_method(method) {
        McpMethod::Initialize => to_value(initialize_result()),
        McpMethod::Ping => Ok(json!({})),
        McpMethod::ToolsList => to_value(ToolsListResult {
            tools: registry.list_tools(),
            next_cursor: None,
        }),
        McpMethod::ToolsCall => {
            let params: ToolCallParams = parse_params(params)?;
            to_value(registry.call_tool(&params.name, params.arguments).await?)
        }
        McpMethod::PromptsList => to_value(PromptsListResult {
            prompts: registry.list_prompts(),
            next_cursor: None,
        }),
        McpMethod::PromptsGet => {
            let params: PromptGetParams = parse_params(params)?;
            to_value(registry.get_prompt(&params.name, params.arguments).await?)
        }
        McpMethod::ResourcesList => to_value(ResourcesListResult {
            resources: registry.list_resources(),
            next_cursor: None,
        }),
        McpMethod::ResourceTemplatesList => to_value(ResourceTemplatesListResult {
            resource_templates: registry.list_resource_templates(),
            next_cursor: None,
        }),
        McpMethod::ResourcesRead => {
            let params: ResourceReadParams = parse_params(params)?;
            to_value(registry.read_resource(&params.uri).await?)
        }
        McpMethod::Unknown => Err(GatewayError::MethodNotFound(method.to_string())),
    }
}

fn initialize_result() -> InitializeResult {
    InitializeResult {
        protocol_version: PROTOCOL_VERSION.to_string(),
        capabilities: Capabilities {
            tools: Some(ToolsCapability::default()),
            resources: Some(ResourcesCapability::default()),
            prompts: Some(PromptsCapability::default()),
            logging: None,
        },
        server_info: ServerInfo {
            name: SERVER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        instructions: Some(INSTRUCTIONS.to_string()),
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> GatewayResult<T> {
    serde_json::from_value(params.unwrap_or_else(|| json!({})))
        .map_err(|e| GatewayError::InvalidParams(e.to_string()))
}

fn to_value<T: Serialize>(value: T) -> GatewayResult<Value> {
    serde_json::to_value(value).map_err(|e| GatewayError::Internal(e.to_string()))
}

// =============================================================================
// Stdio frontend
// =============================================================================

/// Serve the aggregate endpoint over newline-delimited JSON until `reader` closes.
///
/// Each request runs on its own task; responses are written in completion
/// order through a single writer.
pub async fn serve_io<R, W>(
    registry: Arc<CapabilityRegistry>,
    reader: R,
    mut writer: W,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let writer_task = tokio::spawn(async move {
        while let Some(mut line) = rx.recv().await {
            line.push('\n');
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });

    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let registry = registry.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let Some(response) = handle_raw(&registry, &line).await else {
                return;
            };
            match serde_json::to_string(&response) {
                Ok(out) => {
                    if tx.send(out).is_err() {
                        tracing::debug!("stdout writer closed, dropping response");
                    }
                }
                Err(e) => tracing::error!(error = %e, "Failed to serialize response"),
            }
        });
    }

    tracing::info!("Frontend input closed");
    drop(tx);

    match writer_task.await {
        Ok(result) => result,
        Err(e) => Err(std::io::Error::other(e)),
    }
}

/// Serve over the process's stdin/stdout
pub async fn serve_stdio(registry: Arc<CapabilityRegistry>) -> std::io::Result<()> {
    tracing::info!("Serving aggregate endpoint on stdio");
    serve_io(registry, tokio::io::stdin(), tokio::io::stdout()).await
}

// =============================================================================
// HTTP frontend
// =============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub tools: usize,
    pub prompts: usize,
    pub resources: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ConnectionReport>,
}

/// Health check endpoint
pub async fn health(State(registry): State<Arc<CapabilityRegistry>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        tools: registry.tool_count(),
        prompts: registry.prompt_count(),
        resources: registry.resource_count(),
        report: registry.status().cloned(),
    })
}

/// `POST /mcp`: one JSON-RPC message per request
pub async fn mcp_post(State(registry): State<Arc<CapabilityRegistry>>, body: String) -> Response {
    let request: JsonRpcRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(e) => return GatewayError::Parse(e.to_string()).into_response(),
    };

    let is_initialize = request.method == "initialize";

    let Some(response) = handle_message(&registry, request).await else {
        return StatusCode::ACCEPTED.into_response();
    };

    let mut http_response = Json(response).into_response();
    if is_initialize {
        let session_id = uuid::Uuid::new_v4().to_string();
        if let Ok(value) = HeaderValue::from_str(&session_id) {
            http_response.headers_mut().insert("mcp-session-id", value);
        }
    }
    http_response
}

/// Build the HTTP frontend router
pub fn router(registry: Arc<CapabilityRegistry>) -> Router {
    Router::new()
        .route("/mcp", post(mcp_post))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(registry)
}

/// Serve the HTTP frontend until `shutdown` resolves
pub async fn serve_http(
    registry: Arc<CapabilityRegistry>,
    bind_address: &str,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    tracing::info!(address = %bind_address, "Serving aggregate endpoint on HTTP");

    axum::serve(listener, router(registry))
        .with_graceful_shutdown(shutdown)
        .await
}
