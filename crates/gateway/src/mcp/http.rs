//! Streamable HTTP transport
//!
//! Every message is a `POST` to the backend endpoint. The server answers
//! either with a JSON body or with a short `text/event-stream` body carrying
//! the response. A session id handed out on initialize is echoed back on
//! every later request.

use std::time::Duration;

use reqwest::Client;
use tokio::sync::RwLock;
use url::Url;

use super::client::{McpClientError, McpResult, REQUEST_TIMEOUT};
use super::sse::parse_sse_body;
use super::types::{JsonRpcRequest, JsonRpcResponse};

const SESSION_HEADER: &str = "Mcp-Session-Id";

/// A streamable HTTP session with one backend
pub struct HttpTransport {
    backend: String,
    client: Client,
    endpoint: Url,
    session_id: RwLock<Option<String>>,
}

impl HttpTransport {
    pub fn new(backend: &str, endpoint: &Url, connect_timeout: Duration) -> McpResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(connect_timeout)
            .pool_max_idle_per_host(10)
            .build()?;

        Ok(Self {
            backend: backend.to_string(),
            client,
            endpoint: endpoint.clone(),
            session_id: RwLock::new(None),
        })
    }

    async fn post(&self, message: &JsonRpcRequest) -> McpResult<reqwest::Response> {
        let mut req_builder = self.client.post(self.endpoint.clone());

        if let Some(ref session_id) = *self.session_id.read().await {
            req_builder = req_builder.header(SESSION_HEADER, session_id.as_str());
        }

        let response = req_builder
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .json(message)
            .send()
            .await?;

        if let Some(session_id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            let mut current = self.session_id.write().await;
            if current.as_deref() != Some(session_id) {
                tracing::debug!(backend = %self.backend, session_id = %session_id, "Streamable HTTP session assigned");
                *current = Some(session_id.to_string());
            }
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(McpClientError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }

    pub async fn send(&self, request: &JsonRpcRequest) -> McpResult<JsonRpcResponse> {
        let response = self.post(request).await?;

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let body = response.text().await?;

        if content_type.contains("text/event-stream") {
            return response_from_event_stream(&body, request);
        }

        serde_json::from_str(body.trim()).map_err(McpClientError::from)
    }

    pub async fn notify(&self, notification: &JsonRpcRequest) -> McpResult<()> {
        self.post(notification).await?;
        Ok(())
    }

    /// End the server-side session, if one was assigned
    pub async fn close(&self) {
        let Some(session_id) = self.session_id.write().await.take() else {
            return;
        };

        let result = self
            .client
            .delete(self.endpoint.clone())
            .header(SESSION_HEADER, session_id.as_str())
            .send()
            .await;

        if let Err(e) = result {
            tracing::debug!(backend = %self.backend, error = %e, "Failed to end streamable HTTP session");
        }
    }
}

/// Pick the response to `request` out of an event-stream body
fn response_from_event_stream(body: &str, request: &JsonRpcRequest) -> McpResult<JsonRpcResponse> {
    for event in parse_sse_body(body) {
        if !event.is_message() {
            continue;
        }
        let Ok(response) = serde_json::from_str::<JsonRpcResponse>(&event.data) else {
            continue;
        };
        if response.id == request.id && (response.result.is_some() || response.error.is_some()) {
            return Ok(response);
        }
    }

    Err(McpClientError::InvalidResponse(format!(
        "event stream had no response to {}",
        request.method
    )))
}
