//! Legacy HTTP+SSE transport
//!
//! The client opens a long-lived `GET` event stream. The server's first
//! `endpoint` event names the URL that requests are `POST`ed to; responses
//! come back as `message` events on the stream and are matched to callers by
//! JSON-RPC id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use reqwest::Client;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use url::Url;

use super::client::{McpClientError, McpResult, REQUEST_TIMEOUT};
use super::types::{JsonRpcId, JsonRpcRequest, JsonRpcResponse};

/// One server-sent event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub id: Option<String>,
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    /// Events without an explicit type are `message` events
    pub fn is_message(&self) -> bool {
        matches!(self.event.as_deref(), None | Some("message"))
    }

    fn from_block(block: &str) -> Option<Self> {
        let mut event = SseEvent::default();
        let mut data_lines: Vec<&str> = Vec::new();

        for line in block.lines() {
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => event.event = Some(value.to_string()),
                "data" => data_lines.push(value),
                "id" => event.id = Some(value.to_string()),
                _ => {}
            }
        }

        if data_lines.is_empty() && event.event.is_none() {
            return None;
        }
        event.data = data_lines.join("\n");
        Some(event)
    }
}

/// Incremental event-stream parser fed with raw body chunks
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    /// Feed a chunk and return every event it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            let text = String::from_utf8_lossy(&block[..pos]);
            if let Some(event) = SseEvent::from_block(&text) {
                events.push(event);
            }
        }
        events
    }
}

/// Parse a complete `text/event-stream` body
pub fn parse_sse_body(body: &str) -> Vec<SseEvent> {
    let mut parser = SseParser::default();
    let mut events = parser.push(body.as_bytes());
    // A body may end without the trailing blank line
    events.extend(parser.push(b"\n\n"));
    events
}

type PendingMap = Arc<Mutex<HashMap<JsonRpcId, oneshot::Sender<JsonRpcResponse>>>>;

/// A connected legacy SSE session
pub struct SseTransport {
    backend: String,
    client: Client,
    messages_url: Url,
    pending: PendingMap,
    reader: JoinHandle<()>,
}

impl SseTransport {
    /// Open the event stream and wait for the `endpoint` event.
    ///
    /// The caller bounds how long this may take; the stream itself has no
    /// total timeout since it stays open for the life of the session.
    pub async fn connect(
        backend: &str,
        endpoint: &Url,
        connect_timeout: Duration,
    ) -> McpResult<Self> {
        let client = Client::builder().connect_timeout(connect_timeout).build()?;

        let response = client
            .get(endpoint.clone())
            .header("Accept", "text/event-stream")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(McpClientError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let mut stream = Box::pin(response.bytes_stream());
        let mut parser = SseParser::default();
        let mut early_events = Vec::new();

        let messages_url = 'endpoint: loop {
            let chunk = match stream.next().await {
                Some(chunk) => chunk?,
                None => return Err(McpClientError::Closed),
            };

            let mut events = parser.push(&chunk).into_iter();
            while let Some(event) = events.next() {
                if event.event.as_deref() == Some("endpoint") {
                    let url = endpoint.join(event.data.trim()).map_err(|e| {
                        McpClientError::InvalidResponse(format!(
                            "bad endpoint event '{}': {}",
                            event.data, e
                        ))
                    })?;
                    early_events.extend(events);
                    break 'endpoint url;
                }
            }
        };

        tracing::debug!(
            backend = %backend,
            messages_url = %messages_url,
            "SSE endpoint received"
        );

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let reader = tokio::spawn(read_events(
            backend.to_string(),
            stream,
            parser,
            early_events,
            pending.clone(),
        ));

        Ok(Self {
            backend: backend.to_string(),
            client,
            messages_url,
            pending,
            reader,
        })
    }

    async fn post(&self, message: &JsonRpcRequest) -> McpResult<()> {
        let response = self
            .client
            .post(self.messages_url.clone())
            .timeout(REQUEST_TIMEOUT)
            .json(message)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(McpClientError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    pub async fn send(&self, request: &JsonRpcRequest) -> McpResult<JsonRpcResponse> {
        let id = request
            .id
            .clone()
            .ok_or_else(|| McpClientError::InvalidResponse("request has no id".to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        if let Err(e) = self.post(request).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(response)) => Ok(response),
            // Reader task ended and dropped the sender
            Ok(Err(_)) => Err(McpClientError::Closed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                tracing::error!(backend = %self.backend, method = %request.method, "Timeout waiting for SSE response");
                Err(McpClientError::Timeout)
            }
        }
    }

    pub async fn notify(&self, notification: &JsonRpcRequest) -> McpResult<()> {
        self.post(notification).await
    }

    pub async fn close(&self) {
        self.reader.abort();
        self.pending.lock().await.clear();
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_events<S, B>(
    backend: String,
    mut stream: S,
    mut parser: SseParser,
    early_events: Vec<SseEvent>,
    pending: PendingMap,
) where
    S: Stream<Item = reqwest::Result<B>> + Unpin,
    B: AsRef<[u8]>,
{
    dispatch(&backend, early_events, &pending).await;

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => {
                let events = parser.push(chunk.as_ref());
                dispatch(&backend, events, &pending).await;
            }
            Err(e) => {
                tracing::warn!(backend = %backend, error = %e, "SSE stream error");
                break;
            }
        }
    }

    tracing::info!(backend = %backend, "SSE stream closed");
    // Dropping the senders fails every in-flight request
    pending.lock().await.clear();
}

async fn dispatch(backend: &str, events: Vec<SseEvent>, pending: &PendingMap) {
    for event in events {
        if !event.is_message() || event.data.trim().is_empty() {
            continue;
        }

        let value: serde_json::Value = match serde_json::from_str(&event.data) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(backend = %backend, error = %e, "Skipping non-JSON SSE message");
                continue;
            }
        };

        if value.get("method").is_some() {
            tracing::debug!(backend = %backend, method = ?value.get("method"), "Ignoring server-initiated message");
            continue;
        }

        let response: JsonRpcResponse = match serde_json::from_value(value) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(backend = %backend, error = %e, "Skipping malformed SSE response");
                continue;
            }
        };

        let Some(id) = response.id.clone() else {
            continue;
        };

        match pending.lock().await.remove(&id) {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => {
                tracing::debug!(backend = %backend, id = ?id, "No caller waiting for SSE response");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sse_body_single_event() {
        let body = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n\n";
        let events = parse_sse_body(body);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("message"));
        assert!(events[0].data.contains("\"id\":1"));
    }

    #[test]
    fn test_parse_sse_body_without_trailing_blank_line() {
        let events = parse_sse_body("data: {\"a\":1}");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"a\":1}");
        assert!(events[0].is_message());
    }

    #[test]
    fn test_multiline_data_is_joined() {
        let events = parse_sse_body("data: line1\ndata: line2\n\n");
        assert_eq!(events[0].data, "line1\nline2");
    }

    #[test]
    fn test_comments_and_crlf_are_ignored() {
        let events = parse_sse_body(": keepalive\r\n\r\nevent: endpoint\r\ndata: /messages?sessionId=abc\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("endpoint"));
        assert_eq!(events[0].data, "/messages?sessionId=abc");
        assert!(!events[0].is_message());
    }

    #[test]
    fn test_parser_handles_split_chunks() {
        let mut parser = SseParser::default();
        assert!(parser.push(b"event: endp").is_empty());
        assert!(parser.push(b"oint\ndata: /msg\n").is_empty());

        let events = parser.push(b"\nid: 4\ndata: x\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event.as_deref(), Some("endpoint"));
        assert_eq!(events[1].id.as_deref(), Some("4"));
        assert_eq!(events[1].data, "x");
    }

    #[tokio::test]
    async fn test_connect_resolves_relative_endpoint() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/sse")
            .match_header("accept", "text/event-stream")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body("event: endpoint\ndata: /messages?sessionId=abc\n\n")
            .create_async()
            .await;

        let endpoint = Url::parse(&format!("{}/sse", server.url())).unwrap();
        let transport = SseTransport::connect("legacy", &endpoint, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(transport.messages_url.path(), "/messages");
        assert_eq!(transport.messages_url.query(), Some("sessionId=abc"));
        transport.close().await;
    }

    #[tokio::test]
    async fn test_connect_rejects_error_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/sse")
            .with_status(404)
            .with_body("not here")
            .create_async()
            .await;

        let endpoint = Url::parse(&format!("{}/sse", server.url())).unwrap();
        let err = SseTransport::connect("legacy", &endpoint, Duration::from_secs(5))
            .await
            .err()
            .unwrap();

        assert!(matches!(err, McpClientError::HttpStatus { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_stream_ending_before_endpoint_is_closed() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/sse")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(": nothing useful\n\n")
            .create_async()
            .await;

        let endpoint = Url::parse(&format!("{}/sse", server.url())).unwrap();
        let err = SseTransport::connect("legacy", &endpoint, Duration::from_secs(5))
            .await
            .err()
            .unwrap();

        assert!(matches!(err, McpClientError::Closed));
    }
}
