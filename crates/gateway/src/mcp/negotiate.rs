//! Transport negotiation
//!
//! Opens one initialized session to one backend. Local backends get a single
//! stdio attempt. Remote backends try streamable HTTP first and fall back to
//! the legacy SSE transport against the same endpoint.

use std::future::Future;
use std::time::Duration;

use mcpmux_shared::{BackendDescriptor, BackendTransport, LocalSpec};
use url::Url;

use super::client::{McpClientError, McpSession, SessionTransport, Transport};
use super::http::HttpTransport;
use super::sse::SseTransport;
use super::stdio::StdioTransport;

/// Why a backend could not be connected
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("failed to start backend process: {0}")]
    Spawn(#[source] McpClientError),

    #[error("{transport} handshake failed: {source}")]
    Handshake {
        transport: SessionTransport,
        source: McpClientError,
    },

    #[error("{transport} connection timed out after {}ms", .timeout.as_millis())]
    Timeout {
        transport: SessionTransport,
        timeout: Duration,
    },

    #[error("both transports failed; streamable HTTP: {primary}; SSE fallback: {fallback}")]
    BothTransportsFailed {
        primary: Box<ConnectionError>,
        fallback: Box<ConnectionError>,
    },
}

/// Open and initialize a session to `descriptor`, bounding each attempt by `timeout`
pub async fn connect(
    descriptor: &BackendDescriptor,
    timeout: Duration,
) -> Result<McpSession, ConnectionError> {
    let name = descriptor.name.as_str();

    match &descriptor.transport {
        BackendTransport::Local(spec) => connect_stdio(name, spec, timeout).await,
        BackendTransport::Remote(endpoint) => {
            with_fallback(
                name,
                connect_streamable_http(name, endpoint, timeout),
                connect_sse(name, endpoint, timeout),
            )
            .await
        }
    }
}

async fn connect_stdio(
    name: &str,
    spec: &LocalSpec,
    timeout: Duration,
) -> Result<McpSession, ConnectionError> {
    let transport = StdioTransport::spawn(name, spec).map_err(ConnectionError::Spawn)?;
    bounded(
        SessionTransport::Stdio,
        timeout,
        McpSession::handshake(name, Transport::Stdio(transport)),
    )
    .await
}

async fn connect_streamable_http(
    name: &str,
    endpoint: &Url,
    timeout: Duration,
) -> Result<McpSession, ConnectionError> {
    bounded(SessionTransport::StreamableHttp, timeout, async {
        let transport = HttpTransport::new(name, endpoint, timeout)?;
        McpSession::handshake(name, Transport::StreamableHttp(transport)).await
    })
    .await
}

async fn connect_sse(
    name: &str,
    endpoint: &Url,
    timeout: Duration,
) -> Result<McpSession, ConnectionError> {
    bounded(SessionTransport::Sse, timeout, async {
        let transport = SseTransport::connect(name, endpoint, timeout).await?;
        McpSession::handshake(name, Transport::Sse(transport)).await
    })
    .await
}

/// Run one connection attempt under a deadline
async fn bounded<T>(
    transport: SessionTransport,
    timeout: Duration,
    attempt: impl Future<Output = Result<T, McpClientError>>,
) -> Result<T, ConnectionError> {
    match tokio::time::timeout(timeout, attempt).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => Err(ConnectionError::Handshake { transport, source }),
        Err(_) => Err(ConnectionError::Timeout { transport, timeout }),
    }
}

/// Try `primary`; only if it fails, try `fallback`. Both causes are kept.
async fn with_fallback<T>(
    name: &str,
    primary: impl Future<Output = Result<T, ConnectionError>>,
    fallback: impl Future<Output = Result<T, ConnectionError>>,
) -> Result<T, ConnectionError> {
    let primary_err = match primary.await {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    tracing::info!(
        backend = %name,
        error = %primary_err,
        "Streamable HTTP failed, falling back to SSE"
    );

    match fallback.await {
        Ok(value) => Ok(value),
        Err(fallback_err) => Err(ConnectionError::BothTransportsFailed {
            primary: Box::new(primary_err),
            fallback: Box::new(fallback_err),
        }),
    }
}
