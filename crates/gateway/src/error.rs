//! Gateway error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::config::ConfigError;
use crate::mcp::schema::SchemaViolation;
use crate::mcp::types::{JsonRpcError, JsonRpcResponse};
use crate::mcp::{ConnectionError, McpClientError};
use crate::moderation::ModerationError;
use crate::registry::CapabilityKind;

/// Gateway error type
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    // Startup
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    // Per backend, recoverable
    #[error("Backend '{backend}' failed to connect: {source}")]
    Connection {
        backend: String,
        source: ConnectionError,
    },
    #[error("Backend '{backend}' {kind} enumeration failed: {source}")]
    Enumeration {
        backend: String,
        kind: CapabilityKind,
        source: McpClientError,
    },

    // Per call
    #[error("Error invoking {kind} '{name}' on backend '{backend}': {source}")]
    Invocation {
        backend: String,
        kind: CapabilityKind,
        name: String,
        source: McpClientError,
    },
    #[error("Moderation check failed: {0}")]
    ModerationCall(#[from] ModerationError),

    // Frontend protocol
    #[error("Unknown {kind}: {name}")]
    UnknownCapability { kind: CapabilityKind, name: String },
    #[error("{0}")]
    InvalidArguments(#[from] SchemaViolation),
    #[error("Invalid params: {0}")]
    InvalidParams(String),
    #[error("Method not found: {0}")]
    MethodNotFound(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    /// JSON-RPC error object returned to the frontend caller
    pub fn to_json_rpc(&self) -> JsonRpcError {
        match self {
            GatewayError::UnknownCapability { .. }
            | GatewayError::InvalidArguments(_)
            | GatewayError::InvalidParams(_) => JsonRpcError::invalid_params(self.to_string()),
            GatewayError::MethodNotFound(method) => JsonRpcError::method_not_found(method),
            GatewayError::Parse(_) => JsonRpcError::parse_error(self.to_string()),
            GatewayError::Configuration(_)
            | GatewayError::Connection { .. }
            | GatewayError::Enumeration { .. }
            | GatewayError::Invocation { .. }
            | GatewayError::ModerationCall(_)
            | GatewayError::Internal(_) => JsonRpcError::internal_error(self.to_string()),
        }
    }
}

impl From<GatewayError> for JsonRpcError {
    fn from(err: GatewayError) -> Self {
        err.to_json_rpc()
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            GatewayError::Parse(_) | GatewayError::InvalidParams(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Errors outside any request id still travel as JSON-RPC envelopes
        let body = JsonRpcResponse::error(None, self.to_json_rpc());
        (status, Json(body)).into_response()
    }
}
