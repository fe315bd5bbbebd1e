//! Aggregator orchestrator
//!
//! Connects every configured backend one after another and registers each
//! one's capabilities as soon as it is up. A backend that fails to connect is
//! recorded and skipped; it never stops the others.

use std::sync::Arc;

use mcpmux_shared::BackendDescriptor;
use serde::Serialize;
use time::OffsetDateTime;

use crate::config::{ConfigError, GatewayConfig};
use crate::error::GatewayError;
use crate::mcp::{negotiate, McpSession, SessionTransport};
use crate::moderation::ModerationGate;
use crate::registry::{CapabilityKind, CapabilityRegistry};

/// What happened to one configured backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Connected {
        transport: SessionTransport,
        tools: usize,
        prompts: usize,
        resources: usize,
        /// Kinds the backend advertised but could not list
        #[serde(skip_serializing_if = "Vec::is_empty")]
        failed: Vec<CapabilityKind>,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendOutcome {
    pub backend: String,
    #[serde(flatten)]
    pub status: OutcomeStatus,
}

impl BackendOutcome {
    pub fn is_connected(&self) -> bool {
        matches!(self.status, OutcomeStatus::Connected { .. })
    }
}

/// Summary of a [`Orchestrator::connect_all`] run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionReport {
    pub configured: usize,
    pub connected: usize,
    pub outcomes: Vec<BackendOutcome>,
    pub moderation_enabled: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
}

impl ConnectionReport {
    pub fn failed(&self) -> impl Iterator<Item = &BackendOutcome> {
        self.outcomes.iter().filter(|o| !o.is_connected())
    }
}

/// Drives startup: owns the registry and the backend connection table while
/// backends are being connected
pub struct Orchestrator {
    config: GatewayConfig,
    registry: CapabilityRegistry,
    connections: Vec<Arc<McpSession>>,
}

impl Orchestrator {
    pub fn new(config: GatewayConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let gate = ModerationGate::new(
            config.moderation_enabled,
            config.moderation_api_key.clone(),
            config.moderation_url.clone(),
        );

        Ok(Self {
            config,
            registry: CapabilityRegistry::new(gate),
            connections: Vec::new(),
        })
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Connect and register every backend, in order
    pub async fn connect_all(
        &mut self,
        descriptors: &[BackendDescriptor],
    ) -> Result<ConnectionReport, ConfigError> {
        // Checked again here so no backend is touched under a bad config
        self.config.validate()?;

        let mut outcomes = Vec::with_capacity(descriptors.len());

        for descriptor in descriptors {
            tracing::info!(
                backend = %descriptor.name,
                kind = %descriptor.kind(),
                executable = ?descriptor.local_spec().map(|spec| spec.executable.as_str()),
                endpoint = ?descriptor.remote_endpoint().map(|url| url.as_str()),
                "Connecting backend"
            );

            match negotiate::connect(descriptor, self.config.connect_timeout).await {
                Ok(session) => {
                    let session = Arc::new(session);
                    let transport = session.transport_kind();
                    let summary = self
                        .registry
                        .register_all(&descriptor.name, session.clone())
                        .await;

                    tracing::info!(
                        backend = %descriptor.name,
                        transport = %transport,
                        server = %session.server_info().name,
                        "Backend connected"
                    );

                    self.connections.push(session);
                    outcomes.push(BackendOutcome {
                        backend: descriptor.name.clone(),
                        status: OutcomeStatus::Connected {
                            transport,
                            tools: summary.tools,
                            prompts: summary.prompts,
                            resources: summary.resources,
                            failed: summary.failed,
                        },
                    });
                }
                Err(source) => {
                    let error = source.to_string();
                    let err = GatewayError::Connection {
                        backend: descriptor.name.clone(),
                        source,
                    };
                    tracing::error!(backend = %descriptor.name, error = %err, "Backend unavailable");

                    outcomes.push(BackendOutcome {
                        backend: descriptor.name.clone(),
                        status: OutcomeStatus::Failed { error },
                    });
                }
            }
        }

        let report = ConnectionReport {
            configured: descriptors.len(),
            connected: outcomes.iter().filter(|o| o.is_connected()).count(),
            outcomes,
            moderation_enabled: self.config.moderation_enabled,
            generated_at: OffsetDateTime::now_utc(),
        };

        tracing::info!(
            configured = report.configured,
            connected = report.connected,
            tools = self.registry.tool_count(),
            prompts = self.registry.prompt_count(),
            resources = self.registry.resource_count(),
            moderation = self.registry.gate().is_active(),
            "Backend connection complete"
        );

        self.registry.set_status(report.clone());
        Ok(report)
    }

    /// Freeze the registry and hand it to the frontend
    pub fn into_gateway(self) -> Gateway {
        Gateway {
            registry: Arc::new(self.registry),
            connections: self.connections,
        }
    }
}

/// The running gateway: a read-only registry plus the sessions behind it
pub struct Gateway {
    registry: Arc<CapabilityRegistry>,
    connections: Vec<Arc<McpSession>>,
}

impl Gateway {
    pub fn registry(&self) -> Arc<CapabilityRegistry> {
        self.registry.clone()
    }

    /// Names of connected backends, in connection order
    pub fn backends(&self) -> Vec<&str> {
        self.connections.iter().map(|s| s.backend()).collect()
    }

    /// Close every backend session
    pub async fn shutdown(self) {
        for session in &self.connections {
            session.close().await;
        }
        tracing::info!(backends = self.connections.len(), "Gateway shut down");
    }
}
