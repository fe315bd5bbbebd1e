//! mcpmux entry point
//!
//! Loads configuration, connects every backend, then serves the aggregate
//! endpoint on stdio or HTTP until the frontend closes or ctrl-c.

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use mcpmux_gateway::config::{FrontendTransport, LogFormat};
use mcpmux_gateway::{server, Config, Orchestrator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    init_tracing(LogFormat::from_env());

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return Err(e).context("invalid configuration");
        }
    };

    tracing::info!(
        backends = ?mcpmux_shared::descriptor_names(&config.backends),
        transport = ?config.transport,
        moderation = config.gateway.moderation_enabled,
        "Starting mcpmux"
    );

    let mut orchestrator = Orchestrator::new(config.gateway.clone())?;
    let report = orchestrator.connect_all(&config.backends).await?;

    for outcome in report.failed() {
        tracing::warn!(backend = %outcome.backend, "Backend skipped");
    }

    let gateway = orchestrator.into_gateway();
    let registry = gateway.registry();

    let served = match config.transport {
        FrontendTransport::Stdio => {
            tokio::select! {
                result = server::serve_stdio(registry) => result,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Interrupted");
                    Ok(())
                }
            }
        }
        FrontendTransport::Http => {
            server::serve_http(registry, &config.bind_address, shutdown_signal()).await
        }
    };

    gateway.shutdown().await;
    served.context("frontend failed")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Logs always go to stderr; stdout belongs to the stdio frontend.
fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}
