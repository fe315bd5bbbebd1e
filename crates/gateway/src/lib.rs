//! mcpmux Gateway Library
//!
//! Connects to any number of MCP backends, republishes their tools, prompts
//! and resources under backend-prefixed names, and serves them from a single
//! endpoint with optional moderation of tool results.

pub mod config;
pub mod error;
pub mod mcp;
pub mod moderation;
pub mod orchestrator;
pub mod registry;
pub mod server;

pub use config::Config;
pub use error::{GatewayError, GatewayResult};
pub use orchestrator::{ConnectionReport, Gateway, Orchestrator};
pub use registry::CapabilityRegistry;
