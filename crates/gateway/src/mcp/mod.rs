//! MCP (Model Context Protocol) plumbing
//!
//! Client side of the gateway: the protocol types, the three transports a
//! backend can be reached over, and the negotiation that picks one.
//!
//! # Architecture
//!
//! ```text
//! Client (Claude/Cursor) --> mcpmux --> Backend 1 (stdio child)
//!                                   --> Backend 2 (streamable HTTP)
//!                                   --> Backend N (legacy SSE)
//! ```
//!
//! # Features
//!
//! - Capability namespacing: `{backend}_{original}` to prevent conflicts
//! - Remote transport fallback: streamable HTTP, then SSE
//! - JSON Schema reduction to validator shapes for argument checking

pub mod client;
pub mod http;
pub mod negotiate;
pub mod router;
pub mod schema;
pub mod sse;
pub mod stdio;
pub mod types;

pub use client::{McpClientError, McpResult, McpSession, SessionTransport};
pub use negotiate::{connect, ConnectionError};
pub use router::{publish_name, McpMethod, UriTemplate};
pub use schema::{translate, ValidatorShape};
pub use types::*;
