//! # toolbridge-mcp
//!
//! Dynamic MCP (Model Context Protocol) connection registry for Toolbridge.
//!
//! This crate provides:
//! - A process-wide registry of named external-protocol connections
//! - stdio, SSE, and streamable-HTTP transports behind one trait
//! - Scoped per-operation sessions (acquired before each call, released
//!   right after, so no session outlives a single logical operation)
//! - A remote-tool adapter bridging MCP tools into the agent tool registry
//! - The `mcp_client` action surface returning the response envelope

pub mod actions;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod tools;
pub mod transport;

pub use actions::{dispatch, McpAction};
pub use error::{McpError, RegistryError, TransportError};
pub use registry::{ConnectionRegistry, ConnectionSnapshot};
pub use session::McpSession;
pub use tools::RemoteTool;
pub use transport::{Transport, TransportKind, TransportSpec};
