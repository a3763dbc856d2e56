//! MCP-specific error types.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to spawn the child process.
    #[error("failed to spawn process: {0}")]
    SpawnFailed(std::io::Error),

    /// Failed to write to the transport.
    #[error("write error: {0}")]
    WriteError(std::io::Error),

    /// Failed to read from the transport.
    #[error("read error: {0}")]
    ReadError(std::io::Error),

    /// Connection was closed unexpectedly.
    #[error("connection closed")]
    ConnectionClosed,

    /// Transport is not connected.
    #[error("not connected")]
    NotConnected,

    /// HTTP-level failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// An HTTP header value could not be encoded.
    #[error("invalid header '{0}'")]
    InvalidHeader(String),

    /// The SSE stream ended before the server advertised a message endpoint.
    #[error("server never advertised a message endpoint")]
    EndpointMissing,

    /// The advertised message endpoint could not be resolved into a URL.
    #[error("invalid endpoint '{0}'")]
    InvalidEndpoint(String),

    /// A receive was attempted with no buffered response.
    #[error("no response available for receive")]
    NoPendingResponse,

    /// Timed out waiting for the server.
    #[error("timed out after {0:?} waiting for server")]
    Timeout(Duration),
}

/// Errors that can occur during MCP operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Protocol-level error (malformed messages, etc.).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Server returned an error response.
    #[error("server error (code {code}): {message}")]
    ServerError { code: i32, message: String },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a server error from a JSON-RPC error object.
    pub fn server_error(code: i32, message: impl Into<String>) -> Self {
        Self::ServerError {
            code,
            message: message.into(),
        }
    }
}

/// Errors surfaced by the connection registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No connection with the given id.
    #[error("Connection '{0}' not found")]
    ConnectionNotFound(String),

    /// The connection exists but was downgraded or disconnected.
    #[error("Connection '{0}' is not active")]
    ConnectionInactive(String),

    /// An active connection with the given id already exists.
    #[error("Connection '{0}' already exists and is active")]
    ConnectionExists(String),

    /// A required transport parameter is missing or malformed.
    #[error("Transport configuration error: {0}")]
    TransportConfig(String),

    /// The named tool is not callable on the current session.
    #[error("Tool '{tool_name}' not found on connection '{connection_id}'")]
    ToolNotFound {
        /// Owning connection.
        connection_id: String,
        /// Requested tool name.
        tool_name: String,
    },

    /// Bad argument shape for the requested operation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Underlying MCP failure.
    #[error(transparent)]
    Mcp(#[from] McpError),

    /// Catalog persistence failure.
    #[error("Catalog error: {0}")]
    Catalog(#[from] toolbridge_catalog::CatalogError),
}

impl From<RegistryError> for toolbridge_core::Error {
    fn from(e: RegistryError) -> Self {
        toolbridge_core::Error::Mcp(e.to_string())
    }
}
