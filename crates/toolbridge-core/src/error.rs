//! Error types for Toolbridge.

use thiserror::Error;

/// Result type alias using the crate error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Toolbridge.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Tool execution error
    #[error("Tool error: {0}")]
    Tool(String),

    /// Catalog error
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// MCP error
    #[error("MCP error: {0}")]
    Mcp(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found error
    #[error("Not found: {0}")]
    NotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
