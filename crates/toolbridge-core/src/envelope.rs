//! Tool response envelope.
//!
//! Every action surface in this workspace returns the same two-key envelope:
//! `{"status": "success" | "error", "content": [...]}` where each content
//! block is a single-key object (`text`, `json`, `image`, `document`). The
//! hosting agent runtime renders and validates responses against this exact
//! shape, so the serialized form is a wire contract.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of a tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// The operation completed.
    Success,
    /// The operation failed; content carries the diagnostic.
    Error,
}

/// A single content block in a tool response.
///
/// Serializes as a one-key object whose key names the block type, e.g.
/// `{"text": "..."}` or `{"json": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// The text content.
        text: String,
    },
    /// Structured JSON payload.
    Json {
        /// Arbitrary JSON value.
        json: Value,
    },
    /// Image payload (encoding is host-defined).
    Image {
        /// Image descriptor, typically `{data, mime_type}`.
        image: Value,
    },
    /// Document payload.
    Document {
        /// Document descriptor.
        document: Value,
    },
}

impl ContentBlock {
    /// Create a text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create a JSON block.
    pub fn json(json: impl Into<Value>) -> Self {
        Self::Json { json: json.into() }
    }

    /// Create an image block.
    pub fn image(image: impl Into<Value>) -> Self {
        Self::Image {
            image: image.into(),
        }
    }

    /// Get the text content if this is a text block.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Get the JSON payload if this is a JSON block.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json { json } => Some(json),
            _ => None,
        }
    }
}

/// The uniform envelope returned by every tool action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse {
    /// Success or error.
    pub status: Status,
    /// Ordered content blocks.
    pub content: Vec<ContentBlock>,
}

impl ToolResponse {
    /// Create a success response with a single text block.
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            status: Status::Success,
            content: vec![ContentBlock::text(text)],
        }
    }

    /// Create a success response carrying a text summary plus a JSON payload.
    ///
    /// This is the most common shape: a human-readable line followed by the
    /// structured result.
    pub fn success_with(text: impl Into<String>, json: impl Into<Value>) -> Self {
        Self {
            status: Status::Success,
            content: vec![ContentBlock::text(text), ContentBlock::json(json)],
        }
    }

    /// Create an error response with a single text block.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            content: vec![ContentBlock::text(text)],
        }
    }

    /// Append a content block.
    pub fn with_block(mut self, block: ContentBlock) -> Self {
        self.content.push(block);
        self
    }

    /// Check whether this response reports success.
    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    /// Check whether this response reports an error.
    pub fn is_error(&self) -> bool {
        self.status == Status::Error
    }

    /// First text block, if any.
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(ContentBlock::as_text)
    }

    /// First JSON block, if any.
    pub fn first_json(&self) -> Option<&Value> {
        self.content.iter().find_map(ContentBlock::as_json)
    }
}
