//! Remote tool adapter.
//!
//! Bridges an MCP tool into the shape the agent framework expects for
//! direct invocation. Execution re-validates that the owning connection
//! still exists and is active before touching the wire; a genuine
//! invocation failure downgrades the whole connection (the one place
//! liveness is lowered automatically - direct `call_tool` invocations
//! surface transient errors without penalizing the connection).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, error};

use toolbridge_catalog::CatalogEntry;
use toolbridge_core::{ContentBlock, Status, Tool, ToolCall, ToolDefinition, ToolError, ToolResponse};

use crate::protocol::{CallToolResult, McpToolDefinition, ToolContent};
use crate::registry::ConnectionRegistry;
use crate::session::McpSession;

/// Prefix for agent-registered remote tool names, avoiding collisions with
/// built-in tools.
pub const MCP_TOOL_PREFIX: &str = "mcp__";

/// Agent-registry name for a remote tool: `mcp__<connection>__<tool>`.
pub fn full_tool_name(connection_id: &str, tool_name: &str) -> String {
    format!("{MCP_TOOL_PREFIX}{connection_id}__{tool_name}")
}

/// Parse a registered remote tool name into (connection_id, tool_name).
pub fn parse_tool_name(full_name: &str) -> Option<(String, String)> {
    let rest = full_name.strip_prefix(MCP_TOOL_PREFIX)?;
    let (connection_id, tool_name) = rest.split_once("__")?;
    if connection_id.is_empty() || tool_name.is_empty() {
        return None;
    }
    Some((connection_id.to_string(), tool_name.to_string()))
}

/// An MCP tool wrapped as an agent [`Tool`].
pub struct RemoteTool {
    full_name: String,
    connection_id: String,
    tool_name: String,
    definition: McpToolDefinition,
    registry: Arc<ConnectionRegistry>,
}

impl RemoteTool {
    /// Wrap a remote tool definition for the given connection.
    pub fn new(
        connection_id: impl Into<String>,
        definition: McpToolDefinition,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        let connection_id = connection_id.into();
        let tool_name = definition.name.clone();
        Self {
            full_name: full_tool_name(&connection_id, &tool_name),
            connection_id,
            tool_name,
            definition,
            registry,
        }
    }

    /// Owning connection id.
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Original tool name on the remote server.
    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }
}

#[async_trait]
impl Tool for RemoteTool {
    fn name(&self) -> &str {
        &self.full_name
    }

    fn definition(&self) -> ToolDefinition {
        let description = self
            .definition
            .description
            .clone()
            .unwrap_or_else(|| format!("MCP tool from connection '{}'", self.connection_id));

        ToolDefinition::new(&self.full_name, description)
            .with_input_schema(self.definition.input_schema.clone())
    }

    async fn execute(&self, call: &ToolCall) -> Result<ToolResponse, ToolError> {
        debug!(
            connection_id = %self.connection_id,
            tool = %self.tool_name,
            call_id = %call.id,
            "Executing remote tool"
        );

        // Existence/liveness failures are structured errors; the registry
        // is left untouched.
        let spec = match self.registry.transport_spec(&self.connection_id) {
            Ok(spec) => spec,
            Err(e) => return Ok(ToolResponse::error(e.to_string())),
        };

        let arguments = if call.arguments.is_null() {
            None
        } else {
            Some(call.arguments.clone())
        };

        let invocation = async {
            let mut session = McpSession::open(&spec).await?;
            let result = session.call_tool(&self.tool_name, arguments).await;
            let _ = session.close().await;
            result
        };

        match invocation.await {
            Ok(result) => Ok(call_result_to_response(result)),
            Err(e) => {
                error!(
                    connection_id = %self.connection_id,
                    tool = %self.tool_name,
                    error = %e,
                    "Remote tool invocation failed"
                );
                // A loaded tool blowing up makes the whole connection suspect.
                self.registry
                    .mark_inactive(&self.connection_id, e.to_string());
                Ok(ToolResponse::error(format!(
                    "Failed to execute tool '{}': {e}",
                    self.tool_name
                )))
            }
        }
    }
}

/// Convert an MCP tool result into the response envelope.
pub fn call_result_to_response(result: CallToolResult) -> ToolResponse {
    let status = if result.is_error {
        Status::Error
    } else {
        Status::Success
    };

    let content = result
        .content
        .into_iter()
        .map(|item| match item {
            ToolContent::Text { text } => ContentBlock::text(text),
            ToolContent::Image { data, mime_type } => {
                ContentBlock::image(json!({"data": data, "mime_type": mime_type}))
            }
            ToolContent::Resource {
                uri,
                mime_type,
                text,
            } => ContentBlock::json(json!({
                "resource": {"uri": uri, "mime_type": mime_type, "text": text}
            })),
        })
        .collect();

    ToolResponse { status, content }
}

fn escape_single_quotes(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Build catalog entries for a connection's remote tools, with pathway
/// hints telling a caller how to load, invoke, and unload them later.
pub fn catalog_entries_for(
    connection_id: &str,
    tools: &[McpToolDefinition],
) -> Vec<CatalogEntry> {
    let escaped_connection = escape_single_quotes(connection_id);

    tools
        .iter()
        .map(|tool| {
            let escaped_tool = escape_single_quotes(&tool.name);
            let description = tool
                .description
                .clone()
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| format!("MCP tool from connection '{connection_id}'"));

            CatalogEntry::new(tool.name.as_str(), description, format!("mcp:{connection_id}"))
                .with_category("mcp_tools")
                .with_input_schema(tool.input_schema.clone())
                .with_load_pathway(format!(
                    "mcp_client(action='load_tools', connection_id='{escaped_connection}', \
                     load_into_agent_registry=False)"
                ))
                .with_execute_pathway(format!(
                    "mcp_client(action='call_tool', connection_id='{escaped_connection}', \
                     tool_name='{escaped_tool}', tool_args={{...}})"
                ))
                .with_unload_pathway(format!(
                    "mcp_client(action='disconnect', connection_id='{escaped_connection}')"
                ))
        })
        .collect()
}
