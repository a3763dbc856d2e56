//! The `mcp_client` action surface.
//!
//! A closed set of operations over the connection registry, dispatched by
//! pattern match and always answered with the response envelope - every
//! error is converted, nothing escapes to the caller as a raw failure.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::error;

use toolbridge_catalog::ToolCatalogManager;
use toolbridge_core::config::McpSettings;
use toolbridge_core::{ToolRegistry, ToolResponse};

use crate::registry::ConnectionRegistry;
use crate::tools::call_result_to_response;
use crate::transport::{TransportKind, TransportParams, TransportSpec};

fn default_transport() -> TransportKind {
    TransportKind::Stdio
}

/// Operations supported by the MCP connection manager.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum McpAction {
    /// Establish a connection to an MCP server.
    Connect {
        /// Caller-chosen connection id.
        connection_id: String,
        /// Transport kind; defaults to stdio.
        #[serde(default = "default_transport")]
        transport: TransportKind,
        /// Transport parameters, flat on the wire.
        #[serde(flatten)]
        params: TransportParams,
    },
    /// Close a connection.
    Disconnect {
        /// Connection id.
        connection_id: String,
    },
    /// Show all registered connections.
    ListConnections,
    /// List tools from a connected server.
    ListTools {
        /// Connection id.
        connection_id: String,
    },
    /// Directly invoke a tool on a connected server.
    CallTool {
        /// Connection id.
        connection_id: String,
        /// Tool to invoke.
        tool_name: String,
        /// Tool arguments.
        #[serde(default)]
        tool_args: Option<Value>,
        /// Alternative spelling for tool arguments.
        #[serde(default)]
        arguments: Option<Value>,
    },
    /// Register remote tools in the catalog; optionally also register them
    /// with the agent.
    LoadTools {
        /// Connection id.
        connection_id: String,
        /// When true, also wrap and register each tool into the agent
        /// registry. Defaults to false, keeping remote tools catalog-first.
        #[serde(default)]
        load_into_agent_registry: bool,
    },
    /// List prompts from a connected server.
    ListPrompts {
        /// Connection id.
        connection_id: String,
        /// Pagination cursor from a previous call.
        #[serde(default)]
        pagination_token: Option<String>,
    },
    /// Retrieve a prompt from a connected server.
    GetPrompt {
        /// Connection id.
        connection_id: String,
        /// Prompt name.
        prompt_name: String,
        /// Prompt arguments; values must be strings.
        #[serde(default)]
        prompt_args: Option<BTreeMap<String, Value>>,
    },
    /// List resources from a connected server.
    ListResources {
        /// Connection id.
        connection_id: String,
        /// Pagination cursor from a previous call.
        #[serde(default)]
        pagination_token: Option<String>,
    },
    /// List resource templates from a connected server.
    ListResourceTemplates {
        /// Connection id.
        connection_id: String,
        /// Pagination cursor from a previous call.
        #[serde(default)]
        pagination_token: Option<String>,
    },
    /// Read a resource by URI from a connected server.
    ReadResource {
        /// Connection id.
        connection_id: String,
        /// URI of the resource.
        resource_uri: String,
    },
}

fn respond(text: String, value: impl Serialize) -> ToolResponse {
    match serde_json::to_value(value) {
        Ok(json) => ToolResponse::success_with(text, json),
        Err(e) => {
            error!(error = %e, "Failed to serialize action result");
            ToolResponse::error(format!("Failed to serialize result: {e}"))
        }
    }
}

/// Dispatch an MCP action, converting every outcome to the envelope.
pub async fn dispatch(
    action: McpAction,
    registry: &Arc<ConnectionRegistry>,
    catalog: &ToolCatalogManager,
    agent: Option<&mut ToolRegistry>,
    settings: &McpSettings,
) -> ToolResponse {
    match action {
        McpAction::Connect {
            connection_id,
            transport,
            params,
        } => {
            let spec = match TransportSpec::from_params(transport, params, settings) {
                Ok(spec) => spec,
                Err(e) => return ToolResponse::error(e.to_string()),
            };
            match registry.connect(&connection_id, spec).await {
                Ok(outcome) => respond(
                    format!("Connected to MCP server '{connection_id}'"),
                    outcome,
                ),
                Err(e) => ToolResponse::error(format!("Connection failed: {e}")),
            }
        }

        McpAction::Disconnect { connection_id } => {
            match registry.disconnect(&connection_id, agent) {
                Ok(outcome) => respond(
                    format!("Disconnected from MCP server '{connection_id}'"),
                    outcome,
                ),
                Err(e) => ToolResponse::error(format!("Disconnect failed: {e}")),
            }
        }

        McpAction::ListConnections => {
            let connections = registry.list_connections();
            respond(
                format!("Found {} MCP connections", connections.len()),
                json!({
                    "total_connections": connections.len(),
                    "connections": connections,
                }),
            )
        }

        McpAction::ListTools { connection_id } => {
            match registry.list_tools(&connection_id).await {
                Ok(tools) => respond(
                    format!(
                        "Found {} tools on MCP server '{connection_id}'",
                        tools.len()
                    ),
                    json!({
                        "connection_id": connection_id,
                        "tools_count": tools.len(),
                        "tools": tools,
                    }),
                ),
                Err(e) => ToolResponse::error(format!("Failed to list tools: {e}")),
            }
        }

        McpAction::CallTool {
            connection_id,
            tool_name,
            tool_args,
            arguments,
        } => {
            let arguments = tool_args.or(arguments);
            match registry.call_tool(&connection_id, &tool_name, arguments).await {
                Ok(result) => call_result_to_response(result),
                Err(e) => ToolResponse::error(format!("Failed to call tool: {e}")),
            }
        }

        McpAction::LoadTools {
            connection_id,
            load_into_agent_registry,
        } => {
            match Arc::clone(registry)
                .load_tools(&connection_id, catalog, agent, load_into_agent_registry)
                .await
            {
                Ok(outcome) => {
                    let text = if load_into_agent_registry {
                        format!(
                            "Registered {} MCP tools in catalog for '{connection_id}' and loaded {} into active agent registry",
                            outcome.catalog_tools.len(),
                            outcome.agent_loaded_tools.len(),
                        )
                    } else {
                        format!(
                            "Registered {} MCP tools in catalog for '{connection_id}' (agent registry unchanged)",
                            outcome.catalog_tools.len(),
                        )
                    };
                    respond(text, outcome)
                }
                Err(e) => ToolResponse::error(format!("Failed to load tools: {e}")),
            }
        }

        McpAction::ListPrompts {
            connection_id,
            pagination_token,
        } => {
            match registry.list_prompts(&connection_id, pagination_token).await {
                Ok(result) => respond(
                    format!("Listed prompts for MCP server '{connection_id}'"),
                    result,
                ),
                Err(e) => ToolResponse::error(format!("Failed to list prompts: {e}")),
            }
        }

        McpAction::GetPrompt {
            connection_id,
            prompt_name,
            prompt_args,
        } => {
            let arguments = match validate_prompt_args(prompt_args) {
                Ok(arguments) => arguments,
                Err(response) => return response,
            };
            match registry
                .get_prompt(&connection_id, &prompt_name, arguments)
                .await
            {
                Ok(result) => respond(
                    format!(
                        "Retrieved prompt '{prompt_name}' from MCP server '{connection_id}'"
                    ),
                    result,
                ),
                Err(e) => {
                    ToolResponse::error(format!("Failed to get prompt '{prompt_name}': {e}"))
                }
            }
        }

        McpAction::ListResources {
            connection_id,
            pagination_token,
        } => {
            match registry
                .list_resources(&connection_id, pagination_token)
                .await
            {
                Ok(result) => respond(
                    format!("Listed resources for MCP server '{connection_id}'"),
                    result,
                ),
                Err(e) => ToolResponse::error(format!("Failed to list resources: {e}")),
            }
        }

        McpAction::ListResourceTemplates {
            connection_id,
            pagination_token,
        } => {
            match registry
                .list_resource_templates(&connection_id, pagination_token)
                .await
            {
                Ok(result) => respond(
                    format!("Listed resource templates for MCP server '{connection_id}'"),
                    result,
                ),
                Err(e) => {
                    ToolResponse::error(format!("Failed to list resource templates: {e}"))
                }
            }
        }

        McpAction::ReadResource {
            connection_id,
            resource_uri,
        } => {
            if resource_uri.is_empty() {
                return ToolResponse::error("resource_uri is required for read_resource action");
            }
            match registry.read_resource(&connection_id, &resource_uri).await {
                Ok(result) => respond(
                    format!(
                        "Read resource '{resource_uri}' from MCP server '{connection_id}'"
                    ),
                    result,
                ),
                Err(e) => {
                    ToolResponse::error(format!("Failed to read resource '{resource_uri}': {e}"))
                }
            }
        }
    }
}

/// Prompt argument values must be strings per the MCP spec.
fn validate_prompt_args(
    prompt_args: Option<BTreeMap<String, Value>>,
) -> Result<Option<BTreeMap<String, String>>, ToolResponse> {
    let Some(args) = prompt_args else {
        return Ok(None);
    };
    if args.is_empty() {
        return Ok(None);
    }

    let non_string_keys: Vec<&str> = args
        .iter()
        .filter(|(_, value)| !value.is_string())
        .map(|(key, _)| key.as_str())
        .collect();
    if !non_string_keys.is_empty() {
        return Err(ToolResponse::error(format!(
            "prompt_args values must be strings. Non-string keys: {}",
            non_string_keys.join(", ")
        )));
    }

    Ok(Some(
        args.into_iter()
            .filter_map(|(key, value)| value.as_str().map(|s| (key, s.to_string())))
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use toolbridge_core::config::CatalogSettings;

    fn catalog(dir: &TempDir) -> ToolCatalogManager {
        ToolCatalogManager::new(CatalogSettings {
            catalog_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        })
    }

    #[test]
    fn test_action_parses_flat_wire_shape() {
        let action: McpAction = serde_json::from_value(json!({
            "action": "connect",
            "connection_id": "backend",
            "transport": "streamable_http",
            "server_url": "https://example.com/mcp",
            "headers": {"Authorization": "Bearer token"},
            "timeout": 5
        }))
        .unwrap();

        match action {
            McpAction::Connect {
                connection_id,
                transport,
                params,
            } => {
                assert_eq!(connection_id, "backend");
                assert_eq!(transport, TransportKind::StreamableHttp);
                assert_eq!(
                    params.server_url.as_deref(),
                    Some("https://example.com/mcp")
                );
                assert_eq!(params.timeout, Some(5));
            }
            _ => panic!("expected connect action"),
        }
    }

    #[test]
    fn test_action_transport_defaults_to_stdio() {
        let action: McpAction = serde_json::from_value(json!({
            "action": "connect",
            "connection_id": "backend",
            "command": "python3"
        }))
        .unwrap();

        match action {
            McpAction::Connect { transport, .. } => assert_eq!(transport, TransportKind::Stdio),
            _ => panic!("expected connect action"),
        }
    }

    #[test]
    fn test_unknown_action_fails_to_parse() {
        let result: Result<McpAction, _> =
            serde_json::from_value(json!({"action": "reticulate", "connection_id": "x"}));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_list_connections_empty() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(ConnectionRegistry::new());
        let catalog = catalog(&dir);

        let response = dispatch(
            McpAction::ListConnections,
            &registry,
            &catalog,
            None,
            &McpSettings::default(),
        )
        .await;

        assert!(response.is_success());
        let json = response.first_json().unwrap();
        assert_eq!(json["total_connections"], 0);
    }

    #[tokio::test]
    async fn test_connect_missing_command_is_error_envelope() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(ConnectionRegistry::new());
        let catalog = catalog(&dir);

        let action = McpAction::Connect {
            connection_id: "backend".to_string(),
            transport: TransportKind::Stdio,
            params: TransportParams::default(),
        };
        let response = dispatch(action, &registry, &catalog, None, &McpSettings::default()).await;

        assert!(response.is_error());
        assert!(response.first_text().unwrap().contains("command"));
        assert!(registry.list_connections().is_empty());
    }

    #[tokio::test]
    async fn test_load_tools_requires_agent_before_any_side_effect() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(ConnectionRegistry::new());
        let catalog = catalog(&dir);

        // Even with a nonexistent connection, the missing-agent validation
        // fires first and nothing is touched.
        let action = McpAction::LoadTools {
            connection_id: "ghost".to_string(),
            load_into_agent_registry: true,
        };
        let response = dispatch(action, &registry, &catalog, None, &McpSettings::default()).await;

        assert!(response.is_error());
        assert!(response.first_text().unwrap().contains("agent"));
        assert!(!catalog.catalog_path().exists());
    }

    #[tokio::test]
    async fn test_call_tool_unknown_connection() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(ConnectionRegistry::new());
        let catalog = catalog(&dir);

        let action = McpAction::CallTool {
            connection_id: "ghost".to_string(),
            tool_name: "echo".to_string(),
            tool_args: None,
            arguments: Some(json!({"text": "hi"})),
        };
        let response = dispatch(action, &registry, &catalog, None, &McpSettings::default()).await;

        assert!(response.is_error());
        assert!(response.first_text().unwrap().contains("ghost"));
    }

    #[tokio::test]
    async fn test_get_prompt_rejects_non_string_args() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(ConnectionRegistry::new());
        let catalog = catalog(&dir);

        let action = McpAction::GetPrompt {
            connection_id: "backend".to_string(),
            prompt_name: "greet".to_string(),
            prompt_args: Some(BTreeMap::from([
                ("name".to_string(), json!("Ada")),
                ("count".to_string(), json!(3)),
            ])),
        };
        let response = dispatch(action, &registry, &catalog, None, &McpSettings::default()).await;

        assert!(response.is_error());
        assert!(response.first_text().unwrap().contains("count"));
    }

    #[test]
    fn test_validate_prompt_args_converts_strings() {
        let args = BTreeMap::from([("name".to_string(), json!("Ada"))]);
        let converted = validate_prompt_args(Some(args)).unwrap().unwrap();
        assert_eq!(converted.get("name").map(String::as_str), Some("Ada"));

        assert!(validate_prompt_args(None).unwrap().is_none());
        assert!(validate_prompt_args(Some(BTreeMap::new())).unwrap().is_none());
    }
}
