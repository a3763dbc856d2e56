//! The `tool_catalog` action surface.
//!
//! One closed set of operations over the catalog and the agent tool
//! registry: discover, inspect, execute (single or parallel batch), and
//! unload. Every outcome is converted to the response envelope; nothing
//! escapes as an error value.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use toolbridge_core::{Tool, ToolCall, ToolRegistry, ToolResponse};

use crate::manager::ToolCatalogManager;

/// Upper bound on concurrently executing batch invocations.
pub const MAX_PARALLEL_EXECUTIONS: usize = 4;

/// One invocation inside a batch execute.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolInvocation {
    /// Tool name.
    pub name: String,
    /// Arguments to pass.
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// Operations supported by the catalog surface.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CatalogAction {
    /// Return all categories with their tool names and counts.
    ListCategories,
    /// Return full details for one tool.
    GetTool {
        /// Tool name.
        name: String,
    },
    /// Execute one tool, or a batch of tools in parallel.
    Execute {
        /// Tool name for a single execution.
        #[serde(default)]
        name: Option<String>,
        /// Arguments for a single execution.
        #[serde(default)]
        arguments: Option<Value>,
        /// Batch of invocations; takes precedence over `name`.
        #[serde(default)]
        tools: Option<Vec<ToolInvocation>>,
    },
    /// Report how a catalog-registered tool can be loaded.
    Load {
        /// Tool name.
        name: String,
    },
    /// Remove a loaded tool from the agent registry.
    Unload {
        /// Tool name.
        name: String,
    },
}

/// Dispatch a catalog action, converting every outcome to the envelope.
pub async fn dispatch(
    action: CatalogAction,
    catalog: &ToolCatalogManager,
    registry: &mut ToolRegistry,
) -> ToolResponse {
    match action {
        CatalogAction::ListCategories => {
            let overview = catalog.build_catalog_overview();
            match serde_json::to_value(&overview) {
                Ok(json) => ToolResponse::success_with(
                    format!("Catalog has {} categories", overview.categories.len()),
                    json,
                ),
                Err(e) => ToolResponse::error(format!("Failed to render overview: {e}")),
            }
        }

        CatalogAction::GetTool { name } => match catalog.get_tool_details(&name) {
            Some(details) => match serde_json::to_value(&details) {
                Ok(json) => ToolResponse::success_with(format!("Tool details for '{name}'"), json),
                Err(e) => ToolResponse::error(format!("Failed to render tool details: {e}")),
            },
            None => ToolResponse::error(format!("Tool not found: {name}")),
        },

        CatalogAction::Execute {
            name,
            arguments,
            tools,
        } => execute(name, arguments, tools, catalog, registry).await,

        CatalogAction::Load { name } => load(&name, catalog, registry),

        CatalogAction::Unload { name } => {
            if registry.unregister(&name) {
                debug!(tool = %name, "Unloaded tool from agent registry");
                ToolResponse::success(format!("Unloaded tool: {name}"))
            } else {
                ToolResponse::error(format!("Tool not registered: {name}"))
            }
        }
    }
}

fn load(name: &str, catalog: &ToolCatalogManager, registry: &ToolRegistry) -> ToolResponse {
    if registry.contains(name) {
        return ToolResponse::success(format!("Tool already loaded: {name}"));
    }

    match catalog.get_tool_details(name) {
        Some(details) => {
            let pathway = details
                .load_pathway
                .clone()
                .unwrap_or_else(|| "already_loaded".to_string());
            ToolResponse::success_with(
                format!("Tool '{name}' loads via: {pathway}"),
                json!({"name": name, "load_pathway": pathway}),
            )
        }
        None => ToolResponse::error(format!("Tool not found: {name}")),
    }
}

async fn execute(
    name: Option<String>,
    arguments: Option<Value>,
    tools: Option<Vec<ToolInvocation>>,
    catalog: &ToolCatalogManager,
    registry: &ToolRegistry,
) -> ToolResponse {
    let invocations: Vec<ToolInvocation> = match (tools, name) {
        (Some(tools), _) if !tools.is_empty() => tools,
        (_, Some(name)) => vec![ToolInvocation { name, arguments }],
        _ => return ToolResponse::error("execute requires name or tools list"),
    };

    // Resolve every tool up front so a bad name fails before any execution.
    let mut resolved: Vec<(String, Arc<dyn Tool>, Value)> = Vec::with_capacity(invocations.len());
    for invocation in invocations {
        let Some(tool) = registry.get(&invocation.name) else {
            let hint = catalog
                .get_tool_details(&invocation.name)
                .and_then(|details| details.load_pathway)
                .map(|pathway| format!(" (loads via: {pathway})"))
                .unwrap_or_default();
            return ToolResponse::error(format!(
                "Tool not loaded: {}{hint}",
                invocation.name
            ));
        };
        resolved.push((
            invocation.name,
            tool,
            invocation.arguments.unwrap_or_else(|| json!({})),
        ));
    }

    // Single tool: run inline and hand back its own envelope.
    if resolved.len() == 1 {
        let (name, tool, arguments) = resolved.remove(0);
        let call = ToolCall::new(Uuid::new_v4().to_string(), &name, arguments);
        return match tool.execute(&call).await {
            Ok(response) => response,
            Err(e) => ToolResponse::error(format!("{name}: {e}")),
        };
    }

    // Batch: bounded fan-out, results collected in completion order.
    let results: Vec<Value> = stream::iter(resolved)
        .map(|(name, tool, arguments)| async move {
            let call = ToolCall::new(Uuid::new_v4().to_string(), &name, arguments);
            match tool.execute(&call).await {
                Ok(response) => json!({"name": name, "result": response}),
                Err(e) => json!({"name": name, "error": e.to_string()}),
            }
        })
        .buffer_unordered(MAX_PARALLEL_EXECUTIONS)
        .collect()
        .await;

    ToolResponse::success_with(
        format!("Executed {} tools", results.len()),
        Value::Array(results),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tempfile::TempDir;
    use toolbridge_core::config::CatalogSettings;
    use toolbridge_core::{ToolDefinition, ToolError};

    use crate::entry::CatalogEntry;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new("echo", "Echo arguments back")
        }

        async fn execute(&self, call: &ToolCall) -> Result<ToolResponse, ToolError> {
            Ok(ToolResponse::success_with(
                "echoed",
                call.arguments.clone(),
            ))
        }
    }

    struct NamedTool(String);

    #[async_trait]
    impl Tool for NamedTool {
        fn name(&self) -> &str {
            &self.0
        }

        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new(&self.0, "")
        }

        async fn execute(&self, _call: &ToolCall) -> Result<ToolResponse, ToolError> {
            Ok(ToolResponse::success(self.0.clone()))
        }
    }

    fn catalog(dir: &TempDir) -> ToolCatalogManager {
        ToolCatalogManager::new(CatalogSettings {
            catalog_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_list_categories_envelope() {
        let dir = TempDir::new().unwrap();
        let catalog = catalog(&dir);
        catalog
            .register_entry(CatalogEntry::new("lookup", "", "built_in"))
            .unwrap();

        let mut registry = ToolRegistry::new();
        let response = dispatch(CatalogAction::ListCategories, &catalog, &mut registry).await;

        assert!(response.is_success());
        let json = response.first_json().unwrap();
        assert!(json["categories"].is_array());
    }

    #[tokio::test]
    async fn test_get_tool_unknown_is_error() {
        let dir = TempDir::new().unwrap();
        let catalog = catalog(&dir);
        let mut registry = ToolRegistry::new();

        let response = dispatch(
            CatalogAction::GetTool {
                name: "ghost".to_string(),
            },
            &catalog,
            &mut registry,
        )
        .await;

        assert!(response.is_error());
        assert!(response.first_text().unwrap().contains("ghost"));
    }

    #[tokio::test]
    async fn test_execute_single_returns_tool_envelope() {
        let dir = TempDir::new().unwrap();
        let catalog = catalog(&dir);
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));

        let response = dispatch(
            CatalogAction::Execute {
                name: Some("echo".to_string()),
                arguments: Some(json!({"text": "hi"})),
                tools: None,
            },
            &catalog,
            &mut registry,
        )
        .await;

        assert!(response.is_success());
        assert_eq!(response.first_json().unwrap()["text"], "hi");
    }

    #[tokio::test]
    async fn test_execute_batch_collects_all_results() {
        let dir = TempDir::new().unwrap();
        let catalog = catalog(&dir);
        let mut registry = ToolRegistry::new();
        for name in ["a", "b", "c", "d", "e", "f"] {
            registry.register(Arc::new(NamedTool(name.to_string())));
        }

        let tools = ["a", "b", "c", "d", "e", "f"]
            .iter()
            .map(|name| ToolInvocation {
                name: name.to_string(),
                arguments: None,
            })
            .collect();

        let response = dispatch(
            CatalogAction::Execute {
                name: None,
                arguments: None,
                tools: Some(tools),
            },
            &catalog,
            &mut registry,
        )
        .await;

        assert!(response.is_success());
        let results = response.first_json().unwrap().as_array().unwrap();
        assert_eq!(results.len(), 6);

        let mut names: Vec<&str> = results
            .iter()
            .map(|r| r["name"].as_str().unwrap())
            .collect();
        names.sort_unstable();
        assert_eq!(names, vec!["a", "b", "c", "d", "e", "f"]);
    }

    #[tokio::test]
    async fn test_execute_unloaded_tool_reports_pathway_hint() {
        let dir = TempDir::new().unwrap();
        let catalog = catalog(&dir);
        catalog
            .register_entry(
                CatalogEntry::new("remote_lookup", "", "mcp:conn")
                    .with_load_pathway("mcp_client(action='load_tools', connection_id='conn')"),
            )
            .unwrap();

        let mut registry = ToolRegistry::new();
        let response = dispatch(
            CatalogAction::Execute {
                name: Some("remote_lookup".to_string()),
                arguments: None,
                tools: None,
            },
            &catalog,
            &mut registry,
        )
        .await;

        assert!(response.is_error());
        let text = response.first_text().unwrap();
        assert!(text.contains("remote_lookup"));
        assert!(text.contains("load_tools"));
    }

    #[tokio::test]
    async fn test_unload_removes_from_registry() {
        let dir = TempDir::new().unwrap();
        let catalog = catalog(&dir);
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));

        let response = dispatch(
            CatalogAction::Unload {
                name: "echo".to_string(),
            },
            &catalog,
            &mut registry,
        )
        .await;

        assert!(response.is_success());
        assert!(!registry.contains("echo"));

        let again = dispatch(
            CatalogAction::Unload {
                name: "echo".to_string(),
            },
            &catalog,
            &mut registry,
        )
        .await;
        assert!(again.is_error());
    }

    #[test]
    fn test_action_parses_from_wire_shape() {
        let action: CatalogAction = serde_json::from_value(json!({
            "action": "execute",
            "tools": [{"name": "a"}, {"name": "b", "arguments": {"x": 1}}]
        }))
        .unwrap();

        match action {
            CatalogAction::Execute { tools, .. } => {
                assert_eq!(tools.unwrap().len(), 2);
            }
            _ => panic!("expected execute action"),
        }
    }
}
