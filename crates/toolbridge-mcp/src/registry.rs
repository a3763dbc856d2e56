//! The connection registry.
//!
//! Owns the mapping from caller-chosen connection ids to connection records.
//! All map access is serialized through one mutex, held only for the
//! duration of map reads and mutations, never across a remote call: an
//! in-flight `call_tool` owns its session outright, so a concurrent
//! `disconnect` can remove the record without invalidating the call (the
//! call still returns its result; the record is simply gone afterwards).

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use toolbridge_catalog::ToolCatalogManager;
use toolbridge_core::ToolRegistry;

use crate::error::RegistryError;
use crate::protocol::{
    CallToolResult, GetPromptResult, ListPromptsResult, ListResourceTemplatesResult,
    ListResourcesResult, ReadResourceResult,
};
use crate::session::McpSession;
use crate::tools::{self, RemoteTool};
use crate::transport::{TransportKind, TransportSpec};

/// One registered connection.
///
/// `agent_loaded_tool_names` is always a subset of `loaded_tool_names`;
/// both grow monotonically and only disappear with the record itself.
struct ConnectionInfo {
    spec: TransportSpec,
    url: String,
    register_time: DateTime<Utc>,
    is_active: bool,
    last_error: Option<String>,
    loaded_tool_names: BTreeSet<String>,
    agent_loaded_tool_names: BTreeSet<String>,
}

/// Read-only view of a connection, safe to hand to callers.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSnapshot {
    /// Caller-chosen connection id.
    pub connection_id: String,
    /// Transport kind, immutable after creation.
    pub transport: TransportKind,
    /// Human-readable summary of the endpoint or command.
    pub url: String,
    /// When the connection was registered.
    pub register_time: DateTime<Utc>,
    /// False after an adapter-path failure or explicit downgrade.
    pub is_active: bool,
    /// Last observed failure; sticky until overwritten.
    pub last_error: Option<String>,
    /// Number of tools registered into the catalog under this connection.
    pub loaded_tools_count: usize,
    /// Number of tools additionally injected into the agent registry.
    pub agent_loaded_tools_count: usize,
}

/// Result of a successful `connect`.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectOutcome {
    /// Connection id.
    pub connection_id: String,
    /// Transport kind.
    pub transport: TransportKind,
    /// Number of tools the probe discovered.
    pub tools_count: usize,
    /// Names of the discovered tools.
    pub available_tools: Vec<String>,
}

/// Result of a `disconnect`, including best-effort agent cleanup.
#[derive(Debug, Clone, Serialize)]
pub struct DisconnectOutcome {
    /// Connection id.
    pub connection_id: String,
    /// Whether the connection was still active when removed.
    pub was_active: bool,
    /// Whether catalog entries registered under this connection remain.
    pub catalog_tools_remain_discoverable: bool,
    /// Agent tools successfully unregistered.
    pub cleaned_tools: Vec<String>,
    /// Agent tools that could not be unregistered, with reasons.
    pub failed_tools: Vec<String>,
    /// Agent tools left behind because no agent registry was supplied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orphaned_agent_tools: Option<Vec<String>>,
}

/// Result of a `load_tools`.
#[derive(Debug, Clone, Serialize)]
pub struct LoadOutcome {
    /// Connection id.
    pub connection_id: String,
    /// Tool names upserted into the catalog by this call.
    pub catalog_tools: Vec<String>,
    /// (name, reason) pairs for catalog registration failures.
    pub catalog_failed: Vec<(String, String)>,
    /// Total catalog tools recorded for this connection so far.
    pub total_catalog_tools: usize,
    /// Tool names registered into the agent registry by this call.
    pub agent_loaded_tools: Vec<String>,
    /// Total agent-registered tools recorded for this connection so far.
    pub total_agent_loaded_tools: usize,
    /// Whether agent registration was requested.
    pub load_into_agent_registry: bool,
}

/// In-memory table of currently-open external sessions.
///
/// Constructor-owned: instantiate one per embedding context; tests can run
/// isolated registries in parallel.
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<String, ConnectionInfo>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Establish a connection under the given id.
    ///
    /// The transport is opened once for a `list_tools` probe so unreachable
    /// or misconfigured endpoints fail fast; nothing is stored on failure.
    /// Re-connecting an id that is currently active is rejected; an id whose
    /// connection was downgraded may be reconnected.
    pub async fn connect(
        &self,
        connection_id: &str,
        spec: TransportSpec,
    ) -> Result<ConnectOutcome, RegistryError> {
        if connection_id.is_empty() {
            return Err(RegistryError::Validation(
                "connection_id is required".to_string(),
            ));
        }

        {
            let connections = self.connections.lock();
            if connections
                .get(connection_id)
                .map(|info| info.is_active)
                .unwrap_or(false)
            {
                return Err(RegistryError::ConnectionExists(connection_id.to_string()));
            }
        }

        info!(
            connection_id,
            transport = %spec.kind(),
            "Connecting to MCP server"
        );

        let mut session = McpSession::open(&spec).await?;
        let tools = match session.list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                let _ = session.close().await;
                return Err(e.into());
            }
        };
        let _ = session.close().await;

        let available_tools: Vec<String> = tools.into_iter().map(|t| t.name).collect();
        let transport = spec.kind();
        let url = spec.describe();

        {
            let mut connections = self.connections.lock();
            connections.insert(
                connection_id.to_string(),
                ConnectionInfo {
                    spec,
                    url,
                    register_time: Utc::now(),
                    is_active: true,
                    last_error: None,
                    loaded_tool_names: BTreeSet::new(),
                    agent_loaded_tool_names: BTreeSet::new(),
                },
            );
        }

        info!(
            connection_id,
            tool_count = available_tools.len(),
            "Connected to MCP server"
        );

        Ok(ConnectOutcome {
            connection_id: connection_id.to_string(),
            transport,
            tools_count: available_tools.len(),
            available_tools,
        })
    }

    /// Remove a connection.
    ///
    /// When an agent registry is supplied, every agent-registered tool of
    /// this connection is unregistered best-effort: per-tool failures are
    /// reported but never abort the disconnect. Catalog entries registered
    /// under this connection remain discoverable.
    pub fn disconnect(
        &self,
        connection_id: &str,
        agent: Option<&mut ToolRegistry>,
    ) -> Result<DisconnectOutcome, RegistryError> {
        let info = self
            .connections
            .lock()
            .remove(connection_id)
            .ok_or_else(|| RegistryError::ConnectionNotFound(connection_id.to_string()))?;

        let agent_names: Vec<String> = info.agent_loaded_tool_names.iter().cloned().collect();
        let mut cleaned_tools = Vec::new();
        let mut failed_tools = Vec::new();
        let mut orphaned_agent_tools = None;

        match agent {
            Some(registry) if !agent_names.is_empty() => {
                for name in &agent_names {
                    let registered_name = tools::full_tool_name(connection_id, name);
                    if registry.unregister(&registered_name) {
                        cleaned_tools.push(name.clone());
                    } else {
                        failed_tools.push(format!("{name} (not registered)"));
                    }
                }
            }
            None if !agent_names.is_empty() => {
                warn!(
                    connection_id,
                    tool_count = agent_names.len(),
                    "No agent registry supplied, agent-registered tools were not cleaned up"
                );
                orphaned_agent_tools = Some(agent_names);
            }
            _ => {}
        }

        info!(connection_id, "Disconnected from MCP server");

        Ok(DisconnectOutcome {
            connection_id: connection_id.to_string(),
            was_active: info.is_active,
            catalog_tools_remain_discoverable: !info.loaded_tool_names.is_empty(),
            cleaned_tools,
            failed_tools,
            orphaned_agent_tools,
        })
    }

    /// Read-only snapshot of all connections, sorted by id.
    ///
    /// Transport handles are never exposed.
    pub fn list_connections(&self) -> Vec<ConnectionSnapshot> {
        let connections = self.connections.lock();
        let mut snapshots: Vec<ConnectionSnapshot> = connections
            .iter()
            .map(|(id, info)| ConnectionSnapshot {
                connection_id: id.clone(),
                transport: info.spec.kind(),
                url: info.url.clone(),
                register_time: info.register_time,
                is_active: info.is_active,
                last_error: info.last_error.clone(),
                loaded_tools_count: info.loaded_tool_names.len(),
                agent_loaded_tools_count: info.agent_loaded_tool_names.len(),
            })
            .collect();
        snapshots.sort_by(|a, b| a.connection_id.cmp(&b.connection_id));
        snapshots
    }

    /// Transport spec of an active connection, for per-call session opening.
    pub fn transport_spec(&self, connection_id: &str) -> Result<TransportSpec, RegistryError> {
        let connections = self.connections.lock();
        let info = connections
            .get(connection_id)
            .ok_or_else(|| RegistryError::ConnectionNotFound(connection_id.to_string()))?;
        if !info.is_active {
            return Err(RegistryError::ConnectionInactive(connection_id.to_string()));
        }
        Ok(info.spec.clone())
    }

    /// Downgrade a connection after an adapter-path failure.
    ///
    /// The flag never flips back; a failed connection must be explicitly
    /// reconnected. `last_error` is sticky until overwritten.
    pub fn mark_inactive(&self, connection_id: &str, error: impl Into<String>) {
        let mut connections = self.connections.lock();
        if let Some(info) = connections.get_mut(connection_id) {
            info.is_active = false;
            info.last_error = Some(error.into());
            warn!(connection_id, "Connection marked inactive");
        }
    }

    async fn open_session(&self, connection_id: &str) -> Result<McpSession, RegistryError> {
        let spec = self.transport_spec(connection_id)?;
        Ok(McpSession::open(&spec).await?)
    }

    /// List tools from the live connection (fresh truth, not cached).
    pub async fn list_tools(
        &self,
        connection_id: &str,
    ) -> Result<Vec<crate::protocol::McpToolDefinition>, RegistryError> {
        let mut session = self.open_session(connection_id).await?;
        let result = session.list_tools().await;
        let _ = session.close().await;
        Ok(result?)
    }

    /// Forward a tool call over a per-call session.
    ///
    /// Errors surface to the caller without downgrading the connection;
    /// only the adapter path (a loaded tool blowing up) flips `is_active`.
    pub async fn call_tool(
        &self,
        connection_id: &str,
        tool_name: &str,
        arguments: Option<Value>,
    ) -> Result<CallToolResult, RegistryError> {
        if tool_name.is_empty() {
            return Err(RegistryError::Validation(
                "tool_name is required".to_string(),
            ));
        }

        let mut session = self.open_session(connection_id).await?;

        let tools = match session.list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                let _ = session.close().await;
                return Err(e.into());
            }
        };
        if !tools.iter().any(|t| t.name == tool_name) {
            let _ = session.close().await;
            return Err(RegistryError::ToolNotFound {
                connection_id: connection_id.to_string(),
                tool_name: tool_name.to_string(),
            });
        }

        let result = session.call_tool(tool_name, arguments).await;
        let _ = session.close().await;
        Ok(result?)
    }

    /// Re-list tools from the live connection, upsert catalog entries, and
    /// optionally wrap and register each tool into the agent registry.
    ///
    /// Requesting agent registration without supplying an agent registry
    /// fails validation before any side effect.
    pub async fn load_tools(
        self: Arc<Self>,
        connection_id: &str,
        catalog: &ToolCatalogManager,
        mut agent: Option<&mut ToolRegistry>,
        load_into_agent_registry: bool,
    ) -> Result<LoadOutcome, RegistryError> {
        if load_into_agent_registry && agent.is_none() {
            return Err(RegistryError::Validation(
                "an agent tool registry is required when load_into_agent_registry is true"
                    .to_string(),
            ));
        }

        let mut session = self.open_session(connection_id).await?;
        let tools = match session.list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                let _ = session.close().await;
                return Err(e.into());
            }
        };
        let _ = session.close().await;

        let entries = tools::catalog_entries_for(connection_id, &tools);
        let catalog_outcome = catalog.register_tools(entries)?;

        let mut agent_loaded_tools = Vec::new();
        if load_into_agent_registry {
            if let Some(registry) = agent.as_deref_mut() {
                for definition in &tools {
                    if definition.name.is_empty() {
                        continue;
                    }
                    debug!(
                        connection_id,
                        tool = %definition.name,
                        "Registering remote tool into agent registry"
                    );
                    let wrapper =
                        RemoteTool::new(connection_id, definition.clone(), Arc::clone(&self));
                    registry.register(Arc::new(wrapper));
                    agent_loaded_tools.push(definition.name.clone());
                }
            }
        }

        let (total_catalog_tools, total_agent_loaded_tools) = self.record_loaded(
            connection_id,
            &catalog_outcome.registered,
            &agent_loaded_tools,
        );

        Ok(LoadOutcome {
            connection_id: connection_id.to_string(),
            catalog_tools: catalog_outcome.registered,
            catalog_failed: catalog_outcome.failed,
            total_catalog_tools,
            agent_loaded_tools,
            total_agent_loaded_tools,
            load_into_agent_registry,
        })
    }

    /// Record loaded tool names against the connection.
    ///
    /// Agent names are inserted into the catalog set as well, keeping the
    /// subset invariant by construction. Returns the new set sizes; if the
    /// record vanished concurrently the batch sizes are reported instead.
    fn record_loaded(
        &self,
        connection_id: &str,
        catalog_names: &[String],
        agent_names: &[String],
    ) -> (usize, usize) {
        let mut connections = self.connections.lock();
        match connections.get_mut(connection_id) {
            Some(info) => {
                info.loaded_tool_names
                    .extend(catalog_names.iter().cloned());
                info.loaded_tool_names.extend(agent_names.iter().cloned());
                info.agent_loaded_tool_names
                    .extend(agent_names.iter().cloned());
                (
                    info.loaded_tool_names.len(),
                    info.agent_loaded_tool_names.len(),
                )
            }
            None => (catalog_names.len(), agent_names.len()),
        }
    }

    /// List prompts from the connection.
    pub async fn list_prompts(
        &self,
        connection_id: &str,
        cursor: Option<String>,
    ) -> Result<ListPromptsResult, RegistryError> {
        let mut session = self.open_session(connection_id).await?;
        let result = session.list_prompts(cursor).await;
        let _ = session.close().await;
        Ok(result?)
    }

    /// Retrieve a prompt from the connection.
    pub async fn get_prompt(
        &self,
        connection_id: &str,
        prompt_name: &str,
        arguments: Option<std::collections::BTreeMap<String, String>>,
    ) -> Result<GetPromptResult, RegistryError> {
        let mut session = self.open_session(connection_id).await?;
        let result = session.get_prompt(prompt_name, arguments).await;
        let _ = session.close().await;
        Ok(result?)
    }

    /// List resources from the connection.
    pub async fn list_resources(
        &self,
        connection_id: &str,
        cursor: Option<String>,
    ) -> Result<ListResourcesResult, RegistryError> {
        let mut session = self.open_session(connection_id).await?;
        let result = session.list_resources(cursor).await;
        let _ = session.close().await;
        Ok(result?)
    }

    /// List resource templates from the connection.
    pub async fn list_resource_templates(
        &self,
        connection_id: &str,
        cursor: Option<String>,
    ) -> Result<ListResourceTemplatesResult, RegistryError> {
        let mut session = self.open_session(connection_id).await?;
        let result = session.list_resource_templates(cursor).await;
        let _ = session.close().await;
        Ok(result?)
    }

    /// Read a resource by URI from the connection.
    pub async fn read_resource(
        &self,
        connection_id: &str,
        resource_uri: &str,
    ) -> Result<ReadResourceResult, RegistryError> {
        let mut session = self.open_session(connection_id).await?;
        let result = session.read_resource(resource_uri).await;
        let _ = session.close().await;
        Ok(result?)
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stdio_spec(command: &str) -> TransportSpec {
        TransportSpec::Stdio {
            command: command.to_string(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    impl ConnectionRegistry {
        fn insert_test_connection(&self, id: &str, is_active: bool) {
            self.connections.lock().insert(
                id.to_string(),
                ConnectionInfo {
                    spec: stdio_spec("true"),
                    url: "true".to_string(),
                    register_time: Utc::now(),
                    is_active,
                    last_error: None,
                    loaded_tool_names: BTreeSet::new(),
                    agent_loaded_tool_names: BTreeSet::new(),
                },
            );
        }

        fn set_loaded(&self, id: &str, catalog: &[&str], agent: &[&str]) {
            let mut connections = self.connections.lock();
            let info = connections.get_mut(id).unwrap();
            info.loaded_tool_names = catalog.iter().map(|s| s.to_string()).collect();
            info.agent_loaded_tool_names = agent.iter().map(|s| s.to_string()).collect();
        }
    }

    #[test]
    fn test_new_registry_is_empty() {
        let registry = ConnectionRegistry::new();
        assert!(registry.list_connections().is_empty());
    }

    #[tokio::test]
    async fn test_connect_rejects_active_duplicate() {
        let registry = ConnectionRegistry::new();
        registry.insert_test_connection("backend", true);

        // The duplicate check fires before any transport is opened: the
        // spec's command does not exist, yet the error is ConnectionExists.
        let result = registry
            .connect("backend", stdio_spec("/nonexistent/command"))
            .await;
        assert!(matches!(result, Err(RegistryError::ConnectionExists(_))));
    }

    #[tokio::test]
    async fn test_connect_failure_stores_nothing() {
        let registry = ConnectionRegistry::new();

        let result = registry
            .connect("broken", stdio_spec("/nonexistent/command"))
            .await;
        assert!(result.is_err());
        assert!(registry.list_connections().is_empty());
    }

    #[tokio::test]
    async fn test_inactive_id_may_be_reconnected() {
        let registry = ConnectionRegistry::new();
        registry.insert_test_connection("backend", false);

        // Not rejected as a duplicate; it proceeds to the probe and fails
        // on the unreachable command instead.
        let result = registry
            .connect("backend", stdio_spec("/nonexistent/command"))
            .await;
        assert!(matches!(result, Err(RegistryError::Mcp(_))));
    }

    #[tokio::test]
    async fn test_connect_requires_id() {
        let registry = ConnectionRegistry::new();
        let result = registry.connect("", stdio_spec("true")).await;
        assert!(matches!(result, Err(RegistryError::Validation(_))));
    }

    #[test]
    fn test_transport_spec_lookup_errors() {
        let registry = ConnectionRegistry::new();
        assert!(matches!(
            registry.transport_spec("missing"),
            Err(RegistryError::ConnectionNotFound(_))
        ));

        registry.insert_test_connection("down", false);
        assert!(matches!(
            registry.transport_spec("down"),
            Err(RegistryError::ConnectionInactive(_))
        ));

        registry.insert_test_connection("up", true);
        assert!(registry.transport_spec("up").is_ok());
    }

    #[test]
    fn test_mark_inactive_is_sticky() {
        let registry = ConnectionRegistry::new();
        registry.insert_test_connection("backend", true);

        registry.mark_inactive("backend", "boom");

        let snapshot = &registry.list_connections()[0];
        assert!(!snapshot.is_active);
        assert_eq!(snapshot.last_error.as_deref(), Some("boom"));

        // Unknown ids are ignored.
        registry.mark_inactive("ghost", "boom");
    }

    #[tokio::test]
    async fn test_call_tool_requires_active_connection() {
        let registry = ConnectionRegistry::new();

        let result = registry.call_tool("missing", "echo", None).await;
        assert!(matches!(
            result,
            Err(RegistryError::ConnectionNotFound(_))
        ));

        registry.insert_test_connection("down", false);
        let result = registry.call_tool("down", "echo", None).await;
        assert!(matches!(result, Err(RegistryError::ConnectionInactive(_))));

        registry.insert_test_connection("up", true);
        let result = registry.call_tool("up", "", None).await;
        assert!(matches!(result, Err(RegistryError::Validation(_))));
    }

    #[test]
    fn test_disconnect_missing_connection() {
        let registry = ConnectionRegistry::new();
        let result = registry.disconnect("missing", None);
        assert!(matches!(
            result,
            Err(RegistryError::ConnectionNotFound(_))
        ));
    }

    #[test]
    fn test_disconnect_cleans_agent_tools_best_effort() {
        let registry = Arc::new(ConnectionRegistry::new());
        registry.insert_test_connection("backend", true);
        registry.set_loaded("backend", &["alpha", "beta"], &["alpha", "beta"]);

        // Only alpha is actually present in the agent registry.
        let mut agent = ToolRegistry::new();
        let definition = crate::protocol::McpToolDefinition {
            name: "alpha".to_string(),
            description: None,
            input_schema: serde_json::json!({}),
        };
        agent.register(Arc::new(RemoteTool::new(
            "backend",
            definition,
            Arc::clone(&registry),
        )));

        let outcome = registry.disconnect("backend", Some(&mut agent)).unwrap();

        assert!(outcome.was_active);
        assert!(outcome.catalog_tools_remain_discoverable);
        assert_eq!(outcome.cleaned_tools, vec!["alpha"]);
        assert_eq!(outcome.failed_tools.len(), 1);
        assert!(outcome.failed_tools[0].contains("beta"));
        assert!(registry.list_connections().is_empty());
        assert!(agent.is_empty());
    }

    #[test]
    fn test_disconnect_without_agent_reports_orphans() {
        let registry = ConnectionRegistry::new();
        registry.insert_test_connection("backend", true);
        registry.set_loaded("backend", &["alpha"], &["alpha"]);

        let outcome = registry.disconnect("backend", None).unwrap();
        assert_eq!(
            outcome.orphaned_agent_tools,
            Some(vec!["alpha".to_string()])
        );
    }

    #[test]
    fn test_record_loaded_keeps_subset_invariant() {
        let registry = ConnectionRegistry::new();
        registry.insert_test_connection("backend", true);

        let catalog = vec!["a".to_string(), "b".to_string()];
        let agent = vec!["b".to_string(), "c".to_string()];
        let (total_catalog, total_agent) = registry.record_loaded("backend", &catalog, &agent);

        // Agent names are folded into the catalog set, so the agent set is
        // a subset by construction.
        assert_eq!(total_catalog, 3);
        assert_eq!(total_agent, 2);

        let connections = registry.connections.lock();
        let info = connections.get("backend").unwrap();
        assert!(info
            .agent_loaded_tool_names
            .is_subset(&info.loaded_tool_names));
    }

    #[test]
    fn test_snapshot_counts() {
        let registry = ConnectionRegistry::new();
        registry.insert_test_connection("backend", true);
        registry.set_loaded("backend", &["a", "b", "c"], &["a"]);

        let snapshot = &registry.list_connections()[0];
        assert_eq!(snapshot.loaded_tools_count, 3);
        assert_eq!(snapshot.agent_loaded_tools_count, 1);
        assert_eq!(snapshot.transport, TransportKind::Stdio);
    }
}
