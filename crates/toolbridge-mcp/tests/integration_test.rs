//! Integration tests for the connection registry against a live stdio
//! MCP server (a small python responder spawned per test).

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use toolbridge_catalog::ToolCatalogManager;
use toolbridge_core::config::{CatalogSettings, McpSettings};
use toolbridge_core::ToolRegistry;
use toolbridge_mcp::actions::{dispatch, McpAction};
use toolbridge_mcp::error::RegistryError;
use toolbridge_mcp::registry::ConnectionRegistry;
use toolbridge_mcp::transport::{TransportKind, TransportSpec};

const MOCK_SERVER: &str = r#"
import json, sys

def reply(rid, result):
    print(json.dumps({"jsonrpc": "2.0", "id": rid, "result": result}), flush=True)

def reply_error(rid, code, message):
    print(json.dumps({"jsonrpc": "2.0", "id": rid, "error": {"code": code, "message": message}}), flush=True)

for line in sys.stdin:
    line = line.strip()
    if not line:
        continue
    req = json.loads(line)
    rid = req.get("id")
    if rid is None:
        continue
    method = req.get("method")
    params = req.get("params") or {}
    if method == "initialize":
        reply(rid, {
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "mock-server", "version": "0.0.1"},
        })
    elif method == "tools/list":
        reply(rid, {"tools": [{
            "name": "echo",
            "description": "Echo the text argument back",
            "inputSchema": {
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"],
            },
        }]})
    elif method == "tools/call":
        if params.get("name") == "die":
            sys.exit(0)
        if params.get("name") != "echo":
            reply_error(rid, -32602, "unknown tool")
            continue
        text = (params.get("arguments") or {}).get("text", "")
        reply(rid, {"content": [{"type": "text", "text": text}], "isError": False})
    elif method == "prompts/list":
        reply(rid, {"prompts": [{"name": "greet", "description": "Greeting prompt"}]})
    elif method == "prompts/get":
        name = (params.get("arguments") or {}).get("name", "world")
        reply(rid, {"description": "greeting", "messages": [
            {"role": "user", "content": {"type": "text", "text": "Hello " + name}}
        ]})
    elif method == "resources/list":
        reply(rid, {"resources": [{"uri": "mock://hello", "name": "hello"}]})
    elif method == "resources/templates/list":
        reply(rid, {"resourceTemplates": [{"uriTemplate": "mock://{name}"}]})
    elif method == "resources/read":
        reply(rid, {"contents": [{"uri": params.get("uri", ""), "text": "hi"}]})
    else:
        reply_error(rid, -32601, "method not found")
"#;

struct Harness {
    _dir: TempDir,
    script: String,
    registry: Arc<ConnectionRegistry>,
    catalog: ToolCatalogManager,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let script = dir.path().join("mock_server.py");
        std::fs::write(&script, MOCK_SERVER).expect("write mock server");

        let catalog = ToolCatalogManager::new(CatalogSettings {
            catalog_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        });

        Self {
            script: script.to_string_lossy().into_owned(),
            _dir: dir,
            registry: Arc::new(ConnectionRegistry::new()),
            catalog,
        }
    }

    fn spec(&self) -> TransportSpec {
        TransportSpec::Stdio {
            command: "python3".to_string(),
            args: vec![self.script.clone()],
            env: HashMap::new(),
        }
    }
}

#[tokio::test]
async fn test_connect_list_and_disconnect() {
    let harness = Harness::new();

    let outcome = match harness.registry.connect("mock", harness.spec()).await {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("Could not spawn mock server (python3 missing?): {e}");
            return;
        }
    };

    assert_eq!(outcome.connection_id, "mock");
    assert_eq!(outcome.transport, TransportKind::Stdio);
    assert_eq!(outcome.available_tools, vec!["echo"]);

    // Exactly one entry, active.
    let connections = harness.registry.list_connections();
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0].connection_id, "mock");
    assert!(connections[0].is_active);

    // Re-connecting an active id is rejected regardless of parameters.
    let duplicate = harness.registry.connect("mock", harness.spec()).await;
    assert!(matches!(
        duplicate,
        Err(RegistryError::ConnectionExists(_))
    ));

    let disconnect = harness.registry.disconnect("mock", None).unwrap();
    assert!(disconnect.was_active);
    assert!(harness.registry.list_connections().is_empty());
}

#[tokio::test]
async fn test_load_tools_catalog_first_then_agent() {
    let harness = Harness::new();

    if let Err(e) = harness.registry.connect("mock", harness.spec()).await {
        eprintln!("Could not spawn mock server (python3 missing?): {e}");
        return;
    }

    let mut agent = ToolRegistry::new();

    // Catalog-only load never mutates the agent registry.
    let outcome = Arc::clone(&harness.registry)
        .load_tools("mock", &harness.catalog, Some(&mut agent), false)
        .await
        .expect("load_tools");
    assert_eq!(outcome.catalog_tools, vec!["echo"]);
    assert!(outcome.agent_loaded_tools.is_empty());
    assert!(agent.is_empty());

    let details = harness
        .catalog
        .get_tool_details("echo")
        .expect("catalog entry");
    assert_eq!(details.origin, "mcp:mock");
    assert_eq!(details.category, "mcp_tools");
    assert!(details
        .execute_pathway
        .as_deref()
        .unwrap()
        .contains("call_tool"));

    // Opt-in agent load wraps and registers each tool.
    let outcome = Arc::clone(&harness.registry)
        .load_tools("mock", &harness.catalog, Some(&mut agent), true)
        .await
        .expect("load_tools into agent");
    assert_eq!(outcome.agent_loaded_tools, vec!["echo"]);
    assert!(agent.contains("mcp__mock__echo"));

    let connections = harness.registry.list_connections();
    assert_eq!(connections[0].loaded_tools_count, 1);
    assert_eq!(connections[0].agent_loaded_tools_count, 1);

    // Disconnect cleans the agent registry but not the catalog.
    let disconnect = harness
        .registry
        .disconnect("mock", Some(&mut agent))
        .unwrap();
    assert_eq!(disconnect.cleaned_tools, vec!["echo"]);
    assert!(disconnect.failed_tools.is_empty());
    assert!(agent.is_empty());
    assert!(harness.catalog.get_tool_details("echo").is_some());
}

#[tokio::test]
async fn test_call_tool_round_trip() {
    let harness = Harness::new();

    if let Err(e) = harness.registry.connect("mock", harness.spec()).await {
        eprintln!("Could not spawn mock server (python3 missing?): {e}");
        return;
    }

    let result = harness
        .registry
        .call_tool("mock", "echo", Some(json!({"text": "round trip"})))
        .await
        .expect("call_tool");
    assert!(!result.is_error);
    assert_eq!(result.content[0].as_text(), Some("round trip"));

    // A name the session cannot call is rejected before the call.
    let missing = harness
        .registry
        .call_tool("mock", "not_a_tool", None)
        .await;
    assert!(matches!(
        missing,
        Err(RegistryError::ToolNotFound { .. })
    ));

    // Direct call_tool failures never downgrade the connection.
    assert!(harness.registry.list_connections()[0].is_active);
}

#[tokio::test]
async fn test_prompts_and_resources() {
    let harness = Harness::new();

    if let Err(e) = harness.registry.connect("mock", harness.spec()).await {
        eprintln!("Could not spawn mock server (python3 missing?): {e}");
        return;
    }

    let prompts = harness
        .registry
        .list_prompts("mock", None)
        .await
        .expect("list_prompts");
    assert_eq!(prompts.prompts[0].name, "greet");

    let prompt = harness
        .registry
        .get_prompt(
            "mock",
            "greet",
            Some(std::collections::BTreeMap::from([(
                "name".to_string(),
                "Ada".to_string(),
            )])),
        )
        .await
        .expect("get_prompt");
    assert!(prompt.messages.to_string().contains("Hello Ada"));

    let resources = harness
        .registry
        .list_resources("mock", None)
        .await
        .expect("list_resources");
    assert_eq!(resources.resources[0].uri, "mock://hello");

    let templates = harness
        .registry
        .list_resource_templates("mock", None)
        .await
        .expect("list_resource_templates");
    assert_eq!(templates.resource_templates[0].uri_template, "mock://{name}");

    let read = harness
        .registry
        .read_resource("mock", "mock://hello")
        .await
        .expect("read_resource");
    assert!(read.contents.to_string().contains("hi"));
}

#[tokio::test]
async fn test_failed_wrapped_tool_downgrades_connection() {
    use toolbridge_core::{Tool, ToolCall};
    use toolbridge_mcp::protocol::McpToolDefinition;
    use toolbridge_mcp::tools::RemoteTool;

    let harness = Harness::new();

    if let Err(e) = harness.registry.connect("mock", harness.spec()).await {
        eprintln!("Could not spawn mock server (python3 missing?): {e}");
        return;
    }

    // 'die' kills the server mid-call, so the invocation genuinely fails.
    let definition = McpToolDefinition {
        name: "die".to_string(),
        description: None,
        input_schema: json!({}),
    };
    let tool = RemoteTool::new("mock", definition, Arc::clone(&harness.registry));

    let call = ToolCall::new("call_1", tool.name(), json!({}));
    let response = tool.execute(&call).await.expect("adapter never errors");
    assert!(response.is_error());

    // The adapter path is the one place liveness is downgraded.
    let snapshot = &harness.registry.list_connections()[0];
    assert!(!snapshot.is_active);
    assert!(snapshot.last_error.is_some());

    // A later execute fails the liveness check up front, registry untouched.
    let response = tool.execute(&call).await.expect("adapter never errors");
    assert!(response.is_error());
    assert!(response.first_text().unwrap().contains("not active"));
}

#[tokio::test]
async fn test_action_dispatch_end_to_end() {
    let harness = Harness::new();
    let settings = McpSettings::default();

    let connect: McpAction = serde_json::from_value(json!({
        "action": "connect",
        "connection_id": "mock",
        "transport": "stdio",
        "command": "python3",
        "args": [harness.script.clone()],
    }))
    .expect("parse connect action");

    let response = dispatch(connect, &harness.registry, &harness.catalog, None, &settings).await;
    if response.is_error() {
        eprintln!(
            "Could not spawn mock server (python3 missing?): {:?}",
            response.first_text()
        );
        return;
    }
    assert_eq!(
        response.first_json().unwrap()["available_tools"][0],
        "echo"
    );

    let call: McpAction = serde_json::from_value(json!({
        "action": "call_tool",
        "connection_id": "mock",
        "tool_name": "echo",
        "tool_args": {"text": "via dispatch"},
    }))
    .expect("parse call action");

    let response = dispatch(call, &harness.registry, &harness.catalog, None, &settings).await;
    assert!(response.is_success());
    assert_eq!(response.first_text(), Some("via dispatch"));

    let disconnect: McpAction = serde_json::from_value(json!({
        "action": "disconnect",
        "connection_id": "mock",
    }))
    .expect("parse disconnect action");

    let response = dispatch(
        disconnect,
        &harness.registry,
        &harness.catalog,
        None,
        &settings,
    )
    .await;
    assert!(response.is_success());
    assert!(harness.registry.list_connections().is_empty());
}
