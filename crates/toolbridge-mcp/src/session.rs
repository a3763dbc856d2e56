//! Scoped MCP sessions.
//!
//! A session is acquired immediately before a logical operation and released
//! immediately after, regardless of success. No session outlives one
//! operation: a hung remote endpoint can stall a single call, never leak a
//! dangling connection into later ones.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use crate::error::McpError;
use crate::protocol::{
    CallToolParams, CallToolResult, GetPromptParams, GetPromptResult, InitializeParams,
    InitializeResult, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ListParams,
    ListPromptsResult, ListResourceTemplatesResult, ListResourcesResult, ListToolsResult,
    McpToolDefinition, ReadResourceParams, ReadResourceResult,
};
use crate::transport::{Transport, TransportSpec};

/// A live, initialized session over one transport.
pub struct McpSession {
    transport: Box<dyn Transport>,
    request_counter: u64,
}

impl McpSession {
    /// Open the transport and run the initialize handshake.
    pub async fn open(spec: &TransportSpec) -> Result<Self, McpError> {
        let transport = spec.open().await?;
        let mut session = Self {
            transport,
            request_counter: 0,
        };

        let result: InitializeResult = session
            .request("initialize", Some(InitializeParams::default()))
            .await?;
        session
            .notify::<()>("notifications/initialized", None)
            .await?;

        debug!(
            server = %result.server_info.name,
            protocol_version = %result.protocol_version,
            "MCP session initialized"
        );

        Ok(session)
    }

    fn next_request_id(&mut self) -> u64 {
        self.request_counter += 1;
        self.request_counter
    }

    /// Send a request and wait for the matching response.
    async fn request<P, R>(&mut self, method: &str, params: Option<P>) -> Result<R, McpError>
    where
        P: serde::Serialize,
        R: serde::de::DeserializeOwned,
    {
        let id = self.next_request_id();
        let request = JsonRpcRequest::new(id, method, params);
        let request_json = serde_json::to_string(&request)?;

        self.transport.send(&request_json).await?;

        // Servers may interleave notifications; skip anything without an id.
        let response_json = loop {
            let line = self.transport.receive().await?;
            match serde_json::from_str::<Value>(&line) {
                Ok(value) if value.get("id").is_some() => break line,
                Ok(_) => continue,
                Err(e) => {
                    return Err(McpError::protocol(format!(
                        "failed to parse server message: {e}"
                    )))
                }
            }
        };

        let response: JsonRpcResponse<R> = serde_json::from_str(&response_json)
            .map_err(|e| McpError::protocol(format!("failed to parse response: {e}")))?;

        if let Some(error) = response.error {
            return Err(McpError::server_error(error.code, error.message));
        }

        response
            .result
            .ok_or_else(|| McpError::protocol("response missing result"))
    }

    /// Send a notification (no response expected).
    async fn notify<P>(&mut self, method: &str, params: Option<P>) -> Result<(), McpError>
    where
        P: serde::Serialize,
    {
        let notification = JsonRpcNotification::new(method, params);
        let notification_json = serde_json::to_string(&notification)?;
        self.transport.send(&notification_json).await?;
        Ok(())
    }

    /// List tools available on the server.
    pub async fn list_tools(&mut self) -> Result<Vec<McpToolDefinition>, McpError> {
        let result: ListToolsResult = self.request::<(), _>("tools/list", None).await?;
        Ok(result.tools)
    }

    /// Call a tool by name.
    pub async fn call_tool(
        &mut self,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<CallToolResult, McpError> {
        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };
        self.request("tools/call", Some(params)).await
    }

    /// List prompts, optionally continuing from a pagination cursor.
    pub async fn list_prompts(
        &mut self,
        cursor: Option<String>,
    ) -> Result<ListPromptsResult, McpError> {
        self.request("prompts/list", Some(ListParams { cursor }))
            .await
    }

    /// Retrieve a prompt, optionally with string-valued arguments.
    pub async fn get_prompt(
        &mut self,
        name: &str,
        arguments: Option<BTreeMap<String, String>>,
    ) -> Result<GetPromptResult, McpError> {
        let params = GetPromptParams {
            name: name.to_string(),
            arguments,
        };
        self.request("prompts/get", Some(params)).await
    }

    /// List resources, optionally continuing from a pagination cursor.
    pub async fn list_resources(
        &mut self,
        cursor: Option<String>,
    ) -> Result<ListResourcesResult, McpError> {
        self.request("resources/list", Some(ListParams { cursor }))
            .await
    }

    /// List resource templates.
    pub async fn list_resource_templates(
        &mut self,
        cursor: Option<String>,
    ) -> Result<ListResourceTemplatesResult, McpError> {
        self.request("resources/templates/list", Some(ListParams { cursor }))
            .await
    }

    /// Read a resource by URI.
    pub async fn read_resource(&mut self, uri: &str) -> Result<ReadResourceResult, McpError> {
        let params = ReadResourceParams {
            uri: uri.to_string(),
        };
        self.request("resources/read", Some(params)).await
    }

    /// Release the session, closing its transport.
    pub async fn close(mut self) -> Result<(), McpError> {
        self.transport.close().await?;
        Ok(())
    }
}
