//! Read-only discovery manifest.
//!
//! An externally-produced JSON file describing tools, MCP servers, and
//! OpenAPI specs that are discoverable but not yet loaded anywhere. The
//! manifest is only ever read; its content is merged transiently into
//! catalog overviews and detail lookups, never persisted into the catalog.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Discovery manifest document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscoveryManifest {
    /// Tools that can be loaded on demand.
    #[serde(default)]
    pub loadable_tools: Vec<LoadableTool>,
    /// Known MCP servers that can be connected to.
    #[serde(default)]
    pub mcp_servers: Vec<ManifestServer>,
    /// OpenAPI specs that can be turned into tool surfaces.
    #[serde(default)]
    pub openapi_specs: Vec<ManifestSpec>,
}

/// A not-yet-loaded tool described by the manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct LoadableTool {
    /// Tool name.
    pub name: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Input schema, if the producer recorded one.
    #[serde(default)]
    pub input_schema: Option<Value>,
    /// Filesystem origin.
    #[serde(default)]
    pub path: Option<String>,
    /// Grouping category; defaults to `loadable`.
    #[serde(default)]
    pub category: Option<String>,
    /// When the producer last refreshed this entry.
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    /// Command hint for loading the tool.
    #[serde(default)]
    pub load_command: Option<String>,
    /// Command hint for unloading the tool.
    #[serde(default)]
    pub unload_command: Option<String>,
}

/// An MCP server described by the manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestServer {
    /// Server identifier.
    pub id: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Filesystem origin.
    #[serde(default)]
    pub path: Option<String>,
    /// Command hint for connecting.
    #[serde(default)]
    pub connect_command: Option<String>,
}

/// An OpenAPI spec described by the manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestSpec {
    /// Spec name.
    pub name: String,
    /// Source file.
    #[serde(default)]
    pub file: Option<String>,
    /// Filesystem origin.
    #[serde(default)]
    pub path: Option<String>,
    /// Command hint for serving the spec as tools.
    #[serde(default)]
    pub mcp_command: Option<String>,
}

impl DiscoveryManifest {
    /// Load the manifest from disk, tolerating absence and malformed files.
    pub fn load(path: &Path) -> Option<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Discovery manifest not readable");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Failed to parse discovery manifest");
                None
            }
        }
    }

    /// Find a loadable tool by name.
    pub fn loadable_tool(&self, name: &str) -> Option<&LoadableTool> {
        self.loadable_tools.iter().find(|t| t.name == name)
    }

    /// Find an MCP server by id.
    pub fn server(&self, id: &str) -> Option<&ManifestServer> {
        self.mcp_servers.iter().find(|s| s.id == id)
    }

    /// Find an OpenAPI spec by name.
    pub fn spec(&self, name: &str) -> Option<&ManifestSpec> {
        self.openapi_specs.iter().find(|s| s.name == name)
    }
}
