//! Catalog entry model and schema helpers.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Version of the persisted catalog document format.
pub const CATALOG_SCHEMA_VERSION: u32 = 2;

/// One discoverable tool, independent of live connection state.
///
/// Entries are keyed by `name` within the catalog file. Optional fields are
/// omitted from the serialized form so that upserts retain previously
/// recorded values for fields the new entry does not carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Unique tool name within the catalog.
    pub name: String,
    /// One-line description.
    #[serde(default)]
    pub description: String,
    /// Full JSON-schema-like input structure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    /// Flattened parameter-name to type map for quick display.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub input_summary: BTreeMap<String, String>,
    /// Stable fingerprint of the input schema for lightweight comparison.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema_hash: Option<String>,
    /// Filesystem origin, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Where this tool came from, e.g. `mcp:<connection_id>`.
    #[serde(default)]
    pub origin: String,
    /// Grouping key for overviews; defaults to the origin.
    #[serde(default)]
    pub category: String,
    /// Execution environment note; filled from settings when empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox_status: Option<String>,
    /// Timestamp of the last upsert touching this entry.
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
    /// Opaque hint telling a caller how to load this tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_pathway: Option<String>,
    /// Opaque hint telling a caller how to invoke this tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execute_pathway: Option<String>,
    /// Opaque hint telling a caller how to unload this tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unload_pathway: Option<String>,
    /// Availability marker for manifest-derived entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl CatalogEntry {
    /// Create a new entry with the given identity; category defaults to the
    /// origin.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        origin: impl Into<String>,
    ) -> Self {
        let origin = origin.into();
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: None,
            input_summary: BTreeMap::new(),
            input_schema_hash: None,
            path: None,
            category: origin.clone(),
            origin,
            sandbox_status: None,
            last_updated: Utc::now(),
            load_pathway: None,
            execute_pathway: None,
            unload_pathway: None,
            status: None,
        }
    }

    /// Attach the input schema, deriving the summary and fingerprint.
    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_summary = summarize_input_schema(&schema);
        self.input_schema_hash = schema_fingerprint(&schema);
        self.input_schema = Some(schema);
        self
    }

    /// Set the grouping category.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Set the filesystem origin.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Set the sandbox status.
    pub fn with_sandbox_status(mut self, status: impl Into<String>) -> Self {
        self.sandbox_status = Some(status.into());
        self
    }

    /// Set the load pathway hint.
    pub fn with_load_pathway(mut self, pathway: impl Into<String>) -> Self {
        self.load_pathway = Some(pathway.into());
        self
    }

    /// Set the execute pathway hint.
    pub fn with_execute_pathway(mut self, pathway: impl Into<String>) -> Self {
        self.execute_pathway = Some(pathway.into());
        self
    }

    /// Set the unload pathway hint.
    pub fn with_unload_pathway(mut self, pathway: impl Into<String>) -> Self {
        self.unload_pathway = Some(pathway.into());
        self
    }

    /// Fill pathway hints that were never recorded with name-derived
    /// defaults, so readers always get an invocable hint back.
    pub fn fill_pathway_defaults(&mut self) {
        if self.execute_pathway.is_none() {
            self.execute_pathway = Some(default_execute_pathway(&self.name, self.path.as_deref()));
        }
        if self.unload_pathway.is_none() {
            self.unload_pathway = Some(default_unload_pathway(&self.name));
        }
        if self.load_pathway.is_none() {
            self.load_pathway = Some("already_loaded".to_string());
        }
    }
}

/// Default execute pathway derived from the tool name.
pub fn default_execute_pathway(name: &str, path: Option<&str>) -> String {
    match path {
        Some(path) => format!(
            "tool_catalog(action='execute', name='{name}', arguments={{...}}, load_path='{path}')"
        ),
        None => format!("tool_catalog(action='execute', name='{name}', arguments={{...}})"),
    }
}

/// Default unload pathway derived from the tool name.
pub fn default_unload_pathway(name: &str) -> String {
    format!("tool_catalog(action='unload', name='{name}')")
}

/// Stable 12-hex-digit fingerprint of a schema for cheap change detection.
///
/// Returns `None` for null/absent schemas. Object keys serialize in sorted
/// order, so the fingerprint is independent of insertion order.
pub fn schema_fingerprint(schema: &Value) -> Option<String> {
    if schema.is_null() {
        return None;
    }
    let canonical = serde_json::to_string(schema).ok()?;
    let digest = Sha256::digest(canonical.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    Some(hex[..12].to_string())
}

/// Flatten a JSON-schema `properties` block into a name -> type map.
///
/// `anyOf` unions collapse to a `a | b` type string; properties without a
/// recognizable type map to `any`.
pub fn summarize_input_schema(schema: &Value) -> BTreeMap<String, String> {
    let mut summary = BTreeMap::new();

    // Some producers wrap the schema in a {"json": {...}} envelope.
    let schema = schema.get("json").unwrap_or(schema);

    let Some(props) = schema.get("properties").and_then(Value::as_object) else {
        return summary;
    };

    for (key, value) in props {
        let type_text = match value {
            Value::Object(map) => {
                if let Some(t) = map.get("type").and_then(Value::as_str) {
                    t.to_string()
                } else if let Some(variants) = map.get("anyOf").and_then(Value::as_array) {
                    variants
                        .iter()
                        .map(|item| {
                            item.get("type")
                                .and_then(Value::as_str)
                                .unwrap_or("any")
                                .to_string()
                        })
                        .collect::<Vec<_>>()
                        .join(" | ")
                } else {
                    "any".to_string()
                }
            }
            _ => "any".to_string(),
        };
        summary.insert(key.clone(), type_text);
    }

    summary
}
