//! Tool catalog persistence and query operations.
//!
//! The catalog is a durable JSON document describing every tool the system
//! can discuss, independent of current process state. Removing a live
//! connection removes nothing here; entries only disappear through an
//! explicit `remove_tools`.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use toolbridge_core::config::CatalogSettings;

use crate::entry::{default_unload_pathway, CatalogEntry, CATALOG_SCHEMA_VERSION};
use crate::manifest::DiscoveryManifest;
use crate::markdown;

static CATEGORY_LABELS: Lazy<BTreeMap<&'static str, &'static str>> = Lazy::new(|| {
    BTreeMap::from([
        ("built_in", "Built-in Tools"),
        ("dynamically_loaded", "Dynamically Loaded Tools"),
        ("mcp_tools", "MCP Tools"),
        ("custom", "Custom Tools"),
        ("mcp_servers", "MCP Servers"),
        ("openapi_specs", "OpenAPI Specs"),
    ])
});

/// Errors that can occur during catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// IO error reading or writing the catalog file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An entry was submitted without a name.
    #[error("catalog entry has no name")]
    MissingName,
}

/// The persisted catalog document.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CatalogDocument {
    schema_version: u32,
    generated_at: DateTime<Utc>,
    tools: Vec<Value>,
}

impl CatalogDocument {
    fn empty() -> Self {
        Self {
            schema_version: CATALOG_SCHEMA_VERSION,
            generated_at: Utc::now(),
            tools: Vec::new(),
        }
    }
}

/// Outcome of a batch registration.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegisterOutcome {
    /// Names successfully upserted.
    pub registered: Vec<String>,
    /// (name, reason) pairs for entries that could not be registered.
    pub failed: Vec<(String, String)>,
}

/// Category summary inside an overview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryOverview {
    /// Category identifier.
    pub id: String,
    /// Human-readable label.
    pub label: String,
    /// Sorted, de-duplicated tool names.
    pub tools: Vec<String>,
    /// Number of tools.
    pub count: usize,
}

/// Summary of everything the catalog (plus manifest) can discuss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogOverview {
    /// When this overview was computed. Identical timestamps across two
    /// reads prove the cache was reused.
    pub generated_at: DateTime<Utc>,
    /// Categories in configured order.
    pub categories: Vec<CategoryOverview>,
}

struct OverviewCache {
    overview: CatalogOverview,
    stored_at: Instant,
}

/// Manages the tool catalog stored on disk.
pub struct ToolCatalogManager {
    catalog_path: PathBuf,
    markdown_path: PathBuf,
    settings: CatalogSettings,
    cache_ttl: Duration,
    cache: Mutex<Option<OverviewCache>>,
}

impl ToolCatalogManager {
    /// Create a manager from catalog settings.
    pub fn new(settings: CatalogSettings) -> Self {
        let catalog_path = settings.resolve_catalog_path();
        let markdown_path = catalog_path.with_extension("md");
        let cache_ttl = settings.overview_cache_ttl();
        Self {
            catalog_path,
            markdown_path,
            settings,
            cache_ttl,
            cache: Mutex::new(None),
        }
    }

    /// Path of the persisted JSON document.
    pub fn catalog_path(&self) -> &PathBuf {
        &self.catalog_path
    }

    /// Path of the derived Markdown rendering.
    pub fn markdown_path(&self) -> &PathBuf {
        &self.markdown_path
    }

    fn load_document(&self) -> CatalogDocument {
        if !self.catalog_path.exists() {
            return CatalogDocument::empty();
        }
        match fs::read_to_string(&self.catalog_path)
            .map_err(CatalogError::from)
            .and_then(|raw| serde_json::from_str(&raw).map_err(CatalogError::from))
        {
            Ok(document) => document,
            Err(e) => {
                warn!(
                    path = %self.catalog_path.display(),
                    error = %e,
                    "Failed to read tool catalog, starting fresh"
                );
                CatalogDocument::empty()
            }
        }
    }

    fn write_document(&self, mut document: CatalogDocument) -> Result<(), CatalogError> {
        document.schema_version = CATALOG_SCHEMA_VERSION;
        document.generated_at = Utc::now();

        if let Some(parent) = self.catalog_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(
            &self.catalog_path,
            serde_json::to_string_pretty(&document)?,
        )?;

        if self.settings.write_markdown {
            fs::write(
                &self.markdown_path,
                markdown::render(document.generated_at, &document.tools),
            )?;
        }

        // Any write makes the cached overview stale.
        self.invalidate_cache();
        Ok(())
    }

    fn entry_to_value(&self, mut entry: CatalogEntry) -> Result<Value, CatalogError> {
        if entry.name.is_empty() {
            return Err(CatalogError::MissingName);
        }
        if entry.sandbox_status.is_none() {
            entry.sandbox_status = Some(self.settings.sandbox_status.clone());
        }
        entry.last_updated = Utc::now();
        Ok(serde_json::to_value(entry)?)
    }

    /// Merge `incoming` over the existing object in place: present fields
    /// overwrite, omitted fields are retained.
    fn merge_into(existing: &mut Value, incoming: Value) {
        match (existing.as_object_mut(), incoming) {
            (Some(target), Value::Object(source)) => {
                for (key, value) in source {
                    target.insert(key, value);
                }
            }
            (_, incoming) => *existing = incoming,
        }
    }

    fn upsert_value(tools: &mut Vec<Value>, incoming: Value) {
        let name = incoming.get("name").and_then(Value::as_str);
        let position = tools
            .iter()
            .position(|item| item.get("name").and_then(Value::as_str) == name);

        match position {
            Some(index) => Self::merge_into(&mut tools[index], incoming),
            None => tools.push(incoming),
        }
    }

    /// Upsert a single entry by name.
    pub fn register_entry(&self, entry: CatalogEntry) -> Result<(), CatalogError> {
        let incoming = self.entry_to_value(entry)?;
        let mut document = self.load_document();
        Self::upsert_value(&mut document.tools, incoming);
        self.write_document(document)
    }

    /// Upsert a batch of entries with a single load/write cycle.
    ///
    /// Per-entry failures are collected, never fatal to the batch.
    pub fn register_tools(
        &self,
        entries: Vec<CatalogEntry>,
    ) -> Result<RegisterOutcome, CatalogError> {
        let mut document = self.load_document();
        let mut outcome = RegisterOutcome::default();

        for entry in entries {
            let name = entry.name.clone();
            match self.entry_to_value(entry) {
                Ok(incoming) => {
                    Self::upsert_value(&mut document.tools, incoming);
                    outcome.registered.push(name);
                }
                Err(e) => {
                    debug!(error = %e, "Skipping catalog entry");
                    outcome.failed.push((name, e.to_string()));
                }
            }
        }

        self.write_document(document)?;
        Ok(outcome)
    }

    /// Delete entries by name; unknown names are ignored.
    pub fn remove_tools(&self, names: &[String]) -> Result<(), CatalogError> {
        let names: BTreeSet<&str> = names
            .iter()
            .map(String::as_str)
            .filter(|n| !n.is_empty())
            .collect();
        if names.is_empty() {
            return Ok(());
        }

        let mut document = self.load_document();
        document.tools.retain(|entry| {
            entry
                .get("name")
                .and_then(Value::as_str)
                .map(|name| !names.contains(name))
                .unwrap_or(true)
        });
        self.write_document(document)
    }

    /// Look up a tool by name: persisted catalog first, then the discovery
    /// manifest (loadable tools, MCP servers, OpenAPI specs).
    pub fn get_tool_details(&self, name: &str) -> Option<CatalogEntry> {
        if name.is_empty() {
            return None;
        }

        let document = self.load_document();
        for value in &document.tools {
            if value.get("name").and_then(Value::as_str) != Some(name) {
                continue;
            }
            match serde_json::from_value::<CatalogEntry>(value.clone()) {
                Ok(mut entry) => {
                    entry.fill_pathway_defaults();
                    return Some(entry);
                }
                Err(e) => {
                    warn!(tool = name, error = %e, "Malformed catalog entry");
                    return None;
                }
            }
        }

        let manifest_path = self.settings.resolve_manifest_path()?;
        let manifest = DiscoveryManifest::load(&manifest_path)?;
        self.manifest_details(&manifest, name)
    }

    fn manifest_details(&self, manifest: &DiscoveryManifest, name: &str) -> Option<CatalogEntry> {
        if let Some(tool) = manifest.loadable_tool(name) {
            let category = tool.category.clone().unwrap_or_else(|| "loadable".to_string());
            let mut entry = CatalogEntry::new(tool.name.as_str(), tool.description.as_str(), category);
            if let Some(schema) = &tool.input_schema {
                entry = entry.with_input_schema(schema.clone());
            }
            entry.path = tool.path.clone();
            entry.sandbox_status = Some(self.settings.sandbox_status.clone());
            entry.last_updated = tool.last_updated.unwrap_or_else(Utc::now);
            entry.load_pathway = tool.load_command.clone();
            entry.unload_pathway = tool
                .unload_command
                .clone()
                .or_else(|| Some(default_unload_pathway(&tool.name)));
            entry.fill_pathway_defaults();
            entry.status = Some("available".to_string());
            return Some(entry);
        }

        if let Some(server) = manifest.server(name) {
            let mut entry = CatalogEntry::new(server.id.as_str(), server.description.as_str(), "mcp_server")
                .with_category("mcp_servers");
            entry.path = server.path.clone();
            entry.sandbox_status = Some(self.settings.sandbox_status.clone());
            entry.load_pathway = server.connect_command.clone();
            entry.unload_pathway = Some(format!(
                "mcp_client(action='disconnect', connection_id='{}')",
                server.id
            ));
            entry.status = Some("available".to_string());
            return Some(entry);
        }

        if let Some(spec) = manifest.spec(name) {
            let description = spec.file.clone().unwrap_or_default();
            let mut entry = CatalogEntry::new(spec.name.as_str(), description, "openapi_spec")
                .with_category("openapi_specs");
            entry.path = spec.path.clone();
            entry.sandbox_status = Some(self.settings.sandbox_status.clone());
            entry.load_pathway = spec.mcp_command.clone();
            entry.status = Some("available".to_string());
            return Some(entry);
        }

        None
    }

    /// Build the category-grouped overview, merged with the discovery
    /// manifest and cached for the configured TTL.
    ///
    /// Every write invalidates the cache immediately, so overviews are at
    /// most TTL-seconds stale after a read-only period and always fresh
    /// right after a mutation.
    pub fn build_catalog_overview(&self) -> CatalogOverview {
        {
            let cache = self.cache.lock();
            if let Some(cached) = cache.as_ref() {
                if cached.stored_at.elapsed() < self.cache_ttl {
                    return cached.overview.clone();
                }
            }
        }

        let document = self.load_document();
        let manifest = self
            .settings
            .resolve_manifest_path()
            .and_then(|path| DiscoveryManifest::load(&path));

        let mut grouped: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut known: BTreeSet<String> = BTreeSet::new();

        for value in &document.tools {
            let Some(name) = value.get("name").and_then(Value::as_str) else {
                continue;
            };
            let category = value
                .get("category")
                .and_then(Value::as_str)
                .filter(|c| !c.is_empty())
                .or_else(|| value.get("origin").and_then(Value::as_str))
                .unwrap_or("other");
            grouped
                .entry(category.to_string())
                .or_default()
                .insert(name.to_string());
            known.insert(name.to_string());
        }

        if let Some(manifest) = &manifest {
            for tool in &manifest.loadable_tools {
                if known.contains(&tool.name) {
                    continue;
                }
                let category = tool.category.clone().unwrap_or_else(|| "loadable".to_string());
                grouped.entry(category).or_default().insert(tool.name.clone());
            }
            for server in &manifest.mcp_servers {
                grouped
                    .entry("mcp_servers".to_string())
                    .or_default()
                    .insert(server.id.clone());
            }
            for spec in &manifest.openapi_specs {
                grouped
                    .entry("openapi_specs".to_string())
                    .or_default()
                    .insert(spec.name.clone());
            }
        }

        let mut categories = Vec::new();
        let mut seen = BTreeSet::new();
        for id in &self.settings.category_order {
            if let Some(tools) = grouped.get(id) {
                categories.push(Self::category_overview(id, tools));
                seen.insert(id.clone());
            }
        }
        for (id, tools) in &grouped {
            if !seen.contains(id) {
                categories.push(Self::category_overview(id, tools));
            }
        }

        let overview = CatalogOverview {
            generated_at: Utc::now(),
            categories,
        };

        *self.cache.lock() = Some(OverviewCache {
            overview: overview.clone(),
            stored_at: Instant::now(),
        });
        overview
    }

    fn category_overview(id: &str, tools: &BTreeSet<String>) -> CategoryOverview {
        let label = CATEGORY_LABELS
            .get(id)
            .map(|label| label.to_string())
            .unwrap_or_else(|| title_case(id));
        CategoryOverview {
            id: id.to_string(),
            label,
            tools: tools.iter().cloned().collect(),
            count: tools.len(),
        }
    }

    /// Drop the cached overview. Called automatically after every write.
    pub fn invalidate_cache(&self) {
        *self.cache.lock() = None;
    }
}

fn title_case(id: &str) -> String {
    id.split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
