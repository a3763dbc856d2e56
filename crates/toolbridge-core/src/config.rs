//! Configuration system for Toolbridge.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Default file name for the persisted tool catalog.
pub const DEFAULT_CATALOG_FILENAME: &str = "tool_catalog.json";

/// Default file name for the discovery manifest, relative to the data dir.
pub const DEFAULT_MANIFEST_RELATIVE: &str = "tool_manifests/tools_discovery_manifest.json";

/// Main configuration struct for Toolbridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Catalog settings
    pub catalog: CatalogSettings,
    /// MCP client settings
    pub mcp: McpSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            catalog: CatalogSettings::default(),
            mcp: McpSettings::default(),
        }
    }
}

impl Settings {
    /// Load configuration from defaults, the user config file, and the
    /// environment.
    ///
    /// Environment variables use the `TOOLBRIDGE_` prefix with `__` as the
    /// section separator, e.g. `TOOLBRIDGE_CATALOG__WRITE_MARKDOWN=false`.
    pub fn load() -> Result<Self, Error> {
        let config_dir = Self::config_dir();

        let settings: Settings = Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config_dir.join("config.toml")))
            .merge(Env::prefixed("TOOLBRIDGE_").split("__"))
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        tracing::debug!(
            catalog_path = %settings.catalog.resolve_catalog_path().display(),
            "Loaded settings"
        );
        Ok(settings)
    }

    /// Get the configuration directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("toolbridge")
    }

    /// Get the data directory (default location for the catalog file).
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("toolbridge")
    }
}

/// Settings for the persisted tool catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSettings {
    /// Explicit catalog file path. Overrides `catalog_dir` when set.
    pub catalog_path: Option<PathBuf>,
    /// Directory holding the default catalog file name.
    pub catalog_dir: Option<PathBuf>,
    /// Whether to render the derived Markdown table next to the JSON file.
    pub write_markdown: bool,
    /// Default sandbox status recorded for entries that do not set one.
    pub sandbox_status: String,
    /// Path to the externally-produced discovery manifest (read-only).
    pub discovery_manifest: Option<PathBuf>,
    /// Category ordering for catalog overviews.
    pub category_order: Vec<String>,
    /// TTL for the cached catalog overview, in seconds.
    pub overview_cache_ttl_secs: u64,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            catalog_path: None,
            catalog_dir: None,
            write_markdown: true,
            sandbox_status: "sandboxed".to_string(),
            discovery_manifest: None,
            category_order: default_category_order(),
            overview_cache_ttl_secs: 30,
        }
    }
}

impl CatalogSettings {
    /// Resolve the catalog file path from explicit path, directory, or the
    /// default data directory.
    pub fn resolve_catalog_path(&self) -> PathBuf {
        if let Some(path) = &self.catalog_path {
            return path.clone();
        }
        let base = self
            .catalog_dir
            .clone()
            .unwrap_or_else(Settings::data_dir);
        base.join(DEFAULT_CATALOG_FILENAME)
    }

    /// Resolve the discovery manifest path, if any candidate exists.
    ///
    /// The explicit setting wins; otherwise the conventional location under
    /// the data directory is probed, then the current working directory.
    pub fn resolve_manifest_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.discovery_manifest {
            if path.exists() {
                return Some(path.clone());
            }
        }
        let candidate = Settings::data_dir().join(DEFAULT_MANIFEST_RELATIVE);
        if candidate.exists() {
            return Some(candidate);
        }
        let fallback = PathBuf::from(DEFAULT_MANIFEST_RELATIVE);
        if fallback.exists() {
            return Some(fallback);
        }
        None
    }

    /// Overview cache TTL as a `Duration`.
    pub fn overview_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.overview_cache_ttl_secs)
    }
}

/// Settings for MCP connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct McpSettings {
    /// Hard ceiling applied to every MCP timeout, in seconds.
    pub timeout_ceiling_secs: u64,
    /// Default timeout for HTTP operations, in seconds.
    pub timeout_secs: u64,
    /// Default SSE read timeout, in seconds.
    pub sse_read_timeout_secs: u64,
}

impl Default for McpSettings {
    fn default() -> Self {
        Self {
            timeout_ceiling_secs: 7,
            timeout_secs: 7,
            sse_read_timeout_secs: 7,
        }
    }
}

impl McpSettings {
    /// Effective timeout: the requested value (or the default) clamped to
    /// the configured ceiling.
    pub fn cap_timeout(&self, requested: Option<u64>) -> Duration {
        let secs = requested
            .unwrap_or(self.timeout_secs)
            .min(self.timeout_ceiling_secs);
        Duration::from_secs(secs)
    }

    /// Effective SSE read timeout, clamped to the ceiling.
    pub fn cap_sse_read_timeout(&self, requested: Option<u64>) -> Duration {
        let secs = requested
            .unwrap_or(self.sse_read_timeout_secs)
            .min(self.timeout_ceiling_secs);
        Duration::from_secs(secs)
    }
}

fn default_category_order() -> Vec<String> {
    [
        "built_in",
        "dynamically_loaded",
        "mcp_tools",
        "custom",
        "mcp_servers",
        "openapi_specs",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert!(settings.catalog.write_markdown);
        assert_eq!(settings.catalog.overview_cache_ttl_secs, 30);
        assert_eq!(settings.mcp.timeout_ceiling_secs, 7);
    }

    #[test]
    fn test_resolve_catalog_path_prefers_explicit() {
        let settings = CatalogSettings {
            catalog_path: Some(PathBuf::from("/tmp/custom.json")),
            catalog_dir: Some(PathBuf::from("/tmp/dir")),
            ..Default::default()
        };
        assert_eq!(
            settings.resolve_catalog_path(),
            PathBuf::from("/tmp/custom.json")
        );
    }

    #[test]
    fn test_resolve_catalog_path_from_dir() {
        let settings = CatalogSettings {
            catalog_dir: Some(PathBuf::from("/tmp/dir")),
            ..Default::default()
        };
        assert_eq!(
            settings.resolve_catalog_path(),
            PathBuf::from("/tmp/dir").join(DEFAULT_CATALOG_FILENAME)
        );
    }

    #[test]
    fn test_cap_timeout_clamps_to_ceiling() {
        let settings = McpSettings::default();

        assert_eq!(settings.cap_timeout(None), Duration::from_secs(7));
        assert_eq!(settings.cap_timeout(Some(3)), Duration::from_secs(3));
        assert_eq!(settings.cap_timeout(Some(600)), Duration::from_secs(7));
        assert_eq!(
            settings.cap_sse_read_timeout(Some(100)),
            Duration::from_secs(7)
        );
    }
}
