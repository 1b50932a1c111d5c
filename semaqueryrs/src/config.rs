//! Configuration system for semaquery.
//!
//! Supports TOML-based configuration covering group-by resolution, item parsing
//! and relational plan generation.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SemaqueryError};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SemaqueryConfig {
    pub resolution: ResolutionConfig,
    pub parser: ParserConfig,
    pub sql: SqlConfig,
}

/// Group-by item resolution settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResolutionConfig {
    /// Maximum suggestions listed per failed item (default: 6).
    pub max_suggestions: usize,
    /// Maximum number of entity joins when enumerating linkable elements (default: 2).
    pub max_entity_hops: usize,
}

/// Item reference parsing settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Maximum memoized descriptors per compile (default: 4096).
    pub descriptor_cache_size: usize,
}

/// Relational plan generation settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SqlConfig {
    /// Hoist repeated dataflow subtrees into CTEs (default: true).
    pub use_ctes_for_common_nodes: bool,
    /// Prefix for generated CTE aliases (default: "cte").
    pub cte_alias_prefix: String,
    /// Prefix for generated subquery aliases (default: "subq").
    pub subquery_alias_prefix: String,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            max_suggestions: 6,
            max_entity_hops: 2,
        }
    }
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            descriptor_cache_size: 4096,
        }
    }
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            use_ctes_for_common_nodes: true,
            cte_alias_prefix: "cte".to_string(),
            subquery_alias_prefix: "subq".to_string(),
        }
    }
}

impl SemaqueryConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| SemaqueryError::Config(format!("failed to read config file: {e}")))?;
        Self::from_toml(&contents)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| SemaqueryError::Config(format!("failed to parse config: {e}")))
    }

    /// Load from default locations (env var, cwd, user config dir, or defaults).
    ///
    /// Search order:
    /// 1. `SEMAQUERY_CONFIG` environment variable
    /// 2. `./semaquery.toml` (current directory)
    /// 3. `~/.config/semaquery/config.toml` (user config dir)
    /// 4. Built-in defaults
    pub fn load_default() -> Self {
        if let Ok(path) = std::env::var("SEMAQUERY_CONFIG") {
            if let Ok(cfg) = Self::from_file(&path) {
                tracing::info!(path = %path, "loaded config from SEMAQUERY_CONFIG");
                return cfg;
            }
        }

        if let Ok(cfg) = Self::from_file("semaquery.toml") {
            tracing::info!("loaded config from ./semaquery.toml");
            return cfg;
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("semaquery").join("config.toml");
            if let Ok(cfg) = Self::from_file(&user_config) {
                tracing::info!(path = %user_config.display(), "loaded config from user config dir");
                return cfg;
            }
        }

        tracing::debug!("no config file found, using defaults");
        Self::default()
    }
}
