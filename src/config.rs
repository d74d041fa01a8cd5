//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::index::{IndexBackend, IndexOptions};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub indexer: IndexerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Checkpoint indexer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IndexerConfig {
    /// Root of the per-trace supplementary directories
    #[serde(default = "default_supplementary_dir")]
    pub supplementary_dir: String,

    /// Events between two checkpoints
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u64,

    /// memory | flat_array | btree
    #[serde(default = "default_backend")]
    pub backend: IndexBackend,

    #[serde(default = "default_btree_degree")]
    pub btree_degree: usize,

    #[serde(default = "default_node_cache_size")]
    pub node_cache_size: usize,

    #[serde(default = "default_record_cache_size")]
    pub record_cache_size: usize,
}

fn default_supplementary_dir() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("tracestate").to_string_lossy().to_string())
        .unwrap_or_else(|| "./tracestate_data".to_string())
}

fn default_checkpoint_interval() -> u64 {
    1000
}

fn default_backend() -> IndexBackend {
    IndexBackend::BTree
}

fn default_btree_degree() -> usize {
    15
}

fn default_node_cache_size() -> usize {
    64
}

fn default_record_cache_size() -> usize {
    1024
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            supplementary_dir: default_supplementary_dir(),
            checkpoint_interval: default_checkpoint_interval(),
            backend: default_backend(),
            btree_degree: default_btree_degree(),
            node_cache_size: default_node_cache_size(),
            record_cache_size: default_record_cache_size(),
        }
    }
}

impl IndexerConfig {
    /// Check values that would make the indexer unusable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.checkpoint_interval == 0 {
            return Err(ConfigError::Invalid(
                "checkpoint_interval must be greater than 0".into(),
            ));
        }
        if self.btree_degree < 2 {
            return Err(ConfigError::Invalid(format!(
                "btree_degree must be at least 2, got {}",
                self.btree_degree
            )));
        }
        Ok(())
    }

    pub fn index_options(&self) -> IndexOptions {
        IndexOptions {
            btree_degree: self.btree_degree,
            node_cache_size: self.node_cache_size,
            record_cache_size: self.record_cache_size,
        }
    }

    /// Supplementary root with a leading `~` expanded
    pub fn supplementary_path(&self) -> PathBuf {
        match self.supplementary_dir.strip_prefix("~/") {
            Some(rest) => dirs::home_dir()
                .map(|home| home.join(rest))
                .unwrap_or_else(|| PathBuf::from(&self.supplementary_dir)),
            None => PathBuf::from(&self.supplementary_dir),
        }
    }

    /// Directory holding the index files of the trace named `trace_name`
    pub fn trace_dir(&self, trace_name: &str) -> PathBuf {
        self.supplementary_path().join(trace_name)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,

    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }

    /// Parse a TOML document
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("tracestate").join("config.toml")),
            Some(PathBuf::from("./tracestate.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        // Indexer overrides
        if let Some(dir) = var("TRACESTATE_SUPPLEMENTARY_DIR") {
            self.indexer.supplementary_dir = dir;
        }
        if let Some(interval) = var("TRACESTATE_CHECKPOINT_INTERVAL") {
            match interval.parse() {
                Ok(n) => self.indexer.checkpoint_interval = n,
                Err(_) => {
                    tracing::warn!("Ignoring invalid TRACESTATE_CHECKPOINT_INTERVAL={}", interval)
                }
            }
        }
        if let Some(backend) = var("TRACESTATE_INDEX_BACKEND") {
            match backend.parse() {
                Ok(parsed) => self.indexer.backend = parsed,
                Err(e) => tracing::warn!("Ignoring TRACESTATE_INDEX_BACKEND: {}", e),
            }
        }

        // Logging overrides
        if let Some(level) = var("TRACESTATE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("TRACESTATE_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# tracestate Configuration
#
# Environment variables override these settings:
# - TRACESTATE_SUPPLEMENTARY_DIR
# - TRACESTATE_CHECKPOINT_INTERVAL
# - TRACESTATE_INDEX_BACKEND
# - TRACESTATE_LOG_LEVEL
# - TRACESTATE_LOG_FORMAT

[indexer]
# Root directory of per-trace index files
supplementary_dir = "~/.local/share/tracestate"

# Events between two checkpoints
checkpoint_interval = 1000

# Index backend: memory, flat_array or btree
# flat_array requires traces with non-decreasing timestamps
backend = "btree"

# Minimum degree of the B-tree (nodes hold up to 2 * degree - 1 checkpoints)
btree_degree = 15

# B-tree nodes kept in memory
node_cache_size = 64

# Flat-array records kept in memory
record_cache_size = 1024

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"

# Optional log file path
# file = "/var/log/tracestate/tracestate.log"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_parses() {
        let config = Config::parse(&generate_default_config()).unwrap();
        assert_eq!(config.indexer.checkpoint_interval, 1000);
        assert_eq!(config.indexer.backend, IndexBackend::BTree);
        assert_eq!(config.indexer.btree_degree, 15);
        assert_eq!(config.logging.format, "pretty");
        config.indexer.validate().unwrap();
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = Config::parse("[indexer]\nbackend = \"flat_array\"\n").unwrap();
        assert_eq!(config.indexer.backend, IndexBackend::FlatArray);
        assert_eq!(config.indexer.checkpoint_interval, 1000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_validate() {
        let mut indexer = IndexerConfig {
            checkpoint_interval: 0,
            ..IndexerConfig::default()
        };
        assert!(matches!(indexer.validate(), Err(ConfigError::Invalid(_))));

        indexer.checkpoint_interval = 10;
        indexer.btree_degree = 1;
        assert!(indexer.validate().is_err());

        indexer.btree_degree = 2;
        indexer.validate().unwrap();
    }

    #[test]
    fn test_backend_names() {
        for backend in [
            IndexBackend::Memory,
            IndexBackend::FlatArray,
            IndexBackend::BTree,
        ] {
            let toml = format!("[indexer]\nbackend = \"{}\"\n", backend);
            assert_eq!(Config::parse(&toml).unwrap().indexer.backend, backend);
        }
        assert_eq!(
            Config::parse("[indexer]\nbackend = \"b-tree\"\n").unwrap().indexer.backend,
            IndexBackend::BTree
        );
        assert!(Config::parse("[indexer]\nbackend = \"sqlite\"\n").is_err());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("TRACESTATE_CHECKPOINT_INTERVAL", "250"),
            ("TRACESTATE_INDEX_BACKEND", "memory"),
            ("TRACESTATE_LOG_FORMAT", "json"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.indexer.checkpoint_interval, 250);
        assert_eq!(config.indexer.backend, IndexBackend::Memory);
        assert_eq!(config.logging.format, "json");

        // Unknown backends keep the previous value
        config.apply_overrides(|key| {
            (key == "TRACESTATE_INDEX_BACKEND").then(|| "sqlite".to_string())
        });
        assert_eq!(config.indexer.backend, IndexBackend::Memory);
    }

    #[test]
    fn test_load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[indexer\n").unwrap();

        match Config::load(&path) {
            Err(ConfigError::Parse { path: p, .. }) => assert_eq!(p, path),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(matches!(
            Config::load(&dir.path().join("missing.toml")),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_trace_dir() {
        let indexer = IndexerConfig {
            supplementary_dir: "/tmp/supp".into(),
            ..IndexerConfig::default()
        };
        assert_eq!(indexer.trace_dir("kernel"), PathBuf::from("/tmp/supp/kernel"));
    }
}
