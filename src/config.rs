//! Per-store configuration, read from `.trellis/config.yaml`.

use crate::id::{self, MAX_WIDTH};
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default namespace prefix for minted IDs.
pub const DEFAULT_PREFIX: &str = "tr";

/// Default writer-lock wait in milliseconds.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Default cap for dependency tree traversal.
pub const DEFAULT_MAX_TREE_DEPTH: usize = 50;

/// Store configuration. Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Namespace prefix for minted IDs
    pub prefix: String,

    /// Width of the random ID suffix
    pub id_width: usize,

    /// How long a writer waits for the index lock
    pub busy_timeout_ms: u64,

    /// Depth cap for dependency trees
    pub max_tree_depth: usize,

    /// Import on open when the record log changed underneath the index
    pub auto_import: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            id_width: id::DEFAULT_WIDTH,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            max_tree_depth: DEFAULT_MAX_TREE_DEPTH,
            auto_import: true,
        }
    }
}

impl Config {
    /// Create a new config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the ID prefix.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the ID suffix width.
    pub fn id_width(mut self, width: usize) -> Self {
        self.id_width = width;
        self
    }

    /// Set the writer-lock wait.
    pub fn busy_timeout_ms(mut self, ms: u64) -> Self {
        self.busy_timeout_ms = ms;
        self
    }

    /// Set the dependency tree depth cap.
    pub fn max_tree_depth(mut self, depth: usize) -> Self {
        self.max_tree_depth = depth;
        self
    }

    /// Enable or disable import-on-open.
    pub fn auto_import(mut self, enabled: bool) -> Self {
        self.auto_import = enabled;
        self
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Reject values the store cannot work with.
    pub fn validate(&self) -> Result<()> {
        id::validate_prefix(&self.prefix).map_err(|e| eyre::eyre!(crate::StoreError::Validation(e)))?;
        if self.id_width == 0 || self.id_width > MAX_WIDTH {
            eyre::bail!("id_width must be between 1 and {}, got {}", MAX_WIDTH, self.id_width);
        }
        if self.max_tree_depth == 0 {
            eyre::bail!("max_tree_depth must be at least 1");
        }
        Ok(())
    }

    /// Load from `path`, or defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = if text.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))?
        };
        config.validate()?;
        Ok(config)
    }

    /// Write to `path` as YAML.
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_yaml::to_string(self).context("Failed to serialize config")?;
        fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_builder() {
        let config = Config::new().prefix("gt").id_width(6).busy_timeout_ms(250).auto_import(false);

        assert_eq!(config.prefix, "gt");
        assert_eq!(config.id_width, 6);
        assert_eq!(config.busy_timeout(), Duration::from_millis(250));
        assert!(!config.auto_import);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load(&temp_dir.path().join("config.yaml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_partial_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");
        fs::write(&path, "prefix: ops\nmax_tree_depth: 8\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.prefix, "ops");
        assert_eq!(config.max_tree_depth, 8);
        assert_eq!(config.busy_timeout_ms, DEFAULT_BUSY_TIMEOUT_MS);
    }

    #[test]
    fn test_save_then_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");
        let config = Config::new().prefix("abc").id_width(5);

        config.save(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(Config::new().prefix("Bad Prefix").validate().is_err());
        assert!(Config::new().id_width(0).validate().is_err());
        assert!(Config::new().id_width(13).validate().is_err());
        assert!(Config::new().max_tree_depth(0).validate().is_err());
    }
}
