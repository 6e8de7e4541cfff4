use anyhow::Result;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration, usually loaded from a YAML file.
///
/// Every field has a default so a partial file (or none at all) is valid.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShelfConfig {
    pub database: DatabaseConfig,
    pub events: EventConfig,
    pub thumbnail: ThumbnailConfig,
    /// Upper bound for one compound ordering operation, storage waits included.
    pub operation_timeout_ms: u64,
}

impl Default for ShelfConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            events: EventConfig::default(),
            thumbnail: ThumbnailConfig::default(),
            operation_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file. `None` selects the in-memory store.
    pub path: Option<PathBuf>,
    /// Every transaction takes SQLite's write lock when it begins, so extra connections
    /// wait on `busy_timeout_ms` rather than interleave.
    pub max_connections: u32,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_connections: 1,
            busy_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// Buffered events per subscriber before the slowest one starts lagging.
    pub capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    pub enabled: bool,
    /// Number of leading posters handed to the renderer.
    pub poster_count: usize,
    pub render_timeout_ms: u64,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poster_count: 4,
            render_timeout_ms: 10_000,
        }
    }
}

impl ThumbnailConfig {
    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.render_timeout_ms)
    }
}

impl ShelfConfig {
    /// Load configuration from a YAML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config file {}: {}", path.display(), e)
        })?;
        Self::from_yaml(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config YAML {}: {}", path.display(), e))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}
