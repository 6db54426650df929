//! Environment configuration via `tidemark.toml`
//!
//! On first open a commented default `tidemark.toml` is created in the
//! environment directory. Edit it and reopen to change settings.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tidemark_core::{Error, Result};
use tidemark_durability::DurabilityMode;

/// Config file name placed in the environment directory.
pub const CONFIG_FILE_NAME: &str = "tidemark.toml";

/// Environment configuration loaded from `tidemark.toml`.
///
/// # Example
///
/// ```toml
/// durability = "standard"
/// sync_interval_ms = 100
/// sync_batch_size = 1000
/// store = "file"
/// sources = ["orders", "payments"]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TidemarkConfig {
    /// Retention log durability: `"cache"`, `"standard"` or `"always"`.
    #[serde(default = "default_durability_str")]
    pub durability: String,
    /// Maximum milliseconds between retention fsyncs in standard mode.
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,
    /// Maximum appends between retention fsyncs in standard mode.
    #[serde(default = "default_sync_batch_size")]
    pub sync_batch_size: usize,
    /// Store backend for writers: `"file"` or `"memory"`.
    #[serde(default = "default_store_str")]
    pub store: String,
    /// Sources given registry slots up front, in slot order.
    ///
    /// Sources opened later are appended after these.
    #[serde(default)]
    pub sources: Vec<String>,
}

fn default_durability_str() -> String {
    "standard".to_string()
}

fn default_sync_interval_ms() -> u64 {
    100
}

fn default_sync_batch_size() -> usize {
    1000
}

fn default_store_str() -> String {
    "file".to_string()
}

/// Store backend selected by [`TidemarkConfig::store`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// Snapshot plus append log on disk
    File,
    /// Process memory only
    Memory,
}

impl Default for TidemarkConfig {
    fn default() -> Self {
        Self {
            durability: default_durability_str(),
            sync_interval_ms: default_sync_interval_ms(),
            sync_batch_size: default_sync_batch_size(),
            store: default_store_str(),
            sources: Vec::new(),
        }
    }
}

impl TidemarkConfig {
    /// Parse the durability string into a `DurabilityMode`.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown mode or a zero batch size.
    pub fn durability_mode(&self) -> Result<DurabilityMode> {
        match self.durability.as_str() {
            "cache" => Ok(DurabilityMode::Cache),
            "always" => Ok(DurabilityMode::Always),
            "standard" => {
                if self.sync_batch_size == 0 {
                    return Err(Error::invalid_input(
                        "sync_batch_size in tidemark.toml must be at least 1",
                    ));
                }
                Ok(DurabilityMode::Standard {
                    interval_ms: self.sync_interval_ms,
                    batch_size: self.sync_batch_size,
                })
            }
            other => Err(Error::invalid_input(format!(
                "Invalid durability mode '{}' in tidemark.toml. Expected \"cache\", \"standard\" or \"always\".",
                other
            ))),
        }
    }

    /// Parse the store string into a `StoreKind`.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not `"file"` or `"memory"`.
    pub fn store_kind(&self) -> Result<StoreKind> {
        match self.store.as_str() {
            "file" => Ok(StoreKind::File),
            "memory" => Ok(StoreKind::Memory),
            other => Err(Error::invalid_input(format!(
                "Invalid store '{}' in tidemark.toml. Expected \"file\" or \"memory\".",
                other
            ))),
        }
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Tidemark environment configuration
#
# Retention log durability: "standard" (default), "always" or "cache"
#   "standard" = fsync every sync_batch_size appends or sync_interval_ms
#   "always"   = fsync every append
#   "cache"    = no retention file, nothing survives a restart
durability = "standard"
sync_interval_ms = 100
sync_batch_size = 1000

# Store backend for writers: "file" (default) or "memory"
store = "file"

# Sources given registry slots up front, in slot order.
# Sources opened later are appended after these.
sources = []
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::storage(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: TidemarkConfig = toml::from_str(&content).map_err(|e| {
            Error::invalid_input(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check every enumerated field.
    ///
    /// # Errors
    ///
    /// Returns the first invalid field.
    pub fn validate(&self) -> Result<()> {
        self.durability_mode()?;
        self.store_kind()?;
        for source in &self.sources {
            validate_source_name(source)?;
        }
        Ok(())
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                Error::storage(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::storage(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::storage(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}

/// Check that a source name can be used as a registry key and directory name
///
/// # Errors
///
/// Returns `InvalidInput` for an empty name, a name containing a path
/// separator, or a name of `.` or `..`.
pub fn validate_source_name(source: &str) -> Result<()> {
    if source.is_empty() {
        return Err(Error::invalid_input("source name must not be empty"));
    }
    if source.contains('/') || source.contains('\\') || source == "." || source == ".." {
        return Err(Error::invalid_input(format!(
            "source name '{}' must not contain path separators or be '.' or '..'",
            source
        )));
    }
    Ok(())
}
