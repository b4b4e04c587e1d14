//! Registry configuration
//!
//! Settings for the on-disk registry, loaded from YAML. Every field has a
//! default so an empty document is a valid configuration.
//!
//! ```yaml
//! path: /var/lib/agent/registry
//! permissions: 0o600
//! cleanup_interval_secs: 300
//! checkpoint_size: 10485760
//! file_sync: true
//! shutdown_timeout_secs: 30
//! ```

use crate::backend::FileBackendConfig;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Registry Config
// ============================================================================

/// Configuration of the persistent registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
    /// Root directory of the registry; one subdirectory per store
    pub path: PathBuf,

    /// Mode for files created by the registry
    pub permissions: u32,

    /// Seconds between garbage collection passes (0 disables collection)
    pub cleanup_interval_secs: u64,

    /// Change log size in bytes that triggers a checkpoint
    pub checkpoint_size: u64,

    /// Sync the change log to disk after every write
    pub file_sync: bool,

    /// Seconds to wait for open stores on shutdown
    pub shutdown_timeout_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/registry"),
            permissions: 0o600,
            cleanup_interval_secs: 300,
            checkpoint_size: 10 * 1024 * 1024,
            file_sync: true,
            shutdown_timeout_secs: 30,
        }
    }
}

impl RegistryConfig {
    /// Load and validate a config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(Error::config("registry path must not be empty"));
        }
        if self.permissions > 0o777 {
            return Err(Error::config(format!(
                "invalid file permissions {:o}",
                self.permissions
            )));
        }
        if self.permissions & 0o600 != 0o600 {
            return Err(Error::config(format!(
                "file permissions {:o} must allow owner read and write",
                self.permissions
            )));
        }
        if self.checkpoint_size == 0 {
            return Err(Error::config("checkpoint_size must be greater than 0"));
        }
        Ok(())
    }

    /// Interval between garbage collection passes, `None` when disabled
    pub fn cleanup_interval(&self) -> Option<Duration> {
        (self.cleanup_interval_secs > 0).then(|| Duration::from_secs(self.cleanup_interval_secs))
    }

    /// Bounded wait for open stores on shutdown
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Settings for the file backend
    pub fn file_backend_config(&self) -> FileBackendConfig {
        FileBackendConfig {
            root: self.path.clone(),
            permissions: self.permissions,
            checkpoint_size: self.checkpoint_size,
            file_sync: self.file_sync,
        }
    }
}
