//! Soft-delete configuration, optionally loaded from `~/.softdelete/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Field used to store the deletion marker when nothing else is configured.
pub const DEFAULT_DELETED_FIELD_NAME: &str = "deletedAt";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Deleted field name must not be empty")]
    EmptyFieldName,
}

/// What happens when a document is scheduled a second time for the same
/// operation, and whether the in-memory deleted state is checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulingPolicy {
    /// Re-scheduling is a no-op; no precondition on the deleted state.
    #[default]
    Lenient,
    /// Re-scheduling fails with `DuplicateScheduling`; deleting a deleted
    /// document or restoring a live one fails with `InvalidState`.
    Strict,
}

fn default_deleted_field_name() -> String {
    DEFAULT_DELETED_FIELD_NAME.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default = "default_deleted_field_name")]
    deleted_field_name: String,
    #[serde(default)]
    scheduling_policy: SchedulingPolicy,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            deleted_field_name: default_deleted_field_name(),
            scheduling_policy: SchedulingPolicy::default(),
        }
    }
}

impl Configuration {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn deleted_field_name(&self) -> &str {
        &self.deleted_field_name
    }

    pub fn set_deleted_field_name(&mut self, name: impl Into<String>) -> Result<(), ConfigError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ConfigError::EmptyFieldName);
        }
        self.deleted_field_name = name;
        Ok(())
    }

    #[must_use]
    pub fn scheduling_policy(&self) -> SchedulingPolicy {
        self.scheduling_policy
    }

    pub fn set_scheduling_policy(&mut self, policy: SchedulingPolicy) {
        self.scheduling_policy = policy;
    }

    #[must_use]
    pub fn with_scheduling_policy(mut self, policy: SchedulingPolicy) -> Self {
        self.scheduling_policy = policy;
        self
    }

    /// Parse a configuration from TOML. Missing keys keep their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Configuration = toml::from_str(content)?;
        if config.deleted_field_name.trim().is_empty() {
            return Err(ConfigError::EmptyFieldName);
        }
        Ok(config)
    }

    /// Load the configuration at `path`, or the defaults if the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("No config file at {}; using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        debug!(
            "Loaded config from {} (field: {}, policy: {:?})",
            path.display(),
            config.deleted_field_name,
            config.scheduling_policy
        );
        Ok(config)
    }

    /// `~/.softdelete/config.toml`, if a home directory can be determined.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".softdelete").join("config.toml"))
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
