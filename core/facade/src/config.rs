//! Storage configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use unistore_storage::{AdapterConfig, DEFAULT_PAGE_SIZE};
use unistore_transfer::TransferConfig;

/// Failures while loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Invalid config: {0}")]
    Parse(String),
}

/// Top-level configuration of a [`Storage`](crate::Storage).
///
/// Every field has a default, so `{}` is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub transfer: TransferConfig,
    /// Page size used when a listing does not ask for one.
    pub list_page_size: usize,
    pub adapters: AdapterConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            transfer: TransferConfig::default(),
            list_page_size: DEFAULT_PAGE_SIZE,
            adapters: AdapterConfig::default(),
        }
    }
}

impl StorageConfig {
    /// Deserialize configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Read configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json(&json)
    }

    /// Serialize configuration to JSON.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}
