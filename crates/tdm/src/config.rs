// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Engine configuration.
//!
//! Supports both programmatic and file-based configuration.

use crate::schema::SchemaCompliance;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Smallest update payload able to carry an envelope and one leaf.
const MIN_UPDATE_PAYLOAD: usize = 64;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Who bumps a data source's version after a batch of changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionPolicy {
    /// The source increments its version when a lock with dirty paths is
    /// released.
    #[default]
    Managed,
    /// The application sets versions itself.
    Unmanaged,
}

/// TDM configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TdmConfig {
    /// Capacity of one update request payload (bytes).
    #[serde(default = "default_max_update_payload")]
    pub max_update_payload: usize,

    /// Capacity of one staged leaf buffer (bytes).
    #[serde(default = "default_max_leaf_size")]
    pub max_leaf_size: usize,

    /// Source version management.
    #[serde(default)]
    pub version_policy: VersionPolicy,

    /// Handling of unknown tags in incoming data.
    #[serde(default)]
    pub schema_compliance: SchemaCompliance,
}

fn default_max_update_payload() -> usize {
    1024
}

fn default_max_leaf_size() -> usize {
    256
}

impl Default for TdmConfig {
    fn default() -> Self {
        Self {
            max_update_payload: default_max_update_payload(),
            max_leaf_size: default_max_leaf_size(),
            version_policy: VersionPolicy::default(),
            schema_compliance: SchemaCompliance::default(),
        }
    }
}

impl TdmConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_update_payload < MIN_UPDATE_PAYLOAD {
            return Err(ConfigError::Invalid(format!(
                "max_update_payload must be at least {} bytes, got {}",
                MIN_UPDATE_PAYLOAD, self.max_update_payload
            )));
        }
        if self.max_leaf_size == 0 {
            return Err(ConfigError::Invalid("max_leaf_size must be non-zero".into()));
        }
        if self.max_leaf_size > self.max_update_payload {
            return Err(ConfigError::Invalid(format!(
                "max_leaf_size ({}) exceeds max_update_payload ({})",
                self.max_leaf_size, self.max_update_payload
            )));
        }
        Ok(())
    }
}
