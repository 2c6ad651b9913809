// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Serializable schema descriptions.
//!
//! ```toml
//! name = "Thermostat"
//! profile_id = 3585
//! min_version = 1
//! max_version = 2
//!
//! [[properties]]
//! name = "target"
//! tag = 1
//!
//! [[properties]]
//! name = "zones"
//! tag = 2
//! dictionary = true
//!
//! [[properties]]
//! name = "zone"
//! parent = "zones"
//! tag = 1
//! ```
//!
//! `parent` is the slash-joined names of the parent's ancestors, e.g.
//! `"zones/zone"`. Properties must be listed parents first.

use super::{NodeFlags, SchemaBuilder, SchemaCompliance, SchemaEngine};
use crate::config::ConfigError;
use crate::error::{Result, TdmError};
use crate::path::{PropertySchemaHandle, ROOT_PROPERTY_SCHEMA_HANDLE};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Description of one trait schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub name: String,

    #[serde(default)]
    pub profile_id: u32,

    #[serde(default = "default_version")]
    pub min_version: u16,

    #[serde(default = "default_version")]
    pub max_version: u16,

    #[serde(default)]
    pub properties: Vec<PropertyDefinition>,
}

/// One schema node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    pub name: String,

    /// Names path of the parent node; absent for children of the root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    pub tag: u8,

    #[serde(default, skip_serializing_if = "is_false")]
    pub dictionary: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub optional: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub nullable: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub ephemeral: bool,
}

fn default_version() -> u16 {
    1
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl PropertyDefinition {
    pub fn new(name: impl Into<String>, parent: Option<&str>, tag: u8) -> Self {
        Self {
            name: name.into(),
            parent: parent.map(str::to_string),
            tag,
            dictionary: false,
            optional: false,
            nullable: false,
            ephemeral: false,
        }
    }

    fn flags(&self) -> NodeFlags {
        NodeFlags {
            dictionary: self.dictionary,
            optional: self.optional,
            nullable: self.nullable,
            ephemeral: self.ephemeral,
        }
    }
}

impl SchemaDefinition {
    /// Load a definition from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> std::result::Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> std::result::Result<Self, ConfigError> {
        let definition: Self = toml::from_str(content)?;
        if definition.name.is_empty() {
            return Err(ConfigError::Invalid("schema name is empty".into()));
        }
        Ok(definition)
    }

    /// Build the engine; parents are resolved by name path.
    pub fn build(&self, compliance: SchemaCompliance) -> Result<SchemaEngine> {
        let mut builder = SchemaBuilder::new(self.name.clone(), self.profile_id);
        builder
            .version_range(self.min_version, self.max_version)
            .compliance(compliance);

        let mut by_path: HashMap<String, PropertySchemaHandle> = HashMap::new();
        for property in &self.properties {
            let (parent, full_path) = match property.parent.as_deref() {
                None | Some("") => (ROOT_PROPERTY_SCHEMA_HANDLE, property.name.clone()),
                Some(parent_path) => {
                    let parent_path = parent_path.trim_matches('/');
                    let parent = *by_path.get(parent_path).ok_or_else(|| {
                        TdmError::InvalidArgument(format!(
                            "property '{}' names unknown parent '{}'",
                            property.name, parent_path
                        ))
                    })?;
                    (parent, format!("{}/{}", parent_path, property.name))
                }
            };
            let handle = builder.add(parent, property.tag, &property.name, property.flags());
            by_path.insert(full_path, handle);
        }
        builder.build()
    }

    /// Small thermostat-like schema covering every node kind.
    pub fn example() -> Self {
        let mut zones = PropertyDefinition::new("zones", None, 3);
        zones.dictionary = true;
        let mut setpoint = PropertyDefinition::new("setpoint", Some("zones/zone"), 2);
        setpoint.nullable = true;
        let mut schedule = PropertyDefinition::new("schedule", None, 4);
        schedule.optional = true;
        let mut boost = PropertyDefinition::new("boost", None, 5);
        boost.ephemeral = true;
        boost.optional = true;

        Self {
            name: "Thermostat".into(),
            profile_id: 0x0000_0E01,
            min_version: 1,
            max_version: 2,
            properties: vec![
                PropertyDefinition::new("mode", None, 1),
                PropertyDefinition::new("target", None, 2),
                zones,
                PropertyDefinition::new("zone", Some("zones"), 1),
                PropertyDefinition::new("label", Some("zones/zone"), 1),
                setpoint,
                schedule,
                PropertyDefinition::new("start", Some("schedule"), 1),
                PropertyDefinition::new("end", Some("schedule"), 2),
                boost,
            ],
        }
    }
}
