// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Builder for [`SchemaEngine`] node tables.

use super::{NodeBits, PropertyInfo, SchemaCompliance, SchemaEngine, SchemaVersionRange};
use crate::error::{Result, TdmError};
use crate::path::{PropertySchemaHandle, HANDLE_TABLE_OFFSET, ROOT_PROPERTY_SCHEMA_HANDLE};
use std::collections::HashSet;

/// Per-node flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeFlags {
    pub dictionary: bool,
    pub optional: bool,
    pub nullable: bool,
    pub ephemeral: bool,
}

impl NodeFlags {
    /// Plain node; a leaf or structure depending on whether it gets children.
    pub fn leaf() -> Self {
        Self::default()
    }

    pub fn structure() -> Self {
        Self::default()
    }

    pub fn dictionary() -> Self {
        Self {
            dictionary: true,
            ..Self::default()
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn ephemeral(mut self) -> Self {
        self.ephemeral = true;
        self
    }
}

#[derive(Debug, Clone)]
struct NodeSpec {
    info: PropertyInfo,
    name: Option<String>,
    flags: NodeFlags,
}

/// Accumulates nodes in table order and validates the tree on `build`.
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    name: String,
    profile_id: u32,
    nodes: Vec<NodeSpec>,
    version_range: SchemaVersionRange,
    compliance: SchemaCompliance,
}

impl SchemaBuilder {
    pub fn new(name: impl Into<String>, profile_id: u32) -> Self {
        Self {
            name: name.into(),
            profile_id,
            nodes: Vec::new(),
            version_range: SchemaVersionRange::default(),
            compliance: SchemaCompliance::default(),
        }
    }

    pub fn version_range(&mut self, min: u16, max: u16) -> &mut Self {
        self.version_range = SchemaVersionRange::new(min, max);
        self
    }

    pub fn compliance(&mut self, compliance: SchemaCompliance) -> &mut Self {
        self.compliance = compliance;
        self
    }

    /// Append a node and return its schema handle. An empty `name` leaves the
    /// node unnamed.
    pub fn add(
        &mut self,
        parent: PropertySchemaHandle,
        context_tag: u8,
        name: &str,
        flags: NodeFlags,
    ) -> PropertySchemaHandle {
        let handle = (self.nodes.len() as u32 + u32::from(HANDLE_TABLE_OFFSET))
            .min(u32::from(PropertySchemaHandle::MAX)) as PropertySchemaHandle;
        self.nodes.push(NodeSpec {
            info: PropertyInfo {
                parent_handle: parent,
                context_tag,
            },
            name: (!name.is_empty()).then(|| name.to_string()),
            flags,
        });
        handle
    }

    fn invalid(message: String) -> TdmError {
        TdmError::InvalidArgument(message)
    }

    pub fn build(&self) -> Result<SchemaEngine> {
        let count = self.nodes.len();
        if count + usize::from(HANDLE_TABLE_OFFSET) > usize::from(PropertySchemaHandle::MAX) {
            return Err(Self::invalid(format!("schema has too many nodes ({})", count)));
        }
        if self.version_range.is_empty() {
            return Err(TdmError::IncompatibleVersion);
        }

        let mut depths = vec![0usize; count];
        let mut under_dictionary = vec![false; count];
        let mut children = vec![0usize; count];
        let mut seen_tags = HashSet::new();
        let mut seen_names = HashSet::new();

        for (index, node) in self.nodes.iter().enumerate() {
            let own = index + usize::from(HANDLE_TABLE_OFFSET);
            let parent = node.info.parent_handle;

            let (parent_depth, parent_index) = if parent == ROOT_PROPERTY_SCHEMA_HANDLE {
                (0, None)
            } else if parent >= HANDLE_TABLE_OFFSET && usize::from(parent) < own {
                let parent_index = usize::from(parent - HANDLE_TABLE_OFFSET);
                (depths[parent_index], Some(parent_index))
            } else {
                return Err(Self::invalid(format!(
                    "node {} has parent {} which does not precede it",
                    own, parent
                )));
            };
            depths[index] = parent_depth + 1;

            let parent_is_dictionary =
                parent_index.is_some_and(|p| self.nodes[p].flags.dictionary);
            if let Some(p) = parent_index {
                children[p] += 1;
                under_dictionary[index] = under_dictionary[p] || parent_is_dictionary;
            }

            if node.flags.dictionary && under_dictionary[index] {
                return Err(Self::invalid(format!(
                    "dictionary {} is nested inside a dictionary element",
                    own
                )));
            }
            if !parent_is_dictionary && !seen_tags.insert((parent, node.info.context_tag)) {
                return Err(Self::invalid(format!(
                    "duplicate context tag {} under {}",
                    node.info.context_tag, parent
                )));
            }
            if let Some(name) = &node.name {
                if name.contains('/') || name.parse::<u32>().is_ok() {
                    return Err(Self::invalid(format!("node name {:?} is not usable", name)));
                }
                if !seen_names.insert((parent, name.as_str())) {
                    return Err(Self::invalid(format!(
                        "duplicate node name {:?} under {}",
                        name, parent
                    )));
                }
            }
        }

        for (index, node) in self.nodes.iter().enumerate() {
            if node.flags.dictionary && children[index] != 1 {
                return Err(Self::invalid(format!(
                    "dictionary {} must have exactly one element node, found {}",
                    index + usize::from(HANDLE_TABLE_OFFSET),
                    children[index]
                )));
            }
        }

        let mut dictionary = NodeBits::with_len(count);
        let mut optional = NodeBits::with_len(count);
        let mut nullable = NodeBits::with_len(count);
        let mut ephemeral = NodeBits::with_len(count);
        for (index, node) in self.nodes.iter().enumerate() {
            if node.flags.dictionary {
                dictionary.set(index);
            }
            if node.flags.optional {
                optional.set(index);
            }
            if node.flags.nullable {
                nullable.set(index);
            }
            if node.flags.ephemeral {
                ephemeral.set(index);
            }
        }

        log::debug!(
            "[SchemaBuilder::build] schema '{}' profile=0x{:08x} nodes={} depth={}",
            self.name,
            self.profile_id,
            count,
            depths.iter().copied().max().unwrap_or(0)
        );

        Ok(SchemaEngine {
            name: self.name.clone(),
            profile_id: self.profile_id,
            properties: self.nodes.iter().map(|n| n.info).collect(),
            names: self.nodes.iter().map(|n| n.name.clone()).collect(),
            dictionary,
            optional,
            nullable,
            ephemeral,
            tree_depth: depths.iter().copied().max().unwrap_or(0),
            version_range: self.version_range,
            compliance: self.compliance,
        })
    }
}
