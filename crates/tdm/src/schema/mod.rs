// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Trait schema engine.
//!
//! A trait schema is a static table of nodes. Each entry names its parent and
//! the context tag it carries on the wire; per-node flags mark dictionaries,
//! optional, nullable and ephemeral nodes. The engine is immutable once built
//! and is shared (`Arc<SchemaEngine>`) by every sink and source of the trait.
//!
//! # Features
//!
//! - **Navigation**: parent/child walks, depth, lowest common ancestor
//! - **Path mapping**: handle <-> wire tag sequence, handle <-> text path
//! - **Retrieve**: serialize a subtree through a [`GetDataDelegate`]
//! - **Store**: apply an encoded subtree through a [`SetDataDelegate`]
//!
//! # Example
//!
//! ```rust
//! use tdm::schema::{NodeFlags, SchemaBuilder};
//! use tdm::path::ROOT_PROPERTY_SCHEMA_HANDLE;
//!
//! let mut builder = SchemaBuilder::new("Thermostat", 0x0000_0E01);
//! let target = builder.add(ROOT_PROPERTY_SCHEMA_HANDLE, 1, "target", NodeFlags::leaf());
//! let zones = builder.add(ROOT_PROPERTY_SCHEMA_HANDLE, 2, "zones", NodeFlags::dictionary());
//! builder.add(zones, 1, "zone", NodeFlags::leaf());
//! let schema = builder.build().unwrap();
//!
//! let handle = schema.map_text_path_to_handle("zones/7").unwrap();
//! assert_eq!(handle.dictionary_key(), 7);
//! assert_eq!(schema.depth(handle), 2);
//! assert_eq!(schema.depth(tdm::path::PropertyPathHandle::new(target, 0)), 1);
//! ```
//!
//! [`GetDataDelegate`]: crate::delegate::GetDataDelegate
//! [`SetDataDelegate`]: crate::delegate::SetDataDelegate

mod builder;
mod definition;
mod retrieve;
mod store;
mod text_path;
mod version;

pub use builder::{NodeFlags, SchemaBuilder};
pub use definition::{PropertyDefinition, SchemaDefinition};
pub use retrieve::Retrieved;
pub use version::SchemaVersionRange;

use crate::error::{Result, TdmError};
use crate::path::{
    PropertyDictionaryKey, PropertyPathHandle, PropertySchemaHandle, HANDLE_TABLE_OFFSET,
    NULL_PROPERTY_PATH_HANDLE, ROOT_PROPERTY_SCHEMA_HANDLE,
};
use crate::tlv::{dictionary_key_tag, Tag, TlvError, TlvReader, TlvWriter};
use serde::{Deserialize, Serialize};

/// One row of the schema node table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyInfo {
    pub parent_handle: PropertySchemaHandle,
    pub context_tag: u8,
}

/// How `store_data` treats tags the schema does not know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaCompliance {
    /// Unknown tags abort the walk.
    Strict,
    /// Unknown tags are skipped (forward compatibility).
    Lenient,
}

impl Default for SchemaCompliance {
    fn default() -> Self {
        if cfg!(feature = "lenient-schema") {
            SchemaCompliance::Lenient
        } else {
            SchemaCompliance::Strict
        }
    }
}

/// Packed per-node flag bits.
#[derive(Debug, Clone, Default)]
pub(crate) struct NodeBits(Vec<u64>);

impl NodeBits {
    pub(crate) fn with_len(len: usize) -> Self {
        Self(vec![0; len.div_ceil(64)])
    }

    pub(crate) fn set(&mut self, index: usize) {
        self.0[index / 64] |= 1 << (index % 64);
    }

    pub(crate) fn get(&self, index: usize) -> bool {
        self.0
            .get(index / 64)
            .is_some_and(|word| word & (1 << (index % 64)) != 0)
    }
}

/// Result of [`SchemaEngine::find_lowest_common_ancestor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommonAncestor {
    pub ancestor: PropertyPathHandle,
    /// Child of `ancestor` on the path to the first handle (null if the
    /// first handle is the ancestor).
    pub branch1: PropertyPathHandle,
    /// Child of `ancestor` on the path to the second handle.
    pub branch2: PropertyPathHandle,
}

/// Immutable schema of one trait type.
#[derive(Debug, Clone)]
pub struct SchemaEngine {
    name: String,
    profile_id: u32,
    properties: Vec<PropertyInfo>,
    names: Vec<Option<String>>,
    dictionary: NodeBits,
    optional: NodeBits,
    nullable: NodeBits,
    ephemeral: NodeBits,
    tree_depth: usize,
    version_range: SchemaVersionRange,
    compliance: SchemaCompliance,
}

impl SchemaEngine {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn profile_id(&self) -> u32 {
        self.profile_id
    }

    /// Number of declared nodes (root excluded).
    pub fn node_count(&self) -> usize {
        self.properties.len()
    }

    /// Longest root-to-node distance in the table.
    pub fn tree_depth(&self) -> usize {
        self.tree_depth
    }

    pub fn compliance(&self) -> SchemaCompliance {
        self.compliance
    }

    pub fn properties(&self) -> &[PropertyInfo] {
        &self.properties
    }

    fn index(&self, schema: PropertySchemaHandle) -> Option<usize> {
        let index = usize::from(schema.checked_sub(HANDLE_TABLE_OFFSET)?);
        (index < self.properties.len()).then_some(index)
    }

    fn info(&self, handle: PropertyPathHandle) -> Option<&PropertyInfo> {
        self.index(handle.schema_handle())
            .map(|index| &self.properties[index])
    }

    fn schema_of(index: usize) -> PropertySchemaHandle {
        // Table size is bounded by the builder.
        index as PropertySchemaHandle + HANDLE_TABLE_OFFSET
    }

    /// Root or a declared node.
    pub fn is_valid(&self, handle: PropertyPathHandle) -> bool {
        handle.schema_handle() == ROOT_PROPERTY_SCHEMA_HANDLE
            || self.index(handle.schema_handle()).is_some()
    }

    /// Declared name of a node, if any.
    pub fn node_name(&self, handle: PropertyPathHandle) -> Option<&str> {
        self.index(handle.schema_handle())
            .and_then(|index| self.names[index].as_deref())
    }

    /// Handle one level up. The key is dropped when the parent is a
    /// dictionary.
    pub fn parent(&self, handle: PropertyPathHandle) -> PropertyPathHandle {
        let Some(info) = self.info(handle) else {
            return NULL_PROPERTY_PATH_HANDLE;
        };
        let parent = PropertyPathHandle::new(info.parent_handle, 0);
        if self.is_dictionary(parent) {
            parent
        } else {
            PropertyPathHandle::new(info.parent_handle, handle.dictionary_key())
        }
    }

    fn child_from(&self, parent: PropertyPathHandle, start: usize) -> PropertyPathHandle {
        if !self.is_valid(parent) {
            return NULL_PROPERTY_PATH_HANDLE;
        }
        let parent_schema = parent.schema_handle();
        self.properties
            .iter()
            .enumerate()
            .skip(start)
            .find(|(_, info)| info.parent_handle == parent_schema)
            .map(|(index, _)| {
                PropertyPathHandle::new(Self::schema_of(index), parent.dictionary_key())
            })
            .unwrap_or(NULL_PROPERTY_PATH_HANDLE)
    }

    /// First child in table order.
    pub fn first_child(&self, parent: PropertyPathHandle) -> PropertyPathHandle {
        self.child_from(parent, 0)
    }

    /// Child following `child` in table order.
    pub fn next_child(
        &self,
        parent: PropertyPathHandle,
        child: PropertyPathHandle,
    ) -> PropertyPathHandle {
        match self.index(child.schema_handle()) {
            Some(index) => self.child_from(parent, index + 1),
            None => NULL_PROPERTY_PATH_HANDLE,
        }
    }

    /// Child of `parent` carrying `context_tag`. Null under dictionaries.
    pub fn child_handle(&self, parent: PropertyPathHandle, context_tag: u8) -> PropertyPathHandle {
        if self.is_dictionary(parent) || !self.is_valid(parent) {
            return NULL_PROPERTY_PATH_HANDLE;
        }
        let parent_schema = parent.schema_handle();
        self.properties
            .iter()
            .position(|info| info.parent_handle == parent_schema && info.context_tag == context_tag)
            .map(|index| PropertyPathHandle::new(Self::schema_of(index), parent.dictionary_key()))
            .unwrap_or(NULL_PROPERTY_PATH_HANDLE)
    }

    /// Element `key` of dictionary `parent`.
    pub fn dictionary_item_handle(
        &self,
        parent: PropertyPathHandle,
        key: PropertyDictionaryKey,
    ) -> PropertyPathHandle {
        if !self.is_dictionary(parent) {
            return NULL_PROPERTY_PATH_HANDLE;
        }
        let element = self.first_child(parent);
        if element.is_null() {
            return NULL_PROPERTY_PATH_HANDLE;
        }
        element.with_dictionary_key(key)
    }

    /// True if no node has `handle` as parent. The root is never a leaf.
    pub fn is_leaf(&self, handle: PropertyPathHandle) -> bool {
        if self.index(handle.schema_handle()).is_none() {
            return false;
        }
        let schema = handle.schema_handle();
        !self.properties.iter().any(|info| info.parent_handle == schema)
    }

    fn flag(&self, bits: &NodeBits, handle: PropertyPathHandle) -> bool {
        self.index(handle.schema_handle())
            .is_some_and(|index| bits.get(index))
    }

    pub fn is_dictionary(&self, handle: PropertyPathHandle) -> bool {
        self.flag(&self.dictionary, handle)
    }

    pub fn is_optional(&self, handle: PropertyPathHandle) -> bool {
        self.flag(&self.optional, handle)
    }

    pub fn is_nullable(&self, handle: PropertyPathHandle) -> bool {
        self.flag(&self.nullable, handle)
    }

    pub fn is_ephemeral(&self, handle: PropertyPathHandle) -> bool {
        self.flag(&self.ephemeral, handle)
    }

    /// True if the direct parent of `handle` is a dictionary.
    pub fn is_dictionary_item(&self, handle: PropertyPathHandle) -> bool {
        self.info(handle).is_some_and(|info| {
            self.is_dictionary(PropertyPathHandle::new(info.parent_handle, 0))
        })
    }

    /// Number of parent hops to the root; -1 for null or unknown handles.
    pub fn depth(&self, handle: PropertyPathHandle) -> i32 {
        if handle.schema_handle() == ROOT_PROPERTY_SCHEMA_HANDLE {
            return 0;
        }
        if self.index(handle.schema_handle()).is_none() {
            return -1;
        }
        let mut depth = 0;
        let mut current = handle;
        while current.schema_handle() != ROOT_PROPERTY_SCHEMA_HANDLE {
            current = self.parent(current);
            depth += 1;
            if current.is_null() || depth as usize > self.tree_depth {
                return -1;
            }
        }
        depth
    }

    /// Lowest common ancestor of two handles and the child of it on each
    /// side. `None` if either handle is invalid.
    pub fn find_lowest_common_ancestor(
        &self,
        handle1: PropertyPathHandle,
        handle2: PropertyPathHandle,
    ) -> Option<CommonAncestor> {
        let mut depth1 = self.depth(handle1);
        let mut depth2 = self.depth(handle2);
        if depth1 < 0 || depth2 < 0 {
            return None;
        }

        let (mut h1, mut h2) = (handle1, handle2);
        let mut branch1 = NULL_PROPERTY_PATH_HANDLE;
        let mut branch2 = NULL_PROPERTY_PATH_HANDLE;

        while depth1 > depth2 {
            branch1 = h1;
            h1 = self.parent(h1);
            depth1 -= 1;
        }
        while depth2 > depth1 {
            branch2 = h2;
            h2 = self.parent(h2);
            depth2 -= 1;
        }
        while h1 != h2 {
            if h1.is_null() || h2.is_null() {
                return None;
            }
            branch1 = h1;
            branch2 = h2;
            h1 = self.parent(h1);
            h2 = self.parent(h2);
        }

        Some(CommonAncestor {
            ancestor: h1,
            branch1,
            branch2,
        })
    }

    /// Wire tag of `handle`: a dictionary-key tag below a dictionary, the
    /// declared context tag otherwise. Anonymous for the root.
    pub fn tag(&self, handle: PropertyPathHandle) -> Tag {
        match self.info(handle) {
            Some(_) if self.is_dictionary_item(handle) => dictionary_key_tag(handle.dictionary_key()),
            Some(info) => Tag::Context(info.context_tag),
            None => Tag::Anonymous,
        }
    }

    /// Resolve one path tag below `parent`.
    pub(crate) fn resolve_tag(
        &self,
        parent: PropertyPathHandle,
        tag: Tag,
    ) -> Result<PropertyPathHandle> {
        let child = match tag {
            Tag::Context(n) => self.child_handle(parent, n),
            Tag::Profile { number, .. } if tag.is_dictionary_key() => {
                let key = PropertyDictionaryKey::try_from(number)
                    .map_err(|_| TdmError::InvalidTag(tag))?;
                self.dictionary_item_handle(parent, key)
            }
            _ => return Err(TdmError::InvalidTag(tag)),
        };
        if child.is_null() {
            return Err(TdmError::TagNotFound { parent, tag });
        }
        Ok(child)
    }

    /// Resolve the remaining elements of the current container (a sequence
    /// of tagged path elements) from the root.
    pub fn map_path_to_handle(&self, reader: &mut TlvReader<'_>) -> Result<PropertyPathHandle> {
        let mut handle = PropertyPathHandle::new(ROOT_PROPERTY_SCHEMA_HANDLE, 0);
        loop {
            match reader.next() {
                Ok(()) => {}
                Err(TlvError::EndOfTlv) => return Ok(handle),
                Err(e) => return Err(e.into()),
            }
            handle = self.resolve_tag(handle, reader.tag())?;
        }
    }

    /// Write one null element per level from the root down to `handle`.
    pub fn map_handle_to_path(
        &self,
        handle: PropertyPathHandle,
        writer: &mut TlvWriter,
    ) -> Result<()> {
        for tag in self.path_tags(handle)? {
            writer.put_null(tag)?;
        }
        Ok(())
    }

    /// Root-to-handle tag sequence written into `tags`; returns the count.
    pub fn relative_path_tags(
        &self,
        handle: PropertyPathHandle,
        tags: &mut [Tag],
    ) -> Result<usize> {
        let depth = self.depth(handle);
        if depth < 0 {
            return Err(TdmError::InvalidArgument(format!(
                "handle {} is outside the schema",
                handle
            )));
        }
        let count = depth as usize;
        if count > tags.len() {
            return Err(TlvError::BufferTooSmall.into());
        }
        let mut current = handle;
        for slot in tags[..count].iter_mut().rev() {
            *slot = self.tag(current);
            current = self.parent(current);
        }
        Ok(count)
    }

    /// Owned variant of [`relative_path_tags`](Self::relative_path_tags).
    pub fn path_tags(&self, handle: PropertyPathHandle) -> Result<Vec<Tag>> {
        let mut tags = vec![Tag::Anonymous; self.tree_depth];
        let count = self.relative_path_tags(handle, &mut tags)?;
        tags.truncate(count);
        Ok(tags)
    }
}
