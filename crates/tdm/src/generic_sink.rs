// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Schema-agnostic updatable sink backed by per-leaf buffers.
//!
//! Every leaf value is kept as its own encoded TLV element. Values are set
//! and read by textual path (see
//! [`SchemaEngine::map_text_path_to_handle`]):
//!
//! ```
//! use std::sync::Arc;
//! use tdm::generic_sink::{GenericTraitUpdatableDataSink, LeafStore};
//! use tdm::schema::SchemaDefinition;
//! use tdm::sink::ChangeRejectionSlot;
//! use tdm::update_client::UpdateClient;
//!
//! let schema = Arc::new(SchemaDefinition::example().build(Default::default()).unwrap());
//! let store = LeafStore::new(Arc::clone(&schema), 256);
//! let mut sink = GenericTraitUpdatableDataSink::new(
//!     schema,
//!     store,
//!     Arc::new(ChangeRejectionSlot::new()),
//!     Arc::new(UpdateClient::new()),
//!     0,
//! );
//! sink.set_string("mode", "heat", false).unwrap();
//! assert_eq!(sink.get_string("mode").unwrap(), "heat");
//! assert!(sink.update_client().has_pending());
//! ```

use crate::delegate::{DataPresence, DataSinkEvent, GetDataDelegate};
use crate::error::{Result, TdmError};
use crate::path::{PropertyDictionaryKey, PropertyPathHandle};
use crate::schema::SchemaEngine;
use crate::sink::SinkHandler;
use crate::tlv::{ContainerType, Tag, TlvError, TlvReader, TlvResult, TlvValue, TlvWriter};
use crate::updatable::{TraitUpdatableDataSink, UpdatableSinkHandler};
use crate::update_client::is_ancestor_or_self;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// One staged value: a complete anonymous TLV element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafBuffer(Vec<u8>);

impl LeafBuffer {
    fn encode<F>(max_size: usize, encode: F) -> Result<Self>
    where
        F: FnOnce(&mut TlvWriter) -> TlvResult<()>,
    {
        let mut writer = TlvWriter::with_capacity_limit(max_size);
        encode(&mut writer).map_err(|e| match e {
            TlvError::BufferTooSmall => TdmError::OutOfMemory("leaf exceeds max_leaf_size"),
            TlvError::OutOfMemory => TdmError::OutOfMemory("leaf buffer allocation"),
            other => other.into(),
        })?;
        Ok(Self(writer.finalize()?))
    }

    /// Copy the element under the reader cursor.
    pub fn copy_from(reader: &TlvReader<'_>, max_size: usize) -> Result<Self> {
        Self::encode(max_size, |w| w.copy_element(Tag::Anonymous, reader))
    }

    pub fn null() -> Result<Self> {
        Self::encode(usize::MAX, |w| w.put_null(Tag::Anonymous))
    }

    /// Reader positioned on the value.
    pub fn reader(&self) -> Result<TlvReader<'_>> {
        let mut reader = TlvReader::new(&self.0);
        reader.next()?;
        Ok(reader)
    }

    pub fn is_null(&self) -> bool {
        self.reader().is_ok_and(|r| r.is_null())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Staged leaf buffers of one trait instance.
///
/// Null nullable containers are stored as a null buffer at the container's
/// handle.
#[derive(Debug)]
pub struct LeafStore {
    schema: Arc<SchemaEngine>,
    leaves: BTreeMap<PropertyPathHandle, LeafBuffer>,
    protected: Vec<PropertyPathHandle>,
    max_leaf_size: usize,
}

impl LeafStore {
    pub fn new(schema: Arc<SchemaEngine>, max_leaf_size: usize) -> Self {
        Self {
            schema,
            leaves: BTreeMap::new(),
            protected: Vec::new(),
            max_leaf_size,
        }
    }

    pub fn max_leaf_size(&self) -> usize {
        self.max_leaf_size
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    pub fn get(&self, handle: PropertyPathHandle) -> Option<&LeafBuffer> {
        self.leaves.get(&handle)
    }

    /// Store `buffer` at `handle`, dropping whatever it replaces: the prior
    /// buffer, null markers on enclosing containers and, for a container,
    /// everything below it.
    pub fn replace(&mut self, handle: PropertyPathHandle, buffer: LeafBuffer) -> Option<LeafBuffer> {
        let schema = &self.schema;
        let container = !schema.is_leaf(handle);
        self.leaves.retain(|stored, _| {
            if *stored == handle {
                return true;
            }
            let enclosing = is_ancestor_or_self(schema, *stored, handle);
            let below = container && is_ancestor_or_self(schema, handle, *stored);
            !(enclosing || below)
        });
        self.leaves.insert(handle, buffer)
    }

    /// Drop `handle` and everything below it, except protected paths.
    /// Returns the number of buffers released.
    pub fn remove_subtree(&mut self, handle: PropertyPathHandle) -> usize {
        let schema = &self.schema;
        let protected = &self.protected;
        let before = self.leaves.len();
        self.leaves.retain(|stored, _| {
            !is_ancestor_or_self(schema, handle, *stored)
                || protected
                    .iter()
                    .any(|p| is_ancestor_or_self(schema, *p, *stored))
        });
        before - self.leaves.len()
    }

    pub fn clear(&mut self) {
        self.leaves.clear();
    }

    fn has_data_under(&self, handle: PropertyPathHandle) -> bool {
        self.leaves
            .keys()
            .any(|stored| is_ancestor_or_self(&self.schema, handle, *stored))
    }

    /// Keys of `dictionary` with at least one stored value, ascending.
    pub fn dictionary_keys(&self, dictionary: PropertyPathHandle) -> Vec<PropertyDictionaryKey> {
        let keys: BTreeSet<_> = self
            .leaves
            .keys()
            .filter(|stored| {
                let item = self
                    .schema
                    .dictionary_item_handle(dictionary, stored.dictionary_key());
                !item.is_null() && is_ancestor_or_self(&self.schema, item, **stored)
            })
            .map(|stored| stored.dictionary_key())
            .collect();
        keys.into_iter().collect()
    }
}

impl SinkHandler for LeafStore {
    fn set_leaf_data(
        &mut self,
        _schema: &SchemaEngine,
        handle: PropertyPathHandle,
        reader: &TlvReader<'_>,
        _is_null: bool,
    ) -> Result<()> {
        let buffer = LeafBuffer::copy_from(reader, self.max_leaf_size)?;
        self.replace(handle, buffer);
        Ok(())
    }

    fn set_subtree_null(&mut self, _schema: &SchemaEngine, handle: PropertyPathHandle) -> Result<()> {
        self.replace(handle, LeafBuffer::null()?);
        Ok(())
    }

    fn on_event(&mut self, _schema: &SchemaEngine, event: DataSinkEvent) -> Result<()> {
        match event {
            DataSinkEvent::DictionaryReplaceBegin(handle)
            | DataSinkEvent::DictionaryItemDelete(handle)
            | DataSinkEvent::DictionaryItemModifyBegin(handle) => {
                let released = self.remove_subtree(handle);
                log::trace!("[LeafStore::on_event] {:?} released {}", event, released);
            }
            _ => {}
        }
        Ok(())
    }
}

impl GetDataDelegate for LeafStore {
    fn get_data(
        &self,
        handle: PropertyPathHandle,
        tag: Tag,
        writer: &mut TlvWriter,
    ) -> Result<DataPresence> {
        let leaf = self.schema.is_leaf(handle);
        if let Some(buffer) = self.leaves.get(&handle) {
            if buffer.is_null() {
                return Ok(DataPresence::Null);
            }
            if leaf {
                writer.copy_element(tag, &buffer.reader()?)?;
            }
            return Ok(DataPresence::Present);
        }
        if leaf || (self.schema.is_optional(handle) && !self.has_data_under(handle)) {
            return Ok(DataPresence::Absent);
        }
        Ok(DataPresence::Present)
    }

    fn next_dictionary_item_key(
        &self,
        dictionary: PropertyPathHandle,
        context: &mut usize,
    ) -> Option<PropertyDictionaryKey> {
        let key = self.dictionary_keys(dictionary).get(*context).copied();
        *context += 1;
        key
    }
}

impl UpdatableSinkHandler for LeafStore {
    fn set_protected_paths(&mut self, paths: &[PropertyPathHandle]) {
        self.protected = paths.to_vec();
    }
}

/// Updatable sink over a [`LeafStore`].
pub type GenericTraitUpdatableDataSink = TraitUpdatableDataSink<LeafStore>;

impl TraitUpdatableDataSink<LeafStore> {
    /// Take the update mutex, resolve `path`, encode the new value, mark it
    /// updated and swap it in. Nothing changes if any step fails.
    fn stage<F>(
        &mut self,
        path: &str,
        conditional: bool,
        allow_container: bool,
        encode: F,
    ) -> Result<PropertyPathHandle>
    where
        F: FnOnce(&mut TlvWriter) -> TlvResult<()>,
    {
        let client = Arc::clone(self.update_client());
        let mut pending = client.lock();

        let schema = Arc::clone(self.schema());
        let handle = schema.map_text_path_to_handle(path)?;
        if !schema.is_leaf(handle) && !allow_container {
            return Err(TdmError::InvalidArgument(format!(
                "'{}' is not a leaf",
                path
            )));
        }
        let buffer = LeafBuffer::encode(self.handler().max_leaf_size(), encode)?;
        self.set_updated(&mut pending, handle, conditional)?;
        self.handler_mut().replace(handle, buffer);
        Ok(handle)
    }

    pub fn set_data(&mut self, path: &str, value: &TlvValue, conditional: bool) -> Result<()> {
        if matches!(value, TlvValue::Null) {
            return self.set_null(path, conditional);
        }
        self.stage(path, conditional, false, |w| w.put_value(Tag::Anonymous, value))
            .map(|_| ())
    }

    pub fn set<T: Into<TlvValue>>(&mut self, path: &str, value: T, conditional: bool) -> Result<()> {
        self.set_data(path, &value.into(), conditional)
    }

    pub fn set_boolean(&mut self, path: &str, value: bool, conditional: bool) -> Result<()> {
        self.stage(path, conditional, false, |w| w.put_bool(Tag::Anonymous, value))
            .map(|_| ())
    }

    pub fn set_string(&mut self, path: &str, value: &str, conditional: bool) -> Result<()> {
        self.stage(path, conditional, false, |w| w.put_string(Tag::Anonymous, value))
            .map(|_| ())
    }

    pub fn set_bytes(&mut self, path: &str, value: &[u8], conditional: bool) -> Result<()> {
        self.stage(path, conditional, false, |w| w.put_bytes(Tag::Anonymous, value))
            .map(|_| ())
    }

    /// Stage an already encoded element (its tag is dropped).
    pub fn set_tlv_bytes(&mut self, path: &str, encoded: &[u8], conditional: bool) -> Result<()> {
        let mut reader = TlvReader::new(encoded);
        reader.next()?;
        self.stage(path, conditional, false, |w| w.copy_element(Tag::Anonymous, &reader))
            .map(|_| ())
    }

    /// Null a nullable leaf or container.
    pub fn set_null(&mut self, path: &str, conditional: bool) -> Result<()> {
        let handle = self.schema().map_text_path_to_handle(path)?;
        if !self.schema().is_nullable(handle) {
            return Err(TdmError::mismatch(handle, "null on non-nullable node"));
        }
        self.stage(path, conditional, true, |w| w.put_null(Tag::Anonymous))
            .map(|_| ())
    }

    pub fn set_string_array<S: AsRef<str>>(
        &mut self,
        path: &str,
        values: &[S],
        conditional: bool,
    ) -> Result<()> {
        self.stage(path, conditional, false, |w| {
            w.start_container(Tag::Anonymous, ContainerType::Array)?;
            for value in values {
                w.put_string(Tag::Anonymous, value.as_ref())?;
            }
            w.end_container()
        })
        .map(|_| ())
    }

    fn leaf(&self, path: &str) -> Result<&LeafBuffer> {
        let handle = self.schema().map_text_path_to_handle(path)?;
        self.handler()
            .get(handle)
            .ok_or_else(|| TdmError::InvalidArgument(format!("no value at '{}'", path)))
    }

    pub fn get_data(&self, path: &str) -> Result<TlvValue> {
        Ok(self.leaf(path)?.reader()?.value_to_owned()?)
    }

    pub fn get_boolean(&self, path: &str) -> Result<bool> {
        Ok(self.leaf(path)?.reader()?.get_bool()?)
    }

    pub fn get_string(&self, path: &str) -> Result<String> {
        Ok(self.leaf(path)?.reader()?.get_str()?.to_string())
    }

    pub fn get_bytes(&self, path: &str) -> Result<Vec<u8>> {
        Ok(self.leaf(path)?.reader()?.get_bytes()?.to_vec())
    }

    /// The staged element, anonymously tagged.
    pub fn get_tlv_bytes(&self, path: &str) -> Result<Vec<u8>> {
        Ok(self.leaf(path)?.as_bytes().to_vec())
    }

    pub fn get_string_array(&self, path: &str) -> Result<Vec<String>> {
        let mut reader = self.leaf(path)?.reader()?;
        reader.enter_container()?;
        let mut values = Vec::new();
        loop {
            match reader.next() {
                Ok(()) => values.push(reader.get_str()?.to_string()),
                Err(TlvError::EndOfTlv) => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(values)
    }

    pub fn is_null(&self, path: &str) -> Result<bool> {
        let handle = self.schema().map_text_path_to_handle(path)?;
        Ok(self.handler().get(handle).is_some_and(LeafBuffer::is_null))
    }

    /// Remove a dictionary item or optional node. Removing an item marks
    /// the whole dictionary updated.
    pub fn delete_data(&mut self, path: &str, conditional: bool) -> Result<()> {
        let client = Arc::clone(self.update_client());
        let mut pending = client.lock();

        let schema = Arc::clone(self.schema());
        let handle = schema.map_text_path_to_handle(path)?;
        let updated = if schema.is_dictionary_item(handle) {
            schema.parent(handle)
        } else if schema.is_optional(handle) {
            handle
        } else {
            return Err(TdmError::InvalidArgument(format!(
                "'{}' is neither a dictionary item nor optional",
                path
            )));
        };
        self.set_updated(&mut pending, updated, conditional)?;
        self.handler_mut().remove_subtree(handle);
        Ok(())
    }

    /// Drop every staged value. Pending update state is left as is.
    pub fn clear(&mut self) {
        self.handler_mut().clear();
    }
}
