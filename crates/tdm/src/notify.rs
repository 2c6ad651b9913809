// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Publisher-side change tracking and notify payloads.
//!
//! The [`NotificationEngine`] is shared by every data source of a context and
//! records dirty paths per source. A [`NotificationBuilder`] turns those
//! paths into a notify payload:
//!
//! ```text
//! anonymous structure {
//!   1: data list  (array of data elements)
//!   2: event list (array of event structures, optional)
//! }
//! ```

use crate::catalog::{ResourceIdentifier, TraitPath};
use crate::delegate::GetDataDelegate;
use crate::error::{Result, TdmError};
use crate::path::{PropertyDictionaryKey, PropertyPathHandle, ROOT_PROPERTY_PATH_HANDLE};
use crate::schema::SchemaEngine;
use crate::sink::DataElementWriter;
use crate::source::TraitDataSource;
use crate::tlv::{ContainerType, Tag, TlvError, TlvReader, TlvWriter};
use crate::update_client::is_ancestor_or_self;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

pub const TAG_DATA_LIST: u8 = 1;
pub const TAG_EVENT_LIST: u8 = 2;

const TAG_EVENT_SOURCE: u8 = 1;
const TAG_EVENT_IMPORTANCE: u8 = 2;
const TAG_EVENT_ID: u8 = 3;
const TAG_EVENT_TIMESTAMP: u8 = 4;
const TAG_EVENT_PROFILE: u8 = 5;
const TAG_EVENT_TYPE: u8 = 6;
const TAG_EVENT_DATA: u8 = 7;

/// Identifier of a data source within a [`NotificationEngine`].
pub type SourceId = u64;

/// Changes recorded for one source since the last notification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirtySet {
    /// Changed paths; no entry is below another.
    pub paths: Vec<PropertyPathHandle>,
    /// Deleted dictionary items.
    pub deleted: Vec<PropertyPathHandle>,
}

impl DirtySet {
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty() && self.deleted.is_empty()
    }
}

/// Dirty-path registry keyed by source.
#[derive(Debug, Default)]
pub struct NotificationEngine {
    dirty: DashMap<SourceId, DirtySet>,
    next_source: AtomicU64,
}

impl NotificationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_source(&self) -> SourceId {
        self.next_source.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Forget a source and anything it left dirty.
    pub fn unregister_source(&self, source: SourceId) {
        self.dirty.remove(&source);
    }

    /// Mark `handle` changed. Paths below an already dirty ancestor are not
    /// recorded; a new ancestor absorbs its dirty descendants.
    pub fn set_dirty(&self, source: SourceId, schema: &SchemaEngine, handle: PropertyPathHandle) {
        let mut set = self.dirty.entry(source).or_default();
        if set
            .paths
            .iter()
            .any(|dirty| is_ancestor_or_self(schema, *dirty, handle))
        {
            return;
        }
        set.paths
            .retain(|dirty| !is_ancestor_or_self(schema, handle, *dirty));
        set.paths.push(handle);
        log::trace!("[NotificationEngine::set_dirty] source {} path {}", source, handle);
    }

    /// Record the deletion of dictionary item `item`.
    pub fn delete_key(&self, source: SourceId, schema: &SchemaEngine, item: PropertyPathHandle) {
        let mut set = self.dirty.entry(source).or_default();
        set.paths
            .retain(|dirty| !is_ancestor_or_self(schema, item, *dirty));
        if !set.deleted.contains(&item) {
            set.deleted.push(item);
        }
        log::trace!("[NotificationEngine::delete_key] source {} item {}", source, item);
    }

    pub fn is_dirty(&self, source: SourceId) -> bool {
        self.dirty
            .get(&source)
            .is_some_and(|set| !set.is_empty())
    }

    /// Remove and return the source's changes.
    pub fn take_dirty(&self, source: SourceId) -> DirtySet {
        self.dirty
            .remove(&source)
            .map(|(_, set)| set)
            .unwrap_or_default()
    }
}

/// Application event carried in a notify payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub source: ResourceIdentifier,
    pub importance: u8,
    pub id: u64,
    /// Milliseconds since the UNIX epoch.
    pub timestamp: u64,
    pub profile_id: u32,
    pub event_type: u32,
    /// One encoded TLV element, re-tagged on write.
    pub data: Option<Vec<u8>>,
}

impl Event {
    pub fn write(&self, writer: &mut TlvWriter, tag: Tag) -> Result<()> {
        writer.start_container(tag, ContainerType::Structure)?;
        writer.put_u64(Tag::Context(TAG_EVENT_SOURCE), self.source.0)?;
        writer.put_u64(Tag::Context(TAG_EVENT_IMPORTANCE), u64::from(self.importance))?;
        writer.put_u64(Tag::Context(TAG_EVENT_ID), self.id)?;
        writer.put_u64(Tag::Context(TAG_EVENT_TIMESTAMP), self.timestamp)?;
        writer.put_u64(Tag::Context(TAG_EVENT_PROFILE), u64::from(self.profile_id))?;
        writer.put_u64(Tag::Context(TAG_EVENT_TYPE), u64::from(self.event_type))?;
        if let Some(data) = &self.data {
            let mut reader = TlvReader::new(data);
            reader.next()?;
            writer.copy_element(Tag::Context(TAG_EVENT_DATA), &reader)?;
        }
        writer.end_container()?;
        Ok(())
    }

    /// Parse the event structure under the reader cursor.
    pub fn parse(reader: &TlvReader<'_>) -> Result<Self> {
        let mut fields = reader.clone();
        fields.enter_container()?;
        let mut event = Event {
            source: ResourceIdentifier::SELF_NODE,
            importance: 0,
            id: 0,
            timestamp: 0,
            profile_id: 0,
            event_type: 0,
            data: None,
        };
        loop {
            match fields.next() {
                Ok(()) => {}
                Err(TlvError::EndOfTlv) => break,
                Err(e) => return Err(e.into()),
            }
            match fields.tag() {
                Tag::Context(TAG_EVENT_SOURCE) => {
                    event.source = ResourceIdentifier(fields.get_u64()?)
                }
                Tag::Context(TAG_EVENT_IMPORTANCE) => {
                    event.importance = u8::try_from(fields.get_u64()?).map_err(|_| {
                        TdmError::InvalidArgument("event importance out of range".into())
                    })?
                }
                Tag::Context(TAG_EVENT_ID) => event.id = fields.get_u64()?,
                Tag::Context(TAG_EVENT_TIMESTAMP) => event.timestamp = fields.get_u64()?,
                Tag::Context(TAG_EVENT_PROFILE) => event.profile_id = fields.get_u32()?,
                Tag::Context(TAG_EVENT_TYPE) => event.event_type = fields.get_u32()?,
                Tag::Context(TAG_EVENT_DATA) => event.data = Some(fields.raw_element()?.to_vec()),
                _ => {}
            }
        }
        Ok(event)
    }
}

/// Accumulates data elements and events into one notify payload.
#[derive(Debug, Default)]
pub struct NotificationBuilder {
    elements: Vec<Vec<u8>>,
    events: Vec<Event>,
}

impl NotificationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty() && self.events.is_empty()
    }

    /// Number of data elements added so far.
    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    /// Add one change of `source` made of `dirty`. Deletions come first,
    /// grouped per dictionary; every element but the last is flagged as a
    /// partial change. Returns the number of elements written.
    pub fn add_source<H: GetDataDelegate>(
        &mut self,
        trait_path: &TraitPath,
        source: &mut TraitDataSource<H>,
        dirty: &DirtySet,
    ) -> Result<usize> {
        if dirty.is_empty() {
            return Ok(0);
        }
        let version = source.get_version();

        let mut deletes: Vec<(PropertyPathHandle, Vec<PropertyDictionaryKey>)> = Vec::new();
        for item in &dirty.deleted {
            let dictionary = source.schema().parent(*item);
            match deletes.iter_mut().find(|(d, _)| *d == dictionary) {
                Some((_, keys)) => keys.push(item.dictionary_key()),
                None => deletes.push((dictionary, vec![item.dictionary_key()])),
            }
        }

        let total = deletes.len() + dirty.paths.len();
        let mut written = 0;
        for (dictionary, keys) in &deletes {
            written += 1;
            let element =
                encode_element(trait_path, source, *dictionary, version, written < total, keys, false)?;
            self.elements.push(element);
        }
        for path in &dirty.paths {
            written += 1;
            let element =
                encode_element(trait_path, source, *path, version, written < total, &[], true)?;
            self.elements.push(element);
        }
        log::debug!(
            "[NotificationBuilder::add_source] {} at version {}: {} element(s)",
            trait_path,
            version,
            written
        );
        Ok(written)
    }

    /// Add the full data of `source` as a single element.
    pub fn add_full_source<H: GetDataDelegate>(
        &mut self,
        trait_path: &TraitPath,
        source: &mut TraitDataSource<H>,
    ) -> Result<()> {
        let version = source.get_version();
        let element = encode_element(
            trait_path,
            source,
            ROOT_PROPERTY_PATH_HANDLE,
            version,
            false,
            &[],
            true,
        )?;
        self.elements.push(element);
        Ok(())
    }

    pub fn add_event(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Write the notify envelope.
    pub fn finish(self) -> Result<Vec<u8>> {
        let mut writer = TlvWriter::new();
        writer.start_container(Tag::Anonymous, ContainerType::Structure)?;
        writer.start_container(Tag::Context(TAG_DATA_LIST), ContainerType::Array)?;
        for element in &self.elements {
            writer.put_raw_element(element)?;
        }
        writer.end_container()?;
        if !self.events.is_empty() {
            writer.start_container(Tag::Context(TAG_EVENT_LIST), ContainerType::Array)?;
            for event in &self.events {
                event.write(&mut writer, Tag::Anonymous)?;
            }
            writer.end_container()?;
        }
        writer.end_container()?;
        Ok(writer.finalize()?)
    }
}

fn encode_element<H: GetDataDelegate>(
    trait_path: &TraitPath,
    source: &TraitDataSource<H>,
    handle: PropertyPathHandle,
    version: u64,
    partial: bool,
    deleted: &[PropertyDictionaryKey],
    with_data: bool,
) -> Result<Vec<u8>> {
    let mut writer = TlvWriter::new();
    let mut element = DataElementWriter::begin(&mut writer, trait_path, source.schema(), handle)?;
    element
        .version(version)?
        .partial_change(partial)?
        .deleted_keys(deleted)?;
    if with_data {
        source.read_data(handle, DataElementWriter::data_tag(), element.writer())?;
    }
    element.end()?;
    Ok(writer.finalize()?)
}

/// Drain the dirty state of every source into one notify payload.
/// Returns `None` when no source has changes.
pub fn build_notification<'a, H, I>(sources: I) -> Result<Option<Vec<u8>>>
where
    H: GetDataDelegate + 'a,
    I: IntoIterator<Item = (TraitPath, &'a mut TraitDataSource<H>)>,
{
    let mut builder = NotificationBuilder::new();
    for (trait_path, source) in sources {
        let dirty = source.take_dirty();
        builder.add_source(&trait_path, source, &dirty)?;
    }
    if builder.is_empty() {
        return Ok(None);
    }
    builder.finish().map(Some)
}
