// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Data sinks that also stage local changes for the publisher.

use crate::catalog::TraitDataHandle;
use crate::delegate::{GetDataDelegate, PathFilter};
use crate::error::{Result, TdmError};
use crate::path::{PropertyDictionaryKey, PropertyPathHandle};
use crate::schema::{Retrieved, SchemaEngine};
use crate::sink::{ChangeRejectionSlot, ElementFlags, SinkHandler, TraitDataSink};
use crate::tlv::{Tag, TlvReader, TlvWriter};
use crate::update_client::{PendingUpdates, UpdateClient, UpdateMode};
use std::sync::Arc;

/// Storage behind an updatable sink: it applies incoming data and serves
/// staged data back for update payloads.
pub trait UpdatableSinkHandler: SinkHandler + GetDataDelegate {
    /// Paths holding local changes while incoming data is applied. Clearing
    /// operations (dictionary replace, item delete) must leave them alone.
    fn set_protected_paths(&mut self, paths: &[PropertyPathHandle]) {
        let _ = paths;
    }
}

pub struct TraitUpdatableDataSink<H> {
    sink: TraitDataSink<H>,
    update_client: Arc<UpdateClient>,
    trait_handle: TraitDataHandle,
    update_required_version: Option<u64>,
    update_start_version: Option<u64>,
}

impl<H: UpdatableSinkHandler> TraitUpdatableDataSink<H> {
    pub fn new(
        schema: Arc<SchemaEngine>,
        handler: H,
        rejection: Arc<ChangeRejectionSlot>,
        update_client: Arc<UpdateClient>,
        trait_handle: TraitDataHandle,
    ) -> Self {
        Self {
            sink: TraitDataSink::new(schema, handler, rejection),
            update_client,
            trait_handle,
            update_required_version: None,
            update_start_version: None,
        }
    }

    pub fn sink(&self) -> &TraitDataSink<H> {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut TraitDataSink<H> {
        &mut self.sink
    }

    pub fn schema(&self) -> &Arc<SchemaEngine> {
        self.sink.schema()
    }

    pub fn handler(&self) -> &H {
        self.sink.handler()
    }

    pub fn handler_mut(&mut self) -> &mut H {
        self.sink.handler_mut()
    }

    pub fn trait_handle(&self) -> TraitDataHandle {
        self.trait_handle
    }

    pub fn update_client(&self) -> &Arc<UpdateClient> {
        &self.update_client
    }

    pub fn version(&self) -> Option<u64> {
        self.sink.version()
    }

    /// Register `handle` as locally changed. The caller holds the update
    /// mutex and passes the guarded state in.
    pub fn set_updated(
        &mut self,
        pending: &mut PendingUpdates,
        handle: PropertyPathHandle,
        conditional: bool,
    ) -> Result<()> {
        if handle.is_null() || !self.schema().is_valid(handle) {
            return Err(TdmError::InvalidArgument(format!(
                "cannot mark handle {} updated",
                handle
            )));
        }
        if conditional && !self.sink.is_version_valid() {
            return Err(TdmError::VersionUnknown);
        }

        pending.add(
            self.sink.schema(),
            self.trait_handle,
            handle,
            UpdateMode::from_conditional(conditional),
        )?;
        if conditional && self.update_required_version.is_none() {
            self.update_required_version = self.sink.version();
        }
        log::debug!(
            "[TraitUpdatableDataSink::set_updated] trait {} path {} ({})",
            self.trait_handle,
            handle,
            if conditional { "conditional" } else { "unconditional" }
        );
        Ok(())
    }

    /// Serialize `handle` for an update payload.
    ///
    /// Dictionaries are written page by page: `resume_key` carries the next
    /// key between calls and is `None` once the last page was written. Any
    /// other handle is written whole, with nested dictionaries deferred.
    pub fn read_data(
        &self,
        handle: PropertyPathHandle,
        tag: Tag,
        writer: &mut TlvWriter,
        resume_key: &mut Option<PropertyDictionaryKey>,
    ) -> Result<Retrieved> {
        let schema = self.sink.schema();
        if schema.is_dictionary(handle) {
            schema.retrieve_updatable_dictionary_data(
                handle,
                tag,
                writer,
                self.sink.handler(),
                resume_key,
            )?;
            Ok(Retrieved::Complete)
        } else {
            schema.retrieve_update_data(handle, tag, writer, self.sink.handler())
        }
    }

    pub fn update_required_version(&self) -> Option<u64> {
        self.update_required_version
    }

    pub fn set_update_required_version(&mut self, version: Option<u64>) {
        self.update_required_version = version;
    }

    pub fn update_start_version(&self) -> Option<u64> {
        self.update_start_version
    }

    pub fn set_update_start_version(&mut self, version: Option<u64>) {
        self.update_start_version = version;
    }

    /// Apply an incoming data element, leaving paths with pending local
    /// changes untouched.
    pub fn store_data_element(
        &mut self,
        handle: PropertyPathHandle,
        reader: &TlvReader<'_>,
        flags: ElementFlags,
    ) -> Result<()> {
        let schema = Arc::clone(self.sink.schema());
        let filter = self.update_client.path_filter(&schema, self.trait_handle);
        if filter.is_empty() {
            return self
                .sink
                .store_data_element(handle, reader, flags, self.trait_handle, None);
        }

        self.sink.handler_mut().set_protected_paths(filter.paths());
        let filter_ref: &dyn PathFilter = &filter;
        let result =
            self.sink
                .store_data_element(handle, reader, flags, self.trait_handle, Some(filter_ref));
        self.sink.handler_mut().set_protected_paths(&[]);
        result
    }

    /// Report a rejected update through the context's rejection slot.
    pub fn reject_change(&self, status: u16) -> bool {
        self.sink.reject_change(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegate::{DataPresence, DataSinkEvent};
    use crate::path::ROOT_PROPERTY_SCHEMA_HANDLE;
    use crate::schema::{NodeFlags, SchemaBuilder};
    use crate::sink::DataElementWriter;
    use crate::catalog::{ResourceIdentifier, TraitPath};
    use crate::tlv::{dictionary_key_tag, ContainerType};
    use std::collections::BTreeMap;

    // Root { a (1), d (2) dict { item } }
    #[derive(Default)]
    struct Store {
        a: Option<u64>,
        items: BTreeMap<u16, u64>,
        protected: Vec<PropertyPathHandle>,
        events: Vec<DataSinkEvent>,
    }

    impl SinkHandler for Store {
        fn set_leaf_data(
            &mut self,
            _schema: &SchemaEngine,
            handle: PropertyPathHandle,
            reader: &TlvReader<'_>,
            _is_null: bool,
        ) -> Result<()> {
            let value = reader.get_u64()?;
            match handle.schema_handle() {
                2 => self.a = Some(value),
                _ => {
                    self.items.insert(handle.dictionary_key(), value);
                }
            }
            Ok(())
        }

        fn on_event(&mut self, _schema: &SchemaEngine, event: DataSinkEvent) -> Result<()> {
            self.events.push(event);
            Ok(())
        }
    }

    impl GetDataDelegate for Store {
        fn get_data(
            &self,
            handle: PropertyPathHandle,
            tag: Tag,
            writer: &mut TlvWriter,
        ) -> Result<DataPresence> {
            let value = match handle.schema_handle() {
                2 => self.a,
                _ => self.items.get(&handle.dictionary_key()).copied(),
            };
            match value {
                Some(v) => {
                    writer.put_u64(tag, v)?;
                    Ok(DataPresence::Present)
                }
                None => Ok(DataPresence::Absent),
            }
        }

        fn next_dictionary_item_key(
            &self,
            _dictionary: PropertyPathHandle,
            context: &mut usize,
        ) -> Option<u16> {
            let key = self.items.keys().nth(*context).copied();
            *context += 1;
            key
        }
    }

    impl UpdatableSinkHandler for Store {
        fn set_protected_paths(&mut self, paths: &[PropertyPathHandle]) {
            self.protected = paths.to_vec();
        }
    }

    fn sink() -> TraitUpdatableDataSink<Store> {
        let mut builder = SchemaBuilder::new("Updatable", 0x0E05);
        builder.add(ROOT_PROPERTY_SCHEMA_HANDLE, 1, "a", NodeFlags::leaf());
        let d = builder.add(ROOT_PROPERTY_SCHEMA_HANDLE, 2, "d", NodeFlags::dictionary());
        builder.add(d, 1, "item", NodeFlags::leaf());
        let schema = Arc::new(builder.build().expect("schema"));
        TraitUpdatableDataSink::new(
            schema,
            Store::default(),
            Arc::new(ChangeRejectionSlot::new()),
            Arc::new(UpdateClient::new()),
            3,
        )
    }

    const A: PropertyPathHandle = PropertyPathHandle::new(2, 0);
    const D: PropertyPathHandle = PropertyPathHandle::new(3, 0);

    #[test]
    fn test_set_updated_rules() {
        let mut sink = sink();
        let client = Arc::clone(sink.update_client());
        let mut pending = client.lock();

        assert!(matches!(
            sink.set_updated(&mut pending, PropertyPathHandle::new(0, 0), false),
            Err(TdmError::InvalidArgument(_))
        ));
        assert!(matches!(
            sink.set_updated(&mut pending, A, true),
            Err(TdmError::VersionUnknown)
        ));

        sink.sink_mut().set_version(12);
        sink.set_updated(&mut pending, A, true).expect("conditional");
        assert_eq!(sink.update_required_version(), Some(12));
        assert!(matches!(
            sink.set_updated(&mut pending, D, false),
            Err(TdmError::MixedConditionality { trait_handle: 3 })
        ));
        assert_eq!(pending.paths_for(3), vec![A]);
    }

    #[test]
    fn test_read_data_defers_and_paginates() {
        let mut sink = sink();
        sink.handler_mut().a = Some(1);
        for key in 0..40u16 {
            sink.handler_mut().items.insert(key, u64::from(key) * 1000);
        }

        let mut writer = TlvWriter::new();
        let mut resume = None;
        let retrieved = sink
            .read_data(
                crate::path::ROOT_PROPERTY_PATH_HANDLE,
                Tag::Anonymous,
                &mut writer,
                &mut resume,
            )
            .expect("root");
        assert_eq!(retrieved, Retrieved::Deferred(vec![D]));

        let mut seen = Vec::new();
        loop {
            let mut page = TlvWriter::with_capacity_limit(48);
            let retrieved = sink
                .read_data(D, Tag::Anonymous, &mut page, &mut resume)
                .expect("page");
            assert!(retrieved.is_complete());
            let bytes = page.finalize().expect("finalize");
            let mut reader = TlvReader::new(&bytes);
            reader.next().expect("dictionary");
            reader.enter_container().expect("enter");
            while reader.next().is_ok() {
                seen.push(reader.tag());
            }
            if resume.is_none() {
                break;
            }
        }
        let expected: Vec<_> = (0..40u16).map(dictionary_key_tag).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_incoming_data_skips_pending_paths() {
        let mut sink = sink();
        {
            let client = Arc::clone(sink.update_client());
            let mut pending = client.lock();
            sink.set_updated(&mut pending, A, false).expect("pending");
        }
        sink.handler_mut().a = Some(99);

        let trait_path = TraitPath::new(ResourceIdentifier(1), 0x0E05, 0);
        let mut writer = TlvWriter::new();
        let mut element = DataElementWriter::begin(
            &mut writer,
            &trait_path,
            sink.schema(),
            crate::path::ROOT_PROPERTY_PATH_HANDLE,
        )
        .expect("begin");
        element.version(4).expect("version");
        let data = element.writer();
        data.start_container(DataElementWriter::data_tag(), ContainerType::Structure)
            .expect("root");
        data.put_u64(Tag::Context(1), 5).expect("a");
        data.start_container(Tag::Context(2), ContainerType::Structure)
            .expect("d");
        data.put_u64(dictionary_key_tag(8), 80).expect("8");
        data.end_container().expect("end d");
        data.end_container().expect("end root");
        element.end().expect("end");
        let bytes = writer.finalize().expect("finalize");

        let mut reader = TlvReader::new(&bytes);
        reader.next().expect("element");
        sink.store_data_element(
            crate::path::ROOT_PROPERTY_PATH_HANDLE,
            &reader,
            ElementFlags::SINGLE,
        )
        .expect("store");

        assert_eq!(sink.handler().a, Some(99));
        assert_eq!(sink.handler().items.get(&8), Some(&80));
        assert_eq!(sink.version(), Some(4));
        assert!(sink.handler().protected.is_empty());
    }
}
