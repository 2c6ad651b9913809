// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Trait data sources (publisher side).
//!
//! Changes are made under a [`SourceLock`]. Paths marked dirty are reported
//! to the shared [`NotificationEngine`]; when the lock is released in managed
//! mode and anything was dirtied, the version is bumped once.

use crate::config::VersionPolicy;
use crate::context::TdmContext;
use crate::delegate::{DataPresence, GetDataDelegate};
use crate::error::{Result, TdmError};
use crate::notify::{DirtySet, NotificationEngine, SourceId};
use crate::path::PropertyPathHandle;
use crate::schema::SchemaEngine;
use crate::tlv::{Tag, TlvWriter};
use std::sync::Arc;

/// Producer side of one trait instance.
pub struct TraitDataSource<H> {
    schema: Arc<SchemaEngine>,
    id: SourceId,
    version: Option<u64>,
    policy: VersionPolicy,
    engine: Arc<NotificationEngine>,
    dirty_since_lock: bool,
    handler: H,
}

impl<H> TraitDataSource<H> {
    /// Source registered with the context's notification engine, using the
    /// configured version policy.
    pub fn new(schema: Arc<SchemaEngine>, handler: H, context: &TdmContext) -> Self {
        Self::with_engine(
            schema,
            handler,
            Arc::clone(context.notification_engine()),
            context.config().version_policy,
        )
    }

    pub fn with_engine(
        schema: Arc<SchemaEngine>,
        handler: H,
        engine: Arc<NotificationEngine>,
        policy: VersionPolicy,
    ) -> Self {
        let id = engine.register_source();
        Self {
            schema,
            id,
            version: None,
            policy,
            engine,
            dirty_since_lock: false,
            handler,
        }
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn schema(&self) -> &Arc<SchemaEngine> {
        &self.schema
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn version_policy(&self) -> VersionPolicy {
        self.policy
    }

    /// Current version. A source that was never given one picks a random
    /// non-zero version on first access.
    pub fn get_version(&mut self) -> u64 {
        *self.version.get_or_insert_with(|| {
            let version = fastrand::u64(1..);
            log::debug!(
                "[TraitDataSource::get_version] source initial version {}",
                version
            );
            version
        })
    }

    pub fn set_version(&mut self, version: u64) {
        self.version = Some(version);
    }

    pub fn increment_version(&mut self) -> u64 {
        let next = self.get_version().wrapping_add(1);
        self.version = Some(next);
        next
    }

    /// Start a batch of changes.
    pub fn lock(&mut self) -> SourceLock<'_, H> {
        self.dirty_since_lock = false;
        SourceLock { source: self }
    }

    pub fn is_dirty(&self) -> bool {
        self.engine.is_dirty(self.id)
    }

    /// Remove and return the changes recorded since the last call.
    pub fn take_dirty(&self) -> DirtySet {
        self.engine.take_dirty(self.id)
    }
}

impl<H: GetDataDelegate> TraitDataSource<H> {
    /// Serialize `handle` and its subtree under `tag` for a publish.
    pub fn read_data(
        &self,
        handle: PropertyPathHandle,
        tag: Tag,
        writer: &mut TlvWriter,
    ) -> Result<()> {
        self.schema
            .retrieve_data(handle, tag, writer, &self.handler, None)
    }

    /// Ask the handler for a single leaf value.
    pub fn get_data(
        &self,
        handle: PropertyPathHandle,
        tag: Tag,
        writer: &mut TlvWriter,
    ) -> Result<DataPresence> {
        if !self.schema.is_leaf(handle) {
            return Err(TdmError::InvalidArgument(format!(
                "handle {} is not a leaf",
                handle
            )));
        }
        self.handler.get_data(handle, tag, writer)
    }
}

impl<H> Drop for TraitDataSource<H> {
    fn drop(&mut self) {
        self.engine.unregister_source(self.id);
    }
}

/// Guard over a batch of source changes.
pub struct SourceLock<'a, H> {
    source: &'a mut TraitDataSource<H>,
}

impl<H> SourceLock<'_, H> {
    pub fn handler(&self) -> &H {
        &self.source.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.source.handler
    }

    /// Mark `handle` as changed.
    pub fn set_dirty(&mut self, handle: PropertyPathHandle) -> Result<()> {
        let schema = &self.source.schema;
        if handle.is_null() || !schema.is_valid(handle) {
            return Err(TdmError::InvalidArgument(format!(
                "cannot mark handle {} dirty",
                handle
            )));
        }
        self.source.engine.set_dirty(self.source.id, schema, handle);
        self.source.dirty_since_lock = true;
        Ok(())
    }

    /// Record the removal of dictionary item `item`.
    pub fn delete_key(&mut self, item: PropertyPathHandle) -> Result<()> {
        let schema = &self.source.schema;
        if !schema.is_dictionary_item(item) {
            return Err(TdmError::InvalidArgument(format!(
                "handle {} is not a dictionary item",
                item
            )));
        }
        self.source.engine.delete_key(self.source.id, schema, item);
        self.source.dirty_since_lock = true;
        Ok(())
    }
}

impl<H> Drop for SourceLock<'_, H> {
    fn drop(&mut self) {
        if self.source.dirty_since_lock && self.source.policy == VersionPolicy::Managed {
            let version = self.source.increment_version();
            log::debug!("[SourceLock::drop] source {} now at version {}", self.source.id, version);
        }
        self.source.dirty_since_lock = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::ROOT_PROPERTY_SCHEMA_HANDLE;
    use crate::schema::{NodeFlags, SchemaBuilder};
    use crate::tlv::TlvReader;

    struct Counter(u64);

    impl GetDataDelegate for Counter {
        fn get_data(
            &self,
            _handle: PropertyPathHandle,
            tag: Tag,
            writer: &mut TlvWriter,
        ) -> Result<DataPresence> {
            writer.put_u64(tag, self.0)?;
            Ok(DataPresence::Present)
        }

        fn next_dictionary_item_key(&self, _d: PropertyPathHandle, _c: &mut usize) -> Option<u16> {
            None
        }
    }

    fn source(policy: VersionPolicy) -> TraitDataSource<Counter> {
        let mut builder = SchemaBuilder::new("Counter", 0x0E04);
        builder.add(ROOT_PROPERTY_SCHEMA_HANDLE, 1, "count", NodeFlags::leaf());
        let d = builder.add(ROOT_PROPERTY_SCHEMA_HANDLE, 2, "d", NodeFlags::dictionary());
        builder.add(d, 1, "item", NodeFlags::leaf());
        let schema = Arc::new(builder.build().expect("schema"));
        TraitDataSource::with_engine(schema, Counter(5), Arc::new(NotificationEngine::new()), policy)
    }

    #[test]
    fn test_lazy_version_is_stable_and_non_zero() {
        let mut source = source(VersionPolicy::Managed);
        let version = source.get_version();
        assert_ne!(version, 0);
        assert_eq!(source.get_version(), version);
        assert_eq!(source.increment_version(), version.wrapping_add(1));
    }

    #[test]
    fn test_managed_lock_bumps_once() {
        let mut source = source(VersionPolicy::Managed);
        source.set_version(10);
        {
            let mut lock = source.lock();
            lock.set_dirty(PropertyPathHandle::new(2, 0)).expect("dirty");
            lock.set_dirty(PropertyPathHandle::new(4, 1)).expect("dirty");
            lock.handler_mut().0 = 6;
        }
        assert_eq!(source.get_version(), 11);
        assert!(source.is_dirty());

        // Nothing dirtied: no bump.
        drop(source.lock());
        assert_eq!(source.get_version(), 11);
    }

    #[test]
    fn test_unmanaged_lock_keeps_version() {
        let mut source = source(VersionPolicy::Unmanaged);
        source.set_version(10);
        source
            .lock()
            .set_dirty(PropertyPathHandle::new(2, 0))
            .expect("dirty");
        assert_eq!(source.get_version(), 10);
        assert_eq!(source.take_dirty().paths, vec![PropertyPathHandle::new(2, 0)]);
    }

    #[test]
    fn test_lock_rejects_bad_handles() {
        let mut source = source(VersionPolicy::Managed);
        source.set_version(1);
        {
            let mut lock = source.lock();
            assert!(lock.set_dirty(PropertyPathHandle::new(0, 0)).is_err());
            assert!(lock.set_dirty(PropertyPathHandle::new(40, 0)).is_err());
            assert!(matches!(
                lock.delete_key(PropertyPathHandle::new(2, 0)),
                Err(TdmError::InvalidArgument(_))
            ));
        }
        assert_eq!(source.get_version(), 1);
    }

    #[test]
    fn test_read_and_get_data() {
        let source = source(VersionPolicy::Managed);
        let mut writer = TlvWriter::new();
        source
            .read_data(PropertyPathHandle::new(2, 0), Tag::Anonymous, &mut writer)
            .expect("read");
        let bytes = writer.finalize().expect("finalize");
        let mut reader = TlvReader::new(&bytes);
        reader.next().expect("value");
        assert_eq!(reader.get_u64().expect("u64"), 5);

        let mut writer = TlvWriter::new();
        assert!(source
            .get_data(PropertyPathHandle::new(3, 0), Tag::Anonymous, &mut writer)
            .is_err());
    }
}
