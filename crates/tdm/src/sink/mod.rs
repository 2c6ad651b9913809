// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Trait data sinks.
//!
//! A [`TraitDataSink`] receives data elements for one trait instance, checks
//! their version against the last applied one and drives
//! [`SchemaEngine::store_data`] into its [`SinkHandler`].

mod data_element;
mod rejection;

pub use data_element::{DataElement, DataElementWriter};
pub use rejection::{ChangeRejectionCallback, ChangeRejectionSlot};

pub(crate) use data_element::{read_locator, write_locator};

use crate::catalog::TraitDataHandle;
use crate::delegate::{DataSinkEvent, PathFilter, SetDataDelegate};
use crate::error::{Result, TdmError};
use crate::path::PropertyPathHandle;
use crate::schema::SchemaEngine;
use crate::tlv::TlvReader;
use std::sync::Arc;

/// Position of a data element within a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementFlags {
    /// First element of the change.
    pub first: bool,
    /// Last element of the change.
    pub last: bool,
}

impl ElementFlags {
    /// A change made of a single element.
    pub const SINGLE: ElementFlags = ElementFlags {
        first: true,
        last: true,
    };
}

/// Storage behind a sink.
pub trait SinkHandler {
    /// Apply a leaf value (or a null for nullable leaves).
    fn set_leaf_data(
        &mut self,
        schema: &SchemaEngine,
        handle: PropertyPathHandle,
        reader: &TlvReader<'_>,
        is_null: bool,
    ) -> Result<()>;

    /// A nullable container was set to null.
    fn set_subtree_null(&mut self, schema: &SchemaEngine, handle: PropertyPathHandle) -> Result<()> {
        let _ = schema;
        Err(TdmError::InvalidArgument(format!(
            "handle {} is not a leaf",
            handle
        )))
    }

    fn on_event(&mut self, schema: &SchemaEngine, event: DataSinkEvent) -> Result<()> {
        let _ = (schema, event);
        Ok(())
    }
}

/// Routes schema-walk callbacks to a [`SinkHandler`].
struct SinkDelegate<'a, H> {
    schema: &'a SchemaEngine,
    handler: &'a mut H,
}

impl<H: SinkHandler> SetDataDelegate for SinkDelegate<'_, H> {
    fn set_data(
        &mut self,
        handle: PropertyPathHandle,
        reader: &TlvReader<'_>,
        is_null: bool,
    ) -> Result<()> {
        set_data_default(self.schema, self.handler, handle, reader, is_null)
    }

    fn on_event(&mut self, event: DataSinkEvent) -> Result<()> {
        self.handler.on_event(self.schema, event)
    }
}

fn set_data_default<H: SinkHandler>(
    schema: &SchemaEngine,
    handler: &mut H,
    handle: PropertyPathHandle,
    reader: &TlvReader<'_>,
    is_null: bool,
) -> Result<()> {
    if schema.is_leaf(handle) {
        handler.set_leaf_data(schema, handle, reader, is_null)
    } else if is_null && schema.is_nullable(handle) {
        handler.set_subtree_null(schema, handle)
    } else {
        Err(TdmError::InvalidArgument(format!(
            "handle {} is not a leaf",
            handle
        )))
    }
}

/// Consumer side of one trait instance.
pub struct TraitDataSink<H> {
    schema: Arc<SchemaEngine>,
    version: Option<u64>,
    last_notify_version: Option<u64>,
    rejection: Arc<ChangeRejectionSlot>,
    handler: H,
}

impl<H: SinkHandler> TraitDataSink<H> {
    pub fn new(schema: Arc<SchemaEngine>, handler: H, rejection: Arc<ChangeRejectionSlot>) -> Self {
        Self {
            schema,
            version: None,
            last_notify_version: None,
            rejection,
            handler,
        }
    }

    pub fn schema(&self) -> &Arc<SchemaEngine> {
        &self.schema
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Version of the last fully applied change; `None` until one applies or
    /// after a failed apply.
    pub fn version(&self) -> Option<u64> {
        self.version
    }

    pub fn is_version_valid(&self) -> bool {
        self.version.is_some()
    }

    pub fn set_version(&mut self, version: u64) {
        self.version = Some(version);
    }

    pub fn clear_version(&mut self) {
        self.version = None;
    }

    /// Version carried by the last element flagged as the end of a change,
    /// whether or not it was applied.
    pub fn last_notify_version(&self) -> Option<u64> {
        self.last_notify_version
    }

    /// Any version other than the current one is newer.
    pub fn is_version_newer(&self, version: u64) -> bool {
        self.version != Some(version)
    }

    /// Apply one data element to `handle`.
    ///
    /// The reader must sit on the element envelope. Elements whose version is
    /// not newer are ignored. A failing store clears the sink version; deleted
    /// keys are checked before any event is emitted.
    pub fn store_data_element(
        &mut self,
        handle: PropertyPathHandle,
        reader: &TlvReader<'_>,
        flags: ElementFlags,
        trait_handle: TraitDataHandle,
        filter: Option<&dyn PathFilter>,
    ) -> Result<()> {
        let element = DataElement::parse(reader)?;
        let version = element.version.ok_or_else(|| {
            TdmError::InvalidArgument("data element without version".into())
        })?;

        if flags.last {
            self.last_notify_version = Some(version);
        }
        if !self.is_version_newer(version) {
            log::debug!(
                "[TraitDataSink::store_data_element] trait {} already at version {}",
                trait_handle,
                version
            );
            return Ok(());
        }

        let mut deleted = Vec::with_capacity(element.deleted_keys.len());
        for key in &element.deleted_keys {
            let item = self.schema.dictionary_item_handle(handle, *key);
            if item.is_null() {
                log::warn!(
                    "[TraitDataSink::store_data_element] trait {} deleted key {} on non-dictionary {}",
                    trait_handle,
                    key,
                    handle
                );
                self.version = None;
                return Err(TdmError::InvalidArgument(format!(
                    "deleted key {} on non-dictionary {}",
                    key, handle
                )));
            }
            deleted.push(item);
        }

        let mut delegate = SinkDelegate {
            schema: &self.schema,
            handler: &mut self.handler,
        };
        if flags.first {
            delegate.on_event(DataSinkEvent::ChangeBegin)?;
        }
        delegate.on_event(DataSinkEvent::DataElementBegin)?;

        for item in deleted {
            delegate.on_event(DataSinkEvent::DictionaryItemDelete(item))?;
        }

        if let Some(mut data) = element.data_reader()? {
            let stored = if element.merge {
                self.schema
                    .store_dictionary_merge(handle, &mut data, &mut delegate, filter)
            } else {
                self.schema.store_data(handle, &mut data, &mut delegate, filter)
            };
            if let Err(e) = stored {
                log::warn!(
                    "[TraitDataSink::store_data_element] trait {} store failed at {}: {}",
                    trait_handle,
                    handle,
                    e
                );
                self.version = None;
                return Err(e);
            }
        }

        delegate.on_event(DataSinkEvent::DataElementEnd)?;
        if flags.last {
            self.version = Some(version);
            delegate.on_event(DataSinkEvent::ChangeEnd)?;
            log::debug!(
                "[TraitDataSink::store_data_element] trait {} now at version {}",
                trait_handle,
                version
            );
        }
        Ok(())
    }

    /// Apply a single value outside of a data element. Only leaves (and null
    /// on nullable containers) are accepted.
    pub fn set_data(
        &mut self,
        handle: PropertyPathHandle,
        reader: &TlvReader<'_>,
        is_null: bool,
    ) -> Result<()> {
        set_data_default(&self.schema, &mut self.handler, handle, reader, is_null)
    }

    /// Report a rejected change through the context's rejection slot.
    pub fn reject_change(&self, status: u16) -> bool {
        log::info!(
            "[TraitDataSink::reject_change] status {} at version {:?}",
            status,
            self.version
        );
        self.rejection.invoke(status, self.version)
    }
}

#[cfg(test)]
mod tests;
