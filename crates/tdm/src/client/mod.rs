// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subscription client.
//!
//! [`WdmClient`] keeps a catalog of generic updatable sinks, applies notify
//! payloads to them and flushes staged local changes as update requests.
//! Bytes travel through a [`MessageExchange`], the transport boundary.
//!
//! Subscribe request:
//!
//! ```text
//! anonymous structure {
//!   1: paths (array of locator structures)
//! }
//! ```

mod update;

pub use update::{parse_update_request, FlushReport, TAG_UPDATE_DATA_LIST};

use crate::catalog::{TraitCatalog, TraitDataHandle, TraitPath};
use crate::context::TdmContext;
use crate::error::{Result, TdmError};
use crate::generic_sink::{GenericTraitUpdatableDataSink, LeafStore};
use crate::json::render_event_list;
use crate::notify::{TAG_DATA_LIST, TAG_EVENT_LIST};
use crate::schema::SchemaEngine;
use crate::sink::{read_locator, write_locator, DataElement, ElementFlags};
use crate::tlv::{ContainerType, Tag, TlvError, TlvReader, TlvWriter};
use crate::update_client::UpdateClient;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

pub const TAG_SUBSCRIBE_PATHS: u8 = 1;

/// Transport used by the client.
pub trait MessageExchange {
    /// Send a subscribe request; returns the publisher's notify payload.
    fn subscribe(&mut self, request: &[u8]) -> Result<Vec<u8>>;

    /// Send one update request. `Ok` means the publisher accepted it.
    fn update(&mut self, request: &[u8]) -> Result<()>;
}

/// Outcome of applying one notify payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationReport {
    /// Data elements applied (including version no-ops).
    pub applied: usize,
    /// Elements addressed to traits not in the catalog.
    pub skipped: usize,
    /// Traits with at least one failed element; their version is now unknown.
    pub failed: Vec<TraitDataHandle>,
    /// Events rendered into the event queue.
    pub events: usize,
}

pub struct WdmClient {
    context: Arc<TdmContext>,
    catalog: TraitCatalog<GenericTraitUpdatableDataSink>,
    update_client: Arc<UpdateClient>,
    events: Vec<Value>,
}

impl WdmClient {
    pub fn new(context: Arc<TdmContext>) -> Self {
        Self {
            context,
            catalog: TraitCatalog::new(),
            update_client: Arc::new(UpdateClient::new()),
            events: Vec::new(),
        }
    }

    pub fn context(&self) -> &Arc<TdmContext> {
        &self.context
    }

    pub fn update_client(&self) -> &Arc<UpdateClient> {
        &self.update_client
    }

    pub fn catalog(&self) -> &TraitCatalog<GenericTraitUpdatableDataSink> {
        &self.catalog
    }

    /// Create a sink for the trait instance at `trait_path`.
    pub fn new_data_sink(
        &mut self,
        trait_path: TraitPath,
        schema: Arc<SchemaEngine>,
    ) -> Result<TraitDataHandle> {
        let max_leaf_size = self.context.config().max_leaf_size;
        let rejection = Arc::clone(self.context.rejection_slot());
        let update_client = Arc::clone(&self.update_client);
        self.catalog.add_with(trait_path, |handle| {
            GenericTraitUpdatableDataSink::new(
                Arc::clone(&schema),
                LeafStore::new(schema, max_leaf_size),
                rejection,
                update_client,
                handle,
            )
        })
    }

    /// Drop a sink together with its pending updates.
    pub fn remove_data_sink(&mut self, handle: TraitDataHandle) -> Result<()> {
        self.catalog.remove(handle)?;
        self.update_client.lock().clear_trait(handle);
        Ok(())
    }

    pub fn data_sink(&self, handle: TraitDataHandle) -> Result<&GenericTraitUpdatableDataSink> {
        self.catalog.get(handle).ok_or(TdmError::TraitNotFound)
    }

    pub fn data_sink_mut(
        &mut self,
        handle: TraitDataHandle,
    ) -> Result<&mut GenericTraitUpdatableDataSink> {
        self.catalog.get_mut(handle).ok_or(TdmError::TraitNotFound)
    }

    pub fn data_sink_by_path(&self, trait_path: &TraitPath) -> Result<&GenericTraitUpdatableDataSink> {
        let handle = self.catalog.locate_by_path(
            trait_path.resource,
            trait_path.profile_id,
            trait_path.instance_id,
        )?;
        self.data_sink(handle)
    }

    /// Subscribe request naming every registered trait instance.
    pub fn subscribe_request(&self) -> Result<Vec<u8>> {
        let mut writer = TlvWriter::new();
        writer.start_container(Tag::Anonymous, ContainerType::Structure)?;
        writer.start_container(Tag::Context(TAG_SUBSCRIBE_PATHS), ContainerType::Array)?;
        let mut written = Ok(());
        self.catalog.iterate(|_, path, _| {
            if written.is_ok() {
                written = write_locator(&mut writer, Tag::Anonymous, path);
            }
        });
        written?;
        writer.end_container()?;
        writer.end_container()?;
        Ok(writer.finalize()?)
    }

    /// Subscribe to every registered trait and apply the returned data.
    pub fn refresh(&mut self, exchange: &mut dyn MessageExchange) -> Result<NotificationReport> {
        let request = self.subscribe_request()?;
        log::debug!(
            "[WdmClient::refresh] subscribing to {} trait(s)",
            self.catalog.len()
        );
        let notification = exchange.subscribe(&request)?;
        self.process_notification(&notification)
    }

    /// Apply a notify payload. Failures of individual elements are logged and
    /// reported; malformed envelopes abort.
    pub fn process_notification(&mut self, payload: &[u8]) -> Result<NotificationReport> {
        let mut reader = TlvReader::new(payload);
        reader.next()?;
        reader.enter_container()?;

        let mut report = NotificationReport::default();
        let mut open_changes = HashSet::new();
        loop {
            match reader.next() {
                Ok(()) => {}
                Err(TlvError::EndOfTlv) => break,
                Err(e) => return Err(e.into()),
            }
            match reader.tag() {
                Tag::Context(TAG_DATA_LIST) => {
                    let mut list = reader.clone();
                    list.enter_container()?;
                    loop {
                        match list.next() {
                            Ok(()) => self.apply_element(&list, &mut open_changes, &mut report)?,
                            Err(TlvError::EndOfTlv) => break,
                            Err(e) => return Err(e.into()),
                        }
                    }
                }
                Tag::Context(TAG_EVENT_LIST) => {
                    let events = render_event_list(&reader)?;
                    report.events += events.len();
                    self.events.extend(events);
                }
                other => {
                    log::debug!("[WdmClient::process_notification] ignoring field {}", other);
                }
            }
        }

        if !open_changes.is_empty() {
            log::warn!(
                "[WdmClient::process_notification] {} change(s) left open",
                open_changes.len()
            );
        }
        Ok(report)
    }

    fn apply_element(
        &mut self,
        reader: &TlvReader<'_>,
        open_changes: &mut HashSet<TraitDataHandle>,
        report: &mut NotificationReport,
    ) -> Result<()> {
        let element = DataElement::parse(reader)?;
        let path = element.trait_path;
        let Ok(handle) = self
            .catalog
            .locate_by_path(path.resource, path.profile_id, path.instance_id)
        else {
            log::warn!("[WdmClient::process_notification] no sink for {}", path);
            report.skipped += 1;
            return Ok(());
        };
        let sink = self.catalog.get_mut(handle).ok_or(TdmError::TraitNotFound)?;

        let flags = ElementFlags {
            first: !open_changes.contains(&handle),
            last: !element.partial_change,
        };
        if flags.last {
            open_changes.remove(&handle);
        } else {
            open_changes.insert(handle);
        }

        let stored = element
            .property_handle(sink.schema())
            .and_then(|property| sink.store_data_element(property, reader, flags));
        match stored {
            Ok(()) => report.applied += 1,
            Err(e) => {
                log::warn!(
                    "[WdmClient::process_notification] trait {} ({}): {}",
                    handle,
                    path,
                    e
                );
                if !report.failed.contains(&handle) {
                    report.failed.push(handle);
                }
            }
        }
        Ok(())
    }

    /// Drain the rendered events.
    pub fn take_events(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.events)
    }
}

/// Locators named by a subscribe request.
pub fn parse_subscribe_request(request: &[u8]) -> Result<Vec<TraitPath>> {
    let mut reader = TlvReader::new(request);
    reader.next()?;
    reader.enter_container()?;
    reader.next_expect(Tag::Context(TAG_SUBSCRIBE_PATHS))?;
    reader.enter_container()?;
    let mut paths = Vec::new();
    loop {
        match reader.next() {
            Ok(()) => paths.push(read_locator(&reader)?),
            Err(TlvError::EndOfTlv) => return Ok(paths),
            Err(e) => return Err(e.into()),
        }
    }
}
