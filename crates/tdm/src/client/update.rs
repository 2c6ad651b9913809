// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Update flushing.
//!
//! ```text
//! anonymous structure {
//!   1: data list (array of data elements)
//! }
//! ```
//!
//! Pending paths are encoded into payloads no larger than
//! `max_update_payload`. An element that does not fit is rolled back and
//! retried in the next payload; dictionaries continue page by page with the
//! merge flag set on every page after the first.

use super::{MessageExchange, WdmClient};
use crate::catalog::{TraitDataHandle, TraitPath};
use crate::error::{Result, TdmError};
use crate::generic_sink::GenericTraitUpdatableDataSink;
use crate::path::{PropertyDictionaryKey, PropertyPathHandle};
use crate::schema::Retrieved;
use crate::sink::{DataElement, DataElementWriter};
use crate::tlv::{ContainerType, Tag, TlvError, TlvReader, TlvWriter};
use crate::update_client::UpdateMode;
use std::collections::VecDeque;

pub const TAG_UPDATE_DATA_LIST: u8 = 1;

/// Encoded size of a context-tagged boolean.
const PARTIAL_FLAG_LEN: usize = 2;

/// Outcome of a successful flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub payloads: usize,
    pub elements: usize,
    pub traits: Vec<TraitDataHandle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Chunk {
    Path(PropertyPathHandle),
    Dictionary {
        handle: PropertyPathHandle,
        resume: Option<PropertyDictionaryKey>,
        first: bool,
    },
}

struct Payload {
    writer: TlvWriter,
    elements: usize,
}

impl Payload {
    fn open(capacity: usize) -> Result<Self> {
        let mut writer = TlvWriter::with_capacity_limit(capacity);
        writer.start_container(Tag::Anonymous, ContainerType::Structure)?;
        writer.start_container(Tag::Context(TAG_UPDATE_DATA_LIST), ContainerType::Array)?;
        Ok(Self {
            writer,
            elements: 0,
        })
    }

    fn finish(mut self) -> Result<Vec<u8>> {
        self.writer.end_container()?;
        self.writer.end_container()?;
        Ok(self.writer.finalize()?)
    }
}

fn send(
    exchange: &mut dyn MessageExchange,
    payload: Payload,
    report: &mut FlushReport,
) -> Result<()> {
    let elements = payload.elements;
    let bytes = payload.finish()?;
    exchange.update(&bytes)?;
    report.payloads += 1;
    log::debug!(
        "[WdmClient::flush_update] payload {} sent ({} bytes, {} elements)",
        report.payloads,
        bytes.len(),
        elements
    );
    Ok(())
}

/// Write one chunk as a data element. Returns the chunks it spawned:
/// the next page of a dictionary and dictionaries deferred out of a
/// structure.
fn write_chunk(
    writer: &mut TlvWriter,
    sink: &GenericTraitUpdatableDataSink,
    trait_path: &TraitPath,
    chunk: Chunk,
    required_version: Option<u64>,
    last_queued: bool,
) -> Result<Vec<Chunk>> {
    let (handle, mut resume, merge) = match chunk {
        Chunk::Path(handle) => (handle, None, false),
        Chunk::Dictionary {
            handle,
            resume,
            first,
        } => (handle, resume, !first),
    };

    let mut element = DataElementWriter::begin(writer, trait_path, sink.schema(), handle)?;
    if let Some(version) = required_version {
        element.version(version)?;
    }
    element.merge(merge)?;

    // Keep room for the trailing partial-change flag.
    let capacity = element.writer().capacity();
    element
        .writer()
        .set_capacity_limit(capacity.saturating_sub(PARTIAL_FLAG_LEN));
    let retrieved = sink.read_data(
        handle,
        DataElementWriter::data_tag(),
        element.writer(),
        &mut resume,
    );
    element.writer().set_capacity_limit(capacity);
    let retrieved = retrieved?;

    let mut spawned = Vec::new();
    if let (Chunk::Dictionary { .. }, Some(key)) = (chunk, resume) {
        spawned.push(Chunk::Dictionary {
            handle,
            resume: Some(key),
            first: false,
        });
    }
    if let Retrieved::Deferred(dictionaries) = retrieved {
        spawned.extend(dictionaries.into_iter().map(|handle| Chunk::Dictionary {
            handle,
            resume: None,
            first: true,
        }));
    }

    element.partial_change(!(last_queued && spawned.is_empty()))?;
    element.end()?;
    Ok(spawned)
}

impl WdmClient {
    /// Send every pending local change to the publisher.
    ///
    /// Pending state is cleared only once every payload was accepted; on
    /// error it is left intact for a later retry.
    pub fn flush_update(&mut self, exchange: &mut dyn MessageExchange) -> Result<FlushReport> {
        let snapshot: Vec<(TraitDataHandle, Vec<PropertyPathHandle>, Option<UpdateMode>)> = {
            let pending = self.update_client.lock();
            pending
                .traits()
                .into_iter()
                .map(|handle| (handle, pending.paths_for(handle), pending.mode(handle)))
                .collect()
        };
        let mut report = FlushReport::default();
        if snapshot.is_empty() {
            return Ok(report);
        }

        let capacity = self.context.config().max_update_payload;
        let mut payload = Payload::open(capacity)?;
        for (trait_handle, paths, mode) in &snapshot {
            let (trait_path, _) = self.catalog.locate(*trait_handle)?;
            let sink = self
                .catalog
                .get_mut(*trait_handle)
                .ok_or(TdmError::TraitNotFound)?;
            sink.set_update_start_version(sink.version());
            let required_version = match mode {
                Some(UpdateMode::Conditional) => Some(
                    sink.update_required_version()
                        .or(sink.version())
                        .ok_or(TdmError::VersionUnknown)?,
                ),
                _ => None,
            };

            let schema = sink.schema();
            let mut queue: VecDeque<Chunk> = paths
                .iter()
                .map(|handle| {
                    if schema.is_dictionary(*handle) {
                        Chunk::Dictionary {
                            handle: *handle,
                            resume: None,
                            first: true,
                        }
                    } else {
                        Chunk::Path(*handle)
                    }
                })
                .collect();

            while let Some(chunk) = queue.pop_front() {
                let checkpoint = payload.writer.checkpoint();
                match write_chunk(
                    &mut payload.writer,
                    sink,
                    &trait_path,
                    chunk,
                    required_version,
                    queue.is_empty(),
                ) {
                    Ok(spawned) => {
                        for next in spawned.into_iter().rev() {
                            queue.push_front(next);
                        }
                        payload.elements += 1;
                        report.elements += 1;
                    }
                    Err(e) if e.is_buffer_too_small() && payload.elements > 0 => {
                        payload.writer.rollback(&checkpoint);
                        let full = std::mem::replace(&mut payload, Payload::open(capacity)?);
                        send(exchange, full, &mut report)?;
                        queue.push_front(chunk);
                    }
                    Err(e) => {
                        log::warn!(
                            "[WdmClient::flush_update] trait {} ({}): {}",
                            trait_handle,
                            trait_path,
                            e
                        );
                        return Err(e);
                    }
                }
            }
            report.traits.push(*trait_handle);
        }
        if payload.elements > 0 {
            send(exchange, payload, &mut report)?;
        }

        let mut pending = self.update_client.lock();
        for handle in &report.traits {
            pending.clear_trait(*handle);
            if let Some(sink) = self.catalog.get_mut(*handle) {
                sink.set_update_required_version(None);
            }
        }
        log::info!(
            "[WdmClient::flush_update] {} element(s) in {} payload(s)",
            report.elements,
            report.payloads
        );
        Ok(report)
    }
}

/// Data elements carried by an update request.
pub fn parse_update_request(request: &[u8]) -> Result<Vec<DataElement<'_>>> {
    let mut reader = TlvReader::new(request);
    reader.next()?;
    reader.enter_container()?;
    reader.next_expect(Tag::Context(TAG_UPDATE_DATA_LIST))?;
    reader.enter_container()?;
    let mut elements = Vec::new();
    loop {
        match reader.next() {
            Ok(()) => elements.push(DataElement::parse(&reader)?),
            Err(TlvError::EndOfTlv) => return Ok(elements),
            Err(e) => return Err(e.into()),
        }
    }
}
