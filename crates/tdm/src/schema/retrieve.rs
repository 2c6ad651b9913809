// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Serialization of a schema subtree.

use super::SchemaEngine;
use crate::delegate::{DataPresence, DirtyPathCut, GetDataDelegate};
use crate::error::{Result, TdmError};
use crate::path::{PropertyDictionaryKey, PropertyPathHandle};
use crate::tlv::{dictionary_key_tag, ContainerType, Tag, TlvWriter};
use crate::update_client::UpdateDictionaryDirtyPathCut;

/// Outcome of an update-mode retrieve.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Retrieved {
    /// The written element is the full subtree.
    Complete,
    /// These dictionaries were written as empty containers and must be sent
    /// as separate replace payloads.
    Deferred(Vec<PropertyPathHandle>),
}

impl Retrieved {
    pub fn is_complete(&self) -> bool {
        matches!(self, Retrieved::Complete)
    }
}

type Cut<'a> = Option<&'a mut dyn DirtyPathCut>;

impl SchemaEngine {
    /// Serialize `handle` and its subtree under `tag`.
    ///
    /// With a `cut`, non-empty dictionaries are written empty and reported to
    /// the cut instead of being enumerated.
    pub fn retrieve_data(
        &self,
        handle: PropertyPathHandle,
        tag: Tag,
        writer: &mut TlvWriter,
        delegate: &dyn GetDataDelegate,
        cut: Option<&mut dyn DirtyPathCut>,
    ) -> Result<()> {
        let mut cut = cut;
        self.retrieve_node(handle, tag, writer, delegate, &mut cut, 0)
    }

    /// [`retrieve_data`](Self::retrieve_data) with dictionary deferral, typed.
    pub fn retrieve_update_data(
        &self,
        handle: PropertyPathHandle,
        tag: Tag,
        writer: &mut TlvWriter,
        delegate: &dyn GetDataDelegate,
    ) -> Result<Retrieved> {
        let mut cut = UpdateDictionaryDirtyPathCut::default();
        self.retrieve_data(handle, tag, writer, delegate, Some(&mut cut))?;
        Ok(cut.into_retrieved())
    }

    fn retrieve_node(
        &self,
        handle: PropertyPathHandle,
        tag: Tag,
        writer: &mut TlvWriter,
        delegate: &dyn GetDataDelegate,
        cut: &mut Cut<'_>,
        level: usize,
    ) -> Result<()> {
        if !self.is_valid(handle) || handle.is_null() {
            return Err(TdmError::InvalidArgument(format!(
                "cannot retrieve handle {}",
                handle
            )));
        }
        if level > self.tree_depth {
            return Err(TdmError::mismatch(handle, "walk exceeds tree depth"));
        }

        let leaf = self.is_leaf(handle);
        if leaf || self.is_nullable(handle) || self.is_optional(handle) {
            match delegate.get_data(handle, tag, writer)? {
                DataPresence::Absent => {
                    if self.is_optional(handle) || self.is_ephemeral(handle) {
                        return Ok(());
                    }
                    return Err(TdmError::mismatch(handle, "mandatory node is absent"));
                }
                DataPresence::Null => {
                    if !self.is_nullable(handle) {
                        return Err(TdmError::mismatch(handle, "null on non-nullable node"));
                    }
                    writer.put_null(tag)?;
                    return Ok(());
                }
                DataPresence::Present if leaf => return Ok(()),
                DataPresence::Present => {}
            }
        }

        writer.start_container(tag, ContainerType::Structure)?;
        let result = if self.is_dictionary(handle) {
            self.retrieve_dictionary_items(handle, writer, delegate, cut, level)
        } else {
            self.retrieve_children(handle, writer, delegate, cut, level)
        };
        let end = writer.end_container().map_err(TdmError::from);
        result.and(end)
    }

    fn retrieve_children(
        &self,
        handle: PropertyPathHandle,
        writer: &mut TlvWriter,
        delegate: &dyn GetDataDelegate,
        cut: &mut Cut<'_>,
        level: usize,
    ) -> Result<()> {
        let mut child = self.first_child(handle);
        while !child.is_null() {
            self.retrieve_node(child, self.tag(child), writer, delegate, cut, level + 1)?;
            child = self.next_child(handle, child);
        }
        Ok(())
    }

    fn retrieve_dictionary_items(
        &self,
        handle: PropertyPathHandle,
        writer: &mut TlvWriter,
        delegate: &dyn GetDataDelegate,
        cut: &mut Cut<'_>,
        level: usize,
    ) -> Result<()> {
        let mut context = 0usize;
        if let Some(cut) = cut.as_mut() {
            if delegate.next_dictionary_item_key(handle, &mut context).is_some() {
                log::debug!(
                    "[SchemaEngine::retrieve_data] deferring dictionary {} in '{}'",
                    handle,
                    self.name
                );
                cut.cut_path(handle, self)?;
            }
            return Ok(());
        }

        while let Some(key) = delegate.next_dictionary_item_key(handle, &mut context) {
            let item = self.dictionary_item_handle(handle, key);
            self.retrieve_node(item, dictionary_key_tag(key), writer, delegate, cut, level + 1)?;
        }
        Ok(())
    }

    /// Write the items of `handle` that fit, starting at `resume_key`.
    ///
    /// On return `resume_key` holds the first key that did not fit, or `None`
    /// once the dictionary is complete. Items are never split: a failed item
    /// is rolled back. If not even one item fits, `BufferTooSmall` is
    /// returned and `resume_key` is left unchanged.
    pub fn retrieve_updatable_dictionary_data(
        &self,
        handle: PropertyPathHandle,
        tag: Tag,
        writer: &mut TlvWriter,
        delegate: &dyn GetDataDelegate,
        resume_key: &mut Option<PropertyDictionaryKey>,
    ) -> Result<()> {
        if !self.is_dictionary(handle) {
            return Err(TdmError::InvalidArgument(format!(
                "handle {} is not a dictionary",
                handle
            )));
        }

        writer.start_container(tag, ContainerType::Structure)?;
        let start_key = resume_key.take();
        let mut skipping = start_key.is_some();
        let mut written = 0usize;
        let mut context = 0usize;
        let mut result = Ok(());

        while let Some(key) = delegate.next_dictionary_item_key(handle, &mut context) {
            if skipping {
                if Some(key) != start_key {
                    continue;
                }
                skipping = false;
            }

            let checkpoint = writer.checkpoint();
            let item = self.dictionary_item_handle(handle, key);
            match self.retrieve_data(item, dictionary_key_tag(key), writer, delegate, None) {
                Ok(()) => written += 1,
                Err(e) if e.is_buffer_too_small() => {
                    writer.rollback(&checkpoint);
                    if written == 0 {
                        *resume_key = start_key;
                        result = Err(e);
                    } else {
                        *resume_key = Some(key);
                    }
                    break;
                }
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        if skipping {
            log::warn!(
                "[SchemaEngine::retrieve_updatable_dictionary_data] resume key {:?} no longer in dictionary {}",
                start_key,
                handle
            );
        }
        log::debug!(
            "[SchemaEngine::retrieve_updatable_dictionary_data] dictionary {} wrote {} items, resume={:?}",
            handle,
            written,
            resume_key
        );

        let end = writer.end_container().map_err(TdmError::from);
        result.and(end)
    }
}
