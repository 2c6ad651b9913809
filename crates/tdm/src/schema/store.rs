// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Application of an encoded subtree to a sink.

use super::{SchemaCompliance, SchemaEngine};
use crate::delegate::{DataSinkEvent, PathFilter, SetDataDelegate};
use crate::error::{Result, TdmError};
use crate::path::{PropertyDictionaryKey, PropertyPathHandle};
use crate::tlv::{Tag, TlvError, TlvReader};

impl SchemaEngine {
    /// Apply the element under `reader` to `handle` and its subtree.
    ///
    /// Children are visited in wire order and matched against the schema.
    /// Paths rejected by `filter` are skipped with their subtree. Every
    /// dictionary container is bracketed by replace notifications and every
    /// dictionary item by modify notifications, also when the walk starts at
    /// an item.
    pub fn store_data(
        &self,
        handle: PropertyPathHandle,
        reader: &mut TlvReader<'_>,
        delegate: &mut dyn SetDataDelegate,
        filter: Option<&dyn PathFilter>,
    ) -> Result<()> {
        if handle.is_null() || !self.is_valid(handle) {
            return Err(TdmError::InvalidArgument(format!(
                "cannot store into handle {}",
                handle
            )));
        }
        if filter.is_some_and(|f| f.filter_path(handle)) {
            log::debug!("[SchemaEngine::store_data] {} filtered", handle);
            return Ok(());
        }

        if self.is_dictionary_item(handle) {
            delegate.on_event(DataSinkEvent::DictionaryItemModifyBegin(handle))?;
            let result = self.store_node(handle, reader, delegate, filter, 0);
            let end = delegate.on_event(DataSinkEvent::DictionaryItemModifyEnd(handle));
            result.and(end)
        } else {
            self.store_node(handle, reader, delegate, filter, 0)
        }
    }

    /// Add or modify the items of dictionary `handle` without replacing it.
    /// Each item is bracketed by modify notifications.
    pub fn store_dictionary_merge(
        &self,
        handle: PropertyPathHandle,
        reader: &mut TlvReader<'_>,
        delegate: &mut dyn SetDataDelegate,
        filter: Option<&dyn PathFilter>,
    ) -> Result<()> {
        if !self.is_dictionary(handle) {
            return Err(TdmError::InvalidArgument(format!(
                "merge target {} is not a dictionary",
                handle
            )));
        }
        if filter.is_some_and(|f| f.filter_path(handle)) {
            return Ok(());
        }
        reader.enter_container()?;
        let walk = self.store_children(handle, true, reader, delegate, filter, 0);
        let exit = reader.exit_container().map_err(TdmError::from);
        walk.and(exit)
    }

    fn store_node(
        &self,
        handle: PropertyPathHandle,
        reader: &mut TlvReader<'_>,
        delegate: &mut dyn SetDataDelegate,
        filter: Option<&dyn PathFilter>,
        level: usize,
    ) -> Result<()> {
        if level > self.tree_depth {
            return Err(TdmError::mismatch(handle, "walk exceeds tree depth"));
        }

        let is_null = reader.is_null();
        if self.is_leaf(handle) {
            if is_null && !self.is_nullable(handle) {
                return Err(TdmError::mismatch(handle, "null on non-nullable node"));
            }
            return delegate.set_data(handle, reader, is_null);
        }

        if is_null {
            if self.is_nullable(handle) {
                return delegate.set_data(handle, reader, true);
            }
            return Err(TdmError::mismatch(handle, "null on non-nullable container"));
        }
        if !reader.is_container() {
            return Err(TdmError::mismatch(handle, "expected a container"));
        }

        let dictionary = self.is_dictionary(handle);
        if dictionary {
            delegate.on_event(DataSinkEvent::DictionaryReplaceBegin(handle))?;
        }

        let mut result = match reader.enter_container() {
            Ok(()) => {
                let walk = self.store_children(handle, dictionary, reader, delegate, filter, level);
                let exit = reader.exit_container().map_err(TdmError::from);
                walk.and(exit)
            }
            Err(e) => Err(e.into()),
        };

        if dictionary {
            let end = delegate.on_event(DataSinkEvent::DictionaryReplaceEnd(handle));
            result = result.and(end);
        }
        result
    }

    fn store_children(
        &self,
        handle: PropertyPathHandle,
        dictionary: bool,
        reader: &mut TlvReader<'_>,
        delegate: &mut dyn SetDataDelegate,
        filter: Option<&dyn PathFilter>,
        level: usize,
    ) -> Result<()> {
        loop {
            match reader.next() {
                Ok(()) => {}
                Err(TlvError::EndOfTlv) => return Ok(()),
                Err(e) => return Err(e.into()),
            }
            let tag = reader.tag();

            let child = if dictionary {
                if !tag.is_dictionary_key() {
                    return Err(TdmError::InvalidTag(tag));
                }
                let key = tag
                    .tag_number()
                    .and_then(|n| PropertyDictionaryKey::try_from(n).ok())
                    .ok_or(TdmError::InvalidTag(tag))?;
                self.dictionary_item_handle(handle, key)
            } else {
                match tag {
                    Tag::Context(n) => self.child_handle(handle, n),
                    _ => return Err(TdmError::InvalidTag(tag)),
                }
            };

            if child.is_null() {
                if self.compliance == SchemaCompliance::Lenient {
                    log::debug!(
                        "[SchemaEngine::store_data] skipping unknown tag {} under {}",
                        tag,
                        handle
                    );
                    continue;
                }
                return Err(TdmError::TagNotFound {
                    parent: handle,
                    tag,
                });
            }
            if filter.is_some_and(|f| f.filter_path(child)) {
                log::debug!("[SchemaEngine::store_data] {} filtered", child);
                continue;
            }

            if dictionary {
                delegate.on_event(DataSinkEvent::DictionaryItemModifyBegin(child))?;
                let result = self.store_node(child, reader, delegate, filter, level + 1);
                let end = delegate.on_event(DataSinkEvent::DictionaryItemModifyEnd(child));
                result.and(end)?;
            } else {
                self.store_node(child, reader, delegate, filter, level + 1)?;
            }
        }
    }
}
