// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Narrow callback interfaces used by the schema walks.
//!
//! Sources implement [`GetDataDelegate`], sinks implement [`SetDataDelegate`].
//! [`DirtyPathCut`] and [`PathFilter`] let the update layer steer a walk
//! without knowing anything about the data itself.

use crate::error::Result;
use crate::path::{PropertyDictionaryKey, PropertyPathHandle};
use crate::schema::SchemaEngine;
use crate::tlv::{Tag, TlvReader, TlvWriter};

/// What a source holds for one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataPresence {
    /// Value was written (leaves) or the container exists.
    Present,
    /// Node is explicitly null; nothing was written.
    Null,
    /// Node has no value; nothing was written.
    Absent,
}

/// Read side of a trait instance, consulted by `retrieve_data`.
pub trait GetDataDelegate {
    /// For leaves, write the value under `tag` and report `Present`, or
    /// report `Null`/`Absent` without writing. For optional or nullable
    /// containers only the presence is reported; the engine writes the
    /// container itself.
    fn get_data(
        &self,
        handle: PropertyPathHandle,
        tag: Tag,
        writer: &mut TlvWriter,
    ) -> Result<DataPresence>;

    /// Enumerate the keys of `dictionary`. `context` starts at zero and is
    /// owned by the delegate between calls. Returns `None` once exhausted.
    fn next_dictionary_item_key(
        &self,
        dictionary: PropertyPathHandle,
        context: &mut usize,
    ) -> Option<PropertyDictionaryKey>;
}

/// Notifications bracketing a store operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSinkEvent {
    ChangeBegin,
    DataElementBegin,
    DictionaryItemDelete(PropertyPathHandle),
    DictionaryReplaceBegin(PropertyPathHandle),
    DictionaryReplaceEnd(PropertyPathHandle),
    DictionaryItemModifyBegin(PropertyPathHandle),
    DictionaryItemModifyEnd(PropertyPathHandle),
    DataElementEnd,
    ChangeEnd,
}

/// Write side of a trait instance, driven by `store_data`.
pub trait SetDataDelegate {
    /// Apply the element under the reader cursor to `handle`. `is_null` is
    /// set for explicit nulls, including null nullable containers.
    fn set_data(
        &mut self,
        handle: PropertyPathHandle,
        reader: &TlvReader<'_>,
        is_null: bool,
    ) -> Result<()>;

    fn on_event(&mut self, event: DataSinkEvent) -> Result<()> {
        let _ = event;
        Ok(())
    }
}

/// Receives dictionaries that must be sent as their own update payload.
pub trait DirtyPathCut {
    fn cut_path(&mut self, handle: PropertyPathHandle, schema: &SchemaEngine) -> Result<()>;
}

/// Decides which paths an incoming store must leave untouched.
pub trait PathFilter {
    /// True to skip `handle` and its whole subtree.
    fn filter_path(&self, handle: PropertyPathHandle) -> bool;
}

impl<F> PathFilter for F
where
    F: Fn(PropertyPathHandle) -> bool,
{
    fn filter_path(&self, handle: PropertyPathHandle) -> bool {
        self(handle)
    }
}
