// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Textual property paths.
//!
//! ```text
//! path    := "" | segment ("/" segment)*
//! segment := name | number
//! ```
//!
//! A number below a dictionary is a dictionary key; elsewhere it is a
//! context tag. Leading and trailing slashes are ignored.

use super::SchemaEngine;
use crate::error::{Result, TdmError};
use crate::path::{PropertyPathHandle, ROOT_PROPERTY_PATH_HANDLE};

impl SchemaEngine {
    fn named_child(&self, parent: PropertyPathHandle, name: &str) -> PropertyPathHandle {
        let mut child = self.first_child(parent);
        while !child.is_null() {
            if self.node_name(child) == Some(name) {
                return child;
            }
            child = self.next_child(parent, child);
        }
        child
    }

    /// Resolve a slash-separated path such as `"settings/zones/7/target"`.
    pub fn map_text_path_to_handle(&self, path: &str) -> Result<PropertyPathHandle> {
        let mut handle = ROOT_PROPERTY_PATH_HANDLE;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let next = if self.is_dictionary(handle) {
                let key = segment.parse::<u16>().map_err(|_| {
                    TdmError::InvalidPath(format!(
                        "'{}' is not a dictionary key in '{}'",
                        segment, path
                    ))
                })?;
                self.dictionary_item_handle(handle, key)
            } else if let Ok(tag) = segment.parse::<u8>() {
                self.child_handle(handle, tag)
            } else {
                self.named_child(handle, segment)
            };
            if next.is_null() {
                return Err(TdmError::InvalidPath(format!(
                    "'{}' does not resolve in '{}'",
                    segment, path
                )));
            }
            handle = next;
        }
        Ok(handle)
    }

    /// Inverse of [`map_text_path_to_handle`](Self::map_text_path_to_handle).
    /// Unnamed nodes are written as their context tag.
    pub fn handle_to_text_path(&self, handle: PropertyPathHandle) -> Result<String> {
        let tags = self.path_tags(handle)?;
        let mut segments = Vec::with_capacity(tags.len());
        let mut current = handle;
        while !current.is_root() && !current.is_null() {
            if self.is_dictionary_item(current) {
                segments.push(current.dictionary_key().to_string());
            } else if let Some(name) = self.node_name(current) {
                segments.push(name.to_string());
            } else {
                segments.push(self.tag(current).to_string());
            }
            current = self.parent(current);
        }
        segments.reverse();
        Ok(segments.join("/"))
    }
}
