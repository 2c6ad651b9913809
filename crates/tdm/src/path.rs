// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Property path handles.
//!
//! A [`PropertyPathHandle`] packs a schema node handle (low 16 bits) and a
//! dictionary key (high 16 bits) into one integer. The key is meaningful only
//! below a dictionary node.

use std::fmt;

/// Index of a node in a trait's schema table (offset by the reserved sentinels).
pub type PropertySchemaHandle = u16;

/// Key of one dynamic element of a dictionary node.
pub type PropertyDictionaryKey = u16;

pub const NULL_PROPERTY_SCHEMA_HANDLE: PropertySchemaHandle = 0;
pub const ROOT_PROPERTY_SCHEMA_HANDLE: PropertySchemaHandle = 1;

/// First schema handle that indexes the node table.
pub const HANDLE_TABLE_OFFSET: PropertySchemaHandle = 2;

const DICTIONARY_KEY_SHIFT: u32 = 16;

/// Address of one node, or one dictionary element, within a trait instance.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PropertyPathHandle(u32);

pub const NULL_PROPERTY_PATH_HANDLE: PropertyPathHandle = PropertyPathHandle(0);
pub const ROOT_PROPERTY_PATH_HANDLE: PropertyPathHandle =
    PropertyPathHandle(ROOT_PROPERTY_SCHEMA_HANDLE as u32);

impl PropertyPathHandle {
    #[inline]
    pub const fn new(schema: PropertySchemaHandle, key: PropertyDictionaryKey) -> Self {
        Self((schema as u32) | ((key as u32) << DICTIONARY_KEY_SHIFT))
    }

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn schema_handle(self) -> PropertySchemaHandle {
        (self.0 & 0xFFFF) as PropertySchemaHandle
    }

    #[inline]
    pub const fn dictionary_key(self) -> PropertyDictionaryKey {
        (self.0 >> DICTIONARY_KEY_SHIFT) as PropertyDictionaryKey
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == NULL_PROPERTY_PATH_HANDLE.0
    }

    #[inline]
    pub const fn is_root(self) -> bool {
        self.0 == ROOT_PROPERTY_PATH_HANDLE.0
    }

    /// Same schema node with a different dictionary key.
    #[inline]
    pub const fn with_dictionary_key(self, key: PropertyDictionaryKey) -> Self {
        Self::new(self.schema_handle(), key)
    }
}

impl fmt::Debug for PropertyPathHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "PropertyPathHandle(null)")
        } else if self.is_root() {
            write!(f, "PropertyPathHandle(root)")
        } else {
            write!(
                f,
                "PropertyPathHandle({}, key={})",
                self.schema_handle(),
                self.dictionary_key()
            )
        }
    }
}

impl fmt::Display for PropertyPathHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dictionary_key() == 0 {
            write!(f, "{}", self.schema_handle())
        } else {
            write!(f, "{}[{}]", self.schema_handle(), self.dictionary_key())
        }
    }
}

/// Compose a path handle from its schema handle and dictionary key.
#[inline]
pub const fn create_property_path_handle(
    schema: PropertySchemaHandle,
    key: PropertyDictionaryKey,
) -> PropertyPathHandle {
    PropertyPathHandle::new(schema, key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels_are_distinct() {
        assert!(NULL_PROPERTY_PATH_HANDLE.is_null());
        assert!(!NULL_PROPERTY_PATH_HANDLE.is_root());
        assert!(ROOT_PROPERTY_PATH_HANDLE.is_root());
        assert!(!ROOT_PROPERTY_PATH_HANDLE.is_null());
        let first = create_property_path_handle(HANDLE_TABLE_OFFSET, 0);
        assert!(!first.is_null() && !first.is_root());
    }

    #[test]
    fn test_roundtrip_all_components() {
        for _ in 0..1000 {
            let schema = fastrand::u16(..);
            let key = fastrand::u16(..);
            let handle = create_property_path_handle(schema, key);
            assert_eq!(handle.schema_handle(), schema);
            assert_eq!(handle.dictionary_key(), key);
        }
        let edge = create_property_path_handle(u16::MAX, u16::MAX);
        assert_eq!(edge.schema_handle(), u16::MAX);
        assert_eq!(edge.dictionary_key(), u16::MAX);
    }

    #[test]
    fn test_with_dictionary_key_keeps_schema() {
        let handle = create_property_path_handle(5, 10);
        let other = handle.with_dictionary_key(20);
        assert_eq!(other.schema_handle(), 5);
        assert_eq!(other.dictionary_key(), 20);
        assert_ne!(handle, other);
    }

    #[test]
    fn test_display() {
        assert_eq!(create_property_path_handle(4, 0).to_string(), "4");
        assert_eq!(create_property_path_handle(4, 7).to_string(), "4[7]");
    }
}
