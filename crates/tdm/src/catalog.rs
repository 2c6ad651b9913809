// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Registry of trait instances.
//!
//! Each instance is addressed by an opaque [`TraitDataHandle`] and by its
//! `(resource, profile, instance)` locator; both lookups stay consistent.

use crate::error::{Result, TdmError};
use crate::path::{PropertyPathHandle, ROOT_PROPERTY_PATH_HANDLE};
use std::collections::BTreeMap;
use std::fmt;

/// Catalog-local identifier of a trait instance.
pub type TraitDataHandle = u16;

/// Node (device or service) hosting a trait instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ResourceIdentifier(pub u64);

impl ResourceIdentifier {
    /// The local node.
    pub const SELF_NODE: ResourceIdentifier = ResourceIdentifier(0);
}

impl fmt::Display for ResourceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

/// Where a trait instance lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraitPath {
    pub resource: ResourceIdentifier,
    pub profile_id: u32,
    pub instance_id: u64,
}

impl TraitPath {
    pub fn new(resource: ResourceIdentifier, profile_id: u32, instance_id: u64) -> Self {
        Self {
            resource,
            profile_id,
            instance_id,
        }
    }
}

impl fmt::Display for TraitPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/0x{:08x}/{}",
            self.resource, self.profile_id, self.instance_id
        )
    }
}

#[derive(Debug)]
struct CatalogEntry<T> {
    path: TraitPath,
    base_handle: PropertyPathHandle,
    item: T,
}

/// Mapping `TraitDataHandle -> (locator, base handle, item)`.
#[derive(Debug)]
pub struct TraitCatalog<T> {
    entries: BTreeMap<TraitDataHandle, CatalogEntry<T>>,
    next_handle: TraitDataHandle,
}

impl<T> Default for TraitCatalog<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TraitCatalog<T> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_handle: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn allocate_handle(&mut self) -> Result<TraitDataHandle> {
        for _ in 0..=usize::from(TraitDataHandle::MAX) {
            let candidate = self.next_handle;
            self.next_handle = self.next_handle.wrapping_add(1);
            if !self.entries.contains_key(&candidate) {
                return Ok(candidate);
            }
        }
        Err(TdmError::OutOfMemory("trait catalog is full"))
    }

    /// Register an item; fails if the locator is already taken.
    pub fn add(&mut self, path: TraitPath, item: T) -> Result<TraitDataHandle> {
        self.add_with(path, |_| item)
    }

    /// Register an item built from its freshly allocated handle.
    pub fn add_with<F>(&mut self, path: TraitPath, build: F) -> Result<TraitDataHandle>
    where
        F: FnOnce(TraitDataHandle) -> T,
    {
        if self.locate_by_path(path.resource, path.profile_id, path.instance_id).is_ok() {
            return Err(TdmError::DuplicateTrait);
        }
        let handle = self.allocate_handle()?;
        self.entries.insert(
            handle,
            CatalogEntry {
                path,
                base_handle: ROOT_PROPERTY_PATH_HANDLE,
                item: build(handle),
            },
        );
        log::debug!("[TraitCatalog::add] {} -> handle {}", path, handle);
        Ok(handle)
    }

    pub fn remove(&mut self, handle: TraitDataHandle) -> Result<T> {
        let entry = self
            .entries
            .remove(&handle)
            .ok_or(TdmError::TraitNotFound)?;
        log::debug!("[TraitCatalog::remove] handle {} ({})", handle, entry.path);
        Ok(entry.item)
    }

    /// Locator and base path handle of a registered instance.
    pub fn locate(&self, handle: TraitDataHandle) -> Result<(TraitPath, PropertyPathHandle)> {
        self.entries
            .get(&handle)
            .map(|entry| (entry.path, entry.base_handle))
            .ok_or(TdmError::TraitNotFound)
    }

    pub fn locate_by_path(
        &self,
        resource: ResourceIdentifier,
        profile_id: u32,
        instance_id: u64,
    ) -> Result<TraitDataHandle> {
        self.entries
            .iter()
            .find(|(_, entry)| {
                entry.path.resource == resource
                    && entry.path.profile_id == profile_id
                    && entry.path.instance_id == instance_id
            })
            .map(|(handle, _)| *handle)
            .ok_or(TdmError::TraitNotFound)
    }

    pub fn get(&self, handle: TraitDataHandle) -> Option<&T> {
        self.entries.get(&handle).map(|entry| &entry.item)
    }

    pub fn get_mut(&mut self, handle: TraitDataHandle) -> Option<&mut T> {
        self.entries.get_mut(&handle).map(|entry| &mut entry.item)
    }

    /// Visit every instance in handle order.
    pub fn iterate<F>(&self, mut visit: F)
    where
        F: FnMut(TraitDataHandle, &TraitPath, &T),
    {
        for (handle, entry) in &self.entries {
            visit(*handle, &entry.path, &entry.item);
        }
    }

    pub fn handles(&self) -> Vec<TraitDataHandle> {
        self.entries.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(instance: u64) -> TraitPath {
        TraitPath::new(ResourceIdentifier(0x18B4_3000_0000_0001), 0x0E01, instance)
    }

    #[test]
    fn test_add_locate_remove() {
        let mut catalog = TraitCatalog::new();
        let first = catalog.add(path(1), "one").expect("add one");
        let second = catalog.add_with(path(2), |h| if h == 1 { "two" } else { "?" }).expect("add two");
        assert_ne!(first, second);
        assert_eq!(catalog.get(second), Some(&"two"));

        assert_eq!(catalog.locate(first).expect("locate").0, path(1));
        assert_eq!(
            catalog
                .locate_by_path(path(2).resource, 0x0E01, 2)
                .expect("by path"),
            second
        );

        assert_eq!(catalog.remove(first).expect("remove"), "one");
        assert!(matches!(catalog.locate(first), Err(TdmError::TraitNotFound)));
        assert!(matches!(
            catalog.locate_by_path(path(1).resource, 0x0E01, 1),
            Err(TdmError::TraitNotFound)
        ));
        assert!(matches!(catalog.remove(first), Err(TdmError::TraitNotFound)));
    }

    #[test]
    fn test_duplicate_locator_rejected() {
        let mut catalog = TraitCatalog::new();
        catalog.add(path(7), 1u32).expect("add");
        assert!(matches!(catalog.add(path(7), 2u32), Err(TdmError::DuplicateTrait)));
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_iterate_in_handle_order() {
        let mut catalog = TraitCatalog::new();
        for instance in 0..5 {
            catalog.add(path(instance), instance).expect("add");
        }
        let mut seen = Vec::new();
        catalog.iterate(|handle, path, item| {
            assert_eq!(path.instance_id, *item);
            seen.push(handle);
        });
        assert_eq!(seen, catalog.handles());
        assert_eq!(seen.len(), 5);
    }
}
