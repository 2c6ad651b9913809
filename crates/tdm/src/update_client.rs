// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pending-update bookkeeping shared by the updatable sinks of one client.

use crate::catalog::TraitDataHandle;
use crate::delegate::{DirtyPathCut, PathFilter};
use crate::error::{Result, TdmError};
use crate::path::PropertyPathHandle;
use crate::schema::{Retrieved, SchemaEngine};
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;

/// Whether the publisher must be at a known version to accept an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    Conditional,
    Unconditional,
}

impl UpdateMode {
    pub fn from_conditional(conditional: bool) -> Self {
        if conditional {
            UpdateMode::Conditional
        } else {
            UpdateMode::Unconditional
        }
    }
}

/// True if `ancestor` is `handle` or one of its ancestors.
pub(crate) fn is_ancestor_or_self(
    schema: &SchemaEngine,
    ancestor: PropertyPathHandle,
    handle: PropertyPathHandle,
) -> bool {
    let mut current = handle;
    for _ in 0..=schema.tree_depth() {
        if current == ancestor {
            return true;
        }
        if current.is_root() || current.is_null() {
            break;
        }
        current = schema.parent(current);
    }
    false
}

/// Paths with local changes waiting to be flushed, in the order they were
/// set. A path is recorded once; setting a path below an already pending
/// ancestor is a no-op.
#[derive(Debug, Default)]
pub struct PendingUpdates {
    paths: Vec<(TraitDataHandle, PropertyPathHandle)>,
    modes: HashMap<TraitDataHandle, UpdateMode>,
}

impl PendingUpdates {
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn mode(&self, trait_handle: TraitDataHandle) -> Option<UpdateMode> {
        self.modes.get(&trait_handle).copied()
    }

    /// Record `handle` as changed. Mixing conditional and unconditional
    /// updates on one trait instance is refused.
    pub fn add(
        &mut self,
        schema: &SchemaEngine,
        trait_handle: TraitDataHandle,
        handle: PropertyPathHandle,
        mode: UpdateMode,
    ) -> Result<()> {
        match self.modes.get(&trait_handle) {
            Some(existing) if *existing != mode => {
                return Err(TdmError::MixedConditionality { trait_handle });
            }
            Some(_) => {}
            None => {
                self.modes.insert(trait_handle, mode);
            }
        }

        if self.is_path_pending(schema, trait_handle, handle) {
            return Ok(());
        }
        self.paths.retain(|(owner, pending)| {
            *owner != trait_handle || !is_ancestor_or_self(schema, handle, *pending)
        });
        self.paths.push((trait_handle, handle));
        Ok(())
    }

    /// True if `handle` or one of its ancestors is pending for the trait.
    pub fn is_path_pending(
        &self,
        schema: &SchemaEngine,
        trait_handle: TraitDataHandle,
        handle: PropertyPathHandle,
    ) -> bool {
        self.paths.iter().any(|(owner, pending)| {
            *owner == trait_handle && is_ancestor_or_self(schema, *pending, handle)
        })
    }

    /// Pending paths of one trait, in insertion order.
    pub fn paths_for(&self, trait_handle: TraitDataHandle) -> Vec<PropertyPathHandle> {
        self.paths
            .iter()
            .filter(|(owner, _)| *owner == trait_handle)
            .map(|(_, handle)| *handle)
            .collect()
    }

    /// Traits with pending paths, in order of their first pending path.
    pub fn traits(&self) -> Vec<TraitDataHandle> {
        let mut traits = Vec::new();
        for (owner, _) in &self.paths {
            if !traits.contains(owner) {
                traits.push(*owner);
            }
        }
        traits
    }

    pub fn clear_trait(&mut self, trait_handle: TraitDataHandle) {
        self.paths.retain(|(owner, _)| *owner != trait_handle);
        self.modes.remove(&trait_handle);
    }

    pub fn clear(&mut self) {
        self.paths.clear();
        self.modes.clear();
    }
}

/// Owner of the update mutex.
#[derive(Debug, Default)]
pub struct UpdateClient {
    pending: Mutex<PendingUpdates>,
}

impl UpdateClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the update mutex.
    pub fn lock(&self) -> MutexGuard<'_, PendingUpdates> {
        self.pending.lock()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.lock().is_empty()
    }

    /// Snapshot of the trait's pending paths, used to keep incoming data
    /// from overwriting local changes.
    pub fn path_filter<'a>(
        &self,
        schema: &'a SchemaEngine,
        trait_handle: TraitDataHandle,
    ) -> PendingPathFilter<'a> {
        PendingPathFilter {
            schema,
            paths: self.pending.lock().paths_for(trait_handle),
        }
    }
}

/// [`PathFilter`] skipping pending paths and everything below them.
#[derive(Debug)]
pub struct PendingPathFilter<'a> {
    schema: &'a SchemaEngine,
    paths: Vec<PropertyPathHandle>,
}

impl PendingPathFilter<'_> {
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn paths(&self) -> &[PropertyPathHandle] {
        &self.paths
    }
}

impl PathFilter for PendingPathFilter<'_> {
    fn filter_path(&self, handle: PropertyPathHandle) -> bool {
        self.paths
            .iter()
            .any(|pending| is_ancestor_or_self(self.schema, *pending, handle))
    }
}

/// Collects dictionaries deferred while building an update payload.
#[derive(Debug, Default)]
pub struct UpdateDictionaryDirtyPathCut {
    deferred: Vec<PropertyPathHandle>,
}

impl UpdateDictionaryDirtyPathCut {
    pub fn deferred(&self) -> &[PropertyPathHandle] {
        &self.deferred
    }

    pub(crate) fn into_retrieved(self) -> Retrieved {
        if self.deferred.is_empty() {
            Retrieved::Complete
        } else {
            Retrieved::Deferred(self.deferred)
        }
    }
}

impl DirtyPathCut for UpdateDictionaryDirtyPathCut {
    fn cut_path(&mut self, handle: PropertyPathHandle, _schema: &SchemaEngine) -> Result<()> {
        if !self.deferred.contains(&handle) {
            self.deferred.push(handle);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::{create_property_path_handle, ROOT_PROPERTY_SCHEMA_HANDLE};
    use crate::schema::{NodeFlags, SchemaBuilder};

    // Root { a (1), s (2) { s1 (1) }, d (3) dict { item } }
    fn schema() -> SchemaEngine {
        let root = ROOT_PROPERTY_SCHEMA_HANDLE;
        let mut builder = SchemaBuilder::new("Pending", 7);
        builder.add(root, 1, "a", NodeFlags::leaf());
        let s = builder.add(root, 2, "s", NodeFlags::structure());
        builder.add(s, 1, "s1", NodeFlags::leaf());
        let d = builder.add(root, 3, "d", NodeFlags::dictionary());
        builder.add(d, 1, "item", NodeFlags::leaf());
        builder.build().expect("schema")
    }

    fn h(schema: u16, key: u16) -> PropertyPathHandle {
        create_property_path_handle(schema, key)
    }

    #[test]
    fn test_ancestor_collapses_descendants() {
        let schema = schema();
        let mut pending = PendingUpdates::default();
        pending
            .add(&schema, 1, h(4, 0), UpdateMode::Unconditional)
            .expect("s1");
        pending
            .add(&schema, 1, h(6, 5), UpdateMode::Unconditional)
            .expect("item 5");
        pending
            .add(&schema, 1, h(3, 0), UpdateMode::Unconditional)
            .expect("s");
        assert_eq!(pending.paths_for(1), vec![h(6, 5), h(3, 0)]);

        // Already covered by `s`.
        pending
            .add(&schema, 1, h(4, 0), UpdateMode::Unconditional)
            .expect("s1 again");
        assert_eq!(pending.len(), 2);
        assert!(pending.is_path_pending(&schema, 1, h(4, 0)));
        assert!(!pending.is_path_pending(&schema, 1, h(6, 6)));
        assert!(!pending.is_path_pending(&schema, 2, h(4, 0)));
    }

    #[test]
    fn test_mixed_conditionality_refused() {
        let schema = schema();
        let mut pending = PendingUpdates::default();
        pending
            .add(&schema, 3, h(2, 0), UpdateMode::Conditional)
            .expect("conditional");
        assert!(matches!(
            pending.add(&schema, 3, h(4, 0), UpdateMode::Unconditional),
            Err(TdmError::MixedConditionality { trait_handle: 3 })
        ));
        // Other traits are independent.
        pending
            .add(&schema, 4, h(2, 0), UpdateMode::Unconditional)
            .expect("other trait");
        assert_eq!(pending.traits(), vec![3, 4]);

        pending.clear_trait(3);
        assert_eq!(pending.mode(3), None);
        pending
            .add(&schema, 3, h(4, 0), UpdateMode::Unconditional)
            .expect("after clear");
    }

    #[test]
    fn test_path_filter_snapshot() {
        let schema = schema();
        let client = UpdateClient::new();
        client
            .lock()
            .add(&schema, 1, h(6, 9), UpdateMode::Unconditional)
            .expect("item");
        let filter = client.path_filter(&schema, 1);
        assert!(filter.filter_path(h(6, 9)));
        assert!(!filter.filter_path(h(6, 8)));
        assert!(!filter.filter_path(h(5, 0)));
        assert!(client.path_filter(&schema, 2).is_empty());
        assert!(client.has_pending());
    }
}
