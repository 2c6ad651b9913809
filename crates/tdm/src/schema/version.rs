// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Schema version ranges.

use super::SchemaEngine;
use crate::error::{Result, TdmError};
use serde::{Deserialize, Serialize};

/// Inclusive `[min, max]` range of schema versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaVersionRange {
    pub min: u16,
    pub max: u16,
}

impl Default for SchemaVersionRange {
    fn default() -> Self {
        Self { min: 1, max: 1 }
    }
}

impl SchemaVersionRange {
    pub const fn new(min: u16, max: u16) -> Self {
        Self { min, max }
    }

    pub fn is_empty(&self) -> bool {
        self.min > self.max
    }

    pub fn contains(&self, version: u16) -> bool {
        self.min <= version && version <= self.max
    }

    /// Overlap of two ranges; `None` when they do not intersect.
    pub fn intersect(&self, other: &SchemaVersionRange) -> Option<SchemaVersionRange> {
        let range = SchemaVersionRange::new(self.min.max(other.min), self.max.min(other.max));
        (!range.is_empty()).then_some(range)
    }
}

impl SchemaEngine {
    pub fn version_range(&self) -> SchemaVersionRange {
        self.version_range
    }

    pub fn min_version(&self) -> u16 {
        self.version_range.min
    }

    pub fn max_version(&self) -> u16 {
        self.version_range.max
    }

    /// Versions both this schema and `requested` understand.
    pub fn version_intersection(
        &self,
        requested: &SchemaVersionRange,
    ) -> Result<SchemaVersionRange> {
        self.version_range
            .intersect(requested)
            .ok_or(TdmError::IncompatibleVersion)
    }

    /// Newest version this schema can serve to a peer at `version`.
    pub fn highest_forward_version(&self, version: u16) -> Option<u16> {
        self.version_range
            .contains(version)
            .then_some(self.version_range.max)
    }

    /// Oldest version this schema stays compatible with from `version`.
    pub fn lowest_compatible_version(&self, version: u16) -> Option<u16> {
        self.version_range
            .contains(version)
            .then_some(self.version_range.min)
    }
}
