// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Crate-level error type.

use crate::path::PropertyPathHandle;
use crate::tlv::{Tag, TlvError};
use thiserror::Error;

/// Errors raised by the schema engine, sinks, sources and the client.
#[derive(Debug, Error)]
pub enum TdmError {
    #[error("TLV error: {0}")]
    Tlv(#[from] TlvError),

    /// Data does not fit the schema (null on a non-nullable node, missing
    /// mandatory field, wrong element kind).
    #[error("schema mismatch at {handle}: {reason}")]
    SchemaMismatch {
        handle: PropertyPathHandle,
        reason: &'static str,
    },

    /// No child of `parent` carries `tag`.
    #[error("tag {tag} not found under {parent}")]
    TagNotFound {
        parent: PropertyPathHandle,
        tag: Tag,
    },

    /// Tag of the wrong form for its position (e.g. a context tag under a
    /// dictionary).
    #[error("invalid tag: {0}")]
    InvalidTag(Tag),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("conditional update requires a known trait version")]
    VersionUnknown,

    #[error("trait {trait_handle} mixes conditional and unconditional updates")]
    MixedConditionality { trait_handle: u16 },

    #[error("incompatible schema version")]
    IncompatibleVersion,

    #[error("handler already registered")]
    AlreadyRegistered,

    #[error("trait instance not found")]
    TraitNotFound,

    #[error("trait instance already exists")]
    DuplicateTrait,

    #[error("out of memory: {0}")]
    OutOfMemory(&'static str),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl TdmError {
    /// True when the failure is a full output buffer, the only recoverable
    /// condition during retrieval.
    pub fn is_buffer_too_small(&self) -> bool {
        matches!(self, TdmError::Tlv(TlvError::BufferTooSmall))
    }

    pub(crate) fn mismatch(handle: PropertyPathHandle, reason: &'static str) -> Self {
        TdmError::SchemaMismatch { handle, reason }
    }
}

pub type Result<T> = std::result::Result<T, TdmError>;
