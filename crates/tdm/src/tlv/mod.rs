// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Compact tag-length-value codec used on the TDM wire.
//!
//! Every element starts with a control byte: the upper three bits select the
//! tag form, the lower five bits the element type.
//!
//! ```text
//! +-------------+--------------------+-----------------+---------------+
//! | control (1) | tag (0, 1 or 8)    | length (0/1/2)  | value         |
//! +-------------+--------------------+-----------------+---------------+
//! ```
//!
//! Structures and arrays are terminated by an end-of-container element.
//! Integers and lengths are little-endian.

mod reader;
mod writer;

pub use reader::TlvReader;
pub use writer::{TlvWriter, WriterCheckpoint};

use std::fmt;

/// Profile id reserved for dictionary keys: a profile-scoped tag carrying this
/// profile means "the tag number is a dictionary key".
pub const DICTIONARY_KEY_PROFILE: u32 = 0x0000_0021;

pub(crate) const TAG_FORM_ANONYMOUS: u8 = 0;
pub(crate) const TAG_FORM_CONTEXT: u8 = 1;
pub(crate) const TAG_FORM_PROFILE: u8 = 7;

/// Element tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Tag {
    /// No tag (array members, top-level elements).
    #[default]
    Anonymous,
    /// Context-specific tag; numbers a field inside its parent structure.
    Context(u8),
    /// Profile-scoped tag.
    Profile { profile: u32, number: u32 },
}

impl Tag {
    pub fn is_context(&self) -> bool {
        matches!(self, Tag::Context(_))
    }

    pub fn is_profile(&self) -> bool {
        matches!(self, Tag::Profile { .. })
    }

    /// Profile id of a profile-scoped tag.
    pub fn profile_id(&self) -> Option<u32> {
        match self {
            Tag::Profile { profile, .. } => Some(*profile),
            _ => None,
        }
    }

    /// Tag number (context number or profile tag number).
    pub fn tag_number(&self) -> Option<u32> {
        match self {
            Tag::Anonymous => None,
            Tag::Context(n) => Some(u32::from(*n)),
            Tag::Profile { number, .. } => Some(*number),
        }
    }

    /// True if this is a dictionary-key tag.
    pub fn is_dictionary_key(&self) -> bool {
        self.profile_id() == Some(DICTIONARY_KEY_PROFILE)
    }

    pub(crate) fn form(&self) -> u8 {
        match self {
            Tag::Anonymous => TAG_FORM_ANONYMOUS,
            Tag::Context(_) => TAG_FORM_CONTEXT,
            Tag::Profile { .. } => TAG_FORM_PROFILE,
        }
    }

    pub(crate) fn encoded_len(&self) -> usize {
        match self {
            Tag::Anonymous => 0,
            Tag::Context(_) => 1,
            Tag::Profile { .. } => 8,
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::Anonymous => write!(f, "anonymous"),
            Tag::Context(n) => write!(f, "{}", n),
            Tag::Profile { profile, number } => write!(f, "0x{:08x}:{}", profile, number),
        }
    }
}

/// Tag for a dictionary element with the given key.
pub fn dictionary_key_tag(key: u16) -> Tag {
    Tag::Profile {
        profile: DICTIONARY_KEY_PROFILE,
        number: u32::from(key),
    }
}

/// Kinds of encoded elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    SignedInt,
    UnsignedInt,
    Bool,
    Float,
    Utf8String,
    ByteString,
    Null,
    Structure,
    Array,
    EndOfContainer,
}

impl ElementType {
    pub fn is_container(&self) -> bool {
        matches!(self, ElementType::Structure | ElementType::Array)
    }
}

/// Container kinds accepted by [`TlvWriter::start_container`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerType {
    Structure,
    Array,
}

// Raw element type codes.
pub(crate) const TYPE_INT8: u8 = 0x00;
pub(crate) const TYPE_INT64: u8 = 0x03;
pub(crate) const TYPE_UINT8: u8 = 0x04;
pub(crate) const TYPE_UINT64: u8 = 0x07;
pub(crate) const TYPE_FALSE: u8 = 0x08;
pub(crate) const TYPE_TRUE: u8 = 0x09;
pub(crate) const TYPE_FLOAT32: u8 = 0x0A;
pub(crate) const TYPE_FLOAT64: u8 = 0x0B;
pub(crate) const TYPE_UTF8_1: u8 = 0x0C;
pub(crate) const TYPE_UTF8_2: u8 = 0x0D;
pub(crate) const TYPE_BYTES_1: u8 = 0x10;
pub(crate) const TYPE_BYTES_2: u8 = 0x11;
pub(crate) const TYPE_NULL: u8 = 0x14;
pub(crate) const TYPE_STRUCTURE: u8 = 0x15;
pub(crate) const TYPE_ARRAY: u8 = 0x16;
pub(crate) const TYPE_END_OF_CONTAINER: u8 = 0x18;

/// Owned scalar value, used for staged leaves and rendering.
#[derive(Debug, Clone, PartialEq)]
pub enum TlvValue {
    Signed(i64),
    Unsigned(u64),
    Bool(bool),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Null,
}

impl From<i64> for TlvValue {
    fn from(v: i64) -> Self {
        TlvValue::Signed(v)
    }
}

impl From<i32> for TlvValue {
    fn from(v: i32) -> Self {
        TlvValue::Signed(i64::from(v))
    }
}

impl From<u64> for TlvValue {
    fn from(v: u64) -> Self {
        TlvValue::Unsigned(v)
    }
}

impl From<u32> for TlvValue {
    fn from(v: u32) -> Self {
        TlvValue::Unsigned(u64::from(v))
    }
}

impl From<u16> for TlvValue {
    fn from(v: u16) -> Self {
        TlvValue::Unsigned(u64::from(v))
    }
}

impl From<u8> for TlvValue {
    fn from(v: u8) -> Self {
        TlvValue::Unsigned(u64::from(v))
    }
}

impl From<bool> for TlvValue {
    fn from(v: bool) -> Self {
        TlvValue::Bool(v)
    }
}

impl From<f64> for TlvValue {
    fn from(v: f64) -> Self {
        TlvValue::Float(v)
    }
}

impl From<f32> for TlvValue {
    fn from(v: f32) -> Self {
        TlvValue::Float(f64::from(v))
    }
}

impl From<&str> for TlvValue {
    fn from(v: &str) -> Self {
        TlvValue::String(v.to_string())
    }
}

impl From<String> for TlvValue {
    fn from(v: String) -> Self {
        TlvValue::String(v)
    }
}

impl From<Vec<u8>> for TlvValue {
    fn from(v: Vec<u8>) -> Self {
        TlvValue::Bytes(v)
    }
}

impl From<&[u8]> for TlvValue {
    fn from(v: &[u8]) -> Self {
        TlvValue::Bytes(v.to_vec())
    }
}

/// Codec error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlvError {
    /// Writer has no room for the next element.
    BufferTooSmall,
    /// End of the current container (or of the buffer at top level).
    EndOfTlv,
    /// Input does not decode.
    Malformed { offset: usize, reason: &'static str },
    /// Current element has a different type than requested.
    WrongType {
        expected: &'static str,
        found: ElementType,
    },
    /// Operation not valid in the current cursor state.
    InvalidState(&'static str),
    /// Value does not fit the encoding (e.g. string over 64 KiB).
    ValueTooLarge(usize),
    /// Allocation for the output buffer failed.
    OutOfMemory,
}

impl fmt::Display for TlvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlvError::BufferTooSmall => write!(f, "buffer too small"),
            TlvError::EndOfTlv => write!(f, "end of TLV"),
            TlvError::Malformed { offset, reason } => {
                write!(f, "malformed TLV at offset {}: {}", offset, reason)
            }
            TlvError::WrongType { expected, found } => {
                write!(f, "wrong TLV type: expected {}, found {:?}", expected, found)
            }
            TlvError::InvalidState(msg) => write!(f, "invalid TLV cursor state: {}", msg),
            TlvError::ValueTooLarge(len) => write!(f, "value too large to encode: {} bytes", len),
            TlvError::OutOfMemory => write!(f, "out of memory"),
        }
    }
}

impl std::error::Error for TlvError {}

pub type TlvResult<T> = core::result::Result<T, TlvError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_helpers() {
        let tag = dictionary_key_tag(42);
        assert!(tag.is_profile());
        assert!(tag.is_dictionary_key());
        assert_eq!(tag.profile_id(), Some(DICTIONARY_KEY_PROFILE));
        assert_eq!(tag.tag_number(), Some(42));

        let ctx = Tag::Context(7);
        assert!(ctx.is_context());
        assert!(!ctx.is_dictionary_key());
        assert_eq!(ctx.tag_number(), Some(7));
        assert_eq!(Tag::Anonymous.tag_number(), None);
    }

    #[test]
    fn test_tag_display() {
        assert_eq!(Tag::Context(3).to_string(), "3");
        assert_eq!(dictionary_key_tag(10).to_string(), "0x00000021:10");
    }

    #[test]
    fn test_error_display() {
        let err = TlvError::Malformed {
            offset: 4,
            reason: "truncated header",
        };
        assert_eq!(err.to_string(), "malformed TLV at offset 4: truncated header");
    }
}
