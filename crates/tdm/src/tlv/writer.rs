// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounded TLV writer.

use super::{
    ContainerType, Tag, TlvError, TlvReader, TlvResult, TlvValue, TYPE_ARRAY, TYPE_BYTES_1,
    TYPE_BYTES_2, TYPE_END_OF_CONTAINER, TYPE_FALSE, TYPE_FLOAT64, TYPE_INT8, TYPE_NULL,
    TYPE_STRUCTURE, TYPE_TRUE, TYPE_UINT8, TYPE_UTF8_1, TYPE_UTF8_2,
};

/// Saved writer position, see [`TlvWriter::checkpoint`].
#[derive(Debug, Clone)]
pub struct WriterCheckpoint {
    len: usize,
    open: Vec<ContainerType>,
}

/// TLV writer over an owned buffer with a hard capacity limit.
///
/// One byte per open container is held back so that `end_container` can
/// always be written, even after a `BufferTooSmall` failure.
#[derive(Debug, Clone)]
pub struct TlvWriter {
    buffer: Vec<u8>,
    capacity: usize,
    open: Vec<ContainerType>,
}

impl Default for TlvWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl TlvWriter {
    /// Writer without a practical size limit.
    pub fn new() -> Self {
        Self::with_capacity_limit(usize::MAX)
    }

    /// Writer that refuses to grow past `capacity` bytes.
    pub fn with_capacity_limit(capacity: usize) -> Self {
        Self {
            buffer: Vec::new(),
            capacity,
            open: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Change the capacity limit. Bytes already written are kept.
    pub fn set_capacity_limit(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    /// Bytes still available for new elements.
    pub fn remaining(&self) -> usize {
        self.capacity
            .saturating_sub(self.buffer.len())
            .saturating_sub(self.open.len())
    }

    /// Number of containers currently open.
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn checkpoint(&self) -> WriterCheckpoint {
        WriterCheckpoint {
            len: self.buffer.len(),
            open: self.open.clone(),
        }
    }

    /// Discard everything written since `checkpoint`.
    pub fn rollback(&mut self, checkpoint: &WriterCheckpoint) {
        self.buffer.truncate(checkpoint.len);
        self.open.clone_from(&checkpoint.open);
    }

    /// Return the encoded bytes. All containers must be closed.
    pub fn finalize(self) -> TlvResult<Vec<u8>> {
        if !self.open.is_empty() {
            return Err(TlvError::InvalidState("finalize with open containers"));
        }
        Ok(self.buffer)
    }

    fn reserve(&mut self, needed: usize) -> TlvResult<()> {
        if needed > self.remaining() {
            return Err(TlvError::BufferTooSmall);
        }
        self.buffer
            .try_reserve(needed)
            .map_err(|_| TlvError::OutOfMemory)
    }

    fn write_header(&mut self, tag: Tag, element_type: u8) {
        self.buffer.push((tag.form() << 5) | element_type);
        match tag {
            Tag::Anonymous => {}
            Tag::Context(n) => self.buffer.push(n),
            Tag::Profile { profile, number } => {
                self.buffer.extend_from_slice(&profile.to_le_bytes());
                self.buffer.extend_from_slice(&number.to_le_bytes());
            }
        }
    }

    fn put_fixed(&mut self, tag: Tag, element_type: u8, value: &[u8]) -> TlvResult<()> {
        self.reserve(1 + tag.encoded_len() + value.len())?;
        self.write_header(tag, element_type);
        self.buffer.extend_from_slice(value);
        Ok(())
    }

    /// Write an unsigned integer using the smallest width that holds it.
    pub fn put_u64(&mut self, tag: Tag, value: u64) -> TlvResult<()> {
        if let Ok(v) = u8::try_from(value) {
            self.put_fixed(tag, TYPE_UINT8, &[v])
        } else if let Ok(v) = u16::try_from(value) {
            self.put_fixed(tag, TYPE_UINT8 + 1, &v.to_le_bytes())
        } else if let Ok(v) = u32::try_from(value) {
            self.put_fixed(tag, TYPE_UINT8 + 2, &v.to_le_bytes())
        } else {
            self.put_fixed(tag, TYPE_UINT8 + 3, &value.to_le_bytes())
        }
    }

    /// Write a signed integer using the smallest width that holds it.
    pub fn put_i64(&mut self, tag: Tag, value: i64) -> TlvResult<()> {
        if let Ok(v) = i8::try_from(value) {
            self.put_fixed(tag, TYPE_INT8, &v.to_le_bytes())
        } else if let Ok(v) = i16::try_from(value) {
            self.put_fixed(tag, TYPE_INT8 + 1, &v.to_le_bytes())
        } else if let Ok(v) = i32::try_from(value) {
            self.put_fixed(tag, TYPE_INT8 + 2, &v.to_le_bytes())
        } else {
            self.put_fixed(tag, TYPE_INT8 + 3, &value.to_le_bytes())
        }
    }

    pub fn put_bool(&mut self, tag: Tag, value: bool) -> TlvResult<()> {
        let element_type = if value { TYPE_TRUE } else { TYPE_FALSE };
        self.put_fixed(tag, element_type, &[])
    }

    pub fn put_f64(&mut self, tag: Tag, value: f64) -> TlvResult<()> {
        self.put_fixed(tag, TYPE_FLOAT64, &value.to_bits().to_le_bytes())
    }

    pub fn put_null(&mut self, tag: Tag) -> TlvResult<()> {
        self.put_fixed(tag, TYPE_NULL, &[])
    }

    fn put_length_prefixed(
        &mut self,
        tag: Tag,
        short_type: u8,
        long_type: u8,
        data: &[u8],
    ) -> TlvResult<()> {
        if let Ok(len) = u8::try_from(data.len()) {
            self.reserve(2 + tag.encoded_len() + data.len())?;
            self.write_header(tag, short_type);
            self.buffer.push(len);
        } else if let Ok(len) = u16::try_from(data.len()) {
            self.reserve(3 + tag.encoded_len() + data.len())?;
            self.write_header(tag, long_type);
            self.buffer.extend_from_slice(&len.to_le_bytes());
        } else {
            return Err(TlvError::ValueTooLarge(data.len()));
        }
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    pub fn put_string(&mut self, tag: Tag, value: &str) -> TlvResult<()> {
        self.put_length_prefixed(tag, TYPE_UTF8_1, TYPE_UTF8_2, value.as_bytes())
    }

    pub fn put_bytes(&mut self, tag: Tag, value: &[u8]) -> TlvResult<()> {
        self.put_length_prefixed(tag, TYPE_BYTES_1, TYPE_BYTES_2, value)
    }

    pub fn put_value(&mut self, tag: Tag, value: &TlvValue) -> TlvResult<()> {
        match value {
            TlvValue::Signed(v) => self.put_i64(tag, *v),
            TlvValue::Unsigned(v) => self.put_u64(tag, *v),
            TlvValue::Bool(v) => self.put_bool(tag, *v),
            TlvValue::Float(v) => self.put_f64(tag, *v),
            TlvValue::String(v) => self.put_string(tag, v),
            TlvValue::Bytes(v) => self.put_bytes(tag, v),
            TlvValue::Null => self.put_null(tag),
        }
    }

    pub fn start_container(&mut self, tag: Tag, container: ContainerType) -> TlvResult<()> {
        // Header plus the end marker held back for this container.
        self.reserve(1 + tag.encoded_len() + 1)?;
        let element_type = match container {
            ContainerType::Structure => TYPE_STRUCTURE,
            ContainerType::Array => TYPE_ARRAY,
        };
        self.write_header(tag, element_type);
        self.open.push(container);
        Ok(())
    }

    pub fn end_container(&mut self) -> TlvResult<()> {
        if self.open.pop().is_none() {
            return Err(TlvError::InvalidState("end_container without open container"));
        }
        self.buffer.push(TYPE_END_OF_CONTAINER);
        Ok(())
    }

    /// Copy the reader's current element, re-tagged with `tag`, without
    /// interpreting its value.
    pub fn copy_element(&mut self, tag: Tag, reader: &TlvReader<'_>) -> TlvResult<()> {
        let (element_type, body) = reader.raw_body()?;
        self.reserve(1 + tag.encoded_len() + body.len())?;
        self.write_header(tag, element_type);
        self.buffer.extend_from_slice(body);
        Ok(())
    }

    /// Append an already encoded element verbatim.
    pub fn put_raw_element(&mut self, encoded: &[u8]) -> TlvResult<()> {
        self.reserve(encoded.len())?;
        self.buffer.extend_from_slice(encoded);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_integer_width() {
        let mut writer = TlvWriter::new();
        writer.put_u64(Tag::Anonymous, 7).expect("put u8");
        assert_eq!(writer.as_bytes(), &[0x04, 7]);

        let mut writer = TlvWriter::new();
        writer.put_u64(Tag::Context(1), 0x1234).expect("put u16");
        assert_eq!(writer.as_bytes(), &[0x25, 1, 0x34, 0x12]);

        let mut writer = TlvWriter::new();
        writer.put_i64(Tag::Anonymous, -2).expect("put i8");
        assert_eq!(writer.as_bytes(), &[0x00, 0xFE]);
    }

    #[test]
    fn test_capacity_limit_reports_buffer_too_small() {
        let mut writer = TlvWriter::with_capacity_limit(4);
        writer.put_u64(Tag::Context(1), 1).expect("fits");
        assert_eq!(
            writer.put_string(Tag::Context(2), "too long"),
            Err(TlvError::BufferTooSmall)
        );
        // Failed put leaves the buffer untouched.
        assert_eq!(writer.len(), 3);
    }

    #[test]
    fn test_end_container_always_fits() {
        let mut writer = TlvWriter::with_capacity_limit(3);
        writer
            .start_container(Tag::Context(1), ContainerType::Structure)
            .expect("start");
        assert_eq!(writer.remaining(), 0);
        assert_eq!(writer.put_null(Tag::Anonymous), Err(TlvError::BufferTooSmall));
        writer.end_container().expect("end marker reserved");
        assert_eq!(writer.finalize().expect("finalize").len(), 3);
    }

    #[test]
    fn test_rollback_restores_open_containers() {
        let mut writer = TlvWriter::new();
        writer
            .start_container(Tag::Anonymous, ContainerType::Structure)
            .expect("start");
        let checkpoint = writer.checkpoint();
        writer
            .start_container(Tag::Context(1), ContainerType::Array)
            .expect("start inner");
        writer.put_bool(Tag::Anonymous, true).expect("bool");
        writer.rollback(&checkpoint);
        assert_eq!(writer.depth(), 1);
        writer.end_container().expect("end");
        assert_eq!(writer.finalize().expect("finalize"), vec![0x15, 0x18]);
    }

    #[test]
    fn test_finalize_rejects_open_container() {
        let mut writer = TlvWriter::new();
        writer
            .start_container(Tag::Anonymous, ContainerType::Array)
            .expect("start");
        assert!(matches!(writer.finalize(), Err(TlvError::InvalidState(_))));
    }
}
