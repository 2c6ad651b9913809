// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Zero-copy TLV reader.

use super::{
    ElementType, Tag, TlvError, TlvResult, TlvValue, TAG_FORM_ANONYMOUS, TAG_FORM_CONTEXT,
    TAG_FORM_PROFILE, TYPE_ARRAY, TYPE_BYTES_1, TYPE_BYTES_2, TYPE_END_OF_CONTAINER, TYPE_FALSE,
    TYPE_FLOAT32, TYPE_FLOAT64, TYPE_INT64, TYPE_INT8, TYPE_NULL, TYPE_STRUCTURE, TYPE_TRUE,
    TYPE_UINT64, TYPE_UINT8, TYPE_UTF8_1, TYPE_UTF8_2,
};

#[derive(Debug, Clone, Copy)]
struct Element {
    /// Offset of the control byte.
    start: usize,
    /// Offset just past the tag (length prefix or value follows).
    body_start: usize,
    /// Offset of the value (first child for containers).
    value_start: usize,
    /// Value length for scalars and strings; zero for containers.
    value_len: usize,
    code: u8,
    element_type: ElementType,
    tag: Tag,
}

/// Cursor over an encoded TLV buffer.
///
/// `next()` moves to the next element of the current container, skipping the
/// contents of any container that was not entered. It returns
/// [`TlvError::EndOfTlv`] when the current container (or the buffer, at top
/// level) has no more elements.
#[derive(Debug, Clone)]
pub struct TlvReader<'a> {
    buffer: &'a [u8],
    pos: usize,
    current: Option<Element>,
    depth: usize,
    at_end: bool,
}

fn read_le(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw[..bytes.len()].copy_from_slice(bytes);
    u64::from_le_bytes(raw)
}

impl<'a> TlvReader<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            pos: 0,
            current: None,
            depth: 0,
            at_end: false,
        }
    }

    /// Offset of the next unread byte.
    pub fn offset(&self) -> usize {
        self.pos
    }

    /// Number of containers currently entered.
    pub fn depth(&self) -> usize {
        self.depth
    }

    fn malformed(offset: usize, reason: &'static str) -> TlvError {
        TlvError::Malformed { offset, reason }
    }

    fn slice(&self, from: usize, len: usize) -> TlvResult<&'a [u8]> {
        let end = from
            .checked_add(len)
            .ok_or_else(|| Self::malformed(from, "length overflow"))?;
        let buffer: &'a [u8] = self.buffer;
        buffer
            .get(from..end)
            .ok_or_else(|| Self::malformed(from, "truncated element"))
    }

    fn parse_element(&self, at: usize) -> TlvResult<(Element, usize)> {
        let control = *self
            .buffer
            .get(at)
            .ok_or_else(|| Self::malformed(at, "truncated header"))?;
        let form = control >> 5;
        let code = control & 0x1F;
        let mut cursor = at + 1;

        let tag = match form {
            TAG_FORM_ANONYMOUS => Tag::Anonymous,
            TAG_FORM_CONTEXT => {
                let n = self.slice(cursor, 1)?[0];
                cursor += 1;
                Tag::Context(n)
            }
            TAG_FORM_PROFILE => {
                let raw = self.slice(cursor, 8)?;
                cursor += 8;
                Tag::Profile {
                    profile: read_le(&raw[..4]) as u32,
                    number: read_le(&raw[4..]) as u32,
                }
            }
            _ => return Err(Self::malformed(at, "unsupported tag form")),
        };
        let body_start = cursor;

        let (element_type, value_len) = match code {
            TYPE_INT8..=TYPE_INT64 => (ElementType::SignedInt, 1usize << (code - TYPE_INT8)),
            TYPE_UINT8..=TYPE_UINT64 => (ElementType::UnsignedInt, 1usize << (code - TYPE_UINT8)),
            TYPE_FALSE | TYPE_TRUE => (ElementType::Bool, 0),
            TYPE_FLOAT32 => (ElementType::Float, 4),
            TYPE_FLOAT64 => (ElementType::Float, 8),
            TYPE_UTF8_1 | TYPE_BYTES_1 => {
                let len = self.slice(cursor, 1)?[0] as usize;
                cursor += 1;
                let kind = if code == TYPE_UTF8_1 {
                    ElementType::Utf8String
                } else {
                    ElementType::ByteString
                };
                (kind, len)
            }
            TYPE_UTF8_2 | TYPE_BYTES_2 => {
                let len = read_le(self.slice(cursor, 2)?) as usize;
                cursor += 2;
                let kind = if code == TYPE_UTF8_2 {
                    ElementType::Utf8String
                } else {
                    ElementType::ByteString
                };
                (kind, len)
            }
            TYPE_NULL => (ElementType::Null, 0),
            TYPE_STRUCTURE => (ElementType::Structure, 0),
            TYPE_ARRAY => (ElementType::Array, 0),
            TYPE_END_OF_CONTAINER => (ElementType::EndOfContainer, 0),
            _ => return Err(Self::malformed(at, "unknown element type")),
        };

        // Bounds-check the value now so getters can slice freely.
        self.slice(cursor, value_len)?;

        let element = Element {
            start: at,
            body_start,
            value_start: cursor,
            value_len,
            code,
            element_type,
            tag,
        };
        Ok((element, cursor + value_len))
    }

    /// Offset just past the end marker of the container whose first child
    /// starts at `from`.
    fn skip_container(&self, from: usize) -> TlvResult<usize> {
        let mut depth = 1usize;
        let mut at = from;
        while depth > 0 {
            let (element, next) = self.parse_element(at)?;
            match element.element_type {
                ElementType::EndOfContainer => {
                    depth -= 1;
                    at = next;
                }
                ElementType::Structure | ElementType::Array => {
                    depth += 1;
                    at = element.value_start;
                }
                _ => at = next,
            }
        }
        Ok(at)
    }

    /// Advance to the next element of the current container.
    pub fn next(&mut self) -> TlvResult<()> {
        if let Some(current) = self.current.take() {
            if current.element_type.is_container() {
                self.pos = self.skip_container(current.value_start)?;
            }
        }
        if self.at_end {
            return Err(TlvError::EndOfTlv);
        }
        if self.pos >= self.buffer.len() {
            if self.depth == 0 {
                return Err(TlvError::EndOfTlv);
            }
            return Err(Self::malformed(self.pos, "unterminated container"));
        }

        let (element, next) = self.parse_element(self.pos)?;
        if element.element_type == ElementType::EndOfContainer {
            if self.depth == 0 {
                return Err(Self::malformed(self.pos, "unexpected end of container"));
            }
            self.at_end = true;
            return Err(TlvError::EndOfTlv);
        }
        self.pos = if element.element_type.is_container() {
            element.value_start
        } else {
            next
        };
        self.current = Some(element);
        Ok(())
    }

    /// Advance and require a specific tag on the next element.
    pub fn next_expect(&mut self, tag: Tag) -> TlvResult<()> {
        self.next()?;
        if self.tag() != tag {
            return Err(Self::malformed(self.pos, "unexpected tag"));
        }
        Ok(())
    }

    fn current(&self) -> TlvResult<&Element> {
        self.current
            .as_ref()
            .ok_or(TlvError::InvalidState("reader is not positioned on an element"))
    }

    /// Tag of the current element (anonymous when not positioned).
    pub fn tag(&self) -> Tag {
        self.current.map(|e| e.tag).unwrap_or_default()
    }

    pub fn element_type(&self) -> Option<ElementType> {
        self.current.map(|e| e.element_type)
    }

    pub fn is_null(&self) -> bool {
        self.element_type() == Some(ElementType::Null)
    }

    pub fn is_container(&self) -> bool {
        self.element_type().is_some_and(|t| t.is_container())
    }

    /// Length of a string or byte-string value; fixed width for scalars.
    pub fn len(&self) -> usize {
        self.current.map(|e| e.value_len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn value(&self, element: &Element) -> &'a [u8] {
        let buffer: &'a [u8] = self.buffer;
        &buffer[element.value_start..element.value_start + element.value_len]
    }

    fn wrong_type(expected: &'static str, found: ElementType) -> TlvError {
        TlvError::WrongType { expected, found }
    }

    pub fn get_u64(&self) -> TlvResult<u64> {
        let element = self.current()?;
        match element.element_type {
            ElementType::UnsignedInt => Ok(read_le(self.value(element))),
            ElementType::SignedInt => {
                let v = self.get_i64()?;
                u64::try_from(v).map_err(|_| Self::wrong_type("unsigned integer", element.element_type))
            }
            other => Err(Self::wrong_type("unsigned integer", other)),
        }
    }

    pub fn get_i64(&self) -> TlvResult<i64> {
        let element = self.current()?;
        match element.element_type {
            ElementType::SignedInt => {
                let raw = self.value(element);
                let bits = raw.len() * 8;
                let v = read_le(raw);
                // Sign-extend from the encoded width.
                let shift = 64 - bits;
                Ok(((v << shift) as i64) >> shift)
            }
            ElementType::UnsignedInt => {
                let v = read_le(self.value(element));
                i64::try_from(v).map_err(|_| Self::wrong_type("signed integer", element.element_type))
            }
            other => Err(Self::wrong_type("signed integer", other)),
        }
    }

    pub fn get_u16(&self) -> TlvResult<u16> {
        let v = self.get_u64()?;
        u16::try_from(v).map_err(|_| Self::malformed(self.pos, "integer out of u16 range"))
    }

    pub fn get_u32(&self) -> TlvResult<u32> {
        let v = self.get_u64()?;
        u32::try_from(v).map_err(|_| Self::malformed(self.pos, "integer out of u32 range"))
    }

    pub fn get_bool(&self) -> TlvResult<bool> {
        let element = self.current()?;
        match element.code {
            TYPE_TRUE => Ok(true),
            TYPE_FALSE => Ok(false),
            _ => Err(Self::wrong_type("bool", element.element_type)),
        }
    }

    pub fn get_f64(&self) -> TlvResult<f64> {
        let element = self.current()?;
        match element.code {
            TYPE_FLOAT32 => Ok(f64::from(f32::from_bits(read_le(self.value(element)) as u32))),
            TYPE_FLOAT64 => Ok(f64::from_bits(read_le(self.value(element)))),
            _ => Err(Self::wrong_type("float", element.element_type)),
        }
    }

    pub fn get_str(&self) -> TlvResult<&'a str> {
        let element = self.current()?;
        if element.element_type != ElementType::Utf8String {
            return Err(Self::wrong_type("utf-8 string", element.element_type));
        }
        std::str::from_utf8(self.value(element))
            .map_err(|_| Self::malformed(element.value_start, "invalid utf-8"))
    }

    /// Zero-copy access to a byte string (or the raw bytes of a string).
    pub fn get_bytes(&self) -> TlvResult<&'a [u8]> {
        let element = self.current()?;
        match element.element_type {
            ElementType::ByteString | ElementType::Utf8String => Ok(self.value(element)),
            other => Err(Self::wrong_type("byte string", other)),
        }
    }

    /// Decode the current scalar into an owned value.
    pub fn value_to_owned(&self) -> TlvResult<TlvValue> {
        let element = self.current()?;
        Ok(match element.element_type {
            ElementType::SignedInt => TlvValue::Signed(self.get_i64()?),
            ElementType::UnsignedInt => TlvValue::Unsigned(self.get_u64()?),
            ElementType::Bool => TlvValue::Bool(self.get_bool()?),
            ElementType::Float => TlvValue::Float(self.get_f64()?),
            ElementType::Utf8String => TlvValue::String(self.get_str()?.to_string()),
            ElementType::ByteString => TlvValue::Bytes(self.get_bytes()?.to_vec()),
            ElementType::Null => TlvValue::Null,
            other => return Err(Self::wrong_type("scalar", other)),
        })
    }

    fn element_end(&self, element: &Element) -> TlvResult<usize> {
        if element.element_type.is_container() {
            self.skip_container(element.value_start)
        } else {
            Ok(element.value_start + element.value_len)
        }
    }

    /// Raw type code and everything after the tag (length prefix, value,
    /// container contents and end marker).
    pub(crate) fn raw_body(&self) -> TlvResult<(u8, &'a [u8])> {
        let element = self.current()?;
        let end = self.element_end(element)?;
        let buffer: &'a [u8] = self.buffer;
        Ok((element.code, &buffer[element.body_start..end]))
    }

    /// The complete encoding of the current element, tag included.
    pub fn raw_element(&self) -> TlvResult<&'a [u8]> {
        let element = self.current()?;
        let end = self.element_end(element)?;
        let buffer: &'a [u8] = self.buffer;
        Ok(&buffer[element.start..end])
    }

    /// Descend into the current structure or array.
    pub fn enter_container(&mut self) -> TlvResult<()> {
        let element = *self.current()?;
        if !element.element_type.is_container() {
            return Err(Self::wrong_type("container", element.element_type));
        }
        self.current = None;
        self.pos = element.value_start;
        self.depth += 1;
        self.at_end = false;
        Ok(())
    }

    /// Skip the rest of the current container and return to its parent.
    pub fn exit_container(&mut self) -> TlvResult<()> {
        if self.depth == 0 {
            return Err(TlvError::InvalidState("exit_container at top level"));
        }
        loop {
            match self.next() {
                Ok(()) => continue,
                Err(TlvError::EndOfTlv) => break,
                Err(e) => return Err(e),
            }
        }
        // Consume the end marker.
        self.pos += 1;
        self.depth -= 1;
        self.at_end = false;
        self.current = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tlv::{dictionary_key_tag, ContainerType, TlvWriter};

    fn sample() -> Vec<u8> {
        let mut writer = TlvWriter::new();
        writer
            .start_container(Tag::Anonymous, ContainerType::Structure)
            .unwrap();
        writer.put_u64(Tag::Context(1), 300).unwrap();
        writer
            .start_container(Tag::Context(2), ContainerType::Structure)
            .unwrap();
        writer.put_string(dictionary_key_tag(10), "x").unwrap();
        writer.put_string(dictionary_key_tag(20), "y").unwrap();
        writer.end_container().unwrap();
        writer.put_i64(Tag::Context(3), -40_000).unwrap();
        writer.put_null(Tag::Context(4)).unwrap();
        writer.end_container().unwrap();
        writer.finalize().unwrap()
    }

    #[test]
    fn test_walk_skips_unentered_containers() {
        let bytes = sample();
        let mut reader = TlvReader::new(&bytes);
        reader.next().unwrap();
        assert_eq!(reader.element_type(), Some(ElementType::Structure));
        reader.enter_container().unwrap();

        reader.next().unwrap();
        assert_eq!(reader.tag(), Tag::Context(1));
        assert_eq!(reader.get_u64().unwrap(), 300);

        reader.next().unwrap();
        assert_eq!(reader.tag(), Tag::Context(2));
        assert!(reader.is_container());

        // Not entered: next() jumps over the dictionary.
        reader.next().unwrap();
        assert_eq!(reader.tag(), Tag::Context(3));
        assert_eq!(reader.get_i64().unwrap(), -40_000);

        reader.next().unwrap();
        assert!(reader.is_null());

        assert_eq!(reader.next(), Err(TlvError::EndOfTlv));
        // Stays at the end until the container is exited.
        assert_eq!(reader.next(), Err(TlvError::EndOfTlv));
        reader.exit_container().unwrap();
        assert_eq!(reader.next(), Err(TlvError::EndOfTlv));
    }

    #[test]
    fn test_enter_nested_and_exit_early() {
        let bytes = sample();
        let mut reader = TlvReader::new(&bytes);
        reader.next().unwrap();
        reader.enter_container().unwrap();
        reader.next().unwrap();
        reader.next().unwrap();
        reader.enter_container().unwrap();
        reader.next().unwrap();
        assert_eq!(reader.tag(), dictionary_key_tag(10));
        assert_eq!(reader.get_str().unwrap(), "x");
        // Leave with one element unread.
        reader.exit_container().unwrap();
        reader.next().unwrap();
        assert_eq!(reader.tag(), Tag::Context(3));
    }

    #[test]
    fn test_copy_element_retags_container() {
        let bytes = sample();
        let mut reader = TlvReader::new(&bytes);
        reader.next().unwrap();
        reader.enter_container().unwrap();
        reader.next().unwrap();
        reader.next().unwrap();

        let mut writer = TlvWriter::new();
        writer.copy_element(Tag::Context(9), &reader).unwrap();
        let copied = writer.finalize().unwrap();

        let mut copy_reader = TlvReader::new(&copied);
        copy_reader.next().unwrap();
        assert_eq!(copy_reader.tag(), Tag::Context(9));
        copy_reader.enter_container().unwrap();
        copy_reader.next().unwrap();
        copy_reader.next().unwrap();
        assert_eq!(copy_reader.get_str().unwrap(), "y");
        assert_eq!(copy_reader.next(), Err(TlvError::EndOfTlv));
    }

    #[test]
    fn test_truncated_input_is_malformed() {
        let bytes = sample();
        let mut reader = TlvReader::new(&bytes[..bytes.len() - 1]);
        reader.next().unwrap();
        reader.enter_container().unwrap();
        let err = loop {
            if let Err(e) = reader.next() {
                break e;
            }
        };
        assert!(matches!(err, TlvError::Malformed { .. }));
    }

    #[test]
    fn test_type_mismatch_reported() {
        let mut writer = TlvWriter::new();
        writer.put_string(Tag::Anonymous, "hello").unwrap();
        let bytes = writer.finalize().unwrap();
        let mut reader = TlvReader::new(&bytes);
        reader.next().unwrap();
        assert!(matches!(
            reader.get_u64(),
            Err(TlvError::WrongType { expected: "unsigned integer", .. })
        ));
        assert_eq!(
            reader.value_to_owned().unwrap(),
            TlvValue::String("hello".into())
        );
    }

    #[test]
    fn test_float_and_bool_roundtrip() {
        let mut writer = TlvWriter::new();
        writer.put_f64(Tag::Context(1), 21.5).unwrap();
        writer.put_bool(Tag::Context(2), true).unwrap();
        let bytes = writer.finalize().unwrap();
        let mut reader = TlvReader::new(&bytes);
        reader.next().unwrap();
        assert_eq!(reader.get_f64().unwrap(), 21.5);
        reader.next().unwrap();
        assert!(reader.get_bool().unwrap());
        assert_eq!(reader.next(), Err(TlvError::EndOfTlv));
    }
}
