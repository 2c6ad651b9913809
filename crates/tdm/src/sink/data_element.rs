// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Data element envelope.
//!
//! ```text
//! anonymous structure {
//!   1: path structure { 1: locator { 1: profile, 2: instance, 3: resource }, <path tags>... }
//!   2: version           (u64, absent on unconditional updates)
//!   3: partial_change    (bool, more elements of the same change follow)
//!   4: data              (any element)
//!   5: deleted keys      (array of u16)
//!   6: merge             (bool, dictionary items are added, not replaced)
//! }
//! ```

use crate::catalog::{ResourceIdentifier, TraitPath};
use crate::error::{Result, TdmError};
use crate::path::{PropertyDictionaryKey, PropertyPathHandle};
use crate::schema::SchemaEngine;
use crate::tlv::{ContainerType, Tag, TlvError, TlvReader, TlvWriter};

pub const TAG_PATH: u8 = 1;
pub const TAG_VERSION: u8 = 2;
pub const TAG_PARTIAL_CHANGE: u8 = 3;
pub const TAG_DATA: u8 = 4;
pub const TAG_DELETED_KEYS: u8 = 5;
pub const TAG_MERGE: u8 = 6;

const TAG_LOCATOR: u8 = 1;
const TAG_LOCATOR_PROFILE: u8 = 1;
const TAG_LOCATOR_INSTANCE: u8 = 2;
const TAG_LOCATOR_RESOURCE: u8 = 3;

/// Write a trait locator structure under `tag`.
pub(crate) fn write_locator(writer: &mut TlvWriter, tag: Tag, path: &TraitPath) -> Result<()> {
    writer.start_container(tag, ContainerType::Structure)?;
    writer.put_u64(Tag::Context(TAG_LOCATOR_PROFILE), u64::from(path.profile_id))?;
    writer.put_u64(Tag::Context(TAG_LOCATOR_INSTANCE), path.instance_id)?;
    writer.put_u64(Tag::Context(TAG_LOCATOR_RESOURCE), path.resource.0)?;
    writer.end_container()?;
    Ok(())
}

/// Read the locator structure under the reader cursor.
pub(crate) fn read_locator(reader: &TlvReader<'_>) -> Result<TraitPath> {
    let mut locator = reader.clone();
    locator.enter_container()?;
    let mut path = TraitPath::new(ResourceIdentifier::SELF_NODE, 0, 0);
    let mut has_profile = false;
    loop {
        match locator.next() {
            Ok(()) => {}
            Err(TlvError::EndOfTlv) => break,
            Err(e) => return Err(e.into()),
        }
        match locator.tag() {
            Tag::Context(TAG_LOCATOR_PROFILE) => {
                path.profile_id = locator.get_u32()?;
                has_profile = true;
            }
            Tag::Context(TAG_LOCATOR_INSTANCE) => path.instance_id = locator.get_u64()?,
            Tag::Context(TAG_LOCATOR_RESOURCE) => {
                path.resource = ResourceIdentifier(locator.get_u64()?)
            }
            _ => {}
        }
    }
    if !has_profile {
        return Err(TdmError::InvalidArgument("locator without profile id".into()));
    }
    Ok(path)
}

/// Parsed view of one data element; borrows the encoded bytes.
#[derive(Debug, Clone)]
pub struct DataElement<'a> {
    pub trait_path: TraitPath,
    pub version: Option<u64>,
    pub partial_change: bool,
    pub deleted_keys: Vec<PropertyDictionaryKey>,
    pub merge: bool,
    path: &'a [u8],
    data: Option<&'a [u8]>,
}

impl<'a> DataElement<'a> {
    /// Parse the envelope under the reader cursor. The reader is not moved.
    pub fn parse(reader: &TlvReader<'a>) -> Result<Self> {
        let mut fields = TlvReader::new(reader.raw_element()?);
        fields.next()?;
        fields.enter_container()?;

        let mut trait_path = None;
        let mut path = None;
        let mut element = DataElement {
            trait_path: TraitPath::new(ResourceIdentifier::SELF_NODE, 0, 0),
            version: None,
            partial_change: false,
            deleted_keys: Vec::new(),
            merge: false,
            path: &[],
            data: None,
        };

        loop {
            match fields.next() {
                Ok(()) => {}
                Err(TlvError::EndOfTlv) => break,
                Err(e) => return Err(e.into()),
            }
            match fields.tag() {
                Tag::Context(TAG_PATH) => {
                    let mut path_reader = fields.clone();
                    path_reader.enter_container()?;
                    path_reader.next_expect(Tag::Context(TAG_LOCATOR))?;
                    trait_path = Some(read_locator(&path_reader)?);
                    path = Some(fields.raw_element()?);
                }
                Tag::Context(TAG_VERSION) => element.version = Some(fields.get_u64()?),
                Tag::Context(TAG_PARTIAL_CHANGE) => element.partial_change = fields.get_bool()?,
                Tag::Context(TAG_DATA) => element.data = Some(fields.raw_element()?),
                Tag::Context(TAG_DELETED_KEYS) => {
                    let mut keys = fields.clone();
                    keys.enter_container()?;
                    loop {
                        match keys.next() {
                            Ok(()) => element.deleted_keys.push(keys.get_u16()?),
                            Err(TlvError::EndOfTlv) => break,
                            Err(e) => return Err(e.into()),
                        }
                    }
                }
                Tag::Context(TAG_MERGE) => element.merge = fields.get_bool()?,
                other => {
                    log::debug!("[DataElement::parse] ignoring field {}", other);
                }
            }
        }

        match (trait_path, path) {
            (Some(trait_path), Some(path)) => {
                element.trait_path = trait_path;
                element.path = path;
                Ok(element)
            }
            _ => Err(TdmError::InvalidArgument("data element without path".into())),
        }
    }

    /// Resolve the property path against the trait's schema.
    pub fn property_handle(&self, schema: &SchemaEngine) -> Result<PropertyPathHandle> {
        let mut reader = TlvReader::new(self.path);
        reader.next()?;
        reader.enter_container()?;
        reader.next_expect(Tag::Context(TAG_LOCATOR))?;
        schema.map_path_to_handle(&mut reader)
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    /// Reader positioned on the data element, if any.
    pub fn data_reader(&self) -> Result<Option<TlvReader<'a>>> {
        match self.data {
            Some(bytes) => {
                let mut reader = TlvReader::new(bytes);
                reader.next()?;
                Ok(Some(reader))
            }
            None => Ok(None),
        }
    }
}

/// Incremental writer for one data element.
///
/// Fields other than the path are optional and written in call order.
pub struct DataElementWriter<'w> {
    writer: &'w mut TlvWriter,
}

impl<'w> DataElementWriter<'w> {
    /// Open the envelope and write the path of `handle`.
    pub fn begin(
        writer: &'w mut TlvWriter,
        trait_path: &TraitPath,
        schema: &SchemaEngine,
        handle: PropertyPathHandle,
    ) -> Result<Self> {
        writer.start_container(Tag::Anonymous, ContainerType::Structure)?;
        writer.start_container(Tag::Context(TAG_PATH), ContainerType::Structure)?;
        write_locator(writer, Tag::Context(TAG_LOCATOR), trait_path)?;
        schema.map_handle_to_path(handle, writer)?;
        writer.end_container()?;
        Ok(Self { writer })
    }

    pub fn version(&mut self, version: u64) -> Result<&mut Self> {
        self.writer.put_u64(Tag::Context(TAG_VERSION), version)?;
        Ok(self)
    }

    pub fn partial_change(&mut self, partial: bool) -> Result<&mut Self> {
        if partial {
            self.writer.put_bool(Tag::Context(TAG_PARTIAL_CHANGE), true)?;
        }
        Ok(self)
    }

    pub fn merge(&mut self, merge: bool) -> Result<&mut Self> {
        if merge {
            self.writer.put_bool(Tag::Context(TAG_MERGE), true)?;
        }
        Ok(self)
    }

    pub fn deleted_keys(&mut self, keys: &[PropertyDictionaryKey]) -> Result<&mut Self> {
        if keys.is_empty() {
            return Ok(self);
        }
        self.writer
            .start_container(Tag::Context(TAG_DELETED_KEYS), ContainerType::Array)?;
        for key in keys {
            self.writer.put_u64(Tag::Anonymous, u64::from(*key))?;
        }
        self.writer.end_container()?;
        Ok(self)
    }

    /// Tag to use for the data field.
    pub fn data_tag() -> Tag {
        Tag::Context(TAG_DATA)
    }

    /// Underlying writer, for encoding the data field.
    pub fn writer(&mut self) -> &mut TlvWriter {
        self.writer
    }

    pub fn end(self) -> Result<()> {
        self.writer.end_container()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::ROOT_PROPERTY_SCHEMA_HANDLE;
    use crate::schema::{NodeFlags, SchemaBuilder};

    fn schema() -> SchemaEngine {
        let mut builder = SchemaBuilder::new("Element", 0x55);
        builder.add(ROOT_PROPERTY_SCHEMA_HANDLE, 1, "a", NodeFlags::leaf());
        let d = builder.add(ROOT_PROPERTY_SCHEMA_HANDLE, 2, "d", NodeFlags::dictionary());
        builder.add(d, 1, "item", NodeFlags::leaf());
        builder.build().expect("schema")
    }

    #[test]
    fn test_write_then_parse() {
        let schema = schema();
        let trait_path = TraitPath::new(ResourceIdentifier(0xAB), 0x55, 3);
        let handle = schema.map_text_path_to_handle("d/12").expect("handle");

        let mut writer = TlvWriter::new();
        let mut element =
            DataElementWriter::begin(&mut writer, &trait_path, &schema, handle).expect("begin");
        element
            .version(42)
            .and_then(|e| e.partial_change(true))
            .and_then(|e| e.deleted_keys(&[1, 2]))
            .expect("fields");
        element
            .writer()
            .put_string(DataElementWriter::data_tag(), "value")
            .expect("data");
        element.end().expect("end");
        let bytes = writer.finalize().expect("finalize");

        let mut reader = TlvReader::new(&bytes);
        reader.next().expect("element");
        let parsed = DataElement::parse(&reader).expect("parse");
        assert_eq!(parsed.trait_path, trait_path);
        assert_eq!(parsed.version, Some(42));
        assert!(parsed.partial_change);
        assert!(!parsed.merge);
        assert_eq!(parsed.deleted_keys, vec![1, 2]);
        assert_eq!(parsed.property_handle(&schema).expect("path"), handle);
        let data = parsed.data_reader().expect("data").expect("present");
        assert_eq!(data.get_str().expect("str"), "value");
    }

    #[test]
    fn test_missing_path_rejected() {
        let mut writer = TlvWriter::new();
        writer
            .start_container(Tag::Anonymous, ContainerType::Structure)
            .expect("start");
        writer.put_u64(Tag::Context(TAG_VERSION), 1).expect("version");
        writer.end_container().expect("end");
        let bytes = writer.finalize().expect("finalize");
        let mut reader = TlvReader::new(&bytes);
        reader.next().expect("element");
        assert!(matches!(
            DataElement::parse(&reader),
            Err(TdmError::InvalidArgument(_))
        ));
    }
}
