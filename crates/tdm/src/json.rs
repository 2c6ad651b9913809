// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! JSON rendering of TLV payloads, for logs and tooling.

use crate::error::{Result, TdmError};
use crate::notify::Event;
use crate::path::{PropertyDictionaryKey, PropertyPathHandle};
use crate::schema::SchemaEngine;
use crate::tlv::{ElementType, Tag, TlvError, TlvReader};
use serde_json::{json, Map, Value};

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn scalar_to_json(reader: &TlvReader<'_>) -> Result<Value> {
    let element_type = reader
        .element_type()
        .ok_or(TdmError::Tlv(TlvError::InvalidState("no current element")))?;
    Ok(match element_type {
        ElementType::SignedInt => json!(reader.get_i64()?),
        ElementType::UnsignedInt => json!(reader.get_u64()?),
        ElementType::Bool => json!(reader.get_bool()?),
        ElementType::Float => json!(reader.get_f64()?),
        ElementType::Utf8String => json!(reader.get_str()?),
        ElementType::ByteString => json!(hex(reader.get_bytes()?)),
        ElementType::Null => Value::Null,
        other => {
            return Err(TdmError::Tlv(TlvError::WrongType {
                expected: "scalar",
                found: other,
            }))
        }
    })
}

/// Visit each member of the container under the reader cursor.
fn for_each_member<F>(reader: &TlvReader<'_>, mut visit: F) -> Result<()>
where
    F: FnMut(&TlvReader<'_>) -> Result<()>,
{
    let mut members = reader.clone();
    members.enter_container()?;
    loop {
        match members.next() {
            Ok(()) => visit(&members)?,
            Err(TlvError::EndOfTlv) => return Ok(()),
            Err(e) => return Err(e.into()),
        }
    }
}

/// Deepest container nesting rendered before the input is refused.
pub const MAX_JSON_DEPTH: usize = 64;

fn check_depth(reader: &TlvReader<'_>, depth: usize) -> Result<()> {
    if depth > MAX_JSON_DEPTH {
        return Err(TdmError::Tlv(TlvError::Malformed {
            offset: reader.offset(),
            reason: "containers nested too deeply",
        }));
    }
    Ok(())
}

/// Render the element under the reader cursor. Structures become objects
/// keyed by tag text, arrays become arrays, byte strings become hex.
/// Nesting deeper than [`MAX_JSON_DEPTH`] is reported as malformed.
pub fn tlv_to_json(reader: &TlvReader<'_>) -> Result<Value> {
    render_tlv(reader, 0)
}

fn render_tlv(reader: &TlvReader<'_>, depth: usize) -> Result<Value> {
    match reader.element_type() {
        Some(ElementType::Structure) => {
            check_depth(reader, depth + 1)?;
            let mut object = Map::new();
            for_each_member(reader, |member| {
                object.insert(member.tag().to_string(), render_tlv(member, depth + 1)?);
                Ok(())
            })?;
            Ok(Value::Object(object))
        }
        Some(ElementType::Array) => {
            check_depth(reader, depth + 1)?;
            let mut array = Vec::new();
            for_each_member(reader, |member| {
                array.push(render_tlv(member, depth + 1)?);
                Ok(())
            })?;
            Ok(Value::Array(array))
        }
        _ => scalar_to_json(reader),
    }
}

/// Render trait data rooted at `handle` with node names and dictionary keys.
/// Members the schema does not know fall back to [`tlv_to_json`] under their
/// tag text.
pub fn trait_data_to_json(
    schema: &SchemaEngine,
    handle: PropertyPathHandle,
    reader: &TlvReader<'_>,
) -> Result<Value> {
    render_trait_data(schema, handle, reader, 0)
}

fn render_trait_data(
    schema: &SchemaEngine,
    handle: PropertyPathHandle,
    reader: &TlvReader<'_>,
    depth: usize,
) -> Result<Value> {
    if schema.is_leaf(handle) || reader.is_null() || !reader.is_container() {
        return render_tlv(reader, depth);
    }
    check_depth(reader, depth + 1)?;

    let dictionary = schema.is_dictionary(handle);
    let mut object = Map::new();
    for_each_member(reader, |member| {
        let tag = member.tag();
        let child = match tag {
            Tag::Context(n) if !dictionary => schema.child_handle(handle, n),
            _ if dictionary && tag.is_dictionary_key() => tag
                .tag_number()
                .and_then(|n| PropertyDictionaryKey::try_from(n).ok())
                .map(|key| schema.dictionary_item_handle(handle, key))
                .unwrap_or_default(),
            _ => PropertyPathHandle::default(),
        };

        if child.is_null() {
            object.insert(tag.to_string(), render_tlv(member, depth + 1)?);
            return Ok(());
        }
        let name = if dictionary {
            child.dictionary_key().to_string()
        } else {
            schema
                .node_name(child)
                .map_or_else(|| tag.to_string(), str::to_string)
        };
        object.insert(name, render_trait_data(schema, child, member, depth + 1)?);
        Ok(())
    })?;
    Ok(Value::Object(object))
}

fn event_to_json(event: &Event) -> Result<Value> {
    let data = match &event.data {
        Some(bytes) => {
            let mut reader = TlvReader::new(bytes);
            reader.next()?;
            tlv_to_json(&reader)?
        }
        None => Value::Null,
    };
    Ok(json!({
        "source": event.source.to_string(),
        "importance": event.importance,
        "id": event.id,
        "timestamp": event.timestamp,
        "profile_id": format!("0x{:08x}", event.profile_id),
        "event_type": event.event_type,
        "data": data,
    }))
}

/// Render the event-list array under the reader cursor.
pub fn render_event_list(reader: &TlvReader<'_>) -> Result<Vec<Value>> {
    let mut events = Vec::new();
    for_each_member(reader, |member| {
        events.push(event_to_json(&Event::parse(member)?)?);
        Ok(())
    })?;
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ResourceIdentifier;
    use crate::path::{ROOT_PROPERTY_PATH_HANDLE, ROOT_PROPERTY_SCHEMA_HANDLE};
    use crate::schema::{NodeFlags, SchemaBuilder};
    use crate::tlv::{dictionary_key_tag, ContainerType, TlvWriter};

    fn read(bytes: &[u8]) -> TlvReader<'_> {
        let mut reader = TlvReader::new(bytes);
        reader.next().expect("element");
        reader
    }

    #[test]
    fn test_generic_rendering() {
        let mut writer = TlvWriter::new();
        writer
            .start_container(Tag::Anonymous, ContainerType::Structure)
            .expect("start");
        writer.put_u64(Tag::Context(1), 7).expect("u");
        writer.put_i64(Tag::Context(2), -3).expect("i");
        writer.put_bytes(Tag::Context(3), &[0xde, 0xad]).expect("bytes");
        writer
            .start_container(Tag::Context(4), ContainerType::Array)
            .expect("array");
        writer.put_bool(Tag::Anonymous, true).expect("bool");
        writer.put_null(Tag::Anonymous).expect("null");
        writer.end_container().expect("end array");
        writer.end_container().expect("end");
        let bytes = writer.finalize().expect("finalize");

        let value = tlv_to_json(&read(&bytes)).expect("json");
        assert_eq!(
            value,
            json!({"1": 7, "2": -3, "3": "dead", "4": [true, null]})
        );
    }

    #[test]
    fn test_schema_rendering() {
        let mut builder = SchemaBuilder::new("Json", 0x0E07);
        builder.add(ROOT_PROPERTY_SCHEMA_HANDLE, 1, "mode", NodeFlags::leaf());
        let zones = builder.add(ROOT_PROPERTY_SCHEMA_HANDLE, 2, "zones", NodeFlags::dictionary());
        let zone = builder.add(zones, 1, "zone", NodeFlags::structure());
        builder.add(zone, 1, "label", NodeFlags::leaf());
        let schema = builder.build().expect("schema");

        let mut writer = TlvWriter::new();
        writer
            .start_container(Tag::Anonymous, ContainerType::Structure)
            .expect("root");
        writer.put_string(Tag::Context(1), "heat").expect("mode");
        writer
            .start_container(Tag::Context(2), ContainerType::Structure)
            .expect("zones");
        writer
            .start_container(dictionary_key_tag(4), ContainerType::Structure)
            .expect("zone");
        writer.put_string(Tag::Context(1), "hall").expect("label");
        writer.end_container().expect("end zone");
        writer.end_container().expect("end zones");
        writer.put_u64(Tag::Context(9), 1).expect("unknown");
        writer.end_container().expect("end root");
        let bytes = writer.finalize().expect("finalize");

        let value =
            trait_data_to_json(&schema, ROOT_PROPERTY_PATH_HANDLE, &read(&bytes)).expect("json");
        assert_eq!(
            value,
            json!({"mode": "heat", "zones": {"4": {"label": "hall"}}, "9": 1})
        );
    }

    #[test]
    fn test_event_list_rendering() {
        let event = Event {
            source: ResourceIdentifier(0x10),
            importance: 1,
            id: 5,
            timestamp: 1000,
            profile_id: 0x0E01,
            event_type: 2,
            data: None,
        };
        let mut writer = TlvWriter::new();
        writer
            .start_container(Tag::Anonymous, ContainerType::Array)
            .expect("list");
        event.write(&mut writer, Tag::Anonymous).expect("event");
        writer.end_container().expect("end");
        let bytes = writer.finalize().expect("finalize");

        let events = render_event_list(&read(&bytes)).expect("render");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["id"], json!(5));
        assert_eq!(events[0]["source"], json!("0000000000000010"));
        assert_eq!(events[0]["profile_id"], json!("0x00000e01"));
        assert_eq!(events[0]["data"], Value::Null);
    }

    fn nested(levels: usize) -> Vec<u8> {
        let mut writer = TlvWriter::new();
        for _ in 0..levels {
            writer
                .start_container(Tag::Anonymous, ContainerType::Structure)
                .expect("start");
        }
        writer.put_u64(Tag::Context(1), 1).expect("leaf");
        for _ in 0..levels {
            writer.end_container().expect("end");
        }
        writer.finalize().expect("finalize")
    }

    #[test]
    fn test_nesting_limit() {
        let shallow = nested(MAX_JSON_DEPTH);
        assert!(tlv_to_json(&read(&shallow)).is_ok());

        let deep = nested(MAX_JSON_DEPTH + 1);
        assert!(matches!(
            tlv_to_json(&read(&deep)),
            Err(TdmError::Tlv(TlvError::Malformed { .. }))
        ));
    }

    #[test]
    fn test_deeply_nested_event_data_is_refused() {
        let event = Event {
            source: ResourceIdentifier(0x10),
            importance: 1,
            id: 6,
            timestamp: 1000,
            profile_id: 0x0E01,
            event_type: 2,
            data: Some(nested(20_000)),
        };
        let mut writer = TlvWriter::new();
        writer
            .start_container(Tag::Anonymous, ContainerType::Array)
            .expect("list");
        event.write(&mut writer, Tag::Anonymous).expect("event");
        writer.end_container().expect("end");
        let bytes = writer.finalize().expect("finalize");

        assert!(matches!(
            render_event_list(&read(&bytes)),
            Err(TdmError::Tlv(TlvError::Malformed { .. }))
        ));
    }
}
