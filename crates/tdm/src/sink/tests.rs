// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tests for data sinks.

use super::*;
use crate::catalog::{ResourceIdentifier, TraitPath};
use crate::path::{PropertyPathHandle, ROOT_PROPERTY_PATH_HANDLE, ROOT_PROPERTY_SCHEMA_HANDLE};
use crate::schema::{NodeFlags, SchemaBuilder};
use crate::tlv::{dictionary_key_tag, ContainerType, Tag, TlvValue, TlvWriter};
use std::sync::atomic::{AtomicU16, Ordering};

#[derive(Debug, Clone, PartialEq)]
enum Seen {
    Leaf(PropertyPathHandle, TlvValue),
    Null(PropertyPathHandle),
    Event(DataSinkEvent),
}

#[derive(Default)]
struct Recording {
    seen: Vec<Seen>,
}

impl SinkHandler for Recording {
    fn set_leaf_data(
        &mut self,
        _schema: &SchemaEngine,
        handle: PropertyPathHandle,
        reader: &TlvReader<'_>,
        is_null: bool,
    ) -> Result<()> {
        if is_null {
            self.seen.push(Seen::Null(handle));
        } else {
            self.seen.push(Seen::Leaf(handle, reader.value_to_owned()?));
        }
        Ok(())
    }

    fn set_subtree_null(&mut self, _schema: &SchemaEngine, handle: PropertyPathHandle) -> Result<()> {
        self.seen.push(Seen::Null(handle));
        Ok(())
    }

    fn on_event(&mut self, _schema: &SchemaEngine, event: DataSinkEvent) -> Result<()> {
        self.seen.push(Seen::Event(event));
        Ok(())
    }
}

// Root { a (1), d (2) dict { item }, n (3) nullable { n1 (1) } }
fn schema() -> Arc<SchemaEngine> {
    let root = ROOT_PROPERTY_SCHEMA_HANDLE;
    let mut builder = SchemaBuilder::new("Sink", 0x0E02);
    builder.add(root, 1, "a", NodeFlags::leaf());
    let d = builder.add(root, 2, "d", NodeFlags::dictionary());
    builder.add(d, 1, "item", NodeFlags::leaf());
    let n = builder.add(root, 3, "n", NodeFlags::structure().nullable());
    builder.add(n, 1, "n1", NodeFlags::leaf());
    Arc::new(builder.build().expect("schema"))
}

fn trait_path() -> TraitPath {
    TraitPath::new(ResourceIdentifier(1), 0x0E02, 0)
}

fn sink() -> TraitDataSink<Recording> {
    TraitDataSink::new(schema(), Recording::default(), Arc::new(ChangeRejectionSlot::new()))
}

fn element(
    schema: &SchemaEngine,
    handle: PropertyPathHandle,
    version: u64,
    deleted: &[u16],
    data: impl FnOnce(&mut TlvWriter),
) -> Vec<u8> {
    let mut writer = TlvWriter::new();
    let mut element =
        DataElementWriter::begin(&mut writer, &trait_path(), schema, handle).expect("begin");
    element.version(version).expect("version");
    element.deleted_keys(deleted).expect("deleted");
    data(element.writer());
    element.end().expect("end");
    writer.finalize().expect("finalize")
}

fn root_data(writer: &mut TlvWriter) {
    writer
        .start_container(DataElementWriter::data_tag(), ContainerType::Structure)
        .expect("root");
    writer.put_string(Tag::Context(1), "hello").expect("a");
    writer
        .start_container(Tag::Context(2), ContainerType::Structure)
        .expect("d");
    writer.put_u64(dictionary_key_tag(10), 1).expect("10");
    writer.end_container().expect("end d");
    writer.put_null(Tag::Context(3)).expect("n");
    writer.end_container().expect("end root");
}

fn apply(
    sink: &mut TraitDataSink<Recording>,
    handle: PropertyPathHandle,
    bytes: &[u8],
    flags: ElementFlags,
) -> Result<()> {
    let mut reader = TlvReader::new(bytes);
    reader.next().expect("envelope");
    sink.store_data_element(handle, &reader, flags, 0, None)
}

#[test]
fn test_single_element_change_event_order() {
    let mut sink = sink();
    let schema = Arc::clone(sink.schema());
    let bytes = element(&schema, ROOT_PROPERTY_PATH_HANDLE, 5, &[], root_data);
    apply(&mut sink, ROOT_PROPERTY_PATH_HANDLE, &bytes, ElementFlags::SINGLE).expect("apply");

    let d = PropertyPathHandle::new(3, 0);
    let item = PropertyPathHandle::new(4, 10);
    assert_eq!(
        sink.handler().seen,
        vec![
            Seen::Event(DataSinkEvent::ChangeBegin),
            Seen::Event(DataSinkEvent::DataElementBegin),
            Seen::Leaf(PropertyPathHandle::new(2, 0), TlvValue::from("hello")),
            Seen::Event(DataSinkEvent::DictionaryReplaceBegin(d)),
            Seen::Event(DataSinkEvent::DictionaryItemModifyBegin(item)),
            Seen::Leaf(item, TlvValue::Unsigned(1)),
            Seen::Event(DataSinkEvent::DictionaryItemModifyEnd(item)),
            Seen::Event(DataSinkEvent::DictionaryReplaceEnd(d)),
            Seen::Null(PropertyPathHandle::new(5, 0)),
            Seen::Event(DataSinkEvent::DataElementEnd),
            Seen::Event(DataSinkEvent::ChangeEnd),
        ]
    );
    assert_eq!(sink.version(), Some(5));
    assert_eq!(sink.last_notify_version(), Some(5));
}

#[test]
fn test_equal_version_is_noop_but_tracks_last_notify() {
    let mut sink = sink();
    let schema = Arc::clone(sink.schema());
    let bytes = element(&schema, ROOT_PROPERTY_PATH_HANDLE, 5, &[], root_data);
    apply(&mut sink, ROOT_PROPERTY_PATH_HANDLE, &bytes, ElementFlags::SINGLE).expect("first");
    let applied = sink.handler().seen.len();

    apply(&mut sink, ROOT_PROPERTY_PATH_HANDLE, &bytes, ElementFlags::SINGLE).expect("again");
    assert_eq!(sink.handler().seen.len(), applied);
    assert_eq!(sink.last_notify_version(), Some(5));

    // Any different version applies, including a lower one.
    let older = element(&schema, ROOT_PROPERTY_PATH_HANDLE, 3, &[], root_data);
    apply(&mut sink, ROOT_PROPERTY_PATH_HANDLE, &older, ElementFlags::SINGLE).expect("older");
    assert_eq!(sink.version(), Some(3));
    assert!(sink.handler().seen.len() > applied);
}

#[test]
fn test_multi_element_change_commits_on_last() {
    let mut sink = sink();
    let schema = Arc::clone(sink.schema());
    let a = PropertyPathHandle::new(2, 0);
    let d = PropertyPathHandle::new(3, 0);

    let first = element(&schema, a, 9, &[], |w| {
        w.put_string(DataElementWriter::data_tag(), "part").expect("a");
    });
    let second = element(&schema, d, 9, &[4, 6], |_| {});

    apply(
        &mut sink,
        a,
        &first,
        ElementFlags {
            first: true,
            last: false,
        },
    )
    .expect("first");
    assert_eq!(sink.version(), None);
    assert_eq!(sink.last_notify_version(), None);

    apply(
        &mut sink,
        d,
        &second,
        ElementFlags {
            first: false,
            last: true,
        },
    )
    .expect("second");
    assert_eq!(sink.version(), Some(9));

    let events: Vec<_> = sink
        .handler()
        .seen
        .iter()
        .filter_map(|s| match s {
            Seen::Event(e) => Some(*e),
            _ => None,
        })
        .collect();
    assert_eq!(
        events,
        vec![
            DataSinkEvent::ChangeBegin,
            DataSinkEvent::DataElementBegin,
            DataSinkEvent::DataElementEnd,
            DataSinkEvent::DataElementBegin,
            DataSinkEvent::DictionaryItemDelete(PropertyPathHandle::new(4, 4)),
            DataSinkEvent::DictionaryItemDelete(PropertyPathHandle::new(4, 6)),
            DataSinkEvent::DataElementEnd,
            DataSinkEvent::ChangeEnd,
        ]
    );
}

#[test]
fn test_store_failure_invalidates_version() {
    let mut sink = sink();
    let schema = Arc::clone(sink.schema());
    let good = element(&schema, ROOT_PROPERTY_PATH_HANDLE, 1, &[], root_data);
    apply(&mut sink, ROOT_PROPERTY_PATH_HANDLE, &good, ElementFlags::SINGLE).expect("good");
    assert_eq!(sink.version(), Some(1));

    let a = PropertyPathHandle::new(2, 0);
    let bad = element(&schema, a, 2, &[], |w| {
        w.put_null(DataElementWriter::data_tag()).expect("null");
    });
    let err = apply(&mut sink, a, &bad, ElementFlags::SINGLE).expect_err("null on a");
    assert!(matches!(err, TdmError::SchemaMismatch { .. }));
    assert_eq!(sink.version(), None);
    assert!(!sink.is_version_valid());
}

#[test]
fn test_deleted_key_on_non_dictionary_is_refused_before_events() {
    let mut sink = sink();
    let schema = Arc::clone(sink.schema());
    let good = element(&schema, ROOT_PROPERTY_PATH_HANDLE, 1, &[], root_data);
    apply(&mut sink, ROOT_PROPERTY_PATH_HANDLE, &good, ElementFlags::SINGLE).expect("good");
    let seen = sink.handler().seen.len();

    let a = PropertyPathHandle::new(2, 0);
    let bad = element(&schema, a, 2, &[7], |w| {
        w.put_string(DataElementWriter::data_tag(), "x").expect("a");
    });
    let err = apply(&mut sink, a, &bad, ElementFlags::SINGLE).expect_err("delete on leaf");
    assert!(matches!(err, TdmError::InvalidArgument(_)));
    assert_eq!(sink.version(), None);
    assert_eq!(sink.handler().seen.len(), seen);
}

#[test]
fn test_merge_element_skips_replace_bracket() {
    let mut sink = sink();
    let schema = Arc::clone(sink.schema());
    let d = PropertyPathHandle::new(3, 0);

    let mut writer = TlvWriter::new();
    let mut builder = DataElementWriter::begin(&mut writer, &trait_path(), &schema, d).expect("begin");
    builder.version(2).and_then(|b| b.merge(true)).expect("fields");
    let data = builder.writer();
    data.start_container(DataElementWriter::data_tag(), ContainerType::Structure)
        .expect("data");
    data.put_u64(dictionary_key_tag(30), 3).expect("30");
    data.end_container().expect("end data");
    builder.end().expect("end");
    let bytes = writer.finalize().expect("finalize");

    apply(&mut sink, d, &bytes, ElementFlags::SINGLE).expect("merge");
    assert!(!sink
        .handler()
        .seen
        .iter()
        .any(|s| matches!(s, Seen::Event(DataSinkEvent::DictionaryReplaceBegin(_)))));
    assert!(sink
        .handler()
        .seen
        .contains(&Seen::Leaf(PropertyPathHandle::new(4, 30), TlvValue::Unsigned(3))));
}

#[test]
fn test_set_data_is_leaf_only() {
    let mut sink = sink();
    let mut writer = TlvWriter::new();
    writer.put_u64(Tag::Anonymous, 4).expect("value");
    let bytes = writer.finalize().expect("finalize");
    let mut reader = TlvReader::new(&bytes);
    reader.next().expect("value");

    sink.set_data(PropertyPathHandle::new(2, 0), &reader, false)
        .expect("leaf");
    assert!(matches!(
        sink.set_data(PropertyPathHandle::new(3, 0), &reader, false),
        Err(TdmError::InvalidArgument(_))
    ));
}

#[test]
fn test_reject_change_uses_shared_slot() {
    let slot = Arc::new(ChangeRejectionSlot::new());
    let status = Arc::new(AtomicU16::new(0));
    let status_cb = Arc::clone(&status);
    slot.register(move |code, _| status_cb.store(code, Ordering::SeqCst))
        .expect("register");

    let first = TraitDataSink::new(schema(), Recording::default(), Arc::clone(&slot));
    let second = TraitDataSink::new(schema(), Recording::default(), Arc::clone(&slot));
    assert!(first.reject_change(11));
    assert_eq!(status.load(Ordering::SeqCst), 11);
    assert!(second.reject_change(12));
    assert_eq!(status.load(Ordering::SeqCst), 12);

    slot.unregister();
    assert!(!first.reject_change(13));
}
