// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # TDM - Trait Data Management
//!
//! Schema-path engine for trait data exchanged between IoT devices and
//! services. A trait is a typed tree of properties described by a static
//! schema; every node of a trait instance is addressed by a 32-bit
//! [`PropertyPathHandle`].
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use tdm::{ResourceIdentifier, SchemaCompliance, SchemaDefinition, TdmContext, TraitPath, WdmClient};
//!
//! fn main() -> tdm::Result<()> {
//!     let schema = Arc::new(SchemaDefinition::example().build(SchemaCompliance::Strict)?);
//!     let mut client = WdmClient::new(Arc::new(TdmContext::default()));
//!
//!     let path = TraitPath::new(ResourceIdentifier::SELF_NODE, schema.profile_id(), 0);
//!     let handle = client.new_data_sink(path, schema)?;
//!     client.data_sink_mut(handle)?.set_string("mode", "heat", false)?;
//!     assert!(client.update_client().has_pending());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |  WdmClient: catalog of updatable sinks, notify in, update out       |
//! +---------------------------------------------------------------------+
//! |  TraitDataSink | TraitUpdatableDataSink | TraitDataSource           |
//! +---------------------------------------------------------------------+
//! |  SchemaEngine: path handles, text paths, retrieve/store, versions   |
//! +---------------------------------------------------------------------+
//! |  TLV codec: TlvReader / TlvWriter                                   |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Modules Overview
//!
//! - [`schema`] - Schema engine (start here)
//! - [`sink`] / [`updatable`] / [`source`] - Trait data endpoints
//! - [`client`] - Subscription client and update flushing
//! - [`tlv`] - TLV codec
//! - [`notify`] - Publisher-side dirty tracking and notify payloads

pub mod catalog;
pub mod client;
pub mod config;
pub mod context;
pub mod delegate;
pub mod error;
pub mod generic_sink;
pub mod json;
pub mod notify;
pub mod path;
pub mod schema;
pub mod sink;
pub mod source;
pub mod tlv;
pub mod updatable;
pub mod update_client;

pub use catalog::{ResourceIdentifier, TraitCatalog, TraitDataHandle, TraitPath};
pub use client::{FlushReport, MessageExchange, NotificationReport, WdmClient};
pub use config::{ConfigError, TdmConfig, VersionPolicy};
pub use context::TdmContext;
pub use delegate::{
    DataPresence, DataSinkEvent, DirtyPathCut, GetDataDelegate, PathFilter, SetDataDelegate,
};
pub use error::{Result, TdmError};
pub use generic_sink::{GenericTraitUpdatableDataSink, LeafStore};
pub use notify::{build_notification, Event, NotificationBuilder, NotificationEngine};
pub use path::{
    PropertyDictionaryKey, PropertyPathHandle, PropertySchemaHandle, NULL_PROPERTY_PATH_HANDLE,
    ROOT_PROPERTY_PATH_HANDLE, ROOT_PROPERTY_SCHEMA_HANDLE,
};
pub use schema::{
    NodeFlags, Retrieved, SchemaBuilder, SchemaCompliance, SchemaDefinition, SchemaEngine,
    SchemaVersionRange,
};
pub use sink::{
    ChangeRejectionSlot, DataElement, DataElementWriter, ElementFlags, SinkHandler,
    TraitDataSink,
};
pub use source::{SourceLock, TraitDataSource};
pub use tlv::{ContainerType, Tag, TlvError, TlvReader, TlvValue, TlvWriter};
pub use updatable::{TraitUpdatableDataSink, UpdatableSinkHandler};
pub use update_client::{UpdateClient, UpdateMode};
