//! # Docstore Core
//!
//! Transactional document layer over pluggable engines.
//!
//! Entity types are declared with a [`Schema`] and registered in a
//! [`DocumentStore`], which binds each of them to a main engine, staging
//! engines, an optional read cache and search engine, a logger and a
//! validator. Documents are then saved, updated, loaded and deleted through
//! a [`Collection`].
//!
//! This crate provides:
//! - Id derivation from key fields and privilege strings
//! - Authorization against an [`AccessPolicy`], with field groups
//! - Dependency checks between types
//! - Batches committed atomically by the main engine
//! - Version tokens and read-cache coherence
//! - Change logging, including an in-memory change feed
//!
//! ## Example
//!
//! ```rust
//! use docstore_core::{Document, DocumentStore, FieldSpec, Options, Schema};
//!
//! let store = DocumentStore::in_memory();
//! let schema = Schema::builder("Order")
//!     .field(FieldSpec::text("orderId"))
//!     .field(FieldSpec::integer("qty"))
//!     .key_fields(["orderId"])
//!     .build()
//!     .unwrap();
//! store.register(schema).unwrap();
//!
//! let orders = store.collection("Order").unwrap();
//! let mut doc = Document::new("Order").with("orderId", "A1").with("qty", 3i64);
//! orders.save(&mut doc, Options::new()).unwrap();
//!
//! let loaded = orders.load("A1", Options::new()).unwrap().unwrap();
//! assert_eq!(loaded.id(), Some("A1"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod acl;
mod address;
mod batch;
mod collection;
mod config;
mod dependency;
mod document;
mod error;
mod gate;
mod keys;
mod logger;
mod registry;
mod schema;
mod version;

pub use acl::{AccessPolicy, Acl, AclItem};
pub use address::{Catalog, EngineAddress};
pub use batch::{Batch, BatchState};
pub use collection::{Collection, DeleteResult, Options, ReplicaTask, Selector, WriteOutcome};
pub use config::StoreConfig;
pub use dependency::{Dependency, DependencyRegistry};
pub use document::Document;
pub use error::{DocError, DocResult};
pub use gate::{authorized_fields, check_acl, check_update_acl};
pub use logger::{ChangeFeed, ChangeFeedLogger, DocLogger, LogEntry, LogRecord, TracingLogger};
pub use registry::{Binding, DocumentStore, EntityType};
pub use schema::{
    FieldKind, FieldSpec, Schema, SchemaBuilder, SchemaMeta, SchemaValidator, Validator, KEY_SET,
};
pub use version::VersionRegistry;
