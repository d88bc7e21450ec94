//! # Docstore Engine
//!
//! The storage contract the document layer is written against, plus the
//! in-memory implementations used for staging, caching and tests.
//!
//! Engines store **content maps** addressed by collection and id. They know
//! nothing about schemas, privileges or versions; the document layer owns
//! all of that and only asks engines to read, write, search and apply
//! batches atomically.
//!
//! ## Available Engines
//!
//! - [`MemoryEngine`] - Main engine keeping collections in memory
//! - [`MemoryStaging`] - Batch staging area (space and delete engines)
//! - [`MemoryCache`] - Read cache or search engine
//!
//! ## Example
//!
//! ```rust
//! use docstore_codec::{Content, Value};
//! use docstore_engine::{Criteria, Engine, MemoryEngine, Query};
//!
//! let engine = MemoryEngine::new();
//! let mut content = Content::new();
//! content.insert("qty".into(), Value::Integer(3));
//! engine.set("orders", "A1", content).unwrap();
//!
//! let ids = engine.scan("orders", &Query::new(Criteria::new().gt("qty", 1i64))).unwrap();
//! assert_eq!(ids, vec!["A1".to_string()]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod analytic;
mod backup;
mod cache;
mod change;
mod engine;
mod error;
mod memory;
mod operation;
mod query;
mod replica;
mod staging;

pub use analytic::{AnalyticModel, AnalyticRequest};
pub use backup::{BackupFile, BackupMetadata, BackupOptions};
pub use cache::{CacheEngine, MemoryCache};
pub use change::{apply_changes, Change};
pub use engine::{Capabilities, Engine};
pub use error::{EngineError, EngineResult};
pub use memory::MemoryEngine;
pub use operation::{BatchOutcome, OpKind, Operation, Original, Originals};
pub use query::{Condition, Criteria, Operator, Query};
pub use replica::{now_millis, EngineTask, ReplicaOp, ReplicaResult};
pub use staging::{MemoryStaging, StagingEngine};
