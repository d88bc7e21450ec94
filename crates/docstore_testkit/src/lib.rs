//! # Docstore Testkit
//!
//! Test utilities for docstore.
//!
//! This crate provides:
//! - Fixture schemas, documents and a ready-made store
//! - A fault-injecting engine wrapper
//! - A logger recording every saved entry
//! - Property-based test generators using proptest
//! - Tracing setup for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use docstore_testkit::prelude::*;
//!
//! #[test]
//! fn save_then_load() {
//!     with_store(|ts| {
//!         let orders = ts.collection("Order").unwrap();
//!         orders.save(&mut order("A1", "C1", 1), Options::new()).unwrap();
//!         assert!(orders.load("A1", Options::new()).unwrap().is_some());
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faults;
pub mod fixtures;
pub mod generators;
pub mod recording;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::init_tracing;
    pub use crate::recording::*;
    pub use docstore_codec::{Content, Value};
    pub use docstore_core::{
        Acl, AclItem, Batch, Binding, DocError, Document, DocumentStore, Options, Schema,
        WriteOutcome,
    };
    pub use docstore_engine::{AnalyticRequest, Change, Criteria, Engine};
}

pub use faults::*;
pub use fixtures::*;
pub use generators::*;
pub use recording::*;

/// Installs a `tracing` subscriber writing to the test output.
///
/// The filter comes from `RUST_LOG` (default `warn`). Calling it more than
/// once is harmless.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
