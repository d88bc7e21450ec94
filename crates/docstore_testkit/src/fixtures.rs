//! Test fixtures and store helpers.
//!
//! Three related types are declared:
//!
//! - `Customer`, keyed by `customerId`, supporting `Order.customer`
//! - `Order`, keyed by `orderId`, with an `owner` privilege key set on
//!   `customer` and a `public` field group (`qty`, `tags`), supporting
//!   `OrderLine.orderId`
//! - `OrderLine`, keyed by `(orderId, lineId)`

use crate::faults::FlakyEngine;
use crate::recording::RecordingLogger;
use docstore_codec::{Content, Value};
use docstore_core::{
    Binding, Document, DocumentStore, FieldKind, FieldSpec, Schema, StoreConfig,
};
use docstore_engine::MemoryCache;
use std::sync::Arc;
use tempfile::TempDir;

/// `Customer` declaration.
pub fn customer_schema() -> Schema {
    Schema::builder("Customer")
        .domain("sales")
        .field(FieldSpec::text("customerId").required())
        .field(FieldSpec::text("name").required())
        .field(FieldSpec::text("email").unique())
        .key_fields(["customerId"])
        .supports("Order", [("customer", "customerId")])
        .build()
        .expect("customer schema")
}

/// `Order` declaration.
pub fn order_schema() -> Schema {
    Schema::builder("Order")
        .domain("sales")
        .description("Customer orders")
        .field(FieldSpec::text("orderId").required())
        .field(FieldSpec::text("customer"))
        .field(FieldSpec::integer("qty").default_value(1i64))
        .field(FieldSpec::text("note"))
        .field(FieldSpec::new("tags", FieldKind::Array))
        .key_fields(["orderId"])
        .privilege_keys("owner", ["customer"])
        .field_group("public", ["qty", "tags"])
        .supports("OrderLine", [("orderId", "orderId")])
        .build()
        .expect("order schema")
}

/// `OrderLine` declaration.
pub fn order_line_schema() -> Schema {
    Schema::builder("OrderLine")
        .domain("sales")
        .field(FieldSpec::text("orderId").required())
        .field(FieldSpec::text("lineId").required())
        .field(FieldSpec::text("product"))
        .field(FieldSpec::integer("amount"))
        .key_fields(["orderId", "lineId"])
        .build()
        .expect("order line schema")
}

/// A customer document.
pub fn customer(id: &str, name: &str) -> Document {
    Document::new("Customer")
        .with("customerId", id)
        .with("name", name)
}

/// An order document.
pub fn order(id: &str, customer: &str, qty: i64) -> Document {
    Document::new("Order")
        .with("orderId", id)
        .with("customer", customer)
        .with("qty", qty)
}

/// An order line document.
pub fn order_line(order_id: &str, line_id: &str, amount: i64) -> Document {
    Document::new("OrderLine")
        .with("orderId", order_id)
        .with("lineId", line_id)
        .with("amount", amount)
}

/// Content from a JSON object literal.
///
/// # Panics
///
/// Panics if `json` is not an object or holds floats.
pub fn content(json: serde_json::Value) -> Content {
    match Value::from_json(json).expect("json content") {
        Value::Map(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// A store with the fixture types registered on a [`FlakyEngine`], sharing
/// one read cache and one recording logger.
pub struct TestStore {
    /// The store.
    pub store: DocumentStore,
    /// The main engine.
    pub engine: Arc<FlakyEngine>,
    /// The read cache.
    pub cache: Arc<MemoryCache>,
    /// The change logger.
    pub logger: Arc<RecordingLogger>,
}

impl TestStore {
    /// Creates a store with default configuration.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Creates a store with the given configuration.
    pub fn with_config(config: StoreConfig) -> Self {
        let engine = Arc::new(FlakyEngine::new());
        let cache = Arc::new(MemoryCache::new());
        let logger = Arc::new(RecordingLogger::new());
        let store = DocumentStore::new(config, engine.clone());
        let binding = Binding::new()
            .read_cache(cache.clone())
            .logger(logger.clone())
            .log_content(true);
        for schema in [customer_schema(), order_schema(), order_line_schema()] {
            store
                .register_with(schema, binding.clone())
                .expect("fixture registration");
        }
        Self {
            store,
            engine,
            cache,
            logger,
        }
    }
}

impl Default for TestStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestStore {
    type Target = DocumentStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Runs a test with a fresh [`TestStore`].
///
/// # Example
///
/// ```rust,ignore
/// use docstore_testkit::with_store;
///
/// #[test]
/// fn my_test() {
///     with_store(|ts| {
///         let orders = ts.collection("Order").unwrap();
///         // ... test operations
///     });
/// }
/// ```
pub fn with_store<F, R>(f: F) -> R
where
    F: FnOnce(&TestStore) -> R,
{
    let ts = TestStore::new();
    f(&ts)
}

/// Runs a test with a temporary directory for backup files.
pub fn with_backup_dir<F, R>(f: F) -> R
where
    F: FnOnce(&TestStore, &std::path::Path) -> R,
{
    let dir = TempDir::new().expect("Failed to create temp directory");
    let ts = TestStore::new();
    f(&ts, dir.path())
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;
    use docstore_core::Options;

    /// A store holding one customer `C1` with `order_count` orders
    /// (`O0`, `O1`, ...), each with one line.
    pub fn populated_store(order_count: usize) -> TestStore {
        let ts = TestStore::new();
        ts.save(&mut customer("C1", "Ada"), Options::new())
            .expect("save customer");
        for i in 0..order_count {
            let order_id = format!("O{i}");
            let qty = i64::try_from(i).unwrap_or(i64::MAX);
            ts.save(&mut order(&order_id, "C1", qty), Options::new())
                .expect("save order");
            ts.save(&mut order_line(&order_id, "1", 10), Options::new())
                .expect("save line");
        }
        ts.logger.clear();
        ts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docstore_core::Options;

    #[test]
    fn fixture_store_registers_types() {
        with_store(|ts| {
            assert_eq!(ts.type_names(), vec!["Customer", "Order", "OrderLine"]);
            assert_eq!(ts.dependencies().dependents_of("Order").len(), 1);
        });
    }

    #[test]
    fn populated_store_is_queryable() {
        let ts = scenarios::populated_store(3);
        let orders = ts.collection("Order").unwrap();
        assert_eq!(
            orders
                .objects(docstore_engine::Criteria::new(), Options::new())
                .unwrap()
                .len(),
            3
        );
        assert!(ts.logger.is_empty());
    }

    #[test]
    fn json_content() {
        let c = content(serde_json::json!({"orderId": "A1", "qty": 2}));
        assert_eq!(c["qty"], Value::Integer(2));
    }
}
