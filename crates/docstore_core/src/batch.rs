//! Batches: grouped writes committed atomically.
//!
//! A [`Batch`] stages every write in the participating types' staging
//! engines so reads made with the batch see the pending state. At commit the
//! recorded operations and pre-images go to the main engine in one
//! [`Engine::batch`] call.
//!
//! ## Lifecycle
//!
//! ```text
//! Open ──commit──▶ Committing ──ok──▶ Committed
//!   │                  │
//!   │                  ├──failed, clean_on_failed──▶ Cleaned
//!   │                  └──failed──▶ Open
//!   └──clean──▶ Cleaned
//! ```
//!
//! While committing, new operations and a second commit are refused. A
//! failed commit without cleaning leaves the batch open so it can be
//! retried or cleaned explicitly. Dropping an open batch cleans it.

use crate::error::{DocError, DocResult};
use crate::logger::LogEntry;
use crate::registry::EntityType;
use docstore_codec::Content;
use docstore_engine::{Engine, OpKind, Operation, Originals};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// State of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// Accepting operations.
    Open,
    /// Being applied to the main engine.
    Committing,
    /// Applied to the main engine.
    Committed,
    /// Discarded.
    Cleaned,
}

struct BatchInner {
    state: BatchState,
    originals: Originals,
    operations: Vec<Operation>,
    logs: Vec<Box<dyn LogEntry>>,
    participants: BTreeMap<String, Arc<EntityType>>,
    /// (entity type, id, last operation) per touched document.
    touched: Vec<(String, String, OpKind)>,
}

/// A group of writes bound to one main engine.
pub struct Batch {
    id: String,
    engine: Arc<dyn Engine>,
    inner: Mutex<BatchInner>,
}

impl fmt::Debug for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Batch")
            .field("id", &self.id)
            .field("engine", &self.engine.name())
            .field("state", &inner.state)
            .field("operations", &inner.operations.len())
            .finish()
    }
}

impl Batch {
    /// Opens a batch on `engine`.
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            engine,
            inner: Mutex::new(BatchInner {
                state: BatchState::Open,
                originals: Originals::new(),
                operations: Vec::new(),
                logs: Vec::new(),
                participants: BTreeMap::new(),
                touched: Vec::new(),
            }),
        }
    }

    /// Batch id, the key of its staged rows.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Main engine the batch commits to.
    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    /// Current state.
    pub fn state(&self) -> BatchState {
        self.inner.lock().state
    }

    /// Recorded operations, in order.
    pub fn operations(&self) -> Vec<Operation> {
        self.inner.lock().operations.clone()
    }

    /// Recorded pre-images.
    pub fn originals(&self) -> Originals {
        self.inner.lock().originals.clone()
    }

    /// Number of recorded operations.
    pub fn len(&self) -> usize {
        self.inner.lock().operations.len()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self, inner: &BatchInner, entity_type: &EntityType) -> DocResult<()> {
        if inner.state != BatchState::Open {
            return Err(DocError::invalid_operation(format!(
                "batch {} is {:?}",
                self.id, inner.state
            )));
        }
        if !std::ptr::addr_eq(Arc::as_ptr(&self.engine), Arc::as_ptr(entity_type.engine())) {
            return Err(DocError::invalid_operation(format!(
                "main engine of {} ({}) is not the batch engine ({})",
                entity_type.name(),
                entity_type.engine().name(),
                self.engine.name()
            )));
        }
        Ok(())
    }

    /// Records the pre-image of a document. The first record wins.
    ///
    /// # Errors
    ///
    /// Fails when the batch is not open or the type uses another engine.
    pub fn record_original(
        &self,
        entity_type: &Arc<EntityType>,
        doc_id: &str,
        content: Option<Content>,
    ) -> DocResult<()> {
        let mut inner = self.inner.lock();
        self.check(&inner, entity_type)?;
        inner.originals.record(
            entity_type.name(),
            doc_id,
            entity_type.collection(),
            content,
        );
        Ok(())
    }

    /// Stages an operation and keeps it, with its log entry, for commit.
    ///
    /// # Errors
    ///
    /// Fails when the batch is not open, the type uses another engine, an
    /// update targets a document with no known content, or staging fails.
    pub fn record_operation(
        &self,
        entity_type: &Arc<EntityType>,
        operation: Operation,
        log: Option<Box<dyn LogEntry>>,
    ) -> DocResult<()> {
        let mut inner = self.inner.lock();
        self.check(&inner, entity_type)?;
        let space = entity_type.space();
        let delete = entity_type.delete_staging();
        let collection = operation.collection().to_string();
        let doc_id = operation.doc_id().to_string();

        match &operation {
            Operation::Insert { content, .. } => {
                let stored = self.engine.get(&collection, &doc_id)?;
                inner
                    .originals
                    .record(entity_type.name(), &doc_id, &collection, stored);
                delete.remove(&self.id, &collection, &doc_id)?;
                space.set(&self.id, &collection, &doc_id, content.clone())?;
            }
            Operation::Update { changes, .. } => {
                if space.get(&self.id, &collection, &doc_id)?.is_none() {
                    let seed = inner
                        .originals
                        .get(entity_type.name(), &doc_id)
                        .and_then(|original| original.content.clone())
                        .ok_or_else(|| {
                            DocError::invalid_operation(format!(
                                "no content known for {}/{doc_id} in batch {}",
                                entity_type.name(),
                                self.id
                            ))
                        })?;
                    space.set(&self.id, &collection, &doc_id, seed)?;
                }
                space.update(&self.id, &collection, &doc_id, changes)?;
            }
            Operation::Set { content, .. } => {
                delete.remove(&self.id, &collection, &doc_id)?;
                space.set(&self.id, &collection, &doc_id, content.clone())?;
            }
            Operation::Delete { .. } => {
                let staged = match space.get(&self.id, &collection, &doc_id)? {
                    Some(content) => content,
                    None => inner
                        .originals
                        .get(entity_type.name(), &doc_id)
                        .and_then(|original| original.content.clone())
                        .unwrap_or_default(),
                };
                space.remove(&self.id, &collection, &doc_id)?;
                delete.set(&self.id, &collection, &doc_id, staged)?;
            }
        }

        debug!(
            batch = %self.id,
            entity_type = %entity_type.name(),
            id = %doc_id,
            op = %operation.kind(),
            "operation staged"
        );
        inner
            .touched
            .push((entity_type.name().to_string(), doc_id, operation.kind()));
        inner.operations.push(operation);
        if let Some(log) = log {
            inner.logs.push(log);
        }
        inner
            .participants
            .entry(entity_type.name().to_string())
            .or_insert_with(|| Arc::clone(entity_type));
        Ok(())
    }

    /// Applies the batch to the main engine. Never fails: the outcome is
    /// reported as `(success, message)`.
    ///
    /// On success the deferred log entries are saved, versions and caches
    /// of every touched document are refreshed, and staged rows are dropped.
    /// On failure staged rows are dropped only when `clean_on_failed` is set,
    /// otherwise the batch is open again.
    pub fn commit(&self, clean_on_failed: bool) -> (bool, String) {
        let (operations, originals) = {
            let mut inner = self.inner.lock();
            if inner.state != BatchState::Open {
                return (false, format!("batch {} is {:?}", self.id, inner.state));
            }
            inner.state = BatchState::Committing;
            (inner.operations.clone(), inner.originals.clone())
        };

        let (success, message) = self.engine.batch(&operations, &originals).into_pair();
        if !success {
            warn!(batch = %self.id, operations = operations.len(), message = %message, "batch commit failed");
            if clean_on_failed {
                self.clean();
            } else {
                self.inner.lock().state = BatchState::Open;
            }
            return (false, message);
        }

        let (logs, touched, participants) = {
            let mut inner = self.inner.lock();
            (
                std::mem::take(&mut inner.logs),
                std::mem::take(&mut inner.touched),
                inner.participants.clone(),
            )
        };
        for log in &logs {
            if let Err(e) = log.save() {
                warn!(batch = %self.id, error = %e, "log save failed");
            }
        }

        let mut last: BTreeMap<(String, String), OpKind> = BTreeMap::new();
        for (entity_type, doc_id, kind) in touched {
            last.insert((entity_type, doc_id), kind);
        }
        for ((name, doc_id), kind) in last {
            let Some(entity_type) = participants.get(&name) else {
                continue;
            };
            let content = if kind == OpKind::Delete {
                None
            } else {
                match self.engine.get(entity_type.collection(), &doc_id) {
                    Ok(content) => content,
                    Err(e) => {
                        warn!(batch = %self.id, id = %doc_id, error = %e, "post-commit read failed");
                        None
                    }
                }
            };
            entity_type.sync_after_write(&doc_id, content.as_ref());
        }

        info!(batch = %self.id, operations = operations.len(), "batch committed");
        self.release(BatchState::Committed);
        (true, message)
    }

    /// Drops everything staged by the batch.
    pub fn clean(&self) {
        self.release(BatchState::Cleaned);
    }

    fn release(&self, state: BatchState) {
        let mut inner = self.inner.lock();
        for entity_type in inner.participants.values() {
            for staging in [entity_type.space(), entity_type.delete_staging()] {
                if let Err(e) = staging.drop_batch(&self.id) {
                    warn!(batch = %self.id, entity_type = %entity_type.name(), error = %e, "staging cleanup failed");
                }
            }
        }
        inner.participants.clear();
        inner.operations.clear();
        inner.originals.clear();
        inner.logs.clear();
        inner.touched.clear();
        inner.state = state;
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        if matches!(
            self.inner.get_mut().state,
            BatchState::Open | BatchState::Committing
        ) {
            self.release(BatchState::Cleaned);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Binding, DocumentStore};
    use crate::schema::{FieldSpec, Schema};
    use docstore_codec::Value;
    use docstore_engine::{Change, MemoryEngine};

    fn store() -> (DocumentStore, Arc<EntityType>) {
        let store = DocumentStore::in_memory();
        let schema = Schema::builder("Order")
            .field(FieldSpec::text("orderId"))
            .field(FieldSpec::integer("qty"))
            .key_fields(["orderId"])
            .build()
            .unwrap();
        let order = store.register(schema).unwrap();
        (store, order)
    }

    fn content(id: &str, qty: i64) -> Content {
        let mut c = Content::new();
        c.insert("orderId".into(), Value::from(id));
        c.insert("qty".into(), Value::Integer(qty));
        c
    }

    fn insert(id: &str, qty: i64) -> Operation {
        Operation::Insert {
            collection: "Order".into(),
            doc_id: id.into(),
            content: content(id, qty),
        }
    }

    #[test]
    fn staged_until_commit() {
        let (store, order) = store();
        let batch = store.batch();
        batch.record_operation(&order, insert("A1", 1), None).unwrap();

        assert!(store.engine().get("Order", "A1").unwrap().is_none());
        assert!(order.space().get(batch.id(), "Order", "A1").unwrap().is_some());

        let (ok, _) = batch.commit(true);
        assert!(ok);
        assert_eq!(batch.state(), BatchState::Committed);
        assert!(store.engine().get("Order", "A1").unwrap().is_some());
        assert!(order.space().get(batch.id(), "Order", "A1").unwrap().is_none());
    }

    #[test]
    fn update_seeds_from_original() {
        let (store, order) = store();
        store.engine().set("Order", "A1", content("A1", 1)).unwrap();
        let batch = store.batch();
        batch
            .record_original(&order, "A1", Some(content("A1", 1)))
            .unwrap();
        batch
            .record_operation(
                &order,
                Operation::Update {
                    collection: "Order".into(),
                    doc_id: "A1".into(),
                    changes: vec![Change::set("qty", 5i64)],
                },
                None,
            )
            .unwrap();

        let staged = order.space().get(batch.id(), "Order", "A1").unwrap().unwrap();
        assert_eq!(staged["qty"], Value::Integer(5));
        assert!(batch.commit(true).0);
        assert_eq!(
            store.engine().get("Order", "A1").unwrap().unwrap()["qty"],
            Value::Integer(5)
        );
    }

    #[test]
    fn delete_moves_row_to_delete_staging() {
        let (store, order) = store();
        let batch = store.batch();
        batch.record_operation(&order, insert("A1", 1), None).unwrap();
        batch
            .record_operation(
                &order,
                Operation::Delete {
                    collection: "Order".into(),
                    doc_id: "A1".into(),
                },
                None,
            )
            .unwrap();

        assert!(order.space().get(batch.id(), "Order", "A1").unwrap().is_none());
        assert!(order
            .delete_staging()
            .get(batch.id(), "Order", "A1")
            .unwrap()
            .is_some());
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn foreign_engine_is_rejected() {
        let store = DocumentStore::in_memory();
        let schema = Schema::builder("Note").build().unwrap();
        let note = store
            .register_with(
                schema,
                Binding::new().engine(Arc::new(MemoryEngine::named("other"))),
            )
            .unwrap();
        let batch = store.batch();
        let op = Operation::Insert {
            collection: "Note".into(),
            doc_id: "n1".into(),
            content: Content::new(),
        };
        assert!(matches!(
            batch.record_operation(&note, op, None),
            Err(DocError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn failed_commit_keeps_batch_open_unless_cleaned() {
        let (store, order) = store();
        store.engine().set("Order", "A1", content("A1", 1)).unwrap();

        let batch = store.batch();
        batch.record_operation(&order, insert("A1", 2), None).unwrap();
        let (ok, message) = batch.commit(false);
        assert!(!ok);
        assert!(!message.is_empty());
        assert_eq!(batch.state(), BatchState::Open);

        let (ok, _) = batch.commit(true);
        assert!(!ok);
        assert_eq!(batch.state(), BatchState::Cleaned);
        assert!(matches!(
            batch.record_operation(&order, insert("A2", 1), None),
            Err(DocError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn dropping_open_batch_cleans_staging() {
        let (store, order) = store();
        let id = {
            let batch = store.batch();
            batch.record_operation(&order, insert("A1", 1), None).unwrap();
            batch.id().to_string()
        };
        assert!(order.space().get(&id, "Order", "A1").unwrap().is_none());
    }
}
