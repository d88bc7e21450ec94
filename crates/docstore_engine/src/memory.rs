//! In-memory engine.

use crate::analytic::{AnalyticModel, AnalyticRequest};
use crate::change::{apply_changes, Change};
use crate::engine::{Capabilities, Engine};
use crate::error::{EngineError, EngineResult};
use crate::operation::{BatchOutcome, Operation, Originals};
use crate::query::{Criteria, Query};
use docstore_codec::Content;
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::debug;

type Collection = BTreeMap<String, Content>;

/// An engine keeping every collection in memory.
///
/// Suitable for:
/// - Unit and integration tests
/// - Ephemeral stores that don't need persistence
/// - Validating document changes before touching real storage
///
/// Batches are applied under a single write lock and rolled back on the
/// first failing operation, so they are atomic for every reader.
///
/// # Example
///
/// ```rust
/// use docstore_codec::{Content, Value};
/// use docstore_engine::{Engine, MemoryEngine};
///
/// let engine = MemoryEngine::new();
/// let mut content = Content::new();
/// content.insert("orderId".into(), Value::from("A1"));
/// let id = engine.create("orders", content, Some("A1")).unwrap();
/// assert_eq!(id, "A1");
/// assert!(engine.get("orders", "A1").unwrap().is_some());
/// ```
#[derive(Debug)]
pub struct MemoryEngine {
    name: String,
    capabilities: Capabilities,
    collections: RwLock<HashMap<String, Collection>>,
    locks: Mutex<HashSet<(String, String)>>,
    released: Condvar,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::named("memory")
    }
}

impl MemoryEngine {
    /// Creates an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty engine with a custom name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: Capabilities::default(),
            collections: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashSet::new()),
            released: Condvar::new(),
        }
    }

    /// Overrides the reported capabilities.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Number of documents in a collection.
    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    /// Names of existing collections, sorted.
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn apply(
        collections: &mut HashMap<String, Collection>,
        operation: &Operation,
    ) -> EngineResult<()> {
        match operation {
            Operation::Insert {
                collection,
                doc_id,
                content,
            } => {
                let rows = collections.entry(collection.clone()).or_default();
                if rows.contains_key(doc_id) {
                    return Err(EngineError::already_exists(collection, doc_id));
                }
                rows.insert(doc_id.clone(), content.clone());
            }
            Operation::Set {
                collection,
                doc_id,
                content,
            } => {
                collections
                    .entry(collection.clone())
                    .or_default()
                    .insert(doc_id.clone(), content.clone());
            }
            Operation::Update {
                collection,
                doc_id,
                changes,
            } => {
                let content = collections
                    .get_mut(collection)
                    .and_then(|rows| rows.get_mut(doc_id))
                    .ok_or_else(|| EngineError::not_found(collection, doc_id))?;
                let mut updated = content.clone();
                apply_changes(&mut updated, changes)?;
                *content = updated;
            }
            Operation::Delete { collection, doc_id } => {
                if let Some(rows) = collections.get_mut(collection) {
                    rows.remove(doc_id);
                }
            }
        }
        Ok(())
    }
}

impl Engine for MemoryEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn create(
        &self,
        collection: &str,
        content: Content,
        doc_id: Option<&str>,
    ) -> EngineResult<String> {
        let doc_id = doc_id.map_or_else(|| uuid::Uuid::new_v4().simple().to_string(), str::to_string);
        let mut collections = self.collections.write();
        let rows = collections.entry(collection.to_string()).or_default();
        if rows.contains_key(&doc_id) {
            return Err(EngineError::already_exists(collection, doc_id));
        }
        rows.insert(doc_id.clone(), content);
        Ok(doc_id)
    }

    fn get(&self, collection: &str, doc_id: &str) -> EngineResult<Option<Content>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|rows| rows.get(doc_id))
            .cloned())
    }

    fn set(&self, collection: &str, doc_id: &str, content: Content) -> EngineResult<String> {
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .insert(doc_id.to_string(), content);
        Ok(doc_id.to_string())
    }

    fn update(
        &self,
        collection: &str,
        doc_id: &str,
        changes: &[Change],
    ) -> EngineResult<Content> {
        let mut collections = self.collections.write();
        let content = collections
            .get_mut(collection)
            .and_then(|rows| rows.get_mut(doc_id))
            .ok_or_else(|| EngineError::not_found(collection, doc_id))?;
        let mut updated = content.clone();
        apply_changes(&mut updated, changes)?;
        *content = updated.clone();
        Ok(updated)
    }

    fn delete(&self, collection: &str, doc_id: &str) -> EngineResult<()> {
        if let Some(rows) = self.collections.write().get_mut(collection) {
            rows.remove(doc_id);
        }
        Ok(())
    }

    fn scan(&self, collection: &str, query: &Query) -> EngineResult<Vec<String>> {
        Ok(self
            .search(collection, query)?
            .into_iter()
            .map(|(id, _)| id)
            .collect())
    }

    fn fetch(&self, collection: &str, ids: &[String]) -> EngineResult<Vec<(String, Content)>> {
        let collections = self.collections.read();
        let Some(rows) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| rows.get(id).map(|content| (id.clone(), content.clone())))
            .collect())
    }

    fn search(&self, collection: &str, query: &Query) -> EngineResult<Vec<(String, Content)>> {
        let collections = self.collections.read();
        let Some(rows) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        let mut found = Vec::new();
        for (id, content) in rows {
            if query.is_full(found.len()) {
                break;
            }
            if query.matches(content) {
                found.push((id.clone(), content.clone()));
            }
        }
        Ok(found)
    }

    fn compile(
        &self,
        _collection: &str,
        request: &AnalyticRequest,
        acl_queries: Vec<Criteria>,
    ) -> EngineResult<AnalyticModel> {
        Ok(AnalyticModel::new(request.clone(), acl_queries))
    }

    fn analyze(&self, collection: &str, model: &AnalyticModel) -> EngineResult<Vec<Content>> {
        let collections = self.collections.read();
        Ok(collections
            .get(collection)
            .map(|rows| model.run(rows.values()))
            .unwrap_or_default())
    }

    fn lock(&self, collection: &str, doc_id: &str, timeout: Duration) -> EngineResult<bool> {
        let key = (collection.to_string(), doc_id.to_string());
        let deadline = Instant::now() + timeout;
        let mut held = self.locks.lock();
        while held.contains(&key) {
            if self.released.wait_until(&mut held, deadline).timed_out() && held.contains(&key) {
                return Ok(false);
            }
        }
        held.insert(key);
        Ok(true)
    }

    fn unlock(&self, collection: &str, doc_id: &str) -> EngineResult<()> {
        let key = (collection.to_string(), doc_id.to_string());
        self.locks.lock().remove(&key);
        self.released.notify_all();
        Ok(())
    }

    /// Rolls back from the state captured under the write lock. `originals`
    /// are not consulted: they may predate writes made outside the batch.
    fn batch(&self, operations: &[Operation], _originals: &Originals) -> BatchOutcome {
        let mut collections = self.collections.write();
        // State before the first write of each touched document.
        let mut before: Vec<(String, String, Option<Content>)> = Vec::new();
        let mut seen: HashSet<(String, String)> = HashSet::new();

        for (index, operation) in operations.iter().enumerate() {
            let key = (
                operation.collection().to_string(),
                operation.doc_id().to_string(),
            );
            if seen.insert(key.clone()) {
                let current = collections
                    .get(&key.0)
                    .and_then(|rows| rows.get(&key.1))
                    .cloned();
                before.push((key.0, key.1, current));
            }

            if let Err(e) = Self::apply(&mut collections, operation) {
                debug!(
                    engine = %self.name,
                    index,
                    op = %operation.kind(),
                    doc_id = operation.doc_id(),
                    error = %e,
                    "batch failed, rolling back"
                );
                for (collection, doc_id, current) in before.into_iter().rev() {
                    let rows = collections.entry(collection).or_default();
                    match current {
                        Some(content) => {
                            rows.insert(doc_id, content);
                        }
                        None => {
                            rows.remove(&doc_id);
                        }
                    }
                }
                return BatchOutcome::failed(format!("operation {index} failed: {e}"));
            }
        }
        BatchOutcome::ok()
    }

    fn drop_collection(&self, collection: &str) -> EngineResult<()> {
        self.collections.write().remove(collection);
        Ok(())
    }

    fn create_collection(&self, collection: &str) -> EngineResult<()> {
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default();
        Ok(())
    }
}
