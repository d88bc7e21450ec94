//! Batch-scoped staging areas.
//!
//! A batch stages its pending writes in a "space" area (inserts, updates and
//! sets) and its pending deletes in a "delete" area, so reads made with the
//! batch see the pending effects before anything reaches the main engine.
//! Staged rows are keyed by batch id and dropped when the batch is committed
//! or cleaned.

use crate::change::{apply_changes, Change};
use crate::error::{EngineError, EngineResult};
use crate::query::Criteria;
use docstore_codec::Content;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

/// Storage for rows staged by open batches.
pub trait StagingEngine: Send + Sync {
    /// Stages a full document.
    fn set(&self, batch_id: &str, collection: &str, doc_id: &str, content: Content)
        -> EngineResult<()>;

    /// Applies changes to a staged document and returns the result.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] when nothing is staged for the id.
    fn update(
        &self,
        batch_id: &str,
        collection: &str,
        doc_id: &str,
        changes: &[Change],
    ) -> EngineResult<Content>;

    /// Reads a staged document.
    fn get(&self, batch_id: &str, collection: &str, doc_id: &str) -> EngineResult<Option<Content>>;

    /// Removes a staged document.
    fn remove(&self, batch_id: &str, collection: &str, doc_id: &str) -> EngineResult<()>;

    /// Ids of staged documents matching the criteria.
    fn scan(&self, batch_id: &str, collection: &str, criteria: &Criteria)
        -> EngineResult<Vec<String>>;

    /// Staged documents among `ids`, in request order.
    fn fetch(
        &self,
        batch_id: &str,
        collection: &str,
        ids: &[String],
    ) -> EngineResult<Vec<(String, Content)>>;

    /// Discards everything staged by a batch.
    fn drop_batch(&self, batch_id: &str) -> EngineResult<()>;
}

type StagedRows = BTreeMap<(String, String), Content>;

/// In-memory staging area.
#[derive(Debug, Default)]
pub struct MemoryStaging {
    batches: RwLock<HashMap<String, StagedRows>>,
}

impl MemoryStaging {
    /// Creates an empty staging area.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows staged by a batch.
    pub fn staged_count(&self, batch_id: &str) -> usize {
        self.batches.read().get(batch_id).map_or(0, BTreeMap::len)
    }

    /// Number of batches with staged rows.
    pub fn batch_count(&self) -> usize {
        self.batches.read().len()
    }
}

fn key(collection: &str, doc_id: &str) -> (String, String) {
    (collection.to_string(), doc_id.to_string())
}

impl StagingEngine for MemoryStaging {
    fn set(
        &self,
        batch_id: &str,
        collection: &str,
        doc_id: &str,
        content: Content,
    ) -> EngineResult<()> {
        self.batches
            .write()
            .entry(batch_id.to_string())
            .or_default()
            .insert(key(collection, doc_id), content);
        Ok(())
    }

    fn update(
        &self,
        batch_id: &str,
        collection: &str,
        doc_id: &str,
        changes: &[Change],
    ) -> EngineResult<Content> {
        let mut batches = self.batches.write();
        let content = batches
            .get_mut(batch_id)
            .and_then(|rows| rows.get_mut(&key(collection, doc_id)))
            .ok_or_else(|| EngineError::not_found(collection, doc_id))?;
        apply_changes(content, changes)?;
        Ok(content.clone())
    }

    fn get(&self, batch_id: &str, collection: &str, doc_id: &str) -> EngineResult<Option<Content>> {
        Ok(self
            .batches
            .read()
            .get(batch_id)
            .and_then(|rows| rows.get(&key(collection, doc_id)))
            .cloned())
    }

    fn remove(&self, batch_id: &str, collection: &str, doc_id: &str) -> EngineResult<()> {
        if let Some(rows) = self.batches.write().get_mut(batch_id) {
            rows.remove(&key(collection, doc_id));
        }
        Ok(())
    }

    fn scan(
        &self,
        batch_id: &str,
        collection: &str,
        criteria: &Criteria,
    ) -> EngineResult<Vec<String>> {
        let batches = self.batches.read();
        let Some(rows) = batches.get(batch_id) else {
            return Ok(Vec::new());
        };
        Ok(rows
            .iter()
            .filter(|((c, _), content)| c == collection && criteria.matches(content))
            .map(|((_, id), _)| id.clone())
            .collect())
    }

    fn fetch(
        &self,
        batch_id: &str,
        collection: &str,
        ids: &[String],
    ) -> EngineResult<Vec<(String, Content)>> {
        let batches = self.batches.read();
        let Some(rows) = batches.get(batch_id) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| {
                rows.get(&key(collection, id))
                    .map(|content| (id.clone(), content.clone()))
            })
            .collect())
    }

    fn drop_batch(&self, batch_id: &str) -> EngineResult<()> {
        self.batches.write().remove(batch_id);
        Ok(())
    }
}
