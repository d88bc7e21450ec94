//! Fault injection.
//!
//! [`FlakyEngine`] wraps a [`MemoryEngine`] and fails selected calls on
//! demand, so tests can drive the error paths of the document layer.

use docstore_codec::Content;
use docstore_engine::{
    AnalyticModel, AnalyticRequest, BackupMetadata, BackupOptions, BatchOutcome, Capabilities,
    Change, Criteria, Engine, EngineError, EngineResult, EngineTask, MemoryEngine, Operation,
    Originals, Query, ReplicaResult,
};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

/// Calls that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// `batch` reports failure without touching storage.
    Batch,
    /// `create`, `set`, `update` and `delete` return a backend error.
    Writes,
    /// `get`, `fetch`, `scan` and `search` return a backend error.
    Reads,
}

/// A [`MemoryEngine`] with switchable failures.
#[derive(Debug)]
pub struct FlakyEngine {
    inner: MemoryEngine,
    fail_batch: AtomicBool,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    batches: AtomicUsize,
    paused: Mutex<bool>,
    resumed: Condvar,
}

impl Default for FlakyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FlakyEngine {
    /// Creates an engine with no fault armed.
    pub fn new() -> Self {
        Self::wrap(MemoryEngine::named("flaky"))
    }

    /// Wraps an existing memory engine.
    pub fn wrap(inner: MemoryEngine) -> Self {
        Self {
            inner,
            fail_batch: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            batches: AtomicUsize::new(0),
            paused: Mutex::new(false),
            resumed: Condvar::new(),
        }
    }

    fn switch(&self, fault: Fault) -> &AtomicBool {
        match fault {
            Fault::Batch => &self.fail_batch,
            Fault::Writes => &self.fail_writes,
            Fault::Reads => &self.fail_reads,
        }
    }

    /// Arms a fault.
    pub fn fail(&self, fault: Fault) {
        self.switch(fault).store(true, Ordering::SeqCst);
    }

    /// Disarms a fault.
    pub fn heal(&self, fault: Fault) {
        self.switch(fault).store(false, Ordering::SeqCst);
    }

    /// Disarms every fault.
    pub fn heal_all(&self) {
        for fault in [Fault::Batch, Fault::Writes, Fault::Reads] {
            self.heal(fault);
        }
    }

    /// The wrapped engine.
    pub fn inner(&self) -> &MemoryEngine {
        &self.inner
    }

    /// Holds every `batch` call, after it is counted, until
    /// [`FlakyEngine::resume_batches`].
    pub fn pause_batches(&self) {
        *self.paused.lock() = true;
    }

    /// Lets held `batch` calls proceed.
    pub fn resume_batches(&self) {
        *self.paused.lock() = false;
        self.resumed.notify_all();
    }

    /// Number of `batch` calls received.
    pub fn batch_calls(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    fn guard(&self, fault: Fault, operation: &str) -> EngineResult<()> {
        if self.switch(fault).load(Ordering::SeqCst) {
            debug!(?fault, operation, "injecting engine failure");
            Err(EngineError::backend(format!("injected {operation} failure")))
        } else {
            Ok(())
        }
    }
}

impl Engine for FlakyEngine {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    fn create(&self, collection: &str, content: Content, doc_id: Option<&str>) -> EngineResult<String> {
        self.guard(Fault::Writes, "create")?;
        self.inner.create(collection, content, doc_id)
    }

    fn get(&self, collection: &str, doc_id: &str) -> EngineResult<Option<Content>> {
        self.guard(Fault::Reads, "get")?;
        self.inner.get(collection, doc_id)
    }

    fn set(&self, collection: &str, doc_id: &str, content: Content) -> EngineResult<String> {
        self.guard(Fault::Writes, "set")?;
        self.inner.set(collection, doc_id, content)
    }

    fn update(&self, collection: &str, doc_id: &str, changes: &[Change]) -> EngineResult<Content> {
        self.guard(Fault::Writes, "update")?;
        self.inner.update(collection, doc_id, changes)
    }

    fn delete(&self, collection: &str, doc_id: &str) -> EngineResult<()> {
        self.guard(Fault::Writes, "delete")?;
        self.inner.delete(collection, doc_id)
    }

    fn scan(&self, collection: &str, query: &Query) -> EngineResult<Vec<String>> {
        self.guard(Fault::Reads, "scan")?;
        self.inner.scan(collection, query)
    }

    fn fetch(&self, collection: &str, ids: &[String]) -> EngineResult<Vec<(String, Content)>> {
        self.guard(Fault::Reads, "fetch")?;
        self.inner.fetch(collection, ids)
    }

    fn search(&self, collection: &str, query: &Query) -> EngineResult<Vec<(String, Content)>> {
        self.guard(Fault::Reads, "search")?;
        self.inner.search(collection, query)
    }

    fn update_doc_id(
        &self,
        collection: &str,
        content: &Content,
        old_id: &str,
        new_id: &str,
    ) -> EngineResult<String> {
        self.guard(Fault::Writes, "update_doc_id")?;
        self.inner.update_doc_id(collection, content, old_id, new_id)
    }

    fn replicate(&self, collection: &str, tasks: &[EngineTask]) -> EngineResult<Vec<ReplicaResult>> {
        self.guard(Fault::Writes, "replicate")?;
        self.inner.replicate(collection, tasks)
    }

    fn compile(
        &self,
        collection: &str,
        request: &AnalyticRequest,
        acl_queries: Vec<Criteria>,
    ) -> EngineResult<AnalyticModel> {
        self.inner.compile(collection, request, acl_queries)
    }

    fn analyze(&self, collection: &str, model: &AnalyticModel) -> EngineResult<Vec<Content>> {
        self.guard(Fault::Reads, "analyze")?;
        self.inner.analyze(collection, model)
    }

    fn lock(&self, collection: &str, doc_id: &str, timeout: Duration) -> EngineResult<bool> {
        self.inner.lock(collection, doc_id, timeout)
    }

    fn unlock(&self, collection: &str, doc_id: &str) -> EngineResult<()> {
        self.inner.unlock(collection, doc_id)
    }

    fn batch(&self, operations: &[Operation], originals: &Originals) -> BatchOutcome {
        self.batches.fetch_add(1, Ordering::SeqCst);
        let mut paused = self.paused.lock();
        while *paused {
            self.resumed.wait(&mut paused);
        }
        drop(paused);
        if self.fail_batch.load(Ordering::SeqCst) {
            debug!(operations = operations.len(), "injecting batch failure");
            return BatchOutcome::failed("injected batch failure");
        }
        self.inner.batch(operations, originals)
    }

    fn backup(&self, collection: &str, options: &BackupOptions) -> EngineResult<BackupMetadata> {
        self.guard(Fault::Reads, "backup")?;
        self.inner.backup(collection, options)
    }

    fn restore(&self, collection: &str, options: &BackupOptions) -> EngineResult<usize> {
        self.guard(Fault::Writes, "restore")?;
        self.inner.restore(collection, options)
    }

    fn drop_collection(&self, collection: &str) -> EngineResult<()> {
        self.guard(Fault::Writes, "drop_collection")?;
        self.inner.drop_collection(collection)
    }

    fn create_collection(&self, collection: &str) -> EngineResult<()> {
        self.inner.create_collection(collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn faults_toggle() {
        let engine = FlakyEngine::new();
        engine.set("orders", "A1", Content::new()).unwrap();

        engine.fail(Fault::Reads);
        assert!(engine.get("orders", "A1").is_err());
        engine.set("orders", "A2", Content::new()).unwrap();

        engine.fail(Fault::Writes);
        assert!(engine.delete("orders", "A1").is_err());

        engine.heal_all();
        assert!(engine.get("orders", "A1").unwrap().is_some());
    }

    #[test]
    fn failed_batch_is_counted_and_applies_nothing() {
        let engine = FlakyEngine::new();
        engine.fail(Fault::Batch);
        let ops = vec![Operation::Delete {
            collection: "orders".into(),
            doc_id: "A1".into(),
        }];
        let outcome = engine.batch(&ops, &Originals::new());
        assert!(!outcome.success);
        assert_eq!(engine.batch_calls(), 1);
    }
}
