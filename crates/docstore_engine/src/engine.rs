//! The engine contract.

use crate::analytic::{AnalyticModel, AnalyticRequest};
use crate::backup::{BackupFile, BackupMetadata, BackupOptions};
use crate::change::Change;
use crate::error::{EngineError, EngineResult};
use crate::operation::{BatchOutcome, Operation, Originals};
use crate::query::{Criteria, Query};
use crate::replica::{EngineTask, ReplicaOp, ReplicaResult};
use docstore_codec::Content;
use std::time::Duration;

/// What an engine enforces by itself.
///
/// The document layer skips the checks an engine already performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// The engine rejects unique-constraint violations.
    pub unique_check: bool,
    /// The engine enforces foreign keys between collections.
    pub foreign_key_check: bool,
    /// The engine enforces row scope constraints.
    pub scope_check: bool,
    /// `scan` returns ids cheaply and documents should be fetched separately.
    pub scan_and_fetch: bool,
}

/// A storage backend for documents.
///
/// Every call is addressed by collection name. Content is the stored form of
/// a document (its catalog projection); ids are strings.
///
/// # Invariants
///
/// - `create` returns the id the document is stored under. When `doc_id` is
///   given the engine must use it unless it generates key fields itself.
/// - `batch` is all-or-nothing: on failure no operation remains visible.
/// - Implementations must be `Send + Sync`.
pub trait Engine: Send + Sync {
    /// Short engine name used in logs and errors.
    fn name(&self) -> &str;

    /// Checks the engine enforces on its own.
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// Inserts a document and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyExists`] if the id is taken.
    fn create(
        &self,
        collection: &str,
        content: Content,
        doc_id: Option<&str>,
    ) -> EngineResult<String>;

    /// Reads one document.
    fn get(&self, collection: &str, doc_id: &str) -> EngineResult<Option<Content>>;

    /// Creates or replaces a document and returns its id.
    fn set(&self, collection: &str, doc_id: &str, content: Content) -> EngineResult<String>;

    /// Applies field changes and returns the resulting document.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the document does not exist.
    fn update(&self, collection: &str, doc_id: &str, changes: &[Change])
        -> EngineResult<Content>;

    /// Deletes a document. Deleting a missing document is not an error.
    fn delete(&self, collection: &str, doc_id: &str) -> EngineResult<()>;

    /// Returns the ids of matching documents.
    fn scan(&self, collection: &str, query: &Query) -> EngineResult<Vec<String>>;

    /// Reads documents by id, skipping missing ones, in request order.
    fn fetch(&self, collection: &str, ids: &[String]) -> EngineResult<Vec<(String, Content)>>;

    /// Returns matching documents.
    fn search(&self, collection: &str, query: &Query) -> EngineResult<Vec<(String, Content)>> {
        let ids = self.scan(collection, query)?;
        self.fetch(collection, &ids)
    }

    /// Moves a document to a new id, returning the id it now lives under.
    fn update_doc_id(
        &self,
        collection: &str,
        content: &Content,
        old_id: &str,
        new_id: &str,
    ) -> EngineResult<String> {
        self.set(collection, new_id, content.clone())?;
        self.delete(collection, old_id)?;
        Ok(new_id.to_string())
    }

    /// Applies replication tasks and reports one result per task.
    fn replicate(
        &self,
        collection: &str,
        tasks: &[EngineTask],
    ) -> EngineResult<Vec<ReplicaResult>> {
        let results = tasks
            .iter()
            .filter(|task| task.op != ReplicaOp::Watch)
            .map(|task| {
                let applied = match task.op {
                    ReplicaOp::Delete => self.delete(collection, &task.id),
                    _ => self
                        .set(collection, &task.id, task.content.clone())
                        .map(|_| ()),
                };
                let status = if applied.is_ok() { 200 } else { 500 };
                ReplicaResult::now(Some(task.id.clone()), task.op, status)
            })
            .collect();
        Ok(results)
    }

    /// Compiles an analytic request. `acl_queries` are the caller's privilege
    /// restrictions; when non-empty a document must match one of them.
    fn compile(
        &self,
        collection: &str,
        request: &AnalyticRequest,
        acl_queries: Vec<Criteria>,
    ) -> EngineResult<AnalyticModel> {
        let _ = (collection, request, acl_queries);
        Err(EngineError::unsupported(self.name(), "compile"))
    }

    /// Runs a compiled analytic request and returns one row per group.
    fn analyze(&self, collection: &str, model: &AnalyticModel) -> EngineResult<Vec<Content>> {
        let _ = (collection, model);
        Err(EngineError::unsupported(self.name(), "analyze"))
    }

    /// Locks a document, waiting at most `timeout`. Returns false on timeout.
    fn lock(&self, collection: &str, doc_id: &str, timeout: Duration) -> EngineResult<bool> {
        let _ = (collection, doc_id, timeout);
        Err(EngineError::unsupported(self.name(), "lock"))
    }

    /// Releases a lock taken with [`Engine::lock`].
    fn unlock(&self, collection: &str, doc_id: &str) -> EngineResult<()> {
        let _ = (collection, doc_id);
        Err(EngineError::unsupported(self.name(), "unlock"))
    }

    /// Applies operations atomically, in order.
    ///
    /// `originals` holds the pre-images recorded while the batch was built.
    /// Engines that can capture their own state at apply time should roll
    /// back from that instead, since a pre-image can be older than a write
    /// made outside the batch.
    fn batch(&self, operations: &[Operation], originals: &Originals) -> BatchOutcome;

    /// Writes every document of a collection to a backup file.
    fn backup(&self, collection: &str, options: &BackupOptions) -> EngineResult<BackupMetadata> {
        let documents = self.search(collection, &Query::default())?;
        BackupFile::new(collection, documents).write(options)
    }

    /// Replaces a collection with the content of a backup file.
    ///
    /// Returns the number of restored documents.
    fn restore(&self, collection: &str, options: &BackupOptions) -> EngineResult<usize> {
        let file = BackupFile::read(options)?;
        self.drop_collection(collection)?;
        self.create_collection(collection)?;
        let count = file.documents.len();
        for (doc_id, content) in file.documents {
            self.set(collection, &doc_id, content)?;
        }
        Ok(count)
    }

    /// Removes a collection and all its documents.
    fn drop_collection(&self, collection: &str) -> EngineResult<()>;

    /// Creates an empty collection. Creating an existing one is a no-op.
    fn create_collection(&self, collection: &str) -> EngineResult<()>;
}
