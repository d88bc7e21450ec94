//! Document operations on one entity type.
//!
//! A [`Collection`] is a cheap handle pairing the store with a registered
//! [`EntityType`]. Every operation takes [`Options`]: the batch to stage in,
//! the caller's access policy, and the checks to run.
//!
//! ## Reads
//!
//! Reads resolve over the type and all its non-abstract subtypes. Criteria
//! that pin every key field become id lookups. Id lookups go through the
//! read cache (misses included) before the main engine. Other criteria use
//! the search engine when the main engine splits scan and fetch or a read
//! cache exists, unless the criteria fields form a direct-search set. Inside
//! a batch, staged rows take precedence over stored ones.
//!
//! ## Writes
//!
//! A direct write reaches the main engine, then refreshes the version token
//! (which drops the read cache entry), writes through to the search engine and
//! saves the log entry. A batched write is staged and returns
//! [`WriteOutcome::Staged`]; its effects follow at commit.

use crate::acl::AccessPolicy;
use crate::batch::Batch;
use crate::document::Document;
use crate::error::{DocError, DocResult};
use crate::gate::{authorized_fields, check_acl, check_update_acl};
use crate::logger::LogEntry;
use crate::registry::{DocumentStore, EntityType};
use crate::schema::SchemaMeta;
use docstore_codec::{path, Content, Value};
use docstore_engine::{
    AnalyticRequest, BackupMetadata, BackupOptions, Change, Criteria, Engine, EngineError, EngineTask,
    MemoryEngine, OpKind, Operation, Query, ReplicaOp, ReplicaResult,
};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Per-call options.
#[derive(Clone, Copy)]
pub struct Options<'a> {
    /// Batch to stage writes in and to overlay reads with.
    pub batch: Option<&'a Batch>,
    /// Caller capabilities. `None` deactivates authorization checks.
    pub acl: Option<&'a dyn AccessPolicy>,
    /// Run the type's validator on writes.
    pub validate: bool,
    /// Check unique sets on writes.
    pub check_unique: bool,
    /// Result limit for searches.
    pub limit: Option<usize>,
}

impl Default for Options<'_> {
    fn default() -> Self {
        Self {
            batch: None,
            acl: None,
            validate: true,
            check_unique: true,
            limit: None,
        }
    }
}

impl fmt::Debug for Options<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("batch", &self.batch.map(Batch::id))
            .field("acl", &self.acl.is_some())
            .field("validate", &self.validate)
            .field("check_unique", &self.check_unique)
            .field("limit", &self.limit)
            .finish()
    }
}

impl<'a> Options<'a> {
    /// Default options: no batch, no ACL, every check on.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages writes in `batch`.
    #[must_use]
    pub fn with_batch(mut self, batch: &'a Batch) -> Self {
        self.batch = Some(batch);
        self
    }

    /// Checks authorization against `acl`.
    #[must_use]
    pub fn with_acl(mut self, acl: &'a dyn AccessPolicy) -> Self {
        self.acl = Some(acl);
        self
    }

    /// Skips validation.
    #[must_use]
    pub fn without_validation(mut self) -> Self {
        self.validate = false;
        self
    }

    /// Skips unique checks.
    #[must_use]
    pub fn without_unique_check(mut self) -> Self {
        self.check_unique = false;
        self
    }

    /// Limits search results.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// What a read selects.
#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    /// Documents by id.
    Ids(Vec<String>),
    /// Documents matching criteria.
    Criteria(Criteria),
}

impl From<Criteria> for Selector {
    fn from(criteria: Criteria) -> Self {
        Self::Criteria(criteria)
    }
}

impl From<Vec<String>> for Selector {
    fn from(ids: Vec<String>) -> Self {
        Self::Ids(ids)
    }
}

impl From<&str> for Selector {
    fn from(id: &str) -> Self {
        Self::Ids(vec![id.to_string()])
    }
}

impl From<String> for Selector {
    fn from(id: String) -> Self {
        Self::Ids(vec![id])
    }
}

/// Where a write went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Applied to the main engine.
    Persisted,
    /// Staged in a batch.
    Staged,
}

/// Per-document result of a delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteResult {
    /// Collection (or type name when the type is unknown).
    pub collection: String,
    /// Document id.
    pub id: Option<String>,
    /// 200 deleted or absent, 202 staged, 403, 409, 422 or 500.
    pub status: u16,
    /// Failure message.
    pub message: Option<String>,
}

impl DeleteResult {
    fn new(collection: &str, id: Option<&str>, status: u16, message: Option<String>) -> Self {
        Self {
            collection: collection.to_string(),
            id: id.map(str::to_string),
            status,
            message,
        }
    }

    /// Result reporting an error.
    pub fn error(collection: &str, id: Option<&str>, error: &DocError) -> Self {
        Self::new(collection, id, error.status_code(), Some(error.to_string()))
    }

    /// Returns true for 200 and 202.
    pub fn is_success(&self) -> bool {
        matches!(self.status, 200 | 202)
    }
}

/// A document to replicate and the replication operation.
#[derive(Debug, Clone)]
pub struct ReplicaTask {
    /// Document to replicate.
    pub document: Document,
    /// Operation.
    pub op: ReplicaOp,
}

impl ReplicaTask {
    /// Creates a task.
    pub fn new(document: Document, op: ReplicaOp) -> Self {
        Self { document, op }
    }
}

/// Operations on one entity type.
#[derive(Clone)]
pub struct Collection<'s> {
    store: &'s DocumentStore,
    ty: Arc<EntityType>,
}

impl fmt::Debug for Collection<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("entity_type", &self.ty.name())
            .field("collection", &self.ty.collection())
            .finish()
    }
}

impl<'s> Collection<'s> {
    pub(crate) fn new(store: &'s DocumentStore, ty: Arc<EntityType>) -> Self {
        Self { store, ty }
    }

    fn sibling(&self, ty: Arc<EntityType>) -> Self {
        Self::new(self.store, ty)
    }

    /// The entity type.
    pub fn entity_type(&self) -> &Arc<EntityType> {
        &self.ty
    }

    /// Entity type name.
    pub fn name(&self) -> &str {
        self.ty.name()
    }

    fn engine(&self) -> &Arc<dyn Engine> {
        self.ty.engine()
    }

    fn members(&self) -> Vec<Self> {
        self.store
            .family(self.ty.name())
            .into_iter()
            .filter(|t| !t.schema().is_abstract())
            .map(|t| self.sibling(t))
            .collect()
    }

    fn check_type(&self, doc: &Document) -> DocResult<()> {
        if doc.entity_type() != self.ty.name() {
            return Err(DocError::schema(format!(
                "document of type {} handled as {}",
                doc.entity_type(),
                self.ty.name()
            )));
        }
        Ok(())
    }

    fn doc_id_of(&self, doc: &Document) -> DocResult<String> {
        doc.id()
            .map(str::to_string)
            .or_else(|| self.ty.schema().calculate_id(doc.data()))
            .ok_or_else(|| DocError::unprocessable("document has no id"))
    }

    // ---- logs and write-through ----

    fn generate_log(&self, doc: &Document, op: OpKind) -> Option<Box<dyn LogEntry>> {
        self.ty
            .logger()
            .map(|logger| logger.generate_log(doc, op, self.ty.log_content()))
    }

    fn save_log(&self, log: Option<Box<dyn LogEntry>>) {
        if let Some(log) = log {
            if let Err(e) = log.save() {
                warn!(entity_type = %self.ty.name(), error = %e, "log save failed");
            }
        }
    }

    fn after_write(&self, doc: &Document, op: OpKind, doc_id: &str, content: Option<&Content>) {
        self.ty.sync_after_write(doc_id, content);
        self.save_log(self.generate_log(doc, op));
    }

    fn feedback_sync(&self, doc: &mut Document) -> DocResult<()> {
        let Some(doc_id) = doc.id().map(str::to_string) else {
            return Ok(());
        };
        if let Some(content) = self.engine().get(self.ty.collection(), &doc_id)? {
            doc.replace_data(content);
            self.save_log(self.generate_log(doc, OpKind::Update));
        }
        Ok(())
    }

    // ---- raw reads ----

    fn fetch_stored(&self, ids: &[String]) -> DocResult<Vec<(String, Content)>> {
        let collection = self.ty.collection();
        let Some(cache) = self.ty.read_cache() else {
            return Ok(self.engine().fetch(collection, ids)?);
        };
        let mut known: HashMap<String, Option<Content>> = match cache.fetch(collection, ids) {
            Ok(entries) => entries.into_iter().collect(),
            Err(e) => {
                warn!(collection = %collection, error = %e, "read cache fetch failed");
                HashMap::new()
            }
        };
        let todo: Vec<String> = ids
            .iter()
            .filter(|id| !known.contains_key(*id))
            .cloned()
            .collect();
        if !todo.is_empty() {
            let mut fetched: HashMap<String, Content> =
                self.engine().fetch(collection, &todo)?.into_iter().collect();
            for doc_id in todo {
                let content = fetched.remove(&doc_id);
                if let Err(e) = cache.set(collection, &doc_id, content.clone()) {
                    warn!(collection = %collection, id = %doc_id, error = %e, "read cache write failed");
                }
                known.insert(doc_id, content);
            }
        }
        Ok(ids
            .iter()
            .filter_map(|id| {
                known
                    .remove(id)
                    .flatten()
                    .map(|content| (id.clone(), content))
            })
            .collect())
    }

    fn fetch_raw(&self, ids: &[String], batch: Option<&Batch>) -> DocResult<Vec<(String, Content)>> {
        let mut unique = HashSet::new();
        let ids: Vec<String> = ids
            .iter()
            .filter(|id| unique.insert(id.as_str()))
            .cloned()
            .collect();
        let collection = self.ty.collection();
        let mut results = Vec::new();
        let mut staged = HashSet::new();
        if let Some(batch) = batch {
            for (doc_id, content) in self.ty.space().fetch(batch.id(), collection, &ids)? {
                staged.insert(doc_id.clone());
                results.push((doc_id, content));
            }
            for (doc_id, _) in self.ty.delete_staging().fetch(batch.id(), collection, &ids)? {
                staged.insert(doc_id);
            }
        }
        let remaining: Vec<String> = ids.into_iter().filter(|id| !staged.contains(id)).collect();
        if !remaining.is_empty() {
            results.extend(self.fetch_stored(&remaining)?);
        }
        Ok(results)
    }

    fn fetch_one(&self, doc_id: &str, batch: Option<&Batch>) -> DocResult<Option<Content>> {
        Ok(self
            .fetch_raw(&[doc_id.to_string()], batch)?
            .into_iter()
            .next()
            .map(|(_, content)| content))
    }

    /// Ids staged by the batch in either staging engine, and the staged
    /// documents matching `query`.
    fn overlay(
        &self,
        batch: Option<&Batch>,
        query: &Query,
    ) -> DocResult<(HashSet<String>, Vec<(String, Content)>)> {
        let Some(batch) = batch else {
            return Ok((HashSet::new(), Vec::new()));
        };
        let collection = self.ty.collection();
        let all = Criteria::new();
        let mut staged: HashSet<String> = self
            .ty
            .space()
            .scan(batch.id(), collection, &all)?
            .into_iter()
            .collect();
        staged.extend(self.ty.delete_staging().scan(batch.id(), collection, &all)?);
        let matching = self.ty.space().scan(batch.id(), collection, &query.criteria)?;
        let docs = self
            .ty
            .space()
            .fetch(batch.id(), collection, &matching)?
            .into_iter()
            .filter(|(_, content)| query.matches(content))
            .collect();
        Ok((staged, docs))
    }

    fn key_lookup(&self, criteria: &Criteria) -> DocResult<Option<Vec<String>>> {
        let schema = self.ty.schema();
        if schema.key_fields().is_empty() {
            return Ok(None);
        }
        let Some(equalities) = criteria.equalities() else {
            return Ok(None);
        };
        let keys: BTreeSet<&str> = schema.key_fields().iter().map(String::as_str).collect();
        if equalities.len() != keys.len() || !equalities.keys().all(|k| keys.contains(k.as_str())) {
            return Ok(None);
        }
        schema.dict_to_id_list(&equalities).map(Some)
    }

    fn uses_search_engine(&self, criteria: &Criteria) -> bool {
        self.ty.search_engine().is_some()
            && (self.engine().capabilities().scan_and_fetch || self.ty.read_cache().is_some())
            && !self.ty.schema().is_direct_search(&criteria.fields())
    }

    fn search_raw(
        &self,
        criteria: &Criteria,
        acl_queries: Vec<Criteria>,
        batch: Option<&Batch>,
        limit: usize,
    ) -> DocResult<Vec<(String, Content)>> {
        let query = Query::new(criteria.clone()).with_acl_queries(acl_queries);
        if let Some(ids) = self.key_lookup(criteria)? {
            let mut found = self.fetch_raw(&ids, batch)?;
            found.retain(|(_, content)| query.matches(content));
            found.truncate(limit);
            return Ok(found);
        }

        let (staged, mut results) = self.overlay(batch, &query)?;
        let query = query.with_limit(limit.saturating_add(staged.len()));
        let collection = self.ty.collection();
        let stored = match self.ty.search_engine() {
            Some(search) if self.uses_search_engine(criteria) => {
                let ids = search.scan(collection, &query)?;
                self.fetch_stored(&ids)?
            }
            _ => self.engine().search(collection, &query)?,
        };
        results.extend(stored.into_iter().filter(|(id, _)| !staged.contains(id)));
        results.truncate(limit);
        Ok(results)
    }

    fn scan_ids(
        &self,
        criteria: &Criteria,
        acl_queries: Vec<Criteria>,
        batch: Option<&Batch>,
        limit: usize,
    ) -> DocResult<Vec<String>> {
        let query = Query::new(criteria.clone()).with_acl_queries(acl_queries);
        let (staged, overlay) = self.overlay(batch, &query)?;
        let query = query.with_limit(limit.saturating_add(staged.len()));
        let collection = self.ty.collection();
        let stored = match self.ty.search_engine() {
            Some(search) if !self.ty.schema().is_direct_search(&criteria.fields()) => {
                search.scan(collection, &query)?
            }
            _ => self.engine().scan(collection, &query)?,
        };
        let mut ids: Vec<String> = overlay.into_iter().map(|(id, _)| id).collect();
        ids.extend(stored.into_iter().filter(|id| !staged.contains(id)));
        ids.truncate(limit);
        Ok(ids)
    }

    fn acl_queries(
        &self,
        acl: Option<&dyn AccessPolicy>,
        ids: &[String],
        criteria: &Criteria,
    ) -> DocResult<Vec<Criteria>> {
        let Some(acl) = acl else {
            return Ok(Vec::new());
        };
        let (queries, message) = acl.search_conditions(self.ty.schema(), ids, criteria);
        queries.ok_or_else(|| DocError::authorization(message))
    }

    fn select(
        &self,
        selector: &Selector,
        options: Options<'_>,
        limit: usize,
    ) -> DocResult<Vec<(String, Content)>> {
        match selector {
            Selector::Ids(ids) => {
                let mut found = self.fetch_raw(ids, options.batch)?;
                found.truncate(limit);
                Ok(found)
            }
            Selector::Criteria(criteria) => {
                let queries = self.acl_queries(options.acl, &[], criteria)?;
                self.search_raw(criteria, queries, options.batch, limit)
            }
        }
    }

    /// Applies the per-record `read` check. Callers holding only field-group
    /// grants get the authorized fields; the id is dropped when a key field
    /// is not among them.
    fn authorize_read(
        &self,
        acl: Option<&dyn AccessPolicy>,
        doc_id: String,
        mut content: Content,
    ) -> Option<Document> {
        let schema = self.ty.schema();
        let mut doc_id = Some(doc_id);
        if !matches!(check_acl(schema, acl, "read", Some(&content), false), Ok(true)) {
            if schema.field_groups().is_empty() {
                return None;
            }
            let fields = authorized_fields(schema, acl, "read", &content);
            if fields.is_empty() {
                return None;
            }
            if schema.key_fields().iter().any(|k| !fields.contains(k)) {
                doc_id = None;
            }
            content.retain(|field, _| fields.contains(field));
        }
        Some(Document::from_content(self.ty.name(), doc_id, content))
    }

    /// Moves a stored document to the id derived from its key fields.
    fn migrate_id(&self, doc_id: String, content: &Content, batch: Option<&Batch>) -> DocResult<String> {
        let Some(calculated) = self.ty.schema().calculate_id(content) else {
            return Ok(doc_id);
        };
        if calculated == doc_id {
            return Ok(doc_id);
        }
        let collection = self.ty.collection();
        if let Some(batch) = batch {
            if self.ty.space().get(batch.id(), collection, &doc_id)?.is_some() {
                return Ok(doc_id);
            }
        }
        let moved = self
            .engine()
            .update_doc_id(collection, content, &doc_id, &calculated)?;
        if moved != calculated {
            return Err(DocError::unprocessable(format!(
                "engine moved {doc_id} to {moved} instead of {calculated}"
            )));
        }
        info!(entity_type = %self.ty.name(), old_id = %doc_id, new_id = %moved, "document id migrated");
        self.ty.sync_after_write(&doc_id, None);
        self.ty.sync_after_write(&moved, Some(content));
        Ok(moved)
    }

    // ---- checks ----

    fn check_unique(&self, content: &Content, doc_id: Option<&str>) -> DocResult<()> {
        for fields in self.ty.schema().uniques() {
            let present: Vec<(String, Value)> = fields
                .iter()
                .filter_map(|f| path::resolve(content, f).map(|v| (f.clone(), v.clone())))
                .collect();
            if present.is_empty() || present.iter().all(|(_, v)| v.is_blank()) {
                continue;
            }
            let criteria = Criteria::from_pairs(present);
            let found = self.search_raw(&criteria, Vec::new(), None, 2)?;
            if found.iter().any(|(other, _)| Some(other.as_str()) != doc_id) {
                return Err(DocError::conflict(format!(
                    "{}: unique constraint on [{}] violated",
                    self.ty.name(),
                    fields.join(",")
                )));
            }
        }
        Ok(())
    }

    fn needs_unique_check(&self, options: &Options<'_>) -> bool {
        options.check_unique
            && options.batch.is_none()
            && !self.engine().capabilities().unique_check
    }

    fn check_dependency(
        &self,
        old: &Content,
        new: Option<&Content>,
        batch: Option<&Batch>,
    ) -> DocResult<()> {
        if self.engine().capabilities().foreign_key_check {
            return Ok(());
        }
        for dependency in self.store.dependencies().dependents_of(self.ty.name()) {
            let Some(criteria) = dependency.query_for(old, new) else {
                continue;
            };
            let Ok(dependent) = self.store.collection(dependency.dependent()) else {
                debug!(
                    entity_type = %self.ty.name(),
                    dependent = %dependency.dependent(),
                    "dependent type not registered, skipped"
                );
                continue;
            };
            let options = Options {
                batch,
                limit: Some(1),
                ..Options::default()
            };
            if !dependent.objects(criteria.clone(), options)?.is_empty() {
                return Err(DocError::dependency(format!(
                    "{} is referenced by {} matching {criteria}",
                    self.ty.name(),
                    dependency.dependent()
                )));
            }
        }
        Ok(())
    }

    fn check_scope(&self, content: &Content) -> DocResult<()> {
        if self.engine().capabilities().scope_check {
            return Ok(());
        }
        self.ty.address().check_scope(content, self.engine().name())
    }

    // ---- document operations ----

    /// Saves a document: inserts it when it has no id or is not stored yet,
    /// replaces it otherwise.
    ///
    /// # Errors
    ///
    /// Fails on scope, authorization (`new` or `write`), validation, unique
    /// or dependency violations, and engine errors.
    pub fn save(&self, doc: &mut Document, options: Options<'_>) -> DocResult<WriteOutcome> {
        self.check_type(doc)?;
        let ty = &self.ty;
        let schema = ty.schema();
        if schema.is_abstract() {
            return Err(DocError::schema(format!("{} is abstract", schema.name())));
        }
        schema.apply_defaults(doc.data_mut());
        self.check_scope(doc.data())?;
        let action = if doc.id().is_some() { "write" } else { "new" };
        check_acl(schema, options.acl, action, Some(doc.data()), true)?;
        if options.validate {
            ty.validator().validate(schema, doc.data())?;
        }
        if self.needs_unique_check(&options) {
            self.check_unique(doc.data(), doc.id())?;
        }

        let given = doc.id().map(str::to_string);
        let saved = match &given {
            Some(doc_id) => self.fetch_one(doc_id, options.batch)?,
            None => None,
        };
        let collection = ty.collection().to_string();
        let content = ty.address().project(doc.data(), schema.key_fields());

        match (saved, given) {
            (Some(old), Some(doc_id)) => {
                self.check_dependency(&old, Some(doc.data()), options.batch)?;
                if let Some(batch) = options.batch {
                    batch.record_original(ty, &doc_id, Some(old))?;
                    let log = self.generate_log(doc, OpKind::Update);
                    batch.record_operation(
                        ty,
                        Operation::Set {
                            collection,
                            doc_id,
                            content,
                        },
                        log,
                    )?;
                    return Ok(WriteOutcome::Staged);
                }
                self.engine().set(&collection, &doc_id, content.clone())?;
                self.after_write(doc, OpKind::Update, &doc_id, Some(&content));
            }
            (_, given) => {
                let derived = schema.calculate_id(doc.data()).or(given);
                if let Some(batch) = options.batch {
                    let doc_id = derived.unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
                    doc.set_id(Some(doc_id.clone()));
                    let log = self.generate_log(doc, OpKind::Insert);
                    batch.record_operation(
                        ty,
                        Operation::Insert {
                            collection,
                            doc_id,
                            content,
                        },
                        log,
                    )?;
                    return Ok(WriteOutcome::Staged);
                }
                let doc_id = self
                    .engine()
                    .create(&collection, content.clone(), derived.as_deref())
                    .map_err(|e| match e {
                        EngineError::AlreadyExists { .. } => DocError::conflict(e.to_string()),
                        e => e.into(),
                    })?;
                if derived.as_deref() != Some(doc_id.as_str()) && !schema.key_fields().is_empty() {
                    match schema.id_to_dict(&doc_id) {
                        Ok(keys) => doc.data_mut().extend(keys),
                        Err(e) => {
                            debug!(entity_type = %schema.name(), id = %doc_id, error = %e, "engine id carries no key fields");
                        }
                    }
                }
                doc.set_id(Some(doc_id.clone()));
                self.after_write(doc, OpKind::Insert, &doc_id, Some(&content));
            }
        }

        if schema.engine_feedback() {
            self.feedback_sync(doc)?;
        }
        Ok(WriteOutcome::Persisted)
    }

    /// Applies field changes to a stored document.
    ///
    /// Changes on fields starting with `_`, unknown to the schema, or
    /// outside the catalog are ignored. Changing key fields is refused:
    /// delete and recreate the document instead.
    ///
    /// # Errors
    ///
    /// Fails when the document has no id or is not stored, on authorization,
    /// key-field change, scope, validation, unique or dependency violations,
    /// and engine errors.
    pub fn update(
        &self,
        doc: &mut Document,
        changes: &[Change],
        options: Options<'_>,
    ) -> DocResult<WriteOutcome> {
        self.check_type(doc)?;
        let ty = &self.ty;
        let schema = ty.schema();
        let collection = ty.collection().to_string();
        let doc_id = doc
            .id()
            .map(str::to_string)
            .ok_or_else(|| DocError::unprocessable("only saved documents can be updated"))?;
        let stored = self.fetch_one(&doc_id, options.batch)?.ok_or_else(|| {
            DocError::not_found(format!("{} {doc_id} does not exist", ty.name()))
        })?;

        let kept: Vec<Change> = changes
            .iter()
            .filter(|c| {
                let field = c.path();
                !field.starts_with('_') && schema.has_field(field) && ty.address().covers(field)
            })
            .cloned()
            .collect();
        check_update_acl(schema, options.acl, &stored, changes.iter().map(Change::path))?;

        let scratch = MemoryEngine::named("shadow");
        scratch.set(&collection, &doc_id, stored.clone())?;
        let shadow = scratch.update(&collection, &doc_id, &kept)?;
        if schema.calculate_id(&stored) != schema.calculate_id(&shadow) {
            return Err(DocError::unprocessable(
                "key fields can't be updated, delete and recreate the document",
            ));
        }

        check_update_acl(schema, options.acl, &shadow, changes.iter().map(Change::path))?;
        self.check_scope(&shadow)?;
        if options.validate {
            ty.validator().validate(schema, &shadow)?;
        }
        if self.needs_unique_check(&options) {
            self.check_unique(&shadow, Some(&doc_id))?;
        }
        self.check_dependency(&stored, Some(&shadow), options.batch)?;

        if let Some(batch) = options.batch {
            batch.record_original(ty, &doc_id, Some(stored))?;
            doc.replace_data(shadow);
            let log = self.generate_log(doc, OpKind::Update);
            batch.record_operation(
                ty,
                Operation::Update {
                    collection,
                    doc_id,
                    changes: kept,
                },
                log,
            )?;
            return Ok(WriteOutcome::Staged);
        }

        let updated = self.engine().update(&collection, &doc_id, &kept)?;
        doc.replace_data(updated.clone());
        self.after_write(doc, OpKind::Update, &doc_id, Some(&updated));
        if schema.engine_feedback() {
            self.feedback_sync(doc)?;
        }
        Ok(WriteOutcome::Persisted)
    }

    /// Deletes a document. Never fails: each outcome is a [`DeleteResult`].
    ///
    /// A missing document is a success. Denied deletes report 403, blocking
    /// dependents 409, staged deletes 202 and engine failures 500.
    pub fn delete(&self, doc: &Document, options: Options<'_>) -> Vec<DeleteResult> {
        let collection = self.ty.collection();
        if let Err(e) = self.check_type(doc) {
            return vec![DeleteResult::error(collection, doc.id(), &e)];
        }
        let Some(doc_id) = doc.id() else {
            return vec![DeleteResult::new(
                collection,
                None,
                422,
                Some("document has no id".to_string()),
            )];
        };
        let result = self
            .delete_by_id(doc, doc_id, options)
            .unwrap_or_else(|e| {
                warn!(entity_type = %self.ty.name(), id = %doc_id, error = %e, "delete failed");
                DeleteResult::error(collection, Some(doc_id), &e)
            });
        vec![result]
    }

    fn delete_by_id(&self, doc: &Document, doc_id: &str, options: Options<'_>) -> DocResult<DeleteResult> {
        let ty = &self.ty;
        let collection = ty.collection();
        let Some(stored) = self.fetch_one(doc_id, options.batch)? else {
            return Ok(DeleteResult::new(collection, Some(doc_id), 200, None));
        };
        if !check_acl(ty.schema(), options.acl, "delete", Some(&stored), false)? {
            return Ok(DeleteResult::new(
                collection,
                Some(doc_id),
                403,
                Some(format!("{} authorization check failed: delete", ty.name())),
            ));
        }
        self.check_dependency(&stored, None, options.batch)?;

        let log = self.generate_log(doc, OpKind::Delete);
        if let Some(batch) = options.batch {
            batch.record_original(ty, doc_id, Some(stored))?;
            batch.record_operation(
                ty,
                Operation::Delete {
                    collection: collection.to_string(),
                    doc_id: doc_id.to_string(),
                },
                log,
            )?;
            return Ok(DeleteResult::new(collection, Some(doc_id), 202, None));
        }
        self.engine().delete(collection, doc_id)?;
        ty.sync_after_write(doc_id, None);
        self.save_log(log);
        Ok(DeleteResult::new(collection, Some(doc_id), 200, None))
    }

    /// Loads exactly one document over the type and its subtypes.
    ///
    /// A stored id that no longer matches the key fields is migrated to the
    /// derived one. Returns `None` when nothing matches or the caller may not
    /// read the match.
    ///
    /// # Errors
    ///
    /// Returns [`DocError::Unprocessable`] when more than one document
    /// matches, authorization errors from search restrictions, and engine
    /// errors.
    pub fn load(
        &self,
        selector: impl Into<Selector>,
        options: Options<'_>,
    ) -> DocResult<Option<Document>> {
        let selector = selector.into();
        let mut found: Option<(Collection<'s>, String, Content)> = None;
        for member in self.members() {
            for (doc_id, content) in member.select(&selector, options, 2)? {
                if let Some((other, other_id, _)) = &found {
                    if other.ty.collection() == member.ty.collection() && *other_id == doc_id {
                        continue;
                    }
                    return Err(DocError::unprocessable(format!(
                        "more than one {} matches the selection",
                        self.ty.name()
                    )));
                }
                found = Some((member.clone(), doc_id, content));
            }
        }
        let Some((member, doc_id, content)) = found else {
            return Ok(None);
        };
        let doc_id = member.migrate_id(doc_id, &content, options.batch)?;
        Ok(member.authorize_read(options.acl, doc_id, content))
    }

    /// Loads every readable document over the type and its subtypes, up to
    /// the limit (the configured search limit by default).
    ///
    /// # Errors
    ///
    /// Authorization errors from search restrictions and engine errors.
    pub fn objects(
        &self,
        selector: impl Into<Selector>,
        options: Options<'_>,
    ) -> DocResult<Vec<Document>> {
        let selector = selector.into();
        let limit = options
            .limit
            .unwrap_or(self.store.config().search_limit);
        let mut seen = HashSet::new();
        let mut documents = Vec::new();
        for member in self.members() {
            if documents.len() >= limit {
                break;
            }
            for (doc_id, content) in member.select(&selector, options, limit - documents.len())? {
                if !seen.insert((member.ty.collection().to_string(), doc_id.clone())) {
                    continue;
                }
                if let Some(doc) = member.authorize_read(options.acl, doc_id, content) {
                    documents.push(doc);
                }
            }
        }
        documents.truncate(limit);
        Ok(documents)
    }

    /// Ids of matching documents over the type and its subtypes, up to the
    /// limit (the configured scan limit by default).
    ///
    /// # Errors
    ///
    /// Authorization errors from search restrictions and engine errors.
    pub fn object_ids(&self, criteria: &Criteria, options: Options<'_>) -> DocResult<Vec<String>> {
        let limit = options.limit.unwrap_or(self.store.config().scan_limit);
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for member in self.members() {
            if ids.len() >= limit {
                break;
            }
            let queries = member.acl_queries(options.acl, &[], criteria)?;
            for doc_id in member.scan_ids(criteria, queries, options.batch, limit - ids.len())? {
                if seen.insert((member.ty.collection().to_string(), doc_id.clone())) {
                    ids.push(doc_id);
                }
            }
        }
        ids.truncate(limit);
        Ok(ids)
    }

    /// Re-reads a document by id. A document that no longer exists (or has
    /// no id) is reset to an empty, unsaved state.
    ///
    /// # Errors
    ///
    /// See [`Collection::load`].
    pub fn reload(&self, doc: &mut Document, options: Options<'_>) -> DocResult<()> {
        let Some(doc_id) = doc.id().map(str::to_string) else {
            doc.reset();
            return Ok(());
        };
        match self.load(doc_id, options)? {
            Some(fresh) => {
                let fresh_id = fresh.id().map(str::to_string);
                doc.replace_data(fresh.into_data());
                doc.set_id(fresh_id);
            }
            None => doc.reset(),
        }
        Ok(())
    }

    /// Locks a document on the main engine. Returns false on timeout.
    ///
    /// # Errors
    ///
    /// Requires `write` authorization and an id.
    pub fn lock(&self, doc: &Document, timeout: Duration, options: Options<'_>) -> DocResult<bool> {
        check_acl(self.ty.schema(), options.acl, "write", Some(doc.data()), true)?;
        let doc_id = self.doc_id_of(doc)?;
        Ok(self.engine().lock(self.ty.collection(), &doc_id, timeout)?)
    }

    /// Releases a lock taken with [`Collection::lock`].
    ///
    /// # Errors
    ///
    /// Requires `write` authorization and an id.
    pub fn unlock(&self, doc: &Document, options: Options<'_>) -> DocResult<()> {
        check_acl(self.ty.schema(), options.acl, "write", Some(doc.data()), true)?;
        let doc_id = self.doc_id_of(doc)?;
        Ok(self.engine().unlock(self.ty.collection(), &doc_id)?)
    }

    // ---- collection operations ----

    fn drop_side_stores(&self) {
        let collection = self.ty.collection();
        for side in [self.ty.read_cache(), self.ty.search_engine()].into_iter().flatten() {
            if let Err(e) = side.drop_collection(collection) {
                warn!(collection = %collection, error = %e, "side store drop failed");
            }
        }
    }

    /// Creates the collection on the main engine.
    ///
    /// # Errors
    ///
    /// Requires `create` on the collection.
    pub fn create_collection(&self, options: Options<'_>) -> DocResult<()> {
        check_acl(self.ty.schema(), options.acl, "create", None, true)?;
        self.engine().create_collection(self.ty.collection())?;
        info!(entity_type = %self.ty.name(), collection = %self.ty.collection(), "collection created");
        Ok(())
    }

    /// Drops the collection, its version tokens and cached entries.
    ///
    /// # Errors
    ///
    /// Requires `drop` on the collection.
    pub fn drop_collection(&self, options: Options<'_>) -> DocResult<()> {
        check_acl(self.ty.schema(), options.acl, "drop", None, true)?;
        self.ty.versions().purge();
        self.engine().drop_collection(self.ty.collection())?;
        self.drop_side_stores();
        info!(entity_type = %self.ty.name(), collection = %self.ty.collection(), "collection dropped");
        Ok(())
    }

    /// Writes the collection to a backup file.
    ///
    /// # Errors
    ///
    /// Requires `drop` on the collection.
    pub fn backup(&self, backup: &BackupOptions, options: Options<'_>) -> DocResult<BackupMetadata> {
        check_acl(self.ty.schema(), options.acl, "drop", None, true)?;
        let metadata = self.engine().backup(self.ty.collection(), backup)?;
        info!(
            entity_type = %self.ty.name(),
            location = %backup.location.display(),
            records = metadata.record_count,
            "collection backed up"
        );
        Ok(metadata)
    }

    /// Replaces the collection with a backup file's content. Version tokens
    /// and cached entries are dropped.
    ///
    /// # Errors
    ///
    /// Requires `drop` on the collection.
    pub fn restore(&self, backup: &BackupOptions, options: Options<'_>) -> DocResult<usize> {
        check_acl(self.ty.schema(), options.acl, "drop", None, true)?;
        self.ty.versions().purge();
        let count = self.engine().restore(self.ty.collection(), backup)?;
        self.drop_side_stores();
        info!(entity_type = %self.ty.name(), records = count, "collection restored");
        Ok(count)
    }

    /// Deletes every listed document (up to the scan limit), concatenating
    /// the per-document results.
    ///
    /// # Errors
    ///
    /// Engine errors while listing.
    pub fn delete_all(&self, options: Options<'_>) -> DocResult<Vec<DeleteResult>> {
        let listing = Options {
            acl: None,
            limit: Some(self.store.config().scan_limit),
            ..options
        };
        let documents = self.objects(Criteria::new(), listing)?;
        Ok(documents
            .iter()
            .flat_map(|doc| self.store.delete(doc, options))
            .collect())
    }

    /// Replicates documents to the main engine in one engine call.
    ///
    /// Tasks for another type report 400, unauthorized tasks 403 and tasks
    /// without id 422; watch tasks are skipped. The engine's results follow.
    ///
    /// # Errors
    ///
    /// Engine errors from the replication call.
    pub fn replicate(&self, tasks: &[ReplicaTask], options: Options<'_>) -> DocResult<Vec<ReplicaResult>> {
        let ty = &self.ty;
        let schema = ty.schema();
        let mut results = Vec::new();
        let mut engine_tasks = Vec::new();
        for task in tasks {
            let doc = &task.document;
            let doc_id = doc
                .id()
                .map(str::to_string)
                .or_else(|| schema.calculate_id(doc.data()));
            if doc.entity_type() != ty.name() {
                results.push(ReplicaResult::now(doc_id, task.op, 400));
                continue;
            }
            let action = match task.op {
                ReplicaOp::Watch => continue,
                ReplicaOp::Insert | ReplicaOp::Load => "new",
                ReplicaOp::Update => "write",
                ReplicaOp::Delete => "delete",
            };
            if !check_acl(schema, options.acl, action, Some(doc.data()), false)? {
                results.push(ReplicaResult::now(doc_id, task.op, 403));
                continue;
            }
            let Some(doc_id) = doc_id else {
                results.push(ReplicaResult::now(None, task.op, 422));
                continue;
            };
            engine_tasks.push(EngineTask {
                id: doc_id,
                content: ty.address().project(doc.data(), schema.key_fields()),
                op: task.op,
            });
        }
        if engine_tasks.is_empty() {
            return Ok(results);
        }

        let applied = self.engine().replicate(ty.collection(), &engine_tasks)?;
        for result in applied.iter().filter(|r| r.status == 200) {
            let Some(doc_id) = &result.id else {
                continue;
            };
            let content = (result.op != ReplicaOp::Delete)
                .then(|| engine_tasks.iter().find(|t| &t.id == doc_id))
                .flatten()
                .map(|t| &t.content);
            ty.sync_after_write(doc_id, content);
        }
        debug!(entity_type = %ty.name(), tasks = engine_tasks.len(), "replicated");
        results.extend(applied);
        Ok(results)
    }

    // ---- versions and metadata ----

    /// Version token of a document.
    ///
    /// # Errors
    ///
    /// Fails on an empty id.
    pub fn version(&self, doc_id: &str) -> DocResult<String> {
        self.ty.versions().get(doc_id)
    }

    /// Forces a new (or the given) version token.
    ///
    /// # Errors
    ///
    /// Fails on an empty id.
    pub fn set_version(&self, doc_id: &str, token: Option<String>) -> DocResult<String> {
        self.ty.versions().set(doc_id, token)
    }

    /// Forgets every version token.
    pub fn purge_versions(&self) {
        self.ty.versions().purge();
    }

    /// Runs an analytic request on the main engine, restricted to what the
    /// caller may read.
    ///
    /// # Errors
    ///
    /// Authorization errors from search restrictions, and engine errors
    /// (engines without analytics refuse the request).
    pub fn analyze(&self, request: &AnalyticRequest, options: Options<'_>) -> DocResult<Vec<Content>> {
        let acl_queries = self.acl_queries(options.acl, &[], &request.filter)?;
        let collection = self.ty.collection();
        let model = self.engine().compile(collection, request, acl_queries)?;
        let rows = self.engine().analyze(collection, &model)?;
        debug!(entity_type = %self.ty.name(), rows = rows.len(), "analysis done");
        Ok(rows)
    }

    /// Type metadata.
    pub fn meta(&self) -> SchemaMeta {
        self.ty.meta()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::{Acl, AclItem};
    use crate::registry::Binding;
    use crate::schema::{FieldSpec, Schema};
    use docstore_engine::{CacheEngine, MemoryCache};

    fn order_schema() -> Schema {
        Schema::builder("Order")
            .field(FieldSpec::text("orderId"))
            .field(FieldSpec::text("customer"))
            .field(FieldSpec::integer("qty"))
            .field(FieldSpec::text("note"))
            .key_fields(["orderId"])
            .field_group("public", ["qty"])
            .supports("OrderLine", [("orderId", "orderId")])
            .build()
            .unwrap()
    }

    fn line_schema() -> Schema {
        Schema::builder("OrderLine")
            .field(FieldSpec::text("lineId"))
            .field(FieldSpec::text("orderId"))
            .key_fields(["lineId"])
            .build()
            .unwrap()
    }

    fn store() -> DocumentStore {
        let store = DocumentStore::in_memory();
        store.register(order_schema()).unwrap();
        store.register(line_schema()).unwrap();
        store
    }

    fn order(id: &str, qty: i64) -> Document {
        Document::new("Order")
            .with("orderId", id)
            .with("customer", "c1")
            .with("qty", qty)
    }

    #[test]
    fn save_load_delete_twice() {
        let store = store();
        let orders = store.collection("Order").unwrap();
        let mut doc = order("A1", 1);
        assert_eq!(orders.save(&mut doc, Options::new()).unwrap(), WriteOutcome::Persisted);
        assert_eq!(doc.id(), Some("A1"));

        let loaded = orders.load("A1", Options::new()).unwrap().unwrap();
        assert_eq!(loaded.get("qty"), Some(&Value::Integer(1)));

        for _ in 0..2 {
            let results = orders.delete(&loaded, Options::new());
            assert_eq!(results.len(), 1);
            assert_eq!(results[0].id.as_deref(), Some("A1"));
            assert_eq!(results[0].status, 200);
        }
        assert!(orders.load("A1", Options::new()).unwrap().is_none());
    }

    #[test]
    fn duplicate_key_conflicts() {
        let store = store();
        let orders = store.collection("Order").unwrap();
        orders.save(&mut order("A1", 1), Options::new()).unwrap();
        assert!(matches!(
            orders.save(&mut order("A1", 2), Options::new()),
            Err(DocError::Conflict { .. })
        ));
    }

    #[test]
    fn load_by_key_criteria() {
        let store = store();
        let orders = store.collection("Order").unwrap();
        orders.save(&mut order("A1", 1), Options::new()).unwrap();
        orders.save(&mut order("A2", 2), Options::new()).unwrap();

        let doc = orders
            .load(Criteria::new().eq("orderId", "A2"), Options::new())
            .unwrap()
            .unwrap();
        assert_eq!(doc.id(), Some("A2"));
        assert!(matches!(
            orders.load(Criteria::new().eq("customer", "c1"), Options::new()),
            Err(DocError::Unprocessable { .. })
        ));
        assert_eq!(
            orders
                .objects(Criteria::new().gt("qty", 1i64), Options::new())
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn update_applies_changes_and_refreshes_version() {
        let store = store();
        let orders = store.collection("Order").unwrap();
        let mut doc = order("A1", 1);
        orders.save(&mut doc, Options::new()).unwrap();
        let before = orders.version("A1").unwrap();

        orders
            .update(
                &mut doc,
                &[Change::set("qty", 7i64), Change::set("_hidden", 1i64)],
                Options::new(),
            )
            .unwrap();
        assert_eq!(doc.get("qty"), Some(&Value::Integer(7)));
        assert!(doc.get("_hidden").is_none());
        assert_ne!(orders.version("A1").unwrap(), before);
    }

    #[test]
    fn key_field_update_is_refused() {
        let store = store();
        let orders = store.collection("Order").unwrap();
        let mut doc = order("A1", 1);
        orders.save(&mut doc, Options::new()).unwrap();
        assert!(matches!(
            orders.update(&mut doc, &[Change::set("orderId", "B1")], Options::new()),
            Err(DocError::Unprocessable { .. })
        ));
    }

    #[test]
    fn field_group_update_authorization() {
        let store = store();
        let orders = store.collection("Order").unwrap();
        let mut doc = order("A1", 1);
        orders.save(&mut doc, Options::new()).unwrap();

        let acl = Acl::new(vec![AclItem::new("Order/*", "write.public")]);
        orders
            .update(&mut doc, &[Change::set("qty", 2i64)], Options::new().with_acl(&acl))
            .unwrap();
        assert!(matches!(
            orders.update(
                &mut doc,
                &[Change::set("qty", 3i64), Change::set("note", "x")],
                Options::new().with_acl(&acl)
            ),
            Err(DocError::Authorization { .. })
        ));
    }

    #[test]
    fn field_group_read_truncates() {
        let store = store();
        let orders = store.collection("Order").unwrap();
        orders.save(&mut order("A1", 4), Options::new()).unwrap();

        let acl = Acl::new(vec![AclItem::new("Order/*", "read.public")]);
        let doc = orders
            .load("A1", Options::new().with_acl(&acl))
            .unwrap()
            .unwrap();
        assert_eq!(doc.id(), None);
        assert_eq!(doc.get("qty"), Some(&Value::Integer(4)));
        assert!(doc.get("customer").is_none());

        let nobody = Acl::new(vec![AclItem::new("Customer/*", "read")]);
        assert!(orders
            .load("A1", Options::new().with_acl(&nobody))
            .unwrap()
            .is_none());
    }

    #[test]
    fn dependency_blocks_delete_until_dependent_removed() {
        let store = store();
        let orders = store.collection("Order").unwrap();
        let lines = store.collection("OrderLine").unwrap();
        let mut doc = order("A1", 1);
        orders.save(&mut doc, Options::new()).unwrap();
        let mut line = Document::new("OrderLine")
            .with("lineId", "L1")
            .with("orderId", "A1");
        lines.save(&mut line, Options::new()).unwrap();

        let blocked = orders.delete(&doc, Options::new());
        assert_eq!(blocked[0].status, 409);
        assert!(blocked[0].message.as_deref().unwrap().contains("OrderLine"));

        assert_eq!(lines.delete(&line, Options::new())[0].status, 200);
        assert_eq!(orders.delete(&doc, Options::new())[0].status, 200);
    }

    #[test]
    fn unauthorized_delete_reports_403() {
        let store = store();
        let orders = store.collection("Order").unwrap();
        let mut doc = order("A1", 1);
        orders.save(&mut doc, Options::new()).unwrap();
        let acl = Acl::new(vec![AclItem::new("Order/*", "read")]);
        assert_eq!(orders.delete(&doc, Options::new().with_acl(&acl))[0].status, 403);
        assert_eq!(orders.delete(&Document::new("Order"), Options::new())[0].status, 422);
    }

    #[test]
    fn batched_writes_are_visible_through_the_batch_only() {
        let store = store();
        let orders = store.collection("Order").unwrap();
        let batch = store.batch();
        let mut doc = order("A1", 1);
        let staged = orders
            .save(&mut doc, Options::new().with_batch(&batch))
            .unwrap();
        assert_eq!(staged, WriteOutcome::Staged);

        assert!(orders.load("A1", Options::new()).unwrap().is_none());
        assert!(orders
            .load("A1", Options::new().with_batch(&batch))
            .unwrap()
            .is_some());

        assert!(batch.commit(true).0);
        assert!(orders.load("A1", Options::new()).unwrap().is_some());
    }

    #[test]
    fn read_cache_is_filled_then_invalidated_by_writes() {
        let store = DocumentStore::in_memory();
        let cache = Arc::new(MemoryCache::new());
        store
            .register_with(
                order_schema(),
                Binding::new().read_cache(cache.clone() as Arc<dyn CacheEngine>),
            )
            .unwrap();
        let orders = store.collection("Order").unwrap();
        let mut doc = order("A1", 1);
        orders.save(&mut doc, Options::new()).unwrap();
        assert!(cache.entry("Order", "A1").is_none());

        orders.load("A1", Options::new()).unwrap();
        assert!(cache.entry("Order", "A1").unwrap().is_some());
        orders.load("B9", Options::new()).unwrap();
        assert_eq!(cache.entry("Order", "B9"), Some(None));

        orders
            .update(&mut doc, &[Change::set("qty", 2i64)], Options::new())
            .unwrap();
        assert!(cache.entry("Order", "A1").is_none());
    }

    #[test]
    fn replicate_reports_per_task_status() {
        let store = store();
        let orders = store.collection("Order").unwrap();
        let mut stray = Document::new("OrderLine").with("lineId", "L1");
        stray.set_id(Some("L1".into()));
        let tasks = vec![
            ReplicaTask::new(order("A1", 1), ReplicaOp::Insert),
            ReplicaTask::new(order("A2", 1), ReplicaOp::Watch),
            ReplicaTask::new(stray, ReplicaOp::Insert),
        ];
        let results = orders.replicate(&tasks, Options::new()).unwrap();
        let statuses: Vec<u16> = results.iter().map(|r| r.status).collect();
        assert_eq!(statuses, vec![400, 200]);
        assert!(orders.load("A1", Options::new()).unwrap().is_some());
    }

    #[test]
    fn collection_operations_need_privileges() {
        let store = store();
        let orders = store.collection("Order").unwrap();
        let reader = Acl::new(vec![AclItem::new("Order/*", "read")]);
        assert!(matches!(
            orders.drop_collection(Options::new().with_acl(&reader)),
            Err(DocError::Authorization { .. })
        ));
        let admin = Acl::new(vec![AclItem::new("Order/*", "*")]);
        orders.create_collection(Options::new().with_acl(&admin)).unwrap();
        orders.drop_collection(Options::new().with_acl(&admin)).unwrap();
    }
}
