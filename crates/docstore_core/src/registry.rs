//! Entity type registration and engine bindings.
//!
//! The [`DocumentStore`] owns every registered [`EntityType`]: its schema,
//! the engines it is bound to, and its per-type mutable state (version
//! table, replica engines). State is built at registration and reset
//! explicitly with [`DocumentStore::reset`].

use crate::address::EngineAddress;
use crate::batch::Batch;
use crate::collection::{Collection, DeleteResult, Options, WriteOutcome};
use crate::config::StoreConfig;
use crate::dependency::DependencyRegistry;
use crate::document::Document;
use crate::error::{DocError, DocResult};
use crate::logger::DocLogger;
use crate::schema::{Schema, SchemaMeta, SchemaValidator, Validator};
use crate::version::VersionRegistry;
use docstore_codec::Content;
use docstore_engine::{CacheEngine, Change, Engine, MemoryEngine, MemoryStaging, StagingEngine};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Engines and collaborators bound to an entity type at registration.
///
/// Unset entries are inherited from the parent type, then from the store.
#[derive(Default, Clone)]
pub struct Binding {
    engine: Option<Arc<dyn Engine>>,
    address: Option<EngineAddress>,
    space: Option<Arc<dyn StagingEngine>>,
    delete: Option<Arc<dyn StagingEngine>>,
    read_cache: Option<Arc<dyn CacheEngine>>,
    search_engine: Option<Arc<dyn CacheEngine>>,
    logger: Option<Arc<dyn DocLogger>>,
    validator: Option<Arc<dyn Validator>>,
    log_content: Option<bool>,
    version_table_size: Option<usize>,
}

impl Binding {
    /// Creates an empty binding.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Main engine.
    #[must_use]
    pub fn engine(mut self, engine: Arc<dyn Engine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Address on the main engine.
    #[must_use]
    pub fn address(mut self, address: EngineAddress) -> Self {
        self.address = Some(address);
        self
    }

    /// Staging engines for batched writes and deletes.
    #[must_use]
    pub fn staging(mut self, space: Arc<dyn StagingEngine>, delete: Arc<dyn StagingEngine>) -> Self {
        self.space = Some(space);
        self.delete = Some(delete);
        self
    }

    /// Read cache.
    #[must_use]
    pub fn read_cache(mut self, cache: Arc<dyn CacheEngine>) -> Self {
        self.read_cache = Some(cache);
        self
    }

    /// Search engine.
    #[must_use]
    pub fn search_engine(mut self, engine: Arc<dyn CacheEngine>) -> Self {
        self.search_engine = Some(engine);
        self
    }

    /// Change logger.
    #[must_use]
    pub fn logger(mut self, logger: Arc<dyn DocLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Content validator.
    #[must_use]
    pub fn validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Whether log entries carry content.
    #[must_use]
    pub fn log_content(mut self, value: bool) -> Self {
        self.log_content = Some(value);
        self
    }

    /// Version table capacity.
    #[must_use]
    pub fn version_table_size(mut self, size: usize) -> Self {
        self.version_table_size = Some(size);
        self
    }
}

/// A registered entity type.
pub struct EntityType {
    schema: Schema,
    collection: String,
    engine: Arc<dyn Engine>,
    address: EngineAddress,
    space: Arc<dyn StagingEngine>,
    delete: Arc<dyn StagingEngine>,
    read_cache: Option<Arc<dyn CacheEngine>>,
    search_engine: Option<Arc<dyn CacheEngine>>,
    logger: Option<Arc<dyn DocLogger>>,
    validator: Arc<dyn Validator>,
    log_content: bool,
    versions: VersionRegistry,
    replicas: RwLock<BTreeMap<String, Arc<dyn Engine>>>,
}

impl fmt::Debug for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityType")
            .field("name", &self.schema.name())
            .field("collection", &self.collection)
            .field("engine", &self.engine.name())
            .field("read_cache", &self.read_cache.is_some())
            .field("search_engine", &self.search_engine.is_some())
            .field("versions", &self.versions)
            .finish_non_exhaustive()
    }
}

impl EntityType {
    /// Entity type name.
    pub fn name(&self) -> &str {
        self.schema.name()
    }

    /// Declaration.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Collection on the main engine.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Main engine.
    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    /// Address on the main engine.
    pub fn address(&self) -> &EngineAddress {
        &self.address
    }

    /// Staging engine for batched inserts and updates.
    pub fn space(&self) -> &Arc<dyn StagingEngine> {
        &self.space
    }

    /// Staging engine for batched deletes.
    pub fn delete_staging(&self) -> &Arc<dyn StagingEngine> {
        &self.delete
    }

    /// Read cache, if any.
    pub fn read_cache(&self) -> Option<&Arc<dyn CacheEngine>> {
        self.read_cache.as_ref()
    }

    /// Search engine, if any.
    pub fn search_engine(&self) -> Option<&Arc<dyn CacheEngine>> {
        self.search_engine.as_ref()
    }

    /// Change logger, if any.
    pub fn logger(&self) -> Option<&Arc<dyn DocLogger>> {
        self.logger.as_ref()
    }

    /// Content validator.
    pub fn validator(&self) -> &Arc<dyn Validator> {
        &self.validator
    }

    /// Whether log entries carry content.
    pub fn log_content(&self) -> bool {
        self.log_content
    }

    /// Version table.
    pub fn versions(&self) -> &VersionRegistry {
        &self.versions
    }

    /// Registers a named replica engine.
    pub fn set_replica_engine(&self, name: impl Into<String>, engine: Arc<dyn Engine>) {
        self.replicas.write().insert(name.into(), engine);
    }

    /// Named replica engines.
    pub fn replica_engines(&self) -> BTreeMap<String, Arc<dyn Engine>> {
        self.replicas.read().clone()
    }

    /// Metadata.
    pub fn meta(&self) -> SchemaMeta {
        self.schema.meta(&self.collection)
    }

    /// Drops the per-type mutable state.
    pub fn reset(&self) {
        self.versions.purge();
        self.replicas.write().clear();
    }

    /// Brings caches and the version table in line after a write reached
    /// the main engine. `content` is the stored document, `None` after a
    /// delete.
    ///
    /// The read cache entry is invalidated, through the version table, and
    /// refilled by the next read. The search engine is written through.
    pub(crate) fn sync_after_write(&self, doc_id: &str, content: Option<&Content>) {
        if let Err(e) = self.versions.set(doc_id, None) {
            warn!(entity_type = %self.name(), id = %doc_id, error = %e, "version refresh failed");
        }
        if let Some(search) = &self.search_engine {
            let synced = match content {
                Some(content) => search.set(&self.collection, doc_id, Some(content.clone())),
                None => search.delete(&self.collection, doc_id),
            };
            if let Err(e) = synced {
                warn!(entity_type = %self.name(), id = %doc_id, error = %e, "search engine write-through failed");
            }
        }
    }
}

/// Registry of entity types and their default engines.
pub struct DocumentStore {
    config: StoreConfig,
    engine: Arc<dyn Engine>,
    space: Arc<dyn StagingEngine>,
    delete: Arc<dyn StagingEngine>,
    types: RwLock<BTreeMap<String, Arc<EntityType>>>,
    dependencies: DependencyRegistry,
}

impl fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentStore")
            .field("config", &self.config)
            .field("engine", &self.engine.name())
            .field("types", &self.types.read().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl DocumentStore {
    /// Creates a store whose types default to `engine`.
    pub fn new(config: StoreConfig, engine: Arc<dyn Engine>) -> Self {
        Self {
            config,
            engine,
            space: Arc::new(MemoryStaging::new()),
            delete: Arc::new(MemoryStaging::new()),
            types: RwLock::new(BTreeMap::new()),
            dependencies: DependencyRegistry::new(),
        }
    }

    /// Creates a store backed by a fresh [`MemoryEngine`].
    pub fn in_memory() -> Self {
        Self::new(StoreConfig::default(), Arc::new(MemoryEngine::new()))
    }

    /// Replaces the default staging engines.
    #[must_use]
    pub fn with_staging(
        mut self,
        space: Arc<dyn StagingEngine>,
        delete: Arc<dyn StagingEngine>,
    ) -> Self {
        self.space = space;
        self.delete = delete;
        self
    }

    /// Configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Default main engine.
    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    /// Declared dependencies.
    pub fn dependencies(&self) -> &DependencyRegistry {
        &self.dependencies
    }

    /// Registers a type with the store defaults.
    ///
    /// # Errors
    ///
    /// See [`DocumentStore::register_with`].
    pub fn register(&self, schema: Schema) -> DocResult<Arc<EntityType>> {
        self.register_with(schema, Binding::new())
    }

    /// Registers a type with explicit engine bindings.
    ///
    /// # Errors
    ///
    /// Fails when the name is taken or the parent type is not registered.
    pub fn register_with(&self, schema: Schema, binding: Binding) -> DocResult<Arc<EntityType>> {
        let mut types = self.types.write();
        if types.contains_key(schema.name()) {
            return Err(DocError::schema(format!(
                "entity type {} is already registered",
                schema.name()
            )));
        }
        let parent = match schema.parent() {
            Some(name) => Some(types.get(name).cloned().ok_or_else(|| {
                DocError::schema(format!("parent type {name} of {} is not registered", schema.name()))
            })?),
            None => None,
        };
        let inherit = |own: Option<Arc<dyn Engine>>| {
            own.or_else(|| parent.as_ref().map(|p| Arc::clone(&p.engine)))
                .unwrap_or_else(|| Arc::clone(&self.engine))
        };
        let engine = inherit(binding.engine);
        let address = binding.address.unwrap_or_default();
        let collection = address
            .collection
            .clone()
            .or_else(|| schema.collection().map(str::to_string))
            .unwrap_or_else(|| schema.name().to_string());
        let space = binding
            .space
            .or_else(|| parent.as_ref().map(|p| Arc::clone(&p.space)))
            .unwrap_or_else(|| Arc::clone(&self.space));
        let delete = binding
            .delete
            .or_else(|| parent.as_ref().map(|p| Arc::clone(&p.delete)))
            .unwrap_or_else(|| Arc::clone(&self.delete));
        let read_cache = binding
            .read_cache
            .or_else(|| parent.as_ref().and_then(|p| p.read_cache.clone()));
        let search_engine = binding
            .search_engine
            .or_else(|| parent.as_ref().and_then(|p| p.search_engine.clone()));
        let logger = binding
            .logger
            .or_else(|| parent.as_ref().and_then(|p| p.logger.clone()));
        let validator = binding
            .validator
            .or_else(|| parent.as_ref().map(|p| Arc::clone(&p.validator)))
            .unwrap_or_else(|| Arc::new(SchemaValidator));
        let log_content = binding
            .log_content
            .or_else(|| parent.as_ref().map(|p| p.log_content))
            .unwrap_or(self.config.log_content);
        let capacity = binding
            .version_table_size
            .unwrap_or(self.config.version_table_size);
        let mut versions = VersionRegistry::new(capacity);
        if let Some(cache) = &read_cache {
            versions = versions.with_cache(Arc::clone(cache), collection.clone());
        }

        for dependency in schema.dependencies() {
            self.dependencies.declare(schema.name(), dependency.clone());
        }
        debug!(
            entity_type = %schema.name(),
            collection = %collection,
            engine = %engine.name(),
            "entity type registered"
        );
        let entity_type = Arc::new(EntityType {
            schema,
            collection,
            engine,
            address,
            space,
            delete,
            read_cache,
            search_engine,
            logger,
            validator,
            log_content,
            versions,
            replicas: RwLock::new(BTreeMap::new()),
        });
        types.insert(entity_type.name().to_string(), Arc::clone(&entity_type));
        Ok(entity_type)
    }

    /// Looks up a registered type.
    ///
    /// # Errors
    ///
    /// Returns a schema error for unknown names.
    pub fn entity_type(&self, name: &str) -> DocResult<Arc<EntityType>> {
        self.types
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| DocError::schema(format!("unknown entity type {name}")))
    }

    /// Names of every registered type.
    pub fn type_names(&self) -> Vec<String> {
        self.types.read().keys().cloned().collect()
    }

    /// The type and all its registered descendants, the type first.
    pub fn family(&self, name: &str) -> Vec<Arc<EntityType>> {
        let types = self.types.read();
        let mut family: Vec<Arc<EntityType>> = types.get(name).cloned().into_iter().collect();
        let mut i = 0;
        while i < family.len() {
            let parent = family[i].name().to_string();
            family.extend(
                types
                    .values()
                    .filter(|t| t.schema.parent() == Some(parent.as_str()))
                    .cloned(),
            );
            i += 1;
        }
        family
    }

    /// Operations on one type.
    ///
    /// # Errors
    ///
    /// Returns a schema error for unknown names.
    pub fn collection(&self, name: &str) -> DocResult<Collection<'_>> {
        Ok(Collection::new(self, self.entity_type(name)?))
    }

    /// Starts a batch on the default engine.
    pub fn batch(&self) -> Batch {
        Batch::new(Arc::clone(&self.engine))
    }

    /// Saves a document through its own type.
    ///
    /// # Errors
    ///
    /// See [`Collection::save`].
    pub fn save(&self, doc: &mut Document, options: Options<'_>) -> DocResult<WriteOutcome> {
        self.collection(doc.entity_type())?.save(doc, options)
    }

    /// Updates a document through its own type.
    ///
    /// # Errors
    ///
    /// See [`Collection::update`].
    pub fn update(
        &self,
        doc: &mut Document,
        changes: &[Change],
        options: Options<'_>,
    ) -> DocResult<WriteOutcome> {
        self.collection(doc.entity_type())?.update(doc, changes, options)
    }

    /// Deletes a document through its own type.
    pub fn delete(&self, doc: &Document, options: Options<'_>) -> Vec<DeleteResult> {
        match self.collection(doc.entity_type()) {
            Ok(collection) => collection.delete(doc, options),
            Err(e) => vec![DeleteResult::error(doc.entity_type(), doc.id(), &e)],
        }
    }

    /// Reloads a document through its own type.
    ///
    /// # Errors
    ///
    /// See [`Collection::reload`].
    pub fn reload(&self, doc: &mut Document, options: Options<'_>) -> DocResult<()> {
        self.collection(doc.entity_type())?.reload(doc, options)
    }

    /// Resets the per-type state of every registered type.
    pub fn reset(&self) {
        for entity_type in self.types.read().values() {
            entity_type.reset();
        }
    }
}
