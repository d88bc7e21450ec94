//! Version tokens for optimistic concurrency.
//!
//! Each entity type owns a bounded table mapping document ids to opaque
//! version tokens (UUID strings). Reading an unknown id allocates a token;
//! every write forces a new one. When the table is full the least recently
//! touched id is evicted. A capacity of zero disables memoization and every
//! lookup returns a fresh token.

use crate::error::{DocError, DocResult};
use docstore_engine::CacheEngine;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Table {
    /// id -> (token, tick of last touch)
    entries: HashMap<String, (String, u64)>,
    /// tick -> id, oldest first
    order: BTreeMap<u64, String>,
    next_tick: u64,
}

impl Table {
    fn touch(&mut self, doc_id: &str, token: String) {
        let tick = self.next_tick;
        self.next_tick += 1;
        if let Some((_, old_tick)) = self.entries.insert(doc_id.to_string(), (token, tick)) {
            self.order.remove(&old_tick);
        }
        self.order.insert(tick, doc_id.to_string());
    }

    fn evict_if_full(&mut self, doc_id: &str, capacity: usize) {
        if self.entries.contains_key(doc_id) || self.entries.len() < capacity {
            return;
        }
        if let Some((_, oldest)) = self.order.pop_first() {
            self.entries.remove(&oldest);
        }
    }
}

/// Version table of one entity type.
pub struct VersionRegistry {
    capacity: usize,
    table: Mutex<Table>,
    cache: Option<(Arc<dyn CacheEngine>, String)>,
}

impl std::fmt::Debug for VersionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionRegistry")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

fn new_token() -> String {
    Uuid::new_v4().to_string()
}

fn require_id(doc_id: &str) -> DocResult<()> {
    if doc_id.is_empty() {
        return Err(DocError::invalid_operation(
            "document id missing for version token",
        ));
    }
    Ok(())
}

impl VersionRegistry {
    /// Creates a table holding at most `capacity` ids.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            table: Mutex::new(Table::default()),
            cache: None,
        }
    }

    /// Invalidates entries of `cache` in `collection` whenever a token is set.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn CacheEngine>, collection: impl Into<String>) -> Self {
        self.cache = Some((cache, collection.into()));
        self
    }

    /// Maximum number of memoized ids.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the token of a document, allocating one if needed.
    ///
    /// # Errors
    ///
    /// Fails on an empty id.
    pub fn get(&self, doc_id: &str) -> DocResult<String> {
        require_id(doc_id)?;
        if self.capacity == 0 {
            return Ok(new_token());
        }
        let mut table = self.table.lock();
        let token = match table.entries.get(doc_id) {
            Some((token, _)) => token.clone(),
            None => {
                table.evict_if_full(doc_id, self.capacity);
                new_token()
            }
        };
        table.touch(doc_id, token.clone());
        Ok(token)
    }

    /// Forces a new token (or the given one) and drops the read cache entry.
    ///
    /// # Errors
    ///
    /// Fails on an empty id.
    pub fn set(&self, doc_id: &str, token: Option<String>) -> DocResult<String> {
        require_id(doc_id)?;
        let token = token.unwrap_or_else(new_token);
        if self.capacity > 0 {
            let mut table = self.table.lock();
            table.evict_if_full(doc_id, self.capacity);
            table.touch(doc_id, token.clone());
        }
        if let Some((cache, collection)) = &self.cache {
            if let Err(e) = cache.delete(collection, doc_id) {
                warn!(collection = %collection, id = %doc_id, error = %e, "read cache invalidation failed");
            }
        }
        Ok(token)
    }

    /// Returns true if the id is memoized.
    pub fn contains(&self, doc_id: &str) -> bool {
        self.table.lock().entries.contains_key(doc_id)
    }

    /// Number of memoized ids.
    pub fn len(&self) -> usize {
        self.table.lock().entries.len()
    }

    /// Returns true if nothing is memoized.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets every token.
    pub fn purge(&self) {
        *self.table.lock() = Table::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docstore_codec::Content;
    use docstore_engine::MemoryCache;

    #[test]
    fn get_is_stable_until_set() {
        let versions = VersionRegistry::new(10);
        let first = versions.get("A1").unwrap();
        assert_eq!(versions.get("A1").unwrap(), first);

        let second = versions.set("A1", None).unwrap();
        assert_ne!(first, second);
        assert_eq!(versions.get("A1").unwrap(), second);

        versions.set("A1", Some("pinned".into())).unwrap();
        assert_eq!(versions.get("A1").unwrap(), "pinned");
    }

    #[test]
    fn evicts_least_recently_touched() {
        let versions = VersionRegistry::new(2);
        versions.get("A").unwrap();
        versions.get("B").unwrap();
        versions.get("A").unwrap();
        versions.get("C").unwrap();

        assert!(versions.contains("A"));
        assert!(!versions.contains("B"));
        assert!(versions.contains("C"));
        assert_eq!(versions.len(), 2);
    }

    #[test]
    fn zero_capacity_never_memoizes() {
        let versions = VersionRegistry::new(0);
        assert_ne!(versions.get("A").unwrap(), versions.get("A").unwrap());
        versions.set("A", None).unwrap();
        assert!(versions.is_empty());
    }

    #[test]
    fn empty_id_is_rejected() {
        let versions = VersionRegistry::new(1);
        assert!(matches!(
            versions.get(""),
            Err(DocError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn set_invalidates_read_cache() {
        let cache = Arc::new(MemoryCache::new());
        cache.set("orders", "A1", Some(Content::new())).unwrap();
        let versions = VersionRegistry::new(4).with_cache(cache.clone(), "orders");

        versions.set("A1", None).unwrap();
        assert_eq!(cache.entry("orders", "A1"), None);
    }

    #[test]
    fn purge_resets() {
        let versions = VersionRegistry::new(4);
        let before = versions.get("A").unwrap();
        versions.purge();
        assert!(versions.is_empty());
        assert_ne!(versions.get("A").unwrap(), before);
    }
}
