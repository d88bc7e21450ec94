//! Read caches and search engines.
//!
//! Both sit beside the main engine and share one contract: a read cache
//! memoizes documents by id (including known misses), a search engine keeps
//! an index of documents that can answer `scan` without the main engine.

use crate::error::EngineResult;
use crate::query::Query;
use docstore_codec::Content;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

/// Side store holding copies of documents.
pub trait CacheEngine: Send + Sync {
    /// Returns the entries known for `ids`, in request order.
    ///
    /// `Some(content)` is a cached document, `None` a cached miss. Ids the
    /// cache knows nothing about are left out.
    fn fetch(&self, collection: &str, ids: &[String])
        -> EngineResult<Vec<(String, Option<Content>)>>;

    /// Ids of cached documents matching the query.
    fn scan(&self, collection: &str, query: &Query) -> EngineResult<Vec<String>>;

    /// Stores a document, or a miss when `content` is `None`.
    fn set(&self, collection: &str, doc_id: &str, content: Option<Content>) -> EngineResult<()>;

    /// Forgets an entry.
    fn delete(&self, collection: &str, doc_id: &str) -> EngineResult<()>;

    /// Forgets every entry of a collection.
    fn drop_collection(&self, collection: &str) -> EngineResult<()>;
}

/// In-memory cache, usable as read cache or search engine.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, BTreeMap<String, Option<Content>>>>,
}

impl MemoryCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the raw entry for an id, if any.
    pub fn entry(&self, collection: &str, doc_id: &str) -> Option<Option<Content>> {
        self.entries
            .read()
            .get(collection)
            .and_then(|rows| rows.get(doc_id))
            .cloned()
    }

    /// Number of entries (hits and misses) for a collection.
    pub fn len(&self, collection: &str) -> usize {
        self.entries.read().get(collection).map_or(0, BTreeMap::len)
    }

    /// Returns true if the collection has no entries.
    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }
}

impl CacheEngine for MemoryCache {
    fn fetch(
        &self,
        collection: &str,
        ids: &[String],
    ) -> EngineResult<Vec<(String, Option<Content>)>> {
        let entries = self.entries.read();
        let Some(rows) = entries.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| rows.get(id).map(|entry| (id.clone(), entry.clone())))
            .collect())
    }

    fn scan(&self, collection: &str, query: &Query) -> EngineResult<Vec<String>> {
        let entries = self.entries.read();
        let Some(rows) = entries.get(collection) else {
            return Ok(Vec::new());
        };
        let mut ids = Vec::new();
        for (id, entry) in rows {
            if query.is_full(ids.len()) {
                break;
            }
            if entry.as_ref().is_some_and(|content| query.matches(content)) {
                ids.push(id.clone());
            }
        }
        Ok(ids)
    }

    fn set(&self, collection: &str, doc_id: &str, content: Option<Content>) -> EngineResult<()> {
        self.entries
            .write()
            .entry(collection.to_string())
            .or_default()
            .insert(doc_id.to_string(), content);
        Ok(())
    }

    fn delete(&self, collection: &str, doc_id: &str) -> EngineResult<()> {
        if let Some(rows) = self.entries.write().get_mut(collection) {
            rows.remove(doc_id);
        }
        Ok(())
    }

    fn drop_collection(&self, collection: &str) -> EngineResult<()> {
        self.entries.write().remove(collection);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Criteria;
    use docstore_codec::Value;

    fn order(qty: i64) -> Content {
        let mut c = Content::new();
        c.insert("qty".into(), Value::Integer(qty));
        c
    }

    #[test]
    fn fetch_reports_hits_and_misses() {
        let cache = MemoryCache::new();
        cache.set("orders", "A1", Some(order(1))).unwrap();
        cache.set("orders", "A2", None).unwrap();

        let ids = vec!["A1".to_string(), "A2".to_string(), "A3".to_string()];
        let entries = cache.fetch("orders", &ids).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], ("A1".to_string(), Some(order(1))));
        assert_eq!(entries[1], ("A2".to_string(), None));
    }

    #[test]
    fn scan_ignores_misses_and_honors_limit() {
        let cache = MemoryCache::new();
        cache.set("orders", "A1", Some(order(1))).unwrap();
        cache.set("orders", "A2", Some(order(5))).unwrap();
        cache.set("orders", "A3", Some(order(9))).unwrap();
        cache.set("orders", "A4", None).unwrap();

        let query = Query::new(Criteria::new().gt("qty", 2i64));
        assert_eq!(cache.scan("orders", &query).unwrap(), vec!["A2", "A3"]);

        let limited = Query::new(Criteria::new()).with_limit(1);
        assert_eq!(cache.scan("orders", &limited).unwrap(), vec!["A1"]);
    }

    #[test]
    fn delete_and_drop() {
        let cache = MemoryCache::new();
        cache.set("orders", "A1", Some(order(1))).unwrap();
        cache.set("orders", "A2", Some(order(2))).unwrap();
        cache.delete("orders", "A1").unwrap();
        assert_eq!(cache.entry("orders", "A1"), None);
        assert_eq!(cache.len("orders"), 1);
        cache.drop_collection("orders").unwrap();
        assert!(cache.is_empty("orders"));
    }
}
