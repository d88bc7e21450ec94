//! Batched write operations and their pre-images.

use crate::change::Change;
use docstore_codec::Content;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of a write operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
    /// Create a new document.
    Insert,
    /// Partially update an existing document.
    Update,
    /// Replace a document.
    Set,
    /// Remove a document.
    Delete,
}

impl OpKind {
    /// Single letter code used in logs and replication tasks.
    pub fn code(self) -> &'static str {
        match self {
            OpKind::Insert => "I",
            OpKind::Update => "U",
            OpKind::Set => "S",
            OpKind::Delete => "D",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One recorded write of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Insert a document under a precomputed id.
    Insert {
        /// Target collection.
        collection: String,
        /// Document id.
        doc_id: String,
        /// Stored content.
        content: Content,
    },
    /// Apply field changes to an existing document.
    Update {
        /// Target collection.
        collection: String,
        /// Document id.
        doc_id: String,
        /// Changes, applied in order.
        changes: Vec<Change>,
    },
    /// Replace a document.
    Set {
        /// Target collection.
        collection: String,
        /// Document id.
        doc_id: String,
        /// Stored content.
        content: Content,
    },
    /// Delete a document.
    Delete {
        /// Target collection.
        collection: String,
        /// Document id.
        doc_id: String,
    },
}

impl Operation {
    /// Kind of this operation.
    pub fn kind(&self) -> OpKind {
        match self {
            Operation::Insert { .. } => OpKind::Insert,
            Operation::Update { .. } => OpKind::Update,
            Operation::Set { .. } => OpKind::Set,
            Operation::Delete { .. } => OpKind::Delete,
        }
    }

    /// Target collection.
    pub fn collection(&self) -> &str {
        match self {
            Operation::Insert { collection, .. }
            | Operation::Update { collection, .. }
            | Operation::Set { collection, .. }
            | Operation::Delete { collection, .. } => collection,
        }
    }

    /// Target document id.
    pub fn doc_id(&self) -> &str {
        match self {
            Operation::Insert { doc_id, .. }
            | Operation::Update { doc_id, .. }
            | Operation::Set { doc_id, .. }
            | Operation::Delete { doc_id, .. } => doc_id,
        }
    }
}

/// Pre-image of one document touched by a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Original {
    /// Collection the document lives in.
    pub collection: String,
    /// Content before the batch, `None` if the document did not exist.
    pub content: Option<Content>,
}

/// Pre-images keyed by `(entity type, document id)`.
///
/// The first recorded pre-image for a key wins; later records are ignored so
/// rollback always restores the state before the batch started.
#[derive(Debug, Clone, Default)]
pub struct Originals {
    entries: BTreeMap<(String, String), Original>,
}

impl Originals {
    /// Creates an empty set of pre-images.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a pre-image unless one already exists for the key.
    ///
    /// Returns true when the pre-image was recorded.
    pub fn record(
        &mut self,
        entity_type: &str,
        doc_id: &str,
        collection: &str,
        content: Option<Content>,
    ) -> bool {
        let key = (entity_type.to_string(), doc_id.to_string());
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(
            key,
            Original {
                collection: collection.to_string(),
                content,
            },
        );
        true
    }

    /// Gets the pre-image of a document.
    pub fn get(&self, entity_type: &str, doc_id: &str) -> Option<&Original> {
        self.entries
            .get(&(entity_type.to_string(), doc_id.to_string()))
    }

    /// Finds the pre-image of a document by collection.
    pub fn find(&self, collection: &str, doc_id: &str) -> Option<&Original> {
        self.entries
            .iter()
            .find(|((_, id), original)| id == doc_id && original.collection == collection)
            .map(|(_, original)| original)
    }

    /// Iterates over `((entity type, id), pre-image)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&(String, String), &Original)> {
        self.entries.iter()
    }

    /// Returns the distinct entity types with a recorded pre-image.
    pub fn entity_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.entries.keys().map(|(t, _)| t.clone()).collect();
        types.dedup();
        types
    }

    /// Number of recorded pre-images.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forgets every pre-image.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Result of an engine batch: success flag plus a message on failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Whether every operation was applied.
    pub success: bool,
    /// Failure description, empty on success.
    pub message: String,
}

impl BatchOutcome {
    /// A successful outcome.
    #[must_use]
    pub fn ok() -> Self {
        Self {
            success: true,
            message: String::new(),
        }
    }

    /// A failed outcome.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }

    /// Returns the `(success, message)` pair.
    pub fn into_pair(self) -> (bool, String) {
        (self.success, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docstore_codec::Value;

    fn content(n: i64) -> Content {
        let mut c = Content::new();
        c.insert("n".into(), Value::Integer(n));
        c
    }

    #[test]
    fn first_pre_image_wins() {
        let mut originals = Originals::new();
        assert!(originals.record("Order", "A1", "orders", Some(content(1))));
        assert!(!originals.record("Order", "A1", "orders", Some(content(2))));
        assert_eq!(
            originals.get("Order", "A1").unwrap().content,
            Some(content(1))
        );
        assert_eq!(originals.len(), 1);
    }

    #[test]
    fn find_by_collection() {
        let mut originals = Originals::new();
        originals.record("Order", "A1", "orders", None);
        assert!(originals.find("orders", "A1").is_some());
        assert!(originals.find("customers", "A1").is_none());
    }

    #[test]
    fn operation_accessors() {
        let op = Operation::Update {
            collection: "orders".into(),
            doc_id: "A1".into(),
            changes: vec![Change::set("qty", 2i64)],
        };
        assert_eq!(op.kind(), OpKind::Update);
        assert_eq!(op.collection(), "orders");
        assert_eq!(op.doc_id(), "A1");
        assert_eq!(OpKind::Delete.to_string(), "D");
    }
}
