//! Replication task types.

use docstore_codec::Content;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Replication operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplicaOp {
    /// Insert the document.
    Insert,
    /// Update (replace) the document.
    Update,
    /// Delete the document.
    Delete,
    /// Load the document as-is.
    Load,
    /// Change notification only; never forwarded to an engine.
    Watch,
}

impl ReplicaOp {
    /// Single letter code of the operation.
    pub fn code(self) -> &'static str {
        match self {
            ReplicaOp::Insert => "I",
            ReplicaOp::Update => "U",
            ReplicaOp::Delete => "D",
            ReplicaOp::Load => "L",
            ReplicaOp::Watch => "W",
        }
    }
}

impl fmt::Display for ReplicaOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A replication task as seen by an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineTask {
    /// Document id.
    pub id: String,
    /// Stored content.
    pub content: Content,
    /// Operation.
    pub op: ReplicaOp,
}

/// Outcome of one replication task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaResult {
    /// Document id, if known.
    pub id: Option<String>,
    /// Operation.
    pub op: ReplicaOp,
    /// When the task was handled (Unix timestamp in milliseconds).
    pub time: u64,
    /// HTTP-like status code.
    pub status: u16,
}

impl ReplicaResult {
    /// Creates a result stamped with the current time.
    pub fn now(id: Option<String>, op: ReplicaOp, status: u16) -> Self {
        Self {
            id,
            op,
            time: now_millis(),
            status,
        }
    }
}

/// Current Unix time in milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
