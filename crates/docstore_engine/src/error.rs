//! Error types for engine operations.

use docstore_codec::CodecError;
use std::io;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur inside an engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The requested document does not exist.
    #[error("document not found: {collection}/{id}")]
    NotFound {
        /// Collection name.
        collection: String,
        /// Document id.
        id: String,
    },

    /// A document with this id already exists.
    #[error("document already exists: {collection}/{id}")]
    AlreadyExists {
        /// Collection name.
        collection: String,
        /// Document id.
        id: String,
    },

    /// The engine does not implement the requested operation.
    #[error("{engine} does not support {operation}")]
    Unsupported {
        /// Engine name.
        engine: String,
        /// Requested operation.
        operation: String,
    },

    /// A lock could not be acquired in time.
    #[error("lock timeout on {collection}/{id}")]
    LockTimeout {
        /// Collection name.
        collection: String,
        /// Document id.
        id: String,
    },

    /// An I/O error occurred (backup files).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Content could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Backend specific failure.
    #[error("backend error: {0}")]
    Backend(String),
}

impl EngineError {
    /// Create a not found error.
    pub fn not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Create an already exists error.
    pub fn already_exists(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Create an unsupported operation error.
    pub fn unsupported(engine: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Unsupported {
            engine: engine.into(),
            operation: operation.into(),
        }
    }

    /// Create a backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}
