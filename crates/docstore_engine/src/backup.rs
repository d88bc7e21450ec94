//! Collection backup and restore files.
//!
//! A backup file holds every document of one collection:
//!
//! ```text
//! { collection, timestamp, documents: [(id, content), ...] }
//! ```
//!
//! encoded as CBOR or JSON depending on [`BackupOptions::encoding`].

use crate::error::{EngineError, EngineResult};
use crate::replica::now_millis;
use docstore_codec::{Content, Encoding};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Where and how a backup is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupOptions {
    /// Backup file location.
    pub location: PathBuf,
    /// File encoding.
    pub encoding: Encoding,
}

impl BackupOptions {
    /// Creates options for a CBOR backup at `location`.
    pub fn new(location: impl Into<PathBuf>) -> Self {
        Self {
            location: location.into(),
            encoding: Encoding::Cbor,
        }
    }

    /// Sets the file encoding.
    #[must_use]
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }
}

/// Metadata about a written backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupMetadata {
    /// When the backup was created (Unix timestamp in milliseconds).
    pub timestamp: u64,
    /// Number of documents in the backup.
    pub record_count: usize,
    /// Size of the backup file in bytes.
    pub size: usize,
}

/// Serialized backup file content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupFile {
    /// Source collection.
    pub collection: String,
    /// Creation time (Unix timestamp in milliseconds).
    pub timestamp: u64,
    /// Documents as `(id, content)` pairs.
    pub documents: Vec<(String, Content)>,
}

impl BackupFile {
    /// Creates a backup of the given documents, stamped now.
    pub fn new(collection: impl Into<String>, documents: Vec<(String, Content)>) -> Self {
        Self {
            collection: collection.into(),
            timestamp: now_millis(),
            documents,
        }
    }

    /// Writes the backup file.
    ///
    /// # Errors
    ///
    /// Fails on encoding or I/O errors.
    pub fn write(&self, options: &BackupOptions) -> EngineResult<BackupMetadata> {
        let bytes = options.encoding.encode(self)?;
        if let Some(parent) = options.location.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&options.location, &bytes)?;
        Ok(BackupMetadata {
            timestamp: self.timestamp,
            record_count: self.documents.len(),
            size: bytes.len(),
        })
    }

    /// Reads a backup file.
    ///
    /// # Errors
    ///
    /// Fails when the file is missing or cannot be decoded.
    pub fn read(options: &BackupOptions) -> EngineResult<Self> {
        let bytes = read_file(&options.location)?;
        Ok(options.encoding.decode(&bytes)?)
    }
}

fn read_file(path: &Path) -> EngineResult<Vec<u8>> {
    fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            EngineError::backend(format!("backup file not found: {}", path.display()))
        }
        _ => EngineError::Io(e),
    })
}
