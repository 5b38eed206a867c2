//! Storage types

use serde::{Deserialize, Serialize};

/// Inclusive byte range into a stored object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Number of bytes covered; never zero for a valid range.
    pub fn byte_count(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Metadata reported for a stored blob
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobStat {
    /// Total size in bytes; `None` when the backend cannot report it
    pub size: Option<u64>,
    pub content_type: Option<String>,
    pub name: Option<String>,
}

/// Descriptor for a blob about to be written
#[derive(Debug, Clone)]
pub struct NewBlob<'a> {
    /// Storage name of the blob (already sanitized and namespaced)
    pub name: &'a str,
    pub content_type: Option<&'a str>,
    /// Advisory session metadata tagged onto the object
    pub tags: BlobTags,
}

/// Session metadata carried alongside a blob for later retrieval
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlobTags {
    pub upload_id: String,
    pub original_name: String,
    pub declared_size: Option<i64>,
}

/// Where a completed session's bytes live.
///
/// Records that predate the blob store carry no handle and fall back to a
/// flat file named by the session's stored name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobSource {
    Store(String),
    LegacyFile(String),
}

impl BlobSource {
    /// Resolve the source for a completed session.
    pub fn resolve(blob_id: Option<&str>, stored_name: &str) -> Self {
        match blob_id {
            Some(id) => BlobSource::Store(id.to_string()),
            None => BlobSource::LegacyFile(stored_name.to_string()),
        }
    }
}
