//! Legacy flat-file backend
//!
//! Sessions created before the blob store migration carry no blob handle;
//! their bytes live as plain files named by the session's stored name.
//! This backend gives those records the same ranged-read surface as the
//! blob store so call sites never branch on the record's age.

use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;

use crate::error::StorageError;

use super::blob::ByteStream;
use super::read_file_range;
use super::types::{BlobStat, ByteRange};

/// Read/delete-only store over the deprecated flat media directory
#[derive(Clone)]
pub struct LegacyFileStore {
    root: PathBuf,
}

impl LegacyFileStore {
    /// Open the store rooted at `root`, creating the directory.
    pub async fn open(root: PathBuf) -> Result<Self, StorageError> {
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Stored names are single path components; anything else cannot
    /// name a legacy file.
    fn path(&self, name: &str) -> Result<PathBuf, StorageError> {
        if name.is_empty() || name == ".." || name.contains(['/', '\\']) {
            return Err(StorageError::ObjectNotFound(name.to_string()));
        }
        Ok(self.root.join(name))
    }

    pub async fn stat(&self, name: &str) -> Result<BlobStat, StorageError> {
        let path = self.path(name)?;
        let meta = match fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::ObjectNotFound(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let content_type = mime_guess::from_path(&path)
            .first()
            .map(|m| m.essence_str().to_string());

        Ok(BlobStat {
            size: Some(meta.len()),
            content_type,
            name: Some(name.to_string()),
        })
    }

    pub async fn open_reader(
        &self,
        name: &str,
        range: Option<ByteRange>,
    ) -> Result<ByteStream, StorageError> {
        let path = self.path(name)?;
        let stat = self.stat(name).await?;
        match read_file_range(&path, range, stat.size.unwrap_or(0)).await {
            Err(StorageError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::ObjectNotFound(name.to_string()))
            }
            other => other,
        }
    }

    /// Remove the flat file; absent files are not an error.
    pub async fn delete(&self, name: &str) -> Result<(), StorageError> {
        let path = match self.path(name) {
            Ok(path) => path,
            Err(_) => return Ok(()),
        };
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
