//! Chunk staging area
//!
//! Per-session temporary storage for arrived chunks, one directory per
//! upload and one file per index. A chunk is written to a private temp
//! file and renamed into its numbered slot, so a retried upload either
//! fully replaces the prior bytes or leaves them untouched and a reader
//! can never observe a half-written chunk.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::Result;

/// Filesystem staging area for upload chunks
#[derive(Clone)]
pub struct ChunkStaging {
    root: PathBuf,
}

impl ChunkStaging {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn session_dir(&self, upload_id: &str) -> PathBuf {
        self.root.join(upload_id)
    }

    fn chunk_path(&self, upload_id: &str, index: u32) -> PathBuf {
        self.session_dir(upload_id).join(index.to_string())
    }

    /// Create the staging directory for a session.
    pub async fn ensure_session_dir(&self, upload_id: &str) -> Result<()> {
        fs::create_dir_all(self.session_dir(upload_id)).await?;
        Ok(())
    }

    /// Durably persist one chunk, keyed by `(upload_id, index)`.
    ///
    /// Returns the number of bytes written. Concurrent retries of the
    /// same index race only at the final rename; the last completed
    /// writer wins cleanly.
    pub async fn put<S, E>(&self, upload_id: &str, index: u32, mut source: S) -> Result<u64>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        let dir = self.session_dir(upload_id);
        fs::create_dir_all(&dir).await?;

        let tmp = dir.join(format!(".{}.{}.part", index, Uuid::new_v4()));
        let mut file = fs::File::create(&tmp).await?;

        let mut written: u64 = 0;
        while let Some(frame) = source.next().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    drop(file);
                    let _ = fs::remove_file(&tmp).await;
                    return Err(std::io::Error::new(
                        ErrorKind::UnexpectedEof,
                        format!("Chunk body interrupted: {}", e),
                    )
                    .into());
                }
            };
            if let Err(e) = file.write_all(&frame).await {
                drop(file);
                let _ = fs::remove_file(&tmp).await;
                return Err(e.into());
            }
            written += frame.len() as u64;
        }

        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp, self.chunk_path(upload_id, index)).await?;

        tracing::debug!(
            upload_id = %upload_id,
            chunk_index = index,
            bytes = written,
            "Staged chunk"
        );

        Ok(written)
    }

    /// Enumerate the chunk indices present on disk.
    ///
    /// This is the ground truth finalize trusts, independent of the
    /// session store's bookkeeping. Temp files and foreign names are
    /// ignored; an absent directory reads as an empty set.
    pub async fn list_indices(&self, upload_id: &str) -> Result<BTreeSet<u32>> {
        let mut indices = BTreeSet::new();

        let mut entries = match fs::read_dir(self.session_dir(upload_id)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(indices),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if let Ok(index) = entry.file_name().to_string_lossy().parse::<u32>() {
                indices.insert(index);
            }
        }

        Ok(indices)
    }

    /// Open one staged chunk for reading.
    pub async fn open_chunk(&self, upload_id: &str, index: u32) -> Result<fs::File> {
        Ok(fs::File::open(self.chunk_path(upload_id, index)).await?)
    }

    /// Remove the entire staging area for a session; absent is a no-op.
    pub async fn purge(&self, upload_id: &str) -> Result<()> {
        match fs::remove_dir_all(self.session_dir(upload_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Upload ids that currently have a staging directory.
    pub async fn list_sessions(&self) -> Result<Vec<String>> {
        let mut sessions = Vec::new();

        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(sessions),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                sessions.push(entry.file_name().to_string_lossy().to_string());
            }
        }

        Ok(sessions)
    }
}

// ============================================================================
// Tests
// ============================================================================
