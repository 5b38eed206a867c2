//! Local filesystem blob store
//!
//! A GridFS-style large-object store on disk: each blob is a payload file
//! plus a JSON sidecar holding its metadata. Writes are staged under a
//! private temp directory and become addressable only on commit, via
//! atomic rename.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::StorageError;

use super::blob::{BlobStore, BlobWriter, ByteStream};
use super::read_file_range;
use super::types::{BlobStat, BlobTags, ByteRange, NewBlob};

const TMP_DIR: &str = ".tmp";

/// Filesystem-backed blob store
#[derive(Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LocalBlobMeta {
    id: String,
    name: String,
    content_type: Option<String>,
    size: u64,
    tags: BlobTags,
    created_at: DateTime<Utc>,
}

impl LocalBlobStore {
    /// Open the store rooted at `root`, creating its directories.
    pub async fn open(root: PathBuf) -> Result<Self, StorageError> {
        fs::create_dir_all(root.join(TMP_DIR)).await?;
        Ok(Self { root })
    }

    fn data_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.bin", id))
    }

    fn meta_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.json", id))
    }

    fn tmp_path(&self, id: &str, suffix: &str) -> PathBuf {
        self.root.join(TMP_DIR).join(format!("{}.{}", id, suffix))
    }

    async fn load_meta(&self, id: &str) -> Result<LocalBlobMeta, StorageError> {
        if !valid_id(id) {
            return Err(StorageError::ObjectNotFound(id.to_string()));
        }

        let bytes = match fs::read(self.meta_path(id)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::ObjectNotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&bytes)
            .map_err(|e| StorageError::Backend(format!("Corrupt metadata for blob {}: {}", id, e)))
    }
}

/// Handles are minted as UUIDs; anything else cannot name a blob here.
fn valid_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

#[async_trait::async_trait]
impl BlobStore for LocalBlobStore {
    async fn open_writer(&self, blob: NewBlob<'_>) -> Result<Box<dyn BlobWriter>, StorageError> {
        let id = Uuid::new_v4().to_string();
        let tmp_data = self.tmp_path(&id, "part");
        let file = fs::File::create(&tmp_data).await?;

        let meta = LocalBlobMeta {
            id: id.clone(),
            name: blob.name.to_string(),
            content_type: blob.content_type.map(str::to_string),
            size: 0,
            tags: blob.tags,
            created_at: Utc::now(),
        };

        Ok(Box::new(LocalBlobWriter {
            file,
            tmp_data,
            tmp_meta: self.tmp_path(&id, "json"),
            data_path: self.data_path(&id),
            meta_path: self.meta_path(&id),
            meta,
        }))
    }

    async fn open_reader(
        &self,
        id: &str,
        range: Option<ByteRange>,
    ) -> Result<ByteStream, StorageError> {
        let meta = self.load_meta(id).await?;
        read_file_range(&self.data_path(id), range, meta.size).await
    }

    async fn stat(&self, id: &str) -> Result<BlobStat, StorageError> {
        let meta = self.load_meta(id).await?;
        Ok(BlobStat {
            size: Some(meta.size),
            content_type: meta.content_type,
            name: Some(meta.name),
        })
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        if !valid_id(id) {
            return Ok(());
        }
        remove_if_present(&self.data_path(id)).await?;
        remove_if_present(&self.meta_path(id)).await?;
        Ok(())
    }
}

async fn remove_if_present(path: &PathBuf) -> Result<(), StorageError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

struct LocalBlobWriter {
    file: fs::File,
    tmp_data: PathBuf,
    tmp_meta: PathBuf,
    data_path: PathBuf,
    meta_path: PathBuf,
    meta: LocalBlobMeta,
}

#[async_trait::async_trait]
impl BlobWriter for LocalBlobWriter {
    async fn write(&mut self, frame: Bytes) -> Result<(), StorageError> {
        self.file.write_all(&frame).await?;
        self.meta.size += frame.len() as u64;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<String, StorageError> {
        let mut this = *self;

        this.file.flush().await?;
        this.file.sync_all().await?;
        drop(this.file);

        // Payload lands first; the sidecar rename is what makes the blob
        // addressable, so a crash in between leaves only an orphan payload.
        fs::rename(&this.tmp_data, &this.data_path).await?;

        let json = serde_json::to_vec_pretty(&this.meta)
            .map_err(|e| StorageError::Backend(format!("Failed to encode blob metadata: {}", e)))?;
        fs::write(&this.tmp_meta, &json).await?;
        fs::rename(&this.tmp_meta, &this.meta_path).await?;

        Ok(this.meta.id)
    }

    async fn abort(self: Box<Self>) -> Result<(), StorageError> {
        let this = *self;
        drop(this.file);
        remove_if_present(&this.tmp_data).await?;
        remove_if_present(&this.tmp_meta).await?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tempfile::TempDir;

    async fn collect(mut stream: ByteStream) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    fn new_blob(name: &str) -> NewBlob<'_> {
        NewBlob {
            name,
            content_type: Some("video/mp4"),
            tags: BlobTags {
                upload_id: "u-1".to_string(),
                original_name: "clip.mp4".to_string(),
                declared_size: Some(11),
            },
        }
    }

    #[tokio::test]
    async fn write_commit_read() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::open(dir.path().to_path_buf()).await.unwrap();

        let mut writer = store.open_writer(new_blob("u-1-clip.mp4")).await.unwrap();
        writer.write(Bytes::from_static(b"hello ")).await.unwrap();
        writer.write(Bytes::from_static(b"world")).await.unwrap();
        let id = writer.commit().await.unwrap();

        let stat = store.stat(&id).await.unwrap();
        assert_eq!(stat.size, Some(11));
        assert_eq!(stat.content_type.as_deref(), Some("video/mp4"));
        assert_eq!(stat.name.as_deref(), Some("u-1-clip.mp4"));

        let full = collect(store.open_reader(&id, None).await.unwrap()).await;
        assert_eq!(full, b"hello world");

        let range = collect(
            store
                .open_reader(&id, Some(ByteRange::new(6, 10)))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(range, b"world");
    }

    #[tokio::test]
    async fn abort_leaves_nothing_addressable() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::open(dir.path().to_path_buf()).await.unwrap();

        let mut writer = store.open_writer(new_blob("u-1-clip.mp4")).await.unwrap();
        writer.write(Bytes::from_static(b"partial")).await.unwrap();
        writer.abort().await.unwrap();

        // Only the (empty) temp directory remains.
        let mut entries = fs::read_dir(dir.path()).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        assert_eq!(names, vec![TMP_DIR.to_string()]);
    }

    #[tokio::test]
    async fn missing_blob_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::open(dir.path().to_path_buf()).await.unwrap();

        let err = store.stat("no-such-blob").await.unwrap_err();
        assert!(matches!(err, StorageError::ObjectNotFound(_)));

        let err = match store.open_reader("no-such-blob", None).await {
            Ok(_) => panic!("expected open_reader to fail for missing blob"),
            Err(e) => e,
        };
        assert!(matches!(err, StorageError::ObjectNotFound(_)));

        // Traversal-shaped handles cannot name a blob.
        let err = store.stat("../etc/passwd").await.unwrap_err();
        assert!(matches!(err, StorageError::ObjectNotFound(_)));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::open(dir.path().to_path_buf()).await.unwrap();

        let mut writer = store.open_writer(new_blob("u-1-clip.mp4")).await.unwrap();
        writer.write(Bytes::from_static(b"data")).await.unwrap();
        let id = writer.commit().await.unwrap();

        store.delete(&id).await.unwrap();
        store.delete(&id).await.unwrap();

        let err = store.stat(&id).await.unwrap_err();
        assert!(matches!(err, StorageError::ObjectNotFound(_)));
    }
}
