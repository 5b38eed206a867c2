//! Storage backends for reassembled media blobs
//!
//! The primary store is either the local filesystem or an S3-compatible
//! bucket; a read-only flat-file backend serves records that predate the
//! blob store.

mod blob;
mod legacy;
mod local;
mod s3;
mod types;

pub use blob::{BlobStore, BlobWriter, ByteStream};
pub use legacy::LegacyFileStore;
pub use local::LocalBlobStore;
pub use s3::S3BlobStore;
pub use types::*;

use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use crate::config::{StorageBackend, StorageConfig};
use crate::error::StorageError;

/// Read granularity for file-backed byte streams
pub(crate) const READ_FRAME_SIZE: usize = 64 * 1024;

/// Construct the configured blob store backend.
///
/// The handle is built once at startup and passed by reference through
/// application state; nothing else constructs stores.
pub async fn connect(config: &StorageConfig) -> Result<Arc<dyn BlobStore>, StorageError> {
    match config.backend {
        StorageBackend::Local => Ok(Arc::new(LocalBlobStore::open(config.blob_dir()).await?)),
        StorageBackend::S3 => {
            let s3 = config.s3.as_ref().ok_or_else(|| {
                StorageError::Backend("S3 backend selected but not configured".to_string())
            })?;
            Ok(Arc::new(S3BlobStore::connect(s3).await?))
        }
    }
}

/// Stream a file, or an inclusive byte range of it.
pub(crate) async fn read_file_range(
    path: &Path,
    range: Option<ByteRange>,
    total: u64,
) -> Result<ByteStream, StorageError> {
    let mut file = tokio::fs::File::open(path).await?;

    let (start, len) = match range {
        Some(r) => (r.start, r.byte_count()),
        None => (0, total),
    };
    if start > 0 {
        file.seek(SeekFrom::Start(start)).await?;
    }

    let reader = file.take(len);
    Ok(Box::pin(ReaderStream::with_capacity(reader, READ_FRAME_SIZE)))
}
