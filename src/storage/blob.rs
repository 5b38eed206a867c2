//! Blob store abstraction
//!
//! A large-object store supporting append-once sequential writes and
//! random-access ranged reads. Backends are trait objects so the rest of
//! the system is indifferent to where blobs actually live.

use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

use crate::error::StorageError;

use super::types::{BlobStat, ByteRange, NewBlob};

/// Stream of blob bytes
pub type ByteStream =
    Pin<Box<dyn Stream<Item = std::result::Result<Bytes, std::io::Error>> + Send + 'static>>;

/// Sequential, append-only write handle into the blob store.
///
/// Nothing becomes addressable until `commit` returns; `abort` (or dropping
/// the handle without committing) must leave no partial blob behind.
#[async_trait::async_trait]
pub trait BlobWriter: Send {
    /// Append one frame of bytes.
    async fn write(&mut self, frame: Bytes) -> std::result::Result<(), StorageError>;

    /// Finish the write and return the new blob's handle.
    async fn commit(self: Box<Self>) -> std::result::Result<String, StorageError>;

    /// Discard everything written so far.
    async fn abort(self: Box<Self>) -> std::result::Result<(), StorageError>;
}

/// Blob store operations used by reassembly, streaming, and GC
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    /// Open a sequential writer for a new blob.
    async fn open_writer(
        &self,
        blob: NewBlob<'_>,
    ) -> std::result::Result<Box<dyn BlobWriter>, StorageError>;

    /// Open a reader over the whole blob, or an inclusive byte range of it.
    async fn open_reader(
        &self,
        id: &str,
        range: Option<ByteRange>,
    ) -> std::result::Result<ByteStream, StorageError>;

    /// Report a blob's size, content type, and name.
    async fn stat(&self, id: &str) -> std::result::Result<BlobStat, StorageError>;

    /// Delete a blob. Deleting an absent handle is not an error.
    async fn delete(&self, id: &str) -> std::result::Result<(), StorageError>;
}
