//! S3-compatible blob store
//!
//! Wraps the AWS SDK for S3-compatible storage access. Sequential blob
//! writes map onto multipart uploads so a blob of any size streams through
//! a bounded buffer; nothing becomes addressable until the multipart
//! upload completes.

use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream as S3ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
    Client,
};
use bytes::{Bytes, BytesMut};
use futures::stream;
use uuid::Uuid;

use crate::config::S3Config;
use crate::error::StorageError;

use super::blob::{BlobStore, BlobWriter, ByteStream};
use super::types::{BlobStat, ByteRange, NewBlob};

/// S3 requires at least 5 MiB for every part but the last; buffering a
/// little more keeps part counts low on large blobs.
const PART_SIZE: usize = 8 * 1024 * 1024;

/// S3-compatible blob store
#[derive(Clone)]
pub struct S3BlobStore {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3BlobStore {
    /// Create a store from configuration and verify the bucket.
    pub async fn connect(config: &S3Config) -> Result<Self, StorageError> {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "mediavault",
        );

        let region = config
            .region
            .clone()
            .unwrap_or_else(|| "us-east-1".to_string());

        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint)
            .region(Region::new(region))
            .credentials_provider(credentials)
            .force_path_style(true) // Required for MinIO and other S3-compatible services
            .build();

        let client = Client::from_conf(s3_config);

        match client.head_bucket().bucket(&config.bucket).send().await {
            Ok(_) => {
                tracing::info!("Connected to S3 bucket: {}", config.bucket);
            }
            Err(e) => {
                tracing::warn!(
                    "Could not verify bucket {}: {}. Will attempt operations anyway.",
                    config.bucket,
                    e
                );
            }
        }

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            prefix: config.prefix.clone(),
        })
    }

    fn key(&self, id: &str) -> String {
        if self.prefix.is_empty() {
            id.to_string()
        } else {
            format!("{}/{}", self.prefix, id)
        }
    }
}

fn map_sdk_error(key: &str, err: impl std::fmt::Display) -> StorageError {
    let msg = err.to_string();
    if msg.contains("404") || msg.contains("NoSuchKey") || msg.contains("NotFound") {
        StorageError::ObjectNotFound(key.to_string())
    } else {
        StorageError::Backend(format!("S3 error for {}: {}", key, msg))
    }
}

#[async_trait::async_trait]
impl BlobStore for S3BlobStore {
    async fn open_writer(&self, blob: NewBlob<'_>) -> Result<Box<dyn BlobWriter>, StorageError> {
        let id = Uuid::new_v4().to_string();
        let key = self.key(&id);

        let mut request = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&key)
            .metadata("name", blob.name)
            .metadata("upload-id", &blob.tags.upload_id);
        if let Some(content_type) = blob.content_type {
            request = request.content_type(content_type);
        }
        if let Some(size) = blob.tags.declared_size {
            request = request.metadata("declared-size", size.to_string());
        }

        let response = request.send().await.map_err(|e| {
            StorageError::Backend(format!("Failed to start multipart upload for {}: {}", key, e))
        })?;

        let multipart_id = response
            .upload_id()
            .ok_or_else(|| {
                StorageError::Backend("Multipart upload returned no upload id".to_string())
            })?
            .to_string();

        Ok(Box::new(S3BlobWriter {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            key,
            id,
            multipart_id,
            parts: Vec::new(),
            buffer: BytesMut::new(),
            next_part: 1,
        }))
    }

    async fn open_reader(
        &self,
        id: &str,
        range: Option<ByteRange>,
    ) -> Result<ByteStream, StorageError> {
        let key = self.key(id);

        let mut request = self.client.get_object().bucket(&self.bucket).key(&key);
        if let Some(r) = range {
            request = request.range(format!("bytes={}-{}", r.start, r.end));
        }

        let response = request.send().await.map_err(|e| map_sdk_error(&key, e))?;

        let body = stream::try_unfold(response.body, |mut body| async move {
            match body.try_next().await {
                Ok(chunk) => Ok(chunk.map(|bytes| (bytes, body))),
                Err(e) => Err(std::io::Error::new(std::io::ErrorKind::Other, e)),
            }
        });

        Ok(Box::pin(body))
    }

    async fn stat(&self, id: &str) -> Result<BlobStat, StorageError> {
        let key = self.key(id);

        let response = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| map_sdk_error(&key, e))?;

        Ok(BlobStat {
            size: response
                .content_length()
                .and_then(|len| u64::try_from(len).ok()),
            content_type: response.content_type().map(|s| s.to_string()),
            name: response.metadata().and_then(|m| m.get("name").cloned()),
        })
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        let key = self.key(id);

        // S3 DeleteObject succeeds for absent keys, matching the
        // idempotent contract.
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to delete {}: {}", key, e)))?;

        Ok(())
    }
}

struct S3BlobWriter {
    client: Client,
    bucket: String,
    key: String,
    id: String,
    multipart_id: String,
    parts: Vec<CompletedPart>,
    buffer: BytesMut,
    next_part: i32,
}

impl S3BlobWriter {
    async fn flush_part(&mut self, data: Bytes) -> Result<(), StorageError> {
        let part_number = self.next_part;
        self.next_part += 1;

        let response = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.multipart_id)
            .part_number(part_number)
            .body(S3ByteStream::from(data))
            .send()
            .await
            .map_err(|e| {
                StorageError::Backend(format!(
                    "Failed to upload part {} of {}: {}",
                    part_number, self.key, e
                ))
            })?;

        let etag = response
            .e_tag()
            .ok_or_else(|| StorageError::Backend("Uploaded part returned no ETag".to_string()))?
            .to_string();

        self.parts.push(
            CompletedPart::builder()
                .part_number(part_number)
                .e_tag(etag)
                .build(),
        );

        Ok(())
    }
}

#[async_trait::async_trait]
impl BlobWriter for S3BlobWriter {
    async fn write(&mut self, frame: Bytes) -> Result<(), StorageError> {
        self.buffer.extend_from_slice(&frame);
        while self.buffer.len() >= PART_SIZE {
            let part = self.buffer.split_to(PART_SIZE).freeze();
            self.flush_part(part).await?;
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<String, StorageError> {
        let mut this = *self;

        // The final part may be under the 5 MiB floor; an empty blob still
        // needs one (empty) part for the upload to complete.
        if !this.buffer.is_empty() || this.parts.is_empty() {
            let rest = this.buffer.split().freeze();
            this.flush_part(rest).await?;
        }

        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(std::mem::take(&mut this.parts)))
            .build();

        this.client
            .complete_multipart_upload()
            .bucket(&this.bucket)
            .key(&this.key)
            .upload_id(&this.multipart_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| {
                StorageError::Backend(format!(
                    "Failed to complete multipart upload for {}: {}",
                    this.key, e
                ))
            })?;

        Ok(this.id)
    }

    async fn abort(self: Box<Self>) -> Result<(), StorageError> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.multipart_id)
            .send()
            .await
            .map_err(|e| {
                StorageError::Backend(format!(
                    "Failed to abort multipart upload for {}: {}",
                    self.key, e
                ))
            })?;

        Ok(())
    }
}
