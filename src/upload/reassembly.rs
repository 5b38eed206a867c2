//! Reassembly engine
//!
//! Validates that a session's staged chunk set is complete and contiguous,
//! then streams the chunks in index order into the blob store and flips the
//! session to COMPLETED. Reader and writer are decoupled by a bounded
//! channel, so in-flight unflushed bytes stay capped at a few frames no
//! matter how large the upload is or how slow the destination writes.

use bytes::BytesMut;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

use crate::db::SessionStore;
use crate::error::{AppError, Result};
use crate::storage::{BlobStore, BlobTags, NewBlob};

use super::staging::ChunkStaging;
use super::types::SessionRecord;

/// Transfer frame size
const FRAME_SIZE: usize = 64 * 1024;

/// Frames the reader may run ahead of the writer
const FLOW_WINDOW: usize = 4;

/// Result of a finalize call
#[derive(Debug, Clone)]
pub struct FinalizeOutcome {
    pub blob_id: String,
    /// True when a prior finalize already completed this session
    pub already_completed: bool,
}

/// Streams staged chunks into the blob store and completes sessions
#[derive(Clone)]
pub struct Reassembler {
    sessions: SessionStore,
    staging: ChunkStaging,
    blobs: Arc<dyn BlobStore>,
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl Reassembler {
    pub fn new(sessions: SessionStore, staging: ChunkStaging, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            sessions,
            staging,
            blobs,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Advisory per-session lock serializing concurrent finalize calls.
    fn session_lock(&self, upload_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        locks
            .entry(upload_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Finalize an upload session. Safe to call repeatedly: once a session
    /// is COMPLETED, later calls return the existing blob without touching
    /// the store again.
    pub async fn finalize(&self, upload_id: &str) -> Result<FinalizeOutcome> {
        let lock = self.session_lock(upload_id);
        let _guard = lock.lock().await;

        let session = self.sessions.get(upload_id).await?;

        if session.is_completed() {
            let blob_id = session.blob_id.ok_or_else(|| {
                AppError::IntegrityError(format!(
                    "Completed session {} has no blob handle",
                    upload_id
                ))
            })?;
            return Ok(FinalizeOutcome {
                blob_id,
                already_completed: true,
            });
        }

        let staged = self.staging.list_indices(upload_id).await?;
        self.check_complete(&session, &staged)?;

        let blob_id = self.reassemble(&session).await?;

        match self.sessions.mark_completed(upload_id, &blob_id).await {
            Ok(()) => {}
            Err(AppError::Conflict(_)) => {
                // Another finalize committed first; discard the duplicate
                // blob and report the winner's handle.
                if let Err(e) = self.blobs.delete(&blob_id).await {
                    tracing::warn!(
                        upload_id = %upload_id,
                        blob_id = %blob_id,
                        error = %e,
                        "Failed to discard duplicate blob after lost finalize race"
                    );
                }
                let winner = self.sessions.get(upload_id).await?;
                let existing = winner.blob_id.ok_or_else(|| {
                    AppError::IntegrityError(format!(
                        "Completed session {} has no blob handle",
                        upload_id
                    ))
                })?;
                return Ok(FinalizeOutcome {
                    blob_id: existing,
                    already_completed: true,
                });
            }
            Err(e) => return Err(e),
        }

        // Purge only after COMPLETED is durable; a crash here leaves at
        // worst an orphaned staging directory for the sweep to reclaim.
        if let Err(e) = self.staging.purge(upload_id).await {
            tracing::warn!(
                upload_id = %upload_id,
                error = %e,
                "Failed to purge staging after completion"
            );
        }

        tracing::info!(
            upload_id = %upload_id,
            blob_id = %blob_id,
            total_chunks = session.total_chunks,
            "Upload finalized"
        );

        Ok(FinalizeOutcome {
            blob_id,
            already_completed: false,
        })
    }

    /// The staged set is authoritative: it must be exactly `0..total`.
    /// Once it is, it must also agree with the recorded receipts;
    /// divergence there means storage corruption, not a retryable state.
    fn check_complete(&self, session: &SessionRecord, staged: &BTreeSet<u32>) -> Result<()> {
        let expected = session.total_chunks;

        let missing_index = (0..expected).find(|index| !staged.contains(index));
        if missing_index.is_some() || staged.len() != expected as usize {
            return Err(AppError::IncompleteUpload {
                uploaded: staged.len(),
                expected,
                missing_index,
            });
        }

        let recorded: BTreeSet<u32> = session.received_chunks.iter().copied().collect();
        if recorded != *staged {
            tracing::error!(
                upload_id = %session.upload_id,
                recorded = recorded.len(),
                staged = staged.len(),
                "Staged chunks disagree with recorded receipts"
            );
            return Err(AppError::IntegrityError(format!(
                "Staged chunks disagree with recorded receipts for session {}",
                session.upload_id
            )));
        }

        Ok(())
    }

    /// Stream every chunk, in ascending index order, into a fresh blob.
    /// Any read or write error aborts the write handle so no partial blob
    /// ever becomes addressable.
    async fn reassemble(&self, session: &SessionRecord) -> Result<String> {
        let mut writer = self
            .blobs
            .open_writer(NewBlob {
                name: &session.stored_name,
                content_type: session.mime_type.as_deref(),
                tags: BlobTags {
                    upload_id: session.upload_id.clone(),
                    original_name: session.original_name.clone(),
                    declared_size: session.declared_size,
                },
            })
            .await
            .map_err(|e| AppError::ReassemblyFailed(e.to_string()))?;

        let (tx, mut rx) = mpsc::channel::<bytes::Bytes>(FLOW_WINDOW);

        let staging = self.staging.clone();
        let upload_id = session.upload_id.clone();
        let total = session.total_chunks;
        let reader = tokio::spawn(async move {
            for index in 0..total {
                let mut chunk = staging.open_chunk(&upload_id, index).await.map_err(|e| {
                    std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("Chunk {} unreadable: {}", index, e),
                    )
                })?;
                loop {
                    let mut buf = BytesMut::with_capacity(FRAME_SIZE);
                    let n = chunk.read_buf(&mut buf).await?;
                    if n == 0 {
                        break;
                    }
                    // A full channel is the writer saying "not yet";
                    // send blocks until it drains.
                    if tx.send(buf.freeze()).await.is_err() {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::BrokenPipe,
                            "Blob writer stopped accepting frames",
                        ));
                    }
                }
            }
            Ok::<(), std::io::Error>(())
        });

        let mut write_error = None;
        while let Some(frame) = rx.recv().await {
            if let Err(e) = writer.write(frame).await {
                write_error = Some(e.to_string());
                break;
            }
        }
        drop(rx);

        let read_result = reader.await;

        let failure = write_error.or(match read_result {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(e) => Some(format!("Chunk reader task failed: {}", e)),
        });

        if let Some(reason) = failure {
            if let Err(e) = writer.abort().await {
                tracing::warn!(
                    upload_id = %session.upload_id,
                    error = %e,
                    "Failed to abort blob writer"
                );
            }
            return Err(AppError::ReassemblyFailed(reason));
        }

        writer
            .commit()
            .await
            .map_err(|e| AppError::ReassemblyFailed(e.to_string()))
    }
}

// ============================================================================
// Tests
// ============================================================================
