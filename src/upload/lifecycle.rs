//! Session lifecycle and garbage collection
//!
//! Deleting a session removes its blob, its legacy flat file, its staging
//! directory, and finally its durable record, tolerating each step
//! failing-as-absent. A periodic sweep reclaims staging directories
//! orphaned by a crash between finalize's commit and its purge.

use std::sync::Arc;
use std::time::Duration;

use crate::db::SessionStore;
use crate::error::{AppError, Result, StorageError};
use crate::storage::{BlobStore, LegacyFileStore};

use super::staging::ChunkStaging;
use super::types::DeleteOutcome;

/// How often the orphaned-staging sweep runs
const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Deletes sessions and reclaims orphaned storage
#[derive(Clone)]
pub struct Lifecycle {
    sessions: SessionStore,
    staging: ChunkStaging,
    blobs: Arc<dyn BlobStore>,
    legacy: LegacyFileStore,
}

impl Lifecycle {
    pub fn new(
        sessions: SessionStore,
        staging: ChunkStaging,
        blobs: Arc<dyn BlobStore>,
        legacy: LegacyFileStore,
    ) -> Self {
        Self {
            sessions,
            staging,
            blobs,
            legacy,
        }
    }

    /// Delete one session: blob, legacy file, staging, then the record.
    ///
    /// "Already absent" is swallowed at every step; any other storage
    /// failure aborts the deletion so nothing is half-forgotten.
    pub async fn delete_session(&self, upload_id: &str) -> Result<()> {
        let session = self.sessions.get(upload_id).await?;

        if let Some(blob_id) = &session.blob_id {
            match self.blobs.delete(blob_id).await {
                Ok(()) | Err(StorageError::ObjectNotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        self.legacy.delete(&session.stored_name).await?;
        self.staging.purge(upload_id).await?;
        self.sessions.delete(upload_id).await?;

        tracing::info!(
            upload_id = %upload_id,
            file_name = %session.original_name,
            "Deleted upload session"
        );

        Ok(())
    }

    /// Delete many sessions; one identifier's failure never blocks the rest.
    pub async fn delete_sessions(&self, upload_ids: &[String]) -> Vec<DeleteOutcome> {
        let mut results = Vec::with_capacity(upload_ids.len());

        for upload_id in upload_ids {
            let outcome = match self.delete_session(upload_id).await {
                Ok(()) => DeleteOutcome {
                    upload_id: upload_id.clone(),
                    deleted: true,
                    reason: None,
                },
                Err(AppError::NotFound(_)) => DeleteOutcome {
                    upload_id: upload_id.clone(),
                    deleted: false,
                    reason: Some("Not found".to_string()),
                },
                Err(e) => {
                    tracing::warn!(upload_id = %upload_id, error = %e, "Delete failed");
                    DeleteOutcome {
                        upload_id: upload_id.clone(),
                        deleted: false,
                        reason: Some(e.to_string()),
                    }
                }
            };
            results.push(outcome);
        }

        results
    }

    /// Purge staging directories whose session is COMPLETED or gone.
    ///
    /// Returns the number of directories reclaimed.
    pub async fn sweep_orphaned_staging(&self) -> Result<usize> {
        let mut reclaimed = 0;

        for upload_id in self.staging.list_sessions().await? {
            let orphaned = match self.sessions.get(&upload_id).await {
                Ok(session) => session.is_completed(),
                Err(AppError::NotFound(_)) => true,
                Err(e) => return Err(e),
            };

            if orphaned {
                self.staging.purge(&upload_id).await?;
                reclaimed += 1;
                tracing::debug!(upload_id = %upload_id, "Reclaimed orphaned staging directory");
            }
        }

        if reclaimed > 0 {
            tracing::info!(count = reclaimed, "Reclaimed orphaned staging directories");
        }

        Ok(reclaimed)
    }

    /// Start the periodic orphaned-staging sweep.
    pub fn start_sweep_task(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);

            loop {
                interval.tick().await;
                if let Err(e) = self.sweep_orphaned_staging().await {
                    tracing::warn!(error = %e, "Orphaned-staging sweep failed");
                }
            }
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
