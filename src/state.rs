//! Application state management

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::Config;
use crate::db::SessionStore;
use crate::storage::{BlobStore, LegacyFileStore};
use crate::upload::{ChunkStaging, Lifecycle, Reassembler};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    db: SqlitePool,
    sessions: SessionStore,
    staging: ChunkStaging,
    blobs: Arc<dyn BlobStore>,
    legacy: LegacyFileStore,
    reassembler: Reassembler,
    lifecycle: Lifecycle,
}

impl AppState {
    /// Assemble the application state from its startup-constructed parts.
    ///
    /// The blob store handle is built exactly once, by the caller, and
    /// flows from here into every component that needs it.
    pub fn new(
        config: Config,
        db: SqlitePool,
        blobs: Arc<dyn BlobStore>,
        legacy: LegacyFileStore,
    ) -> Self {
        let sessions = SessionStore::new(db.clone());
        let staging = ChunkStaging::new(config.storage.chunk_dir());

        let reassembler = Reassembler::new(sessions.clone(), staging.clone(), blobs.clone());
        let lifecycle = Lifecycle::new(
            sessions.clone(),
            staging.clone(),
            blobs.clone(),
            legacy.clone(),
        );

        Self {
            inner: Arc::new(AppStateInner {
                config,
                db,
                sessions,
                staging,
                blobs,
                legacy,
                reassembler,
                lifecycle,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn db(&self) -> &SqlitePool {
        &self.inner.db
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.inner.sessions
    }

    pub fn staging(&self) -> &ChunkStaging {
        &self.inner.staging
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.inner.blobs
    }

    pub fn legacy(&self) -> &LegacyFileStore {
        &self.inner.legacy
    }

    pub fn reassembler(&self) -> &Reassembler {
        &self.inner.reassembler
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.inner.lifecycle
    }
}
