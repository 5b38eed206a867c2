//! Durable upload session store
//!
//! Tracks upload progress and metadata lifecycle. Chunk payloads never pass
//! through here; receipts live in the `upload_chunks` table so that a
//! duplicate receipt is a silent no-op and concurrent receipts for distinct
//! indices can never lose one another.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::upload::types::{
    sanitize_file_name, SessionRecord, SessionStatus, DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT,
};

/// Durable session store backed by SQLite
#[derive(Clone)]
pub struct SessionStore {
    pool: SqlitePool,
}

/// Parameters for creating a session
#[derive(Debug, Clone)]
pub struct NewSession<'a> {
    pub original_name: &'a str,
    pub total_chunks: i64,
    pub declared_size: Option<i64>,
    pub mime_type: Option<&'a str>,
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    upload_id: String,
    original_name: String,
    stored_name: String,
    blob_id: Option<String>,
    declared_size: Option<i64>,
    mime_type: Option<String>,
    total_chunks: i64,
    status: String,
    created_at: String,
    updated_at: String,
}

impl SessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new upload session and return its record.
    ///
    /// The stored name is derived once, here, as `"{upload_id}-{sanitized}"`
    /// so collisions across sessions are structurally impossible.
    pub async fn create(&self, new: NewSession<'_>) -> Result<SessionRecord> {
        if new.total_chunks <= 0 || new.total_chunks > u32::MAX as i64 {
            return Err(AppError::InvalidArgument(format!(
                "totalChunks must be a positive integer, got {}",
                new.total_chunks
            )));
        }

        let sanitized = sanitize_file_name(new.original_name);
        if sanitized.is_empty() {
            return Err(AppError::InvalidArgument(
                "fileName is empty after sanitization".to_string(),
            ));
        }

        let upload_id = Uuid::new_v4().to_string();
        let stored_name = format!("{}-{}", upload_id, sanitized);
        let now = now_stamp();

        sqlx::query(
            r#"
            INSERT INTO upload_sessions
                (upload_id, original_name, stored_name, declared_size, mime_type,
                 total_chunks, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, 'UPLOADING', ?, ?)
            "#,
        )
        .bind(&upload_id)
        .bind(new.original_name)
        .bind(&stored_name)
        .bind(new.declared_size)
        .bind(new.mime_type)
        .bind(new.total_chunks)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            upload_id = %upload_id,
            file_name = %new.original_name,
            total_chunks = new.total_chunks,
            "Created upload session"
        );

        self.get(&upload_id).await
    }

    /// Record a chunk index as received.
    ///
    /// Idempotent: re-recording an already-present index is a silent
    /// success. Indices may arrive in any order.
    pub async fn record_chunk_received(&self, upload_id: &str, index: u32) -> Result<()> {
        let total: i64 = sqlx::query_scalar(
            "SELECT total_chunks FROM upload_sessions WHERE upload_id = ?",
        )
        .bind(upload_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Upload session {}", upload_id)))?;

        if (index as i64) >= total {
            return Err(AppError::InvalidArgument(format!(
                "chunkIndex {} outside [0, {})",
                index, total
            )));
        }

        let now = now_stamp();
        sqlx::query(
            "INSERT OR IGNORE INTO upload_chunks (upload_id, chunk_index, received_at) VALUES (?, ?, ?)",
        )
        .bind(upload_id)
        .bind(index as i64)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        sqlx::query("UPDATE upload_sessions SET updated_at = ? WHERE upload_id = ?")
            .bind(&now)
            .bind(upload_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Fetch one session
    pub async fn get(&self, upload_id: &str) -> Result<SessionRecord> {
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT upload_id, original_name, stored_name, blob_id, declared_size, mime_type,
                    total_chunks, status, created_at, updated_at
             FROM upload_sessions WHERE upload_id = ?",
        )
        .bind(upload_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Upload session {}", upload_id)))?;

        let received = self.received_indices(upload_id).await?;
        self.record_from_row(row, received)
    }

    /// List sessions, newest-created first.
    ///
    /// The limit is clamped to [`MAX_LIST_LIMIT`]; absent or non-positive
    /// values fall back to [`DEFAULT_LIST_LIMIT`].
    pub async fn list(&self, limit: Option<i64>) -> Result<Vec<SessionRecord>> {
        let limit = limit
            .filter(|l| *l > 0)
            .map(|l| l.min(MAX_LIST_LIMIT))
            .unwrap_or(DEFAULT_LIST_LIMIT);

        let rows = sqlx::query_as::<_, SessionRow>(
            "SELECT upload_id, original_name, stored_name, blob_id, declared_size, mime_type,
                    total_chunks, status, created_at, updated_at
             FROM upload_sessions
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let received = self.received_indices(&row.upload_id).await?;
            records.push(self.record_from_row(row, received)?);
        }
        Ok(records)
    }

    /// Transition a session to COMPLETED and attach its blob handle.
    ///
    /// Fails with `Conflict` if the session is already COMPLETED; callers
    /// in the finalize path absorb that as success.
    pub async fn mark_completed(&self, upload_id: &str, blob_id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE upload_sessions
             SET status = 'COMPLETED', blob_id = ?, updated_at = ?
             WHERE upload_id = ? AND status <> 'COMPLETED'",
        )
        .bind(blob_id)
        .bind(now_stamp())
        .bind(upload_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let exists: Option<i64> =
                sqlx::query_scalar("SELECT 1 FROM upload_sessions WHERE upload_id = ?")
                    .bind(upload_id)
                    .fetch_optional(&self.pool)
                    .await?;
            return match exists {
                Some(_) => Err(AppError::Conflict(format!(
                    "Upload session {} already completed",
                    upload_id
                ))),
                None => Err(AppError::NotFound(format!("Upload session {}", upload_id))),
            };
        }

        Ok(())
    }

    /// Delete a session record and its chunk receipts.
    ///
    /// Returns false if the record did not exist.
    pub async fn delete(&self, upload_id: &str) -> Result<bool> {
        sqlx::query("DELETE FROM upload_chunks WHERE upload_id = ?")
            .bind(upload_id)
            .execute(&self.pool)
            .await?;

        let result = sqlx::query("DELETE FROM upload_sessions WHERE upload_id = ?")
            .bind(upload_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn received_indices(&self, upload_id: &str) -> Result<Vec<u32>> {
        let indices: Vec<i64> = sqlx::query_scalar(
            "SELECT chunk_index FROM upload_chunks WHERE upload_id = ? ORDER BY chunk_index",
        )
        .bind(upload_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(indices.into_iter().map(|i| i as u32).collect())
    }

    fn record_from_row(&self, row: SessionRow, received: Vec<u32>) -> Result<SessionRecord> {
        let status = SessionStatus::parse(&row.status).ok_or_else(|| {
            AppError::IntegrityError(format!(
                "Session {} has unknown status {:?}",
                row.upload_id, row.status
            ))
        })?;

        Ok(SessionRecord {
            upload_id: row.upload_id,
            original_name: row.original_name,
            stored_name: row.stored_name,
            blob_id: row.blob_id,
            declared_size: row.declared_size,
            mime_type: row.mime_type,
            total_chunks: row.total_chunks as u32,
            received_chunks: received,
            status,
            created_at: parse_stamp(&row.created_at),
            updated_at: parse_stamp(&row.updated_at),
        })
    }
}

/// Fixed-width RFC 3339 timestamp; lexical order matches chronological order.
fn now_stamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_stamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

// ============================================================================
// Tests
// ============================================================================
