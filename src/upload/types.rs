//! Upload session types and wire DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Constants
// ============================================================================

/// Maximum length of a sanitized file name
pub const MAX_NAME_LENGTH: usize = 200;

/// Default page size for session listings
pub const DEFAULT_LIST_LIMIT: i64 = 50;

/// Hard cap for session listings
pub const MAX_LIST_LIMIT: i64 = 200;

/// Hard cap on identifiers accepted by a single batch delete
pub const MAX_BATCH_DELETE: usize = 200;

// ============================================================================
// Session Record
// ============================================================================

/// Durable record of one upload attempt
#[derive(Debug, Clone)]
pub struct SessionRecord {
    /// Opaque identifier assigned at creation
    pub upload_id: String,

    /// Display name as the client sent it
    pub original_name: String,

    /// Sanitized, upload-id-namespaced storage name
    pub stored_name: String,

    /// Blob store handle; set once finalize succeeds
    pub blob_id: Option<String>,

    /// Client-declared size, advisory only
    pub declared_size: Option<i64>,

    /// Client-declared MIME type, advisory only
    pub mime_type: Option<String>,

    /// Expected chunk index range is `[0, total_chunks)`
    pub total_chunks: u32,

    /// Chunk indices recorded as received, ascending
    pub received_chunks: Vec<u32>,

    pub status: SessionStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn is_completed(&self) -> bool {
        self.status == SessionStatus::Completed
    }
}

/// Session status
///
/// The only transition is `Uploading -> Completed`; deletion removes the
/// record rather than storing a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    Uploading,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Uploading => "UPLOADING",
            SessionStatus::Completed => "COMPLETED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "UPLOADING" => Some(SessionStatus::Uploading),
            "COMPLETED" => Some(SessionStatus::Completed),
            _ => None,
        }
    }
}

// ============================================================================
// Wire Types
// ============================================================================

/// Request to create an upload session
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUploadRequest {
    pub file_name: String,

    pub total_chunks: i64,

    #[serde(default)]
    pub file_size: Option<u64>,

    #[serde(default)]
    pub mime_type: Option<String>,
}

/// Response to session creation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUploadResponse {
    pub upload_id: String,
    pub stored_file_name: String,
}

/// Response after staging a chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUploadResponse {
    pub chunk_index: u32,
    pub chunks_received: usize,
    pub total_chunks: u32,
    pub complete: bool,
}

/// Response after finalizing an upload; repeatable
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeResponse {
    pub message: String,
    pub blob_id: String,
    pub media_url: String,
}

/// Full session view returned by status and list endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub upload_id: String,
    pub original_file_name: String,
    pub stored_file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub total_chunks: u32,
    pub uploaded_chunks: Vec<u32>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
}

impl From<SessionRecord> for SessionView {
    fn from(record: SessionRecord) -> Self {
        let media_url = record
            .is_completed()
            .then(|| format!("/api/upload/{}/media", record.upload_id));

        SessionView {
            upload_id: record.upload_id,
            original_file_name: record.original_name,
            stored_file_name: record.stored_name,
            blob_id: record.blob_id,
            file_size: record.declared_size,
            mime_type: record.mime_type,
            total_chunks: record.total_chunks,
            uploaded_chunks: record.received_chunks,
            status: record.status,
            created_at: record.created_at,
            updated_at: record.updated_at,
            media_url,
        }
    }
}

/// Outcome of deleting one session in a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOutcome {
    pub upload_id: String,
    pub deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Batch delete request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchDeleteRequest {
    pub upload_ids: Vec<String>,
}

/// Batch delete response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchDeleteResponse {
    pub ok: bool,
    pub deleted_count: usize,
    pub results: Vec<DeleteOutcome>,
}

// ============================================================================
// Name Sanitization
// ============================================================================

/// Sanitize a client-supplied file name for storage.
///
/// Takes the basename only, collapses runs of characters outside
/// `[A-Za-z0-9_.- ]` (which covers control characters and path syntax)
/// into a single underscore, collapses whitespace, trims, and truncates.
/// The result may be empty; callers reject that case.
pub fn sanitize_file_name(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();

    let mut replaced = String::with_capacity(base.len());
    let mut in_run = false;
    for c in base.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | ' ') {
            replaced.push(c);
            in_run = false;
        } else if !in_run {
            replaced.push('_');
            in_run = true;
        }
    }

    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(MAX_NAME_LENGTH).collect()
}

// ============================================================================
// Tests
// ============================================================================
