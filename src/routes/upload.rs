//! Upload routes
//!
//! Endpoints:
//! - POST   /api/upload/init                 - Create an upload session
//! - POST   /api/upload/:id/chunk/:index     - Stage one chunk (raw body)
//! - POST   /api/upload/:id/complete         - Reassemble and store; repeatable
//! - GET    /api/upload/:id                  - Session status
//! - GET    /api/upload                      - List sessions, newest first
//! - GET    /api/upload/:id/media            - Redirect to the playback URL
//! - DELETE /api/upload/:id                  - Delete one session
//! - POST   /api/upload/batch-delete         - Delete many sessions

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::db::NewSession;
use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::storage::BlobSource;
use crate::upload::types::{
    BatchDeleteRequest, BatchDeleteResponse, ChunkUploadResponse, CreateUploadRequest,
    CreateUploadResponse, FinalizeResponse, SessionView, MAX_BATCH_DELETE,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/init", post(init_upload))
        .route("/", get(list_uploads))
        .route("/batch-delete", post(batch_delete))
        .route("/:upload_id", get(get_upload).delete(delete_upload))
        .route("/:upload_id/chunk/:index", post(upload_chunk))
        .route("/:upload_id/complete", post(complete_upload))
        .route("/:upload_id/media", get(get_upload_media))
}

/// POST /api/upload/init
async fn init_upload(
    State(state): State<AppState>,
    Json(request): Json<CreateUploadRequest>,
) -> Result<Json<CreateUploadResponse>> {
    let record = state
        .sessions()
        .create(NewSession {
            original_name: &request.file_name,
            total_chunks: request.total_chunks,
            declared_size: request.file_size.map(|size| size as i64),
            mime_type: request.mime_type.as_deref(),
        })
        .await?;

    state.staging().ensure_session_dir(&record.upload_id).await?;

    Ok(Json(CreateUploadResponse {
        upload_id: record.upload_id,
        stored_file_name: record.stored_name,
    }))
}

/// POST /api/upload/:upload_id/chunk/:index
///
/// The chunk payload is the raw request body, streamed straight into the
/// staging area. Retries of the same index are idempotent.
async fn upload_chunk(
    State(state): State<AppState>,
    Path((upload_id, chunk_index)): Path<(String, u32)>,
    body: Body,
) -> Result<Json<ChunkUploadResponse>> {
    let session = state.sessions().get(&upload_id).await?;

    if session.is_completed() {
        return Err(AppError::Conflict(format!(
            "Upload session {} already completed",
            upload_id
        )));
    }

    // Out-of-range indices are rejected before any bytes land.
    if chunk_index >= session.total_chunks {
        return Err(AppError::InvalidArgument(format!(
            "chunkIndex {} outside [0, {})",
            chunk_index, session.total_chunks
        )));
    }

    let written = state
        .staging()
        .put(&upload_id, chunk_index, body.into_data_stream())
        .await?;

    state
        .sessions()
        .record_chunk_received(&upload_id, chunk_index)
        .await?;

    let updated = state.sessions().get(&upload_id).await?;
    let chunks_received = updated.received_chunks.len();

    tracing::debug!(
        upload_id = %upload_id,
        chunk_index = chunk_index,
        bytes = written,
        chunks_received = chunks_received,
        total_chunks = updated.total_chunks,
        "Chunk staged"
    );

    Ok(Json(ChunkUploadResponse {
        chunk_index,
        chunks_received,
        total_chunks: updated.total_chunks,
        complete: chunks_received == updated.total_chunks as usize,
    }))
}

/// POST /api/upload/:upload_id/complete
async fn complete_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> Result<Json<FinalizeResponse>> {
    let outcome = state.reassembler().finalize(&upload_id).await?;

    let message = if outcome.already_completed {
        "Upload already completed"
    } else {
        "Upload completed"
    };

    Ok(Json(FinalizeResponse {
        message: message.to_string(),
        blob_id: outcome.blob_id,
        media_url: format!("/api/upload/{}/media", upload_id),
    }))
}

/// GET /api/upload/:upload_id
async fn get_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> Result<Json<SessionView>> {
    let record = state.sessions().get(&upload_id).await?;
    Ok(Json(SessionView::from(record)))
}

#[derive(Deserialize)]
struct ListQuery {
    limit: Option<i64>,
}

#[derive(Serialize)]
struct ListResponse {
    items: Vec<SessionView>,
}

/// GET /api/upload?limit=N
async fn list_uploads(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>> {
    let records = state.sessions().list(query.limit).await?;
    Ok(Json(ListResponse {
        items: records.into_iter().map(SessionView::from).collect(),
    }))
}

/// GET /api/upload/:upload_id/media
///
/// Redirects to the blob streaming URL, or to the legacy flat-file URL
/// for records that predate the blob store.
async fn get_upload_media(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> Result<Response> {
    let session = state.sessions().get(&upload_id).await?;

    if !session.is_completed() {
        return Err(AppError::InvalidArgument(
            "Upload not completed yet".to_string(),
        ));
    }

    let location = match BlobSource::resolve(session.blob_id.as_deref(), &session.stored_name) {
        BlobSource::Store(blob_id) => format!("/api/media/{}", blob_id),
        BlobSource::LegacyFile(name) => {
            format!("/api/media/legacy/{}", urlencoding::encode(&name))
        }
    };

    Ok(Response::builder()
        .status(StatusCode::FOUND)
        .header(header::LOCATION, location)
        .body(Body::empty())
        .unwrap())
}

/// DELETE /api/upload/:upload_id
async fn delete_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    state.lifecycle().delete_session(&upload_id).await?;
    Ok(Json(serde_json::json!({ "ok": true, "uploadId": upload_id })))
}

/// POST /api/upload/batch-delete
async fn batch_delete(
    State(state): State<AppState>,
    Json(request): Json<BatchDeleteRequest>,
) -> Result<Json<BatchDeleteResponse>> {
    let ids: Vec<String> = request
        .upload_ids
        .into_iter()
        .filter(|id| !id.is_empty())
        .take(MAX_BATCH_DELETE)
        .collect();

    if ids.is_empty() {
        return Err(AppError::InvalidArgument("uploadIds required".to_string()));
    }

    let results = state.lifecycle().delete_sessions(&ids).await;
    let deleted_count = results.iter().filter(|r| r.deleted).count();

    Ok(Json(BatchDeleteResponse {
        ok: true,
        deleted_count,
        results,
    }))
}
