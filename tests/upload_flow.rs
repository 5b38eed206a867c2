//! End-to-end tests over the real router: session creation, out-of-order
//! chunk uploads, finalize, ranged playback, and deletion.

use std::str::FromStr;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tempfile::TempDir;
use tower::ServiceExt;

use mediavault_server::config::Config;
use mediavault_server::db::initialize_schema;
use mediavault_server::routes;
use mediavault_server::state::AppState;
use mediavault_server::storage::{BlobStore, LegacyFileStore, LocalBlobStore};

struct Harness {
    _dir: TempDir,
    app: axum::Router,
    pool: SqlitePool,
    media_dir: std::path::PathBuf,
}

async fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let config = Config::with_data_dir(dir.path(), "sqlite::memory:");

    let options = SqliteConnectOptions::from_str("sqlite::memory:").unwrap();
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();
    initialize_schema(&pool).await.unwrap();

    let blobs = Arc::new(LocalBlobStore::open(config.storage.blob_dir()).await.unwrap())
        as Arc<dyn BlobStore>;
    let media_dir = config.storage.media_dir();
    let legacy = LegacyFileStore::open(media_dir.clone()).await.unwrap();

    let state = AppState::new(config, pool.clone(), blobs, legacy);
    let app = routes::api_router(state);

    Harness {
        _dir: dir,
        app,
        pool,
        media_dir,
    }
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Bytes) {
    let response = app.clone().oneshot(request).await.unwrap();
    let (parts, body) = response.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    (parts.status, parts.headers, bytes)
}

async fn send_json(app: &axum::Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let (status, _, bytes) = send(app, request).await;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn get_json(app: &axum::Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let (status, _, bytes) = send(app, request).await;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn create_session(app: &axum::Router, name: &str, total_chunks: u32) -> String {
    let (status, body) = send_json(
        app,
        "POST",
        "/api/upload/init",
        json!({ "fileName": name, "totalChunks": total_chunks, "mimeType": "video/mp4" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["uploadId"].as_str().unwrap().to_string()
}

async fn upload_chunk(app: &axum::Router, upload_id: &str, index: u32, data: &'static [u8]) -> Value {
    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/upload/{}/chunk/{}", upload_id, index))
        .body(Body::from(data))
        .unwrap();
    let (status, _, bytes) = send(app, request).await;
    assert_eq!(status, StatusCode::OK, "chunk {} rejected", index);
    serde_json::from_slice(&bytes).unwrap()
}

async fn get_media(
    app: &axum::Router,
    uri: &str,
    range: Option<&str>,
) -> (StatusCode, axum::http::HeaderMap, Bytes) {
    let mut builder = Request::builder().uri(uri);
    if let Some(range) = range {
        builder = builder.header(header::RANGE, range);
    }
    send(app, builder.body(Body::empty()).unwrap()).await
}

#[tokio::test]
async fn upload_reassembles_and_streams_with_ranges() {
    let h = harness().await;

    let (status, body) = send_json(
        &h.app,
        "POST",
        "/api/upload/init",
        json!({ "fileName": "My Video.mp4", "totalChunks": 3, "fileSize": 9, "mimeType": "video/mp4" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let upload_id = body["uploadId"].as_str().unwrap().to_string();
    assert!(body["storedFileName"]
        .as_str()
        .unwrap()
        .ends_with("-My Video.mp4"));

    // Chunks arrive out of order; index order decides the blob layout.
    upload_chunk(&h.app, &upload_id, 2, b"cc!").await;
    upload_chunk(&h.app, &upload_id, 0, b"aaaa").await;
    let last = upload_chunk(&h.app, &upload_id, 1, b"bb").await;
    assert_eq!(last["chunksReceived"], 3);
    assert_eq!(last["complete"], true);

    let (status, view) = get_json(&h.app, &format!("/api/upload/{}", upload_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["status"], "UPLOADING");
    assert_eq!(view["uploadedChunks"], json!([0, 1, 2]));

    let (status, done) = send_json(
        &h.app,
        "POST",
        &format!("/api/upload/{}/complete", upload_id),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["message"], "Upload completed");
    let blob_id = done["blobId"].as_str().unwrap().to_string();

    // Finalize is repeatable and returns the same blob.
    let (status, again) = send_json(
        &h.app,
        "POST",
        &format!("/api/upload/{}/complete", upload_id),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["message"], "Upload already completed");
    assert_eq!(again["blobId"].as_str().unwrap(), blob_id);

    let (status, view) = get_json(&h.app, &format!("/api/upload/{}", upload_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["status"], "COMPLETED");
    assert_eq!(view["blobId"].as_str().unwrap(), blob_id);
    let media_url = view["mediaUrl"].as_str().unwrap().to_string();

    // The upload-scoped media URL redirects to the blob stream.
    let (status, headers, _) = get_media(&h.app, &media_url, None).await;
    assert_eq!(status, StatusCode::FOUND);
    let location = headers[header::LOCATION].to_str().unwrap().to_string();
    assert_eq!(location, format!("/api/media/{}", blob_id));

    // Full read.
    let (status, headers, bytes) = get_media(&h.app, &location, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&bytes[..], b"aaaabbcc!");
    assert_eq!(headers[header::CONTENT_LENGTH], "9");
    assert_eq!(headers[header::ACCEPT_RANGES], "bytes");
    assert_eq!(headers[header::CONTENT_TYPE], "video/mp4");

    // Partial read.
    let (status, headers, bytes) = get_media(&h.app, &location, Some("bytes=4-5")).await;
    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(&bytes[..], b"bb");
    assert_eq!(headers[header::CONTENT_RANGE], "bytes 4-5/9");
    assert_eq!(headers[header::CONTENT_LENGTH], "2");

    // End past the last byte is clamped.
    let (status, headers, bytes) = get_media(&h.app, &location, Some("bytes=7-100")).await;
    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(&bytes[..], b"c!");
    assert_eq!(headers[header::CONTENT_RANGE], "bytes 7-8/9");

    // Start at total size is unsatisfiable.
    let (status, headers, _) = get_media(&h.app, &location, Some("bytes=9-")).await;
    assert_eq!(status, StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(headers[header::CONTENT_RANGE], "bytes */9");

    // Multi-range is rejected outright.
    let (status, _, _) = get_media(&h.app, &location, Some("bytes=0-1,3-4")).await;
    assert_eq!(status, StatusCode::RANGE_NOT_SATISFIABLE);
}

#[tokio::test]
async fn chunk_and_finalize_validation() {
    let h = harness().await;
    let upload_id = create_session(&h.app, "clip.mp4", 2).await;

    // Out-of-range index.
    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/upload/{}/chunk/5", upload_id))
        .body(Body::from("data"))
        .unwrap();
    let (status, _, bytes) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"], "invalid_argument");

    // Unknown session.
    let request = Request::builder()
        .method("POST")
        .uri("/api/upload/no-such-session/chunk/0")
        .body(Body::from("data"))
        .unwrap();
    let (status, _, _) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Finalizing with a missing chunk reports progress.
    upload_chunk(&h.app, &upload_id, 0, b"only half").await;
    let (status, body) = send_json(
        &h.app,
        "POST",
        &format!("/api/upload/{}/complete", upload_id),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "incomplete_upload");
    assert_eq!(body["uploaded"], 1);
    assert_eq!(body["expected"], 2);
}

#[tokio::test]
async fn bad_init_requests_are_rejected() {
    let h = harness().await;

    let (status, body) = send_json(
        &h.app,
        "POST",
        "/api/upload/init",
        json!({ "fileName": "clip.mp4", "totalChunks": 0 }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_argument");

    let (status, _) = send_json(
        &h.app,
        "POST",
        "/api/upload/init",
        json!({ "fileName": "///", "totalChunks": 4 }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn delete_flow() {
    let h = harness().await;
    let upload_id = create_session(&h.app, "clip.mp4", 1).await;
    upload_chunk(&h.app, &upload_id, 0, b"payload").await;

    let (_, done) = send_json(
        &h.app,
        "POST",
        &format!("/api/upload/{}/complete", upload_id),
        json!({}),
    )
    .await;
    let blob_id = done["blobId"].as_str().unwrap().to_string();

    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/api/upload/{}", upload_id))
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::OK);

    // The record, and the blob behind it, are gone.
    let (status, _) = get_json(&h.app, &format!("/api/upload/{}", upload_id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _, _) = get_media(&h.app, &format!("/api/media/{}", blob_id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Deleting twice reports not found.
    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/api/upload/{}", upload_id))
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&h.app, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn batch_delete_reports_each_outcome() {
    let h = harness().await;
    let upload_id = create_session(&h.app, "clip.mp4", 1).await;
    upload_chunk(&h.app, &upload_id, 0, b"x").await;

    let (status, body) = send_json(
        &h.app,
        "POST",
        "/api/upload/batch-delete",
        json!({ "uploadIds": [upload_id, "unknown-id"] }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deletedCount"], 1);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["deleted"], true);
    assert_eq!(results[1]["deleted"], false);

    let (status, body) = send_json(
        &h.app,
        "POST",
        "/api/upload/batch-delete",
        json!({ "uploadIds": [] }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_argument");
}

#[tokio::test]
async fn list_is_newest_first() {
    let h = harness().await;
    let _first = create_session(&h.app, "first.mp4", 1).await;
    let second = create_session(&h.app, "second.mp4", 1).await;

    let (status, body) = get_json(&h.app, "/api/upload?limit=1").await;
    assert_eq!(status, StatusCode::OK);
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["uploadId"].as_str().unwrap(), second);

    let (_, body) = get_json(&h.app, "/api/upload").await;
    assert_eq!(body["items"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn legacy_records_stream_from_flat_files() {
    let h = harness().await;
    let upload_id = create_session(&h.app, "legacy.mp4", 1).await;

    let (_, view) = get_json(&h.app, &format!("/api/upload/{}", upload_id)).await;
    let stored_name = view["storedFileName"].as_str().unwrap().to_string();

    // A record from before the blob store migration: COMPLETED, no blob
    // handle, bytes sitting in the flat media directory.
    tokio::fs::write(h.media_dir.join(&stored_name), b"0123456789")
        .await
        .unwrap();
    sqlx::query("UPDATE upload_sessions SET status = 'COMPLETED' WHERE upload_id = ?")
        .bind(&upload_id)
        .execute(&h.pool)
        .await
        .unwrap();

    let (status, headers, _) =
        get_media(&h.app, &format!("/api/upload/{}/media", upload_id), None).await;
    assert_eq!(status, StatusCode::FOUND);
    let location = headers[header::LOCATION].to_str().unwrap().to_string();
    assert!(location.starts_with("/api/media/legacy/"));

    let (status, headers, bytes) = get_media(&h.app, &location, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&bytes[..], b"0123456789");
    assert_eq!(headers[header::CONTENT_TYPE], "video/mp4");

    let (status, headers, bytes) = get_media(&h.app, &location, Some("bytes=2-4")).await;
    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(&bytes[..], b"234");
    assert_eq!(headers[header::CONTENT_RANGE], "bytes 2-4/10");
}

#[tokio::test]
async fn incomplete_upload_has_no_media() {
    let h = harness().await;
    let upload_id = create_session(&h.app, "clip.mp4", 2).await;

    let (status, body) =
        get_json(&h.app, &format!("/api/upload/{}/media", upload_id)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Upload not completed yet");
}

#[tokio::test]
async fn health_and_unknown_routes() {
    let h = harness().await;

    let (status, body) = get_json(&h.app, "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["database"], "up");

    let (status, body) = get_json(&h.app, "/api/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Not Found");
}
