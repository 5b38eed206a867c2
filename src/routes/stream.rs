//! Media streaming routes
//!
//! Serves reassembled blobs under HTTP Range semantics: single-range
//! requests get 206 with exactly the requested span, everything else
//! (multi-range, suffix form, malformed, out of bounds) gets 416, and
//! rangeless requests stream the whole object.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::Response,
    routing::get,
    Router,
};
use std::future::Future;
use uuid::Uuid;

use crate::error::{AppError, Result, StorageError};
use crate::state::AppState;
use crate::storage::{BlobStat, ByteRange, ByteStream};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:blob_id", get(stream_blob))
        .route("/legacy/:file_name", get(stream_legacy))
}

/// GET /api/media/:blob_id
async fn stream_blob(
    State(state): State<AppState>,
    Path(blob_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response> {
    if Uuid::parse_str(&blob_id).is_err() {
        return Err(AppError::InvalidArgument("Invalid media id".to_string()));
    }

    let stat = state.blobs().stat(&blob_id).await?;
    let fallback_name = format!("media-{}", blob_id);

    serve_ranged(stat, range_header(&headers), fallback_name, |range| {
        let state = state.clone();
        let blob_id = blob_id.clone();
        async move { state.blobs().open_reader(&blob_id, range).await }
    })
    .await
}

/// GET /api/media/legacy/:file_name
///
/// Pre-migration records stream from the deprecated flat-file directory
/// with the same range framing as blob-backed media.
async fn stream_legacy(
    State(state): State<AppState>,
    Path(file_name): Path<String>,
    headers: HeaderMap,
) -> Result<Response> {
    let stat = state.legacy().stat(&file_name).await?;

    serve_ranged(stat, range_header(&headers), file_name.clone(), |range| {
        let state = state.clone();
        let file_name = file_name.clone();
        async move { state.legacy().open_reader(&file_name, range).await }
    })
    .await
}

fn range_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

// ============================================================================
// Range Evaluation
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RangePlan {
    /// Stream everything with a 200
    Full,
    /// Stream the span with a 206
    Partial { range: ByteRange, total: u64 },
    /// 416 with `Content-Range: bytes */total`
    Unsatisfiable(u64),
}

/// Evaluate an optional Range header against an optional total size.
///
/// Only the single-range `bytes=<start>-[<end>]` form is accepted;
/// anything else is unsatisfiable. When the store cannot report a size,
/// range handling is disabled and the full object streams.
fn evaluate_range(header: Option<&str>, total: Option<u64>) -> RangePlan {
    let (header, total) = match (header, total) {
        (Some(header), Some(total)) => (header, total),
        _ => return RangePlan::Full,
    };

    let spec = match header.strip_prefix("bytes=") {
        Some(spec) => spec,
        None => return RangePlan::Unsatisfiable(total),
    };

    let (start_str, end_str) = match spec.split_once('-') {
        Some(parts) => parts,
        None => return RangePlan::Unsatisfiable(total),
    };

    // Digits only; this also rejects multi-range (comma) and the
    // suffix form (empty start).
    let start = match parse_number(start_str) {
        Some(start) => start,
        None => return RangePlan::Unsatisfiable(total),
    };
    let end_requested = if end_str.is_empty() {
        total.saturating_sub(1)
    } else {
        match parse_number(end_str) {
            Some(end) => end,
            None => return RangePlan::Unsatisfiable(total),
        }
    };

    if start >= total {
        return RangePlan::Unsatisfiable(total);
    }

    let end = end_requested.min(total - 1);
    if end < start {
        return RangePlan::Unsatisfiable(total);
    }

    RangePlan::Partial {
        range: ByteRange::new(start, end),
        total,
    }
}

fn parse_number(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

// ============================================================================
// Response Framing
// ============================================================================

async fn serve_ranged<F, Fut>(
    stat: BlobStat,
    range_header: Option<String>,
    fallback_name: String,
    open: F,
) -> Result<Response>
where
    F: FnOnce(Option<ByteRange>) -> Fut,
    Fut: Future<Output = std::result::Result<ByteStream, StorageError>>,
{
    let content_type = sanitize_content_type(stat.content_type.as_deref());
    let disposition = format!(
        "inline; filename=\"{}\"",
        sanitize_filename(stat.name.as_deref().unwrap_or(&fallback_name))
    );

    match evaluate_range(range_header.as_deref(), stat.size) {
        RangePlan::Unsatisfiable(total) => Ok(Response::builder()
            .status(StatusCode::RANGE_NOT_SATISFIABLE)
            .header(header::CONTENT_RANGE, format!("bytes */{}", total))
            .header(header::ACCEPT_RANGES, "bytes")
            .body(Body::empty())
            .unwrap()),
        RangePlan::Partial { range, total } => {
            let stream = open(Some(range)).await?;
            Ok(Response::builder()
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_TYPE, content_type)
                .header(header::CONTENT_DISPOSITION, disposition)
                .header(header::ACCEPT_RANGES, "bytes")
                .header(
                    header::CONTENT_RANGE,
                    format!("bytes {}-{}/{}", range.start, range.end, total),
                )
                .header(header::CONTENT_LENGTH, range.byte_count().to_string())
                .body(Body::from_stream(stream))
                .unwrap())
        }
        RangePlan::Full => {
            let stream = open(None).await?;
            let mut builder = Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, content_type)
                .header(header::CONTENT_DISPOSITION, disposition)
                .header(header::ACCEPT_RANGES, "bytes");
            if let Some(total) = stat.size {
                builder = builder.header(header::CONTENT_LENGTH, total.to_string());
            }
            // A read error after this point tears down the body stream;
            // the status line is already on the wire.
            Ok(builder.body(Body::from_stream(stream)).unwrap())
        }
    }
}

/// Strip quote, newline, and non-ASCII characters so the name can never
/// break out of the Content-Disposition header.
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii() && !c.is_ascii_control() && *c != '"')
        .collect()
}

fn sanitize_content_type(content_type: Option<&str>) -> String {
    let cleaned: String = content_type
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .collect();
    if cleaned.is_empty() {
        "application/octet-stream".to_string()
    } else {
        cleaned
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn partial(start: u64, end: u64, total: u64) -> RangePlan {
        RangePlan::Partial {
            range: ByteRange::new(start, end),
            total,
        }
    }

    #[test]
    fn no_header_or_unknown_size_streams_full() {
        assert_eq!(evaluate_range(None, Some(1000)), RangePlan::Full);
        assert_eq!(evaluate_range(Some("bytes=0-10"), None), RangePlan::Full);
        assert_eq!(evaluate_range(None, None), RangePlan::Full);
    }

    #[test]
    fn simple_range() {
        assert_eq!(
            evaluate_range(Some("bytes=0-99"), Some(1000)),
            partial(0, 99, 1000)
        );
    }

    #[test]
    fn open_ended_range_runs_to_last_byte() {
        assert_eq!(
            evaluate_range(Some("bytes=500-"), Some(1000)),
            partial(500, 999, 1000)
        );
    }

    #[test]
    fn end_is_clamped_to_total() {
        assert_eq!(
            evaluate_range(Some("bytes=990-2000"), Some(1000)),
            partial(990, 999, 1000)
        );
    }

    #[test]
    fn start_at_total_is_unsatisfiable() {
        assert_eq!(
            evaluate_range(Some("bytes=1000-"), Some(1000)),
            RangePlan::Unsatisfiable(1000)
        );
    }

    #[test]
    fn inverted_range_is_unsatisfiable() {
        assert_eq!(
            evaluate_range(Some("bytes=50-20"), Some(1000)),
            RangePlan::Unsatisfiable(1000)
        );
    }

    #[test]
    fn multi_range_is_unsatisfiable() {
        assert_eq!(
            evaluate_range(Some("bytes=0-10,20-30"), Some(1000)),
            RangePlan::Unsatisfiable(1000)
        );
    }

    #[test]
    fn suffix_range_is_unsatisfiable() {
        assert_eq!(
            evaluate_range(Some("bytes=-500"), Some(1000)),
            RangePlan::Unsatisfiable(1000)
        );
    }

    #[test]
    fn malformed_headers_are_unsatisfiable() {
        for header in ["bytes=abc-", "bytes=0x10-20", "chunks=0-10", "bytes=", "bytes=5"] {
            assert_eq!(
                evaluate_range(Some(header), Some(1000)),
                RangePlan::Unsatisfiable(1000),
                "header {:?}",
                header
            );
        }
    }

    #[test]
    fn empty_object_satisfies_nothing() {
        assert_eq!(
            evaluate_range(Some("bytes=0-"), Some(0)),
            RangePlan::Unsatisfiable(0)
        );
    }

    #[test]
    fn filename_sanitization_blocks_header_injection() {
        assert_eq!(
            sanitize_filename("movie\"\r\nSet-Cookie: x=y.mp4"),
            "movieSet-Cookie: x=y.mp4"
        );
    }
}
