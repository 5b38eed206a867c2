//! HTTP route wiring

pub mod stream;
pub mod upload;

use axum::{
    extract::State,
    http::{StatusCode, Uri},
    routing::get,
    Json, Router,
};
use serde::Serialize;

use crate::state::AppState;

/// Assemble the full API router.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/upload", upload::router())
        .nest("/api/media", stream::router())
        .route("/api/health", get(health))
        .fallback(not_found)
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    database: &'static str,
    version: &'static str,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = match sqlx::query("SELECT 1").execute(state.db()).await {
        Ok(_) => "up",
        Err(_) => "down",
    };

    Json(HealthResponse {
        ok: true,
        database,
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn not_found(uri: Uri) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "Not Found", "path": uri.path() })),
    )
}
