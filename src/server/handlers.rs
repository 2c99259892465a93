// HTTP request handlers

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::io::ReaderStream;

use crate::messages::{Announcement, Message};
use crate::store::{MessageStore, VersionInfo};

pub type AppState = Arc<MessageStore>;

/// Build the update API router (no layers; see [`super::UpdateServer`]).
pub fn create_router(store: AppState) -> Router {
    Router::new()
        .route("/announcement", get(handle_announcement))
        .route("/version/latest", get(handle_latest_version))
        .route("/version/:version", get(handle_version_info))
        .route("/versions", get(handle_versions))
        .route("/messages", get(handle_messages))
        .route("/download/:version", get(handle_download))
        .route("/health", get(health_check))
        .fallback(handle_not_found)
        .with_state(store)
}

fn text_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, message.into()).into_response()
}

/// GET /announcement
pub async fn handle_announcement(State(store): State<AppState>) -> Result<Json<Announcement>, Response> {
    store
        .latest_announcement()
        .map(Json)
        .ok_or_else(|| text_error(StatusCode::NOT_FOUND, "Announcement not found"))
}

/// GET /version/latest
pub async fn handle_latest_version(
    State(store): State<AppState>,
) -> Result<Json<VersionInfo>, Response> {
    store
        .latest_version()
        .map(Json)
        .ok_or_else(|| text_error(StatusCode::NOT_FOUND, "No versions available"))
}

/// GET /version/:version
pub async fn handle_version_info(
    State(store): State<AppState>,
    Path(version): Path<String>,
) -> Result<Json<VersionInfo>, Response> {
    store
        .version_info(&version)
        .map(Json)
        .ok_or_else(|| text_error(StatusCode::NOT_FOUND, "Version not found"))
}

/// GET /versions (newest first)
pub async fn handle_versions(State(store): State<AppState>) -> Json<Vec<VersionInfo>> {
    Json(store.versions())
}

/// GET /messages (full log, append order)
pub async fn handle_messages(State(store): State<AppState>) -> Json<Vec<Message>> {
    Json(store.messages())
}

/// GET /download/:version
///
/// Streams the artifact from disk rather than buffering it.
pub async fn handle_download(
    State(store): State<AppState>,
    Path(version): Path<String>,
) -> Response {
    let artifact = match store.download_version(&version) {
        Ok(artifact) => artifact,
        Err(e) if e.is_not_found() => {
            return text_error(StatusCode::NOT_FOUND, "File not found");
        }
        Err(e) => {
            tracing::warn!(%version, error = %e, "Download lookup failed");
            return text_error(StatusCode::NOT_FOUND, "Version not found");
        }
    };

    let file = match tokio::fs::File::open(&artifact.path).await {
        Ok(file) => file,
        Err(e) => {
            tracing::error!(path = %artifact.path.display(), error = %e, "Failed to open artifact");
            return text_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error sending file: {e}"),
            );
        }
    };

    tracing::info!(%version, filename = %artifact.info.filename, size = artifact.size, "Serving download");

    let disposition = format!(
        "attachment; filename=\"{}\"",
        artifact.info.filename.replace('"', "")
    );
    let headers = [
        (header::CONTENT_TYPE, "application/octet-stream".to_string()),
        (header::CONTENT_DISPOSITION, disposition),
        (header::CONTENT_LENGTH, artifact.size.to_string()),
    ];
    (headers, Body::from_stream(ReaderStream::new(file))).into_response()
}

#[derive(Debug, Serialize)]
struct HealthStatus {
    status: &'static str,
    host: String,
    messages: usize,
    versions: usize,
}

/// GET /health
pub async fn health_check(State(store): State<AppState>) -> impl IntoResponse {
    Json(HealthStatus {
        status: "ok",
        host: hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string()),
        messages: store.message_count(),
        versions: store.versions().len(),
    })
}

async fn handle_not_found() -> Response {
    text_error(StatusCode::NOT_FOUND, "Not Found")
}
