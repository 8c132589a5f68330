use axum::Json;
use axum::body::Body;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use tokio_util::io::ReaderStream;

use crate::backup::naming::BackupKind;
use crate::errors::{BackupError, Result};
use crate::server::AppState;

const IMPORT_FIELD: &str = "file";

#[derive(Debug, Deserialize)]
pub struct CreateBackupRequest {
    pub backup_type: String,
    /// Accepted for compatibility; artifacts are always pg_dump custom format.
    #[serde(default)]
    pub format: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FilenameQuery {
    pub backup_filename: String,
}

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub backup_filename: String,
    pub bucket_name: String,
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn create_backup(
    State(state): State<AppState>,
    Json(request): Json<CreateBackupRequest>,
) -> Result<Response> {
    let kind: BackupKind = request.backup_type.parse()?;
    if let Some(format) = &request.format {
        tracing::debug!(format, "ignoring requested dump format");
    }
    state.service.spawn_create(kind)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "message": format!("{} backup creation in progress", kind) })),
    )
        .into_response())
}

pub async fn list_backups(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    let backups = state.service.list().await?;
    Ok(Json(json!({ "backups": backups })))
}

pub async fn download_backup(
    State(state): State<AppState>,
    Path(backup_filename): Path<String>,
) -> Result<Response> {
    let (name, artifact) = state.service.download(&backup_filename).await?;
    // The name matched the artifact grammar, so it is safe inside the header.
    let disposition = format!("attachment; filename=\"{}\"", name);
    let body = Body::from_stream(ReaderStream::new(artifact.file));
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
            (header::CONTENT_LENGTH, artifact.len.to_string()),
        ],
        body,
    )
        .into_response())
}

pub async fn delete_backup(
    State(state): State<AppState>,
    Query(query): Query<FilenameQuery>,
) -> Result<Json<serde_json::Value>> {
    state.service.delete(&query.backup_filename).await?;
    Ok(Json(json!({
        "message": format!("Backup {} deleted", query.backup_filename)
    })))
}

pub async fn upload_backup(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
) -> Result<Json<serde_json::Value>> {
    state
        .service
        .upload(&query.backup_filename, &query.bucket_name)
        .await?;
    Ok(Json(json!({
        "message": format!(
            "Backup {} uploaded to bucket {}",
            query.backup_filename, query.bucket_name
        )
    })))
}

pub async fn import_backup(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>> {
    let malformed = |e: axum::extract::multipart::MultipartError| {
        BackupError::InvalidImport(format!("malformed upload: {}", e.body_text()))
    };
    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        if field.name() != Some(IMPORT_FIELD) {
            continue;
        }
        let declared = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.map_err(malformed)?;
        let name = state.service.import(&bytes, &declared).await?;
        return Ok(Json(json!({
            "message": format!("Backup imported as {} and restored", name),
            "backup_filename": name.as_str(),
        })));
    }
    Err(BackupError::InvalidImport(format!(
        "missing multipart field {:?}",
        IMPORT_FIELD
    )))
}

pub async fn restore_backup(
    State(state): State<AppState>,
    Query(query): Query<FilenameQuery>,
) -> Result<Json<serde_json::Value>> {
    state.service.restore(&query.backup_filename).await?;
    Ok(Json(json!({
        "message": format!("Database restored from {}", query.backup_filename)
    })))
}
