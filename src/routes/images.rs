use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::path::Path as FsPath;

use crate::error::{AppError, AppResult};
use crate::extractors::{AppJson, ClientIp, RequireAdmin};
use crate::naming::{file_extension, is_image_file, is_within, sanitize_file_name, unique_path};
use crate::routes::StatusResponse;
use crate::state::AppState;

/// Ceiling for admin gallery uploads.
pub const UPLOAD_MAX_BYTES: usize = 32 * 1024 * 1024;

#[derive(Serialize)]
struct UploadResponse {
    status: &'static str,
    name: String,
    folder: String,
}

async fn upload(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    ClientIp(ip): ClientIp,
    mut multipart: Multipart,
) -> AppResult<Json<UploadResponse>> {
    let mut folder_slug = String::new();
    let mut override_name = String::new();
    let mut original_name: Option<String> = None;
    let mut data: Option<axum::body::Bytes> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "folder" => folder_slug = field.text().await?.trim().to_string(),
            "name" => override_name = field.text().await?.trim().to_string(),
            "file" => {
                original_name = field.file_name().map(str::to_string);
                data = Some(field.bytes().await?);
            }
            _ => {
                let _ = field.bytes().await?;
            }
        }
    }

    if folder_slug.is_empty() {
        return Err(AppError::BadRequest("choose a target folder".into()));
    }
    let folder = state.folders.get_by_slug(&folder_slug).map_err(|e| {
        match AppError::from(e) {
            AppError::NotFound => AppError::BadRequest("folder does not exist".into()),
            other => other,
        }
    })?;

    let original = original_name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("no file in form".into()))?;
    let data = data.ok_or_else(|| AppError::BadRequest("no file in form".into()))?;

    let mut filename = if override_name.is_empty() {
        sanitize_file_name(&original)
    } else {
        sanitize_file_name(&override_name)
    };
    if filename.is_empty() {
        return Err(AppError::BadRequest("invalid file name".into()));
    }

    // The sanitized name may have lost its extension; recover it from the
    // original upload name.
    let ext = file_extension(&original)
        .or_else(|| file_extension(&filename))
        .ok_or_else(|| AppError::BadRequest("file needs an extension".into()))?;
    if file_extension(&filename).is_none() {
        filename = format!("{}.{}", filename, ext);
    }
    if !is_image_file(&filename) {
        return Err(AppError::BadRequest("unsupported file type".into()));
    }

    let target_dir = state.folders.dir_for(&folder);
    tokio::fs::create_dir_all(&target_dir).await?;

    let target = unique_path(&target_dir, &filename)?;
    if !is_within(&target_dir, &target) {
        return Err(AppError::BadRequest("invalid file name".into()));
    }
    tokio::fs::write(&target, &data).await?;

    state.request_log.log(&ip, "upload");

    let stored = target
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(&filename)
        .to_string();
    Ok(Json(UploadResponse {
        status: "ok",
        name: stored,
        folder: folder_slug,
    }))
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct DeleteImageRequest {
    name: String,
    folder: String,
}

async fn delete(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    ClientIp(ip): ClientIp,
    AppJson(req): AppJson<DeleteImageRequest>,
) -> AppResult<Json<StatusResponse>> {
    let folder_slug = req.folder.trim();
    let name = req.name.trim();
    if folder_slug.is_empty() || name.is_empty() {
        return Err(AppError::BadRequest("invalid request".into()));
    }

    let folder = state.folders.get_by_slug(folder_slug).map_err(|e| {
        match AppError::from(e) {
            AppError::NotFound => AppError::BadRequest("folder does not exist".into()),
            other => other,
        }
    })?;

    let filename = FsPath::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| AppError::BadRequest("invalid file".into()))?
        .to_string();
    if !is_image_file(&filename) {
        return Err(AppError::BadRequest("unsupported file".into()));
    }

    let target_dir = state.folders.dir_for(&folder);
    let target = target_dir.join(&filename);
    if !is_within(&target_dir, &target) {
        return Err(AppError::BadRequest("invalid file".into()));
    }

    match tokio::fs::remove_file(&target).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::NotFound);
        }
        Err(e) => return Err(e.into()),
    }

    state.request_log.log(&ip, "delete");
    Ok(Json(StatusResponse::ok()))
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct RenameImageRequest {
    folder: String,
    old_name: String,
    new_name: String,
}

#[derive(Serialize)]
struct RenameResponse {
    status: &'static str,
    name: String,
}

async fn rename(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    ClientIp(ip): ClientIp,
    AppJson(req): AppJson<RenameImageRequest>,
) -> AppResult<Json<RenameResponse>> {
    let folder_slug = req.folder.trim();
    let old_name = req.old_name.trim();
    let new_name = req.new_name.trim();
    if folder_slug.is_empty() || old_name.is_empty() || new_name.is_empty() {
        return Err(AppError::BadRequest("invalid request".into()));
    }

    let folder = state.folders.get_by_slug(folder_slug).map_err(|e| {
        match AppError::from(e) {
            AppError::NotFound => AppError::BadRequest("folder does not exist".into()),
            other => other,
        }
    })?;

    let old_file = FsPath::new(old_name)
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| AppError::BadRequest("invalid file".into()))?
        .to_string();
    if !is_image_file(&old_file) {
        return Err(AppError::BadRequest("unsupported file".into()));
    }

    let mut new_file = sanitize_file_name(new_name);
    if new_file.is_empty() {
        return Err(AppError::BadRequest("invalid file name".into()));
    }
    let old_ext = file_extension(&old_file)
        .ok_or_else(|| AppError::BadRequest("unknown file extension".into()))?;
    if file_extension(&new_file).is_none() {
        new_file = format!("{}.{}", new_file, old_ext);
    }
    if !is_image_file(&new_file) {
        return Err(AppError::BadRequest("unsupported file extension".into()));
    }
    if new_file == old_file {
        return Ok(Json(RenameResponse {
            status: "ok",
            name: old_file,
        }));
    }

    let target_dir = state.folders.dir_for(&folder);
    match tokio::fs::metadata(&target_dir).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::BadRequest("folder does not exist".into()));
        }
        Err(e) => return Err(e.into()),
    }

    let old_path = target_dir.join(&old_file);
    let new_path = target_dir.join(&new_file);
    if !is_within(&target_dir, &old_path) {
        return Err(AppError::BadRequest("invalid file".into()));
    }
    if !is_within(&target_dir, &new_path) {
        return Err(AppError::BadRequest("invalid file name".into()));
    }

    match tokio::fs::metadata(&old_path).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::NotFound);
        }
        Err(e) => return Err(e.into()),
    }
    match tokio::fs::metadata(&new_path).await {
        Ok(_) => {
            return Err(AppError::BadRequest(
                "a file with this name already exists".into(),
            ));
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    tokio::fs::rename(&old_path, &new_path).await?;

    state.request_log.log(&ip, "rename");
    Ok(Json(RenameResponse {
        status: "ok",
        name: new_file,
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/upload",
            post(upload).layer(DefaultBodyLimit::max(UPLOAD_MAX_BYTES)),
        )
        .route("/api/delete", post(delete))
        .route("/api/images/rename", post(rename))
}
