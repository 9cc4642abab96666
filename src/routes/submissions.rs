use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::auth::viewer;
use crate::db::models::CollectionView;
use crate::error::{AppError, AppResult};
use crate::extractors::{Admin, AppJson, BaseUrl, ClientIp, RequireAdmin, Viewer};
use crate::naming::{
    file_extension, is_submission_file, is_within, sanitize_file_name, unique_path,
};
use crate::routes::folders::{apply_update, CreateCollectionRequest, UpdateCollectionRequest};
use crate::routes::StatusResponse;
use crate::state::AppState;
use crate::visibility::Visibility;

/// Ceiling for anonymous submission uploads, deliberately tighter than the
/// admin gallery ceiling.
pub const UPLOAD_MAX_BYTES: usize = 10 * 1024 * 1024;

#[derive(Serialize)]
struct SubmissionUploadResponse {
    status: &'static str,
    id: i64,
}

/// Anonymous upload into a submission group. Visibility gates writes the same
/// way it gates reads: private groups take admin uploads only, shared groups
/// require the current link token, public groups take anyone.
pub async fn upload(
    State(state): State<AppState>,
    Admin(admin): Admin,
    Viewer(viewer_token): Viewer,
    ClientIp(ip): ClientIp,
    mut multipart: Multipart,
) -> AppResult<Response> {
    let mut group_slug = String::new();
    let mut uploader = String::new();
    let mut link_token = String::new();
    let mut original_name: Option<String> = None;
    let mut mime_type: Option<String> = None;
    let mut data: Option<axum::body::Bytes> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "group" => group_slug = sanitize_file_name(&field.text().await?),
            "name" => uploader = field.text().await?.trim().to_string(),
            "token" => link_token = field.text().await?.trim().to_string(),
            "file" => {
                original_name = field.file_name().map(str::to_string);
                mime_type = field.content_type().map(str::to_string);
                data = Some(field.bytes().await?);
            }
            _ => {
                let _ = field.bytes().await?;
            }
        }
    }

    if group_slug.is_empty() || uploader.is_empty() {
        return Err(AppError::BadRequest(
            "provide the group and your name".into(),
        ));
    }

    let group = state.groups.get_by_slug(&group_slug).map_err(|e| {
        match AppError::from(e) {
            AppError::NotFound => AppError::BadRequest("group does not exist".into()),
            other => other,
        }
    })?;

    if group.visibility == Visibility::Private && !admin {
        return Err(AppError::Forbidden);
    }
    if group.visibility == Visibility::Shared && !admin {
        let valid = group
            .shared_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .map(|t| !link_token.is_empty() && link_token == t)
            .unwrap_or(false);
        if !valid {
            return Err(AppError::Forbidden);
        }
    }

    let original = original_name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("no file in form".into()))?;
    let data = data.ok_or_else(|| AppError::BadRequest("no file in form".into()))?;

    let mut filename = sanitize_file_name(&original);
    if filename.is_empty() {
        return Err(AppError::BadRequest("invalid file name".into()));
    }
    let ext = file_extension(&original)
        .or_else(|| file_extension(&filename))
        .ok_or_else(|| AppError::BadRequest("file needs an extension".into()))?;
    if file_extension(&filename).is_none() {
        filename = format!("{}.{}", filename, ext);
    }
    if !is_submission_file(&filename) {
        return Err(AppError::BadRequest("only images or PDF are allowed".into()));
    }

    let target_dir = state.groups.dir_for(&group);
    tokio::fs::create_dir_all(&target_dir).await?;

    let target = unique_path(&target_dir, &filename)?;
    if !is_within(&target_dir, &target) {
        return Err(AppError::BadRequest("invalid file name".into()));
    }
    tokio::fs::write(&target, &data).await?;

    let mime = mime_type
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| "application/octet-stream".to_string());
    let stored = target
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(&filename)
        .to_string();

    let id = state.submissions.insert(
        group.id,
        &uploader,
        &viewer_token,
        &stored,
        &original,
        &mime,
        data.len() as i64,
    )?;

    state.request_log.log(&ip, "submission");

    Ok((
        StatusCode::CREATED,
        Json(SubmissionUploadResponse { status: "ok", id }),
    )
        .into_response())
}

async fn list_groups(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    BaseUrl(base_url): BaseUrl,
) -> AppResult<Json<Vec<CollectionView>>> {
    let groups = state.groups.list(true)?;
    Ok(Json(
        groups.iter().map(|g| g.group_view(&base_url)).collect(),
    ))
}

async fn create_group(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    BaseUrl(base_url): BaseUrl,
    AppJson(req): AppJson<CreateCollectionRequest>,
) -> AppResult<Response> {
    let group = state.groups.create(&req.name)?;
    Ok((StatusCode::CREATED, Json(group.group_view(&base_url))).into_response())
}

async fn get_group(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    BaseUrl(base_url): BaseUrl,
    Path(id): Path<i64>,
) -> AppResult<Json<CollectionView>> {
    let group = state.groups.get_by_id(id)?;
    Ok(Json(group.group_view(&base_url)))
}

async fn update_group(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    BaseUrl(base_url): BaseUrl,
    Path(id): Path<i64>,
    AppJson(req): AppJson<UpdateCollectionRequest>,
) -> AppResult<Json<CollectionView>> {
    let group = apply_update(&state.groups, id, &req)?;
    Ok(Json(group.group_view(&base_url)))
}

async fn delete_group(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    Path(id): Path<i64>,
) -> AppResult<Json<StatusResponse>> {
    state.groups.delete(id)?;
    Ok(Json(StatusResponse::ok()))
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct FileQuery {
    download: Option<String>,
}

/// Raw submission bytes, gated by the owning group's visibility. Shared
/// groups only reveal an entry to its own contributor (or the admin).
async fn file(
    State(state): State<AppState>,
    Admin(admin): Admin,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Query(query): Query<FileQuery>,
) -> AppResult<Response> {
    let entry = state.submissions.get(id)?;
    let group = state.groups.get_by_id(entry.group_id)?;

    let viewer_token = viewer::token_from_headers(&headers);
    match group.visibility {
        Visibility::Private if !admin => return Err(AppError::NotFound),
        Visibility::Shared
            if !admin && viewer_token.as_deref() != Some(entry.contributor_token.as_str()) =>
        {
            return Err(AppError::NotFound)
        }
        _ => {}
    }

    let dir = state.groups.dir_for(&group);
    let target = dir.join(&entry.filename);
    if !is_within(&dir, &target) {
        return Err(AppError::NotFound);
    }

    let data = match tokio::fs::read(&target).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(AppError::NotFound),
        Err(e) => return Err(e.into()),
    };

    let mime = entry
        .mime_type
        .clone()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            mime_guess::from_path(&entry.original_name)
                .first_or_octet_stream()
                .to_string()
        });

    let kind = if query.download.as_deref() == Some("1") {
        "attachment"
    } else {
        "inline"
    };
    let disposition = format!("{}; filename=\"{}\"", kind, entry.original_name);

    let mut response_headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&mime) {
        response_headers.insert(header::CONTENT_TYPE, value);
    }
    // Original names may not survive a header round-trip (non-ASCII); fall
    // back to the sanitized on-disk name.
    match HeaderValue::from_str(&disposition) {
        Ok(value) => {
            response_headers.insert(header::CONTENT_DISPOSITION, value);
        }
        Err(_) => {
            let fallback = format!("{}; filename=\"{}\"", kind, entry.filename);
            if let Ok(value) = HeaderValue::from_str(&fallback) {
                response_headers.insert(header::CONTENT_DISPOSITION, value);
            }
        }
    }

    Ok((response_headers, data).into_response())
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/submissions/groups",
            get(list_groups).post(create_group),
        )
        .route(
            "/api/submissions/groups/{id}",
            get(get_group).patch(update_group).delete(delete_group),
        )
        .route("/submitted/file/{id}", get(file))
}
