use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use qrcode::QrCode;
use serde::{Deserialize, Serialize};
use std::io::Cursor;

use crate::collections::CollectionStore;
use crate::db::models::{Collection, CollectionView};
use crate::error::{AppError, AppResult};
use crate::extractors::{Admin, AppJson, BaseUrl, ClientIp, RequireAdmin};
use crate::routes::StatusResponse;
use crate::state::AppState;
use crate::visibility::Visibility;

#[derive(Deserialize, Default)]
#[serde(default)]
pub(crate) struct CreateCollectionRequest {
    pub name: String,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct UpdateCollectionRequest {
    pub name: Option<String>,
    pub visibility: Option<String>,
    pub regenerate_link: bool,
}

/// PATCH semantics shared by folders and submission groups: rename first,
/// then visibility, then an explicit link rotation. Re-asserting `shared`
/// keeps the existing token; only `regenerateLink` rotates it.
pub(crate) fn apply_update(
    store: &CollectionStore,
    id: i64,
    req: &UpdateCollectionRequest,
) -> AppResult<Collection> {
    let mut current: Option<Collection> = None;

    if let Some(name) = req.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        current = Some(store.rename(id, name)?);
    }

    if let Some(raw) = req
        .visibility
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        let visibility: Visibility = raw
            .parse()
            .map_err(|e: crate::visibility::ParseVisibilityError| {
                AppError::BadRequest(e.to_string())
            })?;
        current = Some(store.update_visibility(id, visibility)?);
    }

    let mut rec = match current {
        Some(rec) => rec,
        None => store.get_by_id(id)?,
    };

    if req.regenerate_link {
        if rec.visibility != Visibility::Shared {
            return Err(AppError::BadRequest("sharing is not enabled".into()));
        }
        rec = store.regenerate_shared_token(id)?;
    }

    Ok(rec)
}

#[derive(Serialize)]
struct FoldersResponse {
    folders: Vec<CollectionView>,
}

async fn list(
    State(state): State<AppState>,
    Admin(admin): Admin,
    BaseUrl(base_url): BaseUrl,
) -> AppResult<Json<FoldersResponse>> {
    let folders = state.folders.list(admin)?;
    Ok(Json(FoldersResponse {
        folders: folders.iter().map(|f| f.folder_view(&base_url)).collect(),
    }))
}

async fn create(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    BaseUrl(base_url): BaseUrl,
    AppJson(req): AppJson<CreateCollectionRequest>,
) -> AppResult<Response> {
    let folder = state.folders.create(&req.name)?;
    Ok((StatusCode::CREATED, Json(folder.folder_view(&base_url))).into_response())
}

async fn get_one(
    State(state): State<AppState>,
    Admin(admin): Admin,
    BaseUrl(base_url): BaseUrl,
    Path(id): Path<i64>,
) -> AppResult<Json<CollectionView>> {
    let folder = state.folders.get_by_id(id)?;
    if !folder.visibility.accessible(admin) {
        return Err(AppError::Forbidden);
    }
    Ok(Json(folder.folder_view(&base_url)))
}

async fn update(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    BaseUrl(base_url): BaseUrl,
    Path(id): Path<i64>,
    AppJson(req): AppJson<UpdateCollectionRequest>,
) -> AppResult<Json<CollectionView>> {
    let folder = apply_update(&state.folders, id, &req)?;
    Ok(Json(folder.folder_view(&base_url)))
}

async fn delete_one(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    ClientIp(ip): ClientIp,
    Path(id): Path<i64>,
) -> AppResult<Json<StatusResponse>> {
    state.folders.delete(id)?;
    state.request_log.log(&ip, "folder-delete");
    Ok(Json(StatusResponse::ok()))
}

/// PNG QR code for the folder's share link, for printing or showing on a
/// screen. Only meaningful once the folder is shared.
async fn qr(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    BaseUrl(base_url): BaseUrl,
    Path(id): Path<i64>,
) -> AppResult<Response> {
    let folder = state.folders.get_by_id(id)?;
    if folder.visibility != Visibility::Shared {
        return Err(AppError::BadRequest("sharing is not enabled".into()));
    }

    let token = match folder.shared_token.clone().filter(|t| !t.is_empty()) {
        Some(token) => token,
        None => state.folders.ensure_shared_token(id)?,
    };
    let link = format!("{}/shared/{}", base_url.trim_end_matches('/'), token);

    let code = QrCode::new(link.as_bytes())
        .map_err(|e| AppError::Internal(format!("qr encode: {}", e)))?;
    let qr_image = code
        .render::<image::Luma<u8>>()
        .min_dimensions(256, 256)
        .build();

    let mut png = Vec::new();
    image::DynamicImage::ImageLuma8(qr_image)
        .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .map_err(|e| AppError::Internal(format!("qr render: {}", e)))?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/png".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"folder-{}-qr.png\"", folder.slug),
            ),
        ],
        png,
    )
        .into_response())
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/folders", get(list).post(create))
        .route(
            "/api/folders/{id}",
            get(get_one).patch(update).delete(delete_one),
        )
        .route("/api/folders/{id}/qr", get(qr))
}
