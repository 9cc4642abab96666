use askama::Template;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::db::models::{Collection, CollectionView};
use crate::error::{AppError, AppResult};
use crate::extractors::{Admin, BaseUrl, ClientIp, Viewer};
use crate::naming::{is_image_file, sanitize_file_name};
use crate::state::AppState;
use crate::submissions::{entry_view, SubmissionView};
use crate::visibility::Visibility;

/// Wrapper to render askama templates as axum responses
pub struct Html<T: Template>(pub T);

impl<T: Template> IntoResponse for Html<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(body) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                body,
            )
                .into_response(),
            Err(e) => {
                tracing::error!("Template render error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Template error").into_response()
            }
        }
    }
}

pub struct ImageInfo {
    pub name: String,
    pub url: String,
}

#[derive(Template)]
#[template(path = "pages/gallery.html")]
pub struct GalleryTemplate {
    pub logged_in: bool,
    pub shared_mode: bool,
    pub allow_manage: bool,
    pub folders: Vec<CollectionView>,
    pub active: Option<CollectionView>,
    pub images: Vec<ImageInfo>,
}

#[derive(Template)]
#[template(path = "pages/submissions.html")]
pub struct SubmissionsTemplate {
    pub logged_in: bool,
    pub shared_mode: bool,
    pub allow_manage: bool,
    pub allow_upload: bool,
    pub groups: Vec<CollectionView>,
    pub active: Option<CollectionView>,
    pub entries: Vec<SubmissionView>,
    pub share_link: Option<String>,
    pub upload_limit_mb: usize,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct PageQuery {
    folder: Option<String>,
    view: Option<String>,
    group: Option<String>,
}

/// Landing page: the gallery, or the admin submissions dashboard when
/// `?view=submitted` is requested.
pub async fn index(
    State(state): State<AppState>,
    Admin(admin): Admin,
    BaseUrl(base_url): BaseUrl,
    ClientIp(ip): ClientIp,
    Query(query): Query<PageQuery>,
) -> AppResult<Response> {
    let wants_dashboard = query
        .view
        .as_deref()
        .map(|v| v.trim().eq_ignore_ascii_case("submitted"))
        .unwrap_or(false);
    if wants_dashboard {
        if !admin {
            return Ok((StatusCode::FOUND, [(header::LOCATION, "/")]).into_response());
        }
        return render_dashboard(&state, &base_url, query.group.as_deref());
    }

    state.request_log.log(&ip, "view");
    render_gallery(&state, admin, &base_url, query.folder.as_deref())
}

pub async fn folder_page(
    State(state): State<AppState>,
    Admin(admin): Admin,
    BaseUrl(base_url): BaseUrl,
    ClientIp(ip): ClientIp,
    Path(slug): Path<String>,
) -> AppResult<Response> {
    state.request_log.log(&ip, "view");
    render_gallery(&state, admin, &base_url, Some(&slug))
}

/// Read-only gallery for whoever holds the folder's share link. Works only
/// while the folder stays `shared`; the token alone is not enough afterward.
pub async fn shared_folder(
    State(state): State<AppState>,
    Admin(admin): Admin,
    ClientIp(ip): ClientIp,
    Path(token): Path<String>,
) -> AppResult<Response> {
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::NotFound);
    }
    let folder = match state.folders.get_by_token(token) {
        Ok(folder) if folder.visibility == Visibility::Shared => folder,
        _ => return Err(AppError::NotFound),
    };

    // Counting failures must not break the page.
    let folder = match state.folders.increment_shared_views(folder.id) {
        Ok(()) => state.folders.get_by_id(folder.id).unwrap_or(folder),
        Err(e) => {
            tracing::warn!("shared view count: {}", e);
            folder
        }
    };

    state.request_log.log(&ip, "shared-view");

    let images = list_images(&state, &folder)?;
    Ok(Html(GalleryTemplate {
        logged_in: admin,
        shared_mode: true,
        allow_manage: false,
        folders: Vec::new(),
        active: Some(folder.folder_view("")),
        images,
    })
    .into_response())
}

/// Public submissions page for one group, addressed by slug.
pub async fn submitted_page(
    State(state): State<AppState>,
    Admin(admin): Admin,
    Viewer(viewer_token): Viewer,
    BaseUrl(base_url): BaseUrl,
    Path(slug): Path<String>,
) -> AppResult<Response> {
    let slug = sanitize_file_name(&slug);
    if slug.is_empty() {
        return Err(AppError::NotFound);
    }
    let group = state
        .groups
        .get_by_slug(&slug)
        .map_err(|_| AppError::NotFound)?;
    if group.visibility == Visibility::Private && !admin {
        return Err(AppError::NotFound);
    }

    let entries = state
        .submissions
        .entries_for_group(&group, Some(viewer_token.as_str()), admin)?;
    let view = group.group_view(&base_url);
    let share_link = view.share_url.clone();
    let allow_upload = admin || group.visibility == Visibility::Public;

    Ok(Html(SubmissionsTemplate {
        logged_in: admin,
        shared_mode: false,
        allow_manage: admin,
        allow_upload,
        groups: Vec::new(),
        active: Some(view),
        entries: entries.iter().map(entry_view).collect(),
        share_link,
        upload_limit_mb: super::submissions::UPLOAD_MAX_BYTES >> 20,
    })
    .into_response())
}

/// Token-gated submissions page. Anyone with the link may view their own
/// uploads and add new ones.
pub async fn submitted_shared_page(
    State(state): State<AppState>,
    Admin(admin): Admin,
    Viewer(viewer_token): Viewer,
    BaseUrl(base_url): BaseUrl,
    Path(token): Path<String>,
) -> AppResult<Response> {
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::NotFound);
    }
    let group = match state.groups.get_by_token(token) {
        Ok(group) if group.visibility == Visibility::Shared => group,
        _ => return Err(AppError::NotFound),
    };

    if let Err(e) = state.groups.increment_shared_views(group.id) {
        tracing::warn!("submission shared view count: {}", e);
    }

    let entries = state
        .submissions
        .entries_for_group(&group, Some(viewer_token.as_str()), admin)?;
    let view = group.group_view(&base_url);
    let share_link = view.share_url.clone();

    Ok(Html(SubmissionsTemplate {
        logged_in: admin,
        shared_mode: true,
        allow_manage: admin,
        allow_upload: true,
        groups: Vec::new(),
        active: Some(view),
        entries: entries.iter().map(entry_view).collect(),
        share_link,
        upload_limit_mb: super::submissions::UPLOAD_MAX_BYTES >> 20,
    })
    .into_response())
}

fn render_gallery(
    state: &AppState,
    admin: bool,
    base_url: &str,
    raw_slug: Option<&str>,
) -> AppResult<Response> {
    let folders = state.folders.list(admin)?;
    let folder_views: Vec<CollectionView> =
        folders.iter().map(|f| f.folder_view(base_url)).collect();

    let mut active = None;
    let mut images = Vec::new();
    if let Some(raw) = raw_slug.map(str::trim).filter(|s| !s.is_empty()) {
        let slug = sanitize_file_name(raw);
        if slug.is_empty() {
            return Err(AppError::NotFound);
        }
        let folder = state
            .folders
            .get_by_slug(&slug)
            .map_err(|_| AppError::NotFound)?;
        if !folder.visibility.accessible(admin) {
            return Err(AppError::NotFound);
        }
        images = list_images(state, &folder)?;
        active = Some(folder.folder_view(base_url));
    }

    Ok(Html(GalleryTemplate {
        logged_in: admin,
        shared_mode: false,
        allow_manage: admin,
        folders: folder_views,
        active,
        images,
    })
    .into_response())
}

/// Admin dashboard over all submission groups. Selecting a shared group
/// lazily ensures its link token so the share URL is ready to copy.
fn render_dashboard(
    state: &AppState,
    base_url: &str,
    group_param: Option<&str>,
) -> AppResult<Response> {
    let groups = state.groups.list(true)?;

    let wanted = group_param
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(sanitize_file_name);
    let mut active_rec: Option<Collection> = None;
    for (i, group) in groups.iter().enumerate() {
        let matches = match &wanted {
            None => i == 0,
            Some(slug) => &group.slug == slug,
        };
        if matches {
            active_rec = Some(group.clone());
            break;
        }
    }

    let group_views: Vec<CollectionView> = groups.iter().map(|g| g.group_view(base_url)).collect();

    let mut active = None;
    let mut entries = Vec::new();
    let mut share_link = None;
    let mut allow_upload = false;
    if let Some(mut rec) = active_rec {
        if rec.visibility == Visibility::Shared {
            if state.groups.ensure_shared_token(rec.id).is_ok() {
                if let Ok(refreshed) = state.groups.get_by_id(rec.id) {
                    rec = refreshed;
                }
            }
        }
        entries = state
            .submissions
            .entries_for_group(&rec, None, true)?
            .iter()
            .map(entry_view)
            .collect();
        let view = rec.group_view(base_url);
        share_link = view.share_url.clone();
        allow_upload = true;
        active = Some(view);
    }

    Ok(Html(SubmissionsTemplate {
        logged_in: true,
        shared_mode: false,
        allow_manage: true,
        allow_upload,
        groups: group_views,
        active,
        entries,
        share_link,
        upload_limit_mb: super::submissions::UPLOAD_MAX_BYTES >> 20,
    })
    .into_response())
}

/// Image files directly inside `folder`'s directory, sorted by name.
fn list_images(state: &AppState, folder: &Collection) -> AppResult<Vec<ImageInfo>> {
    let dir = state.folders.dir_for(folder);
    std::fs::create_dir_all(&dir)?;

    let url_prefix = if folder.path.is_empty() {
        "/images/".to_string()
    } else {
        format!("/images/{}/", folder.path.trim_matches('/'))
    };

    let mut images = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(_) => continue,
        };
        if !is_image_file(&name) {
            continue;
        }
        images.push(ImageInfo {
            url: format!("{}{}", url_prefix, name),
            name,
        });
    }
    images.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::test_pool;
    use tempfile::TempDir;

    fn test_state() -> (TempDir, AppState) {
        let tmp = TempDir::new().unwrap();
        let gallery = tmp.path().join("gallery");
        std::fs::create_dir_all(&gallery).unwrap();
        let state =
            AppState::new(Config::default(), test_pool(), gallery, tmp.path()).unwrap();
        (tmp, state)
    }

    #[test]
    fn list_images_filters_and_sorts() {
        let (_tmp, state) = test_state();
        let folder = state.folders.create("Trip").unwrap();
        let dir = state.folders.dir_for(&folder);
        std::fs::write(dir.join("b.jpg"), b"x").unwrap();
        std::fs::write(dir.join("A.png"), b"x").unwrap();
        std::fs::write(dir.join("notes.txt"), b"x").unwrap();
        std::fs::create_dir(dir.join("nested")).unwrap();

        let images = list_images(&state, &folder).unwrap();
        let names: Vec<&str> = images.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["A.png", "b.jpg"]);
        assert_eq!(images[0].url, "/images/trip/A.png");
    }

    #[test]
    fn list_images_for_root_folder_uses_bare_prefix() {
        let (_tmp, state) = test_state();
        let root = state.folders.get_by_slug("default").unwrap();
        std::fs::write(state.gallery_dir.join("cover.jpg"), b"x").unwrap();

        let images = list_images(&state, &root).unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].url, "/images/cover.jpg");
    }
}
