pub mod assets;
pub mod auth;
pub mod folders;
pub mod images;
pub mod pages;
pub mod submissions;

use axum::extract::DefaultBodyLimit;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::auth::session::session_middleware;
use crate::auth::viewer::viewer_middleware;
use crate::state::AppState;

/// Plain `{"status":"ok"}` acknowledgement.
#[derive(Serialize)]
pub(crate) struct StatusResponse {
    pub status: &'static str,
}

impl StatusResponse {
    pub fn ok() -> Self {
        Self { status: "ok" }
    }
}

pub fn router(state: AppState) -> Router {
    // These routes mint the anonymous viewer cookie when it is missing.
    let viewer_routes = Router::new()
        .route("/submitted/{slug}", get(pages::submitted_page))
        .route("/submitted/shared/{token}", get(pages::submitted_shared_page))
        .route(
            "/api/submissions/upload",
            post(submissions::upload)
                .layer(DefaultBodyLimit::max(submissions::UPLOAD_MAX_BYTES)),
        )
        .layer(from_fn(viewer_middleware));

    Router::new()
        .route("/", get(pages::index))
        .route("/{slug}", get(pages::folder_page))
        .route("/shared/{token}", get(pages::shared_folder))
        .merge(auth::router())
        .merge(folders::router())
        .merge(images::router())
        .merge(submissions::router())
        .merge(viewer_routes)
        .route("/assets/{*path}", get(assets::serve))
        .route("/favicon.ico", get(assets::favicon))
        .nest_service("/images", ServeDir::new(state.gallery_dir.clone()))
        .layer(from_fn_with_state(state.clone(), session_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
