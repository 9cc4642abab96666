use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;

use crate::auth::cookie_value;
use crate::auth::session::SESSION_COOKIE;
use crate::error::{AppError, AppResult};
use crate::extractors::AppJson;
use crate::routes::StatusResponse;
use crate::state::AppState;

#[derive(Deserialize, Default)]
#[serde(default)]
struct Credentials {
    username: String,
    password: String,
}

async fn login(
    State(state): State<AppState>,
    AppJson(creds): AppJson<Credentials>,
) -> AppResult<Response> {
    if creds.username != state.config.username || creds.password != state.config.password {
        return Err(AppError::Unauthorized);
    }

    let token = state.sessions.start();
    let cookie = state.sessions.cookie(&token);
    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(StatusResponse::ok()),
    )
        .into_response())
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(token) = cookie_value(&headers, SESSION_COOKIE) {
        state.sessions.clear(&token);
    }
    (
        [(header::SET_COOKIE, state.sessions.clear_cookie())],
        Json(StatusResponse::ok()),
    )
        .into_response()
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/login", post(login))
        .route("/api/logout", post(logout))
}
