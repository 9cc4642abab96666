use axum::extract::{ConnectInfo, FromRequest, FromRequestParts, Request};
use axum::http::request::Parts;
use axum::http::header;
use axum::Json;
use serde::de::DeserializeOwned;
use std::net::SocketAddr;

use crate::auth::session::AdminSession;
use crate::auth::viewer::ViewerIdentity;
use crate::error::AppError;
use crate::request_log;

/// Extractor that requires an authenticated admin session.
/// Returns 401 when the session middleware found no valid cookie.
pub struct RequireAdmin;

impl<S> FromRequestParts<S> for RequireAdmin
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AdminSession>()
            .map(|_| RequireAdmin)
            .ok_or(AppError::Unauthorized)
    }
}

/// Whether the request carries an admin session; never rejects.
pub struct Admin(pub bool);

impl<S> FromRequestParts<S> for Admin
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Admin(parts.extensions.get::<AdminSession>().is_some()))
    }
}

/// The anonymous viewer token guaranteed by the viewer middleware.
/// Only valid on routes mounted behind it.
pub struct Viewer(pub String);

impl<S> FromRequestParts<S> for Viewer
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<ViewerIdentity>()
            .map(|identity| Viewer(identity.0.clone()))
            .ok_or_else(|| AppError::Internal("viewer middleware not mounted".into()))
    }
}

/// Client address for the request log.
pub struct ClientIp(pub String);

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0);
        Ok(ClientIp(request_log::client_ip(&parts.headers, peer)))
    }
}

/// `scheme://host` as seen by the client, for building share links.
pub struct BaseUrl(pub String);

impl<S> FromRequestParts<S> for BaseUrl
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let scheme = parts
            .headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or("http");
        let host = parts
            .headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or("localhost");
        Ok(BaseUrl(format!("{}://{}", scheme, host)))
    }
}

/// JSON body extractor that turns axum's rejection into our 400 shape instead
/// of a bare text response.
pub struct AppJson<T>(pub T);

impl<S, T> FromRequest<S> for AppJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        Json::<T>::from_request(req, state)
            .await
            .map(|Json(value)| AppJson(value))
            .map_err(|rejection| AppError::BadRequest(rejection.body_text()))
    }
}
