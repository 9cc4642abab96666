use axum::extract::Request;
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use rand::RngCore;

use crate::auth::cookie_value;

pub const VIEWER_COOKIE: &str = "submission_viewer";
const VIEWER_MAX_AGE_SECS: u64 = 30 * 24 * 60 * 60;

/// The anonymous viewer identity for this request. Not a credential — it only
/// correlates a visitor with their own uploads in shared groups.
#[derive(Debug, Clone)]
pub struct ViewerIdentity(pub String);

/// Read the viewer token without issuing one (for routes that must not set
/// cookies, like raw file serving).
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    cookie_value(headers, VIEWER_COOKIE).filter(|t| !t.trim().is_empty())
}

/// Route-scoped middleware for the submission pages and upload endpoint:
/// guarantees a viewer token exists, exposing it as a request extension and
/// setting the long-lived cookie when one was just minted.
pub async fn viewer_middleware(mut req: Request, next: Next) -> Response {
    let (token, issued) = match token_from_headers(req.headers()) {
        Some(token) => (token, false),
        None => (generate_viewer_token(), true),
    };
    req.extensions_mut().insert(ViewerIdentity(token.clone()));

    let mut response = next.run(req).await;
    if issued {
        let cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            VIEWER_COOKIE, token, VIEWER_MAX_AGE_SECS
        );
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response.headers_mut().append(SET_COOKIE, value);
        }
    }
    response
}

fn generate_viewer_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header;

    #[test]
    fn viewer_token_is_32_hex_chars() {
        let token = generate_viewer_token();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn token_from_headers_ignores_blank_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("submission_viewer=  "),
        );
        assert_eq!(token_from_headers(&headers), None);

        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("submission_viewer=abc"),
        );
        assert_eq!(token_from_headers(&headers).as_deref(), Some("abc"));
    }
}
