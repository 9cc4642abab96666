use axum::extract::{Request, State};
use axum::http::header::SET_COOKIE;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::auth::cookie_value;
use crate::state::AppState;

pub const SESSION_COOKIE: &str = "gallery_session";
pub const SESSION_TTL: Duration = Duration::from_secs(15 * 60);

/// Request-extension marker: the admin session cookie checked out.
#[derive(Debug, Clone, Copy)]
pub struct AdminSession;

/// In-memory admin session store. One instance is built at startup and
/// injected through `AppState`; restarting the process logs everyone out.
///
/// Expiry is sliding: every successful check pushes the deadline out by the
/// full TTL, so an active admin never gets logged out mid-use.
pub struct SessionStore {
    ttl: Duration,
    tokens: Mutex<HashMap<String, Instant>>,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Instant>> {
        match self.tokens.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Create a session and return its token.
    pub fn start(&self) -> String {
        let token = generate_token();
        let mut tokens = self.lock();
        tokens.insert(token.clone(), Instant::now() + self.ttl);
        token
    }

    /// Check a token, sliding its expiry forward when valid. Expired entries
    /// are dropped on sight.
    pub fn authenticated(&self, token: &str) -> bool {
        let mut tokens = self.lock();
        match tokens.get_mut(token) {
            None => false,
            Some(expiry) if Instant::now() > *expiry => {
                tokens.remove(token);
                false
            }
            Some(expiry) => {
                *expiry = Instant::now() + self.ttl;
                true
            }
        }
    }

    pub fn clear(&self, token: &str) {
        self.lock().remove(token);
    }

    /// Cookie that mirrors a live session (used at login and on every
    /// authenticated response to keep the browser's copy sliding too).
    pub fn cookie(&self, token: &str) -> String {
        format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            SESSION_COOKIE,
            token,
            self.ttl.as_secs()
        )
    }

    pub fn clear_cookie(&self) -> String {
        format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", SESSION_COOKIE)
    }
}

/// Router-wide middleware: authenticates the session cookie once per request,
/// stamps `AdminSession` into the request extensions for extractors, and
/// re-issues the (slid) cookie on the way out.
pub async fn session_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let token = cookie_value(req.headers(), SESSION_COOKIE);
    let refreshed = match token {
        Some(ref token) if state.sessions.authenticated(token) => {
            req.extensions_mut().insert(AdminSession);
            Some(state.sessions.cookie(token))
        }
        _ => None,
    };

    let mut response = next.run(req).await;
    if let Some(cookie) = refreshed {
        // Login/logout set their own session cookie; don't fight them.
        let handler_set_one = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.starts_with(SESSION_COOKIE));
        if !handler_set_one {
            if let Ok(value) = HeaderValue::from_str(&cookie) {
                response.headers_mut().append(SET_COOKIE, value);
            }
        }
    }
    response
}

/// 256-bit random token, hex-encoded.
fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_token_is_64_hex_chars() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generate_token_is_unique() {
        assert_ne!(generate_token(), generate_token());
    }

    #[test]
    fn started_session_authenticates() {
        let store = SessionStore::new(Duration::from_secs(60));
        let token = store.start();
        assert!(store.authenticated(&token));
        assert!(!store.authenticated("unknown"));
    }

    #[test]
    fn expired_session_is_dropped() {
        let store = SessionStore::new(Duration::from_secs(0));
        let token = store.start();
        std::thread::sleep(Duration::from_millis(5));
        assert!(!store.authenticated(&token));
        // The entry is gone, not just expired.
        assert!(!store.tokens.lock().unwrap().contains_key(&token));
    }

    #[test]
    fn authentication_slides_expiry() {
        let store = SessionStore::new(Duration::from_millis(80));
        let token = store.start();

        // Keep touching the session past its original deadline.
        for _ in 0..4 {
            std::thread::sleep(Duration::from_millis(40));
            assert!(store.authenticated(&token));
        }
    }

    #[test]
    fn clear_removes_session() {
        let store = SessionStore::new(Duration::from_secs(60));
        let token = store.start();
        store.clear(&token);
        assert!(!store.authenticated(&token));
    }

    #[test]
    fn cookie_carries_token_and_ttl() {
        let store = SessionStore::new(Duration::from_secs(900));
        let cookie = store.cookie("abc");
        assert!(cookie.starts_with("gallery_session=abc;"));
        assert!(cookie.contains("Max-Age=900"));
        assert!(cookie.contains("HttpOnly"));
        assert!(store.clear_cookie().contains("Max-Age=0"));
    }
}
