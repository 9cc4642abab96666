use axum::http::HeaderMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Mutex;

/// Flat append-only action log: one `[date] [time] [ip] [action]` line per
/// logged request. Failures to write are reported to tracing and otherwise
/// ignored — the log must never take a request down with it.
pub struct RequestLog {
    file: Mutex<File>,
}

impl RequestLog {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    pub fn log(&self, client_ip: &str, action: &str) {
        let now = chrono::Local::now();
        let line = format!(
            "[{}] [{}] [{}] [{}]\n",
            now.format("%Y-%m-%d"),
            now.format("%H:%M:%S"),
            client_ip,
            action
        );

        let mut file = match self.file.lock() {
            Ok(file) => file,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = file.write_all(line.as_bytes()) {
            tracing::warn!("write request log: {}", e);
        }
    }
}

/// Best client address we can determine: proxy headers first, then the
/// socket peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(ip) = header_value(headers, "cf-connecting-ip") {
        return ip;
    }
    if let Some(forwarded) = header_value(headers, "x-forwarded-for") {
        let first = forwarded.split(',').next().unwrap_or("").trim();
        if !first.is_empty() {
            return first.to_string();
        }
    }
    match peer {
        Some(addr) => addr.ip().to_string(),
        None => "-".to_string(),
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn log_appends_formatted_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("logs");
        let log = RequestLog::open(&path).unwrap();

        log.log("10.0.0.1", "upload");
        log.log("10.0.0.2", "view");

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("[10.0.0.1] [upload]"));
        assert!(lines[1].ends_with("[10.0.0.2] [view]"));
    }

    #[test]
    fn open_creates_parent_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested/dir/logs");
        RequestLog::open(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn client_ip_prefers_proxy_headers() {
        let peer: SocketAddr = "192.0.2.9:1234".parse().unwrap();

        let mut headers = HeaderMap::new();
        headers.insert("cf-connecting-ip", HeaderValue::from_static("203.0.113.5"));
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("198.51.100.7, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers, Some(peer)), "203.0.113.5");

        headers.remove("cf-connecting-ip");
        assert_eq!(client_ip(&headers, Some(peer)), "198.51.100.7");

        headers.remove("x-forwarded-for");
        assert_eq!(client_ip(&headers, Some(peer)), "192.0.2.9");
        assert_eq!(client_ip(&HeaderMap::new(), None), "-");
    }
}
