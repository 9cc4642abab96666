use std::path::{Path, PathBuf};

/// Reduce a user-supplied name to something safe for disks and URLs:
/// lowercase ASCII letters, digits, `.`, `-`, `_`, with spaces mapped to
/// hyphens and everything else dropped. Returns an empty string when nothing
/// usable remains.
pub fn sanitize_file_name(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");
    let base = base.trim();

    let mut out = String::with_capacity(base.len());
    for c in base.chars() {
        match c {
            'a'..='z' | '0'..='9' | '.' | '-' | '_' => out.push(c),
            'A'..='Z' => out.push(c.to_ascii_lowercase()),
            ' ' => out.push('-'),
            _ => {}
        }
    }

    out.trim_matches(|c| c == '.' || c == '-').to_string()
}

/// Lowercased file extension without the dot, if any.
pub fn file_extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

pub fn is_image_file(name: &str) -> bool {
    matches!(
        file_extension(name).as_deref(),
        Some("jpg" | "jpeg" | "png" | "gif" | "bmp" | "svg" | "webp" | "avif")
    )
}

/// Submissions also accept PDFs next to the image formats.
pub fn is_submission_file(name: &str) -> bool {
    is_image_file(name) || matches!(file_extension(name).as_deref(), Some("pdf"))
}

/// Find a free path for `name` inside `dir`, suffixing `-1`, `-2`, ... before
/// the extension until no file of that name exists.
pub fn unique_path(dir: &Path, name: &str) -> std::io::Result<PathBuf> {
    let stem = Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name);
    let ext = file_extension(name).map(|e| format!(".{}", e)).unwrap_or_default();

    let mut target = dir.join(name);
    let mut i = 1;
    loop {
        match std::fs::metadata(&target) {
            Ok(_) => {
                target = dir.join(format!("{}-{}{}", stem, i, ext));
                i += 1;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(target),
            Err(e) => return Err(e),
        }
    }
}

/// True when `target` stays inside `base` (component-wise, no `..` escape).
/// Every filesystem mutation re-checks this before touching disk.
pub fn is_within(base: &Path, target: &Path) -> bool {
    let mut clean = PathBuf::new();
    for comp in target.components() {
        use std::path::Component;
        match comp {
            Component::ParentDir => {
                if !clean.pop() {
                    return false;
                }
            }
            Component::CurDir => {}
            other => clean.push(other),
        }
    }
    clean.starts_with(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_lowercases_and_hyphenates() {
        assert_eq!(sanitize_file_name("Wycieczka"), "wycieczka");
        assert_eq!(sanitize_file_name("My Summer Trip"), "my-summer-trip");
        assert_eq!(sanitize_file_name("photo_01.JPG"), "photo_01.jpg");
    }

    #[test]
    fn sanitize_drops_non_ascii_and_specials() {
        assert_eq!(sanitize_file_name("zdjęcia!@#"), "zdjcia");
        assert_eq!(sanitize_file_name("***"), "");
        assert_eq!(sanitize_file_name("żółć"), "");
    }

    #[test]
    fn sanitize_trims_dots_and_hyphens() {
        assert_eq!(sanitize_file_name("..hidden.."), "hidden");
        assert_eq!(sanitize_file_name("--x--"), "x");
    }

    #[test]
    fn sanitize_strips_path_components() {
        assert_eq!(sanitize_file_name("../../etc/passwd.png"), "passwd.png");
        assert_eq!(sanitize_file_name("/tmp/evil.jpg"), "evil.jpg");
    }

    #[test]
    fn extension_detection() {
        assert_eq!(file_extension("a.JPG").as_deref(), Some("jpg"));
        assert_eq!(file_extension("noext"), None);
        assert!(is_image_file("photo.webp"));
        assert!(!is_image_file("notes.txt"));
        assert!(is_submission_file("paper.pdf"));
        assert!(!is_submission_file("script.sh"));
    }

    #[test]
    fn unique_path_suffixes_before_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let first = unique_path(tmp.path(), "a.jpg").unwrap();
        assert_eq!(first, tmp.path().join("a.jpg"));
        std::fs::write(&first, b"x").unwrap();

        let second = unique_path(tmp.path(), "a.jpg").unwrap();
        assert_eq!(second, tmp.path().join("a-1.jpg"));
        std::fs::write(&second, b"x").unwrap();

        let third = unique_path(tmp.path(), "a.jpg").unwrap();
        assert_eq!(third, tmp.path().join("a-2.jpg"));
    }

    #[test]
    fn is_within_rejects_escapes() {
        let base = Path::new("/srv/gallery");
        assert!(is_within(base, &base.join("trip/a.jpg")));
        assert!(is_within(base, base));
        assert!(!is_within(base, &base.join("../outside")));
        assert!(!is_within(base, Path::new("/srv/gallery2/a.jpg")));
        assert!(!is_within(base, &base.join("trip/../../etc/passwd")));
    }
}
