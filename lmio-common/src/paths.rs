//! Helpers for slash-separated remote paths
//!
//! Remote paths are plain strings rooted at `/`; they are never touched through
//! `std::path`, which would apply host separator rules.

/// Last path segment, optionally without its extension
pub fn basename(path: &str, strip_ext: bool) -> &str {
    let name = path.trim_end_matches('/').rsplit('/').next().unwrap_or("");
    if strip_ext {
        match name.rfind('.') {
            Some(0) | None => name,
            Some(idx) => &name[..idx],
        }
    } else {
        name
    }
}

/// Lower-cased extension without the dot, empty when there is none
pub fn extname(path: &str) -> String {
    let name = basename(path, false);
    match name.rfind('.') {
        Some(0) | None => String::new(),
        Some(idx) => name[idx + 1..].to_ascii_lowercase(),
    }
}

/// Full path with the extension of the last segment removed
pub fn strip_extension(path: &str) -> &str {
    let name = basename(path, false);
    match name.rfind('.') {
        Some(0) | None => path,
        Some(idx) => {
            let cut = path.len() - (name.len() - idx);
            &path[..cut]
        }
    }
}

/// Dot-files and dot-directories
pub fn is_hidden(path: &str) -> bool {
    basename(path, false).starts_with('.')
}

/// Join a directory and a child name with exactly one separator
pub fn join(dir: &str, name: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), name.trim_start_matches('/'))
}
