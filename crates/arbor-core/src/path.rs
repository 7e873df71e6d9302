//! Slash-delimited page paths.
//!
//! Paths are stored normalized: leading `/`, no trailing `/` (except the root),
//! no empty, `.` or `..` segments. Subtree range scans rely on byte order: every
//! strict descendant of `/a` sorts inside `["/a/", "/a0")` because `0` is the
//! byte after `/`.

use crate::error::{ArborError, Result};

pub const ROOT_PATH: &str = "/";
pub const TRASH_PATH: &str = "/trash";

const MAX_PATH_BYTES: usize = 1024;

pub fn normalize_path(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if !trimmed.starts_with('/') {
        return Err(ArborError::InvalidPath(format!(
            "path must start with '/': {raw}"
        )));
    }
    if trimmed.len() > MAX_PATH_BYTES {
        return Err(ArborError::InvalidPath(format!(
            "path exceeds {MAX_PATH_BYTES} bytes"
        )));
    }

    let mut segments = Vec::new();
    for segment in trimmed.split('/') {
        if segment.is_empty() {
            continue;
        }
        let segment = segment.trim();
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(ArborError::InvalidPath(format!(
                "invalid path segment in {raw}"
            )));
        }
        if segment.chars().any(char::is_control) {
            return Err(ArborError::InvalidPath(format!(
                "control characters are not allowed: {raw}"
            )));
        }
        segments.push(segment);
    }

    if segments.is_empty() {
        return Ok(ROOT_PATH.to_string());
    }
    Ok(format!("/{}", segments.join("/")))
}

/// Normalizes a path that callers may write to (create, rename, duplicate).
pub fn normalize_writable_path(raw: &str) -> Result<String> {
    let path = normalize_path(raw)?;
    if path == ROOT_PATH {
        return Err(ArborError::InvalidPath(
            "the root page cannot be a mutation destination".to_string(),
        ));
    }
    if is_trash_path(&path) {
        return Err(ArborError::InvalidPath(format!(
            "{TRASH_PATH} is reserved: {path}"
        )));
    }
    Ok(path)
}

#[must_use]
pub fn is_root(path: &str) -> bool {
    path == ROOT_PATH
}

#[must_use]
pub fn parent_path(path: &str) -> Option<&str> {
    if is_root(path) {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT_PATH),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Ancestors from the nearest parent up to the root.
#[must_use]
pub fn ancestor_paths(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = path;
    while let Some(parent) = parent_path(current) {
        out.push(parent.to_string());
        current = parent;
    }
    out
}

#[must_use]
pub fn is_descendant(path: &str, ancestor: &str) -> bool {
    if path == ancestor {
        return false;
    }
    if is_root(ancestor) {
        return path.starts_with('/');
    }
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == b'/'
}

#[must_use]
pub fn is_same_or_descendant(path: &str, ancestor: &str) -> bool {
    path == ancestor || is_descendant(path, ancestor)
}

/// Two subtrees overlap when one root lies inside the other.
#[must_use]
pub fn paths_overlap(a: &str, b: &str) -> bool {
    is_same_or_descendant(a, b) || is_same_or_descendant(b, a)
}

/// Half-open byte range holding every strict descendant of `path`
/// (plus `path` itself for the root, which callers exclude explicitly).
#[must_use]
pub fn descendant_range(path: &str) -> (String, String) {
    if is_root(path) {
        return (ROOT_PATH.to_string(), "0".to_string());
    }
    (format!("{path}/"), format!("{path}0"))
}

/// Moves `path` from under `from` to the same position under `to`.
#[must_use]
pub fn rebase_path(path: &str, from: &str, to: &str) -> Option<String> {
    if path == from {
        return Some(to.to_string());
    }
    if !is_descendant(path, from) {
        return None;
    }
    let rest = if is_root(from) {
        &path[1..]
    } else {
        &path[from.len() + 1..]
    };
    if is_root(to) {
        Some(format!("/{rest}"))
    } else {
        Some(format!("{to}/{rest}"))
    }
}

#[must_use]
pub fn is_trash_path(path: &str) -> bool {
    is_same_or_descendant(path, TRASH_PATH)
}

#[must_use]
pub fn to_trash_path(path: &str) -> String {
    format!("{TRASH_PATH}{path}")
}

/// Original location of a trashed page, if `path` lives under the trash.
#[must_use]
pub fn from_trash_path(path: &str) -> Option<String> {
    if !is_descendant(path, TRASH_PATH) {
        return None;
    }
    Some(path[TRASH_PATH.len()..].to_string())
}
