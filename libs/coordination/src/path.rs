//! Node path helpers.
//!
//! Paths are absolute, `/`-separated, with no empty segments and no trailing
//! slash. `/` itself is the tree root.

use crate::error::{CoordinationError, CoordinationResult};

/// The tree root.
pub const ROOT: &str = "/";
/// Separator between path segments.
pub const SEPARATOR: char = '/';

/// Check that `path` is a well formed absolute node path.
pub fn validate(path: &str) -> CoordinationResult<()> {
    if path == ROOT {
        return Ok(());
    }
    let Some(rest) = path.strip_prefix(SEPARATOR) else {
        return Err(CoordinationError::BadPath(format!(
            "path must start with '/': {path:?}"
        )));
    };
    if rest.split(SEPARATOR).any(str::is_empty) {
        return Err(CoordinationError::BadPath(format!(
            "path contains an empty segment: {path:?}"
        )));
    }
    if path.contains('\0') {
        return Err(CoordinationError::BadPath(format!(
            "path contains a nul character: {path:?}"
        )));
    }
    Ok(())
}

/// Check that `segment` can be used as a single path component.
pub fn validate_segment(segment: &str) -> CoordinationResult<()> {
    if segment.is_empty() || segment.contains(SEPARATOR) || segment.contains('\0') {
        return Err(CoordinationError::BadPath(format!(
            "not a single path segment: {segment:?}"
        )));
    }
    Ok(())
}

/// `join("/a", "b") == "/a/b"`, `join("/", "b") == "/b"`.
pub fn join(parent: &str, child: &str) -> String {
    if parent == ROOT {
        format!("{ROOT}{child}")
    } else {
        format!("{parent}{SEPARATOR}{child}")
    }
}

/// Parent of a valid path; `None` for the root.
pub fn parent(path: &str) -> Option<&str> {
    if path == ROOT {
        return None;
    }
    match path.rfind(SEPARATOR) {
        Some(0) => Some(ROOT),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Last segment of a valid path; empty for the root.
pub fn name(path: &str) -> &str {
    path.rsplit(SEPARATOR).next().unwrap_or_default()
}
