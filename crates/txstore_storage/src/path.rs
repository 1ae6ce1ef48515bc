//! Relative path helpers shared by all backends.

use crate::error::{StorageError, StorageResult};

/// Checks that `path` is a relative, `/`-separated path that stays inside
/// the store root.
///
/// # Errors
///
/// Returns [`StorageError::InvalidPath`] if the path is empty, absolute,
/// contains empty, `.` or `..` segments, or contains a backslash.
pub fn validate(path: &str) -> StorageResult<()> {
    let invalid = |reason| {
        Err(StorageError::InvalidPath {
            path: path.to_string(),
            reason,
        })
    };

    if path.is_empty() {
        return invalid("empty path");
    }
    if path.starts_with('/') {
        return invalid("absolute path");
    }
    if path.contains('\\') {
        return invalid("backslash in path");
    }
    for segment in path.split('/') {
        match segment {
            "" => return invalid("empty segment"),
            "." | ".." => return invalid("relative segment"),
            _ => {}
        }
    }
    Ok(())
}

/// Joins path segments with `/`, skipping empty segments.
#[must_use]
pub fn join<'a>(segments: impl IntoIterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for segment in segments.into_iter().filter(|s| !s.is_empty()) {
        if !out.is_empty() {
            out.push('/');
        }
        out.push_str(segment);
    }
    out
}

/// Returns the parent directory of `path`, or `None` for a top-level entry.
#[must_use]
pub fn parent(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(dir, _)| dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_nested_relative_path() {
        assert!(validate("documents/042/1042.tmp").is_ok());
    }

    #[test]
    fn rejects_escaping_paths() {
        assert!(validate("").is_err());
        assert!(validate("/etc/passwd").is_err());
        assert!(validate("a/../b").is_err());
        assert!(validate("a//b").is_err());
        assert!(validate("a\\b").is_err());
    }

    #[test]
    fn join_skips_empty_segments() {
        assert_eq!(join(["root", "", "docs", "7"]), "root/docs/7");
        assert_eq!(join(["", "docs"]), "docs");
    }

    #[test]
    fn parent_of_nested_and_top_level() {
        assert_eq!(parent("a/b/c"), Some("a/b"));
        assert_eq!(parent("c"), None);
    }
}
