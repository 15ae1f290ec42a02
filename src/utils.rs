//! Utility functions for path manipulation and filename derivation

use std::path::{Component, Path, PathBuf};

/// Fallback name when neither the response nor the URL yields one
pub const DEFAULT_FILE_NAME: &str = "download";

/// Lexically normalize a path, resolving `.` and `..` without touching the filesystem
///
/// # Examples
///
/// ```
/// use request_agent::utils::normalize_path;
/// use std::path::Path;
///
/// assert_eq!(normalize_path(Path::new("/a/./b/../c")), Path::new("/a/c"));
/// ```
#[must_use]
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Derive a file name from the last non-empty URL path segment
///
/// Percent-encoding is decoded and path separators are replaced so the
/// result is always a single path component.
///
/// # Examples
///
/// ```
/// use request_agent::utils::filename_from_url;
///
/// assert_eq!(filename_from_url("http://host/files/test.apk?x=1"), "test.apk");
/// assert_eq!(filename_from_url("http://host/"), "download");
/// ```
#[must_use]
pub fn filename_from_url(url: &str) -> String {
    if let Ok(parsed_url) = url::Url::parse(url)
        && let Some(segments) = parsed_url.path_segments()
        && let Some(last_segment) = segments.filter(|s| !s.is_empty()).next_back()
    {
        let decoded = urlencoding::decode(last_segment)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| last_segment.to_string());
        let safe = sanitize_component(&decoded);
        if !safe.is_empty() {
            return safe;
        }
    }
    DEFAULT_FILE_NAME.to_string()
}

/// Base name of a path as a display string
#[must_use]
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn sanitize_component(name: &str) -> String {
    let replaced = name.replace(['/', '\\'], "_");
    match replaced.as_str() {
        "." | ".." => String::new(),
        _ => replaced.trim().to_string(),
    }
}
