//! Request-path helpers shared by the file and proxy handlers.
//!
//! Nothing in here touches the filesystem. Every function is a pure string or
//! path transformation, so the traversal guarantees can be tested in isolation.

use percent_encoding::percent_decode_str;
use std::path::{Path, PathBuf};

/// Remove a matched route prefix from a request path.
pub fn strip_route_prefix<'a>(path: &'a str, prefix: &str) -> &'a str {
    path.strip_prefix(prefix).unwrap_or(path)
}

/// Decode `%XX` escapes. Invalid UTF-8 is replaced rather than rejected.
pub fn decode_path(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

/// Split a path into its meaningful segments, resolving `.` and `..`.
///
/// `..` never climbs above the first segment, which is what keeps joined
/// paths inside their root. Backslashes count as separators too.
pub fn normalize_segments(path: &str) -> Vec<&str> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s if s.contains('\0') => {}
            s => segments.push(s),
        }
    }
    segments
}

/// Resolve `relative` under `root`. An empty relative path yields the root.
pub fn resolve_under_root(root: &Path, relative: &str) -> PathBuf {
    let mut resolved = root.to_path_buf();
    for segment in normalize_segments(relative) {
        resolved.push(segment);
    }
    resolved
}

/// Join a request path (already stripped of its route prefix) onto an
/// upstream base path. The relative part is normalised on its own first so it
/// can not climb out of the base.
pub fn join_url_path(base: &str, relative: &str) -> String {
    let mut joined = String::from("/");
    let segments = normalize_segments(base)
        .into_iter()
        .chain(normalize_segments(relative));
    for (i, segment) in segments.enumerate() {
        if i > 0 {
            joined.push('/');
        }
        joined.push_str(segment);
    }

    let wants_trailing_slash = if relative.is_empty() {
        base.ends_with('/')
    } else {
        relative.ends_with('/')
    };
    if wants_trailing_slash && !joined.ends_with('/') {
        joined.push('/');
    }
    joined
}
