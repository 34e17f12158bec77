//! Mapping filesystem paths onto catalog keys.

use std::path::{Component, Path};

/// Where a path sits relative to the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootRelative {
    /// First path segment under the root
    pub project_id: String,
    /// Number of segments below the root, counting the project itself
    pub depth: usize,
}

/// Resolve `path` against `root`.
///
/// Returns `None` for the root itself and for anything outside it.
pub fn relativize(root: &Path, path: &Path) -> Option<RootRelative> {
    let rel = path.strip_prefix(root).ok()?;
    let mut segments = rel.components().filter(|c| !matches!(c, Component::CurDir));

    let project_id = match segments.next()? {
        Component::Normal(name) => name.to_string_lossy().into_owned(),
        _ => return None,
    };

    let mut depth = 1;
    for segment in segments {
        match segment {
            Component::Normal(_) => depth += 1,
            _ => return None,
        }
    }

    Some(RootRelative { project_id, depth })
}

/// Base name of a path as a string, if it has one.
pub fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}
