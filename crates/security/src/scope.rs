//! Scratch-area path scoping.
//!
//! Paths supplied as tool arguments must stay inside the scratch area.
//! Resolution is lexical: relative paths are joined onto the scratch root,
//! `.` and `..` components are folded, and the result must still start
//! with the root. Nothing on disk is touched.

use std::path::{Component, Path, PathBuf};

/// Error returned when a path escapes the scratch area.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScopeError {
    #[error("Path '{path}' resolves outside the scratch area {root}")]
    OutsideScratch { path: String, root: String },

    #[error("Path traversal above the filesystem root in '{path}'")]
    PathTraversal { path: String },
}

/// Resolve `path` against `root`, rejecting anything that lands outside.
///
/// Returns the normalized absolute path on success.
pub fn resolve_in_scope(path: &str, root: &Path) -> Result<PathBuf, ScopeError> {
    let root = normalize(root).ok_or_else(|| ScopeError::PathTraversal {
        path: root.display().to_string(),
    })?;

    let input = Path::new(path);
    let joined = if input.is_absolute() {
        input.to_path_buf()
    } else {
        root.join(input)
    };

    let resolved = normalize(&joined).ok_or_else(|| ScopeError::PathTraversal {
        path: path.into(),
    })?;

    if resolved.starts_with(&root) {
        Ok(resolved)
    } else {
        Err(ScopeError::OutsideScratch {
            path: path.into(),
            root: root.display().to_string(),
        })
    }
}

/// Fold `.` and `..` lexically. `None` if `..` climbs above the root.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() || out.as_os_str().is_empty() {
                    return None;
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    Some(out)
}
