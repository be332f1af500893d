//! Path algebra over storage-relative paths.
//!
//! Paths are `/`-separated and stored without leading or trailing separators,
//! so `"proj/data.csv"` is the canonical form of `"/proj//data.csv/"`. All
//! prefix tests work on whole segments: `"proj"` is an ancestor of
//! `"proj/a"` but not of `"project2"`.
//!
//! Nothing here performs I/O.

#[cfg(test)]
mod path_proptest;

use pathgrant_storage::traits::validate_path;

use crate::error::{DomainError, DomainResult};
use crate::model::{PathRef, PathType, PATH_SEPARATOR};

/// Returns the canonical form of `path`.
///
/// Surrounding whitespace is trimmed, leading and trailing separators are
/// stripped and runs of separators collapse to one. Fails if nothing is left
/// or if a `.` or `..` segment is present.
pub fn normalize(path: &str) -> DomainResult<String> {
    let segments: Vec<&str> = path
        .trim()
        .split(PATH_SEPARATOR)
        .filter(|segment| !segment.is_empty())
        .collect();

    if segments.is_empty() {
        return Err(DomainError::InvalidPath {
            path: path.to_string(),
            reason: "path cannot be empty".to_string(),
        });
    }
    if segments.iter().any(|s| *s == "." || *s == "..") {
        return Err(DomainError::InvalidPath {
            path: path.to_string(),
            reason: "relative segments are not allowed".to_string(),
        });
    }

    let normalized = segments.join("/");
    validate_path(&normalized).map_err(|e| DomainError::InvalidPath {
        path: path.to_string(),
        reason: e.to_string(),
    })?;
    Ok(normalized)
}

/// Normalizes the path of a `(path, type)` pair.
pub fn normalize_ref(path: &PathRef) -> DomainResult<PathRef> {
    Ok(PathRef::new(normalize(&path.path)?, path.path_type))
}

/// Parent of a normalized path, or `None` for a root-level object.
pub fn parent(path: &str) -> Option<&str> {
    path.rsplit_once(PATH_SEPARATOR).map(|(parent, _)| parent)
}

/// Strict ancestors of a normalized path, nearest parent first.
pub fn ancestors(path: &str) -> Vec<&str> {
    std::iter::successors(parent(path), |p| parent(p)).collect()
}

/// Candidate chain used to resolve `target`: the exact `(path, type)` first,
/// then every strict ancestor as a FOLDER, nearest first.
///
/// Root-level objects yield only the exact candidate.
pub fn candidates(target: &PathRef) -> Vec<PathRef> {
    let mut chain = Vec::with_capacity(target.path.matches(PATH_SEPARATOR).count() + 1);
    chain.push(target.clone());
    chain.extend(ancestors(&target.path).into_iter().map(PathRef::folder));
    chain
}

/// True if `path` is `root` or lies beneath it.
pub fn is_same_or_descendant(path: &str, root: &str) -> bool {
    path == root || is_strict_descendant(path, root)
}

/// True if `path` lies beneath `root`, on a segment boundary.
pub fn is_strict_descendant(path: &str, root: &str) -> bool {
    path.len() > root.len()
        && path.starts_with(root)
        && path[root.len()..].starts_with(PATH_SEPARATOR)
}

/// True if a row stored at `(path, path_type)` applies when resolving `target`.
pub fn applies_to(path: &str, path_type: PathType, target: &PathRef) -> bool {
    (path == target.path && path_type == target.path_type)
        || (path_type == PathType::Folder && is_strict_descendant(&target.path, path))
}

/// Rewrites `path` from under `from` to under `to`.
///
/// Returns `None` if `path` is not `from` or one of its descendants.
pub fn rebase(path: &str, from: &str, to: &str) -> Option<String> {
    if path == from {
        Some(to.to_string())
    } else if is_strict_descendant(path, from) {
        Some(format!("{to}{}", &path[from.len()..]))
    } else {
        None
    }
}
