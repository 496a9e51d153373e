//! Maps request paths onto the served directory tree.
//!
//! Resolution is pure path arithmetic: the request path is joined onto the
//! canonical root, normalized lexically and then checked for containment.
//! Nothing here touches the filesystem.

use crate::error::AppError;
use std::path::{Component, Path, PathBuf};

/// A request path that has been proven to stay inside the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Absolute location on disk, `root` or below.
    pub absolute: PathBuf,
    /// Normalized request-relative path, always starting with `/`.
    pub relative: String,
}

#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    /// `root` must already be canonical.
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a decoded request path, or fails with `AppError::Forbidden`
    /// if it lands outside the root.
    pub fn resolve(&self, request_path: &str) -> Result<ResolvedPath, AppError> {
        if request_path.contains('\0') {
            return Err(AppError::Forbidden);
        }

        // Only the single leading slash belongs to the URL. Anything left that
        // is still absolute overrides the root in `join` and fails below.
        let relative = request_path.strip_prefix('/').unwrap_or(request_path);
        let absolute = normalize_lexically(&self.root.join(relative));

        if !is_within_root(&absolute, &self.root) {
            return Err(AppError::Forbidden);
        }

        let relative = display_relative(&absolute, &self.root);
        Ok(ResolvedPath { absolute, relative })
    }
}

/// Collapses `.`, `..` and repeated separators without consulting the
/// filesystem. `..` at the top of an absolute path stays there.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => normalized.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            Component::Normal(name) => normalized.push(name),
        }
    }
    normalized
}

/// True if `candidate` is `root` itself or lies below it. The comparison is
/// per component, so `/srv/www-evil` is not inside `/srv/www`.
pub fn is_within_root(candidate: &Path, root: &Path) -> bool {
    candidate == root || candidate.starts_with(root)
}

fn display_relative(absolute: &Path, root: &Path) -> String {
    let segments: Vec<String> = absolute
        .strip_prefix(root)
        .map(|rest| {
            rest.components()
                .filter_map(|c| match c {
                    Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    format!("/{}", segments.join("/"))
}
