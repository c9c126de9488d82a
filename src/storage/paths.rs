use std::path::{Component, Path, PathBuf};

use tokio::fs;

use crate::error::{AppError, Result};

/// Resolves a client-supplied relative path under `root`.
///
/// `root` must already be canonical. Absolute paths, parent-directory segments
/// and empty paths are rejected outright. An existing target is canonicalized
/// and must still live under `root`, which catches symlinks pointing outside.
/// A missing target is returned as joined so the caller can answer not-found.
pub async fn resolve(root: &Path, requested: &str) -> Result<PathBuf> {
    let relative = Path::new(requested);

    if relative.is_absolute() || relative.has_root() {
        return Err(AppError::PathRejected(requested.to_string()));
    }

    let mut normal_segments = 0;
    for component in relative.components() {
        match component {
            Component::Normal(_) => normal_segments += 1,
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(AppError::PathRejected(requested.to_string()));
            }
        }
    }

    if normal_segments == 0 {
        return Err(AppError::PathRejected(requested.to_string()));
    }

    let candidate = root.join(relative);

    match fs::canonicalize(&candidate).await {
        Ok(real) if real.starts_with(root) => Ok(real),
        Ok(real) => {
            tracing::warn!(
                "Path {} resolves outside storage root: {}",
                requested,
                real.display()
            );
            Err(AppError::PathRejected(requested.to_string()))
        }
        Err(_) => Ok(candidate),
    }
}

/// `/`-joined path of `path` relative to `root`.
pub fn relative_key(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
