use std::fs;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum FinderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("Path is not readable: {path}: {source}")]
    PathUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Worker pool error: {0}")]
    Pool(String),

    #[error("Decode error for {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("A search is already running")]
    Busy,
}

pub type Result<T> = std::result::Result<T, FinderError>;

/// Resolves `root` to a canonical, readable directory.
///
/// Missing paths map to [`FinderError::PathNotFound`] so callers can tell them
/// apart from permission problems.
pub fn resolve_readable_dir(root: PathBuf) -> Result<PathBuf> {
    let canonical = fs::canonicalize(&root).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            FinderError::PathNotFound(root.clone())
        } else {
            FinderError::PathUnreadable {
                path: root.clone(),
                source,
            }
        }
    })?;

    if !canonical.is_dir() {
        return Err(FinderError::NotADirectory(canonical));
    }

    fs::read_dir(&canonical).map_err(|source| FinderError::PathUnreadable {
        path: canonical.clone(),
        source,
    })?;

    Ok(canonical)
}
