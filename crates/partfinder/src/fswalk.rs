//! One-level directory listing for the search pipeline.
//!
//! Only immediate children are read; nothing recurses. Children are sorted
//! by name so scan order (and with it the first-entry-wins tie-break of the
//! directory index) does not depend on platform `read_dir` order. Entries
//! that fail to stat or open are skipped, never reported.

use std::fs;
use std::path::{Path, PathBuf};

use crate::cache::DirectoryEntry;
use crate::cancel::CancellationToken;
use crate::error::{FinderError, Result};

/// Extensions (lowercase, without dot) treated as loadable assets.
pub const ASSET_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "gif"];

/// An immediate child of a listed directory.
#[derive(Debug, Clone)]
pub struct ChildEntry {
    pub name: String,
    pub path: PathBuf,
    pub is_dir: bool,
    pub is_file: bool,
}

impl ChildEntry {
    /// Returns true if the entry can be opened for reading right now.
    pub fn is_readable(&self) -> bool {
        if self.is_dir {
            fs::read_dir(&self.path).is_ok()
        } else if self.is_file {
            fs::File::open(&self.path).is_ok()
        } else {
            false
        }
    }

    pub fn has_asset_extension(&self) -> bool {
        self.path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                ASSET_EXTENSIONS
                    .iter()
                    .any(|allowed| ext.eq_ignore_ascii_case(allowed))
            })
            .unwrap_or(false)
    }
}

/// Lists the immediate children of `dir`, sorted by name.
///
/// Returns `Ok(None)` if cancelled. Fails only when `dir` itself cannot be read.
pub fn list_children(dir: &Path, cancel: &CancellationToken) -> Result<Option<Vec<ChildEntry>>> {
    let read_dir = fs::read_dir(dir).map_err(|source| FinderError::PathUnreadable {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut children = Vec::new();
    for entry in read_dir {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        let Ok(entry) = entry else {
            continue;
        };
        let path = entry.path();
        // Follow symlinks so linked folders and images count as their targets.
        let Ok(metadata) = fs::metadata(&path) else {
            continue;
        };
        children.push(ChildEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            path,
            is_dir: metadata.is_dir(),
            is_file: metadata.is_file(),
        });
    }

    children.sort_unstable_by(|a, b| a.name.cmp(&b.name));
    Ok(Some(children))
}

/// Readable child directories of `root`, ready for [`crate::DirectoryCache::set`].
pub fn scan_directories(
    root: &Path,
    cancel: &CancellationToken,
) -> Result<Option<Vec<DirectoryEntry>>> {
    let Some(children) = list_children(root, cancel)? else {
        return Ok(None);
    };

    let mut directories = Vec::new();
    for child in children {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        if child.is_dir && child.is_readable() {
            directories.push(DirectoryEntry::new(child.name, child.path));
        }
    }
    Ok(Some(directories))
}

/// Readable asset files directly inside `folder`.
pub fn list_assets(folder: &Path, cancel: &CancellationToken) -> Result<Option<Vec<PathBuf>>> {
    let Some(children) = list_children(folder, cancel)? else {
        return Ok(None);
    };

    let mut assets = Vec::new();
    for child in children {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        if child.is_file && child.has_asset_extension() && child.is_readable() {
            assets.push(child.path);
        }
    }
    Ok(Some(assets))
}
