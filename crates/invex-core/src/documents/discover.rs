//! Recursive discovery of candidate documents.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use super::DocumentFormat;

/// Enumerate supported documents under `root`, sorted by path.
///
/// `exclude` (typically the output directory) is never descended into, and
/// hidden entries are ignored. A file `root` is returned as-is if supported.
pub fn discover(root: &Path, exclude: Option<&Path>) -> Vec<PathBuf> {
    if root.is_file() {
        return match DocumentFormat::from_path(root) {
            Some(_) => vec![root.to_path_buf()],
            None => Vec::new(),
        };
    }

    let exclude = exclude.map(|p| p.canonicalize().unwrap_or_else(|_| p.to_path_buf()));

    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() > 0 && is_hidden(entry.path()) {
                return false;
            }
            match (&exclude, entry.file_type().is_dir()) {
                (Some(ex), true) => {
                    let path = entry
                        .path()
                        .canonicalize()
                        .unwrap_or_else(|_| entry.path().to_path_buf());
                    &path != ex
                }
                _ => true,
            }
        })
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| DocumentFormat::from_path(p).is_some())
        .collect();

    files.sort();
    debug!("Discovered {} documents under {}", files.len(), root.display());
    files
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}
