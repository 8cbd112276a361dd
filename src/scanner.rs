//! Source scanner: finds candidate source files in a working copy.
//!
//! Hidden directories and `__pycache__` are pruned during the walk. The
//! optional folder filter is a plain substring test against each file's
//! parent directory path relative to the repository root (not a path-segment
//! match), so `api` also admits `rapid/`, while the repository's own name and
//! location never match. Files at the root have an empty parent and are
//! excluded by any filter. Results come back in walk order, which is not guaranteed to be
//! stable across filesystems.

use anyhow::Result;
use std::path::Path;
use walkdir::{DirEntry, WalkDir};

use crate::models::{Language, SourceFile};

/// Extension for a language tag. Unknown tags map to `txt`.
pub fn extension_for(language: &str) -> &'static str {
    language
        .parse::<Language>()
        .map(|l| l.extension())
        .unwrap_or("txt")
}

/// Collect files under `repo_root` whose extension matches `language`.
///
/// An empty result is not an error.
pub fn scan_sources(
    repo_root: &Path,
    language: &str,
    folder_filter: Option<&str>,
) -> Result<Vec<SourceFile>> {
    let suffix = format!(".{}", extension_for(language));
    let folder_filter = folder_filter.filter(|f| !f.is_empty());

    let mut files = Vec::new();
    let walker = WalkDir::new(repo_root)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_pruned_dir(e));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy();
        if name.starts_with('.') || !name.ends_with(&suffix) {
            continue;
        }

        let path = entry.path().to_path_buf();
        let relative = path.strip_prefix(repo_root).unwrap_or(&path).to_path_buf();

        if let Some(filter) = folder_filter {
            let parent = relative
                .parent()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_default();
            if !parent.contains(filter) {
                continue;
            }
        }

        tracing::debug!(file = %path.display(), "found source file");
        files.push(SourceFile {
            path,
            relative,
            language: language.to_string(),
        });
    }

    tracing::info!(count = files.len(), root = %repo_root.display(), "scan complete");
    Ok(files)
}

fn is_pruned_dir(entry: &DirEntry) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || name == "__pycache__"
}
