//! Zip bundles of generated tests.
//!
//! One bundle per repository at `<tests_dir>/<repo>/<repo>.zip`. Each
//! packaging call rewrites it from scratch; bundles are not versioned.

use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Where a repository's bundle lives.
pub fn bundle_path(tests_dir: &Path, repo_name: &str) -> PathBuf {
    tests_dir.join(repo_name).join(format!("{}.zip", repo_name))
}

/// Write `files` into a fresh archive at `dest`, each stored under its base
/// name. An existing archive is replaced. A base name seen twice is packed
/// once; the returned count is the number of entries written.
pub fn package_files(dest: &Path, files: &[PathBuf]) -> Result<usize> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create bundle directory: {}", parent.display()))?;
    }

    let tmp = dest.with_extension("zip.partial");
    let out = File::create(&tmp)
        .with_context(|| format!("Failed to create bundle: {}", tmp.display()))?;
    let mut zip = ZipWriter::new(out);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut seen = HashSet::new();
    for path in files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| anyhow::anyhow!("Not a file path: {}", path.display()))?;
        if !seen.insert(name.clone()) {
            tracing::warn!(file = %path.display(), "duplicate bundle entry skipped");
            continue;
        }
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read {} for bundling", path.display()))?;
        zip.start_file(name, options)?;
        zip.write_all(&bytes)?;
    }
    zip.finish()?;

    std::fs::rename(&tmp, dest)
        .with_context(|| format!("Failed to replace bundle: {}", dest.display()))?;
    tracing::info!(bundle = %dest.display(), entries = seen.len(), "bundle written");
    Ok(seen.len())
}

/// Rebuild a repository's bundle from every test file currently in its
/// folder. Fails if the folder is missing or holds no test files.
pub fn package_repo_folder(tests_dir: &Path, repo_name: &str) -> Result<PathBuf> {
    let folder = tests_dir.join(repo_name);
    if !folder.is_dir() {
        bail!("Test folder not found: {}", folder.display());
    }

    let dest = bundle_path(tests_dir, repo_name);
    let files = collect_test_files(&folder, &dest);
    if files.is_empty() {
        bail!("No test files found in {}", folder.display());
    }

    package_files(&dest, &files)?;
    Ok(dest)
}

fn collect_test_files(folder: &Path, bundle: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(folder)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p != bundle)
        .filter(|p| {
            let name = p.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
            !name.starts_with('.') && !name.ends_with(".zip") && !name.ends_with(".partial")
        })
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use zip::ZipArchive;

    fn entry_names(path: &Path) -> Vec<String> {
        let archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
        let mut names: Vec<String> = archive.file_names().map(String::from).collect();
        names.sort();
        names
    }

    #[test]
    fn bundle_path_is_per_repo() {
        assert_eq!(
            bundle_path(Path::new("tests"), "demo"),
            PathBuf::from("tests/demo/demo.zip")
        );
    }

    #[test]
    fn packages_base_names_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("demo");
        std::fs::create_dir_all(&folder).unwrap();
        let a = folder.join("test_a.py");
        let b = folder.join("test_b.py");
        std::fs::write(&a, "a").unwrap();
        std::fs::write(&b, "b").unwrap();

        let dest = bundle_path(dir.path(), "demo");
        package_files(&dest, &[a.clone(), b]).unwrap();
        assert_eq!(entry_names(&dest), vec!["test_a.py", "test_b.py"]);

        package_files(&dest, &[a]).unwrap();
        assert_eq!(entry_names(&dest), vec!["test_a.py"]);
    }

    #[test]
    fn repeated_base_name_is_packed_once() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("test_a.py");
        std::fs::write(&a, "a").unwrap();

        let dest = bundle_path(dir.path(), "demo");
        assert_eq!(package_files(&dest, &[a.clone(), a]).unwrap(), 1);
        assert_eq!(entry_names(&dest), vec!["test_a.py"]);
    }

    #[test]
    fn folder_rebuild_skips_previous_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("demo");
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join("test_x.js"), "x").unwrap();
        std::fs::write(folder.join("demo.zip"), "stale").unwrap();

        let dest = package_repo_folder(dir.path(), "demo").unwrap();
        assert_eq!(entry_names(&dest), vec!["test_x.js"]);
    }

    #[test]
    fn missing_or_empty_folder_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(package_repo_folder(dir.path(), "ghost").is_err());

        std::fs::create_dir_all(dir.path().join("empty")).unwrap();
        assert!(package_repo_folder(dir.path(), "empty").is_err());
    }
}
