//! Repository fetcher: maintains local working copies of remote repositories.
//!
//! Workflow for [`GitFetcher::fetch`]:
//! 1. Derive a safe directory name from the last URL segment.
//! 2. If the directory exists and is a git checkout, `git pull`.
//! 3. If it exists but is not a checkout, remove it.
//! 4. If it does not exist (any more), `git clone`.
//!
//! All git invocations block until the child exits; scanning never starts on
//! a half-cloned tree.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Resolves a repository locator to a local working copy.
pub trait RepositoryFetcher: Send + Sync {
    /// Create or update the working copy and return its path.
    fn fetch(&self, locator: &str) -> Result<PathBuf>;
}

/// Fetcher backed by the `git` command-line client.
#[derive(Debug, Clone)]
pub struct GitFetcher {
    repos_dir: PathBuf,
}

impl GitFetcher {
    pub fn new(repos_dir: impl Into<PathBuf>) -> Self {
        Self {
            repos_dir: repos_dir.into(),
        }
    }

    /// Local path a locator maps to, whether or not it exists yet.
    pub fn working_copy_path(&self, locator: &str) -> Result<PathBuf> {
        Ok(self.repos_dir.join(repo_dir_name(locator)?))
    }
}

impl RepositoryFetcher for GitFetcher {
    fn fetch(&self, locator: &str) -> Result<PathBuf> {
        let repo_path = self.working_copy_path(locator)?;

        if repo_path.exists() {
            if repo_path.join(".git").exists() {
                tracing::info!(path = %repo_path.display(), "pulling latest changes");
                git_pull(&repo_path)?;
            } else {
                tracing::warn!(
                    path = %repo_path.display(),
                    "invalid git checkout found, removing before re-clone"
                );
                std::fs::remove_dir_all(&repo_path).with_context(|| {
                    format!("Failed to remove invalid checkout: {}", repo_path.display())
                })?;
            }
        }

        if !repo_path.exists() {
            tracing::info!(url = locator, path = %repo_path.display(), "cloning repository");
            git_clone(locator, &repo_path)?;
        }

        Ok(std::path::absolute(&repo_path).unwrap_or(repo_path))
    }
}

/// Directory name for a locator: last path segment, `.git` suffix removed,
/// hyphens replaced so the name is usable as a Python package.
pub fn repo_dir_name(locator: &str) -> Result<String> {
    let trimmed = locator.trim().trim_end_matches('/');
    let last = trimmed.rsplit(['/', ':']).next().unwrap_or(trimmed);
    let name = last.strip_suffix(".git").unwrap_or(last);
    if name.is_empty() || name == "." || name == ".." {
        bail!("Cannot derive a repository name from '{}'", locator);
    }
    Ok(name.replace('-', "_"))
}

fn git_clone(url: &str, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create repos directory: {}", parent.display()))?;
    }

    let output = Command::new("git")
        .arg("clone")
        .arg(url)
        .arg(dest)
        .output()
        .with_context(|| "Failed to execute 'git clone'. Is git installed?")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        tracing::error!(url, "git clone failed: {}", stderr.trim());
        bail!("Git clone failed for {}: {}", url, stderr.trim());
    }

    Ok(())
}

fn git_pull(repo_dir: &Path) -> Result<()> {
    let output = Command::new("git")
        .arg("-C")
        .arg(repo_dir)
        .arg("pull")
        .output()
        .with_context(|| "Failed to execute 'git pull'")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        tracing::error!(path = %repo_dir.display(), "git pull failed: {}", stderr.trim());
        bail!("Git pull failed for {}: {}", repo_dir.display(), stderr.trim());
    }

    Ok(())
}

/// Files touched by the most recent commit (`HEAD~1..HEAD`).
///
/// Returns an empty list when the history is too shallow or the directory is
/// not a checkout; callers treat that as "nothing known to have changed".
pub fn changed_files(repo_dir: &Path) -> Vec<String> {
    let output = Command::new("git")
        .arg("-C")
        .arg(repo_dir)
        .args(["diff", "--name-only", "HEAD~1", "HEAD"])
        .output();

    match output {
        Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect(),
        Ok(out) => {
            tracing::debug!(
                "git diff --name-only failed: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            );
            Vec::new()
        }
        Err(e) => {
            tracing::debug!("could not run git diff: {}", e);
            Vec::new()
        }
    }
}

/// Unified diff between the last two commits, optionally for one file.
pub fn repo_diff(repo_dir: &Path, file: Option<&str>) -> Result<String> {
    let mut cmd = Command::new("git");
    cmd.arg("-C").arg(repo_dir).args(["diff", "HEAD~1", "HEAD"]);
    if let Some(file) = file {
        cmd.arg("--").arg(file);
    }

    let output = cmd
        .output()
        .with_context(|| "Failed to execute 'git diff'")?;
    if !output.status.success() {
        bail!(
            "git diff failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
