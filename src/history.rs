//! Append-only generation history, one JSON document per repository.
//!
//! Layout: `<tests_dir>/.history/<key>.json`, where `<key>` is the
//! repository identifier with every non-alphanumeric character mapped to
//! `_`. `acme/my-repo` and `acme-my_repo` therefore share a log.
//!
//! A log that fails to parse reads as empty (with a warning); the next
//! append replaces it with a fresh log holding just the new record.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::models::HistoryRecord;

/// Repository key used for test-run records that are not tied to a
/// particular repository.
pub const LATEST_RUN: &str = "latest_run";

/// Normalise a repository identifier into a storage key.
pub fn normalize_repo(repo: &str) -> String {
    repo.trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[derive(Debug, Clone)]
pub struct HistoryStore {
    dir: PathBuf,
}

impl HistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn log_path(&self, repo: &str) -> PathBuf {
        self.dir.join(format!("{}.json", normalize_repo(repo)))
    }

    /// Whether a log file exists for this repository.
    pub fn exists(&self, repo: &str) -> bool {
        self.log_path(repo).is_file()
    }

    /// Append one record to the repository's log.
    pub fn record(&self, repo: &str, record: HistoryRecord) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create history dir: {}", self.dir.display()))?;

        let path = self.log_path(repo);
        let mut records = match read_log(&path) {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(path = %path.display(), "corrupt history log, starting fresh: {:#}", e);
                Vec::new()
            }
        };
        let file = record.file.clone();
        records.push(record);

        let json = serde_json::to_string_pretty(&records)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write history: {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to replace history: {}", path.display()))?;

        tracing::info!(repo, file = %file, "history saved");
        Ok(())
    }

    /// All records for a repository in append order. Missing or corrupt logs
    /// yield an empty list.
    pub fn fetch(&self, repo: &str) -> Vec<HistoryRecord> {
        let path = self.log_path(repo);
        match read_log(&path) {
            Ok(records) => {
                if records.is_empty() && !path.exists() {
                    tracing::debug!(repo, "no history log found");
                }
                records
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "failed to decode history log: {:#}", e);
                Vec::new()
            }
        }
    }
}

fn read_log(path: &Path) -> Result<Vec<HistoryRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let records = serde_json::from_str(&content)
        .with_context(|| format!("Invalid history JSON in {}", path.display()))?;
    Ok(records)
}
