//! Generation engine: drives one run from repository locator to written,
//! recorded, and bundled test files.
//!
//! # Pipeline
//!
//! ```text
//! fetch ──▶ select files ──▶ prepare (per file, bounded concurrency)
//!                                 read → prompt → model → sanitise → name
//!                            ──▶ commit (sequential, per-repo lock)
//!                                 write → history → combined output
//!                            ──▶ bundle
//! ```
//!
//! Each file is prepared in its own task, so a failure or panic for one file
//! is recorded against that file only. Commit runs in file order: the
//! combined output and history log follow scan order regardless of the
//! order in which model calls finish. A file is only ever written together
//! with its history record; if the history append fails the written file is
//! removed again.

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::Instrument;
use uuid::Uuid;

use crate::bundle;
use crate::config::{Config, LlmConfig};
use crate::fetcher::RepositoryFetcher;
use crate::history::HistoryStore;
use crate::llm::{CompletionModel, CompletionRequest};
use crate::models::{
    GeneratedTest, GenerationReport, GenerationRequest, HistoryRecord, Scope, SourceFile,
    TestType,
};
use crate::prompt::build_prompt;
use crate::sanitize::{clean_test_code, prepend_module_import, test_file_name};
use crate::scanner::scan_sources;

/// Returned when scoping finds no candidate files.
pub const NO_FILES_FOUND: &str = "No source files found to generate tests.";

/// Returned when files were found but none produced a test.
pub const NOTHING_GENERATED: &str = "Test generation completed, but no tests were generated.";

/// Per-repository async mutexes guarding the write/history/bundle sequence.
#[derive(Debug, Clone, Default)]
pub struct RepoLocks {
    inner: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl RepoLocks {
    pub async fn acquire(&self, repo: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            map.entry(repo.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

pub struct Generator {
    tests_dir: PathBuf,
    llm: LlmConfig,
    concurrency: usize,
    max_source_bytes: Option<usize>,
    fetcher: Arc<dyn RepositoryFetcher>,
    model: Arc<dyn CompletionModel>,
    history: HistoryStore,
    locks: RepoLocks,
}

/// Shared, read-only state handed to each per-file task.
struct PrepareContext {
    test_folder: PathBuf,
    language: String,
    test_type: TestType,
    llm: LlmConfig,
    max_source_bytes: Option<usize>,
    model: Arc<dyn CompletionModel>,
    model_calls: AtomicUsize,
}

impl Generator {
    pub fn new(
        config: &Config,
        fetcher: Arc<dyn RepositoryFetcher>,
        model: Arc<dyn CompletionModel>,
    ) -> Self {
        Self {
            tests_dir: config.paths.tests_dir.clone(),
            llm: config.llm.clone(),
            concurrency: config.generation.concurrency.max(1),
            max_source_bytes: config.generation.max_source_bytes,
            fetcher,
            model,
            history: HistoryStore::new(config.history_dir()),
            locks: RepoLocks::default(),
        }
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn tests_dir(&self) -> &Path {
        &self.tests_dir
    }

    /// Run the full pipeline for one request.
    ///
    /// Only fetch and scan failures are returned as errors; per-file faults
    /// are logged and listed in [`GenerationReport::failed`].
    pub async fn generate(&self, request: &GenerationRequest) -> Result<GenerationReport> {
        let run_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("generation", run_id = %run_id, repo = %request.repository);

        async {
            tracing::info!(language = %request.language, dry_run = request.dry_run, "resolving working copy");
            let fetcher = self.fetcher.clone();
            let locator = request.repository.clone();
            let repo_path = tokio::task::spawn_blocking(move || fetcher.fetch(&locator))
                .await
                .context("Repository fetch task failed")??;

            self.generate_in(&repo_path, request, &run_id).await
        }
        .instrument(span)
        .await
    }

    /// Run the pipeline against an existing working copy.
    pub async fn generate_in(
        &self,
        repo_path: &Path,
        request: &GenerationRequest,
        run_id: &str,
    ) -> Result<GenerationReport> {
        let files = select_files(repo_path, request)?;
        Ok(self.generate_files(repo_path, files, request, run_id).await)
    }

    /// Generate tests for an explicit file list.
    pub async fn generate_files(
        &self,
        repo_path: &Path,
        files: Vec<SourceFile>,
        request: &GenerationRequest,
        run_id: &str,
    ) -> GenerationReport {
        let repo_name = working_copy_name(repo_path);
        let mut report = GenerationReport {
            run_id: run_id.to_string(),
            repo_name: repo_name.clone(),
            ..GenerationReport::default()
        };

        if files.is_empty() {
            tracing::error!(path = %repo_path.display(), "no source files found");
            report.combined_output = NO_FILES_FOUND.to_string();
            return report;
        }

        let ctx = Arc::new(PrepareContext {
            test_folder: self.tests_dir.join(&repo_name),
            language: request.language.clone(),
            test_type: request.test_type,
            llm: self.llm.clone(),
            max_source_bytes: self.max_source_bytes,
            model: self.model.clone(),
            model_calls: AtomicUsize::new(0),
        });

        let outcomes: Vec<(SourceFile, Result<GeneratedTest>)> = stream::iter(files)
            .map(|file| {
                let ctx = ctx.clone();
                let task_file = file.clone();
                let handle =
                    tokio::spawn(async move { ctx.prepare(task_file).await }.in_current_span());
                async move {
                    let outcome = match handle.await {
                        Ok(result) => result,
                        Err(e) => Err(anyhow::anyhow!("generation task aborted: {}", e)),
                    };
                    (file, outcome)
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        report.model_calls = ctx.model_calls.load(Ordering::SeqCst);

        let _guard = self.locks.acquire(&repo_name).await;
        let mut combined = String::new();
        let mut taken = HashSet::new();

        for (file, outcome) in outcomes {
            let mut test = match outcome {
                Ok(test) => test,
                Err(e) => {
                    tracing::error!(file = %file.path.display(), "error generating test: {:#}", e);
                    report.failed.push(file.path);
                    continue;
                }
            };

            claim_file_name(&mut test, &mut taken);

            if request.dry_run {
                tracing::info!(file = %test.file_name, "dry run: skipped writing");
            } else if let Err(e) = self.commit(&repo_name, &test, run_id) {
                tracing::error!(file = %file.path.display(), "failed to save test: {:#}", e);
                report.failed.push(file.path);
                continue;
            } else {
                report.written.push(test.output_path.clone());
            }

            combined.push_str(&format!("\n\n==== {} ====\n{}", test.file_name, test.code));
            report.generated.push(test);
        }

        if !request.dry_run && !report.written.is_empty() {
            let dest = bundle::bundle_path(&self.tests_dir, &repo_name);
            match bundle::package_files(&dest, &report.written) {
                Ok(_) => report.bundle = Some(dest),
                Err(e) => tracing::error!("failed to create bundle: {:#}", e),
            }
        }

        let combined = combined.trim();
        report.combined_output = if combined.is_empty() {
            NOTHING_GENERATED.to_string()
        } else {
            combined.to_string()
        };

        tracing::info!(
            generated = report.generated.len(),
            written = report.written.len(),
            failed = report.failed.len(),
            "generation finished"
        );
        report
    }

    /// Write one test file and its history record as a pair.
    fn commit(&self, repo_name: &str, test: &GeneratedTest, run_id: &str) -> Result<()> {
        if let Some(parent) = test.output_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(&test.output_path, &test.code)
            .with_context(|| format!("Failed to write {}", test.output_path.display()))?;

        let record = HistoryRecord::new(
            test.source.relative.to_string_lossy(),
            test.source.language.clone(),
            test.test_type.as_str(),
            test.output_path.to_string_lossy(),
            test.code.clone(),
        )
        .with_run_id(run_id);

        if let Err(e) = self.history.record(repo_name, record) {
            // Keep writes and history paired.
            let _ = std::fs::remove_file(&test.output_path);
            return Err(e);
        }

        tracing::info!(path = %test.output_path.display(), "test saved");
        Ok(())
    }
}

impl PrepareContext {
    async fn prepare(&self, source: SourceFile) -> Result<GeneratedTest> {
        let bytes = tokio::fs::read(&source.path)
            .await
            .with_context(|| format!("Failed to read {}", source.path.display()))?;
        let mut text = String::from_utf8_lossy(&bytes).into_owned();
        if let Some(cap) = self.max_source_bytes {
            truncate_at_char_boundary(&mut text, cap);
        }

        let prompt = build_prompt(&self.language, &text);
        let request = CompletionRequest::from_config(&self.llm, prompt);

        self.model_calls.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(file = %source.relative.display(), model = self.model.name(), "calling model");
        let raw = self.model.complete(&request).await?;

        let cleaned = clean_test_code(&raw);
        let code = prepend_module_import(&self.language, &source.relative, &cleaned);
        let file_name = test_file_name(&self.language, &source.relative);
        let output_path = self.test_folder.join(&file_name);

        Ok(GeneratedTest {
            source,
            code,
            file_name,
            output_path,
            test_type: self.test_type,
        })
    }
}

/// Give `test` a file name not yet used in this run. Distinct sources can
/// sanitise to the same name (`pkg/mod.py` and `pkg_mod.py`); later ones get
/// a numeric suffix instead of overwriting the earlier test.
fn claim_file_name(test: &mut GeneratedTest, taken: &mut HashSet<String>) {
    if taken.insert(test.file_name.clone()) {
        return;
    }

    let name = Path::new(&test.file_name);
    let stem = name
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = name
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut n = 2;
    let renamed = loop {
        let candidate = format!("{}_{}{}", stem, n, ext);
        if taken.insert(candidate.clone()) {
            break candidate;
        }
        n += 1;
    };

    tracing::warn!(
        source = %test.source.relative.display(),
        original = %test.file_name,
        renamed = %renamed,
        "test file name collision"
    );
    test.output_path = test.output_path.with_file_name(&renamed);
    test.file_name = renamed;
}

/// Resolve the request's scope to a file list.
pub fn select_files(repo_path: &Path, request: &GenerationRequest) -> Result<Vec<SourceFile>> {
    match &request.scope {
        Scope::File(path) => {
            let absolute = if path.is_absolute() {
                path.clone()
            } else {
                repo_path.join(path)
            };
            let relative = absolute
                .strip_prefix(repo_path)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| path.clone());
            Ok(vec![SourceFile {
                path: absolute,
                relative,
                language: request.language.clone(),
            }])
        }
        Scope::Folder(filter) => scan_sources(repo_path, &request.language, Some(filter)),
        Scope::Repository => scan_sources(repo_path, &request.language, None),
    }
}

/// Repository name used for the test folder, bundle, and history key.
pub fn working_copy_name(repo_path: &Path) -> String {
    repo_path
        .file_name()
        .map(|n| n.to_string_lossy().replace('-', "_"))
        .unwrap_or_else(|| "repo".to_string())
}

fn truncate_at_char_boundary(text: &mut String, max_bytes: usize) {
    if text.len() <= max_bytes {
        return;
    }
    let mut cut = max_bytes;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}
