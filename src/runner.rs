//! Test execution through each language's native toolchain.
//!
//! Every supported language has a [`TestExecutor`]:
//!
//! | Language | Executor | Strategy |
//! |----------|----------|----------|
//! | python | [`PythonExecutor`] | run each test file with the interpreter; failures are collected |
//! | java | [`JavaExecutor`] | `javac` all files, then `java` each class; a compile error aborts |
//! | javascript | [`NpmExecutor`] | `npm test` |
//!
//! Import/class search paths travel in an [`ExecutionContext`] and are
//! applied to each child process's environment. Nothing process-wide is
//! mutated, so there is nothing to restore after a run.
//!
//! Every run, including failed and unsupported ones, is appended to the
//! history log under [`LATEST_RUN`].

use anyhow::{Context, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use walkdir::WalkDir;

use crate::config::Config;
use crate::history::{HistoryStore, LATEST_RUN};
use crate::models::{HistoryRecord, Language, RunReport, TestType};

/// Everything an executor needs for one run.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Directory holding the test files.
    pub test_dir: PathBuf,
    /// Extra import roots (PYTHONPATH entries, Java classpath entries).
    pub search_path: Vec<PathBuf>,
    /// Working directory for spawned processes.
    pub working_dir: PathBuf,
}

impl ExecutionContext {
    fn joined_search_path(&self, existing: Option<OsString>) -> Result<OsString> {
        let mut entries: Vec<PathBuf> = self.search_path.clone();
        if let Some(existing) = existing {
            entries.extend(std::env::split_paths(&existing));
        }
        std::env::join_paths(entries).context("Search path entry contains a separator")
    }
}

/// Runs one language's tests.
pub trait TestExecutor: Send + Sync {
    fn execute(&self, ctx: &ExecutionContext) -> Result<RunReport>;
}

/// Select the executor for a language. TypeScript has none.
pub fn executor_for(language: Language) -> Option<Box<dyn TestExecutor>> {
    match language {
        Language::Python => Some(Box::new(PythonExecutor::default())),
        Language::Java => Some(Box::new(JavaExecutor::default())),
        Language::JavaScript => Some(Box::new(NpmExecutor::default())),
        Language::TypeScript => None,
    }
}

// ============ Python ============

pub struct PythonExecutor {
    pub interpreter: String,
}

impl Default for PythonExecutor {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
        }
    }
}

impl TestExecutor for PythonExecutor {
    fn execute(&self, ctx: &ExecutionContext) -> Result<RunReport> {
        tracing::info!(dir = %ctx.test_dir.display(), "executing python tests");
        if !ctx.test_dir.is_dir() {
            return Ok(RunReport::failure(format!(
                "No test directory found at {}",
                ctx.test_dir.display()
            )));
        }

        let python_path = ctx.joined_search_path(std::env::var_os("PYTHONPATH"))?;
        let mut output = String::new();
        let mut errors = String::new();

        for file in python_test_files(&ctx.test_dir) {
            let result = Command::new(&self.interpreter)
                .arg(&file)
                .env("PYTHONPATH", &python_path)
                .current_dir(&ctx.working_dir)
                .output();

            match result {
                Ok(out) if out.status.success() => {
                    output.push_str(&format!("Ran test: {}\n", file.display()));
                }
                Ok(out) => {
                    errors.push_str(&format!(
                        "Error in {}:\n{}\n",
                        file.display(),
                        String::from_utf8_lossy(&out.stderr).trim()
                    ));
                }
                Err(e) => {
                    errors.push_str(&format!("Error in {}:\n{}\n", file.display(), e));
                }
            }
        }

        Ok(RunReport::new(output.trim(), errors.trim()))
    }
}

/// `.py` files under `dir`, skipping hidden directories and dunder files,
/// in sorted order.
fn python_test_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            let name = e.file_name().to_string_lossy();
            name.ends_with(".py") && !name.starts_with("__")
        })
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

// ============ Java ============

pub struct JavaExecutor {
    pub compiler: String,
    pub runtime: String,
}

impl Default for JavaExecutor {
    fn default() -> Self {
        Self {
            compiler: "javac".to_string(),
            runtime: "java".to_string(),
        }
    }
}

impl TestExecutor for JavaExecutor {
    fn execute(&self, ctx: &ExecutionContext) -> Result<RunReport> {
        tracing::info!(dir = %ctx.test_dir.display(), "compiling and executing java tests");
        let files = java_test_files(&ctx.test_dir)?;
        if files.is_empty() {
            return Ok(RunReport::failure(format!(
                "No Java test files found in {}",
                ctx.test_dir.display()
            )));
        }

        let mut classpath = ctx.search_path.clone();
        classpath.insert(0, ctx.test_dir.clone());
        let classpath = std::env::join_paths(classpath).context("Invalid classpath entry")?;

        let compile = Command::new(&self.compiler)
            .arg("-cp")
            .arg(&classpath)
            .args(&files)
            .current_dir(&ctx.working_dir)
            .output()
            .with_context(|| format!("Failed to execute '{}'", self.compiler))?;
        if !compile.status.success() {
            let (stdout, stderr) = lossy(&compile);
            return Ok(RunReport::new(stdout, stderr));
        }

        let mut output = String::new();
        let mut errors = String::new();
        for file in &files {
            let class_name = file
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            let run = Command::new(&self.runtime)
                .arg("-cp")
                .arg(&classpath)
                .arg(&class_name)
                .current_dir(&ctx.working_dir)
                .output();

            output.push_str(&format!("\n\n=== Running {}.java ===\n", class_name));
            match run {
                Ok(out) => {
                    let (stdout, stderr) = lossy(&out);
                    output.push_str(&stdout);
                    output.push_str(&stderr);
                    if !out.status.success() {
                        errors.push_str(&format!("{} exited with {}\n", class_name, out.status));
                    }
                }
                Err(e) => errors.push_str(&format!("{}: {}\n", class_name, e)),
            }
        }

        Ok(RunReport::new(output.trim(), errors.trim()))
    }
}

fn java_test_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == "java") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

// ============ JavaScript ============

pub struct NpmExecutor {
    pub program: String,
}

impl Default for NpmExecutor {
    fn default() -> Self {
        Self {
            program: "npm".to_string(),
        }
    }
}

impl TestExecutor for NpmExecutor {
    fn execute(&self, ctx: &ExecutionContext) -> Result<RunReport> {
        tracing::info!(dir = %ctx.working_dir.display(), "running javascript tests via npm");
        let out = Command::new(&self.program)
            .arg("test")
            .current_dir(&ctx.working_dir)
            .output()
            .with_context(|| format!("Failed to execute '{} test'", self.program))?;
        let (stdout, stderr) = lossy(&out);
        Ok(RunReport::new(stdout.trim(), stderr.trim()))
    }
}

fn lossy(out: &Output) -> (String, String) {
    (
        String::from_utf8_lossy(&out.stdout).to_string(),
        String::from_utf8_lossy(&out.stderr).to_string(),
    )
}

// ============ Runner ============

/// Runs tests for a language and records the outcome.
pub struct TestRunner {
    tests_dir: PathBuf,
    repos_dir: PathBuf,
    history: HistoryStore,
}

impl TestRunner {
    pub fn new(config: &Config) -> Self {
        Self {
            tests_dir: config.paths.tests_dir.clone(),
            repos_dir: config.paths.repos_dir.clone(),
            history: HistoryStore::new(config.history_dir()),
        }
    }

    /// Build the context for a run, optionally scoped to one repository's
    /// generated tests and working copy.
    pub fn context(&self, repo: Option<&str>) -> ExecutionContext {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let repos_dir = std::path::absolute(&self.repos_dir).unwrap_or(self.repos_dir.clone());

        match repo {
            Some(repo) => {
                let working_copy = repos_dir.join(repo);
                let working_dir = if working_copy.is_dir() {
                    working_copy.clone()
                } else {
                    cwd.clone()
                };
                ExecutionContext {
                    test_dir: self.tests_dir.join(repo),
                    search_path: vec![working_copy, repos_dir, cwd],
                    working_dir,
                }
            }
            None => ExecutionContext {
                test_dir: self.tests_dir.clone(),
                search_path: vec![repos_dir, cwd.clone()],
                working_dir: cwd,
            },
        }
    }

    /// Execute tests and append the outcome to the run history.
    pub fn run(&self, language: &str, test_type: TestType, repo: Option<&str>) -> RunReport {
        tracing::info!(language, test_type = %test_type, "running tests");
        let ctx = self.context(repo);
        self.run_with(language, test_type, &ctx, executor_for)
    }

    /// Like [`run`](Self::run) with an explicit context and executor lookup.
    pub fn run_with<F>(
        &self,
        language: &str,
        test_type: TestType,
        ctx: &ExecutionContext,
        select: F,
    ) -> RunReport
    where
        F: Fn(Language) -> Option<Box<dyn TestExecutor>>,
    {
        let report = match language.parse::<Language>().ok().and_then(&select) {
            Some(executor) => match executor.execute(ctx) {
                Ok(report) => report,
                Err(e) => {
                    tracing::error!("test execution failed: {:#}", e);
                    RunReport::failure(format!("Test execution failed: {:#}", e))
                }
            },
            None => RunReport::failure(format!("Unsupported language: {}", language)),
        };

        let record = HistoryRecord::new(
            "*",
            language,
            test_type.as_str(),
            "N/A",
            format!("{}\n\n{}", report.stdout, report.stderr),
        );
        if let Err(e) = self.history.record(LATEST_RUN, record) {
            tracing::warn!("failed to record test run: {:#}", e);
        }

        report
    }
}
