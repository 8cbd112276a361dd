//! Core data models shared by the generation pipeline, the history store,
//! and the test runner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Languages with first-class support (scanner extension, import fix-up,
/// test naming conventions, test execution).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Java,
    #[value(name = "javascript")]
    JavaScript,
    #[value(name = "typescript")]
    TypeScript,
}

impl Language {
    pub const ALL: [Language; 4] = [
        Language::Python,
        Language::Java,
        Language::JavaScript,
        Language::TypeScript,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Java => "java",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
        }
    }

    /// Canonical file extension, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Language::Python => "py",
            Language::Java => "java",
            Language::JavaScript => "js",
            Language::TypeScript => "ts",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "python" => Ok(Language::Python),
            "java" => Ok(Language::Java),
            "javascript" => Ok(Language::JavaScript),
            "typescript" => Ok(Language::TypeScript),
            other => anyhow::bail!(
                "unsupported language '{}': expected python, java, javascript, or typescript",
                other
            ),
        }
    }
}

/// Test classifier carried through generation and history. It does not
/// change the prompt; it labels what the caller asked for.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum TestType {
    #[default]
    Auto,
    Unit,
    Ui,
}

impl TestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestType::Auto => "auto",
            TestType::Unit => "unit",
            TestType::Ui => "ui",
        }
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which files a generation run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Exactly one file, relative to the repository root or absolute.
    File(PathBuf),
    /// Every matching file under directories whose path contains the filter.
    Folder(String),
    /// Every matching file in the repository.
    Repository,
}

impl Scope {
    /// Build a scope from the optional inputs a caller supplies. A file path
    /// wins over a folder filter; empty strings count as absent.
    pub fn from_parts(file_path: Option<&str>, folder_filter: Option<&str>) -> Self {
        match (
            file_path.filter(|s| !s.is_empty()),
            folder_filter.filter(|s| !s.is_empty()),
        ) {
            (Some(file), _) => Scope::File(PathBuf::from(file)),
            (None, Some(folder)) => Scope::Folder(folder.to_string()),
            (None, None) => Scope::Repository,
        }
    }
}

/// One generation run's inputs.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Remote URL (or local path) handed to the fetcher.
    pub repository: String,
    /// Language tag. Tags outside [`Language`] fall back to a `.txt`
    /// extension and match nothing in practice.
    pub language: String,
    pub scope: Scope,
    /// Model calls still happen; nothing is written or recorded.
    pub dry_run: bool,
    pub test_type: TestType,
}

impl GenerationRequest {
    pub fn new(repository: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            language: language.into(),
            scope: Scope::Repository,
            dry_run: false,
            test_type: TestType::Auto,
        }
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn test_type(mut self, test_type: TestType) -> Self {
        self.test_type = test_type;
        self
    }
}

/// A candidate source file produced by the scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Path relative to the repository root.
    pub relative: PathBuf,
    pub language: String,
}

/// Model output for one source file, after sanitising.
#[derive(Debug, Clone)]
pub struct GeneratedTest {
    pub source: SourceFile,
    pub code: String,
    /// Bare file name, e.g. `test_pkg_util.py`.
    pub file_name: String,
    /// Where the file lives (or would live, on a dry run).
    pub output_path: PathBuf,
    pub test_type: TestType,
}

/// One append-only entry in a repository's history log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub file: String,
    pub language: String,
    pub test_type: String,
    pub output_path: String,
    pub generated_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

impl HistoryRecord {
    pub fn new(
        file: impl Into<String>,
        language: impl Into<String>,
        test_type: impl Into<String>,
        output_path: impl Into<String>,
        generated_code: impl Into<String>,
    ) -> Self {
        Self {
            file: file.into(),
            language: language.into(),
            test_type: test_type.into(),
            output_path: output_path.into(),
            generated_code: generated_code.into(),
            recorded_at: Some(Utc::now()),
            run_id: None,
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }
}

/// Result of a generation run.
#[derive(Debug, Clone, Default)]
pub struct GenerationReport {
    pub run_id: String,
    pub repo_name: String,
    /// Labelled sections, one per generated file, or a sentinel message.
    pub combined_output: String,
    pub generated: Vec<GeneratedTest>,
    pub written: Vec<PathBuf>,
    pub bundle: Option<PathBuf>,
    /// Files that were skipped because of a read, model, or write failure.
    pub failed: Vec<PathBuf>,
    pub model_calls: usize,
}

/// Captured output of a test run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub stdout: String,
    pub stderr: String,
}

impl RunReport {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn failure(stderr: impl Into<String>) -> Self {
        Self::new("", stderr)
    }

    /// Any error output marks the run as failed, even alongside stdout.
    pub fn succeeded(&self) -> bool {
        self.stderr.trim().is_empty()
    }

    pub fn status(&self) -> &'static str {
        if self.succeeded() {
            "success"
        } else {
            "error"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_parses_case_insensitively() {
        assert_eq!("Python".parse::<Language>().unwrap(), Language::Python);
        assert_eq!(
            "typescript".parse::<Language>().unwrap(),
            Language::TypeScript
        );
        assert!("cobol".parse::<Language>().is_err());
    }

    #[test]
    fn file_scope_wins_over_folder() {
        let scope = Scope::from_parts(Some("src/a.py"), Some("src"));
        assert_eq!(scope, Scope::File(PathBuf::from("src/a.py")));
        assert_eq!(
            Scope::from_parts(Some(""), Some("lib")),
            Scope::Folder("lib".into())
        );
        assert_eq!(Scope::from_parts(None, Some("")), Scope::Repository);
    }

    #[test]
    fn stderr_marks_run_failed() {
        assert!(RunReport::new("ok", "").succeeded());
        let report = RunReport::new("ran 3 tests", "warning: deprecated");
        assert!(!report.succeeded());
        assert_eq!(report.status(), "error");
    }

    #[test]
    fn history_record_reads_without_optional_fields() {
        let json = r#"{"file":"a.py","language":"python","test_type":"auto",
            "output_path":"tests/demo/test_a.py","generated_code":"x"}"#;
        let rec: HistoryRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.file, "a.py");
        assert!(rec.recorded_at.is_none());
        assert!(rec.run_id.is_none());
    }
}
