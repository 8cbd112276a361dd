//! Selective test re-run: map recently changed sources to existing tests.
//!
//! Naming conventions per language:
//!
//! | Language | Source | Test |
//! |----------|--------|------|
//! | python | `math.py` | `test_math.py` |
//! | javascript | `user.js` | `user.test.js` |
//! | typescript | `user.ts` | `user.test.ts` |
//! | java | `Cart.java` | `CartTest.java` |
//!
//! Only a flat `test_dir` inside the repository is consulted. When no change
//! maps to a test that exists on disk, every file in `test_dir` matching any
//! convention is returned instead.

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};

use crate::fetcher::changed_files;
use crate::models::Language;

const SOURCE_EXTENSIONS: [&str; 4] = [".py", ".js", ".ts", ".java"];
const TEST_NAME_PATTERNS: [&str; 4] = ["test_*", "*.test.js", "*.test.ts", "*Test.java"];

pub struct TestOptimizer {
    repo_path: PathBuf,
    language: String,
}

impl TestOptimizer {
    pub fn new(repo_path: impl Into<PathBuf>, language: impl Into<String>) -> Self {
        Self {
            repo_path: repo_path.into(),
            language: language.into().to_ascii_lowercase(),
        }
    }

    /// Tests relevant to the last commit's changes, relative to the repo.
    pub fn relevant_tests(&self, test_dir: &str) -> Result<Vec<String>> {
        tracing::info!(repo = %self.repo_path.display(), "analyzing changed files");
        let changed = changed_files(&self.repo_path);
        self.relevant_tests_for(&changed, test_dir)
    }

    /// Like [`relevant_tests`](Self::relevant_tests) with an explicit change set.
    pub fn relevant_tests_for(&self, changed: &[String], test_dir: &str) -> Result<Vec<String>> {
        if changed.is_empty() {
            tracing::warn!("no changed files found, selecting all available tests");
            return self.collect_all_tests(test_dir);
        }

        let relevant: Vec<String> = changed
            .iter()
            .filter(|f| is_source_file(f))
            .filter_map(|f| self.map_source_to_test(f, test_dir))
            .collect();

        if relevant.is_empty() {
            return self.collect_all_tests(test_dir);
        }
        tracing::info!(?relevant, "optimized test selection");
        Ok(relevant)
    }

    /// Conventional test path for a source file, if such a test exists.
    fn map_source_to_test(&self, source: &str, test_dir: &str) -> Option<String> {
        let language: Language = self.language.parse().ok()?;
        let file_name = Path::new(source).file_name()?.to_string_lossy().to_string();
        let test_name = conventional_test_name(language, &file_name)?;

        let candidate = Path::new(test_dir).join(test_name);
        if self.repo_path.join(&candidate).is_file() {
            Some(candidate.to_string_lossy().to_string())
        } else {
            None
        }
    }

    fn collect_all_tests(&self, test_dir: &str) -> Result<Vec<String>> {
        let dir = self.repo_path.join(test_dir);
        if !dir.is_dir() {
            tracing::warn!(path = %dir.display(), "test directory not found");
            return Ok(Vec::new());
        }

        let conventions = test_name_globset()?;
        let mut tests = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if conventions.is_match(&name) {
                tests.push(Path::new(test_dir).join(&name).to_string_lossy().to_string());
            }
        }
        tests.sort();
        Ok(tests)
    }
}

/// Test file name for a source file name under the language's convention.
/// `None` when the file does not carry the language's extension.
pub fn conventional_test_name(language: Language, file_name: &str) -> Option<String> {
    match language {
        Language::Python => file_name
            .ends_with(".py")
            .then(|| format!("test_{}", file_name)),
        Language::JavaScript => file_name
            .strip_suffix(".js")
            .map(|stem| format!("{}.test.js", stem)),
        Language::TypeScript => file_name
            .strip_suffix(".ts")
            .map(|stem| format!("{}.test.ts", stem)),
        Language::Java => file_name
            .strip_suffix(".java")
            .map(|stem| format!("{}Test.java", stem)),
    }
}

fn is_source_file(path: &str) -> bool {
    SOURCE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

fn test_name_globset() -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in TEST_NAME_PATTERNS {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn repo_with_tests(names: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let tests = dir.path().join("tests");
        fs::create_dir_all(&tests).unwrap();
        for n in names {
            fs::write(tests.join(n), "").unwrap();
        }
        dir
    }

    #[test]
    fn naming_conventions() {
        assert_eq!(
            conventional_test_name(Language::Python, "math.py").as_deref(),
            Some("test_math.py")
        );
        assert_eq!(
            conventional_test_name(Language::JavaScript, "user.js").as_deref(),
            Some("user.test.js")
        );
        assert_eq!(
            conventional_test_name(Language::TypeScript, "api.ts").as_deref(),
            Some("api.test.ts")
        );
        assert_eq!(
            conventional_test_name(Language::Java, "Cart.java").as_deref(),
            Some("CartTest.java")
        );
        assert_eq!(conventional_test_name(Language::Java, "README.md"), None);
    }

    #[test]
    fn maps_changed_sources_to_existing_tests() {
        let repo = repo_with_tests(&["test_math.py", "test_io.py"]);
        let opt = TestOptimizer::new(repo.path(), "python");

        let changed = vec!["src/utils/math.py".to_string(), "README.md".to_string()];
        let selected = opt.relevant_tests_for(&changed, "tests").unwrap();
        assert_eq!(selected, vec!["tests/test_math.py".to_string()]);
    }

    #[test]
    fn falls_back_to_all_conventional_tests() {
        let repo = repo_with_tests(&["test_a.py", "widget.test.js", "CartTest.java", "notes.txt"]);
        let opt = TestOptimizer::new(repo.path(), "python");

        let changed = vec!["src/unmapped.py".to_string()];
        let selected = opt.relevant_tests_for(&changed, "tests").unwrap();
        assert_eq!(
            selected,
            vec![
                "tests/CartTest.java".to_string(),
                "tests/test_a.py".to_string(),
                "tests/widget.test.js".to_string(),
            ]
        );
    }

    #[test]
    fn unsupported_language_maps_nothing() {
        let repo = repo_with_tests(&["test_a.py"]);
        let opt = TestOptimizer::new(repo.path(), "rust");

        let changed = vec!["src/a.py".to_string()];
        assert_eq!(
            opt.relevant_tests_for(&changed, "tests").unwrap(),
            vec!["tests/test_a.py".to_string()]
        );
    }

    #[test]
    fn missing_test_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let opt = TestOptimizer::new(dir.path(), "java");
        assert!(opt.relevant_tests_for(&[], "tests").unwrap().is_empty());
    }
}
