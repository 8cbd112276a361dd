use anyhow::{bail, Result};
use async_trait::async_trait;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use trinity_assurance::config::Config;
use trinity_assurance::fetcher::RepositoryFetcher;
use trinity_assurance::generator::{Generator, NOTHING_GENERATED, NO_FILES_FOUND};
use trinity_assurance::llm::{CompletionModel, CompletionRequest};
use trinity_assurance::models::{GenerationRequest, Scope, SourceFile};

/// Replies with a fenced test, fails on `FAIL_MARKER`, sleeps on `SLOW_MARKER`.
#[derive(Default)]
struct ScriptedModel {
    calls: AtomicUsize,
}

#[async_trait]
impl CompletionModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if request.prompt.contains("FAIL_MARKER") {
            bail!("model quota exceeded");
        }
        if request.prompt.contains("SLOW_MARKER") {
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
        Ok("Here you go:\n```python\ndef test_it():\n    assert True\n```\nEnjoy.".to_string())
    }
}

struct LocalFetcher(PathBuf);

impl RepositoryFetcher for LocalFetcher {
    fn fetch(&self, _locator: &str) -> Result<PathBuf> {
        Ok(self.0.clone())
    }
}

struct Fixture {
    _tmp: TempDir,
    repo: PathBuf,
    tests_dir: PathBuf,
    model: Arc<ScriptedModel>,
    generator: Generator,
}

fn fixture(repo_name: &str, files: &[(&str, &str)], concurrency: usize) -> Fixture {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path().join("repos").join(repo_name);
    fs::create_dir_all(&repo).unwrap();
    for (rel, body) in files {
        let path = repo.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    let tests_dir = tmp.path().join("tests");
    let mut config = Config::minimal();
    config.paths.tests_dir = tests_dir.clone();
    config.paths.repos_dir = tmp.path().join("repos");
    config.generation.concurrency = concurrency;

    let model = Arc::new(ScriptedModel::default());
    let generator = Generator::new(&config, Arc::new(LocalFetcher(repo.clone())), model.clone());
    Fixture {
        _tmp: tmp,
        repo,
        tests_dir,
        model,
        generator,
    }
}

fn source(repo: &Path, rel: &str) -> SourceFile {
    SourceFile {
        path: repo.join(rel),
        relative: PathBuf::from(rel),
        language: "python".to_string(),
    }
}

fn history_files(fx: &Fixture, repo: &str) -> Vec<String> {
    fx.generator
        .history()
        .fetch(repo)
        .into_iter()
        .map(|r| r.file)
        .collect()
}

#[tokio::test]
async fn empty_repository_returns_sentinel_without_model_calls() {
    let fx = fixture("empty", &[("README.md", "# nothing")], 1);
    let request = GenerationRequest::new("https://example.com/empty.git", "python");

    let report = fx.generator.generate(&request).await.unwrap();

    assert_eq!(report.combined_output, NO_FILES_FOUND);
    assert_eq!(report.model_calls, 0);
    assert_eq!(fx.model.calls.load(Ordering::SeqCst), 0);
    assert!(!fx.tests_dir.join("empty").exists());
}

#[tokio::test]
async fn generate_writes_tests_history_and_bundle() {
    let fx = fixture(
        "demo",
        &[("a.py", "def a(): pass"), ("b.py", "def b(): pass")],
        1,
    );
    let request = GenerationRequest::new("https://example.com/demo.git", "python");

    let report = fx.generator.generate(&request).await.unwrap();

    assert!(!report.run_id.is_empty());
    assert_eq!(report.repo_name, "demo");
    assert_eq!(report.written.len(), 2);
    assert!(report.failed.is_empty());

    let test_a = fs::read_to_string(fx.tests_dir.join("demo/test_a.py")).unwrap();
    assert!(test_a.starts_with("from a import *\n\n"));
    assert!(test_a.contains("def test_it():"));
    assert!(!test_a.contains("```"));

    let mut recorded = history_files(&fx, "demo");
    recorded.sort();
    assert_eq!(recorded, vec!["a.py".to_string(), "b.py".to_string()]);
    let records = fx.generator.history().fetch("demo");
    assert!(records
        .iter()
        .all(|r| r.run_id.as_deref() == Some(report.run_id.as_str())));

    let bundle = report.bundle.clone().unwrap();
    assert_eq!(bundle, fx.tests_dir.join("demo").join("demo.zip"));
    let mut archive = zip::ZipArchive::new(fs::File::open(&bundle).unwrap()).unwrap();
    let mut names: Vec<String> = archive.file_names().map(String::from).collect();
    names.sort();
    assert_eq!(names, vec!["test_a.py".to_string(), "test_b.py".to_string()]);

    let mut contents = String::new();
    archive
        .by_name("test_a.py")
        .unwrap()
        .read_to_string(&mut contents)
        .unwrap();
    assert_eq!(contents, test_a);
}

#[tokio::test]
async fn dry_run_writes_nothing() {
    let fx = fixture("preview", &[("a.py", "def a(): pass")], 1);
    let request = GenerationRequest::new("https://example.com/preview.git", "python").dry_run(true);

    let report = fx.generator.generate(&request).await.unwrap();

    assert!(report.combined_output.contains("==== test_a.py ===="));
    assert!(report.combined_output.contains("def test_it():"));
    assert_eq!(report.generated.len(), 1);
    assert!(report.written.is_empty());
    assert!(report.bundle.is_none());
    assert!(!fx.tests_dir.join("preview").exists());
    assert!(!fx.generator.history().exists("preview"));
}

#[tokio::test]
async fn unreadable_file_is_skipped_and_others_recorded() {
    let fx = fixture(
        "partial",
        &[("one.py", "def one(): pass"), ("three.py", "def three(): pass")],
        1,
    );
    let files = vec![
        source(&fx.repo, "one.py"),
        source(&fx.repo, "two.py"),
        source(&fx.repo, "three.py"),
    ];
    let request = GenerationRequest::new("partial", "python");

    let report = fx
        .generator
        .generate_files(&fx.repo, files, &request, "run-1")
        .await;

    assert_eq!(report.failed, vec![fx.repo.join("two.py")]);
    assert_eq!(report.model_calls, 2);
    assert_eq!(
        history_files(&fx, "partial"),
        vec!["one.py".to_string(), "three.py".to_string()]
    );
    assert!(!fx.tests_dir.join("partial/test_two.py").exists());
}

#[tokio::test]
async fn model_failure_is_isolated_to_its_file() {
    let fx = fixture(
        "flaky",
        &[
            ("a.py", "def a(): pass"),
            ("b.py", "# FAIL_MARKER\ndef b(): pass"),
            ("c.py", "def c(): pass"),
        ],
        1,
    );
    let files = vec![
        source(&fx.repo, "a.py"),
        source(&fx.repo, "b.py"),
        source(&fx.repo, "c.py"),
    ];
    let request = GenerationRequest::new("flaky", "python");

    let report = fx
        .generator
        .generate_files(&fx.repo, files, &request, "run-2")
        .await;

    assert_eq!(report.model_calls, 3);
    assert_eq!(report.failed, vec![fx.repo.join("b.py")]);
    assert_eq!(
        history_files(&fx, "flaky"),
        vec!["a.py".to_string(), "c.py".to_string()]
    );
    assert!(!report.combined_output.contains("test_b.py"));
}

#[tokio::test]
async fn all_failures_yield_nothing_generated() {
    let fx = fixture("broken", &[("a.py", "# FAIL_MARKER")], 1);
    let request = GenerationRequest::new("https://example.com/broken.git", "python");

    let report = fx.generator.generate(&request).await.unwrap();

    assert_eq!(report.combined_output, NOTHING_GENERATED);
    assert_eq!(report.failed.len(), 1);
    assert!(!fx.generator.history().exists("broken"));
}

#[tokio::test]
async fn concurrent_generation_keeps_input_order() {
    let fx = fixture(
        "ordered",
        &[("a.py", "# SLOW_MARKER\ndef a(): pass"), ("b.py", "def b(): pass")],
        4,
    );
    let files = vec![source(&fx.repo, "a.py"), source(&fx.repo, "b.py")];
    let request = GenerationRequest::new("ordered", "python");

    let report = fx
        .generator
        .generate_files(&fx.repo, files, &request, "run-3")
        .await;

    let a = report.combined_output.find("test_a.py").unwrap();
    let b = report.combined_output.find("test_b.py").unwrap();
    assert!(a < b);
    assert_eq!(
        history_files(&fx, "ordered"),
        vec!["a.py".to_string(), "b.py".to_string()]
    );
}

#[tokio::test]
async fn single_file_scope_generates_only_that_file() {
    let fx = fixture(
        "scoped",
        &[("pkg/util.py", "def u(): pass"), ("other.py", "def o(): pass")],
        1,
    );
    let request = GenerationRequest::new("https://example.com/scoped.git", "python")
        .with_scope(Scope::File(PathBuf::from("pkg/util.py")));

    let report = fx.generator.generate(&request).await.unwrap();

    assert_eq!(report.model_calls, 1);
    let written = fs::read_to_string(fx.tests_dir.join("scoped/test_pkg_util.py")).unwrap();
    assert!(written.starts_with("from pkg.util import *"));
    assert_eq!(history_files(&fx, "scoped"), vec!["pkg/util.py".to_string()]);
}

#[tokio::test]
async fn colliding_test_names_get_distinct_files() {
    let fx = fixture(
        "clash",
        &[("pkg/mod.py", "def nested(): pass"), ("pkg_mod.py", "def flat(): pass")],
        1,
    );
    let files = vec![source(&fx.repo, "pkg/mod.py"), source(&fx.repo, "pkg_mod.py")];
    let request = GenerationRequest::new("clash", "python");

    let report = fx
        .generator
        .generate_files(&fx.repo, files, &request, "run-4")
        .await;

    let folder = fx.tests_dir.join("clash");
    assert_eq!(
        report.written,
        vec![folder.join("test_pkg_mod.py"), folder.join("test_pkg_mod_2.py")]
    );
    let first = fs::read_to_string(folder.join("test_pkg_mod.py")).unwrap();
    let second = fs::read_to_string(folder.join("test_pkg_mod_2.py")).unwrap();
    assert!(first.starts_with("from pkg.mod import *"));
    assert!(second.starts_with("from pkg_mod import *"));

    let records = fx.generator.history().fetch("clash");
    let mut outputs: Vec<&str> = records.iter().map(|r| r.output_path.as_str()).collect();
    outputs.dedup();
    assert_eq!(outputs.len(), 2);

    let bundle = report.bundle.clone().unwrap();
    let archive = zip::ZipArchive::new(fs::File::open(bundle).unwrap()).unwrap();
    let mut names: Vec<&str> = archive.file_names().collect();
    names.sort();
    assert_eq!(names, vec!["test_pkg_mod.py", "test_pkg_mod_2.py"]);
}

#[tokio::test]
async fn history_failure_removes_written_test() {
    let fx = fixture("unpaired", &[("a.py", "def a(): pass")], 1);
    // A plain file where the history directory belongs makes every append fail.
    fs::create_dir_all(&fx.tests_dir).unwrap();
    fs::write(fx.tests_dir.join(".history"), "not a directory").unwrap();

    let files = vec![source(&fx.repo, "a.py")];
    let request = GenerationRequest::new("unpaired", "python");
    let report = fx
        .generator
        .generate_files(&fx.repo, files, &request, "run-5")
        .await;

    assert_eq!(report.failed, vec![fx.repo.join("a.py")]);
    assert!(report.written.is_empty());
    assert!(report.bundle.is_none());
    assert!(!fx.tests_dir.join("unpaired/test_a.py").exists());
    assert_eq!(report.combined_output, NOTHING_GENERATED);
}

#[tokio::test]
async fn write_failure_records_no_history() {
    let fx = fixture(
        "blocked",
        &[("a.py", "def a(): pass"), ("b.py", "def b(): pass")],
        1,
    );
    // A directory squatting on the output path makes the write fail.
    fs::create_dir_all(fx.tests_dir.join("blocked/test_a.py")).unwrap();

    let files = vec![source(&fx.repo, "a.py"), source(&fx.repo, "b.py")];
    let request = GenerationRequest::new("blocked", "python");
    let report = fx
        .generator
        .generate_files(&fx.repo, files, &request, "run-6")
        .await;

    assert_eq!(report.failed, vec![fx.repo.join("a.py")]);
    assert_eq!(report.written, vec![fx.tests_dir.join("blocked/test_b.py")]);
    assert_eq!(history_files(&fx, "blocked"), vec!["b.py".to_string()]);
}
