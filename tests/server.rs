use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

use trinity_assurance::config::Config;
use trinity_assurance::fetcher::RepositoryFetcher;
use trinity_assurance::generator::Generator;
use trinity_assurance::license;
use trinity_assurance::llm::{CompletionModel, CompletionRequest};
use trinity_assurance::server::{router, AppState};

const SECRET: &str = "server-secret";

struct CannedModel;

#[async_trait]
impl CompletionModel for CannedModel {
    fn name(&self) -> &str {
        "canned"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
        Ok("```python\ndef test_canned():\n    assert 1 + 1 == 2\n```".to_string())
    }
}

struct LocalFetcher(PathBuf);

impl RepositoryFetcher for LocalFetcher {
    fn fetch(&self, _locator: &str) -> Result<PathBuf> {
        Ok(self.0.clone())
    }
}

/// Serve the API on an ephemeral port; returns the base URL.
async fn start_server() -> (TempDir, String) {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path().join("repos/demo");
    fs::create_dir_all(&repo).unwrap();
    fs::write(repo.join("calc.py"), "def add(a, b):\n    return a + b\n").unwrap();

    let mut config = Config::minimal();
    config.paths.repos_dir = tmp.path().join("repos");
    config.paths.tests_dir = tmp.path().join("tests");
    config.license.secret_env = "TRINITY_SERVER_TEST_SECRET_UNSET".to_string();
    config.license.default_secret = SECRET.to_string();

    let generator = Generator::new(&config, Arc::new(LocalFetcher(repo)), Arc::new(CannedModel));
    let state = AppState::new(config, generator);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });

    (tmp, format!("http://{}", addr))
}

fn valid_token() -> String {
    license::issue(SECRET, "tester", 30).unwrap()
}

fn generate_body(token: &str) -> Value {
    json!({
        "repo_url": "https://github.com/acme/demo.git",
        "language": "python",
        "license_token": token,
    })
}

#[tokio::test]
async fn health_reports_ok() {
    let (_tmp, base) = start_server().await;
    let resp = reqwest::get(format!("{}/health", base)).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn license_verify_accepts_and_rejects() {
    let (_tmp, base) = start_server().await;
    let client = reqwest::Client::new();

    let ok = client
        .post(format!("{}/license/verify", base))
        .json(&json!({ "license_token": valid_token() }))
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status(), 200);
    let body: Value = ok.json().await.unwrap();
    assert_eq!(body["status"], "License valid");

    let bad = client
        .post(format!("{}/license/verify", base))
        .json(&json!({ "license_token": "tester:2099-01-01:deadbeef" }))
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), 401);
    let body: Value = bad.json().await.unwrap();
    assert_eq!(body["error"]["code"], "unauthorized");
}

#[tokio::test]
async fn generate_requires_valid_license() {
    let (tmp, base) = start_server().await;
    let resp = reqwest::Client::new()
        .post(format!("{}/tests/generate", base))
        .json(&generate_body("nobody:2099-01-01:00"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    assert!(!tmp.path().join("tests/demo").exists());
}

#[tokio::test]
async fn generate_rejects_bad_input() {
    let (_tmp, base) = start_server().await;
    let client = reqwest::Client::new();

    let mut body = generate_body(&valid_token());
    body["language"] = json!("cobol");
    let resp = client
        .post(format!("{}/tests/generate", base))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let mut body = generate_body(&valid_token());
    body["folder_filter"] = json!("src; rm -rf /");
    let resp = client
        .post(format!("{}/tests/generate", base))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["error"]["code"], "bad_request");
}

#[tokio::test]
async fn generate_then_history_and_download() {
    let (tmp, base) = start_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/tests/generate", base))
        .json(&generate_body(&valid_token()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "success");
    let code = body["generated_test_code"].as_str().unwrap();
    assert!(code.contains("==== test_calc.py ===="));
    assert!(code.contains("from calc import *"));
    assert!(tmp.path().join("tests/demo/test_calc.py").is_file());

    let resp = reqwest::get(format!("{}/history/demo", base)).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["repo"], "demo");
    assert_eq!(body["history"][0]["file"], "calc.py");

    let resp = reqwest::get(format!("{}/download/demo", base)).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "application/zip");
    assert!(resp.headers()["content-disposition"]
        .to_str()
        .unwrap()
        .contains("demo_tests.zip"));
    let bytes = resp.bytes().await.unwrap();
    let archive = zip::ZipArchive::new(std::io::Cursor::new(bytes.to_vec())).unwrap();
    assert_eq!(archive.file_names().collect::<Vec<_>>(), vec!["test_calc.py"]);
}

#[tokio::test]
async fn missing_history_and_bundle_are_not_found() {
    let (_tmp, base) = start_server().await;

    let resp = reqwest::get(format!("{}/history/ghost", base)).await.unwrap();
    assert_eq!(resp.status(), 404);

    let resp = reqwest::get(format!("{}/download/ghost", base)).await.unwrap();
    assert_eq!(resp.status(), 404);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["error"]["code"], "not_found");
}

#[tokio::test]
async fn run_rejects_unknown_language() {
    let (_tmp, base) = start_server().await;
    let resp = reqwest::Client::new()
        .post(format!("{}/tests/run", base))
        .json(&json!({ "language": "fortran" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}
