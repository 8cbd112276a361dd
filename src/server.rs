//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Welcome message |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/tests/generate` | Generate tests for a repository (license required) |
//! | `POST` | `/tests/run` | Run tests for a language |
//! | `POST` | `/tests/optimize` | Select tests affected by the last commit |
//! | `GET`  | `/history/{repo}` | Generation history for a repository |
//! | `GET`  | `/download/{repo}` | Zip of the repository's generated tests |
//! | `POST` | `/license/verify` | Check a license token |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "unauthorized", "message": "Invalid or expired license token." } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `not_found` (404),
//! `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser front end
//! can be served from anywhere.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::bundle;
use crate::config::Config;
use crate::fetcher::{repo_dir_name, GitFetcher};
use crate::generator::Generator;
use crate::license;
use crate::llm::create_model;
use crate::models::{GenerationRequest, HistoryRecord, Language, Scope, TestType};
use crate::optimizer::TestOptimizer;
use crate::runner::TestRunner;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    generator: Arc<Generator>,
    runner: Arc<TestRunner>,
}

impl AppState {
    pub fn new(config: Config, generator: Generator) -> Self {
        let runner = TestRunner::new(&config);
        Self {
            config: Arc::new(config),
            generator: Arc::new(generator),
            runner: Arc::new(runner),
        }
    }
}

/// Start the HTTP server on `[server].bind`.
///
/// Fails up front if the model API key is not configured.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let model = create_model(&config.llm)?;
    let fetcher = Arc::new(GitFetcher::new(config.paths.repos_dir.clone()));
    let generator = Generator::new(config, fetcher, model);
    let state = AppState::new(config.clone(), generator);

    let bind_addr = config.server.bind.clone();
    tracing::info!("listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Build the router. Exposed so embedders and tests can serve it on their
/// own listener.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/tests/generate", post(handle_generate))
        .route("/tests/run", post(handle_run))
        .route("/tests/optimize", post(handle_optimize))
        .route("/history/{repo}", get(handle_history))
        .route("/download/{repo}", get(handle_download))
        .route("/license/verify", post(handle_license_verify))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn unauthorized(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        code: "unauthorized",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

/// Path-like request fields may only use `[A-Za-z0-9_\-/.]`.
fn validate_path_field(name: &str, value: &Option<String>) -> Result<(), AppError> {
    match value {
        Some(v) if !v.chars().all(|c| c.is_ascii_alphanumeric() || "_-/.".contains(c)) => {
            Err(bad_request(format!("{} contains invalid characters", name)))
        }
        _ => Ok(()),
    }
}

/// Repository names in URL paths must be a single safe segment.
fn validate_repo_segment(repo: &str) -> Result<(), AppError> {
    let ok = !repo.is_empty()
        && repo != "."
        && repo != ".."
        && repo
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-.".contains(c));
    if ok {
        Ok(())
    } else {
        Err(bad_request(format!("invalid repository name: {}", repo)))
    }
}

fn parse_language(value: &str) -> Result<Language, AppError> {
    value.parse().map_err(|e: anyhow::Error| bad_request(e.to_string()))
}

fn license_ok(state: &AppState, token: &str) -> bool {
    license::is_valid(&state.config.license.secret(), token)
}

// ============ GET / and /health ============

async fn handle_root() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": "Welcome to Trinity Assurance" }))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /tests/generate ============

#[derive(Deserialize)]
struct GenerateBody {
    repo_url: String,
    language: String,
    #[serde(default)]
    file_path: Option<String>,
    #[serde(default)]
    folder_filter: Option<String>,
    #[serde(default)]
    dry_run: bool,
    #[serde(default)]
    test_type: TestType,
    license_token: String,
}

#[derive(Serialize)]
struct GenerateResponse {
    status: &'static str,
    generated_test_code: String,
    files_written: usize,
    files_failed: usize,
}

async fn handle_generate(
    State(state): State<AppState>,
    Json(body): Json<GenerateBody>,
) -> Result<Json<GenerateResponse>, AppError> {
    if !license_ok(&state, &body.license_token) {
        return Err(unauthorized("Invalid or expired license token."));
    }

    let language = parse_language(&body.language)?;
    if !(body.repo_url.starts_with("https://") || body.repo_url.starts_with("http://")) {
        return Err(bad_request("repo_url must be an http(s) URL"));
    }
    validate_path_field("file_path", &body.file_path)?;
    validate_path_field("folder_filter", &body.folder_filter)?;

    let request = GenerationRequest::new(body.repo_url, language.as_str())
        .with_scope(Scope::from_parts(
            body.file_path.as_deref(),
            body.folder_filter.as_deref(),
        ))
        .dry_run(body.dry_run)
        .test_type(body.test_type);

    let report = state.generator.generate(&request).await.map_err(|e| {
        tracing::error!("test generation failed: {:#}", e);
        internal(format!("Test generation failed: {:#}", e))
    })?;

    Ok(Json(GenerateResponse {
        status: "success",
        generated_test_code: report.combined_output,
        files_written: report.written.len(),
        files_failed: report.failed.len(),
    }))
}

// ============ POST /tests/run ============

#[derive(Deserialize)]
struct RunBody {
    language: String,
    #[serde(default)]
    test_type: TestType,
    #[serde(default)]
    repo: Option<String>,
}

#[derive(Serialize)]
struct RunResponse {
    status: &'static str,
    output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn handle_run(
    State(state): State<AppState>,
    Json(body): Json<RunBody>,
) -> Result<Json<RunResponse>, AppError> {
    let language = parse_language(&body.language)?;
    if let Some(repo) = &body.repo {
        validate_repo_segment(repo)?;
    }

    let runner = state.runner.clone();
    let report = tokio::task::spawn_blocking(move || {
        runner.run(language.as_str(), body.test_type, body.repo.as_deref())
    })
    .await
    .map_err(|e| internal(format!("Test run failed: {}", e)))?;

    Ok(Json(RunResponse {
        status: report.status(),
        error: (!report.succeeded()).then(|| report.stderr.clone()),
        output: report.stdout,
    }))
}

// ============ POST /tests/optimize ============

#[derive(Deserialize)]
struct OptimizeBody {
    /// Repository URL or working copy name.
    repo: String,
    language: String,
    #[serde(default = "default_test_dir")]
    test_dir: String,
}

fn default_test_dir() -> String {
    "tests".to_string()
}

#[derive(Serialize)]
struct OptimizeResponse {
    repo: String,
    tests: Vec<String>,
}

async fn handle_optimize(
    State(state): State<AppState>,
    Json(body): Json<OptimizeBody>,
) -> Result<Json<OptimizeResponse>, AppError> {
    parse_language(&body.language)?;
    validate_path_field("test_dir", &Some(body.test_dir.clone()))?;
    if body.test_dir.split('/').any(|seg| seg == "..") {
        return Err(bad_request("test_dir must stay inside the repository"));
    }
    let name = repo_dir_name(&body.repo).map_err(|e| bad_request(e.to_string()))?;
    let repo_path = state.config.paths.repos_dir.join(&name);
    if !repo_path.is_dir() {
        return Err(not_found(format!("No working copy for repo '{}'", name)));
    }

    let test_dir = body.test_dir;
    let language = body.language;
    let tests = tokio::task::spawn_blocking(move || {
        TestOptimizer::new(repo_path, language).relevant_tests(&test_dir)
    })
    .await
    .map_err(|e| internal(e.to_string()))?
    .map_err(|e| internal(format!("Test selection failed: {:#}", e)))?;

    Ok(Json(OptimizeResponse { repo: name, tests }))
}

// ============ GET /history/{repo} ============

#[derive(Serialize)]
struct HistoryResponse {
    repo: String,
    history: Vec<HistoryRecord>,
}

async fn handle_history(
    State(state): State<AppState>,
    Path(repo): Path<String>,
) -> Result<Json<HistoryResponse>, AppError> {
    let store = state.generator.history();
    if !store.exists(&repo) {
        tracing::warn!(repo = %repo, "no history found");
        return Err(not_found(format!("No history found for repo '{}'.", repo)));
    }
    let history = store.fetch(&repo);
    Ok(Json(HistoryResponse { repo, history }))
}

// ============ GET /download/{repo} ============

async fn handle_download(
    State(state): State<AppState>,
    Path(repo): Path<String>,
) -> Result<Response, AppError> {
    validate_repo_segment(&repo)?;
    let tests_dir = state.generator.tests_dir().to_path_buf();
    if !tests_dir.join(&repo).is_dir() {
        return Err(not_found("Test folder not found"));
    }

    let repo_name = repo.clone();
    let bytes = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<u8>> {
        let path = bundle::package_repo_folder(&tests_dir, &repo_name)?;
        Ok(std::fs::read(path)?)
    })
    .await
    .map_err(|e| internal(e.to_string()))?
    .map_err(|e| {
        let msg = format!("{:#}", e);
        if msg.contains("No test files") {
            not_found(msg)
        } else {
            tracing::error!("failed to zip tests: {}", msg);
            internal(format!("Failed to zip tests: {}", msg))
        }
    })?;

    tracing::info!(repo = %repo, "sending bundle");
    let disposition = format!("attachment; filename=\"{}_tests.zip\"", repo);
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

// ============ POST /license/verify ============

#[derive(Deserialize)]
struct LicenseBody {
    license_token: String,
}

async fn handle_license_verify(
    State(state): State<AppState>,
    Json(body): Json<LicenseBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    if !license_ok(&state, &body.license_token) {
        return Err(unauthorized("Invalid or expired license token"));
    }
    Ok(Json(serde_json::json!({ "status": "License valid" })))
}
