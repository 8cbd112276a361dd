//! TOML configuration.
//!
//! Every section is optional; a missing file resolves to [`Config::minimal`].
//! Secrets (model API key, license secret) are never stored in the file. The
//! file only names the environment variables that carry them, and `.env` is
//! loaded into the environment before the config is read.
//!
//! ```toml
//! [paths]
//! repos_dir = "./repos"
//! tests_dir = "./tests"
//!
//! [llm]
//! model = "llama3-8b-8192"
//! temperature = 0.2
//! max_tokens = 1000
//!
//! [server]
//! bind = "127.0.0.1:8000"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub license: LicenseConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    /// Where working copies are cloned.
    #[serde(default = "default_repos_dir")]
    pub repos_dir: PathBuf,
    /// Root of generated test output; holds one folder per repository and
    /// the `.history` directory.
    #[serde(default = "default_tests_dir")]
    pub tests_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            repos_dir: default_repos_dir(),
            tests_dir: default_tests_dir(),
        }
    }
}

fn default_repos_dir() -> PathBuf {
    PathBuf::from("./repos")
}
fn default_tests_dir() -> PathBuf {
    PathBuf::from("./tests")
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible chat completions API.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Environment variable holding the bearer token.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}
fn default_model() -> String {
    "llama3-8b-8192".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_api_key_env() -> String {
    "GROQ_API_KEY".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// Number of model calls allowed in flight at once. `1` keeps the
    /// pipeline strictly sequential.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Source text longer than this many bytes is truncated before it is
    /// embedded in the prompt. Unset means no cap.
    #[serde(default)]
    pub max_source_bytes: Option<usize>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_source_bytes: None,
        }
    }
}

fn default_concurrency() -> usize {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct LicenseConfig {
    #[serde(default = "default_secret_env")]
    pub secret_env: String,
    /// Used when `secret_env` is not set in the environment.
    #[serde(default = "default_secret")]
    pub default_secret: String,
    #[serde(default = "default_days")]
    pub default_days: i64,
}

impl Default for LicenseConfig {
    fn default() -> Self {
        Self {
            secret_env: default_secret_env(),
            default_secret: default_secret(),
            default_days: default_days(),
        }
    }
}

impl LicenseConfig {
    /// Resolve the shared secret from the environment, falling back to the
    /// configured default.
    pub fn secret(&self) -> String {
        std::env::var(&self.secret_env).unwrap_or_else(|_| self.default_secret.clone())
    }
}

fn default_secret_env() -> String {
    "LICENSE_SECRET".to_string()
}
fn default_secret() -> String {
    "trinity_default_salt".to_string()
}
fn default_days() -> i64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

impl Config {
    /// All-defaults configuration, used when no config file exists.
    pub fn minimal() -> Self {
        Self::default()
    }

    /// Directory holding one JSON history log per repository.
    pub fn history_dir(&self) -> PathBuf {
        self.paths.tests_dir.join(".history")
    }
}

/// Load configuration from `path`.
///
/// A missing file is not an error: defaults are returned. A file that exists
/// but fails to parse or validate is.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        return Ok(Config::minimal());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.llm.model.trim().is_empty() {
        anyhow::bail!("llm.model must not be empty");
    }
    if !(0.0..=2.0).contains(&config.llm.temperature) {
        anyhow::bail!("llm.temperature must be in [0.0, 2.0]");
    }
    if config.llm.max_tokens == 0 {
        anyhow::bail!("llm.max_tokens must be > 0");
    }
    if config.generation.concurrency == 0 {
        anyhow::bail!("generation.concurrency must be >= 1");
    }
    if config.license.default_days < 1 {
        anyhow::bail!("license.default_days must be >= 1");
    }
    Ok(())
}
