//! # Trinity Assurance
//!
//! LLM-driven unit test generation for source repositories.
//!
//! A generation run fetches a repository, selects source files for one
//! language, asks a chat-completions model for a test per file, cleans the
//! reply into runnable code, and writes it under `<tests_dir>/<repo>/`
//! together with a zip bundle and an append-only history log. Generated tests
//! can then be executed per language, and a change-based optimizer picks the
//! tests affected by the last commit.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌───────────────┐   ┌──────────────┐
//! │ Fetcher  │──▶│ Scanner  │──▶│ Prompt + LLM  │──▶│  Sanitizer   │
//! │  (git)   │   │          │   │ (concurrent)  │   │              │
//! └──────────┘   └──────────┘   └───────────────┘   └──────┬───────┘
//!                                                          │ per-repo lock
//!                                  ┌───────────────────────┼────────────┐
//!                                  ▼                       ▼            ▼
//!                            ┌──────────┐           ┌──────────┐  ┌──────────┐
//!                            │ test file│           │ history  │  │  bundle  │
//!                            └──────────┘           └──────────┘  └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`fetcher`] | Git clone/pull and change detection |
//! | [`scanner`] | Source file discovery |
//! | [`prompt`] | Prompt construction |
//! | [`llm`] | Chat-completions client |
//! | [`sanitize`] | Model output cleanup and test naming |
//! | [`generator`] | The generation pipeline |
//! | [`history`] | Per-repository history logs |
//! | [`bundle`] | Zip packaging of generated tests |
//! | [`runner`] | Per-language test execution |
//! | [`optimizer`] | Change-based test selection |
//! | [`license`] | License token issue and verification |
//! | [`server`] | HTTP API |

pub mod bundle;
pub mod config;
pub mod fetcher;
pub mod generator;
pub mod history;
pub mod license;
pub mod llm;
pub mod models;
pub mod optimizer;
pub mod prompt;
pub mod runner;
pub mod sanitize;
pub mod scanner;
pub mod server;
