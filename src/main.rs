//! # Trinity CLI (`trinity`)
//!
//! Generate unit tests for a repository with an LLM, run them, and keep a
//! history of what was produced.
//!
//! ## Usage
//!
//! ```bash
//! trinity --config ./config/trinity.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `trinity generate <repo> --language <lang>` | Generate tests for a repository |
//! | `trinity run --language <lang>` | Run generated tests |
//! | `trinity history <repo>` | Print the generation history for a repository |
//! | `trinity optimize <path> --language <lang>` | List tests affected by the last commit |
//! | `trinity diff <path>` | Print the last commit's diff in a working copy |
//! | `trinity bundle <repo>` | Rebuild the zip bundle of a repository's tests |
//! | `trinity license issue <subject>` | Issue a license token |
//! | `trinity license verify <token>` | Check a license token |
//! | `trinity serve` | Start the HTTP API |
//! | `trinity completions <shell>` | Print shell completions |
//!
//! ## Examples
//!
//! ```bash
//! # Preview tests for one file without writing anything
//! trinity generate https://github.com/acme/shop.git --language python \
//!     --file src/cart.py --dry-run
//!
//! # Generate tests for every Java file under a folder
//! trinity generate https://github.com/acme/billing --language java --folder service
//!
//! # Run the Python tests written for one repository
//! trinity run --language python --repo shop
//! ```

use anyhow::{bail, Result};
use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use trinity_assurance::config::{self, Config};
use trinity_assurance::fetcher::{self, GitFetcher};
use trinity_assurance::generator::Generator;
use trinity_assurance::history::HistoryStore;
use trinity_assurance::models::{GenerationRequest, Language, Scope, TestType};
use trinity_assurance::optimizer::TestOptimizer;
use trinity_assurance::runner::TestRunner;
use trinity_assurance::{bundle, license, llm, server};

/// Trinity Assurance CLI: LLM-driven unit test generation.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/trinity.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "trinity",
    about = "Trinity Assurance: generate, run, and track LLM-written unit tests",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/trinity.toml`. Built-in defaults apply when the
    /// file does not exist.
    #[arg(long, global = true, default_value = "./config/trinity.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate tests for a repository.
    ///
    /// Clones (or updates) the repository, asks the model for a test per
    /// matching source file, and writes the results under
    /// `<tests_dir>/<repo>/`. The combined test code is printed to stdout.
    Generate {
        /// Repository URL or local name.
        repo: String,

        #[arg(long, value_enum)]
        language: Language,

        /// Generate for this single file only (relative to the repo root).
        #[arg(long)]
        file: Option<String>,

        /// Only include files whose directory path contains this string.
        #[arg(long)]
        folder: Option<String>,

        /// Print generated code without writing files or history.
        #[arg(long)]
        dry_run: bool,

        #[arg(long, value_enum, default_value = "auto")]
        test_type: TestType,
    },

    /// Run generated tests for a language.
    ///
    /// Without `--repo`, runs everything under the tests directory.
    Run {
        #[arg(long, value_enum)]
        language: Language,

        #[arg(long, value_enum, default_value = "auto")]
        test_type: TestType,

        /// Limit the run to one repository's test folder.
        #[arg(long)]
        repo: Option<String>,
    },

    /// Print generation history for a repository as JSON.
    History {
        repo: String,
    },

    /// List tests affected by the last commit of a working copy.
    Optimize {
        /// Path to the working copy.
        repo_path: PathBuf,

        #[arg(long, value_enum)]
        language: Language,

        /// Test directory, relative to the working copy.
        #[arg(long, default_value = "tests")]
        test_dir: String,
    },

    /// Print the diff of the last commit in a working copy.
    Diff {
        /// Path to the working copy.
        repo_path: PathBuf,

        /// Restrict the diff to one file.
        #[arg(long)]
        file: Option<String>,
    },

    /// Rebuild `<tests_dir>/<repo>/<repo>.zip` from the repository's test folder.
    Bundle {
        repo: String,
    },

    /// Issue and verify license tokens.
    License {
        #[command(subcommand)]
        action: LicenseAction,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,

    /// Print shell completions to stdout.
    Completions {
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum LicenseAction {
    /// Issue a token for a subject.
    Issue {
        subject: String,

        /// Validity in days. Defaults to `[license].default_days`.
        #[arg(long)]
        days: Option<i64>,
    },
    /// Check whether a token is valid and unexpired.
    Verify {
        token: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "trinity", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Generate {
            repo,
            language,
            file,
            folder,
            dry_run,
            test_type,
        } => {
            run_generate(&cfg, repo, language, file, folder, dry_run, test_type).await?;
        }
        Commands::Run {
            language,
            test_type,
            repo,
        } => {
            let runner = TestRunner::new(&cfg);
            let report = tokio::task::spawn_blocking(move || {
                runner.run(language.as_str(), test_type, repo.as_deref())
            })
            .await?;
            print!("{}", report.stdout);
            if !report.succeeded() {
                eprint!("{}", report.stderr);
                bail!("test run reported errors");
            }
        }
        Commands::History { repo } => {
            let store = HistoryStore::new(cfg.history_dir());
            if !store.exists(&repo) {
                bail!("No history found for repo '{}'.", repo);
            }
            println!("{}", serde_json::to_string_pretty(&store.fetch(&repo))?);
        }
        Commands::Optimize {
            repo_path,
            language,
            test_dir,
        } => {
            if !repo_path.is_dir() {
                bail!("working copy not found: {}", repo_path.display());
            }
            let tests = TestOptimizer::new(repo_path, language.as_str()).relevant_tests(&test_dir)?;
            for t in tests {
                println!("{}", t);
            }
        }
        Commands::Diff { repo_path, file } => {
            print!("{}", fetcher::repo_diff(&repo_path, file.as_deref())?);
        }
        Commands::Bundle { repo } => {
            let path = bundle::package_repo_folder(&cfg.paths.tests_dir, &repo)?;
            println!("{}", path.display());
        }
        Commands::License { action } => match action {
            LicenseAction::Issue { subject, days } => {
                let days = days.unwrap_or(cfg.license.default_days);
                println!("{}", license::issue(&cfg.license.secret(), &subject, days)?);
            }
            LicenseAction::Verify { token } => {
                if !license::is_valid(&cfg.license.secret(), &token) {
                    bail!("Invalid or expired license token");
                }
                println!("License valid");
            }
        },
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Completions { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}

async fn run_generate(
    cfg: &Config,
    repo: String,
    language: Language,
    file: Option<String>,
    folder: Option<String>,
    dry_run: bool,
    test_type: TestType,
) -> Result<()> {
    let model = llm::create_model(&cfg.llm)?;
    let fetcher = Arc::new(GitFetcher::new(cfg.paths.repos_dir.clone()));
    let generator = Generator::new(cfg, fetcher, model);

    let request = GenerationRequest::new(repo, language.as_str())
        .with_scope(Scope::from_parts(file.as_deref(), folder.as_deref()))
        .dry_run(dry_run)
        .test_type(test_type);

    let report = generator.generate(&request).await?;
    println!("{}", report.combined_output);

    eprintln!(
        "run {}: {} generated, {} written, {} failed, {} model calls",
        report.run_id,
        report.generated.len(),
        report.written.len(),
        report.failed.len(),
        report.model_calls
    );
    if let Some(bundle) = &report.bundle {
        eprintln!("bundle: {}", bundle.display());
    }
    Ok(())
}
