//! # Lesson Harness CLI (`lesson`)
//!
//! The `lesson` binary manages the per-subject curriculum indices used to
//! ground lesson generation, and serves retrieval over HTTP.
//!
//! ## Usage
//!
//! ```bash
//! lesson --config ./config/lesson.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lesson subjects` | List discovered subjects and their tracked files |
//! | `lesson status` | Show whether each subject's cached index is fresh |
//! | `lesson build [SUBJECT]` | Load or rebuild indices (all subjects by default) |
//! | `lesson search SUBJECT "<query>"` | Retrieve ranked chunks |
//! | `lesson context SUBJECT "<topic>" --level L` | Retrieve lesson context passages |
//! | `lesson purge SUBJECT` | Delete a subject's cached index |
//! | `lesson serve` | Start the HTTP retrieval server |
//!
//! ## Examples
//!
//! ```bash
//! # Warm every subject, rebuilding only what changed
//! lesson build --config ./config/lesson.toml
//!
//! # Re-embed Mathematics after switching embedding models
//! lesson build Mathematics --force
//!
//! # Context for a lesson
//! lesson context Mathematics "Quadratic equations" --level "SSS 2"
//! ```
//!
//! Logs go to stderr and are filtered with `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use lesson_harness::cache::CacheManager;
use lesson_harness::config::{self, Config};
use lesson_harness::embedding::{create_embedder, DisabledEmbedder};
use lesson_harness::{build_cmd, search, server, status};

/// Lesson Harness CLI: per-subject curriculum index cache and retrieval.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/lesson.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "lesson",
    about = "Lesson Harness: per-subject curriculum index cache and retrieval for lesson generation",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/lesson.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List discovered subjects with their tracked file counts.
    Subjects,

    /// Show, per subject, whether the cached index matches the sources.
    ///
    /// Reads manifests only; no vectors are loaded and nothing is rebuilt.
    Status,

    /// Load or rebuild subject indices.
    ///
    /// Without a subject every discovered subject is processed. Subjects
    /// whose sources are unchanged are only loaded.
    Build {
        /// Subject to build (defaults to all).
        subject: Option<String>,

        /// Rebuild even if the cached index is fresh.
        #[arg(long)]
        force: bool,
    },

    /// Retrieve the chunks of a subject closest to a query.
    Search {
        subject: String,
        query: String,

        /// Number of results (defaults to `[retrieval].top_k`).
        #[arg(long)]
        k: Option<usize>,
    },

    /// Retrieve lesson context passages for a topic.
    Context {
        subject: String,
        topic: String,

        /// Class or level, e.g. "SSS 2".
        #[arg(long)]
        level: String,

        /// Number of passages (defaults to `[retrieval].top_k`).
        #[arg(long)]
        k: Option<usize>,
    },

    /// Delete a subject's cached index; the next request rebuilds it.
    Purge { subject: String },

    /// Start the HTTP retrieval server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Subjects => status::print_subjects(&cfg)?,
        Commands::Status => status::print_status(&cfg)?,
        Commands::Build { subject, force } => {
            let manager = manager(&cfg)?;
            build_cmd::run_build(&cfg, &manager, subject.as_deref(), force).await?;
        }
        Commands::Search { subject, query, k } => {
            let manager = manager(&cfg)?;
            let k = k.unwrap_or(cfg.retrieval.top_k);
            search::run_search(&manager, &subject, &query, k).await?;
        }
        Commands::Context {
            subject,
            topic,
            level,
            k,
        } => {
            let manager = manager(&cfg)?;
            let k = k.unwrap_or(cfg.retrieval.top_k);
            search::run_context(&manager, &subject, &topic, &level, k).await?;
        }
        Commands::Purge { subject } => {
            let manager = CacheManager::from_config(&cfg, Arc::new(DisabledEmbedder))?;
            build_cmd::run_purge(&manager, &subject).await?;
        }
        Commands::Serve => {
            let manager = manager(&cfg)?;
            server::run_server(&cfg, manager).await?;
        }
    }

    Ok(())
}

fn manager(cfg: &Config) -> anyhow::Result<CacheManager> {
    let embedder = create_embedder(&cfg.embedding)?;
    CacheManager::from_config(cfg, embedder)
}
