//! # RAG Harness CLI (`rag`)
//!
//! Builds a vector index from local documents and answers questions over
//! it with a language model.
//!
//! ## Usage
//!
//! ```bash
//! rag --config ./config/rag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rag index <paths…>` | Load, chunk, embed and save a fresh index |
//! | `rag search "<query>"` | Print the nearest segments |
//! | `rag ask "<question>"` | Answer one question (streams by default) |
//! | `rag chat` | Interactive conversation with history |
//! | `rag info` | Describe the saved index |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG`
//! (default `rag_harness=info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use rag_harness::{commands, config};

/// RAG Harness CLI: retrieval-augmented question answering over local
/// PDF and text documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/rag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "rag",
    about = "RAG Harness: index documents and answer questions over them",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rag.toml")]
    config: PathBuf,

    /// Load an index built with a different embedding model or dimension.
    ///
    /// Distances between vectors from different models are meaningless;
    /// use only when the models are known to be compatible.
    #[arg(long, global = true)]
    allow_model_mismatch: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a fresh index from files and directories.
    ///
    /// Directories are walked recursively and filtered by the
    /// `[loader]` globs. The previous index at `[index].path` is replaced.
    Index {
        /// Files or directories to index.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Print the segments nearest to a query.
    Search {
        query: String,

        /// Number of results (defaults to `[retrieval].k`).
        #[arg(short, long)]
        k: Option<usize>,
    },

    /// Answer a single question.
    Ask {
        question: String,

        /// Print the answer only when it is complete.
        #[arg(long)]
        no_stream: bool,
    },

    /// Interactive chat. Type `exit` or send EOF to quit.
    Chat,

    /// Show the saved index's model, dimension, metric and size.
    Info,
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rag_harness=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;
    let allow = cli.allow_model_mismatch;

    match cli.command {
        Commands::Index { paths } => {
            commands::run_index(&cfg, &paths).await?;
        }
        Commands::Search { query, k } => {
            commands::run_search(&cfg, &query, k, allow).await?;
        }
        Commands::Ask {
            question,
            no_stream,
        } => {
            commands::run_ask(&cfg, &question, !no_stream, allow).await?;
        }
        Commands::Chat => {
            commands::run_chat(&cfg, allow).await?;
        }
        Commands::Info => {
            commands::run_info(&cfg).await?;
        }
    }

    Ok(())
}
