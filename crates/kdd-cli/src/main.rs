//! KDD CLI - Index and query structured specification documents
//!
//! A thin shell over the engine crates: every subcommand builds the shared
//! context (config, artifact store, event bus, embedding provider) and calls
//! one engine entry point.
//!
//! # Usage
//!
//! ```bash
//! # Build or refresh the index (incremental by default)
//! kdd index .
//!
//! # Hybrid search
//! kdd search "indexación de documentos"
//!
//! # Inspect a node's neighborhood
//! kdd graph Entity:Pedido --depth 2
//! ```
//!
//! Exit codes: 0 ok, 1 recoverable (partial failure), 2 fatal, 3 user error.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

mod commands;

/// KDD - knowledge retrieval over spec documents
#[derive(Parser, Debug)]
#[command(name = "kdd")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Repository root containing the spec tree
    #[arg(long, short = 'C', global = true, default_value = ".")]
    repo: PathBuf,

    /// Artifact root override (default: .kdd-index under the repo)
    #[arg(long, global = true, env = "KDD_INDEX_ROOT")]
    index_root: Option<String>,

    /// Embedding provider override (none, openai, stub)
    #[arg(long, global = true, env = "KDD_EMBEDDING_PROVIDER")]
    embedding_provider: Option<String>,

    /// Enable verbose output
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Suppress non-essential output
    #[arg(long, short = 'q', global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build or refresh the index from the spec tree
    Index(commands::index::IndexArgs),

    /// Hybrid search over the index
    Search(commands::search::SearchArgs),

    /// Traverse a node's neighborhood
    Graph(commands::graph::GraphArgs),

    /// Show what depends on a node
    Impact(commands::impact::ImpactArgs),

    /// Coverage of a node against its kind's expected relationships
    Coverage(commands::coverage::CoverageArgs),

    /// List layer violations
    Violations(commands::violations::ViolationsArgs),

    /// List orphan edges
    Orphans(commands::orphans::OrphansArgs),

    /// Amplify hints into constraints + behavior context
    Context(commands::context::ContextArgs),

    /// Merge several indexes into one
    Merge(commands::merge::MergeArgs),

    /// Show index status
    Status(commands::status::StatusArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.quiet {
        Level::ERROR
    } else if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("warning: logging already initialized");
    }

    let global = commands::GlobalOptions {
        repo: cli.repo,
        index_root: cli.index_root,
        embedding_provider: cli.embedding_provider,
    };

    let result = match cli.command {
        Commands::Index(args) => commands::index::execute(args, &global),
        Commands::Search(args) => commands::search::execute(args, &global),
        Commands::Graph(args) => commands::graph::execute(args, &global),
        Commands::Impact(args) => commands::impact::execute(args, &global),
        Commands::Coverage(args) => commands::coverage::execute(args, &global),
        Commands::Violations(args) => commands::violations::execute(args, &global),
        Commands::Orphans(args) => commands::orphans::execute(args, &global),
        Commands::Context(args) => commands::context::execute(args, &global),
        Commands::Merge(args) => commands::merge::execute(args, &global),
        Commands::Status(args) => commands::status::execute(args, &global),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            commands::exit(commands::EXIT_FATAL)
        }
    }
}
