//! `kdd merge` - reconcile several indexes into one.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Result};
use clap::Args;

use kdd_core::{merge_indexes, ArtifactStore, MergeStrategy};

use super::{exit, CliContext, GlobalOptions, EXIT_FATAL, EXIT_OK, EXIT_USER};

#[derive(Args, Debug)]
pub struct MergeArgs {
    /// Source artifact roots (two or more)
    #[arg(required = true)]
    pub sources: Vec<PathBuf>,

    /// Output artifact root
    #[arg(short = 'o', long)]
    pub output: PathBuf,

    /// Conflict strategy: last-write-wins or fail-on-conflict
    #[arg(long, default_value = "last-write-wins")]
    pub strategy: String,
}

pub fn execute(args: MergeArgs, global: &GlobalOptions) -> Result<ExitCode> {
    let ctx = CliContext::build(global)?;

    let strategy = match args.strategy.as_str() {
        "last-write-wins" | "last_write_wins" => MergeStrategy::LastWriteWins,
        "fail-on-conflict" | "fail_on_conflict" => MergeStrategy::FailOnConflict,
        other => bail!("unknown merge strategy: {other}"),
    };
    if args.sources.len() < 2 {
        eprintln!("error: merge needs at least two sources");
        return Ok(exit(EXIT_USER));
    }

    let sources: Vec<ArtifactStore> = args.sources.iter().map(ArtifactStore::new).collect();
    let output = ArtifactStore::new(&args.output);

    match merge_indexes(&sources, &output, strategy, &ctx.bus) {
        Ok(outcome) => {
            println!(
                "merged {} node(s), {} edge(s), {} embedding(s); {} conflict(s) resolved, {} tombstoned",
                outcome.nodes,
                outcome.edges,
                outcome.embeddings,
                outcome.conflicts_resolved,
                outcome.tombstoned
            );
            Ok(exit(EXIT_OK))
        }
        Err(e) => {
            eprintln!("merge failed: {e}");
            Ok(exit(EXIT_FATAL))
        }
    }
}
