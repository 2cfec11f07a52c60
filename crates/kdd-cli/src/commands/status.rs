//! `kdd status` - index status summary.

use std::process::ExitCode;

use anyhow::Result;
use clap::Args;
use serde_json::json;

use super::{exit, print_json, CliContext, GlobalOptions, EXIT_OK};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit JSON
    #[arg(long)]
    pub json: bool,
}

pub fn execute(args: StatusArgs, global: &GlobalOptions) -> Result<ExitCode> {
    let ctx = CliContext::build(global)?;

    let Some(manifest) = ctx.store.read_manifest()? else {
        println!("no index at {}", ctx.store.root().display());
        return Ok(exit(EXIT_OK));
    };
    let stats = ctx.store.compute_stats()?;
    let orphan_tombstones = ctx.store.read_deletions()?.len();
    let locked = match ctx.store.lock_exclusive() {
        Ok(lock) => {
            drop(lock);
            false
        }
        Err(kdd_core::StoreError::Locked(_)) => true,
        Err(e) => return Err(e.into()),
    };

    if args.json {
        print_json(&json!({
            "root": ctx.store.root().display().to_string(),
            "manifest": manifest,
            "actual_stats": stats,
            "tombstones": orphan_tombstones,
            "locked": locked,
        }))?;
    } else {
        println!("index: {}", ctx.store.root().display());
        println!("  version:     {} (engine {})", manifest.version, manifest.kdd_version);
        println!("  level:       {}", manifest.index_level);
        println!("  structure:   {}", manifest.structure.as_str());
        if let Some(model) = &manifest.embedding_model {
            println!(
                "  embeddings:  {} ({} dims)",
                model,
                manifest.embedding_dimensions.unwrap_or(0)
            );
        }
        println!(
            "  stats:       {} nodes, {} edges, {} embeddings",
            manifest.stats.nodes, manifest.stats.edges, manifest.stats.embeddings
        );
        if manifest.stats != stats {
            println!(
                "  on disk:     {} nodes, {} edges, {} embeddings (manifest out of date)",
                stats.nodes, stats.edges, stats.embeddings
            );
        }
        if let Some(commit) = &manifest.git_commit {
            println!("  commit:      {commit}");
        }
        println!("  indexed at:  {} by {}", manifest.indexed_at, manifest.indexed_by);
        if orphan_tombstones > 0 {
            println!("  tombstones:  {orphan_tombstones}");
        }
        if locked {
            println!("  lock:        held by another process");
        }
    }
    Ok(exit(EXIT_OK))
}
