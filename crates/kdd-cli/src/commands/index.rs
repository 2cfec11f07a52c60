//! `kdd index` - build or refresh the index.

use std::process::ExitCode;

use anyhow::Result;
use clap::Args;

use kdd_core::{detect_index_level, Capabilities, GitCli, IncrementalDriver, UpdateOptions, VcsDiff};

use super::{exit, CliContext, GlobalOptions, EXIT_OK, EXIT_PARTIAL};

#[derive(Args, Debug)]
pub struct IndexArgs {
    /// Rebuild everything instead of walking the VCS diff
    #[arg(long)]
    pub full: bool,

    /// Reindex documents whose source hash is unchanged
    #[arg(long)]
    pub force: bool,

    /// Restrict indexing to one domain (multi-domain trees)
    #[arg(long)]
    pub domain: Option<String>,
}

pub fn execute(args: IndexArgs, global: &GlobalOptions) -> Result<ExitCode> {
    let ctx = CliContext::build(global)?;

    let spec_dir = match &args.domain {
        Some(domain) => format!("{}/domains/{}", ctx.config.index.spec_dir, domain),
        None => ctx.config.index.spec_dir.clone(),
    };
    let driver = IncrementalDriver::new(
        ctx.repo_root.clone(),
        &ctx.store,
        &ctx.bus,
        ctx.model.as_deref(),
    )
    .with_spec_dir(&spec_dir);

    // The in-process vector store is always available; the level hinges on
    // the embedder. Agent-assisted enrichment (L3) has no client here.
    let level = detect_index_level(Capabilities {
        embedder: ctx.model.is_some(),
        vector_index: true,
        agent_client: false,
    });
    let options = UpdateOptions {
        full: args.full,
        force: args.force,
        level,
    };

    let git = GitCli::new(&ctx.repo_root);
    let vcs: Option<&dyn VcsDiff> = if ctx.repo_root.join(".git").exists() {
        Some(&git)
    } else {
        None
    };

    let outcome = driver.update(vcs, &options)?;
    println!(
        "indexed {} ({} unchanged, {} deleted, {} skipped){}",
        outcome.indexed,
        outcome.unchanged,
        outcome.deleted,
        outcome.skipped,
        if outcome.full_scan { " [full scan]" } else { "" }
    );
    if outcome.degraded > 0 {
        println!("warning: {} document(s) degraded to L1", outcome.degraded);
    }
    for failure in &outcome.failures {
        eprintln!("failed: {}: {}", failure.path, failure.reason);
    }

    Ok(exit(if outcome.is_partial_failure() {
        EXIT_PARTIAL
    } else {
        EXIT_OK
    }))
}
