//! `kdd coverage` - expected-relationship coverage of a node.

use std::process::ExitCode;

use anyhow::Result;
use clap::Args;

use kdd_search::CoverageStatus;

use super::{exit, exit_code_for, print_json, CliContext, GlobalOptions, EXIT_OK};

#[derive(Args, Debug)]
pub struct CoverageArgs {
    /// Node id to check
    pub node: String,

    /// Emit JSON
    #[arg(long)]
    pub json: bool,
}

pub fn execute(args: CoverageArgs, global: &GlobalOptions) -> Result<ExitCode> {
    let ctx = CliContext::build(global)?;
    let engine = ctx.engine()?;

    let report = match engine.coverage(&args.node) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("error [{}]: {e}", e.code());
            return Ok(exit_code_for(&e));
        }
    };

    if args.json {
        print_json(&report)?;
    } else {
        println!("{} ({}): {:.2}%", report.node_id, report.kind, report.coverage_percent);
        for category in &report.categories {
            let marker = match category.status {
                CoverageStatus::Covered => "✓",
                CoverageStatus::Partial => "~",
                CoverageStatus::Missing => "✗",
            };
            if category.found.is_empty() {
                println!("  {marker} {}", category.name);
            } else {
                println!("  {marker} {}: {}", category.name, category.found.join(", "));
            }
        }
    }
    Ok(exit(EXIT_OK))
}
