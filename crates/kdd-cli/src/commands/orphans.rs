//! `kdd orphans` - orphan edge report.

use std::process::ExitCode;

use anyhow::Result;
use clap::Args;

use super::{exit, exit_code_for, print_json, CliContext, GlobalOptions, EXIT_OK};

#[derive(Args, Debug)]
pub struct OrphansArgs {
    /// Restrict to these edge types (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub types: Vec<String>,

    /// Emit JSON
    #[arg(long)]
    pub json: bool,
}

pub fn execute(args: OrphansArgs, global: &GlobalOptions) -> Result<ExitCode> {
    let ctx = CliContext::build(global)?;
    let engine = ctx.engine()?;

    let types = (!args.types.is_empty()).then_some(args.types.as_slice());
    let report = match engine.orphans(types) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("error [{}]: {e}", e.code());
            return Ok(exit_code_for(&e));
        }
    };

    if args.json {
        print_json(&report)?;
    } else {
        for orphan in &report.orphans {
            println!(
                "{} -[{}]-> {}  ({})",
                orphan.edge.from_node,
                orphan.edge.edge_type,
                orphan.edge.to_node,
                orphan.reason.as_str()
            );
        }
        println!(
            "{} orphan(s) of {} edge(s) on disk, rate {:.2}%",
            report.total_orphans, report.total_edges_on_disk, report.orphan_rate
        );
    }
    Ok(exit(EXIT_OK))
}
