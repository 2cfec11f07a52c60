//! `kdd violations` - layer violation report.

use std::process::ExitCode;

use anyhow::Result;
use clap::Args;

use kdd_search::QueryFilters;

use super::{exit, exit_code_for, print_json, CliContext, GlobalOptions, EXIT_OK};

#[derive(Args, Debug)]
pub struct ViolationsArgs {
    /// Emit JSON
    #[arg(long)]
    pub json: bool,
}

pub fn execute(args: ViolationsArgs, global: &GlobalOptions) -> Result<ExitCode> {
    let ctx = CliContext::build(global)?;
    let engine = ctx.engine()?;

    let report = match engine.layer_violations(&QueryFilters {
        limit: 100,
        ..Default::default()
    }) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("error [{}]: {e}", e.code());
            return Ok(exit_code_for(&e));
        }
    };

    if args.json {
        print_json(&report)?;
    } else {
        for violation in &report.violations {
            println!(
                "{} -[{}]-> {}  ({})",
                violation.from_node, violation.edge_type, violation.to_node, violation.source_file
            );
            println!("    {}", violation.explanation);
        }
        println!(
            "{} violation(s) across {} edge(s), rate {:.2}%",
            report.violations.len(),
            report.total_edges,
            report.violation_rate
        );
    }
    Ok(exit(EXIT_OK))
}
