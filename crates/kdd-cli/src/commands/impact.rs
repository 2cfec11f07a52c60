//! `kdd impact` - dependents of a node.

use std::process::ExitCode;

use anyhow::Result;
use clap::Args;

use super::{exit, exit_code_for, print_json, CliContext, GlobalOptions, EXIT_OK};

#[derive(Args, Debug)]
pub struct ImpactArgs {
    /// Changed node id
    pub node: String,

    /// Traversal depth (1..5)
    #[arg(long, default_value_t = 2)]
    pub depth: usize,

    /// Emit JSON
    #[arg(long)]
    pub json: bool,
}

pub fn execute(args: ImpactArgs, global: &GlobalOptions) -> Result<ExitCode> {
    let ctx = CliContext::build(global)?;
    let engine = ctx.engine()?;

    let result = match engine.impact(&args.node, args.depth) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("error [{}]: {e}", e.code());
            return Ok(exit_code_for(&e));
        }
    };

    if args.json {
        print_json(&result)?;
    } else {
        println!("directly affected ({}):", result.direct.len());
        for node in &result.direct {
            println!("  {}", node.node_id);
        }
        println!("transitively affected ({}):", result.transitive.len());
        for node in &result.transitive {
            println!("  {}  via {}", node.node_id, node.path.join(" -> "));
        }
        if !result.validated_by.is_empty() {
            println!("validated by: {}", result.validated_by.join(", "));
        }
    }
    Ok(exit(EXIT_OK))
}
