//! `kdd context` - context amplification for agents.

use std::process::ExitCode;

use anyhow::Result;
use clap::Args;

use super::{exit, exit_code_for, print_json, CliContext, GlobalOptions, EXIT_OK};

#[derive(Args, Debug)]
pub struct ContextArgs {
    /// Hints: node ids, file paths, or keywords
    #[arg(required = true)]
    pub hints: Vec<String>,

    /// Discovery depth (1..5)
    #[arg(long, default_value_t = 1)]
    pub depth: usize,

    /// Token budget
    #[arg(long, default_value_t = 4000)]
    pub max_tokens: usize,

    /// Emit JSON
    #[arg(long)]
    pub json: bool,
}

pub fn execute(args: ContextArgs, global: &GlobalOptions) -> Result<ExitCode> {
    let ctx = CliContext::build(global)?;
    let engine = ctx.engine()?;

    let result = match engine.context(&args.hints, args.depth, args.max_tokens) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("error [{}]: {e}", e.code());
            return Ok(exit_code_for(&e));
        }
    };

    if args.json {
        print_json(&result)?;
    } else {
        for warning in &result.warnings {
            eprintln!("warning: {warning}");
        }
        println!("resolved:");
        for entity in &result.resolved {
            println!(
                "  {}  (from '{}', {:?})",
                entity.node_id, entity.matched_from, entity.match_method
            );
        }
        println!("constraints ({}):", result.constraints.len());
        for item in &result.constraints {
            println!("  [{}] {}: {}", item.kind, item.node_id, item.content);
        }
        println!("behavior ({}):", result.behavior.len());
        for item in &result.behavior {
            println!("  [{}] {}: {}", item.kind, item.node_id, item.content);
        }
        println!("~{} tokens", result.total_tokens);
    }
    Ok(exit(EXIT_OK))
}
