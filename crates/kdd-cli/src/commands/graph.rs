//! `kdd graph` - neighborhood traversal.

use std::process::ExitCode;

use anyhow::Result;
use clap::Args;
use serde_json::json;

use kdd_search::QueryFilters;

use super::{exit, exit_code_for, print_json, CliContext, GlobalOptions, EXIT_OK};

#[derive(Args, Debug)]
pub struct GraphArgs {
    /// Root node id (e.g. Entity:Pedido)
    pub node: String,

    /// Traversal depth (1..5)
    #[arg(long, default_value_t = 1)]
    pub depth: usize,

    /// Follow only these edge types (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub types: Vec<String>,

    /// Exclude layer-violating edges
    #[arg(long)]
    pub respect_layers: bool,

    /// Maximum related nodes
    #[arg(long, default_value_t = 50)]
    pub limit: usize,

    /// Emit JSON
    #[arg(long)]
    pub json: bool,
}

pub fn execute(args: GraphArgs, global: &GlobalOptions) -> Result<ExitCode> {
    let ctx = CliContext::build(global)?;
    let engine = ctx.engine()?;

    let filters = QueryFilters {
        respect_layers: args.respect_layers,
        limit: args.limit,
        ..Default::default()
    };
    let types = (!args.types.is_empty()).then_some(args.types.as_slice());

    let result = match engine.graph(&args.node, args.depth, types, &filters) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("error [{}]: {e}", e.code());
            return Ok(exit_code_for(&e));
        }
    };

    if args.json {
        print_json(&json!({
            "center": result.center,
            "related": result.related.iter().map(|r| json!({
                "node_id": r.node.id,
                "kind": r.node.kind,
                "distance": r.distance,
            })).collect::<Vec<_>>(),
            "edges": result.edges,
            "partial": result.partial,
        }))?;
    } else {
        println!("{} ({})", result.center.id, result.center.source_file);
        for related in &result.related {
            println!("  {}  {} hop(s)", related.node.id, related.distance);
        }
        println!("{} edge(s) traversed", result.edges.len());
    }
    Ok(exit(EXIT_OK))
}
