//! `kdd search` - hybrid retrieval.

use std::process::ExitCode;

use anyhow::{bail, Result};
use clap::Args;
use serde_json::json;

use kdd_core::document::{parse_kind, parse_layer};
use kdd_search::QueryFilters;

use super::{exit, exit_code_for, print_json, CliContext, GlobalOptions, EXIT_OK};

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Query text
    pub text: String,

    /// Restrict to kinds (repeatable)
    #[arg(long = "kind")]
    pub kinds: Vec<String>,

    /// Restrict to layers (repeatable)
    #[arg(long = "layer")]
    pub layers: Vec<String>,

    /// Maximum results (1..100)
    #[arg(long, default_value_t = 10)]
    pub limit: usize,

    /// Minimum fused score (0..1)
    #[arg(long)]
    pub min_score: Option<f32>,

    /// Graph expansion depth
    #[arg(long, default_value_t = 1)]
    pub depth: usize,

    /// Token budget for the result set
    #[arg(long, default_value_t = 4000)]
    pub max_tokens: usize,

    /// Emit JSON
    #[arg(long)]
    pub json: bool,
}

pub fn execute(args: SearchArgs, global: &GlobalOptions) -> Result<ExitCode> {
    let ctx = CliContext::build(global)?;
    let engine = ctx.engine()?;

    let mut include_kinds = Vec::new();
    for value in &args.kinds {
        match parse_kind(value) {
            Some(kind) => include_kinds.push(kind),
            None => bail!("unknown kind: {value}"),
        }
    }
    let mut include_layers = Vec::new();
    for value in &args.layers {
        match parse_layer(value) {
            Some(layer) => include_layers.push(layer),
            None => bail!("unknown layer: {value}"),
        }
    }
    let filters = QueryFilters {
        include_kinds: (!include_kinds.is_empty()).then_some(include_kinds),
        include_layers: (!include_layers.is_empty()).then_some(include_layers),
        limit: args.limit,
        min_score: args.min_score,
        ..Default::default()
    };

    let result = match engine.hybrid(&args.text, args.depth, args.max_tokens, &filters) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("error [{}]: {e}", e.code());
            return Ok(exit_code_for(&e));
        }
    };

    if args.json {
        print_json(&json!({
            "hits": result.hits.iter().map(|h| json!({
                "node_id": h.node.id,
                "kind": h.node.kind,
                "score": h.score,
                "match_source": h.match_source,
                "snippet": h.snippet,
                "source_file": h.node.source_file,
            })).collect::<Vec<_>>(),
            "total_tokens": result.total_tokens,
            "warnings": result.warnings,
            "partial": result.partial,
        }))?;
    } else {
        for warning in &result.warnings {
            eprintln!("warning: {warning}");
        }
        for hit in &result.hits {
            println!(
                "{:.3}  {}  [{}]  {}",
                hit.score, hit.node.id, hit.match_source, hit.snippet
            );
        }
        if result.hits.is_empty() {
            println!("no results");
        }
    }
    Ok(exit(EXIT_OK))
}
