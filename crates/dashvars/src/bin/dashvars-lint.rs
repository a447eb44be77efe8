use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use dashvars::engine::{DependencyGraph, VariableIssue, parse_variables, validate_variables};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "dashvars-lint",
    about = "Check a dashboard's template variables and print their init order"
)]
struct Cli {
    /// Dashboard JSON (full dashboard, `templating` object or bare list). Reads stdin when omitted.
    input: Option<PathBuf>,

    /// Print a machine-readable report instead of text.
    #[arg(long)]
    json: bool,

    /// Only report issues; skip the init order.
    #[arg(long)]
    quiet: bool,
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let source = read_input(cli.input.as_ref())?;
    let variables = parse_variables(&source).context("parsing dashboard JSON")?;

    let issues: Vec<VariableIssue> = match validate_variables(&variables) {
        Ok(()) => Vec::new(),
        Err(err) => err.issues,
    };

    let graph = DependencyGraph::from_variables(&variables);
    let schedule = graph.init_schedule();
    let layers: Vec<Vec<&str>> = schedule
        .layers
        .iter()
        .map(|layer| layer.nodes.iter().map(|&id| graph.name(id)).collect())
        .collect();

    if cli.json {
        let report = json!({
            "variables": variables.len(),
            "issues": issues
                .iter()
                .map(|i| json!({ "path": i.path, "message": i.message }))
                .collect::<Vec<_>>(),
            "layers": layers,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("variables: {}", variables.len());
        if !cli.quiet {
            println!("init order");
            for (idx, layer) in layers.iter().enumerate() {
                println!("  {idx}: {}", layer.join(", "));
            }
        }
        if issues.is_empty() {
            println!("no issues");
        } else {
            println!("\n{} issue(s):", issues.len());
            for issue in &issues {
                println!("  - {issue}");
            }
        }
    }

    Ok(if issues.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn read_input(path: Option<&PathBuf>) -> Result<String> {
    match path {
        Some(path) => {
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
        }
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("reading stdin")?;
            Ok(buf)
        }
    }
}
