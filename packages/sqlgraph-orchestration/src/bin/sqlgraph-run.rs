//! sqlgraph runner CLI
//!
//! # Usage
//!
//! ```bash
//! # Run a saved graph once
//! sqlgraph-run run --graph pipeline.json --config engine.yaml
//!
//! # Run, then write the layout back (e.g. after a format upgrade)
//! sqlgraph-run run --graph pipeline.json --save
//!
//! # Show dependency levels without running anything
//! sqlgraph-run plan --graph pipeline.json
//! ```
//!
//! Ctrl-C interrupts a running generation; nodes in flight finish as
//! "Interrupted".

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlgraph_orchestration::logging::init_tracing;
use sqlgraph_orchestration::{parallel_levels, EngineConfig, Graph, NodePhase, Registry};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::warn;

#[derive(Parser)]
#[command(name = "sqlgraph-run")]
#[command(about = "Evaluate a saved sqlgraph dataflow graph", long_about = None)]
struct Cli {
    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one generation and print node status
    Run {
        /// Graph layout (JSON)
        #[arg(short, long)]
        graph: PathBuf,

        /// Engine config (YAML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the database directory
        #[arg(long)]
        database_dir: Option<PathBuf>,

        /// Override the worker budget (0 = one per CPU)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Write the layout back after the run
        #[arg(long)]
        save: bool,
    },

    /// Print dependency levels
    Plan {
        /// Graph layout (JSON)
        #[arg(short, long)]
        graph: PathBuf,
    },
}

fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(p) => EngineConfig::from_yaml(p).with_context(|| format!("loading config {}", p.display())),
        None => Ok(EngineConfig::default()),
    }
}

async fn run(graph_path: &Path, config: EngineConfig, save: bool) -> anyhow::Result<bool> {
    let mut graph = Graph::load(graph_path, Registry::with_builtins(), config)
        .with_context(|| format!("loading graph {}", graph_path.display()))?;

    let interrupt = graph.interrupt_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt requested");
            interrupt.cancel();
        }
    });

    let report = graph.execute().await?;

    println!("{:<24} {:<10} {:<8} error", "node", "kernel", "state");
    for node in graph.nodes() {
        let error = node.error().map(|e| e.to_string()).unwrap_or_default();
        let state = match node.phase() {
            NodePhase::Done if report.memoized.iter().any(|n| n == node.name()) => "memoized",
            phase => phase.as_str(),
        };
        println!("{:<24} {:<10} {:<8} {}", node.name(), node.kernel(), state, error);
    }
    println!(
        "\n{} executed, {} memoized, {} failed in {}ms{}",
        report.executed.len(),
        report.memoized.len(),
        report.failed.len(),
        report.duration_ms,
        if report.cancelled { " (interrupted)" } else { "" }
    );

    if save {
        graph.save(graph_path)?;
    }
    Ok(report.is_clean())
}

fn plan(graph_path: &Path) -> anyhow::Result<()> {
    let graph = Graph::load(graph_path, Registry::with_builtins(), EngineConfig::default())?;
    for (depth, level) in parallel_levels(&graph)?.iter().enumerate() {
        println!("{:>3}: {}", depth, level.join(", "));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log);

    let result = match cli.command {
        Commands::Run {
            graph,
            config,
            database_dir,
            workers,
            save,
        } => {
            let loaded = load_config(config.as_deref()).map(|mut c| {
                if let Some(dir) = database_dir {
                    c.database_dir = dir;
                }
                if let Some(n) = workers {
                    c.max_workers = n;
                }
                c
            });
            match loaded {
                Ok(c) => run(&graph, c, save).await,
                Err(e) => Err(e),
            }
        }
        Commands::Plan { graph } => plan(&graph).map(|_| true),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}
