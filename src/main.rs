use anyhow::Result;
use clap::Parser;
use std::path::Path;
use std::time::Duration;
use tracing::info;
use voxflow::cli::{Cli, Commands};
use voxflow::config::PipelineConfig;
use voxflow::graph::WorkerGraph;
use voxflow::runtime::{BuildCtx, Runtime, RuntimeOptions, WorkerRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose);

    match cli.command {
        Commands::Run { config, timeout } => run(&config, timeout).await,
        Commands::Check { config } => check(&config),
    }
}

fn init_tracing(quiet: bool, verbose: u8) {
    let default = if quiet {
        "error"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn run(path: &Path, timeout_secs: u64) -> Result<()> {
    let graph = load_graph(path)?;
    let runtime = Runtime::with_options(
        WorkerRegistry::builtin(),
        RuntimeOptions {
            ready_timeout: Duration::from_secs(timeout_secs),
            ..RuntimeOptions::default()
        },
    );
    let handle = runtime.start(&graph)?;

    let stopper = handle.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping pipeline");
            stopper.request_stop();
        }
    });

    tokio::task::spawn_blocking(move || handle.wait()).await??;
    Ok(())
}

/// Validates the configuration, graph and worker parameters without
/// starting anything.
fn check(path: &Path) -> Result<()> {
    let graph = load_graph(path)?;
    let registry = WorkerRegistry::builtin();
    for idx in 0..graph.len() {
        let spec = graph.spec(idx);
        registry.build(&BuildCtx {
            name: &spec.name,
            kind: &spec.kind,
            params: graph.params(idx),
        })?;
    }

    println!("ok: {} workers", graph.len());
    for idx in 0..graph.len() {
        let spec = graph.spec(idx);
        let targets: Vec<&str> = graph
            .downstream(idx)
            .iter()
            .map(|&j| graph.spec(j).name.as_str())
            .collect();
        if targets.is_empty() {
            println!("  {} ({})", spec.name, spec.kind);
        } else {
            println!("  {} ({}) -> {}", spec.name, spec.kind, targets.join(", "));
        }
    }
    Ok(())
}

fn load_graph(path: &Path) -> Result<WorkerGraph> {
    let config = PipelineConfig::load(path)?;
    Ok(WorkerGraph::compile(config.global, &config.workers)?)
}
