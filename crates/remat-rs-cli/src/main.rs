use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use tracing::info;
use tracing_subscriber::EnvFilter;

use remat_rs::units::{parse_byte_size, pretty_bytes, pretty_nanos};
use remat_rs::{io, optimize, SearchParams};

/// Rewrites a recorded execution trace to fit a device memory budget.
#[derive(Parser)]
#[command(name = "remat")]
#[command(about = "Trace schedule optimizer for peak device memory")]
#[command(version)]
struct Cli {
    /// Input trace file (JSON).
    input: PathBuf,

    /// Output trace file (JSON).
    output: PathBuf,

    /// Memory budget, e.g. `512MiB` or `8G`.
    limit: String,

    /// Seed for the candidate-pruning random pick.
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("REMAT_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let limit = parse_byte_size(&cli.limit)
        .with_context(|| format!("invalid memory limit `{}`", cli.limit))?;
    let schedule = io::load_trace(&cli.input)
        .with_context(|| format!("failed to load trace {}", cli.input.display()))?;

    info!(
        "running case {} ({} tasks) with limit {}",
        cli.input.display(),
        schedule.tasks().len(),
        pretty_bytes(limit)
    );

    let mut params = SearchParams::new(limit);
    if let Some(seed) = cli.seed {
        params = params.with_seed(seed);
    }
    let outcome = optimize(schedule, &params);

    info!("schedules searched: {}", outcome.searched);
    info!(
        "time used: {}",
        pretty_nanos(outcome.elapsed.as_nanos().min(u128::from(u64::MAX)) as u64)
    );
    info!("best: {{{}}}", outcome.best.summary());
    info!("satisfy memory: {}", outcome.satisfied);

    io::dump_trace(&outcome.best, &cli.output)
        .with_context(|| format!("failed to dump trace {}", cli.output.display()))?;
    Ok(())
}
