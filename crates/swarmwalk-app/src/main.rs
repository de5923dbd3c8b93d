use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use swarmwalk_app::{RunOptions, load_config, run};
use swarmwalk_core::SwarmConfig;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "swarmwalk",
    version,
    about = "Spawn a walking swarm from the demo template and dump the baked tracks as JSON"
)]
struct Cli {
    /// JSON swarm configuration; omitted fields use defaults.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Number of clones to spawn (overrides the config file).
    #[arg(long)]
    count: Option<usize>,
    /// RNG seed for reproducible runs (overrides the config file).
    #[arg(long, env = "SWARMWALK_SEED")]
    seed: Option<u64>,
    /// Obstacles scattered inside the placement bounds.
    #[arg(long, default_value_t = 12)]
    obstacles: usize,
    /// Write the report here instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => SwarmConfig::default(),
    };
    if let Some(count) = cli.count {
        config.count = count;
    }
    if let Some(seed) = cli.seed {
        config.rng_seed = Some(seed);
    }

    let summary = run(&RunOptions {
        config,
        obstacles: cli.obstacles,
    })?;
    let json = serde_json::to_string_pretty(&summary).context("failed to serialize report")?;

    match &cli.output {
        Some(path) => {
            fs::write(path, json)
                .with_context(|| format!("failed to write report {}", path.display()))?;
            info!(path = %path.display(), agents = summary.agents.len(), "report written");
        }
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(json.as_bytes())?;
            stdout.write_all(b"\n")?;
        }
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .try_init();
}
