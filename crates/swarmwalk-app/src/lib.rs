//! Application plumbing for the headless swarm shell.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rand::{SeedableRng, rngs::SmallRng};
use swarmwalk_core::{Scene, SwarmConfig, spawn_swarm};
use tracing::info;

pub mod course;
pub mod report;
pub mod template;

pub use report::{AgentSummary, SwarmSummary};

/// Offset separating the obstacle stream from the swarm's own RNG stream.
const COURSE_STREAM: u64 = 0x0B57_AC1E_5EED_0001;

/// Inputs for one headless run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config: SwarmConfig,
    /// Obstacles scattered inside the placement bounds.
    pub obstacles: usize,
}

/// Load a JSON `SwarmConfig`; missing fields fall back to their defaults.
pub fn load_config(path: &Path) -> Result<SwarmConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: SwarmConfig = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    Ok(config)
}

/// Build the demo scene, spawn the swarm, and summarise the result.
pub fn run(options: &RunOptions) -> Result<SwarmSummary> {
    let mut config = options.config.clone();
    // Derive both streams from one resolved seed.
    let seed = config.rng_seed.unwrap_or_else(rand::random);
    config.rng_seed = Some(seed);

    let mut scene = Scene::new();
    let root = template::build_spider(&mut scene);
    let mut course_rng = SmallRng::seed_from_u64(seed.wrapping_add(COURSE_STREAM));
    course::scatter_obstacles(&mut scene, options.obstacles, config.bounds, &mut course_rng);
    info!(
        seed,
        count = config.count,
        obstacles = options.obstacles,
        "spawning swarm"
    );

    let report = spawn_swarm(&mut scene, root, &config).context("swarm spawn failed")?;
    Ok(SwarmSummary::from_report(&scene, &report))
}
