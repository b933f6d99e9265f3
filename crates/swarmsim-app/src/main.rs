use anyhow::Result;
use swarmsim_core::{SwarmConfig, SwarmWorld};
use tracing::{info, warn};

const MAX_TICKS: u64 = 400;

fn main() -> Result<()> {
    init_tracing();

    let config = SwarmConfig {
        rng_seed: seed_from_env(),
        ..SwarmConfig::default()
    };
    info!(
        drones = config.num_drones,
        targets = config.num_targets,
        accuracy = config.drone_accuracy,
        seed = ?config.rng_seed,
        "Starting swarm engagement",
    );

    let mut world = SwarmWorld::new(config)?;
    let outcome = world.run_to_completion(MAX_TICKS);

    if !world.is_engagement_over() {
        warn!(ticks = outcome.ticks, "Engagement hit the tick cap unresolved");
    }
    info!(
        ticks = outcome.ticks,
        drones_remaining = outcome.drones_remaining,
        armed_remaining = outcome.armed_remaining,
        targets_remaining = outcome.targets_remaining,
        drones_lost = outcome.drones_lost,
        targets_destroyed = outcome.targets_destroyed,
        utility = outcome.utility,
        "Engagement complete",
    );
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn seed_from_env() -> Option<u64> {
    match std::env::var("SWARMSIM_SEED") {
        Ok(raw) => match raw.parse() {
            Ok(seed) => Some(seed),
            Err(_) => {
                warn!(raw = %raw, "Ignoring unparseable SWARMSIM_SEED");
                None
            }
        },
        Err(_) => None,
    }
}
