use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use realtime_mapf::config::Cli;
use realtime_mapf::coordinator::RealtimeCoordinator;
use realtime_mapf::map::GridMap;
use realtime_mapf::scenario::Scenario;
use realtime_mapf::stats::write_paths_to_file;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::try_parse().unwrap_or_else(|err| {
        let _ = err.print();
        std::process::exit(1);
    });

    if let Err(err) = run(cli) {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let map = Arc::new(GridMap::from_file(&cli.map).context("loading map")?);
    let scenario = Scenario::load_from_scen(&cli.agents).context("loading scenario")?;
    let agents = scenario.agents(&map, cli.agent_num)?;

    let starts: Vec<usize> = agents.iter().map(|a| a.start).collect();
    let seed = cli.seed.unwrap_or_else(rand::random);
    let mut coordinator = RealtimeCoordinator::new(map.clone(), &starts, cli.replan_algo, seed);

    let goals: Vec<(usize, usize)> = agents.iter().map(|a| (a.id, a.goal)).collect();
    coordinator.assign_goals(&goals);
    info!(
        "Running {} agents with {} for up to {}s (seed {seed})",
        cli.agent_num, cli.replan_algo, cli.cutoff_time
    );

    let mut now = 0.0;
    while now <= cli.cutoff_time {
        coordinator.update(now);
        if coordinator.get_idle_agents().len() == coordinator.num_agents() {
            break;
        }
        now += 1.0;
    }

    let stats = coordinator.stats();
    stats.print();

    if let Some(path) = &cli.output {
        stats.write_summary(path).context("writing summary")?;
    }
    if let Some(path) = &cli.stats {
        stats.write_to_file(path).context("writing stats")?;
    }
    if let Some(path) = &cli.output_paths {
        write_paths_to_file(path, &map, coordinator.committed_paths())
            .context("writing paths")?;
    }

    let unfinished = coordinator.num_agents() - coordinator.get_idle_agents().len();
    if unfinished > 0 {
        info!("{unfinished} agents still en route at cutoff");
    }
    Ok(())
}
