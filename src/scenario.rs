use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::map::GridMap;

/// One record of a benchmark `.scen` file. Scenario coordinates are
/// (x, y) = (column, row).
#[derive(Debug, Deserialize, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Route {
    pub bucket: usize,
    pub start_col: usize,
    pub start_row: usize,
    pub goal_col: usize,
    pub goal_row: usize,
}

/// A start/goal pair resolved against a concrete map.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub struct ScenarioAgent {
    pub id: usize,
    pub start: usize,
    pub goal: usize,
}

#[derive(Debug, Default)]
pub struct Scenario {
    pub map_name: String,
    pub map_width: usize,
    pub map_height: usize,
    pub routes: Vec<Route>,
}

impl Scenario {
    /// Parses a whitespace-delimited scenario file: a version header, then
    /// one route per line as
    /// `<bucket> <map> <width> <height> <sx> <sy> <gx> <gy> <optimal>`.
    pub fn load_from_scen(path: &str) -> Result<Scenario> {
        let file = File::open(path).with_context(|| format!("opening scenario {path}"))?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();

        let _version = lines
            .next()
            .transpose()?
            .context("scenario file is empty")?;

        let mut scenario = Scenario::default();
        for (lineno, line) in lines.enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 9 {
                bail!("scenario line {} is malformed: {line:?}", lineno + 2);
            }
            let field = |idx: usize| -> Result<usize> {
                parts[idx]
                    .parse::<usize>()
                    .with_context(|| format!("scenario line {} field {idx}", lineno + 2))
            };

            if scenario.map_name.is_empty() {
                scenario.map_name = parts[1].to_string();
                scenario.map_width = field(2)?;
                scenario.map_height = field(3)?;
            }
            scenario.routes.push(Route {
                bucket: field(0)?,
                start_col: field(4)?,
                start_row: field(5)?,
                goal_col: field(6)?,
                goal_row: field(7)?,
            });
        }
        Ok(scenario)
    }

    /// Resolves the first `num_agents` routes against `map`, rejecting
    /// records that fall on obstacles or outside the grid.
    pub fn agents(&self, map: &GridMap, num_agents: usize) -> Result<Vec<ScenarioAgent>> {
        if self.routes.len() < num_agents {
            bail!(
                "scenario has {} routes but {} agents were requested",
                self.routes.len(),
                num_agents
            );
        }
        let mut agents = Vec::with_capacity(num_agents);
        for (id, route) in self.routes.iter().take(num_agents).enumerate() {
            if route.start_row >= map.rows
                || route.start_col >= map.cols
                || route.goal_row >= map.rows
                || route.goal_col >= map.cols
            {
                bail!("route {id} is outside the {}x{} map", map.rows, map.cols);
            }
            let start = map.linearize(route.start_row, route.start_col);
            let goal = map.linearize(route.goal_row, route.goal_col);
            if map.is_obstacle(start) || map.is_obstacle(goal) {
                bail!("route {id} touches an obstacle");
            }
            agents.push(ScenarioAgent { id, start, goal });
        }
        info!("Resolved {} scenario agents", agents.len());
        Ok(agents)
    }

    pub fn load_agents_from_yaml(path: &str) -> Result<Vec<ScenarioAgent>> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let agents = serde_yaml::from_reader(reader)?;
        Ok(agents)
    }

    pub fn write_agents_to_yaml(path: &str, agents: &[ScenarioAgent]) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = io::BufWriter::new(file);
        let yaml = serde_yaml::to_string(&agents)?;
        writer.write_all(yaml.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCEN: &str = "version 1\n\
        0\ttiny.map\t4\t3\t0\t0\t3\t2\t5.0\n\
        0\ttiny.map\t4\t3\t3\t0\t0\t2\t5.0\n\
        1\ttiny.map\t4\t3\t1\t1\t2\t1\t1.0\n";

    fn write_temp(tag: &str, content: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "realtime-mapf-{tag}-{}.scen",
            std::process::id()
        ));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_parse_scen_and_resolve_agents() {
        let path = write_temp("resolve", SCEN);
        let scenario = Scenario::load_from_scen(path.to_str().unwrap()).unwrap();
        assert_eq!(scenario.map_name, "tiny.map");
        assert_eq!(scenario.map_width, 4);
        assert_eq!(scenario.map_height, 3);
        assert_eq!(scenario.routes.len(), 3);

        let map = GridMap::new(3, 4, vec![false; 12]);
        let agents = scenario.agents(&map, 2).unwrap();
        assert_eq!(
            agents,
            vec![
                ScenarioAgent {
                    id: 0,
                    start: 0,
                    goal: map.linearize(2, 3),
                },
                ScenarioAgent {
                    id: 1,
                    start: 3,
                    goal: map.linearize(2, 0),
                },
            ]
        );

        assert!(scenario.agents(&map, 9).is_err());
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_route_on_obstacle_rejected() {
        let path = write_temp("obstacle", SCEN);
        let scenario = Scenario::load_from_scen(path.to_str().unwrap()).unwrap();
        let mut obstacles = vec![false; 12];
        obstacles[0] = true;
        let map = GridMap::new(3, 4, obstacles);
        assert!(scenario.agents(&map, 1).is_err());
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_yaml_round_trip() {
        let agents = vec![
            ScenarioAgent {
                id: 0,
                start: 4,
                goal: 9,
            },
            ScenarioAgent {
                id: 1,
                start: 2,
                goal: 7,
            },
        ];
        let path = std::env::temp_dir().join(format!(
            "realtime-mapf-agents-{}.yaml",
            std::process::id()
        ));
        Scenario::write_agents_to_yaml(path.to_str().unwrap(), &agents).unwrap();
        let loaded = Scenario::load_agents_from_yaml(path.to_str().unwrap()).unwrap();
        assert_eq!(agents, loaded);
        std::fs::remove_file(path).ok();
    }
}
