use std::fs::File;
use std::io::{BufWriter, Write};

use anyhow::Result;
use serde::Serialize;
use tracing::info;

use crate::map::{GridMap, Path};

/// Run-level statistics, serialized as YAML for the `--stats` file.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationStats {
    pub num_agents: usize,
    pub replan_algo: String,
    pub total_cost: f64,
    pub total_conflicts: usize,
    pub updates: u64,
}

impl SimulationStats {
    pub fn print(&self) {
        info!(
            "Agents {:?} Algo {:?} Cost {:?} Conflicts {:?} Updates {:?}",
            self.num_agents, self.replan_algo, self.total_cost, self.total_conflicts, self.updates
        );
    }

    pub fn write_to_file(&self, path: &str) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(serde_yaml::to_string(self)?.as_bytes())?;
        Ok(())
    }

    /// Plain-text run summary for the `--output` file.
    pub fn write_summary(&self, path: &str) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "Total Cost: {}", self.total_cost)?;
        writeln!(writer, "Total Conflicts: {}", self.total_conflicts)?;
        writeln!(writer, "Number of Agents: {}", self.num_agents)?;
        writeln!(writer, "Replanning Algorithm: {}", self.replan_algo)?;
        Ok(())
    }
}

/// Writes one `Agent <id>: (r,c) -> (r,c) -> ...` line per agent.
pub fn write_paths_to_file(path: &str, map: &GridMap, paths: &[(usize, Path)]) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    for (agent_id, agent_path) in paths {
        let route: Vec<String> = agent_path
            .iter()
            .map(|entry| format!("({},{})", map.row_of(entry.location), map.col_of(entry.location)))
            .collect();
        writeln!(writer, "Agent {}: {}", agent_id, route.join(" -> "))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::{Orientation, PathEntry};

    #[test]
    fn test_paths_file_format() {
        let map = GridMap::new(2, 3, vec![false; 6]);
        let paths = vec![(
            0,
            vec![
                PathEntry::new(0, Orientation::North),
                PathEntry::new(1, Orientation::East),
                PathEntry::new(4, Orientation::South),
            ],
        )];
        let file = std::env::temp_dir().join(format!(
            "realtime-mapf-paths-{}.txt",
            std::process::id()
        ));
        write_paths_to_file(file.to_str().unwrap(), &map, &paths).unwrap();
        let written = std::fs::read_to_string(&file).unwrap();
        assert_eq!(written.trim(), "Agent 0: (0,0) -> (0,1) -> (1,1)");
        std::fs::remove_file(file).ok();
    }

    #[test]
    fn test_stats_files() {
        let stats = SimulationStats {
            num_agents: 3,
            replan_algo: "PP".to_string(),
            total_cost: 12.0,
            total_conflicts: 0,
            updates: 9,
        };
        let dir = std::env::temp_dir();
        let yaml_path = dir.join(format!("realtime-mapf-stats-{}.yaml", std::process::id()));
        stats.write_to_file(yaml_path.to_str().unwrap()).unwrap();
        let yaml = std::fs::read_to_string(&yaml_path).unwrap();
        assert!(yaml.contains("num_agents: 3"));
        assert!(yaml.contains("replan_algo: PP"));

        let txt_path = dir.join(format!("realtime-mapf-summary-{}.txt", std::process::id()));
        stats.write_summary(txt_path.to_str().unwrap()).unwrap();
        let summary = std::fs::read_to_string(&txt_path).unwrap();
        assert!(summary.contains("Total Cost: 12"));
        assert!(summary.contains("Replanning Algorithm: PP"));

        std::fs::remove_file(yaml_path).ok();
        std::fs::remove_file(txt_path).ok();
    }
}
