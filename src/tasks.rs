use std::sync::Arc;

use rand::Rng;
use tracing::{debug, warn};

use crate::coordinator::RealtimeCoordinator;
use crate::map::GridMap;

const MAX_RANDOM_ATTEMPTS: usize = 1000;
const MAX_WAREHOUSE_ATTEMPTS: usize = 100;

/// A pending goal assignment produced by a generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicTask {
    pub agent_id: usize,
    pub goal_location: usize,
    pub priority: u32,
    pub completed: bool,
}

impl DynamicTask {
    pub fn new(agent_id: usize, goal_location: usize, priority: u32) -> Self {
        DynamicTask {
            agent_id,
            goal_location,
            priority,
            completed: false,
        }
    }
}

/// Samples goals over the free cells of a map. Warehouse tasks draw pickups
/// from the leftmost column quartile and dropoffs from the rightmost.
pub struct TaskGenerator {
    map: Arc<GridMap>,
}

impl TaskGenerator {
    pub fn new(map: Arc<GridMap>) -> Self {
        TaskGenerator { map }
    }

    /// Uniform free cell, with a bounded number of rejection-sampling
    /// attempts and a linear scan as the fallback.
    pub fn random_free_cell<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<usize> {
        for _ in 0..MAX_RANDOM_ATTEMPTS {
            let cell = rng.gen_range(0..self.map.size());
            if !self.map.is_obstacle(cell) {
                return Some(cell);
            }
        }
        warn!("no free cell found after {MAX_RANDOM_ATTEMPTS} attempts; scanning");
        (0..self.map.size()).find(|&cell| !self.map.is_obstacle(cell))
    }

    fn sample_in_columns<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        col_lo: usize,
        col_hi: usize,
    ) -> Option<usize> {
        for _ in 0..MAX_WAREHOUSE_ATTEMPTS {
            let row = rng.gen_range(0..self.map.rows);
            let col = rng.gen_range(col_lo..=col_hi);
            let cell = self.map.linearize(row, col);
            if !self.map.is_obstacle(cell) {
                return Some(cell);
            }
        }
        for row in 0..self.map.rows {
            for col in col_lo..=col_hi {
                let cell = self.map.linearize(row, col);
                if !self.map.is_obstacle(cell) {
                    return Some(cell);
                }
            }
        }
        None
    }

    /// Pickup area: the leftmost quarter of the columns.
    pub fn warehouse_pickup_cell<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<usize> {
        let cols = (self.map.cols / 4).max(1);
        self.sample_in_columns(rng, 0, cols - 1)
    }

    /// Dropoff area: the rightmost quarter of the columns.
    pub fn warehouse_dropoff_cell<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<usize> {
        let lo = (3 * self.map.cols / 4).min(self.map.cols - 1);
        self.sample_in_columns(rng, lo, self.map.cols - 1)
    }

    /// Assigns a uniformly sampled free goal to one agent.
    pub fn assign_random_goal<R: Rng + ?Sized>(
        &self,
        coordinator: &mut RealtimeCoordinator,
        agent_id: usize,
        priority: u32,
        rng: &mut R,
    ) -> bool {
        let Some(goal) = self.random_free_cell(rng) else {
            return false;
        };
        debug!("random task: agent {agent_id} -> {goal} (priority {priority})");
        coordinator.assign_goal(agent_id, goal)
    }

    /// Emits `num_tasks` warehouse tasks, pairing random agents with a
    /// pickup or dropoff cell by agent parity.
    pub fn generate_warehouse_tasks<R: Rng + ?Sized>(
        &self,
        num_tasks: usize,
        num_agents: usize,
        rng: &mut R,
    ) -> Vec<DynamicTask> {
        let mut tasks = Vec::with_capacity(num_tasks);
        if num_agents == 0 {
            return tasks;
        }
        for _ in 0..num_tasks {
            let agent_id = rng.gen_range(0..num_agents);
            let priority = rng.gen_range(1..=5);
            let cell = if agent_id % 2 == 0 {
                self.warehouse_pickup_cell(rng)
            } else {
                self.warehouse_dropoff_cell(rng)
            };
            if let Some(goal_location) = cell {
                tasks.push(DynamicTask::new(agent_id, goal_location, priority));
            }
        }
        tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReplanAlgo;
    use crate::coordinator::AgentStatus;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn warehouse_map() -> Arc<GridMap> {
        Arc::new(GridMap::new(4, 8, vec![false; 32]))
    }

    #[test]
    fn test_random_cell_avoids_obstacles() {
        let text = "type octile\nheight 2\nwidth 2\nmap\n@@\n@.\n";
        let map = Arc::new(GridMap::from_text(text).unwrap());
        let generator = TaskGenerator::new(map);
        let mut rng = StdRng::from_seed([1u8; 32]);
        for _ in 0..20 {
            assert_eq!(generator.random_free_cell(&mut rng), Some(3));
        }
    }

    #[test]
    fn test_warehouse_quartiles() {
        let map = warehouse_map();
        let generator = TaskGenerator::new(map.clone());
        let mut rng = StdRng::from_seed([2u8; 32]);
        for _ in 0..50 {
            let pickup = generator.warehouse_pickup_cell(&mut rng).unwrap();
            assert!(map.col_of(pickup) < 2);
            let dropoff = generator.warehouse_dropoff_cell(&mut rng).unwrap();
            assert!(map.col_of(dropoff) >= 6);
        }
    }

    #[test]
    fn test_warehouse_tasks_pair_by_parity() {
        let map = warehouse_map();
        let generator = TaskGenerator::new(map.clone());
        let mut rng = StdRng::from_seed([3u8; 32]);
        let tasks = generator.generate_warehouse_tasks(40, 4, &mut rng);
        assert_eq!(tasks.len(), 40);
        for task in &tasks {
            assert!(task.agent_id < 4);
            assert!((1..=5).contains(&task.priority));
            assert!(!task.completed);
            if task.agent_id % 2 == 0 {
                assert!(map.col_of(task.goal_location) < 2);
            } else {
                assert!(map.col_of(task.goal_location) >= 6);
            }
        }
    }

    #[test]
    fn test_assign_random_goal_reaches_coordinator() {
        let map = warehouse_map();
        let generator = TaskGenerator::new(map.clone());
        let mut coordinator = RealtimeCoordinator::new(map, &[0], ReplanAlgo::Pp, 8);
        let mut rng = StdRng::from_seed([4u8; 32]);
        assert!(generator.assign_random_goal(&mut coordinator, 0, 1, &mut rng));
        assert_eq!(
            coordinator.get_agent_status(0),
            Some(AgentStatus::Reassigning)
        );
        assert!(!generator.assign_random_goal(&mut coordinator, 9, 1, &mut rng));
    }
}
