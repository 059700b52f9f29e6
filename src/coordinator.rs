pub mod driver;

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::ReplanAlgo;
use crate::constraint::ConstraintTable;
use crate::map::{GridMap, Path};
use crate::path_table::PathTable;
use crate::planner::SpaceTimePlanner;
use crate::stats::SimulationStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    /// No goal; parked at its current location.
    Idle,
    /// Following a committed path.
    Moving,
    /// Reached the end of its path this tick.
    Arrived,
    /// Waiting for a plan toward its current goal.
    Reassigning,
}

/// One agent of the fleet. Owns its planner, whose heuristic cache tracks
/// the agent's current goal.
pub struct RealtimeAgent {
    pub id: usize,
    pub status: AgentStatus,
    pub current_location: usize,
    pub current_goal: Option<usize>,
    /// Goal assigned while moving; applied on arrival.
    pub next_goal: Option<usize>,
    pub current_path: Path,
    pub path_index: usize,
    pub last_update_time: f64,
    pub needs_replanning: bool,
    planner: SpaceTimePlanner,
}

impl RealtimeAgent {
    fn new(map: Arc<GridMap>, id: usize, start: usize, seed: u64) -> Self {
        RealtimeAgent {
            id,
            status: AgentStatus::Idle,
            current_location: start,
            current_goal: None,
            next_goal: None,
            current_path: Vec::new(),
            path_index: 0,
            last_update_time: 0.0,
            needs_replanning: false,
            planner: SpaceTimePlanner::with_seed(map, start, start, seed),
        }
    }

    fn reset_at(&mut self, start: usize) {
        self.status = AgentStatus::Idle;
        self.current_location = start;
        self.current_goal = None;
        self.next_goal = None;
        self.current_path.clear();
        self.path_index = 0;
        self.needs_replanning = false;
        self.planner.set_start(start);
    }

    pub fn has_reached_goal(&self) -> bool {
        !self.current_path.is_empty()
            && self.path_index >= self.current_path.len() - 1
            && Some(self.current_location) == self.current_goal
    }

    pub fn is_idle(&self) -> bool {
        self.status == AgentStatus::Idle
    }

    pub fn is_moving(&self) -> bool {
        self.status == AgentStatus::Moving
    }

    /// Advances along the committed path by the number of whole timesteps
    /// elapsed since the last advance. Returns true when the agent reached
    /// the end of its path during this call.
    fn update_position(&mut self, now: f64) -> bool {
        if self.status != AgentStatus::Moving || self.current_path.is_empty() {
            return false;
        }
        let steps = (now - self.last_update_time).floor() as usize;
        if steps == 0 {
            return false;
        }
        self.path_index = (self.path_index + steps).min(self.current_path.len() - 1);
        self.current_location = self.current_path[self.path_index].location;
        self.last_update_time = now;
        if self.has_reached_goal() {
            self.status = AgentStatus::Arrived;
            return true;
        }
        false
    }
}

/// Owns the fleet, the path table and the replanning dispatch. All mutation
/// happens inside `update` or a synchronized goal assignment; a background
/// driver (see `driver`) may pump `update` on a wall-clock cadence.
pub struct RealtimeCoordinator {
    map: Arc<GridMap>,
    agents: Vec<RealtimeAgent>,
    path_table: PathTable,
    replan_algo: ReplanAlgo,
    replan_queue: VecDeque<usize>,
    committed_paths: Vec<(usize, Path)>,
    total_cost: f64,
    total_conflicts: usize,
    updates: u64,
    seed: u64,
}

impl RealtimeCoordinator {
    pub fn new(map: Arc<GridMap>, starts: &[usize], replan_algo: ReplanAlgo, seed: u64) -> Self {
        let agents = starts
            .iter()
            .enumerate()
            .map(|(id, &start)| {
                RealtimeAgent::new(map.clone(), id, start, seed.wrapping_add(id as u64))
            })
            .collect();
        RealtimeCoordinator {
            path_table: PathTable::new(map.size()),
            map,
            agents,
            replan_algo,
            replan_queue: VecDeque::new(),
            committed_paths: Vec::new(),
            total_cost: 0.0,
            total_conflicts: 0,
            updates: 0,
            seed,
        }
    }

    pub fn map(&self) -> &Arc<GridMap> {
        &self.map
    }

    pub fn num_agents(&self) -> usize {
        self.agents.len()
    }

    pub fn agent(&self, agent_id: usize) -> Option<&RealtimeAgent> {
        self.agents.get(agent_id)
    }

    /// Hands `goal` to an agent. Idle and arrived agents start replanning on
    /// the next update; moving agents store it for when they arrive. Rejects
    /// unknown agents and unreachable goal cells without changing any state.
    pub fn assign_goal(&mut self, agent_id: usize, goal: usize) -> bool {
        if agent_id >= self.agents.len() {
            warn!("assign_goal: invalid agent id {agent_id}");
            return false;
        }
        if goal >= self.map.size() || self.map.is_obstacle(goal) {
            warn!("assign_goal: invalid goal {goal} for agent {agent_id}");
            return false;
        }
        let agent = &mut self.agents[agent_id];
        match agent.status {
            AgentStatus::Idle | AgentStatus::Arrived => {
                agent.current_goal = Some(goal);
                agent.status = AgentStatus::Reassigning;
                agent.needs_replanning = true;
                self.replan_queue.push_back(agent_id);
            }
            AgentStatus::Moving => {
                agent.next_goal = Some(goal);
            }
            AgentStatus::Reassigning => {
                // No plan exists yet; the queued request simply retargets.
                agent.current_goal = Some(goal);
            }
        }
        debug!("agent {agent_id} assigned goal {goal}");
        true
    }

    /// FIFO batch assignment. Returns false if any single assignment failed.
    pub fn assign_goals(&mut self, pairs: &[(usize, usize)]) -> bool {
        pairs
            .iter()
            .fold(true, |ok, &(agent, goal)| self.assign_goal(agent, goal) && ok)
    }

    /// Resets an existing agent at `start`, or registers the next agent id.
    pub fn add_agent(&mut self, agent_id: usize, start: usize) -> bool {
        if start >= self.map.size() || self.map.is_obstacle(start) {
            warn!("add_agent: invalid start {start}");
            return false;
        }
        if agent_id < self.agents.len() {
            let path = std::mem::take(&mut self.agents[agent_id].current_path);
            self.path_table.delete_path(agent_id, &path);
            self.agents[agent_id].reset_at(start);
            true
        } else if agent_id == self.agents.len() {
            self.agents.push(RealtimeAgent::new(
                self.map.clone(),
                agent_id,
                start,
                self.seed.wrapping_add(agent_id as u64),
            ));
            true
        } else {
            warn!("add_agent: non-contiguous agent id {agent_id}");
            false
        }
    }

    /// Releases the agent's reservation and idles it in place.
    pub fn remove_agent(&mut self, agent_id: usize) {
        if agent_id >= self.agents.len() {
            return;
        }
        let path = std::mem::take(&mut self.agents[agent_id].current_path);
        self.path_table.delete_path(agent_id, &path);
        let location = self.agents[agent_id].current_location;
        self.agents[agent_id].reset_at(location);
    }

    /// One tick: advance every moving agent, dispatch replanning for agents
    /// that need it, rebuild the path table from the surviving paths, then
    /// recount conflicts for reporting.
    pub fn update(&mut self, now: f64) {
        self.updates += 1;

        for id in 0..self.agents.len() {
            if self.agents[id].update_position(now) {
                // The path is consumed; its reservation lifts so other
                // agents can route over the freed cells.
                let path = std::mem::take(&mut self.agents[id].current_path);
                self.path_table.delete_path(id, &path);
                self.agents[id].path_index = 0;
                if let Some(next) = self.agents[id].next_goal.take() {
                    self.agents[id].current_goal = Some(next);
                    self.agents[id].status = AgentStatus::Reassigning;
                    self.agents[id].needs_replanning = true;
                    self.replan_queue.push_back(id);
                } else {
                    self.agents[id].status = AgentStatus::Idle;
                }
            }
        }

        let batch: Vec<usize> = self
            .replan_queue
            .drain(..)
            .filter(|&id| {
                id < self.agents.len()
                    && self.agents[id].needs_replanning
                    && self.agents[id].status == AgentStatus::Reassigning
            })
            .collect();
        if !batch.is_empty() {
            match self.replan_algo {
                ReplanAlgo::Pp => self.replan_prioritized(&batch, now),
                // No meta-planner linked; prioritized order stands in.
                ReplanAlgo::Cbs | ReplanAlgo::Eecbs => self.replan_prioritized(&batch, now),
            }
        }

        self.rebuild_path_table();
        self.total_conflicts = self.count_conflicts();
    }

    /// Plans the batch one agent at a time; each plan sees the paths already
    /// committed, including earlier members of this batch.
    fn replan_prioritized(&mut self, batch: &[usize], now: f64) {
        for &id in batch {
            if !self.replan_agent(id, now) {
                // Kept in REASSIGNING; retried on the next tick.
                self.replan_queue.push_back(id);
            }
        }
    }

    fn replan_agent(&mut self, id: usize, now: f64) -> bool {
        let goal = match self.agents[id].current_goal {
            Some(goal) => goal,
            None => return false,
        };
        let old_path = std::mem::take(&mut self.agents[id].current_path);
        if !old_path.is_empty() {
            self.path_table.delete_path(id, &old_path);
        }

        let new_path = {
            let agent = &mut self.agents[id];
            agent.planner.set_start(agent.current_location);
            agent.planner.set_goal(goal);
            let constraint_table = ConstraintTable::new(Some(&self.path_table), None);
            agent.planner.find_path(&constraint_table)
        };

        match new_path {
            Some(path) if !path.is_empty() => {
                self.path_table.insert_path(id, &path);
                self.total_cost += (path.len() - 1) as f64;
                self.committed_paths.push((id, path.clone()));
                let agent = &mut self.agents[id];
                agent.current_location = path[0].location;
                agent.current_path = path;
                agent.path_index = 0;
                agent.status = AgentStatus::Moving;
                agent.needs_replanning = false;
                agent.last_update_time = now;
                info!("agent {id} committed path to {goal}");
                true
            }
            _ => {
                if !old_path.is_empty() {
                    self.path_table.insert_path(id, &old_path);
                    self.agents[id].current_path = old_path;
                }
                debug!("agent {id} found no path to {goal}; retrying next tick");
                false
            }
        }
    }

    fn rebuild_path_table(&mut self) {
        self.path_table.reset();
        for agent in &self.agents {
            if !agent.current_path.is_empty() {
                self.path_table.insert_path(agent.id, &agent.current_path);
            }
        }
    }

    /// Pairwise vertex and swap count over the committed paths, up to the
    /// shorter of each pair, incrementing once per conflicting timestep.
    /// Vertex hits compare cells; swap hits compare whole entries, mirroring
    /// the path table's occupancy rules. Reporting only; commits are kept
    /// conflict-free by construction.
    fn count_conflicts(&self) -> usize {
        let mut conflicts = 0;
        for i in 0..self.agents.len() {
            for j in (i + 1)..self.agents.len() {
                let path1 = &self.agents[i].current_path;
                let path2 = &self.agents[j].current_path;
                if path1.is_empty() || path2.is_empty() {
                    continue;
                }
                let common = path1.len().min(path2.len());
                for step in 0..common {
                    if path1[step].location == path2[step].location {
                        conflicts += 1;
                    }
                    if step >= 1
                        && path1[step] != path1[step - 1]
                        && path1[step] == path2[step - 1]
                        && path1[step - 1] == path2[step]
                    {
                        conflicts += 1;
                    }
                }
            }
        }
        conflicts
    }

    pub fn get_agent_location(&self, agent_id: usize) -> Option<usize> {
        self.agents.get(agent_id).map(|a| a.current_location)
    }

    pub fn get_agent_status(&self, agent_id: usize) -> Option<AgentStatus> {
        self.agents.get(agent_id).map(|a| a.status)
    }

    pub fn get_agent_goal(&self, agent_id: usize) -> Option<usize> {
        self.agents.get(agent_id).and_then(|a| a.current_goal)
    }

    pub fn is_agent_at_goal(&self, agent_id: usize) -> bool {
        self.agents
            .get(agent_id)
            .is_some_and(|a| a.current_goal == Some(a.current_location))
    }

    pub fn get_agent_path(&self, agent_id: usize) -> Option<&Path> {
        self.agents.get(agent_id).map(|a| &a.current_path)
    }

    pub fn get_idle_agents(&self) -> Vec<usize> {
        self.agents
            .iter()
            .filter(|a| a.is_idle())
            .map(|a| a.id)
            .collect()
    }

    pub fn get_moving_agents(&self) -> Vec<usize> {
        self.agents
            .iter()
            .filter(|a| a.is_moving())
            .map(|a| a.id)
            .collect()
    }

    /// Sum of the costs of every committed path so far.
    pub fn get_total_cost(&self) -> f64 {
        self.total_cost
    }

    pub fn get_num_conflicts(&self) -> usize {
        self.total_conflicts
    }

    pub fn path_table(&self) -> &PathTable {
        &self.path_table
    }

    /// Every path ever committed, in commit order. Survives arrival, unlike
    /// `get_agent_path`, whose reservation is consumed when the agent parks.
    pub fn committed_paths(&self) -> &[(usize, Path)] {
        &self.committed_paths
    }

    pub fn stats(&self) -> SimulationStats {
        SimulationStats {
            num_agents: self.agents.len(),
            replan_algo: self.replan_algo.to_string(),
            total_cost: self.total_cost,
            total_conflicts: self.total_conflicts,
            updates: self.updates,
        }
    }

    pub fn write_stats_to_file(&self, path: &str) -> anyhow::Result<()> {
        self.stats().write_to_file(path)
    }
}
