use std::collections::HashSet;

use crate::map::{Orientation, Path, MAX_TIMESTEP};

/// Spatio-temporal occupancy of committed paths: one slot per
/// (cell, orientation, timestep), at most one agent per slot. `goal_time`
/// records when an agent first reaches and holds a cell as its goal.
///
/// Vertex occupancy looks at every heading row of the destination cell, so
/// two agents in one cell at one timestep collide no matter which way they
/// face. Swap detection and holding times index a single (cell, orientation)
/// row; target conflicts go by location alone.
#[derive(Debug, Clone, Default)]
pub struct PathTable {
    pub makespan: usize,
    table: Vec<[Vec<Option<usize>>; 4]>,
    goal_time: Vec<usize>,
}

impl PathTable {
    pub fn new(map_size: usize) -> Self {
        PathTable {
            makespan: 0,
            table: vec![Default::default(); map_size],
            goal_time: vec![MAX_TIMESTEP; map_size],
        }
    }

    pub fn reset(&mut self) {
        for rows in self.table.iter_mut() {
            for row in rows.iter_mut() {
                row.clear();
            }
        }
        self.goal_time.fill(MAX_TIMESTEP);
        self.makespan = 0;
    }

    pub fn goal_time(&self, cell: usize) -> usize {
        self.goal_time[cell]
    }

    /// Claims every slot along `path` for `agent`. Slots must be empty and
    /// the terminal cell must not already be held as a goal; violating either
    /// is a programming error upstream.
    pub fn insert_path(&mut self, agent: usize, path: &Path) {
        if path.is_empty() {
            return;
        }
        for (t, entry) in path.iter().enumerate() {
            let row = &mut self.table[entry.location][entry.orientation.index()];
            if row.len() <= t {
                row.resize(t + 1, None);
            }
            assert!(
                row[t].is_none(),
                "slot ({}, {:?}, {}) already taken",
                entry.location,
                entry.orientation,
                t
            );
            row[t] = Some(agent);
        }
        let goal = path.last().unwrap().location;
        assert_eq!(self.goal_time[goal], MAX_TIMESTEP);
        self.goal_time[goal] = path.len() - 1;
        self.makespan = self.makespan.max(path.len() - 1);
    }

    /// Exact inverse of `insert_path`.
    pub fn delete_path(&mut self, agent: usize, path: &Path) {
        if path.is_empty() {
            return;
        }
        for (t, entry) in path.iter().enumerate() {
            let row = &mut self.table[entry.location][entry.orientation.index()];
            assert!(
                row.len() > t && row[t] == Some(agent),
                "slot ({}, {:?}, {}) not owned by agent {}",
                entry.location,
                entry.orientation,
                t,
                agent
            );
            row[t] = None;
        }
        self.goal_time[path.last().unwrap().location] = MAX_TIMESTEP;
        if self.makespan == path.len() - 1 {
            self.makespan = self
                .goal_time
                .iter()
                .filter(|&&t| t < MAX_TIMESTEP)
                .max()
                .copied()
                .unwrap_or(0);
        }
    }

    fn occupant_any(&self, cell: usize, timestep: usize) -> Option<usize> {
        self.table[cell]
            .iter()
            .find_map(|row| row.get(timestep).copied().flatten())
    }

    fn occupant_in_row(&self, cell: usize, ori: Orientation, timestep: usize) -> Option<usize> {
        self.table[cell][ori.index()].get(timestep).copied().flatten()
    }

    /// True iff moving into (`to`, `to_ori`) at `to_time` collides with a
    /// committed path: vertex occupancy at the destination (any heading), a
    /// same-row swap with the agent leaving it, or a target hold on the
    /// destination cell.
    pub fn constrained(
        &self,
        from: usize,
        from_ori: Orientation,
        to: usize,
        to_ori: Orientation,
        to_time: usize,
    ) -> bool {
        if from >= self.table.len() || to >= self.table.len() {
            return false;
        }
        if self.occupant_any(to, to_time).is_some() {
            return true; // vertex conflict
        }
        if to_time >= 1 {
            if let Some(agent) = self.occupant_in_row(to, to_ori, to_time - 1) {
                if self.occupant_in_row(from, from_ori, to_time) == Some(agent) {
                    return true; // edge conflict (swap)
                }
            }
        }
        self.goal_time[to] <= to_time // target conflict
    }

    /// Same predicates as `constrained`, collecting the offending agents.
    pub fn get_conflicting_agents(
        &self,
        from: usize,
        from_ori: Orientation,
        to: usize,
        to_ori: Orientation,
        to_time: usize,
        conflicting: &mut HashSet<usize>,
    ) {
        if from >= self.table.len() || to >= self.table.len() {
            return;
        }
        if let Some(agent) = self.occupant_any(to, to_time) {
            conflicting.insert(agent);
        }
        if to_time >= 1 {
            if let Some(agent) = self.occupant_in_row(to, to_ori, to_time - 1) {
                if self.occupant_in_row(from, from_ori, to_time) == Some(agent) {
                    conflicting.insert(agent);
                }
            }
        }
        if self.goal_time[to] <= to_time {
            for row in &self.table[to] {
                if let Some(&Some(agent)) = row.get(self.goal_time[to]) {
                    conflicting.insert(agent);
                }
            }
        }
    }

    /// Every agent that ever occupies (`cell`, `orientation`).
    pub fn get_agents(&self, cell: usize, orientation: Orientation, agents: &mut HashSet<usize>) {
        for slot in &self.table[cell][orientation.index()] {
            if let Some(agent) = slot {
                agents.insert(*agent);
            }
        }
    }

    /// Earliest timestep >= `earliest` from which the (cell, orientation)
    /// row stays unoccupied forever. Goal holds are tracked separately
    /// through `goal_time`.
    pub fn get_holding_time(
        &self,
        cell: usize,
        orientation: Orientation,
        earliest: usize,
    ) -> usize {
        let row = &self.table[cell][orientation.index()];
        if row.len() <= earliest {
            return earliest;
        }
        let mut holding = row.len();
        while holding > earliest && row[holding - 1].is_none() {
            holding -= 1;
        }
        holding
    }

    /// Normalized view for equality checks in tests: occupied slots plus goal
    /// times and makespan, independent of internal buffer sizes.
    #[cfg(test)]
    pub(crate) fn snapshot(&self) -> (Vec<(usize, usize, usize, usize)>, Vec<usize>, usize) {
        let mut slots = Vec::new();
        for (cell, rows) in self.table.iter().enumerate() {
            for (ori, row) in rows.iter().enumerate() {
                for (t, slot) in row.iter().enumerate() {
                    if let Some(agent) = slot {
                        slots.push((cell, ori, t, *agent));
                    }
                }
            }
        }
        slots.sort_unstable();
        (slots, self.goal_time.clone(), self.makespan)
    }
}

/// Path table that tolerates overlaps: each slot holds every agent whose
/// path crosses it. Used as a conflict-avoidance source by searches that
/// minimize collisions instead of forbidding them. Paths are retained per
/// agent so they can be re-inserted or deleted without being re-supplied.
#[derive(Debug, Clone, Default)]
pub struct PathTableWC {
    pub makespan: usize,
    table: Vec<[Vec<Vec<usize>>; 4]>,
    goal_time: Vec<usize>,
    paths: Vec<Option<Path>>,
}

impl PathTableWC {
    pub fn new(map_size: usize, num_agents: usize) -> Self {
        PathTableWC {
            makespan: 0,
            table: vec![Default::default(); map_size],
            goal_time: vec![MAX_TIMESTEP; map_size],
            paths: vec![None; num_agents],
        }
    }

    pub fn get_path(&self, agent: usize) -> Option<&Path> {
        self.paths.get(agent).and_then(|p| p.as_ref())
    }

    pub fn goal_time(&self, cell: usize) -> usize {
        self.goal_time[cell]
    }

    pub fn insert_path(&mut self, agent: usize, path: Path) {
        if agent >= self.paths.len() {
            self.paths.resize(agent + 1, None);
        }
        self.paths[agent] = Some(path);
        self.reinsert_path(agent);
    }

    /// Re-inserts the retained path of `agent`.
    pub fn reinsert_path(&mut self, agent: usize) {
        let path = self.paths[agent].clone().expect("no retained path");
        if path.is_empty() {
            return;
        }
        for (t, entry) in path.iter().enumerate() {
            let row = &mut self.table[entry.location][entry.orientation.index()];
            if row.len() <= t {
                row.resize(t + 1, Vec::new());
            }
            row[t].push(agent);
        }
        let goal = path.last().unwrap().location;
        assert_eq!(self.goal_time[goal], MAX_TIMESTEP);
        self.goal_time[goal] = path.len() - 1;
        self.makespan = self.makespan.max(path.len() - 1);
    }

    pub fn delete_path(&mut self, agent: usize) {
        let path = self.paths[agent].clone().expect("no retained path");
        if path.is_empty() {
            return;
        }
        for (t, entry) in path.iter().enumerate() {
            let row = &mut self.table[entry.location][entry.orientation.index()];
            debug_assert!(row.len() > t && row[t].contains(&agent));
            row[t].retain(|&a| a != agent);
        }
        self.goal_time[path.last().unwrap().location] = MAX_TIMESTEP;
        if self.makespan == path.len() - 1 {
            self.makespan = self
                .goal_time
                .iter()
                .filter(|&&t| t < MAX_TIMESTEP)
                .max()
                .copied()
                .unwrap_or(0);
        }
    }

    pub fn clear(&mut self) {
        self.table.clear();
        self.goal_time.clear();
        self.paths.clear();
        self.makespan = 0;
    }

    fn occupants_at(
        &self,
        cell: usize,
        ori: Orientation,
        timestep: usize,
    ) -> impl Iterator<Item = usize> + '_ {
        self.table[cell][ori.index()]
            .get(timestep)
            .into_iter()
            .flatten()
            .copied()
    }

    /// Vertex collisions in the destination row, swap pairs on the traversed
    /// edge, plus one if the destination is target-held.
    pub fn get_num_of_collisions(
        &self,
        from: usize,
        from_ori: Orientation,
        to: usize,
        to_ori: Orientation,
        to_time: usize,
    ) -> usize {
        let mut count = self.occupants_at(to, to_ori, to_time).count();
        if from != to && to_time >= 1 {
            for leaving in self.occupants_at(to, to_ori, to_time - 1) {
                count += self
                    .occupants_at(from, from_ori, to_time)
                    .filter(|&entering| entering == leaving)
                    .count();
            }
        }
        if self.goal_time[to] <= to_time {
            count += 1;
        }
        count
    }

    pub fn has_collisions(
        &self,
        from: usize,
        from_ori: Orientation,
        to: usize,
        to_ori: Orientation,
        to_time: usize,
    ) -> bool {
        self.occupants_at(to, to_ori, to_time).next().is_some()
            || self.has_edge_collisions(from, from_ori, to, to_ori, to_time)
            || self.goal_time[to] <= to_time
    }

    pub fn has_edge_collisions(
        &self,
        from: usize,
        from_ori: Orientation,
        to: usize,
        to_ori: Orientation,
        to_time: usize,
    ) -> bool {
        if from == to || to_time == 0 {
            return false;
        }
        self.occupants_at(to, to_ori, to_time - 1)
            .any(|leaving| self.occupants_at(from, from_ori, to_time).any(|e| e == leaving))
    }

    /// Sum of occupancies of the (`cell`, `orientation`) row strictly after
    /// `timestep`.
    pub fn get_future_num_of_collisions(
        &self,
        cell: usize,
        orientation: Orientation,
        timestep: usize,
    ) -> usize {
        debug_assert_eq!(self.goal_time[cell], MAX_TIMESTEP);
        let row = &self.table[cell][orientation.index()];
        (timestep + 1..row.len()).map(|t| row[t].len()).sum()
    }

    pub fn get_last_collision_timestep(
        &self,
        cell: usize,
        orientation: Orientation,
    ) -> Option<usize> {
        let row = &self.table[cell][orientation.index()];
        (0..row.len()).rev().find(|&t| !row[t].is_empty())
    }

    /// First agent occupying the (`cell`, `orientation`) row at any timestep
    /// up to `latest`.
    pub fn get_agent_with_target(
        &self,
        cell: usize,
        orientation: Orientation,
        latest: usize,
    ) -> Option<usize> {
        let row = &self.table[cell][orientation.index()];
        (0..row.len().min(latest + 1)).find_map(|t| row[t].first().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::{GridMap, PathEntry};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn entry(location: usize) -> PathEntry {
        PathEntry::new(location, Orientation::North)
    }

    fn east_path(map: &GridMap, row: usize, len: usize) -> Path {
        (0..len)
            .map(|t| PathEntry::new(map.linearize(row, t), Orientation::East))
            .collect()
    }

    #[test]
    fn test_insert_then_query_slots() {
        let map = GridMap::new(4, 6, vec![false; 24]);
        let mut table = PathTable::new(map.size());
        let path = east_path(&map, 0, 4);
        table.insert_path(7, &path);

        assert_eq!(table.makespan, 3);
        assert_eq!(table.goal_time(map.linearize(0, 3)), 3);
        assert_eq!(table.goal_time(map.linearize(0, 0)), MAX_TIMESTEP);

        // Vertex conflict on cell 1 at t=1 regardless of the mover's heading.
        assert!(table.constrained(0, Orientation::North, 1, Orientation::North, 1));
        assert!(table.constrained(0, Orientation::East, 1, Orientation::East, 1));
        assert!(!table.constrained(0, Orientation::North, 1, Orientation::North, 2));
        // Target conflict on the terminal cell from its holding time onward.
        assert!(table.constrained(2, Orientation::East, 3, Orientation::East, 3));
        assert!(table.constrained(2, Orientation::East, 3, Orientation::East, 100));
        assert!(!table.constrained(2, Orientation::East, 3, Orientation::East, 2));
    }

    #[test]
    fn test_swap_is_edge_constrained() {
        let map = GridMap::new(1, 4, vec![false; 4]);
        let mut table = PathTable::new(map.size());
        table.insert_path(0, &east_path(&map, 0, 3));

        // Agent 0 moves 1 -> 2 between t=1 and t=2; reversing that edge in
        // the same heading row swaps with it.
        assert!(table.constrained(2, Orientation::East, 1, Orientation::East, 2));
        // The swap check is row-indexed, so a westbound traversal reads
        // different rows and passes.
        assert!(!table.constrained(2, Orientation::West, 1, Orientation::West, 2));
        // Following one step behind is fine.
        assert!(!table.constrained(0, Orientation::East, 1, Orientation::East, 2));
    }

    #[test]
    fn test_conflicting_agents_collected() {
        let map = GridMap::new(2, 4, vec![false; 8]);
        let mut table = PathTable::new(map.size());
        table.insert_path(3, &east_path(&map, 0, 3));

        let mut agents = HashSet::new();
        table.get_conflicting_agents(0, Orientation::North, 1, Orientation::North, 1, &mut agents);
        assert_eq!(agents, HashSet::from([3]));

        let mut held = HashSet::new();
        table.get_agents(map.linearize(0, 1), Orientation::East, &mut held);
        assert_eq!(held, HashSet::from([3]));
    }

    #[test]
    fn test_holding_time_after_transient_occupation() {
        let map = GridMap::new(3, 3, vec![false; 9]);
        let mut table = PathTable::new(map.size());
        // Agent 5 waits on cell 4 through t=10, then steps off to cell 1.
        let mut path: Path = (0..=10).map(|_| entry(4)).collect();
        path.push(PathEntry::new(1, Orientation::North));
        table.insert_path(5, &path);

        assert_eq!(table.get_holding_time(4, Orientation::North, 0), 11);
        assert_eq!(table.get_holding_time(4, Orientation::North, 20), 20);
        // Holding times are per heading row.
        assert_eq!(table.get_holding_time(4, Orientation::East, 0), 0);
        assert_eq!(table.get_holding_time(7, Orientation::North, 0), 0);
    }

    #[test]
    fn test_delete_restores_prior_state() {
        let map = GridMap::new(4, 6, vec![false; 24]);
        let mut table = PathTable::new(map.size());
        let first = east_path(&map, 0, 5);
        table.insert_path(0, &first);
        let before = table.snapshot();

        let second = east_path(&map, 1, 3);
        table.insert_path(1, &second);
        table.delete_path(1, &second);

        assert_eq!(table.snapshot(), before);
        assert_eq!(table.makespan, 4);
    }

    #[test]
    fn test_reverse_deletion_empties_table() {
        let map = GridMap::new(10, 12, vec![false; 120]);
        let mut table = PathTable::new(map.size());
        let empty = table.snapshot();

        let mut rng = StdRng::from_seed([7u8; 32]);
        let paths: Vec<Path> = (0..10)
            .map(|row| east_path(&map, row, rng.gen_range(2..=12)))
            .collect();
        for (agent, path) in paths.iter().enumerate() {
            table.insert_path(agent, path);
        }

        // Every slot of every path is attributed to exactly its owner.
        let (slots, _, _) = table.snapshot();
        let expected: usize = paths.iter().map(|p| p.len()).sum();
        assert_eq!(slots.len(), expected);

        for (agent, path) in paths.iter().enumerate().rev() {
            table.delete_path(agent, path);
        }
        assert_eq!(table.snapshot(), empty);
    }

    #[test]
    fn test_wc_counts_vertex_edge_and_target() {
        let map = GridMap::new(1, 4, vec![false; 4]);
        let mut table = PathTableWC::new(map.size(), 2);
        table.insert_path(0, east_path(&map, 0, 3));

        // Stepping onto cell 1 at t=1 meets agent 0 in its own heading row.
        assert_eq!(
            table.get_num_of_collisions(0, Orientation::East, 1, Orientation::East, 1),
            1
        );
        assert_eq!(
            table.get_num_of_collisions(0, Orientation::North, 1, Orientation::North, 1),
            0
        );
        // Swap across the (1,2) edge within the eastbound row; the check is
        // row-indexed, so the westbound rows stay clean.
        assert!(table.has_edge_collisions(2, Orientation::East, 1, Orientation::East, 2));
        assert!(!table.has_edge_collisions(2, Orientation::West, 1, Orientation::West, 2));
        assert_eq!(
            table.get_num_of_collisions(2, Orientation::East, 1, Orientation::East, 2),
            1
        );
        // Target hold on the terminal cell.
        assert_eq!(
            table.get_num_of_collisions(3, Orientation::East, 2, Orientation::East, 9),
            1
        );
        assert!(table.has_collisions(3, Orientation::East, 2, Orientation::East, 9));
    }

    #[test]
    fn test_wc_future_and_last_collisions() {
        let map = GridMap::new(3, 3, vec![false; 9]);
        let mut table = PathTableWC::new(map.size(), 3);
        // Two agents cross cell 4 at t=2 and t=5.
        table.insert_path(
            0,
            vec![entry(3), entry(3), entry(4), entry(5), entry(5), entry(5), entry(2)],
        );
        table.insert_path(1, vec![entry(7), entry(7), entry(7), entry(7), entry(7), entry(4), entry(1)]);

        assert_eq!(
            table.get_future_num_of_collisions(4, Orientation::North, 0),
            2
        );
        assert_eq!(
            table.get_future_num_of_collisions(4, Orientation::North, 2),
            1
        );
        assert_eq!(
            table.get_last_collision_timestep(4, Orientation::North),
            Some(5)
        );
        assert_eq!(table.get_last_collision_timestep(8, Orientation::North), None);
        assert_eq!(
            table.get_agent_with_target(4, Orientation::North, 10),
            Some(0)
        );
    }

    #[test]
    fn test_wc_delete_by_agent_id() {
        let map = GridMap::new(2, 4, vec![false; 8]);
        let mut table = PathTableWC::new(map.size(), 2);
        table.insert_path(0, east_path(&map, 0, 4));
        table.insert_path(1, east_path(&map, 1, 2));
        assert_eq!(table.makespan, 3);

        table.delete_path(0);
        assert_eq!(table.makespan, 1);
        assert_eq!(
            table.get_num_of_collisions(0, Orientation::East, 1, Orientation::East, 1),
            0
        );
        assert!(table.get_path(0).is_some());

        table.reinsert_path(0);
        assert_eq!(table.makespan, 3);
        assert_eq!(
            table.get_num_of_collisions(0, Orientation::East, 1, Orientation::East, 1),
            1
        );
    }
}
