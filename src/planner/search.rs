use std::collections::BTreeSet;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;
use tracing::{debug, instrument, trace};

use super::node::{FocalKey, NodeArena, NodeId, OpenKey, SearchNode, StateKey};
use crate::constraint::ConstraintTable;
use crate::map::{GridMap, Orientation, Path, PathEntry, MAX_TIMESTEP};

/// Which frontier discipline a search run uses. Both variants share the
/// expansion loop; they differ in how the frontier is kept and when a goal
/// state terminates the search.
#[derive(Debug, Clone, Copy)]
enum SearchMode {
    /// FOCAL only, ordered by conflicts: returns a path that minimizes
    /// collisions with the conflict-avoidance table, breaking ties by length.
    ConflictMinimizing,
    /// OPEN + FOCAL bounded-suboptimal search with factor w >= 1.
    Bounded(f64),
}

/// Time-space best-first search for one agent. Owns the heuristic cache for
/// the agent's current goal and a seedable RNG that settles ordering ties.
pub struct SpaceTimePlanner {
    map: Arc<GridMap>,
    pub start_location: usize,
    pub goal_location: usize,
    heuristic: Vec<usize>,
    rng: StdRng,
    /// Conflicts carried by the most recently returned path.
    pub num_collisions: usize,
    pub num_expanded: u64,
    pub num_generated: u64,
    pub num_reopened: u64,
    pub accumulated_expanded: u64,
    pub accumulated_generated: u64,
    pub accumulated_reopened: u64,
    pub num_runs: u64,
}

impl SpaceTimePlanner {
    pub fn new(map: Arc<GridMap>, start_location: usize, goal_location: usize) -> Self {
        Self::from_rng(map, start_location, goal_location, StdRng::from_entropy())
    }

    /// Deterministic construction for tests and reproducible runs.
    pub fn with_seed(
        map: Arc<GridMap>,
        start_location: usize,
        goal_location: usize,
        seed: u64,
    ) -> Self {
        Self::from_rng(map, start_location, goal_location, StdRng::seed_from_u64(seed))
    }

    fn from_rng(map: Arc<GridMap>, start_location: usize, goal_location: usize, rng: StdRng) -> Self {
        let heuristic = map.compute_goal_heuristic(goal_location);
        SpaceTimePlanner {
            map,
            start_location,
            goal_location,
            heuristic,
            rng,
            num_collisions: 0,
            num_expanded: 0,
            num_generated: 0,
            num_reopened: 0,
            accumulated_expanded: 0,
            accumulated_generated: 0,
            accumulated_reopened: 0,
            num_runs: 0,
        }
    }

    pub fn set_start(&mut self, start_location: usize) {
        self.start_location = start_location;
    }

    /// Changing the goal invalidates and recomputes the heuristic cache.
    pub fn set_goal(&mut self, goal_location: usize) {
        if goal_location != self.goal_location {
            self.goal_location = goal_location;
            self.heuristic = self.map.compute_goal_heuristic(goal_location);
        }
    }

    /// Admissible estimate between two arbitrary cells: the larger of the
    /// differential heuristic over the goal landmark and Manhattan distance.
    pub fn compute_heuristic(&self, from: usize, to: usize) -> usize {
        let manhattan = self.map.manhattan_distance(from, to);
        if self.heuristic[from] >= MAX_TIMESTEP || self.heuristic[to] >= MAX_TIMESTEP {
            return manhattan;
        }
        self.heuristic[from].abs_diff(self.heuristic[to]).max(manhattan)
    }

    fn reset(&mut self) {
        if self.num_generated > 0 {
            self.accumulated_expanded += self.num_expanded;
            self.accumulated_generated += self.num_generated;
            self.accumulated_reopened += self.num_reopened;
            self.num_runs += 1;
        }
        self.num_expanded = 0;
        self.num_generated = 0;
        self.num_reopened = 0;
    }

    /// Finds a path that satisfies the hard constraints while minimizing
    /// collisions with the conflict-avoidance layer, breaking ties by length.
    /// `None` means no path exists within the table's length bounds.
    #[instrument(skip_all, name = "find_path", fields(start = self.start_location, goal = self.goal_location), level = "debug")]
    pub fn find_path(&mut self, constraint_table: &ConstraintTable) -> Option<Path> {
        self.search(constraint_table, SearchMode::ConflictMinimizing)
            .map(|(path, _)| path)
    }

    /// Bounded-suboptimal search: the returned path is at most `w` times the
    /// optimum under the same constraints. Also returns the final lower bound
    /// on the optimal cost (the largest min-f observed).
    #[instrument(skip_all, name = "find_suboptimal_path", fields(start = self.start_location, goal = self.goal_location, w = w), level = "debug")]
    pub fn find_suboptimal_path(
        &mut self,
        constraint_table: &ConstraintTable,
        w: f64,
    ) -> Option<(Path, usize)> {
        self.search(constraint_table, SearchMode::Bounded(w))
    }

    fn search(
        &mut self,
        ct: &ConstraintTable,
        mode: SearchMode,
    ) -> Option<(Path, usize)> {
        self.reset();
        let goal = self.goal_location;
        let (use_open, w) = match mode {
            SearchMode::ConflictMinimizing => (false, 1.0),
            SearchMode::Bounded(w) => (true, w),
        };

        if self.heuristic[self.start_location] >= MAX_TIMESTEP {
            debug!("goal unreachable from start");
            return None;
        }
        if ct.constrained(self.start_location, Orientation::North, 0) {
            debug!("start is constrained at timestep 0");
            return None;
        }

        let holding_time = ct.get_holding_time(goal, Orientation::North, ct.length_min);
        if holding_time >= MAX_TIMESTEP {
            debug!("goal can never be held");
            return None;
        }
        // Beyond this timestep nothing recorded in the tables changes, so
        // waiting is pointless and the search degrades to space-only A*.
        let static_timestep = ct.get_max_timestep() + 1;
        let last_target_collision = ct.get_last_collision_timestep(goal, Orientation::North);

        let mut arena = NodeArena::default();
        let mut open: BTreeSet<OpenKey> = BTreeSet::new();
        let mut focal: BTreeSet<FocalKey> = BTreeSet::new();
        let mut nodes: FxHashMap<StateKey, NodeId> = FxHashMap::default();

        let start_h = match mode {
            SearchMode::ConflictMinimizing => self.heuristic[self.start_location]
                .max(holding_time)
                .max(last_target_collision.map_or(0, |t| t + 1)),
            SearchMode::Bounded(_) => self.heuristic[self.start_location].max(holding_time),
        };
        let start = SearchNode {
            location: self.start_location,
            orientation: Orientation::North,
            g: 0,
            h: start_h,
            timestep: 0,
            num_of_conflicts: 0,
            parent: None,
            wait_at_goal: false,
            is_goal: false,
            in_open: true,
            tie: self.rng.gen(),
        };
        let mut min_f_val = start.f();
        let start_id = arena.push(start);
        nodes.insert(StateKey::of(&arena[start_id]), start_id);
        if use_open {
            open.insert(OpenKey::of(start_id, &arena[start_id]));
        }
        focal.insert(FocalKey::of(start_id, &arena[start_id]));
        self.num_generated += 1;

        loop {
            let curr_id = if use_open {
                let head_f = match open.first() {
                    Some(head) => head.f,
                    None => break,
                };
                // min f increased: pull newly qualifying nodes into FOCAL.
                if head_f > min_f_val {
                    for key in open.iter() {
                        if key.f as f64 > w * min_f_val as f64
                            && key.f as f64 <= w * head_f as f64
                        {
                            focal.insert(FocalKey::of(key.id, &arena[key.id]));
                        }
                    }
                    min_f_val = head_f;
                }
                let fk = *focal.first().expect("focal empty while open is not");
                focal.remove(&fk);
                open.remove(&OpenKey::of(fk.id, &arena[fk.id]));
                fk.id
            } else {
                match focal.pop_first() {
                    Some(fk) => fk.id,
                    None => break,
                }
            };
            arena[curr_id].in_open = false;
            self.num_expanded += 1;
            let curr = arena[curr_id].clone();
            trace!("expand {curr:?}");

            match mode {
                SearchMode::ConflictMinimizing => {
                    if curr.is_goal {
                        self.num_collisions = curr.num_of_conflicts;
                        return Some((build_path(&arena, curr_id), min_f_val));
                    }
                    if curr.location == goal && !curr.wait_at_goal && curr.timestep >= holding_time
                    {
                        let future = ct.get_future_num_of_collisions(
                            goal,
                            curr.orientation,
                            curr.timestep,
                        );
                        if future == 0 {
                            self.num_collisions = curr.num_of_conflicts;
                            return Some((build_path(&arena, curr_id), min_f_val));
                        }
                        // Staying here costs `future` collisions; record that
                        // as a synthetic goal state so cleaner arrivals can
                        // still win.
                        let mut goal_node = curr.clone();
                        goal_node.is_goal = true;
                        goal_node.parent = Some(curr_id);
                        goal_node.num_of_conflicts += future;
                        goal_node.h = 0;
                        goal_node.in_open = true;
                        goal_node.tie = self.rng.gen();
                        let key = StateKey::of(&goal_node);
                        match nodes.get(&key).copied() {
                            None => {
                                let id = arena.push(goal_node);
                                nodes.insert(key, id);
                                focal.insert(FocalKey::of(id, &arena[id]));
                                self.num_generated += 1;
                            }
                            Some(id) => {
                                let existing = &arena[id];
                                if (goal_node.num_of_conflicts, goal_node.f())
                                    < (existing.num_of_conflicts, existing.f())
                                {
                                    if existing.in_open {
                                        focal.remove(&FocalKey::of(id, existing));
                                    } else {
                                        self.num_reopened += 1;
                                    }
                                    arena[id] = goal_node;
                                    focal.insert(FocalKey::of(id, &arena[id]));
                                    self.num_generated += 1;
                                }
                            }
                        }
                    }
                }
                SearchMode::Bounded(_) => {
                    if curr.location == goal && !curr.wait_at_goal && curr.timestep >= holding_time
                    {
                        self.num_collisions = curr.num_of_conflicts;
                        return Some((build_path(&arena, curr_id), min_f_val));
                    }
                }
            }

            if curr.timestep >= ct.length_max {
                continue;
            }

            for next in self.map.get_next_states(curr.location, curr.orientation) {
                let mut next_timestep = curr.timestep + 1;
                if static_timestep < next_timestep {
                    if next.location == curr.location && next.orientation == curr.orientation {
                        continue;
                    }
                    next_timestep -= 1;
                }

                if ct.constrained(next.location, next.orientation, next_timestep)
                    || ct.constrained_edge(
                        curr.location,
                        curr.orientation,
                        next.location,
                        next.orientation,
                        next_timestep,
                    )
                {
                    continue;
                }

                let next_g = curr.g + 1;
                let base_h = self.heuristic[next.location];
                if base_h >= MAX_TIMESTEP {
                    continue;
                }
                let num_of_conflicts = curr.num_of_conflicts
                    + ct.get_num_of_conflicts_for_step(
                        curr.location,
                        curr.orientation,
                        next.location,
                        next.orientation,
                        next_timestep,
                    );
                // Path-max keeps f monotone along the tree.
                let next_h = match mode {
                    SearchMode::ConflictMinimizing => {
                        if num_of_conflicts == 0 {
                            base_h.max(curr.f().saturating_sub(next_g))
                        } else {
                            base_h.max(holding_time.saturating_sub(next_g))
                        }
                    }
                    SearchMode::Bounded(_) => base_h.max(holding_time.saturating_sub(next_g)),
                };
                if next_g + next_h > ct.length_max {
                    continue;
                }

                let wait_at_goal = next.location == goal
                    && curr.location == goal
                    && next.orientation == curr.orientation;
                let cand = SearchNode {
                    location: next.location,
                    orientation: next.orientation,
                    g: next_g,
                    h: next_h,
                    timestep: next_timestep,
                    num_of_conflicts,
                    parent: Some(curr_id),
                    wait_at_goal,
                    is_goal: false,
                    in_open: true,
                    tie: self.rng.gen(),
                };
                let key = StateKey::of(&cand);
                match nodes.get(&key).copied() {
                    None => {
                        let id = arena.push(cand);
                        nodes.insert(key, id);
                        if use_open {
                            open.insert(OpenKey::of(id, &arena[id]));
                            if arena[id].f() as f64 <= w * min_f_val as f64 {
                                focal.insert(FocalKey::of(id, &arena[id]));
                            }
                        } else {
                            focal.insert(FocalKey::of(id, &arena[id]));
                        }
                        self.num_generated += 1;
                    }
                    Some(id) => {
                        let existing = &arena[id];
                        let improves = match mode {
                            SearchMode::ConflictMinimizing => {
                                (cand.num_of_conflicts, cand.f())
                                    < (existing.num_of_conflicts, existing.f())
                            }
                            SearchMode::Bounded(_) => {
                                cand.f() < existing.f()
                                    || (cand.f() == existing.f()
                                        && cand.num_of_conflicts < existing.num_of_conflicts)
                            }
                        };
                        if !improves {
                            continue;
                        }
                        if existing.in_open {
                            if use_open {
                                open.remove(&OpenKey::of(id, existing));
                            }
                            // Absent when the stale f never qualified; remove
                            // is a no-op then.
                            focal.remove(&FocalKey::of(id, existing));
                        } else {
                            self.num_reopened += 1;
                        }
                        arena[id] = cand;
                        if use_open {
                            open.insert(OpenKey::of(id, &arena[id]));
                            if arena[id].f() as f64 <= w * min_f_val as f64 {
                                focal.insert(FocalKey::of(id, &arena[id]));
                            }
                        } else {
                            focal.insert(FocalKey::of(id, &arena[id]));
                        }
                        self.num_generated += 1;
                    }
                }
            }
        }

        debug!("no path within bounds");
        None
    }

    /// Plain time-aware A* between two cells, used as a travel-time probe.
    /// Returns the first g reaching `end`, or MAX_TIMESTEP when `end` is not
    /// reachable under `upper_bound`.
    pub fn get_travel_time(
        &mut self,
        start: usize,
        end: usize,
        constraint_table: &ConstraintTable,
        upper_bound: usize,
    ) -> usize {
        self.reset();
        let static_timestep = constraint_table.get_max_timestep() + 1;

        let mut arena = NodeArena::default();
        let mut open: BTreeSet<OpenKey> = BTreeSet::new();
        let mut nodes: FxHashMap<StateKey, NodeId> = FxHashMap::default();

        let root = SearchNode {
            location: start,
            orientation: Orientation::North,
            g: 0,
            h: self.compute_heuristic(start, end),
            timestep: 0,
            num_of_conflicts: 0,
            parent: None,
            wait_at_goal: false,
            is_goal: false,
            in_open: true,
            tie: self.rng.gen(),
        };
        let root_id = arena.push(root);
        nodes.insert(StateKey::of(&arena[root_id]), root_id);
        open.insert(OpenKey::of(root_id, &arena[root_id]));

        while let Some(key) = open.pop_first() {
            arena[key.id].in_open = false;
            let curr = arena[key.id].clone();
            if curr.location == end {
                return curr.g;
            }
            for next in self.map.get_next_states(curr.location, curr.orientation) {
                let mut next_timestep = curr.timestep + 1;
                if static_timestep < next_timestep {
                    if next.location == curr.location && next.orientation == curr.orientation {
                        continue;
                    }
                    next_timestep -= 1;
                }
                if constraint_table.constrained(next.location, next.orientation, next_timestep)
                    || constraint_table.constrained_edge(
                        curr.location,
                        curr.orientation,
                        next.location,
                        next.orientation,
                        next_timestep,
                    )
                {
                    continue;
                }
                let next_g = curr.g + 1;
                let next_h = self.compute_heuristic(next.location, end);
                if next_g + next_h >= upper_bound {
                    continue;
                }
                let cand = SearchNode {
                    location: next.location,
                    orientation: next.orientation,
                    g: next_g,
                    h: next_h,
                    timestep: next_timestep,
                    num_of_conflicts: 0,
                    parent: None,
                    wait_at_goal: false,
                    is_goal: false,
                    in_open: true,
                    tie: self.rng.gen(),
                };
                let state = StateKey::of(&cand);
                match nodes.get(&state).copied() {
                    None => {
                        let id = arena.push(cand);
                        nodes.insert(state, id);
                        open.insert(OpenKey::of(id, &arena[id]));
                    }
                    Some(id) => {
                        if arena[id].in_open && arena[id].g > next_g {
                            open.remove(&OpenKey::of(id, &arena[id]));
                            arena[id].g = next_g;
                            arena[id].timestep = next_timestep;
                            open.insert(OpenKey::of(id, &arena[id]));
                        }
                    }
                }
            }
        }
        MAX_TIMESTEP
    }
}

fn build_path(arena: &NodeArena, goal_id: NodeId) -> Path {
    let mut curr = &arena[goal_id];
    if curr.is_goal {
        curr = &arena[curr.parent.expect("goal marker without parent")];
    }
    let mut path = Vec::with_capacity(curr.g + 1);
    loop {
        path.push(PathEntry::new(curr.location, curr.orientation));
        match curr.parent {
            Some(parent) => curr = &arena[parent],
            None => break,
        }
    }
    path.reverse();
    path
}
