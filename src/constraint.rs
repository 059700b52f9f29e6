use std::collections::HashSet;

use tracing::debug;

use crate::map::{Orientation, MAX_TIMESTEP};
use crate::path_table::{PathTable, PathTableWC};

/// A hard restriction handed down by a higher-level search node.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Ord, PartialOrd)]
pub enum Constraint {
    Vertex {
        cell: usize,
        time_step: usize,
        is_permanent: bool,
    },
    Edge {
        from_cell: usize,
        to_cell: usize,
        to_time_step: usize,
    },
}

impl Constraint {
    pub fn is_violated(&self, from_cell: usize, to_cell: usize, to_time_step: usize) -> bool {
        match self {
            Constraint::Vertex {
                cell,
                time_step,
                is_permanent,
            } => {
                if to_cell != *cell {
                    return false;
                }
                if *is_permanent {
                    to_time_step >= *time_step
                } else {
                    to_time_step == *time_step
                }
            }
            Constraint::Edge {
                from_cell: from,
                to_cell: to,
                to_time_step: time,
            } => from_cell == *from && to_cell == *to && to_time_step == *time,
        }
    }

    fn latest_time_step(&self) -> usize {
        match self {
            Constraint::Vertex { time_step, .. } => *time_step,
            Constraint::Edge { to_time_step, .. } => *to_time_step,
        }
    }
}

/// Combined view the single-agent planner searches against: hard constraints
/// plus length bounds, a strict path table whose occupancy is also hard, and
/// an optional with-collisions table consulted only for conflict counts.
#[derive(Debug, Clone)]
pub struct ConstraintTable<'a> {
    constraints: HashSet<Constraint>,
    pub length_min: usize,
    pub length_max: usize,
    path_table: Option<&'a PathTable>,
    cat: Option<&'a PathTableWC>,
}

impl<'a> ConstraintTable<'a> {
    pub fn new(path_table: Option<&'a PathTable>, cat: Option<&'a PathTableWC>) -> Self {
        ConstraintTable {
            constraints: HashSet::new(),
            length_min: 0,
            length_max: MAX_TIMESTEP,
            path_table,
            cat,
        }
    }

    pub fn insert(&mut self, constraint: Constraint) {
        debug!("add constraint: {constraint:?}");
        self.constraints.insert(constraint);
    }

    pub fn extend<I: IntoIterator<Item = Constraint>>(&mut self, constraints: I) {
        for constraint in constraints {
            self.insert(constraint);
        }
    }

    /// Vertex predicate: may the agent occupy (`cell`, `ori`) at `time_step`?
    pub fn constrained(&self, cell: usize, ori: Orientation, time_step: usize) -> bool {
        if self
            .constraints
            .iter()
            .any(|c| c.is_violated(cell, cell, time_step))
        {
            return true;
        }
        self.path_table
            .is_some_and(|table| table.constrained(cell, ori, cell, ori, time_step))
    }

    /// Edge predicate: may the agent move (`from`)@t-1 -> (`to`)@t?
    pub fn constrained_edge(
        &self,
        from: usize,
        from_ori: Orientation,
        to: usize,
        to_ori: Orientation,
        to_time: usize,
    ) -> bool {
        if self
            .constraints
            .iter()
            .any(|c| c.is_violated(from, to, to_time))
        {
            return true;
        }
        self.path_table
            .is_some_and(|table| table.constrained(from, from_ori, to, to_ori, to_time))
    }

    /// Earliest timestep >= `earliest` from which (`cell`, `ori`) can be held
    /// indefinitely against both the hard constraints and the path tables.
    pub fn get_holding_time(&self, cell: usize, ori: Orientation, earliest: usize) -> usize {
        let mut holding = earliest;
        if let Some(table) = self.path_table {
            holding = holding.max(table.get_holding_time(cell, ori, earliest));
        }
        for constraint in &self.constraints {
            match constraint {
                Constraint::Vertex {
                    cell: c,
                    time_step,
                    is_permanent,
                } if *c == cell => {
                    if *is_permanent {
                        return MAX_TIMESTEP;
                    }
                    holding = holding.max(time_step + 1);
                }
                _ => {}
            }
        }
        holding
    }

    /// Number of soft collisions a proposed step incurs; zero without a
    /// conflict-avoidance table.
    pub fn get_num_of_conflicts_for_step(
        &self,
        from: usize,
        from_ori: Orientation,
        to: usize,
        to_ori: Orientation,
        to_time: usize,
    ) -> usize {
        self.cat
            .map_or(0, |cat| cat.get_num_of_collisions(from, from_ori, to, to_ori, to_time))
    }

    /// Soft collisions a stay at `cell` would accumulate strictly after
    /// `timestep`; zero without a conflict-avoidance table.
    pub fn get_future_num_of_collisions(
        &self,
        cell: usize,
        ori: Orientation,
        timestep: usize,
    ) -> usize {
        self.cat
            .map_or(0, |cat| cat.get_future_num_of_collisions(cell, ori, timestep))
    }

    pub fn get_last_collision_timestep(&self, cell: usize, ori: Orientation) -> Option<usize> {
        self.cat
            .and_then(|cat| cat.get_last_collision_timestep(cell, ori))
    }

    /// Latest timestep at which anything recorded here can still change.
    pub fn get_max_timestep(&self) -> usize {
        let mut latest = self.length_min;
        if self.length_max < MAX_TIMESTEP {
            latest = latest.max(self.length_max);
        }
        if let Some(table) = self.path_table {
            latest = latest.max(table.makespan);
        }
        if let Some(cat) = self.cat {
            latest = latest.max(cat.makespan);
        }
        for constraint in &self.constraints {
            let t = constraint.latest_time_step();
            if t < MAX_TIMESTEP {
                latest = latest.max(t);
            }
        }
        latest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::{GridMap, Path, PathEntry};

    #[test]
    fn test_constraint_violation() {
        let transient = Constraint::Vertex {
            cell: 0,
            time_step: 1,
            is_permanent: false,
        };
        assert!(transient.is_violated(1, 0, 1));
        assert!(!transient.is_violated(0, 1, 1));
        assert!(!transient.is_violated(1, 0, 2));

        let permanent = Constraint::Vertex {
            cell: 0,
            time_step: 5,
            is_permanent: true,
        };
        assert!(permanent.is_violated(1, 0, 5));
        assert!(permanent.is_violated(1, 0, 6));
        assert!(!permanent.is_violated(1, 0, 4));

        let edge = Constraint::Edge {
            from_cell: 0,
            to_cell: 1,
            to_time_step: 2,
        };
        assert!(edge.is_violated(0, 1, 2));
        assert!(!edge.is_violated(1, 0, 2));
        assert!(!edge.is_violated(0, 1, 1));
    }

    fn corridor_path(map: &GridMap, len: usize) -> Path {
        (0..len)
            .map(|col| PathEntry::new(map.linearize(0, col), Orientation::East))
            .collect()
    }

    #[test]
    fn test_combined_predicates_over_path_table() {
        let map = GridMap::new(1, 5, vec![false; 5]);
        let mut table = PathTable::new(map.size());
        table.insert_path(0, &corridor_path(&map, 3));

        let mut ct = ConstraintTable::new(Some(&table), None);
        ct.insert(Constraint::Vertex {
            cell: 4,
            time_step: 1,
            is_permanent: false,
        });

        // From the hard set.
        assert!(ct.constrained(4, Orientation::North, 1));
        assert!(!ct.constrained(4, Orientation::North, 2));
        // From the path table: occupancy (any heading), same-row swap, and
        // target hold.
        assert!(ct.constrained(1, Orientation::North, 1));
        assert!(ct.constrained_edge(2, Orientation::East, 1, Orientation::East, 2));
        assert!(!ct.constrained_edge(2, Orientation::West, 1, Orientation::West, 2));
        assert!(ct.constrained(2, Orientation::North, 7));
        assert_eq!(ct.get_max_timestep(), 2);
    }

    #[test]
    fn test_holding_time_combines_sources() {
        let map = GridMap::new(3, 3, vec![false; 9]);
        let mut table = PathTable::new(map.size());
        let mut path: Path = (0..=10)
            .map(|_| PathEntry::new(4, Orientation::North))
            .collect();
        path.push(PathEntry::new(1, Orientation::North));
        table.insert_path(2, &path);

        let mut ct = ConstraintTable::new(Some(&table), None);
        assert_eq!(ct.get_holding_time(4, Orientation::North, 0), 11);

        ct.insert(Constraint::Vertex {
            cell: 4,
            time_step: 13,
            is_permanent: false,
        });
        assert_eq!(ct.get_holding_time(4, Orientation::North, 0), 14);

        ct.insert(Constraint::Vertex {
            cell: 4,
            time_step: 2,
            is_permanent: true,
        });
        assert_eq!(ct.get_holding_time(4, Orientation::North, 0), MAX_TIMESTEP);
    }

    #[test]
    fn test_soft_layer_counts_without_blocking() {
        let map = GridMap::new(1, 5, vec![false; 5]);
        let mut cat = PathTableWC::new(map.size(), 1);
        cat.insert_path(0, corridor_path(&map, 3));

        let ct = ConstraintTable::new(None, Some(&cat));
        // Soft source never hard-blocks.
        assert!(!ct.constrained(1, Orientation::North, 1));
        assert_eq!(
            ct.get_num_of_conflicts_for_step(0, Orientation::East, 1, Orientation::East, 1),
            1
        );
        assert_eq!(
            ct.get_last_collision_timestep(2, Orientation::East),
            Some(2)
        );
        assert_eq!(ct.get_last_collision_timestep(2, Orientation::North), None);
        assert_eq!(ct.get_max_timestep(), 2);
    }
}
