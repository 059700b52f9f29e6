use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufRead, BufReader};

use tracing::info;

/// Timesteps at or above this value mean "never" / "unset".
pub const MAX_TIMESTEP: usize = usize::MAX / 2;

/// Heading of an agent inside a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Orientation {
    North = 0,
    East = 1,
    South = 2,
    West = 3,
}

impl Orientation {
    pub const COUNT: usize = 4;
    pub const ALL: [Orientation; 4] = [
        Orientation::North,
        Orientation::East,
        Orientation::South,
        Orientation::West,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// One timestep of a committed path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PathEntry {
    pub location: usize,
    pub orientation: Orientation,
}

impl PathEntry {
    pub fn new(location: usize, orientation: Orientation) -> Self {
        PathEntry {
            location,
            orientation,
        }
    }
}

/// A time-stamped route: one entry per timestep, starting at timestep 0.
/// Waiting repeats the previous entry.
pub type Path = Vec<PathEntry>;

/// 4-connected grid with static obstacles. Cells are linearized row-major:
/// cell = row * cols + col.
#[derive(Debug, Clone)]
pub struct GridMap {
    pub rows: usize,
    pub cols: usize,
    obstacles: Vec<bool>,
}

impl GridMap {
    pub fn new(rows: usize, cols: usize, obstacles: Vec<bool>) -> Self {
        assert_eq!(obstacles.len(), rows * cols);
        GridMap {
            rows,
            cols,
            obstacles,
        }
    }

    /// Parses the benchmark map format: a `type` line, `height H`, `width W`,
    /// a `map` line, then `rows` lines of cell characters where `.`, `G` and
    /// `S` are traversable and `@` / `T` are obstacles.
    pub fn from_file(path: &str) -> io::Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let lines: Vec<String> = reader.lines().collect::<io::Result<_>>()?;
        let map = Self::from_lines(&lines)?;
        info!(
            "Loaded map {}: {}x{} ({} cells)",
            path,
            map.rows,
            map.cols,
            map.size()
        );
        Ok(map)
    }

    pub fn from_text(text: &str) -> io::Result<Self> {
        let lines: Vec<String> = text.lines().map(|l| l.to_string()).collect();
        Self::from_lines(&lines)
    }

    fn from_lines(lines: &[String]) -> io::Result<Self> {
        let invalid = |msg: &str| io::Error::new(io::ErrorKind::InvalidData, msg.to_string());

        let mut iter = lines.iter();
        let _type = iter.next().ok_or_else(|| invalid("missing type line"))?;
        let rows = iter
            .next()
            .and_then(|l| l.split_whitespace().last())
            .and_then(|v| v.parse::<usize>().ok())
            .ok_or_else(|| invalid("missing or malformed height line"))?;
        let cols = iter
            .next()
            .and_then(|l| l.split_whitespace().last())
            .and_then(|v| v.parse::<usize>().ok())
            .ok_or_else(|| invalid("missing or malformed width line"))?;
        let _map = iter.next().ok_or_else(|| invalid("missing map line"))?;

        let mut obstacles = Vec::with_capacity(rows * cols);
        for _ in 0..rows {
            let line = iter.next().ok_or_else(|| invalid("truncated map body"))?;
            let row: Vec<char> = line.chars().collect();
            if row.len() < cols {
                return Err(invalid("map row shorter than declared width"));
            }
            for ch in row.into_iter().take(cols) {
                obstacles.push(!matches!(ch, '.' | 'G' | 'S'));
            }
        }

        Ok(GridMap {
            rows,
            cols,
            obstacles,
        })
    }

    pub fn size(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_obstacle(&self, cell: usize) -> bool {
        self.obstacles[cell]
    }

    pub fn linearize(&self, row: usize, col: usize) -> usize {
        row * self.cols + col
    }

    pub fn row_of(&self, cell: usize) -> usize {
        cell / self.cols
    }

    pub fn col_of(&self, cell: usize) -> usize {
        cell % self.cols
    }

    pub fn manhattan_distance(&self, a: usize, b: usize) -> usize {
        self.row_of(a).abs_diff(self.row_of(b)) + self.col_of(a).abs_diff(self.col_of(b))
    }

    /// Passable 4-neighbors of a cell, excluding the cell itself.
    pub fn get_neighbors(&self, cell: usize) -> Vec<usize> {
        let (row, col) = (self.row_of(cell), self.col_of(cell));
        let mut neighbors = Vec::with_capacity(4);
        if row > 0 {
            neighbors.push(cell - self.cols);
        }
        if row + 1 < self.rows {
            neighbors.push(cell + self.cols);
        }
        if col > 0 {
            neighbors.push(cell - 1);
        }
        if col + 1 < self.cols {
            neighbors.push(cell + 1);
        }
        neighbors.retain(|&c| !self.obstacles[c]);
        neighbors
    }

    /// Heading an agent takes when stepping between two adjacent cells.
    pub fn direction_between(&self, from: usize, to: usize) -> Orientation {
        let (fr, fc) = (self.row_of(from), self.col_of(from));
        let (tr, tc) = (self.row_of(to), self.col_of(to));
        if tr < fr {
            Orientation::North
        } else if tr > fr {
            Orientation::South
        } else if tc > fc {
            Orientation::East
        } else {
            Orientation::West
        }
    }

    /// Successor states of an oriented search state: every passable neighbor
    /// with the heading set to the direction of travel, plus waiting in place.
    pub fn get_next_states(&self, location: usize, orientation: Orientation) -> Vec<PathEntry> {
        let mut states: Vec<PathEntry> = self
            .get_neighbors(location)
            .into_iter()
            .map(|next| PathEntry::new(next, self.direction_between(location, next)))
            .collect();
        states.push(PathEntry::new(location, orientation));
        states
    }

    /// Unweighted shortest-path distance from every cell to `goal`, ignoring
    /// time. Unreachable cells get MAX_TIMESTEP.
    pub fn compute_goal_heuristic(&self, goal: usize) -> Vec<usize> {
        let mut dist = vec![MAX_TIMESTEP; self.size()];
        if self.obstacles[goal] {
            return dist;
        }
        dist[goal] = 0;
        let mut queue = VecDeque::new();
        queue.push_back(goal);
        while let Some(cell) = queue.pop_front() {
            for next in self.get_neighbors(cell) {
                if dist[next] == MAX_TIMESTEP {
                    dist[next] = dist[cell] + 1;
                    queue.push_back(next);
                }
            }
        }
        dist
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_MAP: &str = "type octile\n\
                            height 3\n\
                            width 3\n\
                            map\n\
                            ...\n\
                            .@.\n\
                            ...\n";

    #[test]
    fn test_parse_map_text() {
        let map = GridMap::from_text(TEST_MAP).unwrap();
        assert_eq!(map.rows, 3);
        assert_eq!(map.cols, 3);
        assert!(!map.is_obstacle(0));
        assert!(map.is_obstacle(4));
        assert_eq!(map.linearize(1, 1), 4);
        assert_eq!(map.row_of(7), 2);
        assert_eq!(map.col_of(7), 1);
    }

    #[test]
    fn test_neighbors_skip_obstacles() {
        let map = GridMap::from_text(TEST_MAP).unwrap();
        let neighbors = map.get_neighbors(1);
        assert_eq!(neighbors.len(), 2);
        assert!(neighbors.contains(&0));
        assert!(neighbors.contains(&2));
        assert!(!neighbors.contains(&4));
    }

    #[test]
    fn test_next_states_include_wait() {
        let map = GridMap::from_text(TEST_MAP).unwrap();
        let states = map.get_next_states(0, Orientation::North);
        assert_eq!(states.len(), 3);
        assert!(states.contains(&PathEntry::new(1, Orientation::East)));
        assert!(states.contains(&PathEntry::new(3, Orientation::South)));
        assert!(states.contains(&PathEntry::new(0, Orientation::North)));
    }

    #[test]
    fn test_goal_heuristic_routes_around_obstacle() {
        let map = GridMap::from_text(TEST_MAP).unwrap();
        let h = map.compute_goal_heuristic(8);
        assert_eq!(h[8], 0);
        assert_eq!(h[5], 1);
        assert_eq!(h[2], 2);
        // The center is blocked, so the corner-to-corner distance is 4.
        assert_eq!(h[0], 4);
        assert_eq!(h[4], MAX_TIMESTEP);
        assert_eq!(map.manhattan_distance(0, 8), 4);
    }

    #[test]
    fn test_walled_off_region_unreachable() {
        let text = "type octile\nheight 1\nwidth 5\nmap\n..@..\n";
        let map = GridMap::from_text(text).unwrap();
        let h = map.compute_goal_heuristic(0);
        assert_eq!(h[1], 1);
        assert_eq!(h[3], MAX_TIMESTEP);
        assert_eq!(h[4], MAX_TIMESTEP);
    }
}
