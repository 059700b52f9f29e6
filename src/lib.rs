pub mod config;
pub mod constraint;
pub mod coordinator;
pub mod map;
pub mod path_table;
pub mod planner;
pub mod scenario;
pub mod stats;
pub mod tasks;

pub use config::{Cli, ReplanAlgo};
pub use coordinator::driver::SimulationDriver;
pub use coordinator::{AgentStatus, RealtimeCoordinator};
pub use map::{GridMap, Orientation, Path, PathEntry, MAX_TIMESTEP};
pub use path_table::{PathTable, PathTableWC};
pub use planner::SpaceTimePlanner;
