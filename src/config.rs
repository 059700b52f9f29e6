use std::fmt;

use clap::{Parser, ValueEnum};

/// Algorithm used when several agents need new paths in the same tick.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplanAlgo {
    /// Prioritized planning: agents replan one after another against the
    /// paths committed so far.
    #[value(name = "PP")]
    Pp,
    /// Accepted for compatibility with external meta-planners; dispatch
    /// falls back to prioritized planning when none is linked.
    #[value(name = "CBS")]
    Cbs,
    #[value(name = "EECBS")]
    Eecbs,
}

impl fmt::Display for ReplanAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplanAlgo::Pp => write!(f, "PP"),
            ReplanAlgo::Cbs => write!(f, "CBS"),
            ReplanAlgo::Eecbs => write!(f, "EECBS"),
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "realtime-mapf",
    about = "Online multi-agent path finding with dynamic goal assignment.",
    version
)]
pub struct Cli {
    #[arg(long, short = 'm', help = "Input map file")]
    pub map: String,

    #[arg(long, short = 'a', help = "Input scenario file for agents")]
    pub agents: String,

    #[arg(long = "agentNum", short = 'k', default_value_t = 10, help = "Number of agents")]
    pub agent_num: usize,

    #[arg(
        long = "cutoffTime",
        short = 't',
        default_value_t = 300.0,
        help = "Simulated duration in seconds"
    )]
    pub cutoff_time: f64,

    #[arg(long, short = 'o', help = "Output file for the run summary")]
    pub output: Option<String>,

    #[arg(long = "outputPaths", help = "Output file for per-agent paths")]
    pub output_paths: Option<String>,

    #[arg(long, help = "Output file for statistics (YAML)")]
    pub stats: Option<String>,

    #[arg(
        long = "replanAlgo",
        short = 'r',
        value_enum,
        default_value_t = ReplanAlgo::Pp,
        help = "Replanning algorithm"
    )]
    pub replan_algo: ReplanAlgo,

    #[arg(long, help = "Seed for tie-breaking and task sampling")]
    pub seed: Option<u64>,
}
