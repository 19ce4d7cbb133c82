use std::path::PathBuf;

use clap::Parser;

use crate::logging::LogLevel;

/// Interactive task node: registers a couple of demo tasks and drops into a small REPL for
/// submitting work to the fleet this node joins.
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Cli {
    /// Path to the host-local bus socket this node's fleet communicates over.
    #[arg(long, default_value = "/tmp/tasknode-demo/bus.sock")]
    pub socket: PathBuf,

    /// Directory used for file- and memory-transport task results.
    #[arg(long, default_value = "/tmp/tasknode-demo/results")]
    pub tmp_path: PathBuf,

    /// Join an existing fleet instead of starting the bus broker on this process.
    #[arg(long)]
    pub join: bool,

    /// Pool this node volunteers tasks in. Nodes with no pool only serve unpooled requests.
    #[arg(long)]
    pub pool: Option<String>,

    /// Maximum tasks this node will run at once.
    #[arg(long)]
    pub task_limit: Option<u32>,

    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,
}
