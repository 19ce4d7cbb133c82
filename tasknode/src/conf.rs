//! Configuration surface for a [`crate::TaskNode`].
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::model::TaskLimit;

/// How child tasks are spawned.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpawnMode {
    /// Re-exec the current binary into a fresh child process.
    Spawn,
    /// Fork the current process (unix only); the child re-execs immediately to drop
    /// anything unsafe to carry across the fork.
    Fork,
}

/// How a child process ships its result back to the node that spawned it.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultTransport {
    /// A file under `tmp_path`, written by the child and read-and-deleted by the watcher.
    Files,
    /// A dedicated `task_result_payload` event emitted by a short-lived bus client in the child.
    Events,
    /// A host-local socket pair established before the child is spawned.
    Memory,
}

/// Construction options for a [`crate::TaskNode`].
///
/// Every field has a default so a node can be built purely in code (the common case, and what
/// every test in this crate does) or hydrated from a YAML file with [`load`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConf {
    /// Pool this node joins. Nodes outside a pool never volunteer for pooled tasks.
    pub pool: Option<String>,

    /// Concurrent task cap enforced when volunteering and when accepting a request.
    pub task_limit: TaskLimit,

    /// Prepended to the generated UUID to form this node's identity.
    pub ident_prefix: String,

    /// How to create the OS process backing a running task.
    pub multiprocessing_context: SpawnMode,

    /// Kill (`SIGKILL`) rather than ask nicely (`SIGTERM`) when a task is stopped.
    pub kill_on_stop: bool,

    /// How long a stopped task's state is retained before the housekeeper prunes it.
    pub task_retention_period: Duration,

    /// How often the housekeeper sweeps for prunable task state.
    pub housekeeping_interval: Duration,

    /// How long a requestor waits for an election candidate, and a candidate for a request.
    pub start_max_wait: Duration,

    /// How long a node waits for replies after emitting a state or pool query.
    pub query_wait: Duration,

    /// Maximum time the watcher blocks waiting for a running child to exit.
    pub watcher_max_wait: Duration,

    /// How long `stop()` waits for each local task to finish before returning.
    pub stop_node_task_wait: Duration,

    /// How long the watcher waits for an `events`-transport result after a child exits.
    pub result_max_wait: Duration,

    /// Directory used by the `files` and `memory` result transports.
    pub tmp_path: PathBuf,

    /// Mechanism used to carry a child's result back to the node.
    pub result_transport: ResultTransport,
}

impl Default for NodeConf {
    fn default() -> Self {
        NodeConf {
            pool: None,
            task_limit: TaskLimit::Unlimited,
            ident_prefix: String::new(),
            multiprocessing_context: SpawnMode::Spawn,
            kill_on_stop: false,
            task_retention_period: Duration::from_secs(3600),
            housekeeping_interval: Duration::from_secs(60),
            start_max_wait: Duration::from_secs(3),
            query_wait: Duration::from_secs(3),
            watcher_max_wait: Duration::from_secs(3),
            stop_node_task_wait: Duration::from_secs(3),
            result_max_wait: Duration::from_secs(3),
            tmp_path: PathBuf::from("/tmp/tasknode"),
            result_transport: ResultTransport::Memory,
        }
    }
}

/// Load a [`NodeConf`] from a YAML file on disk.
pub fn load(path: &str) -> anyhow::Result<NodeConf> {
    use anyhow::Context;
    use std::fs::File;
    use std::path::Path;

    if !Path::new(path).exists() {
        let error = LoadError::PathNotFound(path.to_string());
        return Err(anyhow::anyhow!(error));
    }
    let file = File::open(path).with_context(|| LoadError::Open(path.into()))?;
    let conf = serde_yaml::from_reader(file).with_context(|| LoadError::Decode(path.into()))?;
    Ok(conf)
}

/// Errors loading a [`NodeConf`] from disk.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("unable to decode configuration from file at '{0}'")]
    Decode(String),

    #[error("unable to read configuration file at '{0}'")]
    Open(String),

    #[error("configuration file not found at '{0}'")]
    PathNotFound(String),
}
