//! Data types replicated across the fleet and exchanged over the event bus.
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// Observed lifecycle stage of a task.
///
/// Nodes never regress a status they have already observed; they may only skip stages they
/// never witnessed (for example a node that joins after a task already completed goes straight
/// from unknown to stopped).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Stopped,
    Pruned,
}

/// Maximum number of tasks a node is willing to run concurrently.
///
/// `Unlimited` keeps `count_free_workers` from ever reporting a finite ceiling for the pool it
/// appears in, matching the "any unlimited node makes the pool unlimited" rule.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskLimit {
    Bounded(u32),
    Unlimited,
}

impl TaskLimit {
    pub fn has_room(self, running: u32) -> bool {
        match self {
            TaskLimit::Unlimited => true,
            TaskLimit::Bounded(limit) => running < limit,
        }
    }

    pub fn free(self, running: u32) -> Option<u32> {
        match self {
            TaskLimit::Unlimited => None,
            TaskLimit::Bounded(limit) => Some(limit.saturating_sub(running)),
        }
    }
}

impl Default for TaskLimit {
    fn default() -> Self {
        TaskLimit::Unlimited
    }
}

/// Replicated, fleet-wide view of one task's lifecycle.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskState {
    pub task_id: String,
    pub requestor: String,
    pub runner: Option<String>,
    pub status: TaskStatus,
    /// Compressed, serialized `{return: ..}` / `{raise: ..}` wrapper, once the task has stopped.
    pub result: Option<Vec<u8>>,
    pub meta: Option<Value>,
}

/// Capability snapshot a node publishes about itself to a pool.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeState {
    pub ident: String,
    pub pool: Option<String>,
    pub task_limit: TaskLimit,
    pub running_tasks: u32,
}

/// Outcome produced by a task body, before compression, shipped back over a result transport.
#[derive(Debug, Serialize, Deserialize)]
pub enum TaskOutcome {
    Return(Value),
    Raise(String),
}
