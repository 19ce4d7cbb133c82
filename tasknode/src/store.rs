//! The replicated state every node keeps: one view of every pool and every known task.
use std::collections::HashMap;
use std::sync::Condvar;
use std::sync::Mutex;

use crate::model::NodeState;
use crate::model::TaskState;
use crate::model::TaskStatus;

/// One-shot latch a completed task's state transitions set, woken by `wait_for_task`.
#[derive(Default)]
pub struct Latch {
    done: Mutex<bool>,
    condvar: Condvar,
}

impl Latch {
    pub fn set(&self) {
        let mut done = self.done.lock().unwrap();
        *done = true;
        self.condvar.notify_all();
    }

    pub fn is_set(&self) -> bool {
        *self.done.lock().unwrap()
    }

    /// Block until the latch is set or `timeout` elapses, returning whether it is now set.
    pub fn wait_timeout(&self, timeout: std::time::Duration) -> bool {
        let done = self.done.lock().unwrap();
        if *done {
            return true;
        }
        let (done, _) = self.condvar.wait_timeout(done, timeout).unwrap();
        *done
    }
}

/// Fleet-wide state replicated by the election and sync protocol handlers.
///
/// All mutation goes through `&self` methods that take the internal lock; callers never see a
/// raw `MutexGuard`, which keeps bus-handler threads from holding the lock across a callback.
#[derive(Default)]
pub struct StateStore {
    pool_state: Mutex<HashMap<Option<String>, HashMap<String, NodeState>>>,
    task_state: Mutex<HashMap<String, TaskState>>,
    task_timestamps: Mutex<HashMap<String, std::time::Instant>>,
    latches: Mutex<HashMap<String, std::sync::Arc<Latch>>>,
}

impl StateStore {
    pub fn new() -> Self {
        StateStore::default()
    }

    pub fn announce_node(&self, state: NodeState) {
        let mut pools = self.pool_state.lock().unwrap();
        pools.entry(state.pool.clone()).or_default().insert(state.ident.clone(), state);
    }

    pub fn withhold_node(&self, ident: &str) {
        let mut pools = self.pool_state.lock().unwrap();
        for bucket in pools.values_mut() {
            bucket.remove(ident);
        }
    }

    pub fn pool_snapshot(&self, pool: &Option<String>) -> HashMap<String, NodeState> {
        self.pool_state.lock().unwrap().get(pool).cloned().unwrap_or_default()
    }

    pub fn merge_pool_snapshot(&self, pool: &Option<String>, incoming: HashMap<String, NodeState>) {
        let mut pools = self.pool_state.lock().unwrap();
        let bucket = pools.entry(pool.clone()).or_default();
        for (ident, state) in incoming {
            bucket.entry(ident).or_insert(state);
        }
    }

    /// Apply a freshly observed task state, advancing the completion latch when it stops.
    pub fn announce_task(&self, state: TaskState) {
        let task_id = state.task_id.clone();
        let stopped = matches!(state.status, TaskStatus::Stopped);
        self.task_state.lock().unwrap().insert(task_id.clone(), state);
        self.task_timestamps.lock().unwrap().insert(task_id.clone(), std::time::Instant::now());
        if stopped {
            self.latch_for(&task_id).set();
        }
    }

    pub fn task(&self, task_id: &str) -> Option<TaskState> {
        self.task_state.lock().unwrap().get(task_id).cloned()
    }

    pub fn known_task_ids(&self) -> Vec<String> {
        self.task_state.lock().unwrap().keys().cloned().collect()
    }

    pub fn latch_for(&self, task_id: &str) -> std::sync::Arc<Latch> {
        self.latches
            .lock()
            .unwrap()
            .entry(task_id.to_string())
            .or_insert_with(|| std::sync::Arc::new(Latch::default()))
            .clone()
    }

    /// Merge a remote snapshot of the whole task-state map, preferring local truth for tasks
    /// this node is itself running.
    ///
    /// Every locally known task id not in `locally_running` and absent from `incoming` is
    /// dropped from the local store first: the remote snapshot is a fresher fleet-wide view,
    /// so a task this node only knew about secondhand and that view no longer mentions is gone.
    pub fn merge_task_snapshot(
        &self,
        incoming: HashMap<String, TaskState>,
        locally_running: &[String],
    ) {
        let mut incoming = incoming;
        for task_id in locally_running {
            incoming.remove(task_id);
        }
        let mut stopped_ids = Vec::new();
        {
            let mut store = self.task_state.lock().unwrap();
            let mut timestamps = self.task_timestamps.lock().unwrap();
            let stale: Vec<String> = store
                .keys()
                .filter(|task_id| {
                    !locally_running.iter().any(|id| id == *task_id) && !incoming.contains_key(*task_id)
                })
                .cloned()
                .collect();
            for task_id in stale {
                store.remove(&task_id);
                timestamps.remove(&task_id);
            }
            for (task_id, state) in incoming {
                if !store.contains_key(&task_id) {
                    timestamps.insert(task_id.clone(), std::time::Instant::now());
                }
                if matches!(state.status, TaskStatus::Stopped) {
                    stopped_ids.push(task_id.clone());
                }
                store.insert(task_id, state);
            }
        }
        for task_id in stopped_ids {
            self.latch_for(&task_id).set();
        }
    }

    pub fn all_task_state(&self) -> HashMap<String, TaskState> {
        self.task_state.lock().unwrap().clone()
    }

    /// Prune terminal task state older than `retention`, returning the pruned ids.
    pub fn prune_older_than(&self, retention: std::time::Duration) -> Vec<String> {
        let mut pruned = Vec::new();
        let mut store = self.task_state.lock().unwrap();
        let mut timestamps = self.task_timestamps.lock().unwrap();
        let mut latches = self.latches.lock().unwrap();
        let stale: Vec<String> = timestamps
            .iter()
            .filter(|(task_id, timestamp)| {
                latches.get(*task_id).map(|l| l.is_set()).unwrap_or(false)
                    && timestamp.elapsed() >= retention
            })
            .map(|(task_id, _)| task_id.clone())
            .collect();
        for task_id in stale {
            store.remove(&task_id);
            timestamps.remove(&task_id);
            latches.remove(&task_id);
            pruned.push(task_id);
        }
        pruned
    }
}
