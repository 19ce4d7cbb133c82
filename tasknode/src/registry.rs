//! In-memory map from task name to the callable that implements it.
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use serde_json::Value;

use crate::error::InvalidArgument;

/// A task body: receives positional and keyword arguments, returns a JSON value or fails.
///
/// Failures surface to the requestor as [`crate::error::TaskRaised`] carrying the rendered
/// error, matching what a child process would report after catching a panic or an `Err`.
pub type TaskFn = Arc<dyn Fn(Value, Value) -> anyhow::Result<Value> + Send + Sync>;

/// Thread-safe name-to-callable map shared between the node and its child processes.
///
/// Child processes are re-exec'd copies of the same binary, so they populate an identical
/// registry at startup and look tasks up by the name carried in their environment.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<Mutex<HashMap<String, TaskFn>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        TaskRegistry::default()
    }

    /// Register a task under an explicit name.
    pub fn register_task(&self, name: impl Into<String>, func: TaskFn) -> anyhow::Result<()> {
        let name = name.into();
        if name.is_empty() {
            return Err(InvalidArgument("task name cannot be empty".into()).into());
        }
        self.tasks.lock().unwrap().insert(name, func);
        Ok(())
    }

    /// Remove a task by name. A no-op if the name was never registered.
    pub fn unregister_task(&self, name: &str) {
        self.tasks.lock().unwrap().remove(name);
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.tasks.lock().unwrap().contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<TaskFn> {
        self.tasks.lock().unwrap().get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_overwrite_is_idempotent() {
        let registry = TaskRegistry::new();
        registry
            .register_task("echo", Arc::new(|args, _kwargs| Ok(args)))
            .unwrap();
        registry
            .register_task("echo", Arc::new(|args, _kwargs| Ok(args)))
            .unwrap();
        assert!(registry.is_registered("echo"));
        registry.unregister_task("echo");
        registry.unregister_task("echo");
        assert!(!registry.is_registered("echo"));
    }

    #[test]
    fn empty_name_rejected() {
        let registry = TaskRegistry::new();
        let err = registry.register_task("", Arc::new(|a, _| Ok(a)));
        assert!(err.is_err());
    }
}
