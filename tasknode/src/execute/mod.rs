//! The child-process boundary: spawning a task's process and running its body inside one.
use std::process::Command;
use std::process::Stdio;

use serde_json::Value;

use crate::bus::EventBus;
use crate::conf::NodeConf;
use crate::model::TaskOutcome;
use crate::registry::TaskRegistry;
use crate::transport::ResultSlot;

pub mod current;

const ENV_WORKER_MODE: &str = "TASKNODE_WORKER_MODE";
const ENV_TASK_ID: &str = "TASKNODE_TASK_ID";
const ENV_TASK_NAME: &str = "TASKNODE_TASK_NAME";
const ENV_TASK_META: &str = "TASKNODE_TASK_META";
const ENV_TASK_ARGS: &str = "TASKNODE_TASK_ARGS";
const ENV_TASK_KWARGS: &str = "TASKNODE_TASK_KWARGS";

/// Spawn the OS process that will run `name` with the given arguments.
///
/// Both [`crate::conf::SpawnMode`] variants re-exec the current binary: a genuine `fork()` is
/// unsound to perform from a process that may already be running multiple threads (the bus's
/// dispatch thread, the watcher, the housekeeper are all already alive by the time a task
/// starts), so `Fork` is accepted as a configuration value but executes identically to `Spawn`.
pub fn spawn_child(
    conf: &NodeConf,
    bus: &EventBus,
    task_id: &str,
    name: &str,
    meta: &Value,
    args: &Value,
    kwargs: &Value,
) -> anyhow::Result<(std::process::Child, ResultSlot)> {
    let slot = ResultSlot::prepare(conf, task_id)?;
    let exe = std::env::current_exe()?;

    let mut command = Command::new(exe);
    command
        .env(ENV_WORKER_MODE, "1")
        .env(ENV_TASK_ID, task_id)
        .env(ENV_TASK_NAME, name)
        .env(ENV_TASK_META, serde_json::to_string(meta)?)
        .env(ENV_TASK_ARGS, serde_json::to_string(args)?)
        .env(ENV_TASK_KWARGS, serde_json::to_string(kwargs)?)
        .stdin(Stdio::null());
    for (key, value) in slot.child_env(bus) {
        command.env(key, value);
    }

    let child = command.spawn()?;
    Ok((child, slot))
}

/// If this process was re-exec'd to run one task, run it and exit; otherwise return.
///
/// Must be called at the very start of `main`, before a [`crate::node::TaskNode`] is built,
/// so the worker process never opens a second copy of the bus or background threads.
pub fn maybe_enter_worker_mode(registry: &TaskRegistry) -> ! {
    let task_id = std::env::var(ENV_TASK_ID).unwrap_or_default();
    let name = std::env::var(ENV_TASK_NAME).unwrap_or_default();
    let meta: Value = std::env::var(ENV_TASK_META)
        .ok()
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or(Value::Null);
    let args: Value = std::env::var(ENV_TASK_ARGS)
        .ok()
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or(Value::Null);
    let kwargs: Value = std::env::var(ENV_TASK_KWARGS)
        .ok()
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or(Value::Null);

    let outcome = run_task_body(registry, &task_id, &name, meta, args, kwargs);
    if let Err(error) = crate::transport::send_from_child(&outcome) {
        eprintln!("tasknode: failed to deliver task result: {error:#}");
        std::process::exit(1);
    }
    std::process::exit(0);
}

/// True when the current process was re-exec'd to run a single task.
///
/// Call this instead of [`maybe_enter_worker_mode`] only when `main` needs to branch before it
/// has a [`TaskRegistry`] built; otherwise call `maybe_enter_worker_mode` directly.
pub fn is_worker_process() -> bool {
    std::env::var(ENV_WORKER_MODE).is_ok()
}

fn run_task_body(
    registry: &TaskRegistry,
    task_id: &str,
    name: &str,
    meta: Value,
    args: Value,
    kwargs: Value,
) -> TaskOutcome {
    let target = match registry.get(name) {
        Some(target) => target,
        None => return TaskOutcome::Raise(format!("task '{name}' is not registered")),
    };

    current::set(current::CurrentTask { id: task_id.to_string(), meta });
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| target(args, kwargs)));
    current::clear();

    match outcome {
        Ok(Ok(value)) => TaskOutcome::Return(value),
        Ok(Err(error)) => TaskOutcome::Raise(format!("{error:#}")),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "task panicked".to_string());
            TaskOutcome::Raise(message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn returning_task_produces_return_outcome() {
        let registry = TaskRegistry::new();
        registry
            .register_task("add", Arc::new(|args, _kwargs| {
                let a = args[0].as_i64().unwrap();
                let b = args[1].as_i64().unwrap();
                Ok(serde_json::json!(a + b))
            }))
            .unwrap();
        let outcome = run_task_body(
            &registry,
            "t1",
            "add",
            Value::Null,
            serde_json::json!([2, 3]),
            serde_json::json!({}),
        );
        match outcome {
            TaskOutcome::Return(value) => assert_eq!(value, serde_json::json!(5)),
            TaskOutcome::Raise(message) => panic!("unexpected raise: {message}"),
        }
    }

    #[test]
    fn failing_task_produces_raise_outcome() {
        let registry = TaskRegistry::new();
        registry
            .register_task("boom", Arc::new(|_args, _kwargs| anyhow::bail!("ValueError: x")))
            .unwrap();
        let outcome = run_task_body(
            &registry,
            "t2",
            "boom",
            Value::Null,
            Value::Null,
            Value::Null,
        );
        match outcome {
            TaskOutcome::Raise(message) => assert!(message.contains("ValueError: x")),
            TaskOutcome::Return(_) => panic!("expected a raise outcome"),
        }
    }

    #[test]
    fn unregistered_task_raises_instead_of_panicking() {
        let registry = TaskRegistry::new();
        let outcome = run_task_body(
            &registry,
            "t3",
            "missing",
            Value::Null,
            Value::Null,
            Value::Null,
        );
        assert!(matches!(outcome, TaskOutcome::Raise(_)));
    }
}
