//! Background loop that notices when a locally running task process exits.
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use serde_json::json;

use crate::election;
use crate::model::TaskOutcome;
use crate::model::TaskState;
use crate::model::TaskStatus;
use crate::node::NodeInner;
use crate::telemetry;

/// Spawn the watcher thread; its handle is registered with the node's [`crate::upkeep::Upkeep`].
pub(crate) fn spawn(inner: Arc<NodeInner>) -> anyhow::Result<humthreads::Thread<()>> {
    let thread = humthreads::Builder::new("tasknode-watcher").spawn(move |scope| {
        while !scope.should_shutdown() {
            let cycle_start = Instant::now();
            inner.has_running.wait_timeout(inner.conf.watcher_max_wait);
            if inner.stop_requested.load(Ordering::SeqCst) && inner.running.lock().unwrap().is_empty() {
                break;
            }
            watch_once(&inner);
            telemetry::WATCHER_CYCLE_DURATION.observe(cycle_start.elapsed().as_secs_f64());
        }
    })
    .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    Ok(thread)
}

fn watch_once(inner: &Arc<NodeInner>) {
    let finished: Vec<String> = {
        let mut running = inner.running.lock().unwrap();
        let mut finished = Vec::new();
        for (task_id, task) in running.iter_mut() {
            match task.child.try_wait() {
                Ok(Some(_status)) => finished.push(task_id.clone()),
                Ok(None) => {}
                Err(error) => {
                    slog::warn!(inner.logger, "failed to poll task process"; "task_id" => task_id.as_str(), "error" => %error);
                }
            }
        }
        finished
    };

    for task_id in finished {
        announce_task_stopped(inner, &task_id);
    }

    if inner.running.lock().unwrap().is_empty() {
        inner.has_running.set(false);
    }
}

fn announce_task_stopped(inner: &Arc<NodeInner>, task_id: &str) {
    let outcome = collect_outcome(inner, task_id);
    let task = inner.running.lock().unwrap().remove(task_id);
    drop(task);

    let previous = inner.state.task(task_id);
    let (requestor, meta) = previous
        .map(|state| (state.requestor, state.meta))
        .unwrap_or_else(|| (inner.ident.clone(), None));

    let result = outcome.as_ref().map(crate::transport::compress).transpose().ok().flatten();
    let label = match &outcome {
        Some(TaskOutcome::Return(_)) => "return",
        Some(TaskOutcome::Raise(_)) => "raise",
        None => "unknown",
    };
    telemetry::TASKS_STOPPED.with_label_values(&[label]).inc();

    let state = TaskState {
        task_id: task_id.to_string(),
        requestor,
        runner: Some(inner.ident.clone()),
        status: TaskStatus::Stopped,
        result,
        meta,
    };
    inner.state.announce_task(state.clone());
    if let Ok(payload) = serde_json::to_value(&state) {
        let _ = inner.bus.emit(election::TOPIC_STATE_ANNOUNCE, payload);
    }
    let _ = inner.bus.emit(
        election::TOPIC_STATUS_CHANGE,
        json!({"task_id": task_id, "status": TaskStatus::Stopped}),
    );
    let _ = inner.bus.emit(
        election::TOPIC_NODE_ANNOUNCE,
        json!({
            "ident": inner.ident,
            "pool": inner.conf.pool,
            "task_limit": inner.conf.task_limit,
            "running_tasks": inner.running.lock().unwrap().len() as u32,
        }),
    );
}

/// Collect a finished task's outcome, waiting briefly for `events`-transport results that may
/// arrive shortly after the child process itself has exited.
fn collect_outcome(inner: &Arc<NodeInner>, task_id: &str) -> Option<TaskOutcome> {
    let slot_result = {
        let running = inner.running.lock().unwrap();
        running.get(task_id).and_then(|task| task.slot.try_collect().ok().flatten())
    };
    if let Some(outcome) = slot_result {
        return Some(outcome);
    }

    let deadline = Instant::now() + inner.conf.result_max_wait;
    loop {
        if let Some(bytes) = inner.pending_event_results.lock().unwrap().remove(task_id) {
            return crate::transport::decompress(&bytes).ok();
        }
        if Instant::now() >= deadline {
            return None;
        }
        std::thread::sleep(std::time::Duration::from_millis(20));
    }
}
