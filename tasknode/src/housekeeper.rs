//! Background loop that prunes stale, stopped task state from the replicated store.
use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde_json::json;

use crate::election;
use crate::model::TaskStatus;
use crate::node::NodeInner;
use crate::telemetry;

/// Spawn the housekeeper thread; its handle is registered with the node's upkeep list.
pub(crate) fn spawn(inner: Arc<NodeInner>) -> anyhow::Result<humthreads::Thread<()>> {
    let thread = humthreads::Builder::new("tasknode-housekeeper").spawn(move |scope| {
        while !scope.should_shutdown() {
            std::thread::sleep(inner.conf.housekeeping_interval);
            if inner.stop_requested.load(Ordering::SeqCst) {
                break;
            }
            sweep_once(&inner);
        }
    })
    .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    Ok(thread)
}

fn sweep_once(inner: &Arc<NodeInner>) {
    let pruned = inner.state.prune_older_than(inner.conf.task_retention_period);
    for task_id in pruned {
        telemetry::TASKS_PRUNED.inc();
        let _ = inner.bus.emit(
            election::TOPIC_STATUS_CHANGE,
            json!({"task_id": task_id, "status": TaskStatus::Pruned}),
        );
    }
}
