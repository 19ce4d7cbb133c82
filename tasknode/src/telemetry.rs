//! Telemetry related to task election, execution and pruning.
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use anyhow::Result;
use once_cell::sync::Lazy;
use prometheus::Counter;
use prometheus::CounterVec;
use prometheus::Histogram;
use prometheus::HistogramOpts;
use prometheus::Opts;

/// Tasks a runner accepted and started executing, by pool.
pub static TASKS_STARTED: Lazy<CounterVec> = Lazy::new(|| {
    CounterVec::new(
        Opts::new("tasknode_tasks_started", "Tasks accepted by a runner, by pool"),
        &["pool"],
    )
    .expect("failed to initialise TASKS_STARTED counter")
});

/// Tasks observed stopped, by outcome (`return` or `raise`).
pub static TASKS_STOPPED: Lazy<CounterVec> = Lazy::new(|| {
    CounterVec::new(
        Opts::new("tasknode_tasks_stopped", "Tasks observed stopped, by outcome"),
        &["outcome"],
    )
    .expect("failed to initialise TASKS_STOPPED counter")
});

/// Task state records removed by the housekeeper.
pub static TASKS_PRUNED: Lazy<Counter> = Lazy::new(|| {
    Counter::new("tasknode_tasks_pruned", "Task state records removed by the housekeeper")
        .expect("failed to initialise TASKS_PRUNED counter")
});

/// Elections run by a requestor, by outcome (`won` or `timed_out`).
pub static ELECTIONS: Lazy<CounterVec> = Lazy::new(|| {
    CounterVec::new(
        Opts::new("tasknode_elections", "Elections run by a requestor, by outcome"),
        &["outcome"],
    )
    .expect("failed to initialise ELECTIONS counter")
});

/// Time spent in one watcher loop iteration.
pub static WATCHER_CYCLE_DURATION: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(HistogramOpts::new(
        "tasknode_watcher_cycle_duration_seconds",
        "Time spent in one watcher loop iteration",
    ))
    .expect("failed to initialise WATCHER_CYCLE_DURATION histogram")
});

/// Ensure metrics are registered only once.
static METRICS_REGISTERED: AtomicBool = AtomicBool::new(false);

/// The first time this method is called it will register the task node's metrics.
pub fn register_metrics(reg: &prometheus::Registry) -> Result<()> {
    // Skip registration if already done before.
    if METRICS_REGISTERED.swap(true, Ordering::AcqRel) {
        return Ok(());
    }

    let collectors: [Box<dyn prometheus::core::Collector>; 5] = [
        Box::new(TASKS_STARTED.clone()),
        Box::new(TASKS_STOPPED.clone()),
        Box::new(TASKS_PRUNED.clone()),
        Box::new(ELECTIONS.clone()),
        Box::new(WATCHER_CYCLE_DURATION.clone()),
    ];
    for collector in collectors {
        reg.register(collector)?;
    }
    Ok(())
}
