//! Exercises a small fleet of task nodes end to end: election, child-process execution,
//! capacity-aware volunteering, and housekeeping.
//!
//! This binary doubles as the worker-mode entry point for the child processes it spawns (every
//! task here re-execs this very test binary), so it opts out of the generated libtest harness
//! and drives its own `main` instead; see the `[[test]]` entry in `Cargo.toml`.
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use slog::o;

use tasknode::bus::EventBus;
use tasknode::bus::LocalBus;
use tasknode::model::TaskLimit;
use tasknode::model::TaskStatus;
use tasknode::node::TaskResult;
use tasknode::NodeConf;
use tasknode::TaskNode;
use tasknode::TaskRegistry;

fn build_registry() -> TaskRegistry {
    let registry = TaskRegistry::new();
    registry
        .register_task(
            "double",
            Arc::new(|args: serde_json::Value, _kwargs| {
                let n = args[0].as_i64().expect("double expects an integer argument");
                Ok(json!(n * 2))
            }),
        )
        .unwrap();
    registry
        .register_task(
            "boom",
            Arc::new(|_args, _kwargs| anyhow::bail!("deliberate failure")),
        )
        .unwrap();
    registry
}

fn spawn_node(
    socket: &Path,
    tmp_path: &Path,
    join: bool,
    pool: Option<String>,
    task_limit: Option<u32>,
) -> TaskNode {
    let bus: EventBus = if join {
        LocalBus::connect(socket).expect("joining an existing fleet").into()
    } else {
        LocalBus::bind(socket.to_path_buf()).expect("binding a fresh fleet").into()
    };
    let mut conf = NodeConf::default();
    conf.pool = pool;
    conf.tmp_path = tmp_path.to_path_buf();
    conf.start_max_wait = Duration::from_millis(300);
    conf.query_wait = Duration::from_millis(100);
    if let Some(limit) = task_limit {
        conf.task_limit = TaskLimit::Bounded(limit);
    }
    let logger = slog::Logger::root(slog::Discard, o!());
    let node = TaskNode::with_registry(conf, bus, logger, build_registry());
    node.start(false).expect("starting a node");
    node
}

fn single_node_runs_and_returns() {
    let dir = tempfile::tempdir().unwrap();
    let node = spawn_node(&dir.path().join("bus.sock"), &dir.path().join("results"), false, None, None);

    let task_id = node
        .start_task("double", json!([21]), json!({}), None, None)
        .expect("starting a task")
        .expect("a solo node should volunteer for its own request");

    match node.join_task(&task_id, Some(Duration::from_secs(5))).expect("joining the task") {
        TaskResult::Return(value) => assert_eq!(value, json!(42)),
        TaskResult::NoResult => panic!("expected a returned value, got none"),
    }
    assert_eq!(node.get_task_status(&task_id).unwrap(), TaskStatus::Stopped);

    node.stop(true).expect("stopping the node");
}

fn failing_task_reports_raise() {
    let dir = tempfile::tempdir().unwrap();
    let node = spawn_node(&dir.path().join("bus.sock"), &dir.path().join("results"), false, None, None);

    let task_id = node
        .start_task("boom", json!([]), json!({}), None, None)
        .expect("starting a task")
        .expect("a solo node should volunteer for its own request");

    let outcome = node.join_task(&task_id, Some(Duration::from_secs(5)));
    let error = outcome.expect_err("a failing task body should surface as an error");
    assert!(
        error.to_string().contains("deliberate failure"),
        "unexpected error message: {error:#}"
    );

    node.stop(true).expect("stopping the node");
}

fn request_with_no_room_finds_no_volunteer() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("bus.sock");
    let results = dir.path().join("results");

    // A lone node with zero task capacity never volunteers for its own request.
    let full = spawn_node(&socket, &results, false, None, Some(0));
    let won = full.start_task("double", json!([1]), json!({}), None, None).unwrap();
    assert!(won.is_none(), "a node with no free capacity should not volunteer");
    full.stop(true).unwrap();
}

fn second_node_volunteers_when_first_is_full() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("bus.sock");
    let results = dir.path().join("results");

    let full = spawn_node(&socket, &results, false, None, Some(0));
    let spare = spawn_node(&socket, &results, true, None, None);

    let task_id = full
        .start_task("double", json!([10]), json!({}), None, None)
        .expect("starting a task")
        .expect("the spare node should volunteer instead");

    match spare.join_task(&task_id, Some(Duration::from_secs(5))).expect("joining via the spare node") {
        TaskResult::Return(value) => assert_eq!(value, json!(20)),
        TaskResult::NoResult => panic!("expected a returned value, got none"),
    }

    full.stop(true).unwrap();
    spare.stop(true).unwrap();
}

fn housekeeper_prunes_stopped_state() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("bus.sock");
    let results = dir.path().join("results");

    let bus: EventBus = LocalBus::bind(socket.clone()).unwrap().into();
    let mut conf = NodeConf::default();
    conf.tmp_path = results;
    conf.task_retention_period = Duration::from_millis(50);
    conf.housekeeping_interval = Duration::from_millis(50);
    conf.query_wait = Duration::from_millis(50);
    let logger = slog::Logger::root(slog::Discard, o!());
    let node = TaskNode::with_registry(conf, bus, logger, build_registry());
    node.start(false).unwrap();

    let task_id = node
        .start_task("double", json!([2]), json!({}), None, None)
        .unwrap()
        .expect("a solo node should volunteer for its own request");
    node.join_task(&task_id, Some(Duration::from_secs(5))).unwrap();

    // Give the housekeeper a couple of sweep cycles to notice the task is past retention.
    std::thread::sleep(Duration::from_millis(400));
    let status = node.get_task_status(&task_id);
    assert!(status.is_err(), "pruned task state should no longer be known to the node");

    node.stop(true).unwrap();
}

fn main() {
    let registry = build_registry();
    if tasknode::execute::is_worker_process() {
        tasknode::execute::maybe_enter_worker_mode(&registry);
    }

    let cases: &[(&str, fn())] = &[
        ("single_node_runs_and_returns", single_node_runs_and_returns),
        ("failing_task_reports_raise", failing_task_reports_raise),
        ("request_with_no_room_finds_no_volunteer", request_with_no_room_finds_no_volunteer),
        ("second_node_volunteers_when_first_is_full", second_node_volunteers_when_first_is_full),
        ("housekeeper_prunes_stopped_state", housekeeper_prunes_stopped_state),
    ];

    for (name, case) in cases {
        println!("running {name} ...");
        case();
        println!("{name} ... ok");
    }
}
