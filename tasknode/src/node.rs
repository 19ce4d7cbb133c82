//! The public task node: register tasks, elect runners, and track their lifecycle.
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use crossbeam_channel::Sender;
use serde_json::json;
use serde_json::Value;
use slog::Logger;

use tasknode_context::Context;

use crate::bus::EventBus;
use crate::bus::Handler;
use crate::conf::NodeConf;
use crate::election;
use crate::error::InvalidArgument;
use crate::error::UnknownTask;
use crate::execute;
use crate::housekeeper;
use crate::model::NodeState;
use crate::model::TaskLimit;
use crate::model::TaskState;
use crate::model::TaskStatus;
use crate::registry::TaskFn;
use crate::registry::TaskRegistry;
use crate::store::StateStore;
use crate::telemetry;
use crate::transport;
use crate::transport::ResultSlot;
use crate::upkeep::Upkeep;
use crate::watcher;

/// Outcome of a finished task, as returned by [`TaskNode::get_task_result`].
#[derive(Debug)]
pub enum TaskResult {
    Return(Value),
    /// The stored result is absent or malformed (task still running, or its child never
    /// delivered a result).
    NoResult,
}

pub(crate) struct RunningTask {
    pub(crate) child: std::process::Child,
    pub(crate) slot: ResultSlot,
    #[allow(dead_code)]
    pub(crate) spawned_at: Instant,
}

/// A resettable event, equivalent to Python's `threading.Event`, used to park the watcher
/// until there is at least one task running locally.
#[derive(Default)]
pub(crate) struct RunningFlag {
    active: Mutex<bool>,
    condvar: Condvar,
}

impl RunningFlag {
    pub(crate) fn set(&self, active: bool) {
        *self.active.lock().unwrap() = active;
        if active {
            self.condvar.notify_all();
        }
    }

    pub(crate) fn wait_timeout(&self, timeout: Duration) {
        let guard = self.active.lock().unwrap();
        if *guard {
            return;
        }
        let _ = self.condvar.wait_timeout(guard, timeout).unwrap();
    }
}

pub(crate) struct NodeInner {
    pub(crate) ident: String,
    pub(crate) conf: NodeConf,
    pub(crate) bus: EventBus,
    pub(crate) registry: TaskRegistry,
    pub(crate) state: Arc<StateStore>,
    pub(crate) logger: Logger,
    pub(crate) running: Mutex<HashMap<String, RunningTask>>,
    pub(crate) has_running: RunningFlag,
    sync_queues: Mutex<HashMap<String, Sender<Value>>>,
    status_subscribers: Mutex<Vec<Handler>>,
    pub(crate) pending_event_results: Mutex<HashMap<String, Vec<u8>>>,
    started: AtomicBool,
    pub(crate) stop_requested: AtomicBool,
    upkeep: Mutex<Upkeep>,
    sync_reply_handler: Mutex<Option<Handler>>,
}

impl NodeInner {
    fn running_tasks_count(&self) -> u32 {
        self.running.lock().unwrap().len() as u32
    }

    fn emit_node_announce(&self) -> anyhow::Result<()> {
        self.bus.emit(
            election::TOPIC_NODE_ANNOUNCE,
            json!({
                "ident": self.ident,
                "pool": self.conf.pool,
                "task_limit": self.conf.task_limit,
                "running_tasks": self.running_tasks_count(),
            }),
        )
    }

    fn emit_state_announce(&self, state: &TaskState) -> anyhow::Result<()> {
        self.bus.emit(election::TOPIC_STATE_ANNOUNCE, serde_json::to_value(state)?)
    }

    fn emit_status_change(&self, task_id: &str, status: TaskStatus) -> anyhow::Result<()> {
        self.bus.emit(
            election::TOPIC_STATUS_CHANGE,
            json!({"task_id": task_id, "status": status}),
        )
    }
}

/// A peer-to-peer task node: the public API described in this crate's top level docs.
#[derive(Clone)]
pub struct TaskNode(pub(crate) Arc<NodeInner>);

impl TaskNode {
    /// Build a node with its own, empty task registry.
    pub fn new(conf: NodeConf, bus: EventBus, logger: Logger) -> TaskNode {
        TaskNode::with_registry(conf, bus, logger, TaskRegistry::new())
    }

    /// Build a node sharing `registry` with the re-exec'd child processes it spawns.
    ///
    /// Useful when `main` already built a [`TaskRegistry`] to answer
    /// [`crate::execute::maybe_enter_worker_mode`] before a bus was available to construct a
    /// node with: pass the same registry here instead of registering every task twice.
    pub fn with_registry(conf: NodeConf, bus: EventBus, logger: Logger, registry: TaskRegistry) -> TaskNode {
        let ident = format!("{}{}", conf.ident_prefix, uuid::Uuid::new_v4());
        let inner = NodeInner {
            ident,
            conf,
            bus,
            registry,
            state: Arc::new(StateStore::new()),
            logger,
            running: Mutex::new(HashMap::new()),
            has_running: RunningFlag::default(),
            sync_queues: Mutex::new(HashMap::new()),
            status_subscribers: Mutex::new(Vec::new()),
            pending_event_results: Mutex::new(HashMap::new()),
            started: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            upkeep: Mutex::new(Upkeep::new()),
            sync_reply_handler: Mutex::new(None),
        };
        TaskNode(Arc::new(inner))
    }

    pub fn ident(&self) -> &str {
        &self.0.ident
    }

    // -- Task registration ------------------------------------------------

    /// Register a task callable. When `name` is `None` the name is derived from the Rust path
    /// of the function item passed in; closures have no such path and must be named explicitly.
    pub fn register_task<F>(&self, name: Option<&str>, func: F) -> anyhow::Result<String>
    where
        F: Fn(Value, Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let type_name = std::any::type_name::<F>();
        let name = match name {
            Some(name) => name.to_string(),
            None => derive_task_name(type_name)
                .ok_or_else(|| InvalidArgument(format!("cannot derive a task name from '{type_name}'")))?,
        };
        let callable: TaskFn = std::sync::Arc::new(func);
        self.0.registry.register_task(name.clone(), callable)?;
        Ok(name)
    }

    pub fn unregister_task(&self, name: &str) {
        self.0.registry.unregister_task(name);
    }

    // -- Node lifecycle -----------------------------------------------------

    pub fn start(&self, block: bool) -> anyhow::Result<()> {
        if self.0.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.0.stop_requested.store(false, Ordering::SeqCst);

        std::fs::create_dir_all(&self.0.conf.tmp_path)?;

        self.subscribe_handlers();

        {
            let mut upkeep = self.0.upkeep.lock().unwrap();
            upkeep.register_thread(watcher::spawn(Arc::clone(&self.0))?);
            upkeep.register_thread(housekeeper::spawn(Arc::clone(&self.0))?);
        }

        self.0.emit_node_announce()?;
        let context = Context::for_pool(self.0.logger.clone(), self.0.conf.pool.as_deref());
        slog::info!(context.logger, "task node started"; "ident" => &self.0.ident);
        if block {
            while !self.0.stop_requested.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(200));
            }
        }
        Ok(())
    }

    pub fn stop(&self, block: bool) -> anyhow::Result<()> {
        if !self.0.started.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.0.stop_requested.store(true, Ordering::SeqCst);
        self.0.bus.emit(election::TOPIC_NODE_WITHHOLD, json!({"ident": self.0.ident}))?;
        self.unsubscribe_handlers();

        let running_ids: Vec<String> = self.0.running.lock().unwrap().keys().cloned().collect();
        for task_id in running_ids {
            self.stop_task(&task_id)?;
            if block {
                let _ = self.wait_for_task(&task_id, Some(self.0.conf.stop_node_task_wait));
            }
        }

        {
            let mut subscribers = self.0.status_subscribers.lock().unwrap();
            while let Some(handler) = subscribers.pop() {
                let _ = self.0.bus.unsubscribe(election::TOPIC_STATUS_CHANGE, &handler);
            }
        }

        self.0.upkeep.lock().unwrap().join_all(&self.0.logger);

        // The bus was handed to this node by its caller (often shared with other nodes in the
        // same process, as in the demo); shutting it down is the caller's responsibility.
        Ok(())
    }

    // -- Starting and stopping tasks ----------------------------------------

    pub fn start_task(
        &self,
        name: &str,
        args: Value,
        kwargs: Value,
        pool: Option<String>,
        meta: Option<Value>,
    ) -> anyhow::Result<Option<String>> {
        if let Some(meta) = &meta {
            if !meta.is_object() && !meta.is_null() {
                return Err(InvalidArgument("meta must be a JSON object or absent".into()).into());
            }
        }
        let task_id = self.generate_task_id();

        let pending = TaskState {
            task_id: task_id.clone(),
            requestor: self.0.ident.clone(),
            runner: None,
            status: TaskStatus::Pending,
            result: None,
            meta: meta.clone(),
        };
        self.0.state.announce_task(pending.clone());
        self.0.emit_state_announce(&pending)?;
        self.0.emit_status_change(&task_id, TaskStatus::Pending)?;

        let query_inbox = election::query_inbox(&task_id);
        let ack_inbox = election::ack_inbox(&task_id);
        let (candidate_tx, candidate_rx) = crossbeam_channel::unbounded();
        let (ack_tx, ack_rx) = crossbeam_channel::unbounded();
        self.0.sync_queues.lock().unwrap().insert(query_inbox.clone(), candidate_tx);
        self.0.sync_queues.lock().unwrap().insert(ack_inbox.clone(), ack_tx);

        self.0.bus.emit(
            election::TOPIC_START_QUERY,
            json!({
                "name": name,
                "pool": pool,
                "task_id": task_id,
                "requestor": self.0.ident,
                "sync_queue": query_inbox,
            }),
        )?;

        let mut won: Option<String> = None;
        loop {
            let candidate = match candidate_rx.recv_timeout(self.0.conf.start_max_wait) {
                Ok(candidate) => candidate,
                Err(_) => break,
            };
            let runner = match candidate.get("ident").and_then(Value::as_str) {
                Some(runner) => runner.to_string(),
                None => continue,
            };
            self.0.bus.emit(
                election::TOPIC_START_REQUEST,
                json!({
                    "name": name,
                    "meta": meta,
                    "args": args,
                    "kwargs": kwargs,
                    "pool": pool,
                    "task_id": task_id,
                    "runner": runner,
                    "requestor": self.0.ident,
                    "sync_queue": ack_inbox,
                }),
            )?;
            if ack_rx.recv_timeout(self.0.conf.start_max_wait).is_ok() {
                won = Some(task_id.clone());
                break;
            }
        }

        self.0.sync_queues.lock().unwrap().remove(&query_inbox);
        self.0.sync_queues.lock().unwrap().remove(&ack_inbox);

        if won.is_none() {
            telemetry::ELECTIONS.with_label_values(&["timed_out"]).inc();
            let stopped = TaskState {
                task_id: task_id.clone(),
                requestor: self.0.ident.clone(),
                runner: None,
                status: TaskStatus::Stopped,
                result: None,
                meta,
            };
            self.0.state.announce_task(stopped.clone());
            self.0.emit_state_announce(&stopped)?;
            self.0.emit_status_change(&task_id, TaskStatus::Stopped)?;
        } else {
            telemetry::ELECTIONS.with_label_values(&["won"]).inc();
        }

        Ok(won)
    }

    pub fn stop_task(&self, task_id: &str) -> anyhow::Result<()> {
        self.0.bus.emit(
            election::TOPIC_STOP_REQUEST,
            json!({"task_id": task_id, "requestor": self.0.ident}),
        )
    }

    // -- Waiting and joining --------------------------------------------

    pub fn wait_for_task(&self, task_id: &str, timeout: Option<Duration>) -> anyhow::Result<()> {
        if self.0.state.task(task_id).is_none() {
            self.query_task_state(Some(task_id))?;
        }
        if self.0.state.task(task_id).is_none() {
            return Err(UnknownTask(task_id.to_string()).into());
        }
        let latch = self.0.state.latch_for(task_id);
        let timeout = timeout.unwrap_or(Duration::from_secs(u64::MAX / 2));
        latch.wait_timeout(timeout);
        Ok(())
    }

    pub fn join_task(&self, task_id: &str, timeout: Option<Duration>) -> anyhow::Result<TaskResult> {
        self.wait_for_task(task_id, timeout)?;
        self.get_task_result(task_id)
    }

    // -- Status, meta, result ---------------------------------------------

    pub fn get_task_status(&self, task_id: &str) -> anyhow::Result<TaskStatus> {
        Ok(self.lookup_task(task_id)?.status)
    }

    pub fn get_task_meta(&self, task_id: &str) -> anyhow::Result<Value> {
        Ok(self.lookup_task(task_id)?.meta.unwrap_or(Value::Object(Default::default())))
    }

    pub fn get_task_result(&self, task_id: &str) -> anyhow::Result<TaskResult> {
        let state = self.lookup_task(task_id)?;
        let result = match state.result {
            Some(result) => result,
            None => return Ok(TaskResult::NoResult),
        };
        let outcome = match transport::decompress(&result) {
            Ok(outcome) => outcome,
            Err(_) => return Ok(TaskResult::NoResult),
        };
        match outcome {
            crate::model::TaskOutcome::Return(value) => Ok(TaskResult::Return(value)),
            crate::model::TaskOutcome::Raise(traceback) => {
                Err(crate::error::TaskRaised(traceback).into())
            }
        }
    }

    pub fn subscribe_to_task_statuses(&self, handler: Handler) {
        let _ = self.0.bus.subscribe(election::TOPIC_STATUS_CHANGE, Arc::clone(&handler));
        self.0.status_subscribers.lock().unwrap().push(handler);
    }

    fn lookup_task(&self, task_id: &str) -> anyhow::Result<TaskState> {
        if self.0.state.task(task_id).is_none() {
            self.query_task_state(Some(task_id))?;
        }
        self.0
            .state
            .task(task_id)
            .ok_or_else(|| UnknownTask(task_id.to_string()).into())
    }

    // -- Fleet queries ------------------------------------------------------

    fn query_task_state(&self, task_id: Option<&str>) -> anyhow::Result<()> {
        self.0.bus.emit(
            election::TOPIC_STATE_QUERY,
            json!({"task_id": task_id, "requestor": self.0.ident}),
        )?;
        std::thread::sleep(self.0.conf.query_wait);
        Ok(())
    }

    fn query_pool_state(&self, pool: &Option<String>) -> anyhow::Result<()> {
        self.0.bus.emit(
            election::TOPIC_POOL_QUERY,
            json!({"pool": pool, "requestor": self.0.ident}),
        )?;
        std::thread::sleep(self.0.conf.query_wait);
        Ok(())
    }

    /// Sum of free capacity across every node in `pool`. `None` means unlimited.
    pub fn count_free_workers(&self, pool: Option<String>) -> anyhow::Result<Option<u32>> {
        self.query_pool_state(&pool)?;
        let snapshot = self.0.state.pool_snapshot(&pool);
        let mut free = 0u32;
        for node in snapshot.values() {
            match node.task_limit.free(node.running_tasks) {
                None => return Ok(None),
                Some(available) => free += available,
            }
        }
        Ok(Some(free))
    }

    // -- Internals: election execution --------------------------------------

    fn generate_task_id(&self) -> String {
        loop {
            let candidate = uuid::Uuid::new_v4().to_string();
            if !self.0.state.known_task_ids().contains(&candidate) {
                return candidate;
            }
        }
    }

    fn execute_local_task(&self, context: &Context, task_id: &str, name: &str, meta: Value, args: Value, kwargs: Value) {
        let result = execute::spawn_child(&self.0.conf, &self.0.bus, task_id, name, &meta, &args, &kwargs);
        match result {
            Ok((child, slot)) => {
                self.0.running.lock().unwrap().insert(
                    task_id.to_string(),
                    RunningTask { child, slot, spawned_at: Instant::now() },
                );
                self.0.has_running.set(true);
                let _ = self.0.emit_node_announce();
            }
            Err(error) => {
                slog::error!(context.logger, "failed to spawn task process"; "task_id" => task_id, "error" => %error);
            }
        }
    }

    fn subscribe_handlers(&self) {
        let inner = Arc::clone(&self.0);
        let node_announce: Handler = Arc::new(move |_topic, payload| on_node_announce(&inner, payload));
        let _ = self.0.bus.subscribe(election::TOPIC_NODE_ANNOUNCE, node_announce);

        let inner = Arc::clone(&self.0);
        let node_withhold: Handler = Arc::new(move |_topic, payload| on_node_withhold(&inner, payload));
        let _ = self.0.bus.subscribe(election::TOPIC_NODE_WITHHOLD, node_withhold);

        let node_for_start_query = self.clone();
        let start_query: Handler = Arc::new(move |_topic, payload| node_for_start_query.on_start_query(payload));
        let _ = self.0.bus.subscribe(election::TOPIC_START_QUERY, start_query);

        let node_for_start_request = self.clone();
        let start_request: Handler = Arc::new(move |_topic, payload| node_for_start_request.on_start_request(payload));
        let _ = self.0.bus.subscribe(election::TOPIC_START_REQUEST, start_request);

        let inner = Arc::clone(&self.0);
        let sync_reply: Handler = Arc::new(move |_topic, payload| on_sync_reply(&inner, payload));
        *self.0.sync_reply_handler.lock().unwrap() = Some(Arc::clone(&sync_reply));
        let _ = self.0.bus.subscribe(election::TOPIC_START_CANDIDATE, Arc::clone(&sync_reply));
        let _ = self.0.bus.subscribe(election::TOPIC_START_ACK, Arc::clone(&sync_reply));

        let inner = Arc::clone(&self.0);
        let stop_request: Handler = Arc::new(move |_topic, payload| on_stop_request(&inner, payload));
        let _ = self.0.bus.subscribe(election::TOPIC_STOP_REQUEST, stop_request);

        let inner = Arc::clone(&self.0);
        let state_announce: Handler = Arc::new(move |_topic, payload| on_state_announce(&inner, payload));
        let _ = self.0.bus.subscribe(election::TOPIC_STATE_ANNOUNCE, state_announce);

        let node_for_state_query = self.clone();
        let state_query: Handler = Arc::new(move |_topic, payload| node_for_state_query.on_state_query(payload));
        let _ = self.0.bus.subscribe(election::TOPIC_STATE_QUERY, state_query);

        let inner = Arc::clone(&self.0);
        let state_reply: Handler = Arc::new(move |_topic, payload| on_state_reply(&inner, payload));
        let _ = self.0.bus.subscribe(election::TOPIC_STATE_REPLY, state_reply);

        let node_for_pool_query = self.clone();
        let pool_query: Handler = Arc::new(move |_topic, payload| node_for_pool_query.on_pool_query(payload));
        let _ = self.0.bus.subscribe(election::TOPIC_POOL_QUERY, pool_query);

        let inner = Arc::clone(&self.0);
        let pool_reply: Handler = Arc::new(move |_topic, payload| on_pool_reply(&inner, payload));
        let _ = self.0.bus.subscribe(election::TOPIC_POOL_REPLY, pool_reply);

        if matches!(self.0.conf.result_transport, crate::conf::ResultTransport::Events) {
            let inner = Arc::clone(&self.0);
            let result_payload: Handler = Arc::new(move |_topic, payload| on_result_payload(&inner, payload));
            let _ = self.0.bus.subscribe(transport::TOPIC_RESULT_PAYLOAD, result_payload);
        }
    }

    fn unsubscribe_handlers(&self) {
        // Bus-owned closures are dropped when the backend's subscriber list is cleared on
        // `stop()`; the handlers most important to remove explicitly are the ones carrying an
        // `Arc<NodeInner>` back-reference that would otherwise outlive the node.
        if let Some(handler) = self.0.sync_reply_handler.lock().unwrap().take() {
            let _ = self.0.bus.unsubscribe(election::TOPIC_START_CANDIDATE, &handler);
            let _ = self.0.bus.unsubscribe(election::TOPIC_START_ACK, &handler);
        }
    }

    fn on_start_query(&self, payload: Value) {
        let name = match payload.get("name").and_then(Value::as_str) {
            Some(name) => name,
            None => return,
        };
        if !self.0.registry.is_registered(name) {
            return;
        }
        if payload.get("pool").cloned().unwrap_or(Value::Null) != pool_value(&self.0.conf.pool) {
            return;
        }
        if !self.0.conf.task_limit.has_room(self.0.running_tasks_count()) {
            return;
        }
        let _ = self.0.bus.emit(
            election::TOPIC_START_CANDIDATE,
            json!({
                "ident": self.0.ident,
                "for_requestor": payload.get("requestor"),
                "sync_queue": payload.get("sync_queue"),
            }),
        );
    }

    fn on_start_request(&self, payload: Value) {
        if payload.get("runner").and_then(Value::as_str) != Some(self.0.ident.as_str()) {
            return;
        }
        let name = match payload.get("name").and_then(Value::as_str) {
            Some(name) => name.to_string(),
            None => return,
        };
        if !self.0.registry.is_registered(&name) {
            return;
        }
        if payload.get("pool").cloned().unwrap_or(Value::Null) != pool_value(&self.0.conf.pool) {
            return;
        }
        if !self.0.conf.task_limit.has_room(self.0.running_tasks_count()) {
            return;
        }

        let _ = self.0.bus.emit(
            election::TOPIC_START_ACK,
            json!({
                "for_requestor": payload.get("requestor"),
                "sync_queue": payload.get("sync_queue"),
            }),
        );

        let task_id = payload.get("task_id").and_then(Value::as_str).unwrap_or_default().to_string();
        let requestor = payload.get("requestor").and_then(Value::as_str).unwrap_or_default().to_string();
        let meta = payload.get("meta").cloned().unwrap_or(Value::Null);
        let args = payload.get("args").cloned().unwrap_or(Value::Null);
        let kwargs = payload.get("kwargs").cloned().unwrap_or(Value::Null);
        let meta_for_state = if meta.is_null() { None } else { Some(meta.clone()) };

        let running = TaskState {
            task_id: task_id.clone(),
            requestor,
            runner: Some(self.0.ident.clone()),
            status: TaskStatus::Running,
            result: None,
            meta: meta_for_state,
        };
        self.0.state.announce_task(running.clone());
        let _ = self.0.emit_state_announce(&running);
        let _ = self.0.emit_status_change(&task_id, TaskStatus::Running);
        telemetry::TASKS_STARTED
            .with_label_values(&[self.0.conf.pool.as_deref().unwrap_or("")])
            .inc();

        let context = Context::for_task(self.0.logger.clone(), &task_id);
        self.execute_local_task(&context, &task_id, &name, meta, args, kwargs);
    }

    fn on_state_query(&self, payload: Value) {
        let requestor = payload.get("requestor").and_then(Value::as_str).unwrap_or_default();
        if requestor == self.0.ident {
            return;
        }
        let task_id = payload.get("task_id").and_then(Value::as_str);
        match task_id {
            Some(task_id) => {
                if let Some(state) = self.0.state.task(task_id) {
                    let mut payload = serde_json::to_value(&state).unwrap_or(Value::Null);
                    if let Value::Object(map) = &mut payload {
                        map.insert("for_requestor".into(), json!(requestor));
                    }
                    let _ = self.0.bus.emit(election::TOPIC_STATE_ANNOUNCE, payload);
                }
            }
            None => {
                let snapshot = self.0.state.all_task_state();
                let _ = self.0.bus.emit(
                    election::TOPIC_STATE_REPLY,
                    json!({"for_requestor": requestor, "global_task_state": snapshot}),
                );
            }
        }
    }

    fn on_pool_query(&self, payload: Value) {
        let requestor = payload.get("requestor").and_then(Value::as_str).unwrap_or_default();
        if requestor == self.0.ident {
            return;
        }
        let pool: Option<String> = payload.get("pool").and_then(|v| v.as_str().map(String::from));
        let snapshot = self.0.state.pool_snapshot(&pool);
        let _ = self.0.bus.emit(
            election::TOPIC_POOL_REPLY,
            json!({"for_requestor": requestor, "pool": pool, "global_pool_state": snapshot}),
        );
    }
}

fn pool_value(pool: &Option<String>) -> Value {
    match pool {
        Some(pool) => Value::String(pool.clone()),
        None => Value::Null,
    }
}

fn derive_task_name(type_name: &str) -> Option<String> {
    if type_name.contains("{{closure}}") {
        return None;
    }
    type_name.rsplit("::").next().map(|name| name.to_string())
}

fn on_node_announce(inner: &Arc<NodeInner>, payload: Value) {
    if let Some(for_requestor) = payload.get("for_requestor").and_then(Value::as_str) {
        if for_requestor != inner.ident {
            return;
        }
    }
    let ident = match payload.get("ident").and_then(Value::as_str) {
        Some(ident) => ident.to_string(),
        None => return,
    };
    let pool = payload.get("pool").and_then(|v| v.as_str().map(String::from));
    let task_limit = payload
        .get("task_limit")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or(TaskLimit::Unlimited);
    let running_tasks = payload.get("running_tasks").and_then(Value::as_u64).unwrap_or(0) as u32;
    inner.state.announce_node(NodeState { ident, pool, task_limit, running_tasks });
}

fn on_node_withhold(inner: &Arc<NodeInner>, payload: Value) {
    if let Some(ident) = payload.get("ident").and_then(Value::as_str) {
        inner.state.withhold_node(ident);
    }
}

fn on_sync_reply(inner: &Arc<NodeInner>, payload: Value) {
    if payload.get("for_requestor").and_then(Value::as_str) != Some(inner.ident.as_str()) {
        return;
    }
    let sync_queue = match payload.get("sync_queue").and_then(Value::as_str) {
        Some(sync_queue) => sync_queue,
        None => return,
    };
    if let Some(sender) = inner.sync_queues.lock().unwrap().get(sync_queue) {
        let _ = sender.send(payload);
    }
}

fn on_stop_request(inner: &Arc<NodeInner>, payload: Value) {
    let task_id = match payload.get("task_id").and_then(Value::as_str) {
        Some(task_id) => task_id,
        None => return,
    };
    // `kill_on_stop` is accepted for parity with the fleet-wide config surface, but a graceful
    // SIGTERM has no safe stdlib equivalent; every stop request is a hard kill.
    let mut running = inner.running.lock().unwrap();
    if let Some(task) = running.get_mut(task_id) {
        if let Err(error) = task.child.kill() {
            slog::warn!(inner.logger, "failed to kill task process"; "task_id" => task_id, "error" => %error);
        }
    }
}

fn on_state_announce(inner: &Arc<NodeInner>, payload: Value) {
    if let Some(for_requestor) = payload.get("for_requestor").and_then(Value::as_str) {
        if for_requestor != inner.ident {
            return;
        }
    }
    if let Ok(state) = serde_json::from_value::<TaskState>(payload) {
        inner.state.announce_task(state);
    }
}

fn on_state_reply(inner: &Arc<NodeInner>, payload: Value) {
    if payload.get("for_requestor").and_then(Value::as_str) != Some(inner.ident.as_str()) {
        return;
    }
    let incoming: HashMap<String, TaskState> = match payload
        .get("global_task_state")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
    {
        Some(incoming) => incoming,
        None => return,
    };
    let locally_running: Vec<String> = inner.running.lock().unwrap().keys().cloned().collect();
    inner.state.merge_task_snapshot(incoming, &locally_running);
}

fn on_pool_reply(inner: &Arc<NodeInner>, payload: Value) {
    if payload.get("for_requestor").and_then(Value::as_str) != Some(inner.ident.as_str()) {
        return;
    }
    let pool: Option<String> = payload.get("pool").and_then(|v| v.as_str().map(String::from));
    let incoming: HashMap<String, NodeState> = match payload
        .get("global_pool_state")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
    {
        Some(incoming) => incoming,
        None => return,
    };
    inner.state.merge_pool_snapshot(&pool, incoming);
}

fn on_result_payload(inner: &Arc<NodeInner>, payload: Value) {
    let task_id = match payload.get("task_id").and_then(Value::as_str) {
        Some(task_id) => task_id.to_string(),
        None => return,
    };
    if !inner.running.lock().unwrap().contains_key(&task_id) {
        return;
    }
    match transport::decode_event_payload(&payload) {
        Ok(outcome) => {
            if let Ok(bytes) = transport::compress(&outcome) {
                inner.pending_event_results.lock().unwrap().insert(task_id, bytes);
            }
        }
        Err(error) => {
            slog::warn!(inner.logger, "failed to decode task result payload"; "task_id" => %task_id, "error" => %error);
        }
    }
}
