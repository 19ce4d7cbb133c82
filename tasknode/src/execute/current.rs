//! Lets a running task body read its own identity without threading it through every call.
use std::cell::RefCell;

use serde_json::Value;

/// Identity and caller-supplied metadata visible to a task body while it executes.
#[derive(Clone, Debug)]
pub struct CurrentTask {
    pub id: String,
    pub meta: Value,
}

thread_local! {
    static CURRENT: RefCell<Option<CurrentTask>> = const { RefCell::new(None) };
}

/// Read the identity of the task executing on this thread, if any.
///
/// Only set inside the child process while the registered callable runs.
pub fn current() -> Option<CurrentTask> {
    CURRENT.with(|cell| cell.borrow().clone())
}

pub(crate) fn set(task: CurrentTask) {
    CURRENT.with(|cell| *cell.borrow_mut() = Some(task));
}

pub(crate) fn clear() {
    CURRENT.with(|cell| *cell.borrow_mut() = None);
}
