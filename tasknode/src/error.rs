//! Errors reported by the task node.

/// A caller-supplied argument is not valid for the operation requested.
#[derive(Debug, thiserror::Error)]
#[error("invalid argument: {0}")]
pub struct InvalidArgument(pub String);

/// No node in the fleet could describe the requested task within the query window.
#[derive(Debug, thiserror::Error)]
#[error("task '{0}' is not known to this node or any responding peer")]
pub struct UnknownTask(pub String);

/// The task's child process reported a raised error instead of a return value.
#[derive(Debug, thiserror::Error)]
#[error("task raised an error:\n{0}")]
pub struct TaskRaised(pub String);

/// The event bus failed to deliver or accept a message.
///
/// Background threads catch and log this; it is never fatal to a loop.
#[derive(Debug, thiserror::Error)]
#[error("event bus transport error: {0}")]
pub struct BusTransient(pub String);

/// No candidate volunteered to run a task before `start_max_wait` elapsed.
#[derive(Debug, thiserror::Error)]
#[error("no node volunteered to run task '{0}' in time")]
pub struct ElectionTimeout(pub String);

/// A task name was already registered under a different callable.
#[derive(Debug, thiserror::Error)]
#[error("task '{0}' is already registered")]
pub struct AlreadyRegistered(pub String);
