//! The [`Context`] is a general purpose immutable container to carry scoped values around.
//!
//! Every call into the task node, and every iteration of a background loop, carries a
//! [`Context`] so log lines are automatically tagged with the node, task or election they
//! concern.
//!
//! Contexts are organised into a tree structure:
//!
//! - A root context represents the general process wide scope.
//! - Derived contexts represents a narrower scope within their parent with additional
//!   or updated information attached to them.
//!
//! For example: [`Context`]s provide access to the current [`Logger`].
//! For the root context this is the process-wide logger with no additional attributes.
//! But for individual operations a derived context can be provided with a [`Logger`] decorated
//! with the task ID or pool name.
use slog::Logger;
use slog::OwnedKV;
use slog::SendSyncRefUnwindSafeKV;

/// The [`Context`] is a general purpose container to carry scoped values around.
///
/// Refer to the [crate level docs](crate) for details.
#[derive(Clone, Debug)]
pub struct Context {
    /// Logger with contextual attributes attached to it.
    pub logger: Logger,
}

impl Context {
    /// Derive a new [`Context`] by making changes to the current one.
    pub fn derive(&self) -> ContextBuilder {
        ContextBuilder {
            logger: self.logger.clone(),
        }
    }

    /// Derive a new [`Context`] by making changes to the current one using the provided callback.
    pub fn derive_with<F>(&self, callback: F) -> Context
    where
        F: FnOnce(ContextBuilder) -> ContextBuilder,
    {
        let builder = callback(self.derive());
        builder.build()
    }

    /// Initialise a new root context with no values attached.
    pub fn root(logger: Logger) -> ContextBuilder {
        ContextBuilder { logger }
    }

    /// A context scoped to one task, tagging every log line it produces with its id.
    pub fn for_task(logger: Logger, task_id: &str) -> Context {
        Context::root(logger)
            .log_values(slog::o!("task_id" => task_id.to_string()))
            .build()
    }

    /// A context scoped to one pool, tagging every log line it produces with the pool name
    /// (`"-"` for the unpooled bucket).
    pub fn for_pool(logger: Logger, pool: Option<&str>) -> Context {
        Context::root(logger)
            .log_values(slog::o!("pool" => pool.unwrap_or("-").to_string()))
            .build()
    }
}

/// A builder for root and derived contexts.
pub struct ContextBuilder {
    logger: Logger,
}

impl ContextBuilder {
    /// Finalise the build process and return a new [`Context`].
    pub fn build(self) -> Context {
        Context {
            logger: self.logger,
        }
    }

    /// Update the [`Context`] logger to attach new log key/pair values.
    pub fn log_values<T>(mut self, entries: OwnedKV<T>) -> Self
    where
        T: SendSyncRefUnwindSafeKV + 'static,
    {
        self.logger = self.logger.new(entries);
        self
    }
}

#[cfg(any(test, feature = "test-fixture"))]
impl Context {
    /// Create an empty context useful for test.
    pub fn fixture() -> Context {
        let logger = Logger::root(slog::Discard, slog::o!());
        Context { logger }
    }
}

#[cfg(test)]
mod tests {
    use super::Context;
    use slog::Logger;

    #[test]
    fn derive_log_attributes() {
        let root = Context::fixture();
        let parent = root
            .derive()
            .log_values(slog::o!("root" => "value", "test" => "root"))
            .build();
        let context = parent
            .derive()
            .log_values(slog::o!("test" => "override"))
            .build();
        assert_eq!(format!("{:?}", context.logger.list()), "(test, test, root)");
    }

    #[test]
    fn derive_noop() {
        let parent = Context::fixture();
        let context = parent.derive().build();
        assert_eq!(
            format!("{:?}", parent.logger.list()),
            format!("{:?}", context.logger.list()),
        );
    }

    #[test]
    fn for_task_tags_task_id() {
        let logger = Logger::root(slog::Discard, slog::o!());
        let context = Context::for_task(logger, "task-1");
        assert_eq!(format!("{:?}", context.logger.list()), "(task_id, task_id)");
    }

    #[test]
    fn for_pool_defaults_to_dash() {
        let logger = Logger::root(slog::Discard, slog::o!());
        let context = Context::for_pool(logger, None);
        assert_eq!(format!("{:?}", context.logger.list()), "(pool, pool)");
    }
}
