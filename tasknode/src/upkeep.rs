//! Minimal thread bookkeeping for the node's background loops.
//!
//! `service/tasks` in this codebase's older worker-pool layer leans on an external
//! `replicante_util_upkeep::Upkeep` to register spawned [`humthreads`] handles and join them on
//! shutdown. That crate is not part of this node's dependency set, so the same small pattern is
//! reproduced here directly: register a handle as it is spawned, join everything on `stop`.
use humthreads::Thread;

/// Registers background thread handles and joins them once, on shutdown.
#[derive(Default)]
pub struct Upkeep {
    threads: Vec<Thread<()>>,
}

impl Upkeep {
    pub fn new() -> Self {
        Upkeep::default()
    }

    pub fn register_thread(&mut self, thread: Thread<()>) {
        self.threads.push(thread);
    }

    /// Join every registered thread, logging (not panicking on) join failures.
    pub fn join_all(&mut self, logger: &slog::Logger) {
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                slog::warn!(logger, "background thread panicked while shutting down");
            }
        }
    }
}
