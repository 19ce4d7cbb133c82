//! The event bus interface the task node consumes.
//!
//! The bus is a pub/sub transport: messages published on a topic are delivered to every node
//! subscribed to that topic, including the publisher. The task node never implements a wire
//! protocol of its own beyond this contract; [`local::LocalBus`] is the host-local, socket
//! backed implementation used by the demo binary and by every test in this crate.
use std::sync::Arc;

use serde_json::Value;

mod local;

pub use self::local::LocalBus;

/// Callback invoked with the topic and decoded payload of a delivered message.
pub type Handler = Arc<dyn Fn(&str, Value) + Send + Sync>;

/// A snapshot sufficient to build a client of an already-running bus from another process.
///
/// Carried into a child process's environment so it can emit results without sharing memory
/// with its parent.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub enum BusConfig {
    Local { socket_path: std::path::PathBuf },
}

/// Operations every bus backend must provide.
pub trait EventBusBackend: Send + Sync {
    fn emit(&self, topic: &str, payload: Value) -> anyhow::Result<()>;
    fn subscribe(&self, topic: &str, handler: Handler) -> anyhow::Result<()>;
    fn unsubscribe(&self, topic: &str, handler: &Handler) -> anyhow::Result<()>;
    fn start(&self) -> anyhow::Result<()>;
    fn stop(&self) -> anyhow::Result<()>;
    fn started(&self) -> bool;
    fn clone_config(&self) -> BusConfig;
}

/// A cheaply cloneable handle to an event bus backend.
#[derive(Clone)]
pub struct EventBus(Arc<dyn EventBusBackend>);

impl EventBus {
    pub fn emit(&self, topic: &str, payload: Value) -> anyhow::Result<()> {
        self.0.emit(topic, payload)
    }

    pub fn subscribe(&self, topic: &str, handler: Handler) -> anyhow::Result<()> {
        self.0.subscribe(topic, handler)
    }

    pub fn unsubscribe(&self, topic: &str, handler: &Handler) -> anyhow::Result<()> {
        self.0.unsubscribe(topic, handler)
    }

    pub fn start(&self) -> anyhow::Result<()> {
        self.0.start()
    }

    pub fn stop(&self) -> anyhow::Result<()> {
        self.0.stop()
    }

    pub fn started(&self) -> bool {
        self.0.started()
    }

    /// A snapshot a child process can use to build an equivalent client.
    pub fn clone_config(&self) -> BusConfig {
        self.0.clone_config()
    }

    /// Build a client that talks to an already-running bus described by `config`.
    pub fn connect(config: &BusConfig) -> anyhow::Result<EventBus> {
        match config {
            BusConfig::Local { socket_path } => {
                Ok(EventBus(Arc::new(LocalBus::connect(socket_path)?)))
            }
        }
    }
}

impl<T> From<T> for EventBus
where
    T: EventBusBackend + 'static,
{
    fn from(value: T) -> Self {
        EventBus(Arc::new(value))
    }
}

#[cfg(any(test, feature = "test-fixture"))]
pub mod fixture {
    //! A recording handler useful for assertions in tests.
    use std::sync::Arc;
    use std::sync::Mutex;

    use serde_json::Value;

    use super::Handler;

    #[derive(Clone, Default)]
    pub struct RecordingHandler {
        received: Arc<Mutex<Vec<(String, Value)>>>,
    }

    impl RecordingHandler {
        pub fn new() -> Self {
            RecordingHandler::default()
        }

        pub fn into_handler(&self) -> Handler {
            let received = Arc::clone(&self.received);
            Arc::new(move |topic, payload| {
                received.lock().unwrap().push((topic.to_string(), payload));
            })
        }

        pub fn received(&self) -> Vec<(String, Value)> {
            self.received.lock().unwrap().clone()
        }
    }
}
