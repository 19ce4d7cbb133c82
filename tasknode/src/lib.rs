//! A peer-to-peer fleet of task nodes: any node can request a task, any eligible node can
//! volunteer to run it, and a short election decides which one does.
//!
//! Nodes announce themselves and their running tasks on a shared event bus, replicate task and
//! pool state opportunistically as they observe it, and isolate every task body inside its own
//! OS process so a task that panics or hangs cannot take the node down with it.
pub mod bus;
pub mod conf;
pub mod election;
pub mod error;
pub mod execute;
mod housekeeper;
pub mod model;
pub mod node;
pub mod registry;
mod store;
mod telemetry;
pub mod transport;
mod upkeep;
mod watcher;

pub use self::bus::BusConfig;
pub use self::bus::EventBus;
pub use self::conf::NodeConf;
pub use self::node::TaskNode;
pub use self::node::TaskResult;
pub use self::registry::TaskRegistry;
pub use self::telemetry::register_metrics;
