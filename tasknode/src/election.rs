//! Topic names and payload helpers for the election and replicated-state protocol.
//!
//! Every payload is a plain [`serde_json::Value`] map; field names are the wire contract and
//! must match byte for byte across nodes, so they are built and read only through the helpers
//! here rather than scattered `json!` calls through the node.

pub const TOPIC_NODE_ANNOUNCE: &str = "task_node_announce";
pub const TOPIC_NODE_WITHHOLD: &str = "task_node_withhold";

pub const TOPIC_START_QUERY: &str = "task_start_query";
pub const TOPIC_START_CANDIDATE: &str = "task_start_candidate";
pub const TOPIC_START_REQUEST: &str = "task_start_request";
pub const TOPIC_START_ACK: &str = "task_start_ack";

pub const TOPIC_STOP_REQUEST: &str = "task_stop_request";
pub const TOPIC_STATE_ANNOUNCE: &str = "task_state_announce";
pub const TOPIC_STATUS_CHANGE: &str = "task_status_change";

pub const TOPIC_STATE_QUERY: &str = "task_state_query";
pub const TOPIC_STATE_REPLY: &str = "task_state_reply";
pub const TOPIC_POOL_QUERY: &str = "task_pool_query";
pub const TOPIC_POOL_REPLY: &str = "task_pool_reply";

/// Name of the per-task, single-consumer inbox a requestor waits on for a volunteer.
pub fn query_inbox(task_id: &str) -> String {
    format!("task_start_query_{task_id}")
}

/// Name of the per-task, single-consumer inbox a requestor waits on for an ack.
pub fn ack_inbox(task_id: &str) -> String {
    format!("task_start_ack_{task_id}")
}
