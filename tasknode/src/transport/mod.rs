//! The three interchangeable channels a child process uses to ship its result home.
use std::io::Read;
use std::io::Write;
use std::os::unix::net::UnixListener;
use std::path::Path;
use std::path::PathBuf;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::bus::BusConfig;
use crate::bus::EventBus;
use crate::conf::NodeConf;
use crate::conf::ResultTransport;
use crate::model::TaskOutcome;

mod files;
mod memory;

pub const ENV_TRANSPORT: &str = "TASKNODE_RESULT_TRANSPORT";
pub const ENV_RESULT_PATH: &str = "TASKNODE_RESULT_PATH";
pub const ENV_BUS_CONFIG: &str = "TASKNODE_BUS_CONFIG";

/// Topic the `events` transport emits the compressed result on.
pub const TOPIC_RESULT_PAYLOAD: &str = "task_result_payload";

pub fn compress(outcome: &TaskOutcome) -> anyhow::Result<Vec<u8>> {
    let json = serde_json::to_vec(outcome)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

pub fn decompress(bytes: &[u8]) -> anyhow::Result<TaskOutcome> {
    let mut decoder = GzDecoder::new(bytes);
    let mut json = Vec::new();
    decoder.read_to_end(&mut json)?;
    Ok(serde_json::from_slice(&json)?)
}

/// Parent-side handle set up before a child is spawned and consumed by the watcher afterwards.
pub enum ResultSlot {
    Files { path: PathBuf },
    Events,
    Memory { path: PathBuf, listener: UnixListener },
}

impl ResultSlot {
    /// Prepare the channel for a task, binding any host-local resources the transport needs.
    pub fn prepare(conf: &NodeConf, task_id: &str) -> anyhow::Result<ResultSlot> {
        match conf.result_transport {
            ResultTransport::Files => Ok(ResultSlot::Files {
                path: conf.tmp_path.join(format!("{task_id}.bin")),
            }),
            ResultTransport::Events => Ok(ResultSlot::Events),
            ResultTransport::Memory => {
                let path = conf.tmp_path.join(format!(".memq-{task_id}.sock"));
                let listener = memory::bind(&path)?;
                Ok(ResultSlot::Memory { path, listener })
            }
        }
    }

    /// Environment variables the child needs in order to deliver its result through this slot.
    pub fn child_env(&self, bus: &EventBus) -> Vec<(String, String)> {
        match self {
            ResultSlot::Files { path } => vec![
                (ENV_TRANSPORT.to_string(), "files".to_string()),
                (ENV_RESULT_PATH.to_string(), path.display().to_string()),
            ],
            ResultSlot::Memory { path, .. } => vec![
                (ENV_TRANSPORT.to_string(), "memory".to_string()),
                (ENV_RESULT_PATH.to_string(), path.display().to_string()),
            ],
            ResultSlot::Events => {
                let config = serde_json::to_string(&bus.clone_config()).unwrap_or_default();
                vec![
                    (ENV_TRANSPORT.to_string(), "events".to_string()),
                    (ENV_BUS_CONFIG.to_string(), config),
                ]
            }
        }
    }

    /// Poll for a result without blocking. `Events` always returns `None`: its results arrive
    /// asynchronously through a bus subscription the node keeps independently of this slot.
    pub fn try_collect(&self) -> anyhow::Result<Option<TaskOutcome>> {
        match self {
            ResultSlot::Files { path } => files::try_collect(path),
            ResultSlot::Memory { listener, .. } => memory::try_collect(listener),
            ResultSlot::Events => Ok(None),
        }
    }
}

impl Drop for ResultSlot {
    fn drop(&mut self) {
        if let ResultSlot::Memory { path, .. } = self {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Entry point used from inside a re-exec'd child process to ship its outcome home.
pub fn send_from_child(outcome: &TaskOutcome) -> anyhow::Result<()> {
    let bytes = compress(outcome)?;
    let transport = std::env::var(ENV_TRANSPORT).unwrap_or_default();
    match transport.as_str() {
        "files" => {
            let path = std::env::var(ENV_RESULT_PATH)?;
            files::write(Path::new(&path), &bytes)
        }
        "memory" => {
            let path = std::env::var(ENV_RESULT_PATH)?;
            memory::send(Path::new(&path), &bytes)
        }
        "events" => {
            let config_raw = std::env::var(ENV_BUS_CONFIG)?;
            let config: BusConfig = serde_json::from_str(&config_raw)?;
            let bus = EventBus::connect(&config)?;
            let payload = serde_json::json!({
                "task_id": std::env::var("TASKNODE_TASK_ID").unwrap_or_default(),
                "payload": base64_encode(&bytes),
            });
            bus.emit(TOPIC_RESULT_PAYLOAD, payload)
        }
        other => anyhow::bail!("unknown result transport '{other}'"),
    }
}

/// Decode the base64 payload carried by a `task_result_payload` event.
pub fn decode_event_payload(payload: &serde_json::Value) -> anyhow::Result<TaskOutcome> {
    let encoded = payload
        .get("payload")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("task_result_payload event missing 'payload' field"))?;
    let bytes = base64_decode(encoded)?;
    decompress(&bytes)
}

// A dependency-free base64 codec is used here rather than pulling in the `base64` crate solely
// to move a handful of bytes through a JSON string field.
fn base64_encode(bytes: &[u8]) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::with_capacity((bytes.len() + 2) / 3 * 4);
    for chunk in bytes.chunks(3) {
        let b0 = chunk[0];
        let b1 = *chunk.get(1).unwrap_or(&0);
        let b2 = *chunk.get(2).unwrap_or(&0);
        out.push(ALPHABET[(b0 >> 2) as usize] as char);
        out.push(ALPHABET[(((b0 & 0x03) << 4) | (b1 >> 4)) as usize] as char);
        out.push(if chunk.len() > 1 {
            ALPHABET[(((b1 & 0x0f) << 2) | (b2 >> 6)) as usize] as char
        } else {
            '='
        });
        out.push(if chunk.len() > 2 {
            ALPHABET[(b2 & 0x3f) as usize] as char
        } else {
            '='
        });
    }
    out
}

fn base64_decode(input: &str) -> anyhow::Result<Vec<u8>> {
    fn value(byte: u8) -> anyhow::Result<u8> {
        match byte {
            b'A'..=b'Z' => Ok(byte - b'A'),
            b'a'..=b'z' => Ok(byte - b'a' + 26),
            b'0'..=b'9' => Ok(byte - b'0' + 52),
            b'+' => Ok(62),
            b'/' => Ok(63),
            _ => anyhow::bail!("invalid base64 byte"),
        }
    }
    let input = input.trim_end_matches('=');
    let mut out = Vec::new();
    let bytes: Vec<u8> = input.bytes().collect();
    for chunk in bytes.chunks(4) {
        let values: Vec<u8> = chunk.iter().map(|b| value(*b)).collect::<anyhow::Result<_>>()?;
        out.push((values[0] << 2) | (values.get(1).copied().unwrap_or(0) >> 4));
        if values.len() > 2 {
            out.push((values[1] << 4) | (values[2] >> 2));
        }
        if values.len() > 3 {
            out.push((values[2] << 6) | values[3]);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_base64() {
        let bytes = b"compressed-ish payload bytes \x00\x01\x02";
        let encoded = base64_encode(bytes);
        let decoded = base64_decode(&encoded).unwrap();
        assert_eq!(decoded, bytes);
    }

    #[test]
    fn compress_then_decompress_outcome() {
        let outcome = TaskOutcome::Return(serde_json::json!({"sum": 5}));
        let bytes = compress(&outcome).unwrap();
        let decoded = decompress(&bytes).unwrap();
        match decoded {
            TaskOutcome::Return(value) => assert_eq!(value["sum"], 5),
            TaskOutcome::Raise(_) => panic!("expected a return outcome"),
        }
    }
}
