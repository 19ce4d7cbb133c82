//! Host-local, `UnixListener`-backed implementation of [`super::EventBusBackend`].
//!
//! One process (normally the node that created the [`LocalBus`]) runs the broker: it accepts
//! connections and fans messages published on a topic out to every connection subscribed to
//! that topic, publisher included. Every other connection, including ones opened from a
//! re-exec'd child process via [`super::BusConfig`], is a plain client of that broker.
use std::collections::HashMap;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Write;
use std::os::unix::net::UnixListener;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread::JoinHandle;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use super::BusConfig;
use super::Handler;

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Wire {
    Subscribe { topic: String },
    Emit { topic: String, payload: Value },
    Event { topic: String, payload: Value },
}

fn write_message(stream: &mut UnixStream, message: &Wire) -> anyhow::Result<()> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    stream.write_all(&line)?;
    Ok(())
}

struct Broker {
    socket_path: PathBuf,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
    running: Arc<AtomicBool>,
}

type SubscriberMap = Arc<Mutex<HashMap<String, Vec<UnixStream>>>>;

impl Broker {
    fn start(socket_path: PathBuf) -> anyhow::Result<Broker> {
        let _ = std::fs::remove_file(&socket_path);
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(&socket_path)?;
        let running = Arc::new(AtomicBool::new(true));
        let subscribers: SubscriberMap = Arc::new(Mutex::new(HashMap::new()));

        let thread_running = Arc::clone(&running);
        let accept_thread = std::thread::spawn(move || {
            for incoming in listener.incoming() {
                if !thread_running.load(Ordering::Relaxed) {
                    break;
                }
                let stream = match incoming {
                    Ok(stream) => stream,
                    Err(_) => continue,
                };
                let subscribers = Arc::clone(&subscribers);
                std::thread::spawn(move || Broker::serve_connection(stream, subscribers));
            }
        });

        Ok(Broker {
            socket_path,
            accept_thread: Mutex::new(Some(accept_thread)),
            running,
        })
    }

    fn serve_connection(stream: UnixStream, subscribers: SubscriberMap) {
        let reader = BufReader::new(match stream.try_clone() {
            Ok(clone) => clone,
            Err(_) => return,
        });
        for line in reader.lines() {
            let line = match line {
                Ok(line) => line,
                Err(_) => break,
            };
            if line.is_empty() {
                continue;
            }
            let message: Wire = match serde_json::from_str(&line) {
                Ok(message) => message,
                Err(_) => continue,
            };
            match message {
                Wire::Subscribe { topic } => {
                    if let Ok(writer) = stream.try_clone() {
                        subscribers.lock().unwrap().entry(topic).or_default().push(writer);
                    }
                }
                Wire::Emit { topic, payload } => {
                    let mut guard = subscribers.lock().unwrap();
                    if let Some(writers) = guard.get_mut(&topic) {
                        let event = Wire::Event { topic: topic.clone(), payload };
                        writers.retain_mut(|writer| write_message(writer, &event).is_ok());
                    }
                }
                Wire::Event { .. } => {}
            }
        }
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = UnixStream::connect(&self.socket_path);
        if let Some(thread) = self.accept_thread.lock().unwrap().take() {
            let _ = thread.join();
        }
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

/// Client (and, when it bound the broker, owner) of a host-local pub/sub bus.
pub struct LocalBus {
    socket_path: PathBuf,
    broker: Option<Broker>,
    writer: Mutex<UnixStream>,
    handlers: Arc<Mutex<HashMap<String, Vec<Handler>>>>,
    reader_thread: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl LocalBus {
    /// Bind a fresh broker at `socket_path` and connect this process to it.
    pub fn bind(socket_path: impl Into<PathBuf>) -> anyhow::Result<LocalBus> {
        let socket_path = socket_path.into();
        let broker = Broker::start(socket_path.clone())?;
        LocalBus::new(socket_path, Some(broker))
    }

    /// Connect as a client to a broker already bound elsewhere (typically by the parent process).
    pub fn connect(socket_path: impl AsRef<Path>) -> anyhow::Result<LocalBus> {
        LocalBus::new(socket_path.as_ref().to_path_buf(), None)
    }

    fn new(socket_path: PathBuf, broker: Option<Broker>) -> anyhow::Result<LocalBus> {
        let stream = LocalBus::dial(&socket_path)?;
        let reader_stream = stream.try_clone()?;
        let handlers: Arc<Mutex<HashMap<String, Vec<Handler>>>> = Arc::new(Mutex::new(HashMap::new()));
        let dispatch_handlers = Arc::clone(&handlers);
        let reader_thread = std::thread::spawn(move || {
            let reader = BufReader::new(reader_stream);
            for line in reader.lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(_) => break,
                };
                if line.is_empty() {
                    continue;
                }
                if let Ok(Wire::Event { topic, payload }) = serde_json::from_str(&line) {
                    let guard = dispatch_handlers.lock().unwrap();
                    if let Some(handlers) = guard.get(&topic) {
                        for handler in handlers {
                            handler(&topic, payload.clone());
                        }
                    }
                }
            }
        });

        Ok(LocalBus {
            socket_path,
            broker,
            writer: Mutex::new(stream),
            handlers,
            reader_thread: Mutex::new(Some(reader_thread)),
            started: AtomicBool::new(true),
        })
    }

    fn dial(socket_path: &Path) -> anyhow::Result<UnixStream> {
        // The broker's accept loop starts asynchronously; give it a moment to come up.
        let mut last_err = None;
        for _ in 0..50 {
            match UnixStream::connect(socket_path) {
                Ok(stream) => return Ok(stream),
                Err(err) => {
                    last_err = Some(err);
                    std::thread::sleep(std::time::Duration::from_millis(10));
                }
            }
        }
        Err(last_err.unwrap().into())
    }
}

impl super::EventBusBackend for LocalBus {
    fn emit(&self, topic: &str, payload: Value) -> anyhow::Result<()> {
        let message = Wire::Emit { topic: topic.to_string(), payload };
        let mut writer = self.writer.lock().unwrap();
        write_message(&mut writer, &message)
    }

    fn subscribe(&self, topic: &str, handler: Handler) -> anyhow::Result<()> {
        let mut guard = self.handlers.lock().unwrap();
        let first_for_topic = !guard.contains_key(topic);
        guard.entry(topic.to_string()).or_default().push(handler);
        drop(guard);
        if first_for_topic {
            let mut writer = self.writer.lock().unwrap();
            write_message(&mut writer, &Wire::Subscribe { topic: topic.to_string() })?;
        }
        Ok(())
    }

    fn unsubscribe(&self, topic: &str, handler: &Handler) -> anyhow::Result<()> {
        let mut guard = self.handlers.lock().unwrap();
        if let Some(handlers) = guard.get_mut(topic) {
            handlers.retain(|existing| !Arc::ptr_eq(existing, handler));
        }
        Ok(())
    }

    fn start(&self) -> anyhow::Result<()> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> anyhow::Result<()> {
        self.started.store(false, Ordering::SeqCst);
        if let Some(broker) = &self.broker {
            broker.stop();
        }
        Ok(())
    }

    fn started(&self) -> bool {
        self.started.load(Ordering::Relaxed)
    }

    fn clone_config(&self) -> BusConfig {
        BusConfig::Local { socket_path: self.socket_path.clone() }
    }
}

impl Drop for LocalBus {
    fn drop(&mut self) {
        if let Some(thread) = self.reader_thread.lock().unwrap().take() {
            // The socket is closed by the OS once every handle to it is dropped; detach rather
            // than block shutdown on a reader thread that may be parked in a blocking read.
            drop(thread);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use serde_json::json;

    use super::super::EventBus;
    use super::super::EventBusBackend;
    use super::LocalBus;

    #[test]
    fn emit_reaches_local_subscriber() {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::from(LocalBus::bind(dir.path().join("bus.sock")).unwrap());
        let received = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&received);
        bus.subscribe(
            "topic",
            Arc::new(move |_topic, _payload| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();
        bus.emit("topic", json!({"hello": "world"})).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(100));
        assert_eq!(received.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cross_connection_fanout() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("bus.sock");
        let publisher = LocalBus::bind(&socket_path).unwrap();
        let subscriber = LocalBus::connect(&socket_path).unwrap();
        let received = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&received);
        subscriber
            .subscribe(
                "topic",
                Arc::new(move |_topic, _payload| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));
        publisher.emit("topic", json!(1)).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(100));
        assert_eq!(received.load(Ordering::SeqCst), 1);
    }
}
