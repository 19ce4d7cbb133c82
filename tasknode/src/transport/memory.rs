//! `memory` result transport: a one-shot host-local socket established before the child spawns.
//!
//! Real shared memory between unrelated OS processes needs `mmap` and manual synchronisation;
//! a short-lived `UnixListener` gives the same "no durable artifact, same host only" semantics
//! with none of the `unsafe` code.
use std::fs;
use std::io::ErrorKind;
use std::io::Read;
use std::io::Write;
use std::os::unix::net::UnixListener;
use std::os::unix::net::UnixStream;
use std::path::Path;

use crate::model::TaskOutcome;

/// Bind the listener the child will connect back to. Must happen before the child is spawned.
pub fn bind(path: &Path) -> anyhow::Result<UnixListener> {
    let _ = fs::remove_file(path);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let listener = UnixListener::bind(path)?;
    listener.set_nonblocking(true)?;
    Ok(listener)
}

/// Non-blocking poll for a connection carrying a result.
pub fn try_collect(listener: &UnixListener) -> anyhow::Result<Option<TaskOutcome>> {
    match listener.accept() {
        Ok((mut stream, _)) => {
            stream.set_nonblocking(false)?;
            let mut bytes = Vec::new();
            stream.read_to_end(&mut bytes)?;
            Ok(Some(super::decompress(&bytes)?))
        }
        Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Called from inside the child process to deliver its result and disconnect.
pub fn send(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let mut stream = UnixStream::connect(path)?;
    stream.write_all(bytes)?;
    Ok(())
}
