//! `files` result transport: a plain file under the node's tmp directory.
use std::fs;
use std::path::Path;

use crate::model::TaskOutcome;

pub fn write(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, bytes)?;
    Ok(())
}

/// Read and delete the result file if the child has written one yet.
pub fn try_collect(path: &Path) -> anyhow::Result<Option<TaskOutcome>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(path)?;
    let _ = fs::remove_file(path);
    Ok(Some(super::decompress(&bytes)?))
}
