//! Durable storage helpers shared by the stats store, access tracker and
//! forecaster.
//!
//! Logs are newline-delimited JSON. Readers are forgiving: a missing file is
//! an empty log, a corrupt line is skipped with a warning, unknown fields are
//! ignored and missing fields fall back to their serde defaults. Writers
//! rewrite the whole file through a temp file + rename while holding an
//! exclusive lock on `<dir>/.lock`, so two processes sharing a data dir never
//! interleave partial writes.

use anyhow::{Context, Result};
use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::errors::EngineError;

const LOCK_FILE: &str = ".lock";

/// Create `dir` (and parents) or fail hard.
pub fn ensure_dir(dir: &Path) -> Result<(), EngineError> {
    fs::create_dir_all(dir).map_err(|source| EngineError::StorageUnavailable {
        path: dir.to_path_buf(),
        source,
    })
}

/// Exclusive advisory lock over a data directory. Released on drop.
pub struct DirLock {
    file: File,
}

impl DirLock {
    pub fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("Failed to open lock file: {}", path.display()))?;
        file.lock_exclusive()
            .with_context(|| format!("Failed to lock {}", path.display()))?;
        Ok(Self { file })
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Read every parseable record from a JSONL file.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Vec<T> {
    if !path.exists() {
        return Vec::new();
    }

    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read log, starting empty");
            return Vec::new();
        }
    };

    let mut records = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(trimmed) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    line = line_no + 1,
                    error = %e,
                    "Skipping malformed log line"
                );
            }
        }
    }
    records
}

/// Replace a JSONL file with the given records.
pub fn write_jsonl<'a, T, I>(path: &Path, records: I) -> Result<()>
where
    T: Serialize + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut buf = String::new();
    for record in records {
        let line = serde_json::to_string(record).context("Failed to serialize log record")?;
        buf.push_str(&line);
        buf.push('\n');
    }
    write_atomic(path, buf.as_bytes())
}

/// Read a single JSON document, returning `None` when absent or corrupt.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    if !path.exists() {
        return None;
    }
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read state file");
            return None;
        }
    };
    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring corrupt state file");
            None
        }
    }
}

/// Replace a JSON document.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize state")?;
    write_atomic(path, json.as_bytes())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let _lock = DirLock::acquire(&dir)?;

    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp)
            .with_context(|| format!("Failed to create {}", tmp.display()))?;
        file.write_all(bytes)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        file.sync_all()
            .with_context(|| format!("Failed to sync {}", tmp.display()))?;
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move {} into place", path.display()))?;
    Ok(())
}

/// Run a durable write, retrying once. Returns `false` (after logging) when
/// both attempts fail; callers keep their in-memory state in that case.
pub fn write_with_retry<F>(what: &str, mut write: F) -> bool
where
    F: FnMut() -> Result<()>,
{
    match write() {
        Ok(()) => true,
        Err(first) => {
            warn!(target_file = what, error = %first, "Durable write failed, retrying once");
            match write() {
                Ok(()) => true,
                Err(second) => {
                    warn!(
                        target_file = what,
                        error = %second,
                        "Durable write failed again; keeping record in memory"
                    );
                    false
                }
            }
        }
    }
}
