//! Append-only NDJSON record log with size-based rotation.
//!
//! Every successful upstream exchange is appended as one line:
//! `{"time":...,"signature":...,"request":...,"response":...}`. Request and
//! response are stored post-redaction. Rotation runs *before* the file is
//! opened for a write, so an append never lands in a file that should
//! already have rolled over; renames keep readers seeing either the old or
//! the new file, never a torn one.

use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use thiserror::Error;

use crate::redact::Redactor;

/// One recorded request/response pair.
///
/// `request`/`response` are optional on the way in so that a cassette with
/// partial entries still loads; the writer always fills both.
#[derive(Debug, Serialize, Deserialize)]
pub struct Entry {
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub request: Option<Box<RawValue>>,
    #[serde(default)]
    pub response: Option<Box<RawValue>>,
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("record I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("record entry is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("record entry is not valid UTF-8")]
    Utf8,
}

/// Appends entries to an NDJSON file, rotating by size.
///
/// A mutex serializes the whole rotate+open+append critical section; the
/// file handle itself is opened lazily per append so an external rotation
/// or deletion never strands a stale descriptor.
#[derive(Debug)]
pub struct Recorder {
    path: PathBuf,
    redactor: Option<Redactor>,
    max_bytes: u64,
    max_files: u32,
    lock: Mutex<()>,
}

impl Recorder {
    /// `max_bytes == 0` disables rotation. `max_files` is the number of
    /// rotated backups (`path.1` .. `path.N`) to retain; zero means the
    /// active file is simply removed when it fills up.
    pub fn new(
        path: impl Into<PathBuf>,
        redactor: Option<Redactor>,
        max_bytes: u64,
        max_files: u32,
    ) -> Self {
        Self {
            path: path.into(),
            redactor,
            max_bytes,
            max_files,
            lock: Mutex::new(()),
        }
    }

    /// Append one redacted entry. Errors are reported to the caller; the
    /// dispatch pipeline treats them as best-effort and keeps serving.
    pub fn append(
        &self,
        signature: &str,
        request: &[u8],
        response: &[u8],
    ) -> Result<(), RecordError> {
        let _guard = self
            .lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let entry = Entry {
            time: Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
            signature: signature.to_owned(),
            request: Some(self.render(request)?),
            response: Some(self.render(response)?),
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        self.maybe_rotate(line.len() as u64)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Redact raw JSON, or pass it through verbatim after validation.
    fn render(&self, raw: &[u8]) -> Result<Box<RawValue>, RecordError> {
        let rendered = match &self.redactor {
            Some(redactor) => redactor.apply(raw)?,
            None => std::str::from_utf8(raw)
                .map_err(|_| RecordError::Utf8)?
                .to_owned(),
        };
        Ok(RawValue::from_string(rendered)?)
    }

    fn maybe_rotate(&self, next_write: u64) -> Result<(), RecordError> {
        if self.max_bytes == 0 {
            return Ok(());
        }
        let size = match fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        // An empty active file is exempt: a single oversized entry must be
        // allowed to land instead of forcing a rotation on every append.
        if size == 0 || size + next_write <= self.max_bytes {
            return Ok(());
        }

        if self.max_files == 0 {
            remove_if_exists(&self.path)?;
            return Ok(());
        }

        remove_if_exists(&backup_path(&self.path, self.max_files))?;
        for i in (1..self.max_files).rev() {
            rename_replace(&backup_path(&self.path, i), &backup_path(&self.path, i + 1))?;
        }
        rename_replace(&self.path, &backup_path(&self.path, 1))?;
        Ok(())
    }
}

fn backup_path(path: &Path, index: u32) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

fn remove_if_exists(path: &Path) -> Result<(), std::io::Error> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// Remove-then-rename so the destination is replaced atomically from a
/// reader's point of view. A missing source is fine: the slot was empty.
fn rename_replace(src: &Path, dst: &Path) -> Result<(), std::io::Error> {
    remove_if_exists(dst)?;
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}
