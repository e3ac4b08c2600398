//! Append-only job log with suspending readers.
//!
//! One writer (the pump draining a worker's reports) appends; any number of
//! readers tail the log by offset. A read for bytes that do not exist yet
//! waits until more arrive or the log is closed. Dropping the read future
//! simply abandons the wait.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use buildpool_core::CoreError;

/// Upper bound on the bytes returned by a single read.
pub const MAX_READ_CHUNK: usize = 64 * 1024;

#[derive(Default)]
struct LogInner {
    data: Vec<u8>,
    closed: bool,
}

/// Append-only byte log shared between one writer and many readers.
pub struct LogBuffer {
    inner: Mutex<LogInner>,
    /// Bumped on every append and on close so waiting readers re-check.
    version: watch::Sender<u64>,
}

impl LogBuffer {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            inner: Mutex::new(LogInner::default()),
            version,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LogInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append bytes. Returns the new length.
    pub fn append(&self, bytes: &[u8]) -> Result<u64, CoreError> {
        let len = {
            let mut inner = self.lock();
            if inner.closed {
                return Err(CoreError::ProtocolViolation(
                    "log data after the job finished".to_string(),
                ));
            }
            inner.data.extend_from_slice(bytes);
            inner.data.len() as u64
        };
        self.version.send_modify(|v| *v += 1);
        Ok(len)
    }

    /// Mark the log complete. Returns false if it was already closed.
    pub fn close(&self) -> bool {
        {
            let mut inner = self.lock();
            if inner.closed {
                return false;
            }
            inner.closed = true;
        }
        self.version.send_modify(|v| *v += 1);
        true
    }

    pub fn len(&self) -> u64 {
        self.lock().data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Non-blocking read. `None` means nothing is available yet.
    pub fn try_read(&self, start: u64) -> Option<(Vec<u8>, u64)> {
        let inner = self.lock();
        let len = inner.data.len() as u64;
        if start < len {
            let from = start as usize;
            let to = inner.data.len().min(from + MAX_READ_CHUNK);
            return Some((inner.data[from..to].to_vec(), to as u64));
        }
        if inner.closed {
            return Some((Vec::new(), start));
        }
        None
    }

    /// Read from `start`, waiting for data if none is available.
    ///
    /// Returns the chunk and the offset to pass next. An empty chunk means
    /// the log is closed and everything up to `start` has been delivered.
    pub async fn read(&self, start: u64) -> (Vec<u8>, u64) {
        // Subscribe before checking so an append in between is not missed.
        let mut changes = self.version.subscribe();
        loop {
            if let Some(chunk) = self.try_read(start) {
                return chunk;
            }
            if changes.changed().await.is_err() {
                return (Vec::new(), start);
            }
        }
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}
