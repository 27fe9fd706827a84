//! Bounded log collector
//!
//! Captures one output stream of one process invocation. Appends are queued
//! to a background writer task that spools them to a temporary file in call
//! order. Once the byte cap would be exceeded a single truncation marker is
//! written and every later append is dropped.
//!
//! When the run no longer needs the stream, [`LogCollector::upload`] pushes
//! the spooled content to object storage and yields its URL, or nothing if
//! the collector never received data or the upload failed.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::naming;
use crate::repository::LogStorage;

/// Marker appended once when a collector hits its cap
pub const TRUNCATED_MARKER: &str = "\nTRUNCATED";

/// Bounded, ordered capture of one output stream
///
/// Cloning yields another handle to the same collector.
#[derive(Clone)]
pub struct LogCollector {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    max_bytes: usize,
    path: PathBuf,
    state: Mutex<CollectorState>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

struct CollectorState {
    written: usize,
    truncated: bool,
    /// `None` once the collector has been finished
    sender: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

impl LogCollector {
    /// Creates a collector and starts its writer task
    ///
    /// # Arguments
    /// * `name` - Label used in diagnostics, e.g. `web[0] stdout`
    /// * `max_bytes` - Cap on the collected bytes
    pub fn new(name: impl Into<String>, max_bytes: usize) -> Self {
        let path = std::env::temp_dir().join(format!("restcoder-{}.log", naming::unique_string(20)));
        let (sender, receiver) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_chunks(path.clone(), receiver));

        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                max_bytes,
                path,
                state: Mutex::new(CollectorState {
                    written: 0,
                    truncated: false,
                    sender: Some(sender),
                }),
                writer: Mutex::new(Some(writer)),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Queues a chunk of output
    ///
    /// Chunks are written in the order of the calls. The first chunk that
    /// would exceed the cap switches the collector to truncated mode.
    pub fn append(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }

        let mut state = self.inner.state.lock().unwrap();
        if state.truncated {
            return;
        }

        let chunk = if state.written + data.len() > self.inner.max_bytes {
            state.truncated = true;
            debug!("Log {} truncated at {} bytes", self.inner.name, state.written);
            TRUNCATED_MARKER.as_bytes().to_vec()
        } else {
            state.written += data.len();
            data.to_vec()
        };

        if let Some(sender) = &state.sender {
            // Receiver only disappears once the collector is finished
            let _ = sender.send(chunk);
        }
    }

    /// Whether no data ever made it into the collector
    pub fn is_empty(&self) -> bool {
        let state = self.inner.state.lock().unwrap();
        state.written == 0 && !state.truncated
    }

    pub fn is_truncated(&self) -> bool {
        self.inner.state.lock().unwrap().truncated
    }

    /// Stops collecting and returns everything written so far
    ///
    /// Waits for all queued chunks to reach the spool file. Later appends
    /// are ignored.
    pub async fn finish(&self) -> Vec<u8> {
        {
            let mut state = self.inner.state.lock().unwrap();
            state.sender.take();
        }

        let writer = self.inner.writer.lock().unwrap().take();
        if let Some(writer) = writer {
            if let Err(e) = writer.await {
                warn!("Log writer for {} failed: {}", self.inner.name, e);
            }
        }

        let content = match tokio::fs::read(&self.inner.path).await {
            Ok(content) => content,
            Err(e) => {
                debug!("No spool file for {}: {}", self.inner.name, e);
                Vec::new()
            }
        };
        let _ = tokio::fs::remove_file(&self.inner.path).await;
        content
    }

    /// Uploads the collected content
    ///
    /// # Returns
    /// The public URL of the log, or `None` if nothing was collected or the
    /// upload failed (failures are logged, never propagated)
    pub async fn upload(&self, storage: &dyn LogStorage) -> Option<String> {
        if self.is_empty() {
            self.finish().await;
            return None;
        }

        let content = self.finish().await;
        let key = naming::log_key();
        if self.is_truncated() {
            debug!("Uploading truncated log {} as {}", self.name(), key);
        }

        match storage.put_text(&key, content).await {
            Ok(url) => Some(url),
            Err(e) => {
                warn!("Failed to upload log {}: {:#}", self.name(), e);
                None
            }
        }
    }
}

/// Spools queued chunks to `path` until every sender is gone
async fn write_chunks(path: PathBuf, mut receiver: mpsc::UnboundedReceiver<Vec<u8>>) {
    let mut file = match tokio::fs::File::create(&path).await {
        Ok(file) => Some(file),
        Err(e) => {
            warn!("Failed to create log spool {}: {}", path.display(), e);
            None
        }
    };

    while let Some(chunk) = receiver.recv().await {
        if let Some(f) = file.as_mut() {
            if let Err(e) = f.write_all(&chunk).await {
                warn!("Failed to write log spool {}: {}", path.display(), e);
            }
        }
    }

    if let Some(mut f) = file {
        let _ = f.flush().await;
    }
}

/// stdout/stderr collectors of one invocation
#[derive(Clone)]
pub struct LogPair {
    pub stdout: LogCollector,
    pub stderr: LogCollector,
}

impl LogPair {
    /// Creates a fresh pair labelled `<label> stdout` / `<label> stderr`
    pub fn new(label: &str, max_bytes: usize) -> Self {
        Self {
            stdout: LogCollector::new(format!("{} stdout", label), max_bytes),
            stderr: LogCollector::new(format!("{} stderr", label), max_bytes),
        }
    }

    /// Uploads both streams concurrently
    ///
    /// # Returns
    /// `(stdout_url, stderr_url)`
    pub async fn upload(&self, storage: &dyn LogStorage) -> (Option<String>, Option<String>) {
        tokio::join!(self.stdout.upload(storage), self.stderr.upload(storage))
    }

    /// Stops both collectors without uploading
    pub async fn discard(&self) {
        tokio::join!(self.stdout.finish(), self.stderr.finish());
    }
}
