//! Background readers for subprocess pipes.
//!
//! A [`StreamReader`] owns one end of a child's stdout or stderr pipe and
//! drains it on a dedicated worker thread, so the host can consume output
//! with non-blocking [`StreamReader::read`] calls.

use std::io::{BufRead, BufReader, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

/// Default interval between read cycles on the worker thread.
pub const DEFAULT_READ_INTERVAL: Duration = Duration::from_millis(120);

/// Staging area shared between the worker thread and the consumer.
///
/// Capacity of the slot is exactly one chunk. Chunks that arrive while the
/// slot is occupied are queued in `overflow` in arrival order and merged
/// ahead of newer data once the slot frees, so a slow consumer coalesces
/// output instead of losing it.
#[derive(Debug, Default)]
struct Buffers {
    staged: Option<String>,
    overflow: Vec<String>,
}

#[derive(Default)]
struct Shared {
    buffers: Mutex<Buffers>,
    stop: AtomicBool,
}

impl Shared {
    /// Stage a chunk coming off the pipe, preserving arrival order.
    fn stage(&self, chunk: String) {
        let mut buffers = self.buffers.lock();
        if buffers.staged.is_some() {
            buffers.overflow.push(chunk);
        } else if buffers.overflow.is_empty() {
            buffers.staged = Some(chunk);
        } else {
            let mut merged: String = buffers.overflow.drain(..).collect();
            merged.push_str(&chunk);
            buffers.staged = Some(merged);
        }
    }

    /// Move queued overflow into the slot if the consumer has freed it.
    ///
    /// Runs once per read cycle so output queued behind a slow consumer is
    /// still delivered after the pipe hits EOF.
    fn flush_overflow(&self) {
        let mut buffers = self.buffers.lock();
        if buffers.staged.is_none() && !buffers.overflow.is_empty() {
            buffers.staged = Some(buffers.overflow.drain(..).collect());
        }
    }
}

/// Non-blocking reader for one subprocess pipe.
///
/// [`start`](Self::start) moves the pipe into a worker thread which reads it
/// at line granularity and stages the data for the consumer. The consumer
/// side ([`has_data`](Self::has_data), [`read`](Self::read)) never blocks.
///
/// The worker observes [`stop`](Self::stop) at the end of a read cycle,
/// bounded by the read interval once the pipe has reached EOF. A worker
/// blocked mid-read wakes up when the child exits and the pipe closes.
pub struct StreamReader {
    shared: Arc<Shared>,
    pipe: Option<Box<dyn Read + Send>>,
    interval: Duration,
    label: &'static str,
    worker: Option<JoinHandle<()>>,
}

impl StreamReader {
    /// Create a reader for the given pipe with the default read interval.
    #[must_use]
    pub fn new(pipe: impl Read + Send + 'static) -> Self {
        Self::with_interval(pipe, DEFAULT_READ_INTERVAL)
    }

    /// Create a reader with a custom interval between read cycles.
    #[must_use]
    pub fn with_interval(pipe: impl Read + Send + 'static, interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            pipe: Some(Box::new(pipe)),
            interval,
            label: "pipe",
            worker: None,
        }
    }

    /// Label used for the worker thread name and log events.
    #[must_use]
    pub fn labeled(mut self, label: &'static str) -> Self {
        self.label = label;
        self
    }

    /// Start the worker thread.
    ///
    /// Non-blocking; returns as soon as the worker is spawned. Calling
    /// `start` again after the pipe has been handed to a worker is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker thread cannot be spawned.
    pub fn start(&mut self) -> std::io::Result<()> {
        let Some(pipe) = self.pipe.take() else {
            return Ok(());
        };

        let shared = Arc::clone(&self.shared);
        let interval = self.interval;
        let label = self.label;
        let worker = std::thread::Builder::new()
            .name(format!("procjob-{label}-reader"))
            .spawn(move || read_loop(pipe, &shared, interval, label))?;

        self.worker = Some(worker);
        Ok(())
    }

    /// Whether a chunk is staged and ready to be read.
    #[must_use]
    pub fn has_data(&self) -> bool {
        self.shared.buffers.lock().staged.is_some()
    }

    /// Take everything staged since the last read.
    ///
    /// Returns the staged chunk with any queued overflow appended in arrival
    /// order, or an empty string if no new data arrived. Never blocks.
    #[must_use]
    pub fn read(&self) -> String {
        let mut buffers = self.shared.buffers.lock();
        let mut chunk = buffers.staged.take().unwrap_or_default();
        for queued in buffers.overflow.drain(..) {
            chunk.push_str(&queued);
        }
        chunk
    }

    /// Signal the worker to stop reading and close the pipe.
    ///
    /// Cooperative; does not wait for the worker to exit.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::Relaxed);
    }

    /// Whether the worker has been asked to stop.
    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.shared.stop.load(Ordering::Relaxed)
    }

    /// Wait for the worker thread to exit.
    ///
    /// Only useful after [`stop`](Self::stop); a worker blocked in a pipe
    /// read does not return until the pipe closes.
    pub fn join(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for StreamReader {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Worker loop: drain the pipe, stage chunks, sleep, check the stop flag.
fn read_loop(pipe: Box<dyn Read + Send>, shared: &Shared, interval: Duration, label: &'static str) {
    tracing::debug!(stream = label, "Pipe reader started");
    let mut reader = BufReader::new(pipe);
    let mut line = Vec::new();

    loop {
        // Read whatever the child has written, at line granularity. A
        // blocking read here is fine; this is the worker's own thread.
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) => break, // EOF
                Ok(_) => shared.stage(String::from_utf8_lossy(&line).into_owned()),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    // Pipe errors after the child is gone are not actionable.
                    tracing::debug!(stream = label, error = %e, "Pipe read failed");
                    break;
                }
            }
        }

        shared.flush_overflow();
        std::thread::sleep(interval);

        if shared.stop.load(Ordering::Relaxed) {
            break;
        }
    }

    shared.flush_overflow();
    tracing::debug!(stream = label, "Pipe reader stopped");
    // The pipe is dropped (closed) here.
}
