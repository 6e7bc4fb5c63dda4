//! Marshaling of callbacks onto the host thread.
//!
//! Supervision work happens on background threads, but the host relies on a
//! single-threaded callback contract: `on_data`, `on_error` and `on_exit`
//! must run on its own loop. A [`HostQueue`] is that loop's mailbox. Anything
//! holding a [`DispatchHandle`] can post a deferred call; the host executes
//! them by draining the queue from its own thread, typically once per loop
//! tick.

use std::sync::mpsc::{channel, Receiver, Sender};

type Task = Box<dyn FnOnce() + Send>;

/// Task queue owned by the host thread.
pub struct HostQueue {
    tx: Sender<Task>,
    rx: Receiver<Task>,
}

impl Default for HostQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl HostQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = channel();
        Self { tx, rx }
    }

    /// Get a cloneable handle for posting tasks from other threads.
    #[must_use]
    pub fn handle(&self) -> DispatchHandle {
        DispatchHandle {
            tx: self.tx.clone(),
        }
    }

    /// Execute every task posted so far, in post order.
    ///
    /// Never blocks; returns the number of tasks run. Call this from the
    /// host thread only.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            ran += 1;
        }
        ran
    }
}

/// Sending side of a [`HostQueue`].
#[derive(Clone)]
pub struct DispatchHandle {
    tx: Sender<Task>,
}

impl DispatchHandle {
    /// Post a task for the host thread to run on its next drain.
    ///
    /// Posting after the host has dropped its queue is a silent no-op; the
    /// host has lost interest in the callbacks.
    pub fn post(&self, task: impl FnOnce() + Send + 'static) {
        if self.tx.send(Box::new(task)).is_err() {
            tracing::debug!("Host queue gone, dropping dispatched task");
        }
    }
}

impl std::fmt::Debug for DispatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchHandle").finish_non_exhaustive()
    }
}
