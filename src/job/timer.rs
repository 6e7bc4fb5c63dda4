//! Periodic tick driving automatic polls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A cancellable fixed-interval timer on its own thread.
///
/// Fires the action once per interval until [`stop`](Self::stop) is called.
/// `stop` only raises a flag and never joins, so it is safe to call from
/// inside the action itself or while holding locks the action takes; the
/// thread exits within one interval.
#[derive(Debug)]
pub struct PollTimer {
    stop: Arc<AtomicBool>,
    interval: Duration,
}

impl PollTimer {
    /// Spawn the timer thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the timer thread cannot be spawned.
    pub fn start(
        interval: Duration,
        action: impl Fn() + Send + 'static,
    ) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);

        std::thread::Builder::new()
            .name("procjob-timer".to_string())
            .spawn(move || {
                while !flag.load(Ordering::Relaxed) {
                    std::thread::sleep(interval);
                    if flag.load(Ordering::Relaxed) {
                        break;
                    }
                    action();
                }
                tracing::debug!("Poll timer stopped");
            })?;

        Ok(Self { stop, interval })
    }

    /// The interval this timer was armed with.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Ask the timer thread to exit. Never blocks.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

impl Drop for PollTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
