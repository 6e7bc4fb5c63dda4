//! The job supervisor: owns a spawned process and its pipe readers.
//!
//! A [`Job`] is driven from the host's own loop. Each [`Job::poll`] queries
//! the exit status without blocking, forwards staged stdout then stderr to
//! the host callbacks, and runs the terminate sequence once the process has
//! exited. Configuring a poll interval arms an internal timer that drives
//! the identical code path.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{JobError, JobState, PollTimer};
use crate::dispatch::DispatchHandle;
use crate::process::{
    JobFlags, KillScope, ProcessHandle, Signal, Spawn, SpawnError, SpawnRequest, SystemSpawner,
    TerminateError,
};
use crate::reader::StreamReader;

/// How long `terminate` waits for the signalled process to exit before
/// escalating to a forced kill.
pub const DEFAULT_TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Callback receiving a chunk of stdout or stderr text.
pub type DataCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Callback receiving the pid and exit code when the process ends.
pub type ExitCallback = Arc<dyn Fn(u32, i32) + Send + Sync>;

/// Builder for configuring a [`Job`].
pub struct JobBuilder {
    command: Vec<String>,
    flags: JobFlags,
    env: Vec<(String, String)>,
    poll_interval: Option<Duration>,
    on_data: Option<DataCallback>,
    on_error: Option<DataCallback>,
    on_exit: Option<ExitCallback>,
    spawner: Box<dyn Spawn>,
}

impl JobBuilder {
    /// Create a builder for the given command line.
    #[must_use]
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            flags: JobFlags::default(),
            env: Vec::new(),
            poll_interval: None,
            on_data: None,
            on_error: None,
            on_exit: None,
            spawner: Box::new(SystemSpawner),
        }
    }

    /// Set the execution flags.
    #[must_use]
    pub fn flags(mut self, flags: JobFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Add one environment variable to the overlay.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Drive `poll()` automatically at this interval once started.
    ///
    /// Without an interval the host must call [`Job::poll`] itself.
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Callback for new stdout chunks.
    #[must_use]
    pub fn on_data(mut self, callback: impl Fn(String) + Send + Sync + 'static) -> Self {
        self.on_data = Some(Arc::new(callback));
        self
    }

    /// Callback for new stderr chunks.
    #[must_use]
    pub fn on_error(mut self, callback: impl Fn(String) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }

    /// Callback fired exactly once when the process ends.
    #[must_use]
    pub fn on_exit(mut self, callback: impl Fn(u32, i32) + Send + Sync + 'static) -> Self {
        self.on_exit = Some(Arc::new(callback));
        self
    }

    /// Substitute the spawn capability (tests, embedders).
    #[must_use]
    pub fn spawner(mut self, spawner: impl Spawn + 'static) -> Self {
        self.spawner = Box::new(spawner);
        self
    }

    /// Build the job, wiring callbacks through the given host queue handle.
    #[must_use]
    pub fn build(self, dispatch: DispatchHandle) -> Job {
        Job {
            inner: Arc::new(Mutex::new(Inner {
                command: self.command,
                flags: self.flags,
                env: self.env,
                poll_interval: self.poll_interval,
                on_data: self.on_data,
                on_error: self.on_error,
                on_exit: self.on_exit,
                spawner: self.spawner,
                dispatch,
                process: None,
                pid: None,
                stdout_reader: None,
                stderr_reader: None,
                timer: None,
                state: JobState::Idle,
                exit_fired: false,
            })),
        }
    }
}

/// A supervised subprocess.
///
/// Owns the process handle, one [`StreamReader`] per standard stream and the
/// optional poll timer. All methods are non-blocking except
/// [`terminate`](Self::terminate), which waits (boundedly) for the killed
/// process to report its exit status.
pub struct Job {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    command: Vec<String>,
    flags: JobFlags,
    env: Vec<(String, String)>,
    poll_interval: Option<Duration>,
    on_data: Option<DataCallback>,
    on_error: Option<DataCallback>,
    on_exit: Option<ExitCallback>,
    spawner: Box<dyn Spawn>,
    dispatch: DispatchHandle,
    process: Option<Box<dyn ProcessHandle>>,
    pid: Option<u32>,
    stdout_reader: Option<StreamReader>,
    stderr_reader: Option<StreamReader>,
    timer: Option<PollTimer>,
    state: JobState,
    exit_fired: bool,
}

impl Job {
    /// Start configuring a job for the given command line.
    #[must_use]
    pub fn builder<I, S>(command: I) -> JobBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        JobBuilder::new(command)
    }

    /// Spawn the process and begin supervising it.
    ///
    /// Starts both pipe readers and, if a poll interval is configured, arms
    /// the internal timer. Returns the pid assigned by the operating system.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::AlreadyRunning`] or [`JobError::Finished`] when
    /// the job is not idle, and [`JobError::Spawn`] when the process cannot
    /// be created.
    pub fn start(&self, cwd: Option<&Path>) -> Result<u32, JobError> {
        let mut inner = self.inner.lock();
        match inner.state {
            JobState::Idle => {}
            JobState::Running => return Err(JobError::AlreadyRunning),
            JobState::Terminated => return Err(JobError::Finished),
        }

        let mut process = inner.spawner.spawn(&SpawnRequest {
            command: &inner.command,
            cwd,
            env: &inner.env,
            flags: inner.flags,
        })?;
        let pid = process.pid();

        let mut stdout_reader = process
            .take_stdout()
            .map(|pipe| StreamReader::new(pipe).labeled("stdout"));
        let mut stderr_reader = process
            .take_stderr()
            .map(|pipe| StreamReader::new(pipe).labeled("stderr"));

        // All fallible setup runs before any field is committed, so a
        // failure leaves the job fully idle rather than half-started.
        let setup = (|| -> std::io::Result<Option<PollTimer>> {
            if let Some(reader) = stdout_reader.as_mut() {
                reader.start()?;
            }
            if let Some(reader) = stderr_reader.as_mut() {
                reader.start()?;
            }
            match inner.poll_interval {
                Some(interval) => Ok(Some(arm_timer(&self.inner, interval)?)),
                None => Ok(None),
            }
        })();
        let timer = match setup {
            Ok(timer) => timer,
            Err(e) => {
                // The child is already alive; it must not be orphaned.
                tracing::warn!(pid, error = %e, "Post-spawn setup failed, killing child");
                let scope = if inner.flags.group_leader {
                    KillScope::Children
                } else {
                    KillScope::Process
                };
                let _ = process.kill(Signal::Kill, scope);
                let _ = wait_for_exit(&mut *process, Duration::from_millis(500));
                if let Some(reader) = &stdout_reader {
                    reader.stop();
                }
                if let Some(reader) = &stderr_reader {
                    reader.stop();
                }
                return Err(SpawnError::Io(e).into());
            }
        };

        inner.process = Some(process);
        inner.pid = Some(pid);
        inner.stdout_reader = stdout_reader;
        inner.stderr_reader = stderr_reader;
        inner.timer = timer;

        tracing::debug!(pid, from = ?inner.state, to = ?JobState::Running, "Job started");
        inner.state = JobState::Running;

        Ok(pid)
    }

    /// Poll the process: exit-status query, stdout, stderr, then exit
    /// handling, in that fixed order.
    ///
    /// No-op when no process is attached. Data and exit callbacks are posted
    /// to the host queue, never invoked from worker threads.
    pub fn poll(&self) {
        self.inner.lock().poll();
    }

    /// Stop the subprocess.
    ///
    /// No-op returning `Ok(false)` if the job is not running (including a
    /// job that was never started). Otherwise issues the kill, waits
    /// boundedly for the exit status (escalating to [`Signal::Kill`] after
    /// [`DEFAULT_TERMINATE_GRACE`]), stops both readers and runs the
    /// terminate sequence. Does not wait for the reader threads to exit.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Terminate`] if the kill request could not be
    /// delivered; the job is left running in that case.
    pub fn terminate(&self, signal: Signal, scope: KillScope) -> Result<bool, JobError> {
        let mut inner = self.inner.lock();
        if inner.state != JobState::Running {
            return Ok(false);
        }
        let pid = inner.pid;
        let Some(process) = inner.process.as_mut() else {
            return Ok(false);
        };

        tracing::debug!(pid, ?signal, ?scope, "Terminating job");
        match process.kill(signal, scope) {
            // Already gone counts as success; we still want the exit code.
            Ok(()) | Err(TerminateError::NoProcess) => {}
            Err(e) => return Err(e.into()),
        }

        if let Some(timer) = inner.timer.take() {
            timer.stop();
        }
        let code = inner.reap_with_grace(scope);
        inner.finish(code);
        Ok(true)
    }

    /// The configured command line.
    #[must_use]
    pub fn command(&self) -> Vec<String> {
        self.inner.lock().command.clone()
    }

    /// Replace the command line.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::MutableWhileRunning`] while the process runs.
    pub fn set_command<I, S>(&self, command: I) -> Result<(), JobError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inner = self.inner.lock();
        if inner.state == JobState::Running {
            return Err(JobError::MutableWhileRunning {
                property: "command",
            });
        }
        inner.command = command.into_iter().map(Into::into).collect();
        Ok(())
    }

    /// The configured execution flags.
    #[must_use]
    pub fn flags(&self) -> JobFlags {
        self.inner.lock().flags
    }

    /// Replace the execution flags.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::MutableWhileRunning`] while the process runs.
    pub fn set_flags(&self, flags: JobFlags) -> Result<(), JobError> {
        let mut inner = self.inner.lock();
        if inner.state == JobState::Running {
            return Err(JobError::MutableWhileRunning { property: "flags" });
        }
        inner.flags = flags;
        Ok(())
    }

    /// The automatic poll interval, if any.
    #[must_use]
    pub fn poll_interval(&self) -> Option<Duration> {
        self.inner.lock().poll_interval
    }

    /// Change the automatic poll interval.
    ///
    /// While running this reprograms the live timer; `None` disarms it and
    /// the host takes over polling.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Spawn`] if a replacement timer thread cannot be
    /// spawned.
    pub fn set_poll_interval(&self, interval: Option<Duration>) -> Result<(), JobError> {
        let mut inner = self.inner.lock();
        inner.poll_interval = interval;
        if inner.state != JobState::Running {
            return Ok(());
        }
        if let Some(timer) = inner.timer.take() {
            timer.stop();
        }
        if let Some(interval) = interval {
            inner.timer = Some(arm_timer(&self.inner, interval).map_err(SpawnError::Io)?);
        }
        Ok(())
    }

    /// Set or clear the stdout callback.
    pub fn set_on_data(&self, callback: Option<DataCallback>) {
        self.inner.lock().on_data = callback;
    }

    /// Set or clear the stderr callback.
    pub fn set_on_error(&self, callback: Option<DataCallback>) {
        self.inner.lock().on_error = callback;
    }

    /// Set or clear the exit callback.
    pub fn set_on_exit(&self, callback: Option<ExitCallback>) {
        self.inner.lock().on_exit = callback;
    }

    /// Pid of the running process; `None` before start and after
    /// termination.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.inner.lock().pid
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> JobState {
        self.inner.lock().state
    }

    /// Whether the process is currently being supervised.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.lock().state == JobState::Running
    }
}

impl Drop for Job {
    /// Last-resort cleanup: a job abandoned while running force-kills its
    /// process. Errors are swallowed; there is nobody left to act on them.
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        if let Some(timer) = inner.timer.take() {
            timer.stop();
        }
        let scope = if inner.flags.group_leader {
            KillScope::Children
        } else {
            KillScope::Process
        };
        let pid = inner.pid;
        if let Some(process) = inner.process.as_mut() {
            tracing::warn!(pid, "Job dropped while running, force-killing");
            let _ = process.kill(Signal::Kill, scope);
        }
        // Brief reap so the kill does not leave a zombie behind.
        if inner.process.is_some() {
            let _ = inner.wait_for_exit(Duration::from_millis(500));
        }
        inner.process = None;
        if let Some(reader) = inner.stdout_reader.take() {
            reader.stop();
        }
        if let Some(reader) = inner.stderr_reader.take() {
            reader.stop();
        }
    }
}

impl Inner {
    /// Shared poll path for the host's explicit calls and the timer tick.
    fn poll(&mut self) {
        let Some(process) = self.process.as_mut() else {
            return;
        };

        // Query first so data staged before a fast exit still gets
        // dispatched ahead of the exit callback (best effort).
        let status = match process.try_wait() {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(pid = self.pid, error = %e, "Exit status query failed");
                None
            }
        };

        self.forward_output();

        if let Some(code) = status {
            self.finish(code);
        }
    }

    /// Dispatch staged stdout then stderr to the host callbacks.
    fn forward_output(&self) {
        if let Some(reader) = &self.stdout_reader {
            if reader.has_data() {
                let text = reader.read();
                if let Some(callback) = &self.on_data {
                    let callback = Arc::clone(callback);
                    self.dispatch.post(move || callback(text));
                }
            }
        }
        if let Some(reader) = &self.stderr_reader {
            if reader.has_data() {
                let text = reader.read();
                if let Some(callback) = &self.on_error {
                    let callback = Arc::clone(callback);
                    self.dispatch.post(move || callback(text));
                }
            }
        }
    }

    /// Terminate sequence: idempotent teardown plus at-most-once exit
    /// notification.
    fn finish(&mut self, code: i32) {
        if let Some(timer) = self.timer.take() {
            timer.stop();
        }

        // One closing drain before the readers go away.
        self.forward_output();
        if let Some(reader) = self.stdout_reader.take() {
            reader.stop();
        }
        if let Some(reader) = self.stderr_reader.take() {
            reader.stop();
        }

        self.process = None;
        let pid = self.pid.take().unwrap_or_default();

        if self.state != JobState::Terminated {
            tracing::debug!(pid, code, from = ?self.state, to = ?JobState::Terminated, "Job finished");
            self.state = JobState::Terminated;
        }

        if !self.exit_fired {
            self.exit_fired = true;
            if let Some(callback) = &self.on_exit {
                let callback = Arc::clone(callback);
                self.dispatch.post(move || callback(pid, code));
            }
        }
    }

    /// Wait boundedly for the killed process to exit, escalating to a
    /// forced kill after the grace period.
    fn reap_with_grace(&mut self, scope: KillScope) -> i32 {
        if let Some(code) = self.wait_for_exit(DEFAULT_TERMINATE_GRACE) {
            return code;
        }

        tracing::warn!(pid = self.pid, "Process survived grace period, forcing kill");
        if let Some(process) = self.process.as_mut() {
            let _ = process.kill(Signal::Kill, scope);
        }
        self.wait_for_exit(DEFAULT_TERMINATE_GRACE).unwrap_or(-1)
    }

    fn wait_for_exit(&mut self, timeout: Duration) -> Option<i32> {
        wait_for_exit(self.process.as_mut()?.as_mut(), timeout)
    }
}

/// Poll a handle for its exit status until it reports one or the timeout
/// elapses.
fn wait_for_exit(process: &mut dyn ProcessHandle, timeout: Duration) -> Option<i32> {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        match process.try_wait() {
            Ok(Some(code)) => return Some(code),
            Ok(None) => std::thread::sleep(Duration::from_millis(10)),
            Err(e) => {
                tracing::warn!(error = %e, "Exit status query failed");
                return None;
            }
        }
    }
    None
}

/// Drive `poll()` from a timer thread. Holds only a weak reference so an
/// abandoned job is not kept alive by its own timer.
fn arm_timer(inner: &Arc<Mutex<Inner>>, interval: Duration) -> std::io::Result<PollTimer> {
    let weak = Arc::downgrade(inner);
    PollTimer::start(interval, move || {
        if let Some(inner) = weak.upgrade() {
            inner.lock().poll();
        }
    })
}
