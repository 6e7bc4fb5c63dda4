//! The spawn capability: an abstract, swappable way to create child
//! processes with piped output.
//!
//! [`Job`](crate::job::Job) consumes processes through the [`Spawn`] and
//! [`ProcessHandle`] traits so embedders and tests can substitute their own
//! process source. [`SystemSpawner`] is the production implementation over
//! [`std::process::Command`].

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};

use super::{JobFlags, KillScope, Signal, TerminateError};

/// Error type for process spawning operations.
#[derive(thiserror::Error, Debug)]
pub enum SpawnError {
    /// The command has no program to run.
    #[error("Empty command")]
    EmptyCommand,
    /// The binary was not found.
    #[error("Binary not found: {0}")]
    NotFound(String),
    /// Permission denied when spawning.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    /// Other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpawnError {
    /// Classify common spawn failures from an I/O error.
    fn from_io(err: std::io::Error, program: &str) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(program.to_string()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(program.to_string()),
            _ => Self::Io(err),
        }
    }
}

/// Everything a spawner needs to create one process.
#[derive(Debug, Clone)]
pub struct SpawnRequest<'a> {
    /// Program and arguments.
    pub command: &'a [String],
    /// Working directory for the child; `None` inherits the host's.
    pub cwd: Option<&'a Path>,
    /// Environment overlay applied on top of the inherited environment.
    pub env: &'a [(String, String)],
    /// Execution options.
    pub flags: JobFlags,
}

/// A spawned process with pollable exit status and killable handle.
pub trait ProcessHandle: Send + std::fmt::Debug {
    /// Process ID assigned by the operating system.
    fn pid(&self) -> u32;

    /// Take ownership of the stdout pipe. Returns `None` after the first call.
    fn take_stdout(&mut self) -> Option<Box<dyn Read + Send>>;

    /// Take ownership of the stderr pipe. Returns `None` after the first call.
    fn take_stderr(&mut self) -> Option<Box<dyn Read + Send>>;

    /// Check for an exit status without blocking.
    ///
    /// Signal-terminated children report the negated signal number.
    ///
    /// # Errors
    ///
    /// Returns an error if the process state cannot be queried.
    fn try_wait(&mut self) -> std::io::Result<Option<i32>>;

    /// Send a termination signal to the process, or to its whole group when
    /// `scope` is [`KillScope::Children`] and the process leads one.
    ///
    /// # Errors
    ///
    /// Returns a [`TerminateError`] classifying why the signal could not be
    /// delivered.
    fn kill(&mut self, signal: Signal, scope: KillScope) -> Result<(), TerminateError>;
}

/// The abstract "create me a process" capability.
pub trait Spawn: Send {
    /// Spawn a process with piped stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns a [`SpawnError`] if the process cannot be created.
    fn spawn(&self, request: &SpawnRequest<'_>) -> Result<Box<dyn ProcessHandle>, SpawnError>;
}

/// Production spawner over [`std::process::Command`].
///
/// Children get a null stdin and piped stdout/stderr. The `sync` flag is
/// advisory here: a host that wants synchronous execution drives `poll()` in
/// a loop until exit.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSpawner;

impl Spawn for SystemSpawner {
    fn spawn(&self, request: &SpawnRequest<'_>) -> Result<Box<dyn ProcessHandle>, SpawnError> {
        let (program, args) = request.command.split_first().ok_or(SpawnError::EmptyCommand)?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(dir) = request.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in request.env {
            cmd.env(key, value);
        }

        #[cfg(unix)]
        if request.flags.group_leader {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        #[cfg(windows)]
        if !request.flags.show_console {
            use std::os::windows::process::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        let child = cmd
            .spawn()
            .map_err(|e| SpawnError::from_io(e, program))?;

        tracing::debug!(
            program = %program,
            pid = child.id(),
            cwd = ?request.cwd.map(Path::display),
            group_leader = request.flags.group_leader,
            "Spawned subprocess"
        );

        Ok(Box::new(SystemProcess {
            child,
            group_leader: request.flags.group_leader,
        }))
    }
}

/// Handle to a process spawned by [`SystemSpawner`].
#[derive(Debug)]
pub struct SystemProcess {
    child: Child,
    group_leader: bool,
}

impl ProcessHandle for SystemProcess {
    fn pid(&self) -> u32 {
        self.child.id()
    }

    fn take_stdout(&mut self) -> Option<Box<dyn Read + Send>> {
        self.child
            .stdout
            .take()
            .map(|pipe| Box::new(pipe) as Box<dyn Read + Send>)
    }

    fn take_stderr(&mut self) -> Option<Box<dyn Read + Send>> {
        self.child
            .stderr
            .take()
            .map(|pipe| Box::new(pipe) as Box<dyn Read + Send>)
    }

    fn try_wait(&mut self) -> std::io::Result<Option<i32>> {
        Ok(self.child.try_wait()?.map(exit_code))
    }

    #[cfg(unix)]
    fn kill(&mut self, signal: Signal, scope: KillScope) -> Result<(), TerminateError> {
        use nix::sys::signal::{kill, killpg, Signal as NixSignal};
        use nix::unistd::Pid;

        let sig = match signal {
            Signal::Interrupt => NixSignal::SIGINT,
            Signal::Terminate => NixSignal::SIGTERM,
            Signal::Kill => NixSignal::SIGKILL,
        };
        let pid = Pid::from_raw(
            i32::try_from(self.child.id()).map_err(|_| TerminateError::NoProcess)?,
        );

        let result = if scope == KillScope::Children && self.group_leader {
            killpg(pid, sig)
        } else {
            kill(pid, sig)
        };

        result.map_err(|errno| match errno {
            nix::errno::Errno::ESRCH => TerminateError::NoProcess,
            nix::errno::Errno::EPERM => TerminateError::AccessDenied,
            nix::errno::Errno::EINVAL => TerminateError::BadSignal,
            other => TerminateError::Failed(other.to_string()),
        })
    }

    #[cfg(not(unix))]
    fn kill(&mut self, _signal: Signal, _scope: KillScope) -> Result<(), TerminateError> {
        // No per-signal delivery here; everything degrades to a plain kill.
        self.child.kill().map_err(|e| match e.kind() {
            std::io::ErrorKind::InvalidInput => TerminateError::NoProcess,
            std::io::ErrorKind::PermissionDenied => TerminateError::AccessDenied,
            _ => TerminateError::Failed(e.to_string()),
        })
    }
}

/// Fold an [`std::process::ExitStatus`] into a single code.
fn exit_code(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return -sig;
        }
    }
    -1
}
