//! Worker process spawning
//!
//! [`ProcessLauncher`] is the one place the orchestrator touches the OS process
//! API. The production launcher re-executes a worker program with the
//! transport's worker-mode arguments; tests substitute other programs to
//! inject failures.

use crate::transport::WorkerInvocation;
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus};

/// Capability to start one worker process for an invocation
pub trait ProcessLauncher {
    fn spawn(&self, invocation: WorkerInvocation) -> io::Result<WorkerHandle>;
}

/// Launches `program leading_args.. invocation.args..`
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    program: PathBuf,
    leading_args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
}

impl CommandLauncher {
    /// Launcher for an arbitrary program
    ///
    /// # Example
    ///
    /// ```
    /// use ipcsum::coordinator::launcher::CommandLauncher;
    ///
    /// // Every worker runs `sh -c 'exit 0'` and never publishes
    /// let launcher = CommandLauncher::new("sh", ["-c", "exit 0"]);
    /// assert_eq!(launcher.program().to_str(), Some("sh"));
    /// ```
    pub fn new<P, I, S>(program: P, leading_args: I) -> Self
    where
        P: Into<PathBuf>,
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            leading_args: leading_args.into_iter().map(Into::into).collect(),
            envs: Vec::new(),
        }
    }

    /// Launcher for an `ipcsum` binary at `path`, running its `worker` subcommand
    ///
    /// Forwards the log filter variable so workers log at the same verbosity.
    pub fn worker_binary(path: impl Into<PathBuf>) -> Self {
        let launcher = Self::new(path, ["worker"]);
        match std::env::var_os(crate::LOG_ENV) {
            Some(filter) => launcher.with_env(crate::LOG_ENV, filter),
            None => launcher,
        }
    }

    /// Launcher that re-executes the running binary as a worker
    pub fn current_exe() -> io::Result<Self> {
        Ok(Self::worker_binary(std::env::current_exe()?))
    }

    pub fn with_env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &std::path::Path {
        &self.program
    }
}

impl ProcessLauncher for CommandLauncher {
    fn spawn(&self, invocation: WorkerInvocation) -> io::Result<WorkerHandle> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.leading_args)
            .args(&invocation.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)));
        invocation.stdio.apply(&mut command);

        WorkerHandle::spawn(invocation.index, command)
    }
}

/// Handle to a spawned worker process
///
/// A worker that is still running when its handle is dropped is killed and
/// reaped, so no error path can leave an orphan behind.
#[derive(Debug)]
pub struct WorkerHandle {
    index: usize,
    child: Child,
    reaped: Option<ExitStatus>,
}

impl WorkerHandle {
    /// Spawn `command` as worker `index`
    ///
    /// The command is consumed so the parent's copies of any descriptors it
    /// holds (pipe ends bound to the child's stdio) are closed once the child
    /// exists.
    pub fn spawn(index: usize, mut command: Command) -> io::Result<Self> {
        let child = command.spawn()?;
        drop(command);

        tracing::debug!(worker = index, pid = child.id(), "worker spawned");
        Ok(Self {
            index,
            child,
            reaped: None,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Exit status, if the worker has been reaped
    pub fn status(&self) -> Option<ExitStatus> {
        self.reaped
    }

    /// Block until the worker terminates
    pub fn wait(&mut self) -> io::Result<ExitStatus> {
        if let Some(status) = self.reaped {
            return Ok(status);
        }
        let status = self.child.wait()?;
        self.reap(status);
        Ok(status)
    }

    /// Reap the worker if it has terminated; never blocks
    pub fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        if let Some(status) = self.reaped {
            return Ok(Some(status));
        }
        let status = self.child.try_wait()?;
        if let Some(status) = status {
            self.reap(status);
        }
        Ok(status)
    }

    /// Kill the worker if it is still running, then reap it
    pub fn terminate(&mut self) {
        if self.reaped.is_some() {
            return;
        }
        if let Err(e) = self.child.kill() {
            // InvalidInput: already exited, just not reaped yet
            if e.kind() != io::ErrorKind::InvalidInput {
                tracing::warn!(worker = self.index, pid = self.pid(), "failed to kill worker: {}", e);
            }
        }
        match self.child.wait() {
            Ok(status) => {
                tracing::debug!(worker = self.index, pid = self.pid(), %status, "worker terminated");
                self.reaped = Some(status);
            }
            Err(e) => tracing::warn!(worker = self.index, pid = self.pid(), "failed to reap worker: {}", e),
        }
    }

    fn reap(&mut self, status: ExitStatus) {
        tracing::debug!(worker = self.index, pid = self.pid(), %status, "worker exited");
        self.reaped = Some(status);
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if self.reaped.is_none() {
            self.terminate();
        }
    }
}
