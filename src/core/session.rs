//! Session management
//!
//! A session owns one child process, its stdin, and the pumps that drain
//! its output streams into line queues.

use std::io::{self, Write};
use std::process::{Child, ChildStdin};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::process::{spawn_child, CommandLine, OutputReader, ProcessError};
use super::pump::{PumpError, PumpReport, StreamPump};
use super::queue::LineQueue;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Process was never started")]
    NotStarted,

    #[error("Child stdin is closed")]
    StdinClosed,

    #[error("Failed to write to child: {0}")]
    Write(#[source] io::Error),

    #[error("Failed to kill child: {0}")]
    Kill(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Starts the thread that drains one child output stream into a queue
pub(crate) type PumpSpawner =
    fn(&str, OutputReader, LineQueue) -> std::result::Result<StreamPump, PumpError>;

/// Liveness of a session's child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Spawn failed, there is no process
    NotStarted,
    Running,
    /// Exit code, `None` when terminated by a signal
    Exited(Option<i32>),
}

/// One spawned child plus its stream pumps
pub struct ProcessSession {
    command: CommandLine,
    /// Child handle, `None` if spawning failed
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    pumps: Vec<StreamPump>,
    /// Set once by `start` when the spawn attempt or a pump start fails
    spawn_error: Option<ProcessError>,
    /// Cached once the child has been reaped
    exit_status: Option<Option<i32>>,
}

impl ProcessSession {
    /// Spawn `command` and start pumping its output.
    ///
    /// stdout lines go to `stdout_queue`. With `stderr_queue` stderr gets its
    /// own pipe and pump, without it stderr is merged into stdout. A failed
    /// spawn is recorded on the session rather than returned.
    pub fn start(
        command: CommandLine,
        stdout_queue: LineQueue,
        stderr_queue: Option<LineQueue>,
    ) -> Self {
        Self::start_with(command, stdout_queue, stderr_queue, StreamPump::spawn::<OutputReader>)
    }

    pub(crate) fn start_with(
        command: CommandLine,
        stdout_queue: LineQueue,
        stderr_queue: Option<LineQueue>,
        spawn_pump: PumpSpawner,
    ) -> Self {
        let mut session = Self {
            command,
            child: None,
            stdin: None,
            pumps: Vec::new(),
            spawn_error: None,
            exit_status: None,
        };

        let spawned = match spawn_child(&session.command, stderr_queue.is_some()) {
            Ok(spawned) => spawned,
            Err(e) => {
                error!("Failed to start {}: {}", session.command, e);
                session.spawn_error = Some(e);
                return session;
            }
        };

        session.child = Some(spawned.child);
        session.stdin = Some(spawned.stdin);

        let mut streams = vec![("stdout", spawned.stdout, stdout_queue)];
        if let (Some(reader), Some(queue)) = (spawned.stderr, stderr_queue) {
            streams.push(("stderr", reader, queue));
        }
        for (name, reader, queue) in streams {
            match spawn_pump(name, reader, queue) {
                Ok(pump) => session.pumps.push(pump),
                Err(e) => {
                    session.abort(e.into());
                    return session;
                }
            }
        }

        info!("Session started: {} (pid {:?})", session.command, session.pid());
        session
    }

    /// Tear down a child whose output cannot be drained and record why.
    /// The session then looks like one that never spawned.
    fn abort(&mut self, reason: ProcessError) {
        error!("Failed to start {}: {}", self.command, reason);
        self.close_stdin();
        if let Err(e) = self.kill() {
            warn!("{}", e);
        }
        self.join_pumps();
        self.wait();
        self.child = None;
        self.exit_status = None;
        self.spawn_error = Some(reason);
    }

    pub fn command(&self) -> &CommandLine {
        &self.command
    }

    /// Whether the child was spawned
    pub fn is_spawned(&self) -> bool {
        self.spawn_error.is_none()
    }

    /// Why the spawn attempt failed, if it did
    pub fn spawn_error(&self) -> Option<&ProcessError> {
        self.spawn_error.as_ref()
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Non-blocking liveness check
    pub fn poll(&mut self) -> ProcessStatus {
        if let Some(code) = self.exit_status {
            return ProcessStatus::Exited(code);
        }
        let Some(child) = self.child.as_mut() else {
            return ProcessStatus::NotStarted;
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                self.exit_status = Some(status.code());
                ProcessStatus::Exited(status.code())
            }
            Ok(None) => ProcessStatus::Running,
            Err(e) => {
                // Cannot query the child any more, treat it as gone
                warn!("Failed to poll {}: {}", self.command, e);
                self.exit_status = Some(None);
                ProcessStatus::Exited(None)
            }
        }
    }

    /// Block until the child exits. Only meant for after its streams closed.
    pub fn wait(&mut self) -> ProcessStatus {
        if let Some(code) = self.exit_status {
            return ProcessStatus::Exited(code);
        }
        let Some(child) = self.child.as_mut() else {
            return ProcessStatus::NotStarted;
        };
        let code = match child.wait() {
            Ok(status) => status.code(),
            Err(e) => {
                warn!("Failed to wait for {}: {}", self.command, e);
                None
            }
        };
        self.exit_status = Some(code);
        ProcessStatus::Exited(code)
    }

    /// Write `data` verbatim to the child's stdin and flush
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.child.is_none() {
            return Err(SessionError::NotStarted);
        }
        let stdin = self.stdin.as_mut().ok_or(SessionError::StdinClosed)?;
        let result = stdin.write_all(data).and_then(|()| stdin.flush());
        if let Err(e) = result {
            warn!("Write to {} failed: {}", self.command, e);
            return Err(SessionError::Write(e));
        }
        Ok(())
    }

    /// Close the child's stdin so it sees end-of-input
    pub fn close_stdin(&mut self) {
        if self.stdin.take().is_some() {
            debug!("Closed stdin of {}", self.command);
        }
    }

    /// Forcibly terminate the child
    pub fn kill(&mut self) -> Result<()> {
        let child = self.child.as_mut().ok_or(SessionError::NotStarted)?;
        match child.kill() {
            Ok(()) => {
                info!("Killed {}", self.command);
                Ok(())
            }
            // Already exited and reaped
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(SessionError::Kill(e)),
        }
    }

    /// Whether every pump has reached end-of-stream (non-blocking)
    pub fn pumps_finished(&self) -> bool {
        self.pumps.iter().all(StreamPump::is_finished)
    }

    /// Block until every pump has drained its stream
    pub fn join_pumps(&mut self) -> Vec<PumpReport> {
        let mut reports = Vec::with_capacity(self.pumps.len());
        for pump in self.pumps.drain(..) {
            match pump.join() {
                Ok(report) => reports.push(report),
                Err(e) => error!("{}", e),
            }
        }
        reports
    }
}

impl Drop for ProcessSession {
    fn drop(&mut self) {
        self.close_stdin();
        if !self.pumps.is_empty() {
            self.join_pumps();
        }
        // Reap if already gone, so no zombie is left behind
        if let Some(child) = self.child.as_mut() {
            let _ = child.try_wait();
        }
    }
}
