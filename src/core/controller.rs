//! Process controller
//!
//! The public facade over [`ProcessSession`]. A controller runs at most one
//! session at a time and can be restarted once the previous child exited.
//! Its line queues outlive individual sessions.
//!
//! ```no_run
//! use ioproc::{CommandLine, ProcessController, StreamId};
//!
//! let mut proc = ProcessController::new(CommandLine::parse("./solver -w 10"), true);
//! let _ = proc.init(None);
//! while proc.running() {
//!     for line in proc.read_pipe(StreamId::Stdout).unwrap() {
//!         println!("{}", line.to_string_lossy());
//!     }
//! }
//! proc.wait_child();
//! ```

use std::io::{self, Write};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::process::{CommandLine, ProcessError};
use super::queue::{Line, LineQueue};
use super::session::{ProcessSession, ProcessStatus, SessionError};

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Invalid stream identifier: {0} (expected stdout or stderr)")]
    InvalidStream(i32),

    #[error("No active session")]
    NoSession,

    #[error(transparent)]
    Session(#[from] SessionError),
}

pub type Result<T> = std::result::Result<T, ControllerError>;

/// Standard stream selector, numbered like file descriptors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamId {
    Stdin = 0,
    Stdout = 1,
    Stderr = 2,
}

impl TryFrom<i32> for StreamId {
    type Error = ControllerError;

    fn try_from(fd: i32) -> Result<Self> {
        match fd {
            0 => Ok(StreamId::Stdin),
            1 => Ok(StreamId::Stdout),
            2 => Ok(StreamId::Stderr),
            _ => Err(ControllerError::InvalidStream(fd)),
        }
    }
}

/// Result of [`ProcessController::init`]
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// A new session was started
    Started,
    /// The previous child is still alive, nothing was done
    StillRunning,
    /// The child could not be spawned; see `spawn_error`
    SpawnFailed,
}

impl InitOutcome {
    pub fn is_accepted(&self) -> bool {
        *self == InitOutcome::Started
    }
}

/// Manages zero or one child sessions over time
pub struct ProcessController {
    command: CommandLine,
    /// Pipe stderr into its own queue instead of merging it into stdout
    capture_stderr: bool,
    stdout_queue: LineQueue,
    stderr_queue: LineQueue,
    session: Option<ProcessSession>,
    /// Receives residual output and the exit notice in `wait_child`
    sink: Box<dyn Write + Send>,
    /// Exit code of the last collected session
    last_exit: Option<Option<i32>>,
}

impl ProcessController {
    /// Create an idle controller. Nothing is spawned until `init`.
    pub fn new(command: CommandLine, capture_stderr: bool) -> Self {
        Self {
            command,
            capture_stderr,
            stdout_queue: LineQueue::new(),
            stderr_queue: LineQueue::new(),
            session: None,
            sink: Box::new(io::stdout()),
            last_exit: None,
        }
    }

    /// Replace the residual output sink (stdout by default)
    pub fn with_sink(mut self, sink: impl Write + Send + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn command(&self) -> &CommandLine {
        &self.command
    }

    pub fn captures_stderr(&self) -> bool {
        self.capture_stderr
    }

    /// Start a new session, optionally with a different command.
    ///
    /// Rejected while the current child is alive. A finished session is
    /// collected with `wait_child` first.
    pub fn init(&mut self, command: Option<CommandLine>) -> InitOutcome {
        if let Some(session) = self.session.as_mut() {
            if session.poll() == ProcessStatus::Running {
                debug!("init rejected, {} still running", session.command());
                return InitOutcome::StillRunning;
            }
            self.wait_child();
        }

        if let Some(command) = command {
            self.command = command;
        }

        let stderr_queue = self.capture_stderr.then(|| self.stderr_queue.clone());
        let session = ProcessSession::start(self.command.clone(), self.stdout_queue.clone(), stderr_queue);
        let outcome = if session.is_spawned() {
            InitOutcome::Started
        } else {
            InitOutcome::SpawnFailed
        };
        self.session = Some(session);
        outcome
    }

    /// The launch attempt succeeded. Says nothing about output.
    pub fn ready(&self) -> bool {
        self.session.as_ref().is_some_and(ProcessSession::is_spawned)
    }

    /// The child was launched and has not exited yet
    pub fn running(&mut self) -> bool {
        match self.session.as_mut() {
            Some(session) => session.poll() == ProcessStatus::Running,
            None => false,
        }
    }

    /// Spawn failure of the current session, if any
    pub fn spawn_error(&self) -> Option<&ProcessError> {
        self.session.as_ref().and_then(ProcessSession::spawn_error)
    }

    /// Exit code of the most recently collected session
    pub fn exit_code(&self) -> Option<Option<i32>> {
        self.last_exit
    }

    fn queue(&self, stream: StreamId) -> Result<&LineQueue> {
        match stream {
            StreamId::Stdout => Ok(&self.stdout_queue),
            StreamId::Stderr => Ok(&self.stderr_queue),
            StreamId::Stdin => Err(ControllerError::InvalidStream(stream as i32)),
        }
    }

    /// Whether `stream` has queued lines (snapshot)
    pub fn has_bytes(&self, stream: StreamId) -> Result<bool> {
        Ok(!self.queue(stream)?.is_empty())
    }

    /// Take every line currently queued for `stream`
    pub fn read_pipe(&self, stream: StreamId) -> Result<Vec<Line>> {
        Ok(self.queue(stream)?.drain_all())
    }

    /// Write raw bytes to the child's stdin and flush
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let session = self.session.as_mut().ok_or(ControllerError::NoSession)?;
        session.write(data)?;
        Ok(())
    }

    /// Send end-of-input to the child
    pub fn close_stdin(&mut self) -> Result<()> {
        let session = self.session.as_mut().ok_or(ControllerError::NoSession)?;
        session.close_stdin();
        Ok(())
    }

    /// Forcibly terminate the child
    pub fn kill(&mut self) -> Result<()> {
        let session = self.session.as_mut().ok_or(ControllerError::NoSession)?;
        session.kill()?;
        Ok(())
    }

    /// Collect the current session.
    ///
    /// Closes the child's stdin, blocks until its output streams are closed
    /// and the child is reaped, writes any undrained lines to the sink and
    /// forgets the session so `init` can start a fresh one. No-op without a
    /// session.
    pub fn wait_child(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };

        session.close_stdin();
        for report in session.join_pumps() {
            debug!(
                "{} {}: {} lines, {} bytes",
                session.command(),
                report.stream,
                report.lines,
                report.bytes
            );
        }
        if let ProcessStatus::Exited(code) = session.wait() {
            self.last_exit = Some(code);
        }

        // A session that never spawned gets no exit notice
        let notice = session.is_spawned().then(|| session.command());
        let written = self.emit_residual(notice);
        info!("Session collected: {} ({} residual lines)", session.command(), written);
    }

    /// Move queued lines to the sink one at a time, then the exit notice.
    ///
    /// Every line is written with a trailing `\n`, also a final line the child
    /// never terminated. On the first sink error the remaining lines are left
    /// queued for `read_pipe`. Returns how many lines were written.
    fn emit_residual(&mut self, notice: Option<&CommandLine>) -> usize {
        let mut written = 0;
        for queue in [&self.stdout_queue, &self.stderr_queue] {
            while let Some(line) = queue.pop() {
                let result = self.sink.write_all(&line).and_then(|()| self.sink.write_all(b"\n"));
                if let Err(e) = result {
                    let left = self.stdout_queue.len() + self.stderr_queue.len();
                    warn!(
                        "Failed to flush residual output: {} (1 line lost, {} left queued)",
                        e, left
                    );
                    return written;
                }
                written += 1;
            }
        }

        let tail = match notice {
            Some(command) => writeln!(self.sink, "[{}] exited", command),
            None => Ok(()),
        };
        if let Err(e) = tail.and_then(|()| self.sink.flush()) {
            warn!("Failed to flush residual output: {}", e);
        }
        written
    }
}

impl Drop for ProcessController {
    fn drop(&mut self) {
        self.wait_child();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    /// Sink that can be inspected after the controller wrote to it
    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl SharedSink {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Sink whose every write fails
    struct FailingSink;

    impl Write for FailingSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn sh(script: &str) -> CommandLine {
        CommandLine::new("sh", ["-c", script])
    }

    fn controller(command: CommandLine, capture_stderr: bool) -> (ProcessController, SharedSink) {
        let sink = SharedSink::default();
        let proc = ProcessController::new(command, capture_stderr).with_sink(sink.clone());
        (proc, sink)
    }

    /// Poll `stream` until `count` lines arrived or a timeout hits
    fn collect_lines(proc: &ProcessController, stream: StreamId, count: usize) -> Vec<String> {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut lines = Vec::new();
        while lines.len() < count && Instant::now() < deadline {
            for line in proc.read_pipe(stream).unwrap() {
                lines.push(line.to_string_lossy());
            }
            thread::sleep(Duration::from_millis(2));
        }
        lines
    }

    fn wait_not_running(proc: &mut ProcessController) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while proc.running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_stream_id_from_fd() {
        assert_eq!(StreamId::try_from(1).unwrap(), StreamId::Stdout);
        assert_eq!(StreamId::try_from(2).unwrap(), StreamId::Stderr);
        assert_eq!(StreamId::try_from(0).unwrap(), StreamId::Stdin);
        assert!(matches!(StreamId::try_from(7), Err(ControllerError::InvalidStream(7))));
    }

    #[test]
    fn test_idle_controller() {
        let (mut proc, sink) = controller(CommandLine::parse("true"), true);
        assert!(!proc.ready());
        assert!(!proc.running());
        assert!(matches!(proc.write(b"x"), Err(ControllerError::NoSession)));
        assert!(!proc.has_bytes(StreamId::Stdout).unwrap());
        assert!(proc.read_pipe(StreamId::Stderr).unwrap().is_empty());

        // No session, nothing emitted
        proc.wait_child();
        assert_eq!(sink.contents(), "");
    }

    #[test]
    fn test_invalid_stream_distinct_from_empty() {
        let (proc, _sink) = controller(CommandLine::parse("true"), true);
        assert!(matches!(
            proc.read_pipe(StreamId::Stdin),
            Err(ControllerError::InvalidStream(0))
        ));
        assert!(matches!(
            proc.has_bytes(StreamId::Stdin),
            Err(ControllerError::InvalidStream(0))
        ));
        assert_eq!(proc.read_pipe(StreamId::Stdout).unwrap(), Vec::<Line>::new());
    }

    #[test]
    fn test_nonexistent_binary() {
        let (mut proc, _sink) = controller(CommandLine::parse("/nonexistent/ioproc-missing -x"), true);
        let outcome = proc.init(None);
        assert_eq!(outcome, InitOutcome::SpawnFailed);
        assert!(!outcome.is_accepted());
        assert!(!proc.ready());
        assert!(!proc.running());
        assert!(matches!(proc.spawn_error(), Some(ProcessError::Spawn { .. })));
        assert!(matches!(
            proc.write(b"hello\n"),
            Err(ControllerError::Session(SessionError::NotStarted))
        ));
    }

    #[test]
    #[cfg(unix)]
    fn test_echo_scenario() {
        let script = r#"while IFS= read -r line; do echo "ECHO: $line"; done"#;
        let (mut proc, _sink) = controller(sh(script), true);
        assert_eq!(proc.init(None), InitOutcome::Started);
        assert!(proc.ready());

        proc.write(b"hello\n").unwrap();
        let lines = collect_lines(&proc, StreamId::Stdout, 1);
        assert_eq!(lines, vec!["ECHO: hello"]);
        assert!(proc.running());

        proc.wait_child();
        assert!(!proc.ready());
        assert_eq!(proc.exit_code(), Some(Some(0)));
    }

    #[test]
    #[cfg(unix)]
    fn test_done_flushed_on_wait() {
        let (mut proc, sink) = controller(sh("printf 'done\\n'"), true);
        assert!(proc.init(None).is_accepted());

        wait_not_running(&mut proc);
        proc.wait_child();

        assert_eq!(sink.contents(), "done\n[sh -c printf 'done\\n'] exited\n");
        assert!(!proc.has_bytes(StreamId::Stdout).unwrap());
    }

    #[test]
    #[cfg(unix)]
    fn test_lines_in_order() {
        let (mut proc, _sink) = controller(sh("i=0; while [ $i -lt 500 ]; do echo line$i; i=$((i+1)); done"), true);
        assert!(proc.init(None).is_accepted());

        let lines = collect_lines(&proc, StreamId::Stdout, 500);
        let expected: Vec<String> = (0..500).map(|i| format!("line{}", i)).collect();
        assert_eq!(lines, expected);
        proc.wait_child();
    }

    #[test]
    #[cfg(unix)]
    fn test_interleaved_streams_keep_order() {
        let script = "i=0; while [ $i -lt 50 ]; do echo out$i; echo err$i 1>&2; i=$((i+1)); done";
        let (mut proc, _sink) = controller(sh(script), true);
        assert!(proc.init(None).is_accepted());

        let out = collect_lines(&proc, StreamId::Stdout, 50);
        let err = collect_lines(&proc, StreamId::Stderr, 50);
        assert_eq!(out, (0..50).map(|i| format!("out{}", i)).collect::<Vec<_>>());
        assert_eq!(err, (0..50).map(|i| format!("err{}", i)).collect::<Vec<_>>());
        proc.wait_child();
    }

    #[test]
    #[cfg(unix)]
    fn test_merged_stderr() {
        let (mut proc, _sink) = controller(sh("echo visible 1>&2"), false);
        assert!(proc.init(None).is_accepted());

        let lines = collect_lines(&proc, StreamId::Stdout, 1);
        assert_eq!(lines, vec!["visible"]);
        assert!(!proc.has_bytes(StreamId::Stderr).unwrap());
        proc.wait_child();
    }

    #[test]
    #[cfg(unix)]
    fn test_has_bytes_matches_read_pipe() {
        let (mut proc, _sink) = controller(sh("echo a; echo b"), true);
        assert!(proc.init(None).is_accepted());
        wait_not_running(&mut proc);
        // Let the pump reach end-of-stream
        while proc.session.as_ref().is_some_and(|s| !s.pumps_finished()) {
            thread::sleep(Duration::from_millis(2));
        }

        assert!(proc.has_bytes(StreamId::Stdout).unwrap());
        assert_eq!(proc.read_pipe(StreamId::Stdout).unwrap().len(), 2);
        assert!(!proc.has_bytes(StreamId::Stdout).unwrap());
        assert!(proc.read_pipe(StreamId::Stdout).unwrap().is_empty());
        proc.wait_child();
    }

    #[test]
    #[cfg(unix)]
    fn test_init_rejected_while_running() {
        let (mut proc, _sink) = controller(CommandLine::parse("cat"), true);
        assert_eq!(proc.init(None), InitOutcome::Started);
        assert_eq!(proc.init(Some(CommandLine::parse("true"))), InitOutcome::StillRunning);
        // Command unchanged by the rejected call
        assert_eq!(proc.command().program(), "cat");

        proc.close_stdin().unwrap();
        proc.wait_child();
    }

    #[test]
    #[cfg(unix)]
    fn test_write_after_exit_fails() {
        let (mut proc, _sink) = controller(sh("exit 0"), true);
        assert!(proc.init(None).is_accepted());
        wait_not_running(&mut proc);

        let payload = vec![b'x'; 1 << 20];
        assert!(proc.write(&payload).is_err());
        assert!(!proc.running());
        assert!(proc.ready());
        proc.wait_child();
    }

    #[test]
    #[cfg(unix)]
    fn test_restart_after_wait() {
        let (mut proc, sink) = controller(sh("echo first"), true);
        assert!(proc.init(None).is_accepted());
        assert_eq!(collect_lines(&proc, StreamId::Stdout, 1), vec!["first"]);
        proc.wait_child();

        assert_eq!(proc.init(Some(sh("echo second"))), InitOutcome::Started);
        assert_eq!(collect_lines(&proc, StreamId::Stdout, 1), vec!["second"]);
        proc.wait_child();

        assert_eq!(proc.command().to_string(), "sh -c echo second");
        assert_eq!(
            sink.contents(),
            "[sh -c echo first] exited\n[sh -c echo second] exited\n"
        );
    }

    #[test]
    #[cfg(unix)]
    fn test_init_collects_finished_session() {
        let (mut proc, sink) = controller(sh("echo left-over"), true);
        assert!(proc.init(None).is_accepted());
        wait_not_running(&mut proc);

        // Undrained output of the finished session is flushed by init
        assert_eq!(proc.init(Some(sh("exit 0"))), InitOutcome::Started);
        assert!(sink.contents().starts_with("left-over\n[sh -c echo left-over] exited\n"));
        proc.wait_child();
    }

    #[test]
    #[cfg(unix)]
    fn test_kill_then_collect() {
        let (mut proc, _sink) = controller(CommandLine::parse("sleep 30"), true);
        assert!(proc.init(None).is_accepted());
        assert!(proc.running());

        proc.kill().unwrap();
        proc.wait_child();
        assert_eq!(proc.exit_code(), Some(None));
    }

    #[test]
    #[cfg(unix)]
    fn test_drop_collects_session() {
        let sink = SharedSink::default();
        {
            let mut proc = ProcessController::new(sh("echo bye"), true).with_sink(sink.clone());
            assert!(proc.init(None).is_accepted());
        }
        assert!(sink.contents().ends_with("[sh -c echo bye] exited\n"));
    }

    #[test]
    #[cfg(unix)]
    fn test_no_exit_notice_after_spawn_failure() {
        let (mut proc, sink) = controller(CommandLine::parse("/nonexistent/ioproc-missing"), true);
        assert_eq!(proc.init(None), InitOutcome::SpawnFailed);

        // The failed session is collected here without claiming it exited
        assert_eq!(proc.init(Some(sh("exit 0"))), InitOutcome::Started);
        proc.wait_child();
        assert_eq!(sink.contents(), "[sh -c exit 0] exited\n");
        assert_eq!(proc.exit_code(), Some(Some(0)));
    }

    #[test]
    #[cfg(unix)]
    fn test_pump_start_failure_not_ready() {
        fn refuse_stdout(
            name: &str,
            _reader: crate::core::process::OutputReader,
            _queue: LineQueue,
        ) -> std::result::Result<crate::core::pump::StreamPump, crate::core::pump::PumpError> {
            Err(crate::core::pump::PumpError::Spawn {
                name: name.to_string(),
                source: io::Error::new(io::ErrorKind::WouldBlock, "thread limit reached"),
            })
        }

        let (mut proc, sink) = controller(CommandLine::parse("cat"), true);
        proc.session = Some(ProcessSession::start_with(
            proc.command().clone(),
            proc.stdout_queue.clone(),
            Some(proc.stderr_queue.clone()),
            refuse_stdout,
        ));
        assert!(!proc.ready());
        assert!(!proc.running());
        assert!(matches!(proc.spawn_error(), Some(ProcessError::Pump(_))));

        proc.wait_child();
        assert_eq!(sink.contents(), "");
        assert_eq!(proc.exit_code(), None);
    }

    #[test]
    #[cfg(unix)]
    fn test_unterminated_line_gets_newline_in_sink() {
        let (mut proc, sink) = controller(sh("printf partial"), true);
        assert!(proc.init(None).is_accepted());
        wait_not_running(&mut proc);
        proc.wait_child();
        assert_eq!(sink.contents(), "partial\n[sh -c printf partial] exited\n");
    }

    #[test]
    #[cfg(unix)]
    fn test_failing_sink_keeps_remaining_lines() {
        let mut proc = ProcessController::new(sh("echo a; echo b; echo c 1>&2"), true)
            .with_sink(FailingSink);
        assert!(proc.init(None).is_accepted());
        wait_not_running(&mut proc);
        proc.wait_child();

        // The line being written is lost, the rest stays readable
        assert_eq!(proc.exit_code(), Some(Some(0)));
        assert_eq!(proc.read_pipe(StreamId::Stdout).unwrap(), vec![Line::from("b")]);
        assert_eq!(proc.read_pipe(StreamId::Stderr).unwrap(), vec![Line::from("c")]);
        assert!(!proc.ready());
        assert_eq!(proc.init(Some(sh("exit 0"))), InitOutcome::Started);
        proc.wait_child();
    }
}
