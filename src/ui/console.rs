//! Line-mode console
//!
//! Interactive front-end over a [`ProcessController`]: prints whatever the
//! child produced, otherwise prompts for one line of input and forwards it.
//! The loop ends when the child exits, the exit command was sent, or input
//! reaches end-of-file.

use std::io::{self, BufRead, Write};
use std::thread;

use crossterm::queue;
use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::Config;
use crate::core::controller::{ControllerError, InitOutcome, ProcessController, StreamId};

#[derive(Error, Debug)]
pub enum ConsoleError {
    #[error("Failed to start {command}: {reason}")]
    Spawn { command: String, reason: String },

    #[error("A child process is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Controller(#[from] ControllerError),

    #[error("Console I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, ConsoleError>;

/// Counters for one console run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsoleReport {
    /// Input lines forwarded to the child
    pub inputs: usize,
    /// stdout lines shown
    pub stdout_lines: usize,
    /// stderr lines shown
    pub stderr_lines: usize,
    /// Exit code of the child once collected
    pub exit_code: Option<i32>,
}

/// Line-mode front-end settings and output streams
pub struct Console<O: Write, E: Write> {
    config: Config,
    /// Child stdout is echoed here
    out: O,
    /// Prompt and child stderr go here
    err: E,
}

impl<O: Write, E: Write> Console<O, E> {
    pub fn new(config: Config, out: O, err: E) -> Self {
        Self { config, out, err }
    }

    /// Start the controller's child and drive it from `input` until done
    pub fn run<I: BufRead>(&mut self, proc: &mut ProcessController, mut input: I) -> Result<ConsoleReport> {
        match proc.init(None) {
            InitOutcome::Started => {}
            InitOutcome::StillRunning => return Err(ConsoleError::AlreadyRunning),
            InitOutcome::SpawnFailed => {
                let reason = proc
                    .spawn_error()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                return Err(ConsoleError::Spawn {
                    command: proc.command().to_string(),
                    reason,
                });
            }
        }

        while !proc.ready() {
            thread::sleep(self.config.timing.poll_interval());
        }
        thread::sleep(self.config.timing.startup_delay());

        let mut report = ConsoleReport::default();
        let mut exit_requested = false;

        while !exit_requested && proc.running() {
            if self.show_output(proc, &mut report)? {
                continue;
            }

            self.prompt()?;
            let mut line = String::new();
            if input.read_line(&mut line)? == 0 {
                info!("Console input closed");
                proc.close_stdin()?;
                exit_requested = true;
                continue;
            }
            let line = line.trim_end_matches(['\r', '\n']);

            if let Err(e) = proc.write(format!("{}\n", line).as_bytes()) {
                warn!("Input not delivered: {}", e);
                writeln!(self.err, "{}", e)?;
            } else {
                report.inputs += 1;
            }
            if line.trim() == self.config.console.exit_command {
                exit_requested = true;
            }
            thread::sleep(self.config.timing.input_settle());
        }

        // Whatever arrived after the last poll
        self.show_output(proc, &mut report)?;
        proc.wait_child();
        report.exit_code = proc.exit_code().flatten();
        Ok(report)
    }

    /// Print queued lines. Returns whether anything was printed.
    fn show_output(&mut self, proc: &ProcessController, report: &mut ConsoleReport) -> Result<bool> {
        let stdout_lines = proc.read_pipe(StreamId::Stdout)?;
        for line in &stdout_lines {
            self.out.write_all(line)?;
            self.out.write_all(b"\n")?;
        }
        self.out.flush()?;

        let stderr_lines = proc.read_pipe(StreamId::Stderr)?;
        for line in &stderr_lines {
            if self.config.console.color {
                queue!(self.err, SetForegroundColor(Color::Red))?;
            }
            self.err.write_all(line)?;
            if self.config.console.color {
                queue!(self.err, ResetColor)?;
            }
            self.err.write_all(b"\n")?;
        }
        self.err.flush()?;

        report.stdout_lines += stdout_lines.len();
        report.stderr_lines += stderr_lines.len();
        Ok(!stdout_lines.is_empty() || !stderr_lines.is_empty())
    }

    fn prompt(&mut self) -> Result<()> {
        let prompt = &self.config.console.prompt;
        if self.config.console.color {
            queue!(
                self.err,
                SetForegroundColor(Color::DarkGrey),
                Print(prompt),
                ResetColor
            )?;
        } else {
            self.err.write_all(prompt.as_bytes())?;
        }
        self.err.flush()?;
        Ok(())
    }
}
