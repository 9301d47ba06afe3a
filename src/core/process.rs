//! Child process spawning
//!
//! Builds the child's command line and wires its standard streams to pipes.
//! stdin and stdout are always pipes. stderr either gets its own pipe or
//! shares the stdout pipe, in which case both streams arrive interleaved on a
//! single reader.

use std::fmt;
use std::io::{self, Read};
use std::process::{Child, ChildStdin, Command, Stdio};

use thiserror::Error;
use tracing::debug;

use super::pump::PumpError;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Empty command line")]
    EmptyCommand,

    #[error("Failed to create pipe: {0}")]
    Pipe(#[source] io::Error),

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Child stream {0} was not captured")]
    MissingStream(&'static str),

    #[error(transparent)]
    Pump(#[from] PumpError),
}

pub type Result<T> = std::result::Result<T, ProcessError>;

/// Program path plus positional arguments. No shell is involved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
}

impl CommandLine {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Split a command string on whitespace. Quoting is not interpreted.
    pub fn parse(command: &str) -> Self {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next().unwrap_or_default();
        Self {
            program,
            args: parts.collect(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn is_empty(&self) -> bool {
        self.program.is_empty()
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

impl From<&str> for CommandLine {
    fn from(command: &str) -> Self {
        Self::parse(command)
    }
}

/// Readable end of a child output stream
pub type OutputReader = Box<dyn Read + Send>;

/// A freshly spawned child with its pipe ends
pub struct SpawnedChild {
    pub child: Child,
    pub stdin: ChildStdin,
    /// stdout, or stdout and stderr merged
    pub stdout: OutputReader,
    /// Present only when stderr was piped separately
    pub stderr: Option<OutputReader>,
}

/// Spawn `command` with piped stdin/stdout and stderr either separate or
/// merged into stdout.
pub fn spawn_child(command: &CommandLine, separate_stderr: bool) -> Result<SpawnedChild> {
    if command.is_empty() {
        return Err(ProcessError::EmptyCommand);
    }

    let mut cmd = Command::new(command.program());
    cmd.args(command.args()).stdin(Stdio::piped());

    let merged_reader = if separate_stderr {
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        None
    } else {
        let (reader, writer) = io::pipe().map_err(ProcessError::Pipe)?;
        let writer_err = writer.try_clone().map_err(ProcessError::Pipe)?;
        cmd.stdout(writer).stderr(writer_err);
        Some(reader)
    };

    let spawned = cmd.spawn();
    // The command still owns our copies of the merged pipe's write end.
    // They must be closed or the reader never sees end-of-stream.
    drop(cmd);
    let mut child = spawned.map_err(|source| ProcessError::Spawn {
        program: command.program().to_string(),
        source,
    })?;

    debug!("Spawned {} (pid {})", command, child.id());

    let stdin = child.stdin.take().ok_or(ProcessError::MissingStream("stdin"))?;
    let (stdout, stderr) = match merged_reader {
        Some(reader) => {
            let merged: OutputReader = Box::new(reader);
            (merged, None)
        }
        None => {
            let out: OutputReader =
                Box::new(child.stdout.take().ok_or(ProcessError::MissingStream("stdout"))?);
            let err: OutputReader =
                Box::new(child.stderr.take().ok_or(ProcessError::MissingStream("stderr"))?);
            (out, Some(err))
        }
    };

    Ok(SpawnedChild {
        child,
        stdin,
        stdout,
        stderr,
    })
}
