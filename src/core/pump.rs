//! Stream pumps
//!
//! A pump is a dedicated thread that reads one child stream to its end and
//! pushes every line it finds onto a [`LineQueue`].
//!
//! Framing: `\n` ends a line and a `\r` directly before it is dropped too.
//! A trailing chunk without a terminator is still pushed as the last line.

use std::io::{self, BufRead, BufReader, Read};
use std::thread::{self, JoinHandle};

use thiserror::Error;
use tracing::{debug, warn};

use super::queue::{Line, LineQueue};

/// Read buffer size for each pump
const PUMP_BUFFER_SIZE: usize = 8192;

#[derive(Error, Debug)]
pub enum PumpError {
    #[error("Failed to spawn pump thread for {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("Pump thread for {0} panicked")]
    Panicked(String),
}

/// What a finished pump did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PumpReport {
    /// Stream name ("stdout", "stderr")
    pub stream: String,
    /// Lines pushed onto the queue
    pub lines: usize,
    /// Bytes read from the stream, terminators included
    pub bytes: usize,
    /// Read error that ended the pump early, if any
    pub error: Option<io::ErrorKind>,
}

/// Handle to a running pump thread
pub struct StreamPump {
    name: String,
    handle: JoinHandle<PumpReport>,
}

impl StreamPump {
    /// Start pumping `reader` into `queue` on a new named thread
    pub fn spawn<R>(name: &str, reader: R, queue: LineQueue) -> Result<Self, PumpError>
    where
        R: Read + Send + 'static,
    {
        let stream = name.to_string();
        let handle = thread::Builder::new()
            .name(format!("ioproc-pump-{}", name))
            .spawn(move || pump_lines(&stream, reader, &queue))
            .map_err(|source| PumpError::Spawn {
                name: name.to_string(),
                source,
            })?;

        debug!("Pump started: {}", name);
        Ok(Self {
            name: name.to_string(),
            handle,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the stream has reached its end (non-blocking)
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Block until the stream is exhausted
    pub fn join(self) -> Result<PumpReport, PumpError> {
        self.handle
            .join()
            .map_err(|_| PumpError::Panicked(self.name))
    }
}

/// Read `reader` to end-of-stream, pushing each line onto `queue`
pub fn pump_lines<R: Read>(stream: &str, reader: R, queue: &LineQueue) -> PumpReport {
    let mut reader = BufReader::with_capacity(PUMP_BUFFER_SIZE, reader);
    let mut report = PumpReport {
        stream: stream.to_string(),
        lines: 0,
        bytes: 0,
        error: None,
    };
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let result = reader.read_until(b'\n', &mut buf);
        // read_until leaves whatever it got in buf even on error
        if !buf.is_empty() {
            report.bytes += buf.len();
            strip_terminator(&mut buf);
            queue.push(Line::new(buf.as_slice()));
            report.lines += 1;
        }
        match result {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("Read error on {}: {}", stream, e);
                report.error = Some(e.kind());
                break;
            }
        }
    }

    debug!(
        "Pump finished: {} ({} lines, {} bytes)",
        stream, report.lines, report.bytes
    );
    report
}

/// Remove a trailing `\n` or `\r\n`. Returns whether one was present.
fn strip_terminator(buf: &mut Vec<u8>) -> bool {
    if buf.last() != Some(&b'\n') {
        return false;
    }
    buf.pop();
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    true
}
