//! Line queues
//!
//! Unbounded FIFO of output lines shared between a stream pump (producer)
//! and the controller thread (consumer).

use std::fmt;
use std::ops::Deref;

use crossbeam_channel::{unbounded, Receiver, Sender};

/// One line of child output with its terminator stripped
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Line(Vec<u8>);

impl Line {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Lossy UTF-8 view for display
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }
}

impl Deref for Line {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for Line {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<Vec<u8>> for Line {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl PartialEq<&str> for Line {
    fn eq(&self, other: &&str) -> bool {
        self.0 == other.as_bytes()
    }
}

impl fmt::Debug for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Line({:?})", String::from_utf8_lossy(&self.0))
    }
}

/// Thread-safe unbounded line FIFO
///
/// Cloning gives another handle onto the same queue, which is how a pump
/// and the controller share it.
#[derive(Clone)]
pub struct LineQueue {
    tx: Sender<Line>,
    rx: Receiver<Line>,
}

impl Default for LineQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl LineQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Append a line. Never blocks.
    pub fn push(&self, line: Line) {
        // Both ends live in every handle, so the channel cannot be disconnected
        let _ = self.tx.send(line);
    }

    /// Snapshot emptiness check, may be stale as soon as it returns
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Snapshot of the number of queued lines
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Take the oldest line, if any. Never blocks.
    pub fn pop(&self) -> Option<Line> {
        self.rx.try_recv().ok()
    }

    /// Remove and return every line queued right now, oldest first
    pub fn drain_all(&self) -> Vec<Line> {
        self.rx.try_iter().collect()
    }
}

impl fmt::Debug for LineQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineQueue").field("len", &self.len()).finish()
    }
}
