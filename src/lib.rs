//! ioproc - asynchronous subprocess I/O multiplexer
//!
//! Launches a child process, drains its stdout and stderr into line queues
//! on dedicated pump threads, and lets a single caller thread poll, read and
//! write without blocking on the child.
//!
//! - [`ProcessController`]: restartable facade (`init`, `ready`, `running`,
//!   `has_bytes`, `read_pipe`, `write`, `wait_child`)
//! - [`ProcessSession`]: one spawned child and its pumps
//! - [`StreamPump`] / [`LineQueue`]: the per-stream plumbing
//! - [`Console`]: interactive line-mode front-end used by the `ioproc` binary

pub mod config;
pub mod core;
pub mod ui;

pub use crate::config::Config;
pub use crate::core::controller::{ControllerError, InitOutcome, ProcessController, StreamId};
pub use crate::core::process::{CommandLine, ProcessError};
pub use crate::core::pump::{PumpError, PumpReport, StreamPump};
pub use crate::core::queue::{Line, LineQueue};
pub use crate::core::session::{ProcessSession, ProcessStatus, SessionError};
pub use crate::ui::{Console, ConsoleError, ConsoleReport};
