//! Core subprocess I/O components.
//!
//! This module contains the process multiplexing logic:
//!
//! - **queue**: Thread-safe line FIFO shared between a pump and the caller
//! - **pump**: Worker thread draining one child stream into a queue
//! - **process**: Command lines and child spawning with pipe wiring
//! - **session**: One child process plus its pumps
//! - **controller**: Restartable facade managing zero or one sessions
//!
//! # Architecture
//!
//! ```text
//! ProcessController
//! ├── LineQueue (stdout)   ◄── StreamPump ◄── child stdout (+ stderr if merged)
//! ├── LineQueue (stderr)   ◄── StreamPump ◄── child stderr
//! └── ProcessSession
//!     ├── Child (std::process)
//!     └── ChildStdin        ──► child stdin
//! ```

pub mod queue;
pub mod pump;
pub mod process;
pub mod session;
pub mod controller;
