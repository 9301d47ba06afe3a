//! User-facing front-ends.
//!
//! - **console**: Line-mode loop that forwards typed lines to the child and
//!   prints its output between prompts

pub mod console;

pub use console::{Console, ConsoleError, ConsoleReport};
