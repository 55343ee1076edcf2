//! Out-of-process sandboxes.
//!
//! A `cellbox-worker` process runs one sandbox and speaks the sandbox
//! protocol as newline-delimited JSON on stdin/stdout. Killing the process
//! is the hard stop for a unit that never yields.

mod worker;

pub use worker::{WorkerProcess, read_message, write_message};
