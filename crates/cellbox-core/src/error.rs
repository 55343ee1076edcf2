//! Error types for cellbox-core.

use thiserror::Error;

/// Result type for cellbox-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in cellbox-core.
///
/// Guest-code faults are not represented here: they travel as
/// [`crate::interp::Exception`] values and surface to the host as failure
/// outcomes. These variants cover the sandbox's own plumbing.
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to parse guest source.
    #[error("parse error: {0}")]
    Parse(String),

    /// Sandbox bootstrap failed; the sandbox is unusable until restarted.
    #[error("sandbox bootstrap failed: {0}")]
    Bootstrap(String),

    /// `initialize` was called on a sandbox that is not uninitialized.
    #[error("sandbox already initialized (status: {0})")]
    AlreadyInitialized(String),

    /// The sandbox cannot accept work in its current state.
    #[error("sandbox not ready (status: {0})")]
    NotReady(String),

    /// Cyclic dependency detected in the unit graph.
    #[error("cyclic dependency detected: {0}")]
    CyclicDependency(String),

    /// Unit not found.
    #[error("unit not found: {0}")]
    UnitNotFound(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Communication error with a sandbox thread or worker process.
    #[error("IPC error: {0}")]
    Ipc(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Error message with a recovery hint, for user-facing output.
    pub fn with_hint(&self) -> String {
        match self {
            Error::Bootstrap(_) => format!("{self}\n  hint: restart the sandbox to recover"),
            Error::NotReady(_) => format!("{self}\n  hint: send `init` before running code"),
            Error::CyclicDependency(_) => {
                format!("{self}\n  hint: a name defined in one cell is redefined by a cell that reads it")
            }
            Error::Ipc(_) => format!(
                "{self}\n  hint: set CELLBOX_WORKER_PATH or build the cellbox-worker binary"
            ),
            _ => self.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
