//! Core engine for the cellbox notebook kernel.
//!
//! This crate provides:
//! - The guest language and its async interpreter
//! - The sandbox: bootstrap, execution dispatch, per-unit output routing
//!   and the widget registry
//! - Static analysis: dependencies, lint, completion and inspection
//! - The reactive graph over units
//! - In-process and out-of-process sandbox handles

pub mod analysis;
pub mod config;
pub mod error;
pub mod graph;
pub mod interp;
pub mod ipc;
pub mod lang;
pub mod sandbox;

pub use analysis::{
    Completion, CompletionKind, DependencyInfo, Diagnostic, InspectInfo, LintReport, Severity,
    analyze, lint,
};
pub use config::SandboxConfig;
pub use error::{Error, Result};
pub use graph::{GraphEngine, UnitIndex, UnitInfo};
pub use interp::{Interpreter, Value};
pub use ipc::WorkerProcess;
pub use sandbox::{
    ExecutionResult, HostMessage, Outcome, RenderBundle, Renderable, Sandbox, SandboxEvent,
    SandboxHandle, SandboxStatus, StreamKind, UnitId, UnitState, WidgetId,
};
