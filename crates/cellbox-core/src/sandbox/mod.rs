//! The execution multiplexer.
//!
//! A [`Sandbox`] owns one interpreter, the shared namespace every unit runs
//! against, the widget registry and the output multiplexer. It lives on a
//! single thread; units interleave only where guest code awaits.
//!
//! # Module Structure
//!
//! - `protocol` - host <-> sandbox messages
//! - `context` - task-local context tags and their liveness table
//! - `output` - per-unit routing of stream writes
//! - `widgets` / `render` - widget registry and render bundles
//! - `bootstrap` - one-time initialization
//! - `dispatch` - running units and shaping their results
//! - `worker` - the sandbox thread, message loop and restart handle

mod bootstrap;
pub mod context;
mod dispatch;
pub mod output;
pub mod protocol;
pub mod render;
pub mod widgets;
mod worker;

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;

pub use context::ContextTag;
pub use output::OutputMultiplexer;
pub use protocol::{
    ExecutionResult, HostChannel, HostMessage, Outcome, SandboxEvent, StreamKind, UnitId, WidgetId,
};
pub use render::{RenderBundle, Renderable, UI_MIME};
pub use widgets::{Widget, WidgetKind, WidgetRegistry};
pub use worker::{SandboxHandle, serve};

use crate::analysis::{self, Completer, Completion, DependencyInfo, InspectInfo, LintReport};
use crate::config::SandboxConfig;
use crate::interp::{AbortHandle, Interpreter, Namespace, TaskSet};
use context::ContextTable;

/// Lifecycle of a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxStatus {
    Uninitialized,
    Loading,
    Ready,
    /// Ready, with at least one unit in flight.
    Running,
    /// Bootstrap failed; only a restart recovers.
    Faulted,
}

impl SandboxStatus {
    /// Whether units can be submitted.
    pub fn accepts_work(self) -> bool {
        matches!(self, SandboxStatus::Ready | SandboxStatus::Running)
    }
}

impl fmt::Display for SandboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SandboxStatus::Uninitialized => "uninitialized",
            SandboxStatus::Loading => "loading",
            SandboxStatus::Ready => "ready",
            SandboxStatus::Running => "running",
            SandboxStatus::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// Where a unit's latest run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Queued,
    Active,
    /// Parked at an `await`.
    Suspended,
    Completed,
    Failed,
}

impl UnitState {
    pub fn is_finished(self) -> bool {
        matches!(self, UnitState::Completed | UnitState::Failed)
    }
}

/// One sandbox: an interpreter plus everything units share.
pub struct Sandbox {
    config: SandboxConfig,
    status: Cell<SandboxStatus>,
    interp: RefCell<Option<Rc<Interpreter>>>,
    namespace: Namespace,
    contexts: Rc<ContextTable>,
    widgets: Rc<WidgetRegistry>,
    output: Rc<OutputMultiplexer>,
    host: HostChannel,
    abort: AbortHandle,
    /// Runs spawned by `serve` and guest `asyncio` tasks.
    tasks: Rc<TaskSet>,
    /// Latest run of each unit, keyed by unit, with that run's epoch.
    units: RefCell<FxHashMap<UnitId, (u64, UnitState)>>,
    in_flight: Cell<usize>,
    /// Context that widget callbacks run under, set by `set_context`.
    interaction_context: RefCell<Option<ContextTag>>,
    completer: Completer,
}

impl Sandbox {
    pub fn new(config: SandboxConfig, host: impl Into<HostChannel>, abort: AbortHandle) -> Rc<Self> {
        let host = host.into().with_abort(abort.clone());
        let contexts = Rc::new(ContextTable::new());
        let widgets = Rc::new(WidgetRegistry::new());
        widgets.connect(host.clone());
        widgets.track(contexts.clone());
        let output = Rc::new(OutputMultiplexer::new(contexts.clone(), host.clone()));
        let completer = Completer::new(config.show_private, config.max_completions);
        Rc::new(Self {
            config,
            status: Cell::new(SandboxStatus::Uninitialized),
            interp: RefCell::new(None),
            namespace: Namespace::new(),
            contexts,
            widgets,
            output,
            host,
            abort,
            tasks: Rc::new(TaskSet::new()),
            units: RefCell::new(FxHashMap::default()),
            in_flight: Cell::new(0),
            interaction_context: RefCell::new(None),
            completer,
        })
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn status(&self) -> SandboxStatus {
        self.status.get()
    }

    /// The shared namespace.
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn widgets(&self) -> &Rc<WidgetRegistry> {
        &self.widgets
    }

    pub fn output(&self) -> &Rc<OutputMultiplexer> {
        &self.output
    }

    pub fn abort_handle(&self) -> &AbortHandle {
        &self.abort
    }

    pub fn tasks(&self) -> &Rc<TaskSet> {
        &self.tasks
    }

    /// Run `fut` while driving the sandbox's task set.
    ///
    /// [`serve`] does this for its whole lifetime. Callers that use
    /// [`Sandbox::submit`] directly wrap their work in it when guest code
    /// creates `asyncio` tasks; without a driver `asyncio.create_task`
    /// raises `RuntimeError`.
    pub async fn run_until<F: std::future::Future>(&self, fut: F) -> F::Output {
        self.tasks.run_until(fut).await
    }

    /// The interpreter, once bootstrap has created it.
    pub fn interpreter(&self) -> Option<Rc<Interpreter>> {
        self.interp.borrow().clone()
    }

    /// State of the latest run of `unit`.
    pub fn unit_state(&self, unit: &UnitId) -> Option<UnitState> {
        self.units.borrow().get(unit).map(|(_, state)| *state)
    }

    /// Number of units submitted and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.in_flight.get()
    }

    /// Number of live context tags.
    pub fn live_contexts(&self) -> usize {
        self.contexts.live_count()
    }

    /// Send an event to the host. Returns `false` if it was dropped.
    pub fn emit(&self, event: SandboxEvent) -> bool {
        let sent = self.host.send(event);
        if !sent {
            tracing::debug!("Host channel unavailable, dropping event");
        }
        sent
    }

    /// Make `unit` the context that widget callbacks run under.
    ///
    /// Each call activates a fresh tag; the previous interaction tag is
    /// retired.
    pub fn set_context(&self, unit: &UnitId) {
        let tag = self.contexts.activate(unit);
        tracing::debug!(unit = %unit, epoch = tag.epoch, "Interaction context set");
        if let Some(previous) = self.interaction_context.borrow_mut().replace(tag) {
            self.contexts.retire(&previous);
        }
    }

    /// Retire every context of `unit` and drop the widgets it owns.
    ///
    /// Late writes from still-suspended runs of the unit are dropped from
    /// here on, and interactions with its old widgets report `false`.
    pub fn clear_context(&self, unit: &UnitId) {
        let widgets = self.widgets.clear(unit);
        let tags = self.contexts.clear(unit);
        let mut interaction = self.interaction_context.borrow_mut();
        if interaction.as_ref().is_some_and(|tag| &tag.unit == unit) {
            *interaction = None;
        }
        tracing::debug!(unit = %unit, widgets, tags, "Context cleared");
    }

    /// Route a host interaction to its widget.
    ///
    /// Returns `false` for unknown widgets, or before bootstrap. Callbacks
    /// run under the interaction context when one is set and still live.
    pub async fn interact(
        self: &Rc<Self>,
        widget_id: &WidgetId,
        payload: &serde_json::Map<String, serde_json::Value>,
    ) -> bool {
        let Some(interp) = self.interpreter() else {
            tracing::debug!(widget = %widget_id, "Interaction before bootstrap ignored");
            return false;
        };
        let tag = self
            .interaction_context
            .borrow()
            .clone()
            .filter(|tag| self.contexts.is_live(tag));
        let widgets = self.widgets.clone();
        context::propagate(
            tag,
            crate::interp::with_call_depth(widgets.handle_interaction(&interp, widget_id, payload)),
        )
        .await
    }

    pub fn analyze(&self, code: &str) -> DependencyInfo {
        analysis::analyze(code)
    }

    /// Lint `code`; names bound in the shared namespace count as defined.
    pub fn lint(&self, code: &str, extract_defs: bool) -> LintReport {
        analysis::lint(code, extract_defs, |name| self.namespace.contains(name))
    }

    pub fn complete(&self, code: &str, offset: usize) -> Vec<Completion> {
        match self.interpreter() {
            Some(interp) => self.completer.complete(&interp, &self.namespace, code, offset),
            None => Vec::new(),
        }
    }

    pub fn inspect(&self, code: &str, offset: usize) -> Option<InspectInfo> {
        let interp = self.interpreter()?;
        analysis::inspect(&interp, &self.namespace, code, offset, self.config.max_doc_chars)
    }

    fn set_unit_state(&self, tag: &ContextTag, state: UnitState) {
        let mut units = self.units.borrow_mut();
        match units.get_mut(&tag.unit) {
            Some(entry) if entry.0 > tag.epoch => {}
            Some(entry) => *entry = (tag.epoch, state),
            None => {
                units.insert(tag.unit.clone(), (tag.epoch, state));
            }
        }
    }
}

impl fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sandbox")
            .field("status", &self.status.get())
            .field("in_flight", &self.in_flight.get())
            .field("widgets", &self.widgets.len())
            .finish_non_exhaustive()
    }
}
