//! The guest interpreter.
//!
//! An async tree-walking evaluator over [`crate::lang::ast`]. Guest code
//! runs on a single thread; values are `Rc`/`RefCell` and suspension
//! happens only at guest `await` points, so several execution units can be
//! parked inside one interpreter at the same time.
//!
//! # Module Structure
//!
//! - `value` - guest values, dicts, iteration state
//! - `object` - functions, classes, modules, natives, coroutines
//! - `scope` - namespaces, local scopes and frames
//! - `exception` - guest exceptions and tracebacks
//! - `eval` - statement and expression evaluation
//! - `ops` - operators, conversions, attribute access, iteration
//! - `format` - `format()` specs, `str.format` and `%` formatting
//! - `builtins` / `methods` - built-in functions and container methods
//! - `modules` - built-in importable modules
//! - `tasks` - the task set guest `asyncio` tasks run on

mod builtins;
mod eval;
mod exception;
mod format;
mod methods;
mod modules;
mod object;
mod ops;
mod scope;
mod tasks;
mod value;

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rustc_hash::FxHashMap;

pub use builtins::names as builtin_names;
pub use exception::{
    CodeInfo, EvalResult, ExcKind, ExceptionObj, FrameOrigin, TraceFrame, Unwind, format_traceback,
};
pub use modules::{MODULE_NAMES, json, ui};
pub use object::{
    Args, BoundMethod, Class, Coroutine, Function, Instance, ModuleObj, NativeCall, NativeFunction,
    Task,
};
pub use scope::{Env, Namespace};
pub use tasks::TaskSet;
pub use value::{BuiltinType, Dict, IterState, RangeValue, Value, format_float, values_equal};

use crate::lang::ast::Module;
use crate::sandbox::protocol::StreamKind;
use crate::sandbox::widgets::WidgetRegistry;

/// Guest exception value.
pub type Exception = Rc<ExceptionObj>;

/// Default maximum depth of nested guest calls.
pub const DEFAULT_RECURSION_LIMIT: usize = 300;

/// Maximum nesting of evaluator frames (blocks, expressions and calls
/// together) in one task, whatever the call limit is set to.
pub const MAX_EVAL_DEPTH: usize = 3000;

/// Native stack size for threads that evaluate guest code.
///
/// Evaluation recurses on the native stack, at most [`MAX_EVAL_DEPTH`]
/// frames deep. Threads with the platform default stack overflow well
/// before that.
pub const EVAL_STACK_SIZE: usize = 512 * 1024 * 1024;

#[derive(Default)]
struct Depth {
    calls: Cell<usize>,
    nesting: Cell<usize>,
}

tokio::task_local! {
    /// Guest call depth and evaluator nesting of the current task.
    static DEPTH: Depth;
}

/// Run a future with its own guest depth counters.
///
/// Every top-level execution and every spawned guest task gets one, so a
/// deep recursion in one unit does not count against another.
pub async fn with_call_depth<F: std::future::Future>(fut: F) -> F::Output {
    DEPTH.scope(Depth::default(), fut).await
}

type Counter = fn(&Depth) -> &Cell<usize>;

/// Depth counter held for the duration of one guest call or one evaluator
/// frame.
pub(crate) struct DepthGuard {
    counter: Option<Counter>,
}

impl DepthGuard {
    /// Count one guest call against `limit`.
    pub(crate) fn enter(limit: usize) -> EvalResult<Self> {
        Self::bump(|depth| &depth.calls, limit)
    }

    /// Count one level of evaluator recursion.
    pub(crate) fn nest() -> EvalResult<Self> {
        Self::bump(|depth| &depth.nesting, MAX_EVAL_DEPTH)
    }

    fn bump(counter: Counter, limit: usize) -> EvalResult<Self> {
        let entered = DEPTH.try_with(|depth| {
            let cell = counter(depth);
            if cell.get() >= limit {
                false
            } else {
                cell.set(cell.get() + 1);
                true
            }
        });
        match entered {
            Ok(true) => Ok(Self {
                counter: Some(counter),
            }),
            Ok(false) => Err(Unwind::new(
                ExcKind::RecursionError,
                "maximum recursion depth exceeded",
            )),
            Err(_) => Ok(Self { counter: None }),
        }
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        if let Some(counter) = self.counter {
            let _ = DEPTH.try_with(|depth| {
                let cell = counter(depth);
                cell.set(cell.get().saturating_sub(1));
            });
        }
    }
}

/// Cooperative abort flag shared between a sandbox and its controller.
///
/// The evaluator checks it at every statement and loop iteration; once set,
/// evaluation unwinds with [`Unwind::Abort`], which guest `try` cannot catch.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    aborted: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Relaxed)
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Relaxed);
    }
}

/// Destination for guest writes to `sys.stdout` / `sys.stderr` / `print`.
pub trait OutputSink {
    fn write(&self, stream: StreamKind, text: &str);
}

/// Sink that discards everything.
pub struct NullSink;

impl OutputSink for NullSink {
    fn write(&self, _stream: StreamKind, _text: &str) {}
}

/// One guest interpreter instance.
pub struct Interpreter {
    builtins: Namespace,
    modules: RefCell<FxHashMap<String, Value>>,
    output: Rc<dyn OutputSink>,
    widgets: Rc<WidgetRegistry>,
    abort: AbortHandle,
    recursion_limit: usize,
    tasks: Rc<TaskSet>,
    /// Identities of containers currently being rendered by `repr`.
    repr_active: RefCell<Vec<usize>>,
}

impl Interpreter {
    pub fn new(
        output: Rc<dyn OutputSink>,
        widgets: Rc<WidgetRegistry>,
        abort: AbortHandle,
        recursion_limit: usize,
    ) -> Rc<Self> {
        Self::with_tasks(output, widgets, abort, recursion_limit, Rc::new(TaskSet::new()))
    }

    /// An interpreter whose guest tasks run on `tasks`.
    pub fn with_tasks(
        output: Rc<dyn OutputSink>,
        widgets: Rc<WidgetRegistry>,
        abort: AbortHandle,
        recursion_limit: usize,
        tasks: Rc<TaskSet>,
    ) -> Rc<Self> {
        Rc::new(Self {
            builtins: builtins::namespace(),
            modules: RefCell::new(FxHashMap::default()),
            output,
            widgets,
            abort,
            recursion_limit,
            tasks,
            repr_active: RefCell::new(Vec::new()),
        })
    }

    pub fn builtins(&self) -> &Namespace {
        &self.builtins
    }

    pub fn widgets(&self) -> &Rc<WidgetRegistry> {
        &self.widgets
    }

    pub fn tasks(&self) -> &Rc<TaskSet> {
        &self.tasks
    }

    pub fn write(&self, stream: StreamKind, text: &str) {
        self.output.write(stream, text);
    }

    pub(crate) fn check_abort(&self) -> EvalResult<()> {
        if self.abort.is_aborted() {
            Err(Unwind::Abort)
        } else {
            Ok(())
        }
    }

    /// Execute a parsed module against `globals`.
    ///
    /// Returns the value of the final statement when it is an expression
    /// statement, `None` otherwise.
    pub async fn exec_module(
        self: &Rc<Self>,
        module: &Module,
        code: Rc<CodeInfo>,
        globals: &Namespace,
    ) -> EvalResult<Value> {
        let env = Env::module(globals.clone(), code.clone());
        let result = self.exec_module_body(module, &env).await;
        if let Err(Unwind::Raise(exc)) = &result {
            exc.push_frame(code, env.frame.line.get());
        }
        result
    }

    /// Import a built-in module by dotted name, caching the module object.
    pub fn import_module(self: &Rc<Self>, name: &str) -> EvalResult<Value> {
        if let Some(module) = self.modules.borrow().get(name) {
            return Ok(module.clone());
        }
        let module = modules::load(self, name).ok_or_else(|| {
            Unwind::new(
                ExcKind::ModuleNotFoundError,
                format!("No module named '{name}'"),
            )
        })?;
        self.modules
            .borrow_mut()
            .insert(name.to_string(), module.clone());
        Ok(module)
    }

    /// A module that has already been imported (or registered by bootstrap).
    pub fn loaded_module(&self, name: &str) -> Option<Value> {
        self.modules.borrow().get(name).cloned()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Helpers for interpreter unit tests.

    use std::rc::Rc;

    use super::*;
    use crate::lang::parse_module;

    /// Captures output per stream.
    #[derive(Default)]
    pub struct CaptureSink {
        pub out: RefCell<String>,
        pub err: RefCell<String>,
    }

    impl OutputSink for CaptureSink {
        fn write(&self, stream: StreamKind, text: &str) {
            match stream {
                StreamKind::Out => self.out.borrow_mut().push_str(text),
                StreamKind::Err => self.err.borrow_mut().push_str(text),
            }
        }
    }

    pub fn interpreter() -> (Rc<Interpreter>, Rc<CaptureSink>) {
        let sink = Rc::new(CaptureSink::default());
        let widgets = Rc::new(WidgetRegistry::new());
        let interp = Interpreter::new(
            sink.clone(),
            widgets,
            AbortHandle::new(),
            DEFAULT_RECURSION_LIMIT,
        );
        (interp, sink)
    }

    /// Run `source` in a fresh namespace; returns the final expression value.
    pub async fn run(interp: &Rc<Interpreter>, ns: &Namespace, source: &str) -> EvalResult<Value> {
        let module = parse_module(source).map_err(|e| Unwind::new(ExcKind::SyntaxError, e.message))?;
        let code = CodeInfo::module("<test>", source, FrameOrigin::Guest);
        with_call_depth(interp.exec_module(&module, code, ns)).await
    }

    /// Run and render the final value with `repr`.
    pub async fn eval_repr(source: &str) -> String {
        let (interp, _) = interpreter();
        let ns = Namespace::new();
        match run(&interp, &ns, source).await {
            Ok(value) => match interp.repr(&value).await {
                Ok(s) => s,
                Err(_) => "<repr failed>".into(),
            },
            Err(Unwind::Raise(exc)) => format!("!{}", exc.type_name()),
            Err(Unwind::Abort) => "!abort".into(),
        }
    }
}
