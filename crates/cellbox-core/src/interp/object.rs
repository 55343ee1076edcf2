//! Callable and object types: functions, classes, instances, modules,
//! natives, coroutines and tasks.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use futures::future::{LocalBoxFuture, Shared};
use indexmap::IndexMap;

use super::Interpreter;
use super::exception::{CodeInfo, EvalResult, ExcKind, Unwind};
use super::scope::{Namespace, Scope};
use super::value::Value;
use crate::lang::ast::{FunctionDef, Lambda, Params};

/// Call arguments after `*`/`**` expansion.
#[derive(Debug, Default, Clone)]
pub struct Args {
    pub positional: Vec<Value>,
    pub keywords: IndexMap<String, Value>,
}

impl Args {
    pub fn new(positional: Vec<Value>) -> Self {
        Self {
            positional,
            keywords: IndexMap::new(),
        }
    }

    pub fn with_keyword(mut self, name: &str, value: Value) -> Self {
        self.keywords.insert(name.to_string(), value);
        self
    }

    pub fn len(&self) -> usize {
        self.positional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keywords.is_empty()
    }

    /// Reject keyword arguments for natives that take none.
    pub fn no_keywords(&self, func: &str) -> EvalResult<()> {
        match self.keywords.keys().next() {
            Some(name) => Err(Unwind::type_error(format!(
                "{func}() got an unexpected keyword argument '{name}'"
            ))),
            None => Ok(()),
        }
    }

    /// Require between `min` and `max` positional arguments.
    pub fn arity(&self, func: &str, min: usize, max: usize) -> EvalResult<()> {
        let n = self.positional.len();
        if n < min || n > max {
            let expected = if min == max {
                format!("exactly {min}")
            } else if n < min {
                format!("at least {min}")
            } else {
                format!("at most {max}")
            };
            let plural = if min == max && min == 1 { "" } else { "s" };
            return Err(Unwind::type_error(format!(
                "{func}() takes {expected} argument{plural} ({n} given)"
            )));
        }
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    /// Positional-or-keyword argument lookup; removes the keyword if used.
    pub fn take(&mut self, index: usize, name: &str) -> Option<Value> {
        if let Some(value) = self.keywords.shift_remove(name) {
            return Some(value);
        }
        self.positional.get(index).cloned()
    }

    /// Keyword-only argument lookup.
    pub fn take_keyword(&mut self, name: &str) -> Option<Value> {
        self.keywords.shift_remove(name)
    }
}

/// Body of a guest function.
#[derive(Debug, Clone)]
pub enum FunctionBody {
    Def(Rc<FunctionDef>),
    Lambda(Rc<Lambda>),
}

/// A guest-defined function or lambda.
pub struct Function {
    pub name: String,
    pub body: FunctionBody,
    /// Default value per positional parameter.
    pub defaults: Vec<Option<Value>>,
    /// Default value per keyword-only parameter.
    pub kw_defaults: Vec<Option<Value>>,
    /// Nearest enclosing function scope.
    pub closure: Option<Rc<Scope>>,
    pub globals: Namespace,
    pub code: Rc<CodeInfo>,
    pub attrs: RefCell<IndexMap<String, Value>>,
    /// Class whose body defined this function, for zero-argument `super()`.
    pub owner: RefCell<Option<Weak<Class>>>,
}

impl Function {
    pub fn params(&self) -> &Params {
        match &self.body {
            FunctionBody::Def(def) => &def.params,
            FunctionBody::Lambda(lambda) => &lambda.params,
        }
    }

    pub fn is_async(&self) -> bool {
        matches!(&self.body, FunctionBody::Def(def) if def.is_async)
    }

    pub fn doc(&self) -> Option<&str> {
        match &self.body {
            FunctionBody::Def(def) => def.doc.as_deref(),
            FunctionBody::Lambda(_) => None,
        }
    }

    /// `(a, b=1, *args, c, **kw)`; defaults are shown as written values.
    pub fn signature(&self) -> String {
        let params = self.params();
        let mut parts: Vec<String> = Vec::new();
        for (param, default) in params.positional.iter().zip(&self.defaults) {
            parts.push(match default {
                Some(value) => format!("{}={value:?}", param.name),
                None => param.name.clone(),
            });
        }
        if let Some(vararg) = &params.vararg {
            parts.push(format!("*{}", vararg.name));
        } else if !params.kwonly.is_empty() {
            parts.push("*".to_string());
        }
        for (param, default) in params.kwonly.iter().zip(&self.kw_defaults) {
            parts.push(match default {
                Some(value) => format!("{}={value:?}", param.name),
                None => param.name.clone(),
            });
        }
        if let Some(kwarg) = &params.kwarg {
            parts.push(format!("**{}", kwarg.name));
        }
        format!("({})", parts.join(", "))
    }
}

/// A guest class.
pub struct Class {
    pub name: String,
    /// Base classes: other guest classes or built-in exception types.
    pub bases: Vec<Value>,
    pub attrs: RefCell<IndexMap<String, Value>>,
    pub doc: Option<String>,
}

impl Class {
    /// Method resolution order: depth-first, left to right, first occurrence wins.
    pub fn mro(self: &Rc<Self>) -> Vec<Rc<Class>> {
        let mut out: Vec<Rc<Class>> = Vec::new();
        fn visit(class: &Rc<Class>, out: &mut Vec<Rc<Class>>) {
            if out.iter().any(|c| Rc::ptr_eq(c, class)) {
                return;
            }
            out.push(class.clone());
            for base in &class.bases {
                if let Value::Class(base) = base {
                    visit(base, out);
                }
            }
        }
        visit(self, &mut out);
        out
    }

    /// Attribute lookup along the MRO.
    pub fn lookup(self: &Rc<Self>, name: &str) -> Option<Value> {
        self.mro()
            .iter()
            .find_map(|class| class.attrs.borrow().get(name).cloned())
    }

    /// Built-in exception class this class derives from, if any.
    pub fn exc_kind(self: &Rc<Self>) -> Option<ExcKind> {
        self.mro().iter().find_map(|class| {
            class.bases.iter().find_map(|base| match base {
                Value::ExcType(kind) => Some(*kind),
                _ => None,
            })
        })
    }

    pub fn is_subclass_of(self: &Rc<Self>, other: &Rc<Class>) -> bool {
        self.mro().iter().any(|class| Rc::ptr_eq(class, other))
    }

    /// All attribute names visible on the class, including inherited ones.
    pub fn attr_names(self: &Rc<Self>) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for class in self.mro() {
            for name in class.attrs.borrow().keys() {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }
        names
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<class '{}'>", self.name)
    }
}

/// Instance of a guest class.
pub struct Instance {
    pub class: Rc<Class>,
    pub attrs: RefCell<IndexMap<String, Value>>,
}

/// A module object (built-in modules and the runtime prelude's additions).
pub struct ModuleObj {
    pub name: String,
    pub doc: &'static str,
    pub attrs: RefCell<IndexMap<String, Value>>,
}

impl ModuleObj {
    pub fn new(name: &str, doc: &'static str) -> Self {
        Self {
            name: name.to_string(),
            doc,
            attrs: RefCell::new(IndexMap::new()),
        }
    }

    pub fn set(&self, name: &str, value: Value) {
        self.attrs.borrow_mut().insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.attrs.borrow().get(name).cloned()
    }

    pub fn add_natives(&self, natives: &'static [NativeFunction]) {
        for native in natives {
            self.set(native.name, Value::Native(native));
        }
    }
}

pub type SyncNative = fn(&Rc<Interpreter>, Args) -> EvalResult;
pub type AsyncNative = fn(Rc<Interpreter>, Args) -> LocalBoxFuture<'static, EvalResult>;

#[derive(Clone, Copy)]
pub enum NativeCall {
    /// Runs to completion without calling back into guest code.
    Sync(SyncNative),
    /// Awaited in place; may call guest functions.
    Async(AsyncNative),
    /// Returns a coroutine object that runs when awaited (`asyncio.sleep`).
    Coroutine(AsyncNative),
}

/// A function implemented by the sandbox.
pub struct NativeFunction {
    pub name: &'static str,
    /// Parameter list, shown by inspection.
    pub signature: &'static str,
    pub doc: &'static str,
    pub call: NativeCall,
}

impl NativeFunction {
    pub const fn sync(
        name: &'static str,
        signature: &'static str,
        doc: &'static str,
        f: SyncNative,
    ) -> Self {
        Self {
            name,
            signature,
            doc,
            call: NativeCall::Sync(f),
        }
    }

    pub const fn asynchronous(
        name: &'static str,
        signature: &'static str,
        doc: &'static str,
        f: AsyncNative,
    ) -> Self {
        Self {
            name,
            signature,
            doc,
            call: NativeCall::Async(f),
        }
    }

    pub const fn coroutine(
        name: &'static str,
        signature: &'static str,
        doc: &'static str,
        f: AsyncNative,
    ) -> Self {
        Self {
            name,
            signature,
            doc,
            call: NativeCall::Coroutine(f),
        }
    }
}

/// Result of zero-argument `super()` inside a method.
pub struct SuperObj {
    /// Class whose MRO successors are searched.
    pub class: Rc<Class>,
    pub receiver: Value,
}

/// A callable bound to its receiver (`obj.method`).
pub struct BoundMethod {
    pub receiver: Value,
    pub func: Value,
}

impl BoundMethod {
    pub fn new(receiver: Value, func: Value) -> Value {
        Value::BoundMethod(Rc::new(BoundMethod { receiver, func }))
    }
}

/// An un-awaited call to an `async def` function (or an awaitable built-in).
pub struct Coroutine {
    pub name: String,
    future: RefCell<Option<LocalBoxFuture<'static, EvalResult>>>,
}

impl Coroutine {
    pub fn new(name: impl Into<String>, future: LocalBoxFuture<'static, EvalResult>) -> Value {
        Value::Coroutine(Rc::new(Coroutine {
            name: name.into(),
            future: RefCell::new(Some(future)),
        }))
    }

    /// Take the underlying future; a coroutine can only be awaited once.
    pub fn take(&self) -> EvalResult<LocalBoxFuture<'static, EvalResult>> {
        self.future.borrow_mut().take().ok_or_else(|| {
            Unwind::new(
                ExcKind::RuntimeError,
                "cannot reuse already awaited coroutine",
            )
        })
    }
}

/// A coroutine scheduled concurrently with `asyncio.create_task`.
pub struct Task {
    pub name: String,
    /// Awaitable completion, shared by every `await task`.
    pub result: Shared<LocalBoxFuture<'static, EvalResult>>,
    /// Filled by the task itself when it finishes, whether or not anyone awaits it.
    pub outcome: Rc<RefCell<Option<EvalResult>>>,
}

impl Task {
    pub fn is_done(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    pub fn outcome(&self) -> Option<EvalResult> {
        self.outcome.borrow().clone()
    }
}
