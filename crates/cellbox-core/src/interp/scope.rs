//! Name resolution: the shared namespace, local scopes and frames.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use indexmap::IndexMap;

use super::exception::{CodeInfo, ExceptionObj};
use super::object::Function;
use super::value::Value;
use crate::lang::ast::FunctionDef;

/// A module-level namespace.
///
/// Cloning shares the underlying map: every execution unit run in a
/// sandbox holds a handle to the same one.
#[derive(Clone, Default)]
pub struct Namespace(Rc<RefCell<IndexMap<String, Value>>>);

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.0.borrow().get(name).cloned()
    }

    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.0.borrow_mut().insert(name.into(), value);
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.0.borrow_mut().shift_remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.borrow().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.0.borrow().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    /// Snapshot of the current bindings.
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.0
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn ptr_eq(&self, other: &Namespace) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Function,
    Class,
    Comprehension,
}

/// A local scope: function call, class body or comprehension.
pub struct Scope {
    pub kind: ScopeKind,
    pub vars: RefCell<IndexMap<String, Value>>,
    pub parent: Option<Rc<Scope>>,
    /// Definition carrying the `global`/`nonlocal` declarations.
    pub decls: Option<Rc<FunctionDef>>,
}

impl Scope {
    pub fn new(kind: ScopeKind, parent: Option<Rc<Scope>>, decls: Option<Rc<FunctionDef>>) -> Rc<Self> {
        Rc::new(Self {
            kind,
            vars: RefCell::new(IndexMap::new()),
            parent,
            decls,
        })
    }

    pub fn declares_global(&self, name: &str) -> bool {
        self.decls
            .as_ref()
            .is_some_and(|d| d.globals.iter().any(|g| g == name))
    }

    pub fn declares_nonlocal(&self, name: &str) -> bool {
        self.decls
            .as_ref()
            .is_some_and(|d| d.nonlocals.iter().any(|g| g == name))
    }

    pub fn get_local(&self, name: &str) -> Option<Value> {
        self.vars.borrow().get(name).cloned()
    }

    pub fn set_local(&self, name: impl Into<String>, value: Value) {
        self.vars.borrow_mut().insert(name.into(), value);
    }

    /// Resolve a name through this scope and its enclosing function
    /// scopes. Class scopes are only visible from their own body.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if self.declares_global(name) {
            return None;
        }
        if let Some(value) = self.get_local(name) {
            return Some(value);
        }
        let mut current = self.parent.clone();
        while let Some(scope) = current {
            if scope.kind != ScopeKind::Class {
                if scope.declares_global(name) {
                    return None;
                }
                if let Some(value) = scope.get_local(name) {
                    return Some(value);
                }
            }
            current = scope.parent.clone();
        }
        None
    }

    /// Enclosing function scope that binds `name`, for `nonlocal`.
    pub fn enclosing_binding(&self, name: &str) -> Option<Rc<Scope>> {
        let mut current = self.parent.clone();
        while let Some(scope) = current {
            if scope.kind != ScopeKind::Class && scope.vars.borrow().contains_key(name) {
                return Some(scope);
            }
            current = scope.parent.clone();
        }
        None
    }
}

/// Per-call bookkeeping used for tracebacks and bare `raise`.
pub struct FrameInfo {
    pub code: Rc<CodeInfo>,
    /// Line of the statement currently executing.
    pub line: Cell<u32>,
    /// Exceptions being handled by enclosing `except` blocks, innermost last.
    pub handling: RefCell<Vec<Rc<ExceptionObj>>>,
    /// Function executing in this frame, if any.
    pub function: Option<Rc<Function>>,
}

impl FrameInfo {
    pub fn new(code: Rc<CodeInfo>, function: Option<Rc<Function>>) -> Rc<Self> {
        Rc::new(Self {
            code,
            line: Cell::new(0),
            handling: RefCell::new(Vec::new()),
            function,
        })
    }
}

/// Evaluation environment.
#[derive(Clone)]
pub struct Env {
    pub globals: Namespace,
    /// Innermost local scope; `None` at module level.
    pub scope: Option<Rc<Scope>>,
    pub frame: Rc<FrameInfo>,
}

impl Env {
    pub fn module(globals: Namespace, code: Rc<CodeInfo>) -> Self {
        Self {
            globals,
            scope: None,
            frame: FrameInfo::new(code, None),
        }
    }

    /// Same frame, nested scope.
    pub fn with_scope(&self, scope: Rc<Scope>) -> Self {
        Self {
            globals: self.globals.clone(),
            scope: Some(scope),
            frame: self.frame.clone(),
        }
    }

    /// Scope captured by functions defined here: the nearest non-class scope.
    pub fn closure_scope(&self) -> Option<Rc<Scope>> {
        let mut current = self.scope.clone();
        while let Some(scope) = current {
            if scope.kind != ScopeKind::Class {
                return Some(scope);
            }
            current = scope.parent.clone();
        }
        None
    }

    /// Scope an assignment expression (`:=`) binds into.
    pub fn walrus_scope(&self) -> Option<Rc<Scope>> {
        let mut current = self.scope.clone();
        while let Some(scope) = current {
            if scope.kind != ScopeKind::Comprehension {
                return Some(scope);
            }
            current = scope.parent.clone();
        }
        None
    }
}
