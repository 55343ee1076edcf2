//! Statement and expression evaluation.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use futures::future::LocalBoxFuture;

use super::exception::{EvalResult, ExcKind, ExceptionObj, Unwind};
use super::object::{Args, Class, Coroutine, Function, FunctionBody, Instance, SuperObj};
use super::scope::{Env, FrameInfo, Scope, ScopeKind};
use super::value::{BuiltinType, Dict, Value};
use super::{DepthGuard, Interpreter, builtins};
use crate::lang::ast::*;

/// How a statement finished.
pub(crate) enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

/// Element expressions of a comprehension.
#[derive(Clone, Copy)]
enum CompElt<'e> {
    List(&'e Expr),
    Dict(&'e Expr, &'e Expr),
}

impl Interpreter {
    pub(super) async fn exec_module_body(self: &Rc<Self>, module: &Module, env: &Env) -> EvalResult<Value> {
        let Some((last, init)) = module.body.split_last() else {
            return Ok(Value::None);
        };
        for stmt in init {
            if let Flow::Return(_) = self.exec_stmt(stmt, env).await? {
                return Ok(Value::None);
            }
        }
        if let StmtKind::Expr(expr) = &last.kind {
            self.enter_stmt(last, env)?;
            return self.eval(expr, env).await;
        }
        self.exec_stmt(last, env).await?;
        Ok(Value::None)
    }

    fn enter_stmt(&self, stmt: &Stmt, env: &Env) -> EvalResult<()> {
        env.frame.line.set(stmt.pos.line);
        self.check_abort()
    }

    pub(crate) fn exec_block<'a>(
        self: &'a Rc<Self>,
        body: &'a [Stmt],
        env: &'a Env,
    ) -> LocalBoxFuture<'a, EvalResult<Flow>> {
        Box::pin(async move {
            let _nest = DepthGuard::nest()?;
            for stmt in body {
                match self.exec_stmt(stmt, env).await? {
                    Flow::Normal => {}
                    flow => return Ok(flow),
                }
            }
            Ok(Flow::Normal)
        })
    }

    async fn exec_stmt(self: &Rc<Self>, stmt: &Stmt, env: &Env) -> EvalResult<Flow> {
        self.enter_stmt(stmt, env)?;
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr, env).await?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value, env).await?;
                for target in targets {
                    self.assign(target, value.clone(), env).await?;
                }
            }
            StmtKind::AugAssign { target, op, value } => {
                self.aug_assign(target, *op, value, env).await?;
            }
            StmtKind::AnnAssign { target, value, .. } => {
                if let Some(value) = value {
                    let value = self.eval(value, env).await?;
                    self.assign(target, value, env).await?;
                }
            }
            StmtKind::If { test, body, orelse } => {
                let cond = self.eval(test, env).await?;
                let branch = if self.truthy(&cond).await? { body } else { orelse };
                return self.exec_block(branch, env).await;
            }
            StmtKind::While { test, body, orelse } => loop {
                self.check_abort()?;
                let cond = self.eval(test, env).await?;
                if !self.truthy(&cond).await? {
                    return self.exec_block(orelse, env).await;
                }
                match self.exec_block(body, env).await? {
                    Flow::Break => break,
                    Flow::Return(value) => return Ok(Flow::Return(value)),
                    Flow::Normal | Flow::Continue => {}
                }
            },
            StmtKind::For { target, iter, body, orelse } => {
                let iterable = self.eval(iter, env).await?;
                let iterator = self.iterate(&iterable).await?;
                loop {
                    self.check_abort()?;
                    let Some(item) = self.next_item(&iterator).await? else {
                        return self.exec_block(orelse, env).await;
                    };
                    self.assign(target, item, env).await?;
                    match self.exec_block(body, env).await? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            StmtKind::FunctionDef(def) => {
                let func = self.make_function(def, env).await?;
                self.store_name(&def.name, func, env);
            }
            StmtKind::ClassDef(def) => self.exec_class_def(def, env).await?,
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, env).await?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Pass | StmtKind::Global(_) | StmtKind::Nonlocal(_) => {}
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Import(aliases) => {
                for alias in aliases {
                    let module = self.import_module(&alias.name)?;
                    match &alias.asname {
                        Some(asname) => self.store_name(asname, module, env),
                        None => {
                            let head = alias.bound_name();
                            let top = self.import_module(head)?;
                            self.store_name(head, top, env);
                        }
                    }
                }
            }
            StmtKind::ImportFrom { module, names } => {
                let module_value = self.import_module(module)?;
                for alias in names {
                    if alias.name == "*" {
                        for (name, value) in self.public_members(&module_value) {
                            self.store_name(&name, value, env);
                        }
                        continue;
                    }
                    let value = self.get_attr(&module_value, &alias.name).map_err(|_| {
                        Unwind::new(
                            ExcKind::ImportError,
                            format!("cannot import name '{}' from '{module}'", alias.name),
                        )
                    })?;
                    self.store_name(alias.bound_name(), value, env);
                }
            }
            StmtKind::Try { body, handlers, orelse, finalbody } => {
                return self.exec_try(body, handlers, orelse, finalbody, env).await;
            }
            StmtKind::Raise { exc, cause } => {
                return Err(self.raise_stmt(exc.as_ref(), cause.as_ref(), env).await);
            }
            StmtKind::With { items, body } => return self.exec_with(items, body, env).await,
            StmtKind::Delete(targets) => {
                for target in targets {
                    self.delete(target, env).await?;
                }
            }
            StmtKind::Assert { test, msg } => {
                let cond = self.eval(test, env).await?;
                if !self.truthy(&cond).await? {
                    let args = match msg {
                        Some(msg) => vec![self.eval(msg, env).await?],
                        None => Vec::new(),
                    };
                    return Err(Unwind::Raise(ExceptionObj::new(
                        ExcKind::AssertionError,
                        None,
                        args,
                    )));
                }
            }
        }
        Ok(Flow::Normal)
    }

    async fn exec_try(
        self: &Rc<Self>,
        body: &[Stmt],
        handlers: &[ExceptHandler],
        orelse: &[Stmt],
        finalbody: &[Stmt],
        env: &Env,
    ) -> EvalResult<Flow> {
        let result = match self.exec_block(body, env).await {
            Err(Unwind::Raise(exc)) if !handlers.is_empty() => {
                self.handle_exception(exc, handlers, env).await
            }
            Ok(Flow::Normal) => self.exec_block(orelse, env).await,
            other => other,
        };
        if !finalbody.is_empty() {
            match self.exec_block(finalbody, env).await? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        result
    }

    async fn handle_exception(
        self: &Rc<Self>,
        exc: Rc<ExceptionObj>,
        handlers: &[ExceptHandler],
        env: &Env,
    ) -> EvalResult<Flow> {
        for handler in handlers {
            let matched = match &handler.kind {
                None => true,
                Some(kind) => {
                    let class = self.eval(kind, env).await?;
                    check_exception_class(&class)?;
                    exc.matches(&class)
                }
            };
            if !matched {
                continue;
            }
            env.frame.line.set(handler.pos.line);
            if let Some(name) = &handler.name {
                self.store_name(name, Value::Exception(exc.clone()), env);
            }
            env.frame.handling.borrow_mut().push(exc.clone());
            let result = self.exec_block(&handler.body, env).await;
            env.frame.handling.borrow_mut().pop();
            if let Some(name) = &handler.name {
                self.unbind_name(name, env);
            }
            return result;
        }
        Err(Unwind::Raise(exc))
    }

    async fn raise_stmt(self: &Rc<Self>, exc: Option<&Expr>, cause: Option<&Expr>, env: &Env) -> Unwind {
        let Some(exc) = exc else {
            let active = env.frame.handling.borrow().last().cloned();
            return match active {
                Some(exc) => Unwind::Raise(exc),
                None => Unwind::new(ExcKind::RuntimeError, "No active exception to reraise"),
            };
        };
        let raised: EvalResult<Rc<ExceptionObj>> = async {
            let value = self.eval(exc, env).await?;
            let exc = self.to_exception(value).await?;
            if let Some(cause) = cause {
                let cause = self.eval(cause, env).await?;
                *exc.cause.borrow_mut() = (!cause.is_none()).then_some(cause);
            }
            Ok(exc)
        }
        .await;
        match raised {
            Ok(exc) => Unwind::Raise(exc),
            Err(unwind) => unwind,
        }
    }

    /// Turn a raised value into an exception object.
    pub(crate) async fn to_exception(self: &Rc<Self>, value: Value) -> EvalResult<Rc<ExceptionObj>> {
        match value {
            Value::Exception(exc) => Ok(exc),
            Value::ExcType(kind) => Ok(ExceptionObj::new(kind, None, Vec::new())),
            Value::Class(ref class) if class.exc_kind().is_some() => {
                match self.call(&value, Args::default()).await? {
                    Value::Exception(exc) => Ok(exc),
                    _ => Err(Unwind::type_error("exceptions must derive from BaseException")),
                }
            }
            _ => Err(Unwind::type_error("exceptions must derive from BaseException")),
        }
    }

    fn exec_with<'a>(
        self: &'a Rc<Self>,
        items: &'a [WithItem],
        body: &'a [Stmt],
        env: &'a Env,
    ) -> LocalBoxFuture<'a, EvalResult<Flow>> {
        Box::pin(async move {
            let Some((item, rest)) = items.split_first() else {
                return self.exec_block(body, env).await;
            };
            let manager = self.eval(&item.context, env).await?;
            let protocol_error = || {
                Unwind::type_error(format!(
                    "'{}' object does not support the context manager protocol",
                    manager.type_name()
                ))
            };
            let enter = self.get_attr(&manager, "__enter__").map_err(|_| protocol_error())?;
            let exit = self.get_attr(&manager, "__exit__").map_err(|_| protocol_error())?;
            let entered = self.call(&enter, Args::default()).await?;
            if let Some(target) = &item.target {
                self.assign(target, entered, env).await?;
            }
            match self.exec_with(rest, body, env).await {
                Err(Unwind::Raise(exc)) => {
                    let args = Args::new(vec![
                        exception_class(&exc),
                        Value::Exception(exc.clone()),
                        Value::None,
                    ]);
                    let suppress = self.call(&exit, args).await?;
                    if self.truthy(&suppress).await? {
                        Ok(Flow::Normal)
                    } else {
                        Err(Unwind::Raise(exc))
                    }
                }
                Err(Unwind::Abort) => Err(Unwind::Abort),
                ok => {
                    self.call(&exit, Args::new(vec![Value::None, Value::None, Value::None]))
                        .await?;
                    ok
                }
            }
        })
    }

    async fn exec_class_def(self: &Rc<Self>, def: &Rc<ClassDef>, env: &Env) -> EvalResult<()> {
        let mut decorators = Vec::with_capacity(def.decorators.len());
        for decorator in &def.decorators {
            decorators.push(self.eval(decorator, env).await?);
        }
        let mut bases = Vec::with_capacity(def.bases.len());
        for base in &def.bases {
            let value = self.eval(base, env).await?;
            match &value {
                Value::Class(_) | Value::ExcType(_) => bases.push(value),
                Value::Type(BuiltinType::Object) => {}
                other => {
                    return Err(Unwind::type_error(format!(
                        "cannot inherit from {other:?}"
                    )));
                }
            }
        }

        let scope = Scope::new(ScopeKind::Class, env.scope.clone(), None);
        let class_env = env.with_scope(scope.clone());
        self.exec_block(&def.body, &class_env).await?;
        env.frame.line.set(def.pos.line);

        let attrs = std::mem::take(&mut *scope.vars.borrow_mut());
        let class = Rc::new(Class {
            name: def.name.clone(),
            bases,
            attrs: RefCell::new(attrs),
            doc: def.doc.clone(),
        });
        for value in class.attrs.borrow().values() {
            if let Value::Function(func) = value {
                *func.owner.borrow_mut() = Some(Rc::downgrade(&class));
            }
        }

        let mut value = Value::Class(class);
        for decorator in decorators.iter().rev() {
            value = self.call(decorator, Args::new(vec![value])).await?;
        }
        self.store_name(&def.name, value, env);
        Ok(())
    }

    async fn make_function(self: &Rc<Self>, def: &Rc<FunctionDef>, env: &Env) -> EvalResult<Value> {
        let mut decorators = Vec::with_capacity(def.decorators.len());
        for decorator in &def.decorators {
            decorators.push(self.eval(decorator, env).await?);
        }
        let (defaults, kw_defaults) = self.eval_defaults(&def.params, env).await?;
        let func = Function {
            name: def.name.clone(),
            body: FunctionBody::Def(def.clone()),
            defaults,
            kw_defaults,
            closure: env.closure_scope(),
            globals: env.globals.clone(),
            code: env.frame.code.child(&def.name),
            attrs: RefCell::default(),
            owner: RefCell::default(),
        };
        let mut value = Value::Function(Rc::new(func));
        for decorator in decorators.iter().rev() {
            value = self.call(decorator, Args::new(vec![value])).await?;
        }
        Ok(value)
    }

    async fn eval_defaults(
        self: &Rc<Self>,
        params: &Params,
        env: &Env,
    ) -> EvalResult<(Vec<Option<Value>>, Vec<Option<Value>>)> {
        let mut defaults = Vec::with_capacity(params.positional.len());
        for param in &params.positional {
            defaults.push(match &param.default {
                Some(expr) => Some(self.eval(expr, env).await?),
                None => None,
            });
        }
        let mut kw_defaults = Vec::with_capacity(params.kwonly.len());
        for param in &params.kwonly {
            kw_defaults.push(match &param.default {
                Some(expr) => Some(self.eval(expr, env).await?),
                None => None,
            });
        }
        Ok((defaults, kw_defaults))
    }

    // Names

    pub(crate) fn load_name(&self, name: &str, env: &Env) -> EvalResult {
        if let Some(value) = env.scope.as_ref().and_then(|scope| scope.lookup(name)) {
            return Ok(value);
        }
        env.globals
            .get(name)
            .or_else(|| self.builtins.get(name))
            .ok_or_else(|| Unwind::name_error(name))
    }

    pub(crate) fn store_name(&self, name: &str, value: Value, env: &Env) {
        match &env.scope {
            None => env.globals.set(name, value),
            Some(scope) if scope.declares_global(name) => env.globals.set(name, value),
            Some(scope) if scope.declares_nonlocal(name) => match scope.enclosing_binding(name) {
                Some(owner) => owner.set_local(name, value),
                None => scope.set_local(name, value),
            },
            Some(scope) => scope.set_local(name, value),
        }
    }

    /// Remove a binding without complaining if it is already gone.
    fn unbind_name(&self, name: &str, env: &Env) {
        match &env.scope {
            Some(scope) if !scope.declares_global(name) => {
                scope.vars.borrow_mut().shift_remove(name);
            }
            _ => {
                env.globals.remove(name);
            }
        }
    }

    fn delete_name(&self, name: &str, env: &Env) -> EvalResult<()> {
        let removed = match &env.scope {
            Some(scope) if !scope.declares_global(name) => {
                scope.vars.borrow_mut().shift_remove(name).is_some()
            }
            _ => env.globals.remove(name).is_some(),
        };
        if removed {
            Ok(())
        } else {
            Err(Unwind::name_error(name))
        }
    }

    // Assignment

    pub(crate) fn assign<'a>(
        self: &'a Rc<Self>,
        target: &'a Expr,
        value: Value,
        env: &'a Env,
    ) -> LocalBoxFuture<'a, EvalResult<()>> {
        Box::pin(async move {
            match &target.kind {
                ExprKind::Name(name) => {
                    self.store_name(name, value, env);
                    Ok(())
                }
                ExprKind::Tuple(elts) | ExprKind::List(elts) => {
                    self.assign_unpack(elts, value, env).await
                }
                ExprKind::Attribute { value: obj, attr } => {
                    let obj = self.eval(obj, env).await?;
                    self.set_attr(&obj, attr, value)
                }
                ExprKind::Subscript { value: obj, index } => {
                    let obj = self.eval(obj, env).await?;
                    if let ExprKind::Slice { lower, upper, step } = &index.kind {
                        let bounds = self.slice_bounds(lower, upper, step, env).await?;
                        return self.set_slice(&obj, bounds, value).await;
                    }
                    let index = self.eval(index, env).await?;
                    self.set_item(&obj, index, value).await
                }
                ExprKind::Starred(_) => Err(Unwind::new(
                    ExcKind::SyntaxError,
                    "starred assignment target must be in a list or tuple",
                )),
                _ => Err(Unwind::new(ExcKind::SyntaxError, "cannot assign to expression")),
            }
        })
    }

    async fn assign_unpack(self: &Rc<Self>, elts: &[Expr], value: Value, env: &Env) -> EvalResult<()> {
        let mut items = self.collect(&value).await?;
        let star = elts
            .iter()
            .position(|e| matches!(e.kind, ExprKind::Starred(_)));
        let Some(star) = star else {
            if items.len() != elts.len() {
                return Err(Unwind::value_error(if items.len() > elts.len() {
                    format!("too many values to unpack (expected {})", elts.len())
                } else {
                    format!(
                        "not enough values to unpack (expected {}, got {})",
                        elts.len(),
                        items.len()
                    )
                }));
            }
            for (elt, item) in elts.iter().zip(items) {
                self.assign(elt, item, env).await?;
            }
            return Ok(());
        };

        let required = elts.len() - 1;
        if items.len() < required {
            return Err(Unwind::value_error(format!(
                "not enough values to unpack (expected at least {required}, got {})",
                items.len()
            )));
        }
        let after = elts.len() - star - 1;
        let tail = items.split_off(items.len() - after);
        let middle = items.split_off(star);
        for (elt, item) in elts[..star].iter().zip(items) {
            self.assign(elt, item, env).await?;
        }
        if let ExprKind::Starred(inner) = &elts[star].kind {
            self.assign(inner, Value::list(middle), env).await?;
        }
        for (elt, item) in elts[star + 1..].iter().zip(tail) {
            self.assign(elt, item, env).await?;
        }
        Ok(())
    }

    async fn aug_assign(self: &Rc<Self>, target: &Expr, op: BinOp, value: &Expr, env: &Env) -> EvalResult<()> {
        match &target.kind {
            ExprKind::Name(name) => {
                let current = self.load_name(name, env)?;
                let rhs = self.eval(value, env).await?;
                let updated = self.inplace_op(op, &current, &rhs).await?;
                self.store_name(name, updated, env);
            }
            ExprKind::Attribute { value: obj, attr } => {
                let obj = self.eval(obj, env).await?;
                let current = self.get_attr(&obj, attr)?;
                let rhs = self.eval(value, env).await?;
                let updated = self.inplace_op(op, &current, &rhs).await?;
                self.set_attr(&obj, attr, updated)?;
            }
            ExprKind::Subscript { value: obj, index } => {
                let obj = self.eval(obj, env).await?;
                let index = self.eval(index, env).await?;
                let current = self.get_item(&obj, &index).await?;
                let rhs = self.eval(value, env).await?;
                let updated = self.inplace_op(op, &current, &rhs).await?;
                self.set_item(&obj, index, updated).await?;
            }
            _ => {
                return Err(Unwind::new(
                    ExcKind::SyntaxError,
                    "illegal expression for augmented assignment",
                ));
            }
        }
        Ok(())
    }

    fn delete<'a>(self: &'a Rc<Self>, target: &'a Expr, env: &'a Env) -> LocalBoxFuture<'a, EvalResult<()>> {
        Box::pin(async move {
            match &target.kind {
                ExprKind::Name(name) => self.delete_name(name, env),
                ExprKind::Tuple(elts) | ExprKind::List(elts) => {
                    for elt in elts {
                        self.delete(elt, env).await?;
                    }
                    Ok(())
                }
                ExprKind::Attribute { value, attr } => {
                    let obj = self.eval(value, env).await?;
                    self.del_attr(&obj, attr)
                }
                ExprKind::Subscript { value, index } => {
                    let obj = self.eval(value, env).await?;
                    let index = self.eval(index, env).await?;
                    self.del_item(&obj, &index).await
                }
                _ => Err(Unwind::new(ExcKind::SyntaxError, "cannot delete expression")),
            }
        })
    }

    // Expressions

    pub(crate) fn eval<'a>(self: &'a Rc<Self>, expr: &'a Expr, env: &'a Env) -> LocalBoxFuture<'a, EvalResult> {
        Box::pin(async move {
            let _nest = DepthGuard::nest()?;
            self.eval_inner(expr, env).await
        })
    }

    async fn eval_inner(self: &Rc<Self>, expr: &Expr, env: &Env) -> EvalResult {
        match &expr.kind {
            ExprKind::Name(name) => self.load_name(name, env),
            ExprKind::Constant(constant) => Ok(constant_value(constant)),
            ExprKind::FString(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FStringPart::Literal(text) => out.push_str(text),
                        FStringPart::Expr { expr, conversion, spec } => {
                            let value = self.eval(expr, env).await?;
                            let value = match conversion {
                                Some('r') | Some('a') => Value::from(self.repr(&value).await?),
                                Some(_) => Value::from(self.to_str(&value).await?),
                                None => value,
                            };
                            let spec = spec.as_deref().unwrap_or("");
                            out.push_str(&self.format_value(&value, spec).await?);
                        }
                    }
                }
                Ok(Value::from(out))
            }
            ExprKind::List(items) => Ok(Value::list(self.eval_sequence(items, env).await?)),
            ExprKind::Tuple(items) => Ok(Value::tuple(self.eval_sequence(items, env).await?)),
            ExprKind::Dict(entries) => {
                let mut dict = Dict::new();
                for (key, value) in entries {
                    let key = self.eval(key, env).await?;
                    let value = self.eval(value, env).await?;
                    dict.insert(key, value)?;
                }
                Ok(Value::dict(dict))
            }
            ExprKind::Attribute { value, attr } => {
                let obj = self.eval(value, env).await?;
                self.get_attr(&obj, attr)
            }
            ExprKind::Subscript { value, index } => {
                let obj = self.eval(value, env).await?;
                if let ExprKind::Slice { lower, upper, step } = &index.kind {
                    let bounds = self.slice_bounds(lower, upper, step, env).await?;
                    return self.get_slice(&obj, bounds);
                }
                let index = self.eval(index, env).await?;
                self.get_item(&obj, &index).await
            }
            ExprKind::Slice { .. } => Err(Unwind::type_error("slice is only valid inside a subscript")),
            ExprKind::Call { func, args } => {
                if let ExprKind::Name(name) = &func.kind {
                    if name == "super" && args.is_empty() {
                        return self.make_super(env);
                    }
                }
                let callee = self.eval(func, env).await?;
                let args = self.eval_args(args, env).await?;
                self.call(&callee, args).await
            }
            ExprKind::BinOp { left, op, right } => {
                let left = self.eval(left, env).await?;
                let right = self.eval(right, env).await?;
                self.binary_op(*op, &left, &right).await
            }
            ExprKind::UnaryOp { op, operand } => {
                let value = self.eval(operand, env).await?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!self.truthy(&value).await?)),
                    _ => self.unary_op(*op, &value).await,
                }
            }
            ExprKind::BoolOp { op, values } => {
                let mut last = Value::None;
                for value in values {
                    last = self.eval(value, env).await?;
                    let truth = self.truthy(&last).await?;
                    match op {
                        BoolOp::And if !truth => return Ok(last),
                        BoolOp::Or if truth => return Ok(last),
                        _ => {}
                    }
                }
                Ok(last)
            }
            ExprKind::Compare { left, ops } => {
                let mut lhs = self.eval(left, env).await?;
                for (op, right) in ops {
                    let rhs = self.eval(right, env).await?;
                    if !self.compare(*op, &lhs, &rhs).await? {
                        return Ok(Value::Bool(false));
                    }
                    lhs = rhs;
                }
                Ok(Value::Bool(true))
            }
            ExprKind::IfExp { test, body, orelse } => {
                let cond = self.eval(test, env).await?;
                if self.truthy(&cond).await? {
                    self.eval(body, env).await
                } else {
                    self.eval(orelse, env).await
                }
            }
            ExprKind::Lambda(lambda) => {
                let (defaults, kw_defaults) = self.eval_defaults(&lambda.params, env).await?;
                Ok(Value::Function(Rc::new(Function {
                    name: "<lambda>".to_string(),
                    body: FunctionBody::Lambda(lambda.clone()),
                    defaults,
                    kw_defaults,
                    closure: env.closure_scope(),
                    globals: env.globals.clone(),
                    code: env.frame.code.child("<lambda>"),
                    attrs: RefCell::default(),
                    owner: RefCell::default(),
                })))
            }
            ExprKind::NamedExpr { name, value } => {
                let value = self.eval(value, env).await?;
                let target = Env {
                    globals: env.globals.clone(),
                    scope: env.walrus_scope(),
                    frame: env.frame.clone(),
                };
                self.store_name(name, value.clone(), &target);
                Ok(value)
            }
            ExprKind::Await(inner) => {
                let value = self.eval(inner, env).await?;
                self.await_value(value).await
            }
            ExprKind::Starred(_) => Err(Unwind::new(
                ExcKind::SyntaxError,
                "can't use starred expression here",
            )),
            ExprKind::ListComp { elt, generators } => {
                let items = self
                    .run_comprehension(CompElt::List(elt), generators, env)
                    .await?;
                Ok(Value::list(items.into_iter().map(|(v, _)| v).collect()))
            }
            ExprKind::DictComp { key, value, generators } => {
                let items = self
                    .run_comprehension(CompElt::Dict(key, value), generators, env)
                    .await?;
                let mut dict = Dict::new();
                for (k, v) in items {
                    dict.insert(k, v)?;
                }
                Ok(Value::dict(dict))
            }
        }
    }

    /// Elements of a list or tuple display, expanding `*iterable`.
    async fn eval_sequence(self: &Rc<Self>, items: &[Expr], env: &Env) -> EvalResult<Vec<Value>> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match &item.kind {
                ExprKind::Starred(inner) => {
                    let value = self.eval(inner, env).await?;
                    out.extend(self.collect(&value).await?);
                }
                _ => out.push(self.eval(item, env).await?),
            }
        }
        Ok(out)
    }

    async fn eval_args(self: &Rc<Self>, args: &[Arg], env: &Env) -> EvalResult<Args> {
        let mut out = Args::default();
        for arg in args {
            match arg {
                Arg::Positional(expr) => out.positional.push(self.eval(expr, env).await?),
                Arg::Star(expr) => {
                    let value = self.eval(expr, env).await?;
                    out.positional.extend(self.collect(&value).await?);
                }
                Arg::Keyword(name, expr) => {
                    let value = self.eval(expr, env).await?;
                    if out.keywords.insert(name.clone(), value).is_some() {
                        return Err(Unwind::type_error(format!(
                            "keyword argument repeated: {name}"
                        )));
                    }
                }
                Arg::DoubleStar(expr) => {
                    let value = self.eval(expr, env).await?;
                    let Value::Dict(dict) = &value else {
                        return Err(Unwind::type_error(format!(
                            "argument after ** must be a mapping, not {}",
                            value.type_name()
                        )));
                    };
                    for (key, value) in dict.borrow().iter() {
                        let Some(key) = key.as_str() else {
                            return Err(Unwind::type_error("keywords must be strings"));
                        };
                        out.keywords.insert(key.to_string(), value.clone());
                    }
                }
            }
        }
        Ok(out)
    }

    async fn slice_bounds(
        self: &Rc<Self>,
        lower: &Option<Box<Expr>>,
        upper: &Option<Box<Expr>>,
        step: &Option<Box<Expr>>,
        env: &Env,
    ) -> EvalResult<[Option<i64>; 3]> {
        let mut out = [None; 3];
        for (slot, part) in out.iter_mut().zip([lower, upper, step]) {
            if let Some(expr) = part {
                let value = self.eval(expr, env).await?;
                *slot = match value {
                    Value::None => None,
                    other => Some(other.as_int().ok_or_else(|| {
                        Unwind::type_error(
                            "slice indices must be integers or None or have an __index__ method",
                        )
                    })?),
                };
            }
        }
        Ok(out)
    }

    async fn run_comprehension(
        self: &Rc<Self>,
        elt: CompElt<'_>,
        generators: &[Comprehension],
        env: &Env,
    ) -> EvalResult<Vec<(Value, Value)>> {
        let scope = Scope::new(ScopeKind::Comprehension, env.scope.clone(), None);
        let comp_env = env.with_scope(scope);
        let mut out = Vec::new();
        self.comprehension(generators, elt, Some(env), &comp_env, &mut out)
            .await?;
        Ok(out)
    }

    /// One `for` clause of a comprehension; recurses into the next one.
    /// The first iterable is evaluated in the enclosing scope.
    fn comprehension<'a>(
        self: &'a Rc<Self>,
        generators: &'a [Comprehension],
        elt: CompElt<'a>,
        outer: Option<&'a Env>,
        env: &'a Env,
        out: &'a mut Vec<(Value, Value)>,
    ) -> LocalBoxFuture<'a, EvalResult<()>> {
        Box::pin(async move {
            let Some((first, rest)) = generators.split_first() else {
                match elt {
                    CompElt::List(expr) => {
                        let value = self.eval(expr, env).await?;
                        out.push((value, Value::None));
                    }
                    CompElt::Dict(key, value) => {
                        let key = self.eval(key, env).await?;
                        let value = self.eval(value, env).await?;
                        out.push((key, value));
                    }
                }
                return Ok(());
            };
            let iterable = self.eval(&first.iter, outer.unwrap_or(env)).await?;
            let iterator = self.iterate(&iterable).await?;
            'items: while let Some(item) = self.next_item(&iterator).await? {
                self.check_abort()?;
                self.assign(&first.target, item, env).await?;
                for cond in &first.ifs {
                    let keep = self.eval(cond, env).await?;
                    if !self.truthy(&keep).await? {
                        continue 'items;
                    }
                }
                self.comprehension(rest, elt, None, env, out).await?;
            }
            Ok(())
        })
    }

    /// `await value`.
    pub(crate) async fn await_value(self: &Rc<Self>, value: Value) -> EvalResult {
        match value {
            Value::Coroutine(coroutine) => coroutine.take()?.await,
            Value::Task(task) => task.result.clone().await,
            other => Err(Unwind::type_error(format!(
                "object {} can't be used in 'await' expression",
                other.type_name()
            ))),
        }
    }

    fn make_super(&self, env: &Env) -> EvalResult {
        let no_args = || Unwind::new(ExcKind::RuntimeError, "super(): no arguments");
        let func = env.frame.function.as_ref().ok_or_else(no_args)?;
        let class = func
            .owner
            .borrow()
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or_else(|| Unwind::new(ExcKind::RuntimeError, "super(): __class__ cell not found"))?;
        let first = func.params().positional.first().ok_or_else(no_args)?;
        let receiver = env
            .scope
            .as_ref()
            .and_then(|scope| scope.lookup(&first.name))
            .ok_or_else(no_args)?;
        Ok(Value::Super(Rc::new(SuperObj { class, receiver })))
    }

    // Calls

    /// Call any callable guest value.
    pub fn call<'a>(self: &'a Rc<Self>, func: &'a Value, args: Args) -> LocalBoxFuture<'a, EvalResult> {
        Box::pin(async move {
            let _nest = DepthGuard::nest()?;
            match func {
                Value::Function(f) => self.call_function(f.clone(), args).await,
                Value::Native(native) => match native.call {
                    super::NativeCall::Sync(f) => f(self, args),
                    super::NativeCall::Async(f) => f(self.clone(), args).await,
                    super::NativeCall::Coroutine(f) => {
                        Ok(Coroutine::new(native.name, f(self.clone(), args)))
                    }
                },
                Value::BoundMethod(method) => {
                    let mut args = args;
                    args.positional.insert(0, method.receiver.clone());
                    self.call(&method.func, args).await
                }
                Value::Class(class) => self.instantiate(class, args).await,
                Value::Type(ty) => builtins::construct(self, *ty, args).await,
                Value::ExcType(kind) => {
                    args.no_keywords(kind.name())?;
                    Ok(Value::Exception(ExceptionObj::new(*kind, None, args.positional)))
                }
                Value::Instance(instance) => match instance.class.lookup("__call__") {
                    Some(method) => {
                        let mut args = args;
                        args.positional.insert(0, func.clone());
                        self.call(&method, args).await
                    }
                    None => Err(not_callable(func)),
                },
                other => Err(not_callable(other)),
            }
        })
    }

    /// Call a guest function. `async def` functions bind their arguments
    /// immediately and return a coroutine that runs the body when awaited.
    pub(crate) async fn call_function(self: &Rc<Self>, func: Rc<Function>, args: Args) -> EvalResult {
        let decls = match &func.body {
            FunctionBody::Def(def) => Some(def.clone()),
            FunctionBody::Lambda(_) => None,
        };
        let scope = Scope::new(ScopeKind::Function, func.closure.clone(), decls);
        bind_args(&func, args, &scope)?;
        if func.is_async() {
            let interp = self.clone();
            let name = func.name.clone();
            return Ok(Coroutine::new(
                name,
                Box::pin(async move { interp.run_frame(func, scope).await }),
            ));
        }
        self.run_frame(func, scope).await
    }

    async fn run_frame(self: &Rc<Self>, func: Rc<Function>, scope: Rc<Scope>) -> EvalResult {
        let _depth = DepthGuard::enter(self.recursion_limit)?;
        let env = Env {
            globals: func.globals.clone(),
            scope: Some(scope),
            frame: FrameInfo::new(func.code.clone(), Some(func.clone())),
        };
        let result = match &func.body {
            FunctionBody::Def(def) => {
                env.frame.line.set(def.pos.line);
                match self.exec_block(&def.body, &env).await {
                    Ok(Flow::Return(value)) => Ok(value),
                    Ok(_) => Ok(Value::None),
                    Err(unwind) => Err(unwind),
                }
            }
            FunctionBody::Lambda(lambda) => {
                env.frame.line.set(lambda.pos.line);
                self.eval(&lambda.body, &env).await
            }
        };
        if let Err(Unwind::Raise(exc)) = &result {
            exc.push_frame(func.code.clone(), env.frame.line.get());
        }
        result
    }

    async fn instantiate(self: &Rc<Self>, class: &Rc<Class>, args: Args) -> EvalResult {
        let init = class.lookup("__init__");
        if let Some(kind) = class.exc_kind() {
            let exc = ExceptionObj::new(kind, Some(class.clone()), args.positional.clone());
            let value = Value::Exception(exc);
            if let Some(init) = init {
                let mut args = args;
                args.positional.insert(0, value.clone());
                self.call(&init, args).await?;
            } else {
                args.no_keywords(&class.name)?;
            }
            return Ok(value);
        }

        let instance = Value::Instance(Rc::new(Instance {
            class: class.clone(),
            attrs: RefCell::default(),
        }));
        match init {
            Some(init) => {
                let mut args = args;
                args.positional.insert(0, instance.clone());
                let returned = self.call(&init, args).await?;
                if !returned.is_none() {
                    return Err(Unwind::type_error(format!(
                        "__init__() should return None, not '{}'",
                        returned.type_name()
                    )));
                }
            }
            None if !args.is_empty() => {
                return Err(Unwind::type_error(format!("{}() takes no arguments", class.name)));
            }
            None => {}
        }
        Ok(instance)
    }
}

fn not_callable(value: &Value) -> Unwind {
    Unwind::type_error(format!("'{}' object is not callable", value.type_name()))
}

fn constant_value(constant: &Constant) -> Value {
    match constant {
        Constant::None => Value::None,
        Constant::Bool(b) => Value::Bool(*b),
        Constant::Int(i) => Value::Int(*i),
        Constant::Float(f) => Value::Float(*f),
        Constant::Str(s) => Value::Str(s.clone()),
    }
}

/// Class value of an exception, as passed to `__exit__`.
pub(crate) fn exception_class(exc: &ExceptionObj) -> Value {
    match &exc.class {
        Some(class) => Value::Class(class.clone()),
        None => Value::ExcType(exc.kind),
    }
}

fn check_exception_class(class: &Value) -> EvalResult<()> {
    let valid = match class {
        Value::ExcType(_) => true,
        Value::Class(class) => class.exc_kind().is_some(),
        Value::Tuple(items) => return items.iter().try_for_each(check_exception_class),
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(Unwind::type_error(
            "catching classes that do not inherit from BaseException is not allowed",
        ))
    }
}

/// `'a'`, `'a' and 'b'`, `'a', 'b' and 'c'`
fn quoted_list(names: &[String]) -> String {
    let quoted: Vec<String> = names.iter().map(|n| format!("'{n}'")).collect();
    match quoted.split_last() {
        None => String::new(),
        Some((last, [])) => last.clone(),
        Some((last, init)) => format!("{} and {last}", init.join(", ")),
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}

/// Bind call arguments to a function's parameters in `scope`.
fn bind_args(func: &Function, args: Args, scope: &Scope) -> EvalResult<()> {
    let params = func.params();
    let name = &func.name;
    let Args { positional, keywords } = args;

    let n_params = params.positional.len();
    let mut slots: Vec<Option<Value>> = vec![None; n_params];
    let mut extra = Vec::new();
    for (i, value) in positional.into_iter().enumerate() {
        match slots.get_mut(i) {
            Some(slot) => *slot = Some(value),
            None => extra.push(value),
        }
    }
    if !extra.is_empty() && params.vararg.is_none() {
        let given = n_params + extra.len();
        return Err(Unwind::type_error(format!(
            "{name}() takes {n_params} positional argument{} but {given} were given",
            plural(n_params)
        )));
    }

    let mut kwonly: Vec<Option<Value>> = vec![None; params.kwonly.len()];
    let mut extra_kw = Dict::new();
    for (key, value) in keywords {
        if let Some(i) = params.positional.iter().position(|p| p.name == key) {
            if slots[i].is_some() {
                return Err(Unwind::type_error(format!(
                    "{name}() got multiple values for argument '{key}'"
                )));
            }
            slots[i] = Some(value);
        } else if let Some(i) = params.kwonly.iter().position(|p| p.name == key) {
            kwonly[i] = Some(value);
        } else if params.kwarg.is_some() {
            extra_kw.insert_str(&key, value);
        } else {
            return Err(Unwind::type_error(format!(
                "{name}() got an unexpected keyword argument '{key}'"
            )));
        }
    }

    let mut missing = Vec::new();
    for ((param, slot), default) in params.positional.iter().zip(slots).zip(&func.defaults) {
        match slot.or_else(|| default.clone()) {
            Some(value) => scope.set_local(param.name.clone(), value),
            None => missing.push(param.name.clone()),
        }
    }
    if !missing.is_empty() {
        return Err(Unwind::type_error(format!(
            "{name}() missing {} required positional argument{}: {}",
            missing.len(),
            plural(missing.len()),
            quoted_list(&missing)
        )));
    }
    if let Some(vararg) = &params.vararg {
        scope.set_local(vararg.name.clone(), Value::tuple(extra));
    }

    for ((param, slot), default) in params.kwonly.iter().zip(kwonly).zip(&func.kw_defaults) {
        match slot.or_else(|| default.clone()) {
            Some(value) => scope.set_local(param.name.clone(), value),
            None => missing.push(param.name.clone()),
        }
    }
    if !missing.is_empty() {
        return Err(Unwind::type_error(format!(
            "{name}() missing {} required keyword-only argument{}: {}",
            missing.len(),
            plural(missing.len()),
            quoted_list(&missing)
        )));
    }
    if let Some(kwarg) = &params.kwarg {
        scope.set_local(kwarg.name.clone(), Value::dict(extra_kw));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::testing::{eval_repr, interpreter, run};
    use super::*;
    use crate::interp::Namespace;

    #[tokio::test]
    async fn test_final_expression_is_the_value() {
        assert_eq!(eval_repr("x = 2\nx * 21").await, "42");
        assert_eq!(eval_repr("x = 2").await, "None");
    }

    #[tokio::test]
    async fn test_functions_defaults_and_keywords() {
        let src = "def f(a, b=2, *rest, c, **kw):\n    return [a, b, rest, c, kw]\nf(1, c=3, d=4)";
        assert_eq!(eval_repr(src).await, "[1, 2, (), 3, {'d': 4}]");
        assert_eq!(eval_repr("def f(a):\n    return a\nf()").await, "!TypeError");
        assert_eq!(eval_repr("def f(a):\n    return a\nf(1, a=2)").await, "!TypeError");
    }

    #[tokio::test]
    async fn test_closures_and_nonlocal() {
        let src = "\
def counter():
    n = 0
    def inc():
        nonlocal n
        n += 1
        return n
    return inc
c = counter()
c()
c()
c()";
        assert_eq!(eval_repr(src).await, "3");
    }

    #[tokio::test]
    async fn test_global_declaration() {
        let src = "total = 0\ndef add(x):\n    global total\n    total += x\nadd(2)\nadd(3)\ntotal";
        assert_eq!(eval_repr(src).await, "5");
    }

    #[tokio::test]
    async fn test_destructuring() {
        assert_eq!(eval_repr("a, (b, c) = 1, (2, 3)\n[a, b, c]").await, "[1, 2, 3]");
        assert_eq!(eval_repr("a, *b, c = range(5)\n(a, b, c)").await, "(0, [1, 2, 3], 4)");
        assert_eq!(eval_repr("a, b = [1, 2, 3]").await, "!ValueError");
    }

    #[tokio::test]
    async fn test_loops_with_else_and_break() {
        let src = "\
out = []
for i in range(10):
    if i % 2:
        continue
    if i > 6:
        break
    out.append(i)
else:
    out.append('done')
n = 0
while n < 3:
    n += 1
else:
    out.append(n)
out";
        assert_eq!(eval_repr(src).await, "[0, 2, 4, 6, 3]");
    }

    #[tokio::test]
    async fn test_try_except_finally() {
        let src = "\
log = []
def f():
    try:
        1 / 0
    except ZeroDivisionError as e:
        log.append(type(e).__name__)
        return 'handled'
    finally:
        log.append('finally')
r = f()
log.append(r)
log";
        assert_eq!(
            eval_repr(src).await,
            "['ZeroDivisionError', 'finally', 'handled']"
        );
    }

    #[tokio::test]
    async fn test_bare_raise_and_user_exceptions() {
        let src = "\
class AppError(ValueError):
    def __init__(self, code):
        super().__init__('code ' + str(code))
        self.code = code
try:
    try:
        raise AppError(7)
    except ValueError:
        raise
except AppError as e:
    result = (e.code, str(e), isinstance(e, ValueError))
result";
        assert_eq!(eval_repr(src).await, "(7, 'code 7', True)");
    }

    #[tokio::test]
    async fn test_exception_name_unbound_after_handler() {
        let src = "try:\n    raise KeyError('k')\nexcept KeyError as err:\n    pass\nerr";
        assert_eq!(eval_repr(src).await, "!NameError");
    }

    #[tokio::test]
    async fn test_classes_inheritance_and_super() {
        let src = "\
class Animal:
    kind = 'animal'
    def __init__(self, name):
        self.name = name
    def speak(self):
        return self.name + ' makes a sound'
class Dog(Animal):
    def speak(self):
        return super().speak() + ': woof'
d = Dog('rex')
(d.speak(), d.kind, isinstance(d, Animal))";
        assert_eq!(
            eval_repr(src).await,
            "('rex makes a sound: woof', 'animal', True)"
        );
    }

    #[tokio::test]
    async fn test_comprehensions_have_own_scope() {
        let src = "x = 'outer'\nsquares = [x * x for x in range(4) if x]\n(squares, x, {k: v for k, v in zip('ab', [1, 2])})";
        assert_eq!(eval_repr(src).await, "([1, 4, 9], 'outer', {'a': 1, 'b': 2})");
    }

    #[tokio::test]
    async fn test_walrus_binds_in_enclosing_scope() {
        assert_eq!(
            eval_repr("vals = [y for x in range(3) if (y := x * 10)]\n(vals, y)").await,
            "([10, 20], 20)"
        );
    }

    #[tokio::test]
    async fn test_with_statement_calls_exit() {
        let src = "\
log = []
class Ctx:
    def __enter__(self):
        log.append('enter')
        return 5
    def __exit__(self, kind, value, tb):
        log.append(kind.__name__ if kind else None)
        return True
with Ctx() as v:
    log.append(v)
    raise ValueError('x')
log";
        assert_eq!(eval_repr(src).await, "['enter', 5, 'ValueError']");
    }

    #[tokio::test]
    async fn test_async_functions_return_coroutines() {
        let src = "async def f(x):\n    return x + 1\nc = f(1)\nawait c";
        assert_eq!(eval_repr(src).await, "2");
        let twice = "async def f():\n    return 1\nc = f()\nawait c\nawait c";
        assert_eq!(eval_repr(twice).await, "!RuntimeError");
    }

    #[tokio::test]
    async fn test_traceback_frames() {
        let (interp, _) = interpreter();
        let ns = Namespace::new();
        let src = "def inner():\n    return 1 / 0\n\ndef outer():\n    return inner()\nouter()";
        let Err(Unwind::Raise(exc)) = run(&interp, &ns, src).await else {
            panic!("expected exception");
        };
        let frames: Vec<(String, u32)> = exc
            .traceback
            .borrow()
            .iter()
            .map(|f| (f.code.name.clone(), f.line))
            .collect();
        assert_eq!(
            frames,
            vec![
                ("inner".to_string(), 2),
                ("outer".to_string(), 5),
                ("<module>".to_string(), 6)
            ]
        );
    }

    #[tokio::test]
    async fn test_recursion_limit() {
        let src = "def f(n):\n    return f(n + 1)\nf(0)";
        let sink = std::rc::Rc::new(crate::interp::NullSink);
        let widgets = Rc::new(crate::sandbox::widgets::WidgetRegistry::new());
        let interp = Interpreter::new(sink, widgets, crate::interp::AbortHandle::new(), 30);
        let ns = Namespace::new();
        let err = run(&interp, &ns, src).await.unwrap_err();
        assert_eq!(err.kind(), Some(ExcKind::RecursionError));
    }

    #[test]
    fn test_eval_depth_caps_a_high_recursion_limit() {
        let thread = std::thread::Builder::new()
            .stack_size(crate::interp::EVAL_STACK_SIZE)
            .spawn(|| {
                let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
                runtime.block_on(async {
                    let sink = std::rc::Rc::new(crate::interp::NullSink);
                    let widgets = Rc::new(crate::sandbox::widgets::WidgetRegistry::new());
                    let interp =
                        Interpreter::new(sink, widgets, crate::interp::AbortHandle::new(), 1_000_000);
                    let ns = Namespace::new();
                    let src = "def f(n):\n    return f(n + 1)\nf(0)";
                    run(&interp, &ns, src).await.unwrap_err().kind()
                })
            })
            .unwrap();
        assert_eq!(thread.join().unwrap(), Some(ExcKind::RecursionError));
    }

    #[tokio::test]
    async fn test_abort_is_not_catchable() {
        let sink = std::rc::Rc::new(crate::interp::NullSink);
        let widgets = Rc::new(crate::sandbox::widgets::WidgetRegistry::new());
        let abort = crate::interp::AbortHandle::new();
        let interp = Interpreter::new(sink, widgets, abort.clone(), 100);
        abort.abort();
        let ns = Namespace::new();
        let result = run(&interp, &ns, "try:\n    x = 1\nexcept BaseException:\n    pass").await;
        assert!(matches!(result, Err(Unwind::Abort)));
    }
}
