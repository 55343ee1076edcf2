//! Syntax tree traversal.
//!
//! Every `visit_*` method defaults to the matching `walk_*` function, which
//! recurses into the node's children. Implementors override the methods for
//! the nodes they care about and call `walk_*` to keep descending.

use super::ast::*;

pub trait Visitor<'ast> {
    fn visit_stmt(&mut self, stmt: &'ast Stmt) {
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &'ast Expr) {
        walk_expr(self, expr);
    }

    fn visit_function_def(&mut self, def: &'ast FunctionDef) {
        walk_function_def(self, def);
    }

    fn visit_class_def(&mut self, def: &'ast ClassDef) {
        walk_class_def(self, def);
    }

    fn visit_lambda(&mut self, lambda: &'ast Lambda) {
        walk_lambda(self, lambda);
    }

    /// A list or dict comprehension. `elts` are the element expressions
    /// (one for a list, key and value for a dict).
    fn visit_comprehension(&mut self, elts: &[&'ast Expr], generators: &'ast [Comprehension]) {
        walk_comprehension(self, elts, generators);
    }

    fn visit_body(&mut self, body: &'ast [Stmt]) {
        for stmt in body {
            self.visit_stmt(stmt);
        }
    }
}

pub fn walk_module<'ast, V: Visitor<'ast> + ?Sized>(v: &mut V, module: &'ast Module) {
    v.visit_body(&module.body);
}

pub fn walk_stmt<'ast, V: Visitor<'ast> + ?Sized>(v: &mut V, stmt: &'ast Stmt) {
    match &stmt.kind {
        StmtKind::Expr(e) => v.visit_expr(e),
        StmtKind::Assign { targets, value } => {
            v.visit_expr(value);
            for target in targets {
                v.visit_expr(target);
            }
        }
        StmtKind::AugAssign { target, value, .. } => {
            v.visit_expr(value);
            v.visit_expr(target);
        }
        StmtKind::AnnAssign { target, annotation, value } => {
            v.visit_expr(annotation);
            if let Some(value) = value {
                v.visit_expr(value);
            }
            v.visit_expr(target);
        }
        StmtKind::If { test, body, orelse } | StmtKind::While { test, body, orelse } => {
            v.visit_expr(test);
            v.visit_body(body);
            v.visit_body(orelse);
        }
        StmtKind::For { target, iter, body, orelse } => {
            v.visit_expr(iter);
            v.visit_expr(target);
            v.visit_body(body);
            v.visit_body(orelse);
        }
        StmtKind::FunctionDef(def) => v.visit_function_def(def),
        StmtKind::ClassDef(def) => v.visit_class_def(def),
        StmtKind::Return(value) => {
            if let Some(value) = value {
                v.visit_expr(value);
            }
        }
        StmtKind::Try { body, handlers, orelse, finalbody } => {
            v.visit_body(body);
            for handler in handlers {
                if let Some(kind) = &handler.kind {
                    v.visit_expr(kind);
                }
                v.visit_body(&handler.body);
            }
            v.visit_body(orelse);
            v.visit_body(finalbody);
        }
        StmtKind::Raise { exc, cause } => {
            if let Some(exc) = exc {
                v.visit_expr(exc);
            }
            if let Some(cause) = cause {
                v.visit_expr(cause);
            }
        }
        StmtKind::With { items, body } => {
            for item in items {
                v.visit_expr(&item.context);
                if let Some(target) = &item.target {
                    v.visit_expr(target);
                }
            }
            v.visit_body(body);
        }
        StmtKind::Delete(targets) => {
            for target in targets {
                v.visit_expr(target);
            }
        }
        StmtKind::Assert { test, msg } => {
            v.visit_expr(test);
            if let Some(msg) = msg {
                v.visit_expr(msg);
            }
        }
        StmtKind::Pass
        | StmtKind::Break
        | StmtKind::Continue
        | StmtKind::Import(_)
        | StmtKind::ImportFrom { .. }
        | StmtKind::Global(_)
        | StmtKind::Nonlocal(_) => {}
    }
}

pub fn walk_function_def<'ast, V: Visitor<'ast> + ?Sized>(v: &mut V, def: &'ast FunctionDef) {
    for decorator in &def.decorators {
        v.visit_expr(decorator);
    }
    walk_params(v, &def.params);
    if let Some(returns) = &def.returns {
        v.visit_expr(returns);
    }
    v.visit_body(&def.body);
}

pub fn walk_class_def<'ast, V: Visitor<'ast> + ?Sized>(v: &mut V, def: &'ast ClassDef) {
    for decorator in &def.decorators {
        v.visit_expr(decorator);
    }
    for base in &def.bases {
        v.visit_expr(base);
    }
    v.visit_body(&def.body);
}

pub fn walk_lambda<'ast, V: Visitor<'ast> + ?Sized>(v: &mut V, lambda: &'ast Lambda) {
    walk_params(v, &lambda.params);
    v.visit_expr(&lambda.body);
}

/// Defaults and annotations of a parameter list.
pub fn walk_params<'ast, V: Visitor<'ast> + ?Sized>(v: &mut V, params: &'ast Params) {
    let all = params
        .positional
        .iter()
        .chain(params.vararg.iter())
        .chain(params.kwonly.iter())
        .chain(params.kwarg.iter());
    for param in all {
        if let Some(default) = &param.default {
            v.visit_expr(default);
        }
        if let Some(annotation) = &param.annotation {
            v.visit_expr(annotation);
        }
    }
}

pub fn walk_comprehension<'ast, V: Visitor<'ast> + ?Sized>(
    v: &mut V,
    elts: &[&'ast Expr],
    generators: &'ast [Comprehension],
) {
    for generator in generators {
        v.visit_expr(&generator.iter);
        v.visit_expr(&generator.target);
        for cond in &generator.ifs {
            v.visit_expr(cond);
        }
    }
    for elt in elts {
        v.visit_expr(elt);
    }
}

pub fn walk_expr<'ast, V: Visitor<'ast> + ?Sized>(v: &mut V, expr: &'ast Expr) {
    match &expr.kind {
        ExprKind::Name(_) | ExprKind::Constant(_) => {}
        ExprKind::FString(parts) => {
            for part in parts {
                if let FStringPart::Expr { expr, .. } = part {
                    v.visit_expr(expr);
                }
            }
        }
        ExprKind::List(items) | ExprKind::Tuple(items) => {
            for item in items {
                v.visit_expr(item);
            }
        }
        ExprKind::Dict(entries) => {
            for (key, value) in entries {
                v.visit_expr(key);
                v.visit_expr(value);
            }
        }
        ExprKind::Attribute { value, .. } => v.visit_expr(value),
        ExprKind::Subscript { value, index } => {
            v.visit_expr(value);
            v.visit_expr(index);
        }
        ExprKind::Slice { lower, upper, step } => {
            for part in [lower, upper, step].into_iter().flatten() {
                v.visit_expr(part);
            }
        }
        ExprKind::Call { func, args } => {
            v.visit_expr(func);
            for arg in args {
                match arg {
                    Arg::Positional(e) | Arg::Keyword(_, e) | Arg::Star(e) | Arg::DoubleStar(e) => {
                        v.visit_expr(e)
                    }
                }
            }
        }
        ExprKind::BinOp { left, right, .. } => {
            v.visit_expr(left);
            v.visit_expr(right);
        }
        ExprKind::UnaryOp { operand, .. } => v.visit_expr(operand),
        ExprKind::BoolOp { values, .. } => {
            for value in values {
                v.visit_expr(value);
            }
        }
        ExprKind::Compare { left, ops } => {
            v.visit_expr(left);
            for (_, right) in ops {
                v.visit_expr(right);
            }
        }
        ExprKind::IfExp { test, body, orelse } => {
            v.visit_expr(test);
            v.visit_expr(body);
            v.visit_expr(orelse);
        }
        ExprKind::Lambda(lambda) => v.visit_lambda(lambda),
        ExprKind::NamedExpr { value, .. } => v.visit_expr(value),
        ExprKind::Await(inner) | ExprKind::Starred(inner) => v.visit_expr(inner),
        ExprKind::ListComp { elt, generators } => {
            v.visit_comprehension(&[elt.as_ref()], generators);
        }
        ExprKind::DictComp { key, value, generators } => {
            v.visit_comprehension(&[key.as_ref(), value.as_ref()], generators);
        }
    }
}
