//! Definitions and free references of a unit.
//!
//! Two visitors share the work. [`BindingCollector`] gathers the names a
//! block binds without descending into nested scopes; [`ScopeWalker`] walks
//! the whole tree with a stack of local scopes and records every name read
//! that no enclosing local scope binds.

use std::collections::{BTreeMap, BTreeSet};

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::interp;
use crate::lang::ast::*;
use crate::lang::parse_module;
use crate::lang::visit::{self, Visitor};

/// Names a unit binds at module scope and the names it reads from outside.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyInfo {
    pub definitions: Vec<String>,
    pub references: Vec<String>,
}

/// Analyze a unit's source. Never fails: unparsable source yields empty sets.
pub fn analyze(source: &str) -> DependencyInfo {
    let Ok(module) = parse_module(source) else {
        return DependencyInfo::default();
    };
    let scan = scan(&module);
    let shared = |name: &&String| !name.starts_with('_');
    DependencyInfo {
        definitions: scan.definitions.iter().filter(shared).cloned().collect(),
        references: scan
            .free_references()
            .filter(|(name, _)| !name.starts_with('_'))
            .map(|(name, _)| name.to_string())
            .collect(),
    }
}

/// Raw result of one traversal.
pub(crate) struct Scan {
    /// Module-scope bindings, including `global` declarations in functions.
    pub definitions: BTreeSet<String>,
    /// Every free name read, with its first position.
    pub reads: BTreeMap<String, Pos>,
}

impl Scan {
    /// Reads not bound by the unit itself or by the built-ins.
    pub fn free_references(&self) -> impl Iterator<Item = (&str, Pos)> {
        let builtins: FxHashSet<&str> = interp::builtin_names().collect();
        self.reads
            .iter()
            .filter(move |(name, _)| {
                !self.definitions.contains(*name) && !builtins.contains(name.as_str())
            })
            .map(|(name, pos)| (name.as_str(), *pos))
    }
}

pub(crate) fn scan(module: &Module) -> Scan {
    let mut walker = ScopeWalker::default();
    visit::walk_module(&mut walker, module);
    let mut definitions = bindings(&module.body);
    definitions.extend(walker.globals);
    Scan {
        definitions: definitions.into_iter().collect(),
        reads: walker.reads,
    }
}

/// Names bound directly in `body`.
fn bindings(body: &[Stmt]) -> FxHashSet<String> {
    let mut collector = BindingCollector::default();
    collector.visit_body(body);
    collector.names
}

fn target_names(target: &Expr, out: &mut FxHashSet<String>) {
    match &target.kind {
        ExprKind::Name(name) => {
            out.insert(name.clone());
        }
        ExprKind::Tuple(items) | ExprKind::List(items) => {
            for item in items {
                target_names(item, out);
            }
        }
        ExprKind::Starred(inner) => target_names(inner, out),
        _ => {}
    }
}

#[derive(Default)]
struct BindingCollector {
    names: FxHashSet<String>,
}

impl<'ast> Visitor<'ast> for BindingCollector {
    fn visit_stmt(&mut self, stmt: &'ast Stmt) {
        match &stmt.kind {
            StmtKind::Assign { targets, .. } => {
                for target in targets {
                    target_names(target, &mut self.names);
                }
            }
            StmtKind::AugAssign { target, .. }
            | StmtKind::AnnAssign { target, .. }
            | StmtKind::For { target, .. } => target_names(target, &mut self.names),
            StmtKind::With { items, .. } => {
                for target in items.iter().filter_map(|item| item.target.as_ref()) {
                    target_names(target, &mut self.names);
                }
            }
            StmtKind::Try { handlers, .. } => {
                self.names
                    .extend(handlers.iter().filter_map(|h| h.name.clone()));
            }
            StmtKind::Import(aliases) => {
                self.names
                    .extend(aliases.iter().map(|a| a.bound_name().to_string()));
            }
            StmtKind::ImportFrom { names, .. } => {
                self.names.extend(
                    names
                        .iter()
                        .filter(|a| a.name != "*")
                        .map(|a| a.bound_name().to_string()),
                );
            }
            _ => {}
        }
        visit::walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &'ast Expr) {
        if let ExprKind::NamedExpr { name, .. } = &expr.kind {
            self.names.insert(name.clone());
        }
        visit::walk_expr(self, expr);
    }

    fn visit_function_def(&mut self, def: &'ast FunctionDef) {
        self.names.insert(def.name.clone());
    }

    fn visit_class_def(&mut self, def: &'ast ClassDef) {
        self.names.insert(def.name.clone());
    }

    fn visit_lambda(&mut self, _lambda: &'ast Lambda) {}

    // Comprehension targets are local to the comprehension; a walrus inside
    // one still binds in the enclosing scope.
    fn visit_comprehension(&mut self, elts: &[&'ast Expr], generators: &'ast [Comprehension]) {
        for generator in generators {
            self.visit_expr(&generator.iter);
            for cond in &generator.ifs {
                self.visit_expr(cond);
            }
        }
        for elt in elts {
            self.visit_expr(elt);
        }
    }
}

#[derive(PartialEq, Eq)]
enum ScopeKind {
    Function,
    Class,
}

struct LocalScope {
    kind: ScopeKind,
    names: FxHashSet<String>,
}

#[derive(Default)]
struct ScopeWalker {
    /// Local scopes, innermost last. Module scope is implicit.
    scopes: Vec<LocalScope>,
    reads: BTreeMap<String, Pos>,
    globals: FxHashSet<String>,
}

impl ScopeWalker {
    fn is_local(&self, name: &str) -> bool {
        let innermost = self.scopes.len().saturating_sub(1);
        self.scopes.iter().enumerate().rev().any(|(depth, scope)| {
            // Class bodies are not visible from the functions nested in them.
            (scope.kind == ScopeKind::Function || depth == innermost) && scope.names.contains(name)
        })
    }

    fn in_scope(&mut self, scope: LocalScope, f: impl FnOnce(&mut Self)) {
        self.scopes.push(scope);
        f(self);
        self.scopes.pop();
    }
}

impl<'ast> Visitor<'ast> for ScopeWalker {
    fn visit_expr(&mut self, expr: &'ast Expr) {
        if let ExprKind::Name(name) = &expr.kind
            && !self.is_local(name)
        {
            self.reads.entry(name.clone()).or_insert(expr.pos);
        }
        visit::walk_expr(self, expr);
    }

    fn visit_function_def(&mut self, def: &'ast FunctionDef) {
        for decorator in &def.decorators {
            self.visit_expr(decorator);
        }
        visit::walk_params(self, &def.params);
        if let Some(returns) = &def.returns {
            self.visit_expr(returns);
        }

        let mut names = bindings(&def.body);
        names.extend(def.params.names().map(str::to_string));
        for declared in def.globals.iter().chain(&def.nonlocals) {
            names.remove(declared);
        }
        self.globals.extend(def.globals.iter().cloned());
        let scope = LocalScope {
            kind: ScopeKind::Function,
            names,
        };
        self.in_scope(scope, |walker| walker.visit_body(&def.body));
    }

    fn visit_class_def(&mut self, def: &'ast ClassDef) {
        for decorator in &def.decorators {
            self.visit_expr(decorator);
        }
        for base in &def.bases {
            self.visit_expr(base);
        }
        let scope = LocalScope {
            kind: ScopeKind::Class,
            names: bindings(&def.body),
        };
        self.in_scope(scope, |walker| walker.visit_body(&def.body));
    }

    fn visit_lambda(&mut self, lambda: &'ast Lambda) {
        visit::walk_params(self, &lambda.params);
        let scope = LocalScope {
            kind: ScopeKind::Function,
            names: lambda.params.names().map(str::to_string).collect(),
        };
        self.in_scope(scope, |walker| walker.visit_expr(&lambda.body));
    }

    fn visit_comprehension(&mut self, elts: &[&'ast Expr], generators: &'ast [Comprehension]) {
        let Some((first, rest)) = generators.split_first() else {
            return;
        };
        // The outermost iterable is evaluated in the enclosing scope.
        self.visit_expr(&first.iter);

        let mut names = FxHashSet::default();
        for generator in generators {
            target_names(&generator.target, &mut names);
        }
        let scope = LocalScope {
            kind: ScopeKind::Function,
            names,
        };
        self.in_scope(scope, |walker| {
            walker.visit_expr(&first.target);
            for cond in &first.ifs {
                walker.visit_expr(cond);
            }
            for generator in rest {
                walker.visit_expr(&generator.iter);
                walker.visit_expr(&generator.target);
                for cond in &generator.ifs {
                    walker.visit_expr(cond);
                }
            }
            for elt in elts {
                walker.visit_expr(elt);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(source: &str) -> (Vec<String>, Vec<String>) {
        let info = analyze(source);
        (info.definitions, info.references)
    }

    #[test]
    fn test_deeply_nested_source_has_no_dependencies() {
        let source = format!("x = {}1{}", "(".repeat(1000), ")".repeat(1000));
        let (defs, refs) = deps(&source);
        assert!(defs.is_empty());
        assert!(refs.is_empty());
    }

    #[test]
    fn test_simple_definitions_and_references() {
        let (defs, refs) = deps("x = 1\ny = x + z");
        assert_eq!(defs, ["x", "y"]);
        assert_eq!(refs, ["z"]);
    }

    #[test]
    fn test_invalid_syntax_is_empty() {
        assert_eq!(analyze("def f(:"), DependencyInfo::default());
    }

    #[test]
    fn test_binding_constructs() {
        let source = "\
a, [b, *c] = data
d += 1
e: int = 2
for f in g:
    pass
with open_it() as h:
    pass
try:
    pass
except Exception as err:
    pass
import os.path, json as j
from math import sqrt as root
def fn():
    global late
    late = 1
class K:
    pass
if (w := 3):
    pass
";
        let (defs, refs) = deps(source);
        assert_eq!(
            defs,
            ["K", "a", "b", "c", "d", "e", "err", "f", "fn", "h", "j", "late", "os", "root", "w"]
        );
        assert_eq!(refs, ["data", "g", "open_it"]);
    }

    #[test]
    fn test_function_locals_are_not_references() {
        let source = "\
def f(a, *rest, k=default, **kw):
    b = a + outer
    def g():
        nonlocal b
        return b + c
    return [i * b for i in rest if i > limit]
";
        let (defs, refs) = deps(source);
        assert_eq!(defs, ["f"]);
        assert_eq!(refs, ["c", "default", "limit", "outer"]);
    }

    #[test]
    fn test_lambda_and_comprehension_scopes() {
        let (defs, refs) = deps("h = lambda q: q + r\nout = {k: v for k, v in items}\nk");
        assert_eq!(defs, ["h", "out"]);
        assert_eq!(refs, ["items", "k", "r"]);
    }

    #[test]
    fn test_class_body_not_visible_to_methods() {
        let source = "\
class C:
    size = 3
    doubled = size * 2
    def area(self):
        return size
";
        let (defs, refs) = deps(source);
        assert_eq!(defs, ["C"]);
        assert_eq!(refs, ["size"]);
    }

    #[test]
    fn test_private_names_and_builtins_excluded() {
        let (defs, refs) = deps("_tmp = len(items)\nprint(_other, (x := 1))");
        assert_eq!(defs, ["x"]);
        assert_eq!(refs, ["items"]);
    }

    #[test]
    fn test_use_before_module_binding_is_not_a_reference() {
        let (_, refs) = deps("def f():\n    return later\nlater = 1");
        assert!(refs.is_empty());
    }
}
