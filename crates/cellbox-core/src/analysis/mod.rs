//! Static analysis and editor introspection.
//!
//! Everything here is total: unparsable code, unknown names and failed
//! lookups come back as empty results, never as errors.
//!
//! - `deps` - definitions and free references, for reactive wiring
//! - `lint` - syntax errors, undefined names, suspicious literals
//! - `complete` / `inspect` - lookups against the live shared namespace

mod complete;
mod deps;
mod inspect;
mod lint;

use std::rc::Rc;

pub use complete::{Completer, Completion, CompletionKind};
pub use deps::{DependencyInfo, analyze};
pub use inspect::{InspectInfo, clean_doc, inspect};
pub use lint::{Diagnostic, LintReport, Severity, lint};

use crate::interp::{Interpreter, Namespace, Value};

/// Resolve a dotted path to a live value by name and attribute lookup only.
///
/// The head is looked up in the shared namespace, then the built-ins, then
/// in the `import` statements of `source` resolved against the built-in
/// modules. No guest code runs.
pub(crate) fn resolve_path(
    interp: &Rc<Interpreter>,
    ns: &Namespace,
    source: &str,
    path: &str,
) -> Option<Value> {
    let mut parts = path.split('.');
    let head = parts.next().filter(|h| !h.is_empty())?;
    let mut value = ns
        .get(head)
        .or_else(|| interp.builtins().get(head))
        .or_else(|| resolve_import(interp, source, head))?;
    for part in parts {
        value = interp.get_attr(&value, part).ok()?;
    }
    Some(value)
}

fn resolve_import(interp: &Rc<Interpreter>, source: &str, head: &str) -> Option<Value> {
    for line in source.lines().map(str::trim) {
        if let Some(rest) = line.strip_prefix("import ") {
            for item in rest.split(',') {
                let (path, bound) = split_alias(item);
                let bound = bound.unwrap_or_else(|| path.split('.').next().unwrap_or(path));
                if bound == head {
                    return interp.import_module(path).ok();
                }
            }
        } else if let Some(rest) = line.strip_prefix("from ")
            && let Some((module, names)) = rest.split_once(" import ")
        {
            for item in names.trim_matches(|c| c == '(' || c == ')').split(',') {
                let (name, bound) = split_alias(item);
                if bound.unwrap_or(name) == head {
                    let module = interp.import_module(module.trim()).ok()?;
                    return interp.get_attr(&module, name).ok();
                }
            }
        }
    }
    None
}

/// `path as alias` -> (`path`, Some(`alias`)).
fn split_alias(item: &str) -> (&str, Option<&str>) {
    match item.split_once(" as ") {
        Some((path, alias)) => (path.trim(), Some(alias.trim())),
        None => (item.trim(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::testing::interpreter;

    #[test]
    fn test_resolve_namespace_builtins_and_imports() {
        let (interp, _) = interpreter();
        let ns = Namespace::new();
        ns.set("n", Value::Int(3));

        assert!(matches!(resolve_path(&interp, &ns, "", "n"), Some(Value::Int(3))));
        assert!(matches!(resolve_path(&interp, &ns, "", "len"), Some(Value::Native(_))));
        assert!(resolve_path(&interp, &ns, "", "math.pi").is_none());

        let source = "import math as m\nfrom json import dumps as enc\n";
        assert!(matches!(resolve_path(&interp, &ns, source, "m.pi"), Some(Value::Float(_))));
        assert!(matches!(resolve_path(&interp, &ns, source, "enc"), Some(Value::Native(_))));
        assert!(resolve_path(&interp, &ns, source, "m.nothing").is_none());
    }
}
