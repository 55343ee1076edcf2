//! Name completion against the live namespace.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::resolve_path;
use crate::interp::{self, Interpreter, Namespace, Value};
use crate::lang::KEYWORDS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionKind {
    Variable,
    Function,
    Class,
    Module,
    Keyword,
}

impl CompletionKind {
    fn of(value: &Value) -> Self {
        match value {
            Value::Module(_) => CompletionKind::Module,
            Value::Class(_) | Value::Type(_) | Value::ExcType(_) => CompletionKind::Class,
            Value::Function(_) | Value::Native(_) | Value::BoundMethod(_) => CompletionKind::Function,
            _ => CompletionKind::Variable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub label: String,
    pub kind: CompletionKind,
}

/// Completion engine with a per-path member cache.
///
/// Members of a base path rooted in the shared namespace or the built-ins
/// only change when code runs, so the cache is dropped whenever a run
/// starts or finishes. Paths resolved through the buffer's own `import`
/// lines depend on the buffer and are never cached.
pub struct Completer {
    show_private: bool,
    max_completions: usize,
    members: RefCell<FxHashMap<String, Rc<[Completion]>>>,
}

impl Completer {
    pub fn new(show_private: bool, max_completions: usize) -> Self {
        Self {
            show_private,
            max_completions,
            members: RefCell::new(FxHashMap::default()),
        }
    }

    pub fn invalidate(&self) {
        self.members.borrow_mut().clear();
    }

    /// Completions for the identifier run ending at char `offset` of `source`.
    pub fn complete(
        &self,
        interp: &Rc<Interpreter>,
        ns: &Namespace,
        source: &str,
        offset: usize,
    ) -> Vec<Completion> {
        let before: String = source.chars().take(offset).collect();
        let token = trailing_path(&before);
        match token.rsplit_once('.') {
            Some((base, partial)) => match self.members_of(interp, ns, source, base) {
                Some(members) => self.rank(members.iter().cloned(), partial),
                None => Vec::new(),
            },
            None => self.rank(top_level(interp, ns), token),
        }
    }

    fn members_of(
        &self,
        interp: &Rc<Interpreter>,
        ns: &Namespace,
        source: &str,
        base: &str,
    ) -> Option<Rc<[Completion]>> {
        if let Some(cached) = self.members.borrow().get(base) {
            return Some(cached.clone());
        }
        let value = resolve_path(interp, ns, source, base)?;
        let shared = base
            .split('.')
            .next()
            .is_some_and(|head| ns.contains(head) || interp.builtins().contains(head));
        let members: Rc<[Completion]> = interp
            .attr_names(&value)
            .into_iter()
            .map(|label| {
                let kind = interp
                    .get_attr(&value, &label)
                    .map_or(CompletionKind::Variable, |member| CompletionKind::of(&member));
                Completion { label, kind }
            })
            .collect();
        if shared {
            self.members
                .borrow_mut()
                .insert(base.to_string(), members.clone());
        }
        Some(members)
    }

    fn rank(&self, candidates: impl Iterator<Item = Completion>, partial: &str) -> Vec<Completion> {
        let mut matches: Vec<Completion> = candidates
            .filter(|c| c.label.starts_with(partial))
            .filter(|c| self.show_private || !c.label.starts_with('_'))
            .collect();
        matches.sort_by(|a, b| {
            (a.label != partial, &a.label).cmp(&(b.label != partial, &b.label))
        });
        matches.dedup_by(|a, b| a.label == b.label);
        matches.truncate(self.max_completions);
        matches
    }
}

/// Shared names, then built-ins, then keywords.
fn top_level(interp: &Interpreter, ns: &Namespace) -> impl Iterator<Item = Completion> {
    let names = ns.entries().into_iter().chain(interp.builtins().entries());
    names
        .map(|(label, value)| Completion {
            kind: CompletionKind::of(&value),
            label,
        })
        .chain(KEYWORDS.iter().map(|kw| Completion {
            label: kw.to_string(),
            kind: CompletionKind::Keyword,
        }))
        .chain(interp::MODULE_NAMES.iter().map(|name| Completion {
            label: name.to_string(),
            kind: CompletionKind::Module,
        }))
}

/// Longest run of identifier characters and dots at the end of `text`.
fn trailing_path(text: &str) -> &str {
    let start = text
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_alphanumeric() || *c == '_' || *c == '.')
        .last()
        .map_or(text.len(), |(i, _)| i);
    &text[start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::testing::interpreter;

    fn labels(completions: &[Completion]) -> Vec<&str> {
        completions.iter().map(|c| c.label.as_str()).collect()
    }

    #[test]
    fn test_trailing_path() {
        assert_eq!(trailing_path("x = math.sq"), "math.sq");
        assert_eq!(trailing_path("print(ab"), "ab");
        assert_eq!(trailing_path("f(x) "), "");
        assert_eq!(trailing_path("naïve"), "naïve");
    }

    #[test]
    fn test_module_members_from_source_import() {
        let (interp, _) = interpreter();
        let ns = Namespace::new();
        let completer = Completer::new(false, 50);
        let source = "import math\nmath.sq";
        let found = completer.complete(&interp, &ns, source, source.chars().count());
        assert_eq!(labels(&found), ["sqrt"]);
        assert_eq!(found[0].kind, CompletionKind::Function);

        let all = completer.complete(&interp, &ns, "import math\nmath.", 17);
        assert!(labels(&all).contains(&"pi"));
        assert!(all.iter().all(|c| !c.label.starts_with("__")));
    }

    #[test]
    fn test_buffer_imports_do_not_leak_between_buffers() {
        let (interp, _) = interpreter();
        let ns = Namespace::new();
        let completer = Completer::new(false, 50);
        let first = "import math as m\nm.";
        let found = completer.complete(&interp, &ns, first, first.chars().count());
        assert!(labels(&found).contains(&"sqrt"));

        let second = "import json as m\nm.";
        let found = completer.complete(&interp, &ns, second, second.chars().count());
        assert!(labels(&found).contains(&"dumps"));
        assert!(!labels(&found).contains(&"sqrt"));
    }

    #[test]
    fn test_namespace_paths_are_cached_until_invalidated() {
        let (interp, _) = interpreter();
        let ns = Namespace::new();
        let completer = Completer::new(false, 50);
        ns.set("m", interp.import_module("math").unwrap());
        assert!(labels(&completer.complete(&interp, &ns, "m.sq", 4)).contains(&"sqrt"));

        ns.set("m", interp.import_module("json").unwrap());
        assert!(labels(&completer.complete(&interp, &ns, "m.sq", 4)).contains(&"sqrt"));
        completer.invalidate();
        assert!(completer.complete(&interp, &ns, "m.sq", 4).is_empty());
        assert!(labels(&completer.complete(&interp, &ns, "m.du", 4)).contains(&"dumps"));
    }

    #[test]
    fn test_exact_match_first_and_cap() {
        let (interp, _) = interpreter();
        let ns = Namespace::new();
        for name in ["value", "value_long", "valid", "val"] {
            ns.set(name, Value::Int(1));
        }
        let found = Completer::new(false, 50).complete(&interp, &ns, "val", 3);
        assert_eq!(labels(&found), ["val", "valid", "value", "value_long"]);

        let capped = Completer::new(false, 2).complete(&interp, &ns, "val", 3);
        assert_eq!(labels(&capped), ["val", "valid"]);
    }

    #[test]
    fn test_keywords_builtins_and_private_names() {
        let (interp, _) = interpreter();
        let ns = Namespace::new();
        ns.set("_hidden", Value::Int(1));

        let found = Completer::new(false, 50).complete(&interp, &ns, "whi", 3);
        assert_eq!(found, [Completion { label: "while".into(), kind: CompletionKind::Keyword }]);
        let found = Completer::new(false, 50).complete(&interp, &ns, "le", 2);
        assert!(labels(&found).contains(&"len"));

        assert!(Completer::new(false, 50).complete(&interp, &ns, "_hid", 4).is_empty());
        let shown = Completer::new(true, 50).complete(&interp, &ns, "_hid", 4);
        assert_eq!(labels(&shown), ["_hidden"]);
    }

    #[test]
    fn test_member_cache_until_invalidated() {
        let (interp, _) = interpreter();
        let ns = Namespace::new();
        let completer = Completer::new(false, 50);
        let module = interp.import_module("math").unwrap();
        ns.set("m", module);
        assert!(!completer.complete(&interp, &ns, "m.", 2).is_empty());

        ns.set("m", Value::Int(1));
        assert!(labels(&completer.complete(&interp, &ns, "m.", 2)).contains(&"sqrt"));
        completer.invalidate();
        assert!(!labels(&completer.complete(&interp, &ns, "m.", 2)).contains(&"sqrt"));
    }

    #[test]
    fn test_unresolvable_base_is_empty() {
        let (interp, _) = interpreter();
        let completer = Completer::new(false, 50);
        assert!(completer.complete(&interp, &Namespace::new(), "nope.x", 6).is_empty());
        assert!(completer.complete(&interp, &Namespace::new(), "a..b", 4).is_empty());
    }
}
