//! Hover information for the identifier under the cursor.

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use super::resolve_path;
use crate::interp::{Interpreter, Namespace, Value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectInfo {
    /// The dotted path that was resolved.
    pub name: String,
    pub type_name: String,
    pub signature: Option<String>,
    pub doc: Option<String>,
}

/// Describe the dotted identifier around char `offset` of `source`.
pub fn inspect(
    interp: &Rc<Interpreter>,
    ns: &Namespace,
    source: &str,
    offset: usize,
    max_doc_chars: usize,
) -> Option<InspectInfo> {
    let name = path_at(source, offset)?;
    let value = resolve_path(interp, ns, source, &name)?;
    let doc = match &value {
        Value::Instance(instance) => instance.class.doc.clone(),
        other => interp
            .get_attr(other, "__doc__")
            .ok()
            .and_then(|doc| doc.as_str().map(str::to_string)),
    }
    .map(|doc| truncate(&clean_doc(&doc), max_doc_chars))
    .filter(|doc| !doc.is_empty());

    Some(InspectInfo {
        type_name: value.type_name(),
        signature: signature(&value),
        doc,
        name,
    })
}

fn signature(value: &Value) -> Option<String> {
    match value {
        Value::Function(func) => Some(func.signature()),
        Value::Native(native) if !native.signature.is_empty() => Some(native.signature.to_string()),
        Value::BoundMethod(method) => signature(&method.func).map(|sig| drop_receiver(&sig)),
        Value::Class(class) => match class.lookup("__init__") {
            Some(init) => signature(&init).map(|sig| drop_receiver(&sig)),
            None => Some("()".to_string()),
        },
        _ => None,
    }
}

/// `(self, a, b)` -> `(a, b)`.
fn drop_receiver(sig: &str) -> String {
    let inner = sig.trim_start_matches('(').trim_end_matches(')');
    match inner.split_once(',') {
        Some((_, rest)) => format!("({})", rest.trim_start()),
        None => "()".to_string(),
    }
}

/// The dotted identifier touching `offset`, extended right to the end of
/// the last segment.
fn path_at(source: &str, offset: usize) -> Option<String> {
    let chars: Vec<char> = source.chars().collect();
    let offset = offset.min(chars.len());
    let is_ident = |c: char| c.is_alphanumeric() || c == '_';

    let mut start = offset;
    while start > 0 && (is_ident(chars[start - 1]) || chars[start - 1] == '.') {
        start -= 1;
    }
    let mut end = offset;
    while end < chars.len() && is_ident(chars[end]) {
        end += 1;
    }
    let path: String = chars[start..end].iter().collect();
    let path = path.trim_matches('.');
    let valid = !path.is_empty()
        && !path.starts_with(|c: char| c.is_ascii_digit())
        && path.split('.').all(|part| !part.is_empty());
    valid.then(|| path.to_string())
}

/// Strip the uniform indentation that docstrings pick up from their source.
///
/// The first line is trimmed on its own; the rest lose their common leading
/// whitespace. Blank lines at either end are dropped.
pub fn clean_doc(doc: &str) -> String {
    let mut lines = doc.lines();
    let first = lines.next().unwrap_or("").trim();
    let rest: Vec<&str> = lines.collect();
    let indent = rest
        .iter()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start().len())
        .min()
        .unwrap_or(0);

    let mut cleaned: Vec<&str> = vec![first];
    cleaned.extend(rest.iter().map(|line| line.get(indent..).unwrap_or("").trim_end()));
    while cleaned.last().is_some_and(|line| line.is_empty()) {
        cleaned.pop();
    }
    while cleaned.first().is_some_and(|line| line.is_empty()) {
        cleaned.remove(0);
    }
    cleaned.join("\n")
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::testing::{interpreter, run};

    #[test]
    fn test_clean_doc() {
        let doc = "Summary line.\n\n    Details here,\n      indented more.\n    ";
        assert_eq!(clean_doc(doc), "Summary line.\n\nDetails here,\n  indented more.");
        assert_eq!(clean_doc("\n   Only body.\n"), "Only body.");
    }

    #[test]
    fn test_path_at() {
        assert_eq!(path_at("x = math.sqrt(2)", 10).as_deref(), Some("math.sqrt"));
        assert_eq!(path_at("x = math.sqrt(2)", 5).as_deref(), Some("math"));
        assert_eq!(path_at("f(1.5)", 4), None);
        assert_eq!(path_at("   ", 1), None);
    }

    #[tokio::test]
    async fn test_inspect_function_and_native() {
        let (interp, _) = interpreter();
        let ns = Namespace::new();
        let source = "def area(w, h=2):\n    \"\"\"Area of a box.\n\n    Width times height.\n    \"\"\"\n    return w * h\n";
        run(&interp, &ns, source).await.unwrap();

        let info = inspect(&interp, &ns, "area(3)", 2, 1000).unwrap();
        assert_eq!(info.name, "area");
        assert_eq!(info.type_name, "function");
        assert_eq!(info.signature.as_deref(), Some("(w, h=2)"));
        assert_eq!(info.doc.as_deref(), Some("Area of a box.\n\nWidth times height."));

        let short = inspect(&interp, &ns, "area", 0, 4).unwrap();
        assert_eq!(short.doc.as_deref(), Some("Area..."));

        let native = inspect(&interp, &ns, "import math\nmath.sqrt", 21, 1000).unwrap();
        assert_eq!(native.signature.as_deref(), Some("(x, /)"));
        assert_eq!(native.doc.as_deref(), Some("Return the square root of x."));
    }

    #[tokio::test]
    async fn test_inspect_class_and_missing() {
        let (interp, _) = interpreter();
        let ns = Namespace::new();
        run(&interp, &ns, "class P:\n    \"\"\"A point.\"\"\"\n    def __init__(self, x, y):\n        self.x = x\np = P(1, 2)\n")
            .await
            .unwrap();

        let class = inspect(&interp, &ns, "P", 1, 1000).unwrap();
        assert_eq!(class.signature.as_deref(), Some("(x, y)"));
        assert_eq!(class.doc.as_deref(), Some("A point."));
        let instance = inspect(&interp, &ns, "p.x", 3, 1000).unwrap();
        assert_eq!(instance.type_name, "int");

        assert!(inspect(&interp, &ns, "missing", 3, 1000).is_none());
        assert!(inspect(&interp, &ns, "p.nope", 5, 1000).is_none());
    }
}
