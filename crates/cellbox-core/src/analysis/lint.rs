//! Static checks over a unit's source.

use serde::{Deserialize, Serialize};

use super::deps;
use crate::lang::ast::{CmpOp, Constant, Expr, ExprKind, FStringPart, Pos};
use crate::lang::parse_module;
use crate::lang::visit::{self, Visitor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// One finding, anchored at a 1-indexed line and column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: String,
    pub message: String,
    pub severity: Severity,
    pub line: u32,
    pub col: u32,
}

impl Diagnostic {
    fn warning(code: &str, message: String, pos: Pos) -> Self {
        Self {
            code: code.to_string(),
            message,
            severity: Severity::Warning,
            line: pos.line,
            col: pos.col,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintReport {
    pub diagnostics: Vec<Diagnostic>,
    /// Module-scope definitions; empty unless requested.
    pub definitions: Vec<String>,
}

/// Lint `source`. `is_known` reports names bound outside the unit.
pub fn lint(source: &str, extract_defs: bool, is_known: impl Fn(&str) -> bool) -> LintReport {
    let module = match parse_module(source) {
        Ok(module) => module,
        Err(e) => {
            return LintReport {
                diagnostics: vec![Diagnostic {
                    code: "E999".to_string(),
                    message: format!("{}: {}", e.exception_name(), e.message),
                    severity: Severity::Error,
                    line: e.line,
                    col: e.col,
                }],
                definitions: Vec::new(),
            };
        }
    };

    let scan = deps::scan(&module);
    let mut diagnostics: Vec<Diagnostic> = scan
        .free_references()
        .filter(|(name, _)| !is_known(name))
        .map(|(name, pos)| {
            Diagnostic::warning("F821", format!("undefined name '{name}'"), pos)
        })
        .collect();

    let mut checker = ExprChecks::default();
    visit::walk_module(&mut checker, &module);
    diagnostics.extend(checker.diagnostics);
    diagnostics.sort_by_key(|d| (d.line, d.col));

    LintReport {
        diagnostics,
        definitions: if extract_defs {
            scan.definitions.into_iter().collect()
        } else {
            Vec::new()
        },
    }
}

#[derive(Default)]
struct ExprChecks {
    diagnostics: Vec<Diagnostic>,
}

fn is_literal(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Constant(c) => matches!(c, Constant::Int(_) | Constant::Float(_) | Constant::Str(_)),
        ExprKind::FString(_) | ExprKind::List(_) | ExprKind::Dict(_) => true,
        ExprKind::Tuple(items) => !items.is_empty(),
        _ => false,
    }
}

impl<'ast> Visitor<'ast> for ExprChecks {
    fn visit_expr(&mut self, expr: &'ast Expr) {
        match &expr.kind {
            ExprKind::Compare { left, ops } => {
                let mut lhs: &Expr = left;
                for (op, rhs) in ops {
                    if matches!(op, CmpOp::Is | CmpOp::IsNot) && (is_literal(lhs) || is_literal(rhs)) {
                        let replacement = if *op == CmpOp::Is { "==" } else { "!=" };
                        self.diagnostics.push(Diagnostic::warning(
                            "F632",
                            format!("use {replacement} to compare with a literal"),
                            expr.pos,
                        ));
                    }
                    lhs = rhs;
                }
            }
            ExprKind::FString(parts)
                if !parts.iter().any(|p| matches!(p, FStringPart::Expr { .. })) =>
            {
                self.diagnostics.push(Diagnostic::warning(
                    "F541",
                    "f-string is missing placeholders".to_string(),
                    expr.pos,
                ));
            }
            _ => {}
        }
        visit::walk_expr(self, expr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codes(report: &LintReport) -> Vec<&str> {
        report.diagnostics.iter().map(|d| d.code.as_str()).collect()
    }

    #[test]
    fn test_syntax_error() {
        let report = lint("x = (1,\ny = 2", true, |_| false);
        assert_eq!(codes(&report), ["E999"]);
        assert_eq!(report.diagnostics[0].severity, Severity::Error);
        assert!(report.definitions.is_empty());
    }

    #[test]
    fn test_undefined_names() {
        let report = lint("y = x + known\nprint(len(y))", false, |name| name == "known");
        assert_eq!(codes(&report), ["F821"]);
        let d = &report.diagnostics[0];
        assert_eq!(d.message, "undefined name 'x'");
        assert_eq!((d.line, d.col), (1, 5));
        assert!(report.definitions.is_empty());
    }

    #[test]
    fn test_literal_comparison_and_empty_fstring() {
        let report = lint("a = 1\nb = a is 1\nc = a is not None\nd = f\"plain\"\n", true, |_| false);
        assert_eq!(codes(&report), ["F632", "F541"]);
        assert_eq!(report.diagnostics[0].line, 2);
        assert_eq!(report.diagnostics[1].line, 4);
        assert_eq!(report.definitions, ["a", "b", "c", "d"]);
    }

    #[test]
    fn test_clean_source() {
        let report = lint("def f(n):\n    return [i for i in range(n)]\nf(3)", false, |_| false);
        assert!(report.diagnostics.is_empty());
    }
}
