//! Recursive descent parser for the guest language.
//!
//! Statements live in [`stmt`], expressions (precedence climbing for the
//! binary operator levels) in [`expr`]. Both work over a [`TokenStream`]
//! produced by the layout-aware lexer.

mod expr;
mod stmt;
mod stream;

use stream::TokenStream;

use super::ast::{Expr, Module, Pos};
use super::error::ParseError;
use super::lexer::{Tok, Token, tokenize};

/// Deepest nesting of brackets, unary operators or blocks the parser
/// descends into before giving up with a syntax error.
const MAX_NESTING: usize = 100;

/// `global`/`nonlocal` declarations collected while parsing one function body.
#[derive(Debug, Default)]
struct ScopeDecls {
    globals: Vec<String>,
    nonlocals: Vec<String>,
}

pub(crate) struct Parser<'t> {
    ts: TokenStream<'t>,
    scopes: Vec<ScopeDecls>,
    depth: usize,
}

impl<'t> Parser<'t> {
    fn new(tokens: &'t [Tok]) -> Self {
        Self {
            ts: TokenStream::new(tokens),
            scopes: Vec::new(),
            depth: 0,
        }
    }

    /// Run `parse` one nesting level deeper, failing past [`MAX_NESTING`].
    fn nested<T>(
        &mut self,
        what: &str,
        parse: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        if self.depth >= MAX_NESTING {
            let pos = self.ts.pos();
            return Err(self.ts.error_at(pos, format!("too many nested {what}")));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn module(&mut self) -> Result<Module, ParseError> {
        let mut body = Vec::new();
        loop {
            while self.ts.eat(&Token::Newline(0)) {}
            if self.ts.at_end() {
                break;
            }
            if self.ts.check(&Token::Indent) {
                return Err(self.ts.error_here("unexpected indent"));
            }
            self.statement(&mut body)?;
        }
        Ok(Module { body })
    }

    fn standalone_expression(&mut self) -> Result<Expr, ParseError> {
        let expr = self.testlist()?;
        while self.ts.eat(&Token::Newline(0)) {}
        if !self.ts.at_end() {
            return Err(self.ts.error_expected("end of expression"));
        }
        Ok(expr)
    }
}

/// Parse a complete unit of source.
pub fn parse_module(source: &str) -> Result<Module, ParseError> {
    let tokens = tokenize(source)?;
    Parser::new(&tokens).module()
}

/// Parse a single expression (or bare tuple).
pub fn parse_expression(source: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(source.trim())?;
    Parser::new(&tokens).standalone_expression()
}

/// Parse an embedded expression (an f-string placeholder) whose nodes all
/// report the position of the enclosing literal.
fn parse_expression_at(source: &str, pos: Pos) -> Result<Expr, ParseError> {
    let mut tokens = tokenize(source.trim())?;
    for tok in &mut tokens {
        tok.line = pos.line;
        tok.col = pos.col;
    }
    Parser::new(&tokens).standalone_expression()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::ast::*;
    use crate::lang::error::ParseErrorKind;

    fn parse(source: &str) -> Module {
        parse_module(source).unwrap()
    }

    fn single_expr(source: &str) -> ExprKind {
        match parse(source).body.remove(0).kind {
            StmtKind::Expr(e) => e.kind,
            other => panic!("expected expression statement, got {other:?}"),
        }
    }

    #[test]
    fn test_assignment_and_expression() {
        let module = parse("x = 1\ny = x + z");
        assert_eq!(module.body.len(), 2);
        match &module.body[1].kind {
            StmtKind::Assign { targets, value } => {
                assert!(matches!(&targets[0].kind, ExprKind::Name(n) if n == "y"));
                assert!(matches!(value.kind, ExprKind::BinOp { op: BinOp::Add, .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(module.body[1].pos, Pos::new(2, 1));
    }

    #[test]
    fn test_precedence() {
        // 1 + 2 * 3 ** 2 parses as 1 + (2 * (3 ** 2))
        match single_expr("1 + 2 * 3 ** 2") {
            ExprKind::BinOp { op: BinOp::Add, right, .. } => match right.kind {
                ExprKind::BinOp { op: BinOp::Mul, right, .. } => {
                    assert!(matches!(right.kind, ExprKind::BinOp { op: BinOp::Pow, .. }));
                }
                other => panic!("unexpected {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        }
        // -2 ** 2 parses as -(2 ** 2)
        assert!(matches!(
            single_expr("-2 ** 2"),
            ExprKind::UnaryOp { op: UnaryOp::Neg, .. }
        ));
    }

    #[test]
    fn test_chained_comparison() {
        match single_expr("a < b <= c is not None") {
            ExprKind::Compare { ops, .. } => {
                let ops: Vec<CmpOp> = ops.iter().map(|(op, _)| *op).collect();
                assert_eq!(ops, vec![CmpOp::Lt, CmpOp::LtE, CmpOp::IsNot]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_function_def_with_all_parameter_kinds() {
        let module = parse("async def f(a, b=2, *args, c, d=4, **kw) -> int:\n    \"\"\"Doc.\"\"\"\n    return a\n");
        let StmtKind::FunctionDef(def) = &module.body[0].kind else {
            panic!("expected def");
        };
        assert!(def.is_async);
        assert_eq!(def.params.positional.len(), 2);
        assert!(def.params.positional[1].default.is_some());
        assert_eq!(def.params.vararg.as_ref().map(|p| p.name.as_str()), Some("args"));
        assert_eq!(def.params.kwonly.len(), 2);
        assert_eq!(def.params.kwarg.as_ref().map(|p| p.name.as_str()), Some("kw"));
        assert_eq!(def.doc.as_deref(), Some("Doc."));
        assert!(def.returns.is_some());
    }

    #[test]
    fn test_global_and_nonlocal_are_recorded_per_function() {
        let module = parse(
            "def outer():\n    global g\n    def inner():\n        nonlocal h\n    h = 1\n",
        );
        let StmtKind::FunctionDef(outer) = &module.body[0].kind else {
            panic!("expected def");
        };
        assert_eq!(outer.globals, vec!["g".to_string()]);
        assert!(outer.nonlocals.is_empty());
        let StmtKind::FunctionDef(inner) = &outer.body[1].kind else {
            panic!("expected nested def");
        };
        assert_eq!(inner.nonlocals, vec!["h".to_string()]);
    }

    #[test]
    fn test_if_elif_else_nests() {
        let module = parse("if a:\n    x = 1\nelif b:\n    x = 2\nelse:\n    x = 3\n");
        let StmtKind::If { orelse, .. } = &module.body[0].kind else {
            panic!("expected if");
        };
        assert!(matches!(orelse[0].kind, StmtKind::If { .. }));
    }

    #[test]
    fn test_try_except_finally() {
        let module = parse(
            "try:\n    f()\nexcept (ValueError, KeyError) as e:\n    pass\nelse:\n    g()\nfinally:\n    h()\n",
        );
        let StmtKind::Try { handlers, orelse, finalbody, .. } = &module.body[0].kind else {
            panic!("expected try");
        };
        assert_eq!(handlers.len(), 1);
        assert_eq!(handlers[0].name.as_deref(), Some("e"));
        assert_eq!(orelse.len(), 1);
        assert_eq!(finalbody.len(), 1);
    }

    #[test]
    fn test_imports() {
        let module = parse("import a.b as c, d\nfrom math import sqrt as s, pi");
        let StmtKind::Import(names) = &module.body[0].kind else {
            panic!("expected import");
        };
        assert_eq!(names[0].bound_name(), "c");
        assert_eq!(names[1].bound_name(), "d");
        let StmtKind::ImportFrom { module: m, names } = &module.body[1].kind else {
            panic!("expected from-import");
        };
        assert_eq!(m, "math");
        assert_eq!(names[0].bound_name(), "s");
    }

    #[test]
    fn test_comprehensions_and_generator_arguments() {
        assert!(matches!(
            single_expr("[x * 2 for x in xs if x]"),
            ExprKind::ListComp { .. }
        ));
        assert!(matches!(
            single_expr("{k: v for k, v in items}"),
            ExprKind::DictComp { .. }
        ));
        match single_expr("sum(x for x in xs)") {
            ExprKind::Call { args, .. } => {
                assert!(matches!(&args[0], Arg::Positional(e) if matches!(e.kind, ExprKind::ListComp { .. })));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_call_arguments() {
        match single_expr("f(1, *a, k=2, **kw)") {
            ExprKind::Call { args, .. } => {
                assert!(matches!(args[0], Arg::Positional(_)));
                assert!(matches!(args[1], Arg::Star(_)));
                assert!(matches!(&args[2], Arg::Keyword(k, _) if k == "k"));
                assert!(matches!(args[3], Arg::DoubleStar(_)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_slices() {
        match single_expr("a[1:2, ::3]") {
            ExprKind::Subscript { index, .. } => match index.kind {
                ExprKind::Tuple(items) => {
                    assert!(matches!(items[0].kind, ExprKind::Slice { .. }));
                    assert!(matches!(
                        items[1].kind,
                        ExprKind::Slice { lower: None, upper: None, step: Some(_) }
                    ));
                }
                other => panic!("unexpected {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_fstring_parts() {
        match single_expr("f\"a{x!r}b{y:>4}{{c}}\"") {
            ExprKind::FString(parts) => {
                assert_eq!(parts.len(), 5);
                assert!(matches!(&parts[1], FStringPart::Expr { conversion: Some('r'), .. }));
                assert!(matches!(&parts[3], FStringPart::Expr { spec: Some(s), .. } if s == ">4"));
                assert!(matches!(&parts[4], FStringPart::Literal(s) if s == "{c}"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_walrus_and_destructuring() {
        let module = parse("a, (b, *c) = xs\nif (n := len(a)) > 1:\n    pass\n");
        let StmtKind::Assign { targets, .. } = &module.body[0].kind else {
            panic!("expected assign");
        };
        assert!(matches!(targets[0].kind, ExprKind::Tuple(_)));
        let StmtKind::If { test, .. } = &module.body[1].kind else {
            panic!("expected if");
        };
        let ExprKind::Compare { left, .. } = &test.kind else {
            panic!("expected compare");
        };
        assert!(matches!(left.kind, ExprKind::NamedExpr { .. }));
    }

    #[test]
    fn test_decorators_and_class() {
        let module = parse("@dec\nclass A(B, C):\n    x = 1\n    def m(self):\n        return self.x\n");
        let StmtKind::ClassDef(class) = &module.body[0].kind else {
            panic!("expected class");
        };
        assert_eq!(class.bases.len(), 2);
        assert_eq!(class.decorators.len(), 1);
        assert_eq!(class.body.len(), 2);
    }

    #[test]
    fn test_semicolons_and_inline_suites() {
        let module = parse("a = 1; b = 2\nif a: c = 3\n");
        assert_eq!(module.body.len(), 3);
    }

    #[test]
    fn test_invalid_syntax() {
        let err = parse_module("def f(:").unwrap_err();
        assert_eq!(err.line, 1);
        assert_eq!(err.exception_name(), "SyntaxError");

        assert!(parse_module("x = = 1").is_err());
        assert!(parse_module("1 = x").is_err());
        assert!(parse_module("for in x:\n    pass").is_err());
    }

    #[test]
    fn test_unexpected_indent() {
        let err = parse_module("x = 1\n    y = 2\n").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Indentation);
        assert_eq!(err.exception_name(), "IndentationError");
    }

    #[test]
    fn test_missing_block_is_an_indentation_error() {
        let err = parse_module("if x:\npass\n").unwrap_err();
        assert_eq!(err.exception_name(), "IndentationError");
    }

    #[test]
    fn test_parse_expression() {
        assert!(matches!(
            parse_expression(" a.b ").unwrap().kind,
            ExprKind::Attribute { .. }
        ));
        assert!(parse_expression("a b").is_err());
    }

    #[test]
    fn test_deep_nesting_is_a_syntax_error() {
        let deep = format!("x = {}1{}", "(".repeat(1000), ")".repeat(1000));
        let err = parse_module(&deep).unwrap_err();
        assert_eq!(err.exception_name(), "SyntaxError");
        assert_eq!(err.message, "too many nested parentheses");

        let calls = format!("{}0{}", "f(".repeat(1000), ")".repeat(1000));
        assert!(parse_module(&calls).is_err());
        assert!(parse_module(&format!("x = {}1", "-".repeat(1000))).is_err());
        assert!(parse_module(&format!("x = {}1", "not ".repeat(1000))).is_err());

        let mut blocks = String::new();
        for level in 0..200 {
            blocks.push_str(&format!("{}if x:\n", "    ".repeat(level)));
        }
        blocks.push_str(&format!("{}pass\n", "    ".repeat(200)));
        assert_eq!(parse_module(&blocks).unwrap_err().message, "too many nested blocks");
    }

    #[test]
    fn test_moderate_nesting_parses() {
        let nested = format!("x = {}1{}", "[".repeat(50), "]".repeat(50));
        assert!(parse_module(&nested).is_ok());
        assert!(parse_module(&format!("x = {}1", "-".repeat(50))).is_ok());
    }
}
