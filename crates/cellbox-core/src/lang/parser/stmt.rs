//! Statement parsing.

use std::rc::Rc;

use super::{Parser, ScopeDecls};
use crate::lang::ast::*;
use crate::lang::error::{ParseError, ParseErrorKind};
use crate::lang::lexer::Token;

impl<'t> Parser<'t> {
    /// Parse one statement, appending to `out` (a simple-statement line may
    /// hold several `;`-separated statements).
    pub(super) fn statement(&mut self, out: &mut Vec<Stmt>) -> Result<(), ParseError> {
        let pos = self.ts.pos();
        let stmt = match self.ts.peek() {
            Token::If => self.if_stmt()?,
            Token::While => self.while_stmt()?,
            Token::For => self.for_stmt()?,
            Token::Try => self.try_stmt()?,
            Token::With => self.with_stmt()?,
            Token::Def => self.function_def(Vec::new(), false, pos)?,
            Token::Class => self.class_def(Vec::new(), pos)?,
            Token::At => self.decorated()?,
            Token::Async => {
                self.ts.advance();
                if !self.ts.check(&Token::Def) {
                    return Err(self.ts.error_expected("'def' after 'async'"));
                }
                self.function_def(Vec::new(), true, pos)?
            }
            _ => return self.simple_line(out),
        };
        out.push(stmt);
        Ok(())
    }

    /// `small_stmt (';' small_stmt)* [';'] NEWLINE`
    fn simple_line(&mut self, out: &mut Vec<Stmt>) -> Result<(), ParseError> {
        loop {
            out.push(self.small_stmt()?);
            if !self.ts.eat(&Token::Semicolon) {
                break;
            }
            if self.ts.check(&Token::Newline(0)) || self.ts.at_end() {
                break;
            }
        }
        if !self.ts.eat(&Token::Newline(0)) && !self.ts.at_end() {
            return Err(self.ts.error_expected("end of line"));
        }
        Ok(())
    }

    fn small_stmt(&mut self) -> Result<Stmt, ParseError> {
        let pos = self.ts.pos();
        let kind = match self.ts.peek() {
            Token::Pass => {
                self.ts.advance();
                StmtKind::Pass
            }
            Token::Break => {
                self.ts.advance();
                StmtKind::Break
            }
            Token::Continue => {
                self.ts.advance();
                StmtKind::Continue
            }
            Token::Return => {
                self.ts.advance();
                if self.at_statement_end() {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.testlist_star()?))
                }
            }
            Token::Raise => {
                self.ts.advance();
                if self.at_statement_end() {
                    StmtKind::Raise { exc: None, cause: None }
                } else {
                    let exc = self.test()?;
                    let cause = if self.ts.eat(&Token::From) {
                        Some(self.test()?)
                    } else {
                        None
                    };
                    StmtKind::Raise { exc: Some(exc), cause }
                }
            }
            Token::Global => {
                self.ts.advance();
                let names = self.name_list()?;
                if let Some(scope) = self.scopes.last_mut() {
                    scope.globals.extend(names.iter().cloned());
                }
                StmtKind::Global(names)
            }
            Token::Nonlocal => {
                self.ts.advance();
                let names = self.name_list()?;
                match self.scopes.last_mut() {
                    Some(scope) => scope.nonlocals.extend(names.iter().cloned()),
                    None => {
                        return Err(self
                            .ts
                            .error_at(pos, "nonlocal declaration not allowed at module level"));
                    }
                }
                StmtKind::Nonlocal(names)
            }
            Token::Del => {
                self.ts.advance();
                let mut targets = vec![self.bitor()?];
                while self.ts.eat(&Token::Comma) {
                    if self.at_statement_end() {
                        break;
                    }
                    targets.push(self.bitor()?);
                }
                for target in &targets {
                    self.check_target(target)?;
                }
                StmtKind::Delete(targets)
            }
            Token::Assert => {
                self.ts.advance();
                let test = self.test()?;
                let msg = if self.ts.eat(&Token::Comma) {
                    Some(self.test()?)
                } else {
                    None
                };
                StmtKind::Assert { test, msg }
            }
            Token::Import => self.import()?,
            Token::From => self.import_from()?,
            _ => self.expr_stmt()?,
        };
        Ok(Stmt { kind, pos })
    }

    fn at_statement_end(&self) -> bool {
        matches!(
            self.ts.peek(),
            Token::Newline(_) | Token::Semicolon | Token::EndOfFile
        )
    }

    fn name_list(&mut self) -> Result<Vec<String>, ParseError> {
        let mut names = vec![self.ts.expect_name("a name")?];
        while self.ts.eat(&Token::Comma) {
            names.push(self.ts.expect_name("a name")?);
        }
        Ok(names)
    }

    fn dotted_name(&mut self) -> Result<String, ParseError> {
        let mut name = self.ts.expect_name("a module name")?;
        while self.ts.eat(&Token::Dot) {
            name.push('.');
            name.push_str(&self.ts.expect_name("a module name")?);
        }
        Ok(name)
    }

    fn import(&mut self) -> Result<StmtKind, ParseError> {
        self.ts.advance();
        let mut names = Vec::new();
        loop {
            let pos = self.ts.pos();
            let name = self.dotted_name()?;
            let asname = if self.ts.eat(&Token::As) {
                Some(self.ts.expect_name("a name after 'as'")?)
            } else {
                None
            };
            names.push(Alias { name, asname, pos });
            if !self.ts.eat(&Token::Comma) {
                break;
            }
        }
        Ok(StmtKind::Import(names))
    }

    fn import_from(&mut self) -> Result<StmtKind, ParseError> {
        self.ts.advance();
        if self.ts.check(&Token::Dot) {
            return Err(self.ts.error_here("relative imports are not supported"));
        }
        let module = self.dotted_name()?;
        self.ts.expect(Token::Import, "'import'")?;

        let pos = self.ts.pos();
        if self.ts.eat(&Token::Star) {
            let star = Alias { name: "*".to_string(), asname: None, pos };
            return Ok(StmtKind::ImportFrom { module, names: vec![star] });
        }

        let parenthesized = self.ts.eat(&Token::LParen);
        let mut names = Vec::new();
        loop {
            let pos = self.ts.pos();
            let name = self.ts.expect_name("a name to import")?;
            let asname = if self.ts.eat(&Token::As) {
                Some(self.ts.expect_name("a name after 'as'")?)
            } else {
                None
            };
            names.push(Alias { name, asname, pos });
            if !self.ts.eat(&Token::Comma) {
                break;
            }
            if parenthesized && self.ts.check(&Token::RParen) {
                break;
            }
        }
        if parenthesized {
            self.ts.expect(Token::RParen, "')'")?;
        }
        Ok(StmtKind::ImportFrom { module, names })
    }

    /// Expression statement, assignment, augmented or annotated assignment.
    fn expr_stmt(&mut self) -> Result<StmtKind, ParseError> {
        let first = self.testlist_star()?;

        if let Some(op) = aug_assign_op(self.ts.peek()) {
            self.ts.advance();
            if !matches!(
                first.kind,
                ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. }
            ) {
                return Err(self
                    .ts
                    .error_at(first.pos, "illegal expression for augmented assignment"));
            }
            let value = self.testlist()?;
            return Ok(StmtKind::AugAssign { target: first, op, value });
        }

        if self.ts.eat(&Token::Colon) {
            if !matches!(
                first.kind,
                ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. }
            ) {
                return Err(self
                    .ts
                    .error_at(first.pos, "illegal target for annotation"));
            }
            let annotation = self.test()?;
            let value = if self.ts.eat(&Token::Assign) {
                Some(self.testlist_star()?)
            } else {
                None
            };
            return Ok(StmtKind::AnnAssign { target: first, annotation, value });
        }

        if !self.ts.check(&Token::Assign) {
            return Ok(StmtKind::Expr(first));
        }

        let mut chain = vec![first];
        while self.ts.eat(&Token::Assign) {
            chain.push(self.testlist_star()?);
        }
        let value = chain.pop().ok_or_else(|| self.ts.error_here("missing value"))?;
        for target in &chain {
            self.check_target(target)?;
        }
        Ok(StmtKind::Assign { targets: chain, value })
    }

    /// Validate an assignment/deletion/loop target.
    pub(super) fn check_target(&self, target: &Expr) -> Result<(), ParseError> {
        match &target.kind {
            ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => Ok(()),
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                let mut starred = 0;
                for item in items {
                    if let ExprKind::Starred(inner) = &item.kind {
                        starred += 1;
                        self.check_target(inner)?;
                    } else {
                        self.check_target(item)?;
                    }
                }
                if starred > 1 {
                    return Err(self
                        .ts
                        .error_at(target.pos, "multiple starred expressions in assignment"));
                }
                Ok(())
            }
            ExprKind::Starred(_) => Err(self
                .ts
                .error_at(target.pos, "starred assignment target must be in a list or tuple")),
            _ => Err(self.ts.error_at(target.pos, "cannot assign to expression")),
        }
    }

    /// Indented block or inline suite after a `:`.
    fn block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.nested("blocks", Self::suite)
    }

    fn suite(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.ts.expect(Token::Colon, "':'")?;
        let mut body = Vec::new();
        if !self.ts.eat(&Token::Newline(0)) {
            self.simple_line(&mut body)?;
            return Ok(body);
        }
        if !self.ts.eat(&Token::Indent) {
            let pos = self.ts.pos();
            return Err(ParseError::new(
                ParseErrorKind::Indentation,
                pos.line,
                pos.col,
                "expected an indented block",
            ));
        }
        while !self.ts.eat(&Token::Dedent) {
            if self.ts.at_end() {
                break;
            }
            if self.ts.eat(&Token::Newline(0)) {
                continue;
            }
            self.statement(&mut body)?;
        }
        Ok(body)
    }

    fn if_stmt(&mut self) -> Result<Stmt, ParseError> {
        let pos = self.ts.pos();
        self.ts.advance();
        let test = self.namedexpr_test()?;
        let body = self.block()?;
        let orelse = if self.ts.check(&Token::Elif) {
            vec![self.if_stmt()?]
        } else if self.ts.eat(&Token::Else) {
            self.block()?
        } else {
            Vec::new()
        };
        Ok(Stmt { kind: StmtKind::If { test, body, orelse }, pos })
    }

    fn while_stmt(&mut self) -> Result<Stmt, ParseError> {
        let pos = self.ts.pos();
        self.ts.advance();
        let test = self.namedexpr_test()?;
        let body = self.block()?;
        let orelse = self.else_block()?;
        Ok(Stmt { kind: StmtKind::While { test, body, orelse }, pos })
    }

    fn for_stmt(&mut self) -> Result<Stmt, ParseError> {
        let pos = self.ts.pos();
        self.ts.advance();
        let target = self.target_list()?;
        self.ts.expect(Token::In, "'in'")?;
        let iter = self.testlist()?;
        let body = self.block()?;
        let orelse = self.else_block()?;
        Ok(Stmt { kind: StmtKind::For { target, iter, body, orelse }, pos })
    }

    fn else_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        if self.ts.eat(&Token::Else) {
            self.block()
        } else {
            Ok(Vec::new())
        }
    }

    fn try_stmt(&mut self) -> Result<Stmt, ParseError> {
        let pos = self.ts.pos();
        self.ts.advance();
        let body = self.block()?;

        let mut handlers = Vec::new();
        while self.ts.check(&Token::Except) {
            let hpos = self.ts.pos();
            self.ts.advance();
            let (kind, name) = if self.ts.check(&Token::Colon) {
                (None, None)
            } else {
                let kind = self.test()?;
                let name = if self.ts.eat(&Token::As) {
                    Some(self.ts.expect_name("a name after 'as'")?)
                } else {
                    None
                };
                (Some(kind), name)
            };
            let hbody = self.block()?;
            handlers.push(ExceptHandler { kind, name, body: hbody, pos: hpos });
        }

        let orelse = if !handlers.is_empty() && self.ts.eat(&Token::Else) {
            self.block()?
        } else {
            Vec::new()
        };
        let finalbody = if self.ts.eat(&Token::Finally) {
            self.block()?
        } else {
            Vec::new()
        };
        if handlers.is_empty() && finalbody.is_empty() {
            return Err(self.ts.error_expected("'except' or 'finally' block"));
        }
        Ok(Stmt { kind: StmtKind::Try { body, handlers, orelse, finalbody }, pos })
    }

    fn with_stmt(&mut self) -> Result<Stmt, ParseError> {
        let pos = self.ts.pos();
        self.ts.advance();
        let mut items = Vec::new();
        loop {
            let context = self.test()?;
            let target = if self.ts.eat(&Token::As) {
                let target = self.bitor()?;
                self.check_target(&target)?;
                Some(target)
            } else {
                None
            };
            items.push(WithItem { context, target });
            if !self.ts.eat(&Token::Comma) {
                break;
            }
        }
        let body = self.block()?;
        Ok(Stmt { kind: StmtKind::With { items, body }, pos })
    }

    fn decorated(&mut self) -> Result<Stmt, ParseError> {
        let pos = self.ts.pos();
        let mut decorators = Vec::new();
        while self.ts.eat(&Token::At) {
            decorators.push(self.namedexpr_test()?);
            self.ts.expect(Token::Newline(0), "end of line after decorator")?;
        }
        match self.ts.peek() {
            Token::Def => self.function_def(decorators, false, pos),
            Token::Async => {
                self.ts.advance();
                self.function_def(decorators, true, pos)
            }
            Token::Class => self.class_def(decorators, pos),
            _ => Err(self.ts.error_expected("'def' or 'class' after decorator")),
        }
    }

    fn function_def(
        &mut self,
        decorators: Vec<Expr>,
        is_async: bool,
        pos: Pos,
    ) -> Result<Stmt, ParseError> {
        self.ts.expect(Token::Def, "'def'")?;
        let name = self.ts.expect_name("a function name")?;
        self.ts.expect(Token::LParen, "'('")?;
        let params = self.params(&Token::RParen, true)?;
        self.ts.expect(Token::RParen, "')'")?;
        let returns = if self.ts.eat(&Token::Arrow) {
            Some(self.test()?)
        } else {
            None
        };

        self.scopes.push(ScopeDecls::default());
        let body = self.block();
        let decls = self.scopes.pop().unwrap_or_default();
        let body = body?;

        let doc = docstring(&body);
        let def = FunctionDef {
            name,
            params,
            body,
            is_async,
            decorators,
            returns,
            doc,
            globals: decls.globals,
            nonlocals: decls.nonlocals,
            pos,
        };
        Ok(Stmt { kind: StmtKind::FunctionDef(Rc::new(def)), pos })
    }

    fn class_def(&mut self, decorators: Vec<Expr>, pos: Pos) -> Result<Stmt, ParseError> {
        self.ts.expect(Token::Class, "'class'")?;
        let name = self.ts.expect_name("a class name")?;
        let mut bases = Vec::new();
        if self.ts.eat(&Token::LParen) {
            while !self.ts.check(&Token::RParen) {
                bases.push(self.test()?);
                if !self.ts.eat(&Token::Comma) {
                    break;
                }
            }
            self.ts.expect(Token::RParen, "')'")?;
        }
        // Class bodies are their own declaration scope; their globals are not
        // tracked.
        self.scopes.push(ScopeDecls::default());
        let body = self.block();
        self.scopes.pop();
        let body = body?;

        let doc = docstring(&body);
        let def = ClassDef { name, bases, body, decorators, doc, pos };
        Ok(Stmt { kind: StmtKind::ClassDef(Rc::new(def)), pos })
    }

    /// Parameter list up to (not including) `close`.
    pub(super) fn params(&mut self, close: &Token, annotations: bool) -> Result<Params, ParseError> {
        let mut params = Params::default();
        let mut seen_star = false;
        let mut seen_default = false;

        while !self.ts.check(close) {
            let pos = self.ts.pos();
            if self.ts.eat(&Token::DoubleStar) {
                let name = self.ts.expect_name("a parameter name")?;
                let annotation = self.annotation(annotations)?;
                params.kwarg = Some(Param { name, default: None, annotation, pos });
                self.ts.eat(&Token::Comma);
                break;
            }
            if self.ts.eat(&Token::Star) {
                if seen_star {
                    return Err(self.ts.error_at(pos, "* argument may appear only once"));
                }
                seen_star = true;
                if let Token::Name(_) = self.ts.peek() {
                    let name = self.ts.expect_name("a parameter name")?;
                    let annotation = self.annotation(annotations)?;
                    params.vararg = Some(Param { name, default: None, annotation, pos });
                }
            } else if self.ts.eat(&Token::Slash) {
                // Positional-only marker; positional parameters already behave this way.
            } else {
                let name = self.ts.expect_name("a parameter name")?;
                let annotation = self.annotation(annotations)?;
                let default = if self.ts.eat(&Token::Assign) {
                    Some(self.test()?)
                } else {
                    None
                };
                if seen_star {
                    params.kwonly.push(Param { name, default, annotation, pos });
                } else {
                    if default.is_some() {
                        seen_default = true;
                    } else if seen_default {
                        return Err(self
                            .ts
                            .error_at(pos, "non-default argument follows default argument"));
                    }
                    params.positional.push(Param { name, default, annotation, pos });
                }
            }
            if !self.ts.eat(&Token::Comma) {
                break;
            }
        }

        let mut seen = Vec::new();
        for name in params.names() {
            if seen.contains(&name) {
                return Err(self
                    .ts
                    .error_here(format!("duplicate argument '{name}' in function definition")));
            }
            seen.push(name);
        }
        Ok(params)
    }

    fn annotation(&mut self, allowed: bool) -> Result<Option<Expr>, ParseError> {
        if allowed && self.ts.eat(&Token::Colon) {
            Ok(Some(self.test()?))
        } else {
            Ok(None)
        }
    }
}

fn aug_assign_op(token: &Token) -> Option<BinOp> {
    Some(match token {
        Token::PlusAssign => BinOp::Add,
        Token::MinusAssign => BinOp::Sub,
        Token::StarAssign => BinOp::Mul,
        Token::SlashAssign => BinOp::Div,
        Token::DoubleSlashAssign => BinOp::FloorDiv,
        Token::PercentAssign => BinOp::Mod,
        Token::DoubleStarAssign => BinOp::Pow,
        Token::AmpAssign => BinOp::BitAnd,
        Token::PipeAssign => BinOp::BitOr,
        Token::CaretAssign => BinOp::BitXor,
        Token::LShiftAssign => BinOp::LShift,
        Token::RShiftAssign => BinOp::RShift,
        _ => return None,
    })
}

fn docstring(body: &[Stmt]) -> Option<String> {
    match body.first().map(|s| &s.kind) {
        Some(StmtKind::Expr(Expr {
            kind: ExprKind::Constant(Constant::Str(doc)),
            ..
        })) => Some(doc.to_string()),
        _ => None,
    }
}
