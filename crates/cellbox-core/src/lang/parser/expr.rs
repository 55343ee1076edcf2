//! Expression parsing using precedence climbing for the binary operators.

use std::rc::Rc;

use super::Parser;
use crate::lang::ast::*;
use crate::lang::error::{ParseError, ParseErrorKind};
use crate::lang::lexer::{StrLit, Token, unescape};

/// Binding power of binary (non-comparison) operators.
fn binary_op(token: &Token) -> Option<(BinOp, u8)> {
    Some(match token {
        Token::Pipe => (BinOp::BitOr, 1),
        Token::Caret => (BinOp::BitXor, 2),
        Token::Amp => (BinOp::BitAnd, 3),
        Token::LShift => (BinOp::LShift, 4),
        Token::RShift => (BinOp::RShift, 4),
        Token::Plus => (BinOp::Add, 5),
        Token::Minus => (BinOp::Sub, 5),
        Token::Star => (BinOp::Mul, 6),
        Token::Slash => (BinOp::Div, 6),
        Token::DoubleSlash => (BinOp::FloorDiv, 6),
        Token::Percent => (BinOp::Mod, 6),
        Token::At => (BinOp::MatMul, 6),
        _ => return None,
    })
}

/// Whether a token can begin an expression.
fn starts_expr(token: &Token) -> bool {
    matches!(
        token,
        Token::Name(_)
            | Token::Int(_)
            | Token::Float(_)
            | Token::Str(_)
            | Token::NoneLit
            | Token::TrueLit
            | Token::FalseLit
            | Token::LParen
            | Token::LBracket
            | Token::LBrace
            | Token::Minus
            | Token::Plus
            | Token::Tilde
            | Token::Not
            | Token::Lambda
            | Token::Await
            | Token::Star
    )
}

impl<'t> Parser<'t> {
    /// Comma-separated expressions; a bare comma list becomes a tuple.
    pub(super) fn testlist(&mut self) -> Result<Expr, ParseError> {
        self.comma_list(|p| p.test())
    }

    /// Like [`Self::testlist`] but allows `*starred` items (assignment sides).
    pub(super) fn testlist_star(&mut self) -> Result<Expr, ParseError> {
        self.comma_list(|p| p.star_or(|p| p.test()))
    }

    /// Loop / comprehension target list (`in` must not be consumed).
    pub(super) fn target_list(&mut self) -> Result<Expr, ParseError> {
        let target = self.comma_list(|p| p.star_or(|p| p.bitor()))?;
        self.check_target(&target)?;
        Ok(target)
    }

    fn comma_list(
        &mut self,
        mut item: impl FnMut(&mut Self) -> Result<Expr, ParseError>,
    ) -> Result<Expr, ParseError> {
        let pos = self.ts.pos();
        let first = item(self)?;
        if !self.ts.check(&Token::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.ts.eat(&Token::Comma) {
            if !starts_expr(self.ts.peek()) {
                break;
            }
            items.push(item(self)?);
        }
        Ok(Expr::new(ExprKind::Tuple(items), pos))
    }

    fn star_or(
        &mut self,
        item: impl FnOnce(&mut Self) -> Result<Expr, ParseError>,
    ) -> Result<Expr, ParseError> {
        let pos = self.ts.pos();
        if self.ts.eat(&Token::Star) {
            let inner = self.bitor()?;
            Ok(Expr::new(ExprKind::Starred(Box::new(inner)), pos))
        } else {
            item(self)
        }
    }

    /// `NAME := test | test`
    pub(super) fn namedexpr_test(&mut self) -> Result<Expr, ParseError> {
        if let (Token::Name(name), Token::Walrus) = (self.ts.peek(), self.ts.peek_nth(1)) {
            let pos = self.ts.pos();
            self.ts.advance();
            self.ts.advance();
            let value = self.test()?;
            return Ok(Expr::new(
                ExprKind::NamedExpr { name: name.clone(), value: Box::new(value) },
                pos,
            ));
        }
        self.test()
    }

    /// `or_test ['if' or_test 'else' test] | lambda`
    pub(super) fn test(&mut self) -> Result<Expr, ParseError> {
        if self.ts.check(&Token::Lambda) {
            return self.lambda();
        }
        let pos = self.ts.pos();
        let body = self.or_test()?;
        if !self.ts.eat(&Token::If) {
            return Ok(body);
        }
        let test = self.or_test()?;
        self.ts.expect(Token::Else, "'else' in conditional expression")?;
        let orelse = self.nested("expressions", Self::test)?;
        Ok(Expr::new(
            ExprKind::IfExp {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            },
            pos,
        ))
    }

    fn lambda(&mut self) -> Result<Expr, ParseError> {
        let pos = self.ts.pos();
        self.ts.advance();
        let params = self.params(&Token::Colon, false)?;
        self.ts.expect(Token::Colon, "':'")?;
        let body = self.nested("expressions", Self::test)?;
        Ok(Expr::new(
            ExprKind::Lambda(Rc::new(Lambda { params, body, pos })),
            pos,
        ))
    }

    fn or_test(&mut self) -> Result<Expr, ParseError> {
        self.bool_chain(BoolOp::Or)
    }

    fn bool_chain(&mut self, op: BoolOp) -> Result<Expr, ParseError> {
        let (token, next): (Token, fn(&mut Self) -> Result<Expr, ParseError>) = match op {
            BoolOp::Or => (Token::Or, |p| p.bool_chain(BoolOp::And)),
            BoolOp::And => (Token::And, |p| p.not_test()),
        };
        let pos = self.ts.pos();
        let first = next(self)?;
        if !self.ts.check(&token) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.ts.eat(&token) {
            values.push(next(self)?);
        }
        Ok(Expr::new(ExprKind::BoolOp { op, values }, pos))
    }

    fn not_test(&mut self) -> Result<Expr, ParseError> {
        let pos = self.ts.pos();
        if self.ts.eat(&Token::Not) {
            let operand = self.nested("operators", Self::not_test)?;
            return Ok(Expr::new(
                ExprKind::UnaryOp { op: UnaryOp::Not, operand: Box::new(operand) },
                pos,
            ));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let pos = self.ts.pos();
        let left = self.bitor()?;
        let mut ops = Vec::new();
        loop {
            let op = match self.ts.peek() {
                Token::Eq => CmpOp::Eq,
                Token::NotEq => CmpOp::NotEq,
                Token::Lt => CmpOp::Lt,
                Token::LtEq => CmpOp::LtE,
                Token::Gt => CmpOp::Gt,
                Token::GtEq => CmpOp::GtE,
                Token::In => CmpOp::In,
                Token::Not if matches!(self.ts.peek_nth(1), Token::In) => {
                    self.ts.advance();
                    CmpOp::NotIn
                }
                Token::Is if matches!(self.ts.peek_nth(1), Token::Not) => {
                    self.ts.advance();
                    CmpOp::IsNot
                }
                Token::Is => CmpOp::Is,
                _ => break,
            };
            self.ts.advance();
            ops.push((op, self.bitor()?));
        }
        if ops.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::new(ExprKind::Compare { left: Box::new(left), ops }, pos))
        }
    }

    /// Binary operators from `|` up to `*`/`/`.
    pub(super) fn bitor(&mut self) -> Result<Expr, ParseError> {
        self.binary(1)
    }

    fn binary(&mut self, min_power: u8) -> Result<Expr, ParseError> {
        let mut left = self.factor()?;
        while let Some((op, power)) = binary_op(self.ts.peek()) {
            if power < min_power {
                break;
            }
            self.ts.advance();
            let right = self.binary(power + 1)?;
            let pos = left.pos;
            left = Expr::new(
                ExprKind::BinOp { left: Box::new(left), op, right: Box::new(right) },
                pos,
            );
        }
        Ok(left)
    }

    fn factor(&mut self) -> Result<Expr, ParseError> {
        let pos = self.ts.pos();
        let op = match self.ts.peek() {
            Token::Minus => UnaryOp::Neg,
            Token::Plus => UnaryOp::Pos,
            Token::Tilde => UnaryOp::Invert,
            _ => return self.power(),
        };
        self.ts.advance();
        let operand = self.nested("operators", Self::factor)?;
        Ok(Expr::new(ExprKind::UnaryOp { op, operand: Box::new(operand) }, pos))
    }

    fn power(&mut self) -> Result<Expr, ParseError> {
        let pos = self.ts.pos();
        let base = if self.ts.eat(&Token::Await) {
            let inner = self.primary()?;
            Expr::new(ExprKind::Await(Box::new(inner)), pos)
        } else {
            self.primary()?
        };
        if self.ts.eat(&Token::DoubleStar) {
            let exponent = self.nested("operators", Self::factor)?;
            return Ok(Expr::new(
                ExprKind::BinOp { left: Box::new(base), op: BinOp::Pow, right: Box::new(exponent) },
                pos,
            ));
        }
        Ok(base)
    }

    /// Atom followed by calls, attribute accesses and subscripts.
    fn primary(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.atom()?;
        loop {
            let pos = expr.pos;
            match self.ts.peek() {
                Token::Dot => {
                    self.ts.advance();
                    let attr = self.ts.expect_name("an attribute name")?;
                    expr = Expr::new(ExprKind::Attribute { value: Box::new(expr), attr }, pos);
                }
                Token::LParen => {
                    self.ts.advance();
                    let args = self.nested("parentheses", Self::call_args)?;
                    self.ts.expect(Token::RParen, "')'")?;
                    expr = Expr::new(ExprKind::Call { func: Box::new(expr), args }, pos);
                }
                Token::LBracket => {
                    self.ts.advance();
                    let index = self.nested("parentheses", Self::subscript)?;
                    self.ts.expect(Token::RBracket, "']'")?;
                    expr = Expr::new(
                        ExprKind::Subscript { value: Box::new(expr), index: Box::new(index) },
                        pos,
                    );
                }
                _ => return Ok(expr),
            }
        }
    }

    fn call_args(&mut self) -> Result<Vec<Arg>, ParseError> {
        let mut args = Vec::new();
        while !self.ts.check(&Token::RParen) {
            if self.ts.eat(&Token::Star) {
                args.push(Arg::Star(self.test()?));
            } else if self.ts.eat(&Token::DoubleStar) {
                args.push(Arg::DoubleStar(self.test()?));
            } else if let (Token::Name(name), Token::Assign) = (self.ts.peek(), self.ts.peek_nth(1)) {
                self.ts.advance();
                self.ts.advance();
                args.push(Arg::Keyword(name.clone(), self.test()?));
            } else {
                let pos = self.ts.pos();
                let value = self.namedexpr_test()?;
                if self.ts.check(&Token::For) {
                    let generators = self.comprehension_clauses()?;
                    let comp = ExprKind::ListComp { elt: Box::new(value), generators };
                    args.push(Arg::Positional(Expr::new(comp, pos)));
                } else {
                    args.push(Arg::Positional(value));
                }
            }
            if !self.ts.eat(&Token::Comma) {
                break;
            }
        }
        Ok(args)
    }

    fn subscript(&mut self) -> Result<Expr, ParseError> {
        let pos = self.ts.pos();
        let first = self.slice_item()?;
        if !self.ts.check(&Token::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.ts.eat(&Token::Comma) {
            if self.ts.check(&Token::RBracket) {
                break;
            }
            items.push(self.slice_item()?);
        }
        Ok(Expr::new(ExprKind::Tuple(items), pos))
    }

    fn slice_item(&mut self) -> Result<Expr, ParseError> {
        let pos = self.ts.pos();
        let lower = if self.ts.check(&Token::Colon) {
            None
        } else {
            let value = self.namedexpr_test()?;
            if !self.ts.check(&Token::Colon) {
                return Ok(value);
            }
            Some(Box::new(value))
        };
        self.ts.expect(Token::Colon, "':'")?;
        let bound_end = |t: &Token| matches!(t, Token::Colon | Token::Comma | Token::RBracket);
        let upper = if bound_end(self.ts.peek()) {
            None
        } else {
            Some(Box::new(self.test()?))
        };
        let step = if self.ts.eat(&Token::Colon) && !bound_end(self.ts.peek()) {
            Some(Box::new(self.test()?))
        } else {
            None
        };
        Ok(Expr::new(ExprKind::Slice { lower, upper, step }, pos))
    }

    /// `for target in or_test (if or_test)*`, repeated.
    fn comprehension_clauses(&mut self) -> Result<Vec<Comprehension>, ParseError> {
        let mut generators = Vec::new();
        while self.ts.eat(&Token::For) {
            let target = self.target_list()?;
            self.ts.expect(Token::In, "'in'")?;
            let iter = self.or_test()?;
            let mut ifs = Vec::new();
            while self.ts.eat(&Token::If) {
                ifs.push(self.or_test()?);
            }
            generators.push(Comprehension { target, iter, ifs });
        }
        Ok(generators)
    }

    fn atom(&mut self) -> Result<Expr, ParseError> {
        let pos = self.ts.pos();
        let kind = match self.ts.peek() {
            Token::Name(name) => {
                self.ts.advance();
                ExprKind::Name(name.clone())
            }
            Token::Int(v) => {
                self.ts.advance();
                ExprKind::Constant(Constant::Int(*v))
            }
            Token::Float(v) => {
                self.ts.advance();
                ExprKind::Constant(Constant::Float(*v))
            }
            Token::NoneLit => {
                self.ts.advance();
                ExprKind::Constant(Constant::None)
            }
            Token::TrueLit => {
                self.ts.advance();
                ExprKind::Constant(Constant::Bool(true))
            }
            Token::FalseLit => {
                self.ts.advance();
                ExprKind::Constant(Constant::Bool(false))
            }
            Token::Str(_) => return self.strings(),
            Token::LParen => return self.nested("parentheses", Self::paren),
            Token::LBracket => return self.nested("parentheses", Self::list_display),
            Token::LBrace => return self.nested("parentheses", Self::dict_display),
            _ => return Err(self.ts.error_expected("an expression")),
        };
        Ok(Expr::new(kind, pos))
    }

    fn paren(&mut self) -> Result<Expr, ParseError> {
        let pos = self.ts.pos();
        self.ts.advance();
        if self.ts.eat(&Token::RParen) {
            return Ok(Expr::new(ExprKind::Tuple(Vec::new()), pos));
        }
        let first = self.star_or(|p| p.namedexpr_test())?;
        if self.ts.check(&Token::For) {
            let generators = self.comprehension_clauses()?;
            self.ts.expect(Token::RParen, "')'")?;
            return Ok(Expr::new(
                ExprKind::ListComp { elt: Box::new(first), generators },
                pos,
            ));
        }
        if self.ts.eat(&Token::RParen) {
            if matches!(first.kind, ExprKind::Starred(_)) {
                return Err(self.ts.error_at(first.pos, "cannot use starred expression here"));
            }
            return Ok(first);
        }
        let mut items = vec![first];
        while self.ts.eat(&Token::Comma) {
            if self.ts.check(&Token::RParen) {
                break;
            }
            items.push(self.star_or(|p| p.namedexpr_test())?);
        }
        self.ts.expect(Token::RParen, "')'")?;
        Ok(Expr::new(ExprKind::Tuple(items), pos))
    }

    fn list_display(&mut self) -> Result<Expr, ParseError> {
        let pos = self.ts.pos();
        self.ts.advance();
        if self.ts.eat(&Token::RBracket) {
            return Ok(Expr::new(ExprKind::List(Vec::new()), pos));
        }
        let first = self.star_or(|p| p.namedexpr_test())?;
        if self.ts.check(&Token::For) {
            let generators = self.comprehension_clauses()?;
            self.ts.expect(Token::RBracket, "']'")?;
            return Ok(Expr::new(
                ExprKind::ListComp { elt: Box::new(first), generators },
                pos,
            ));
        }
        let mut items = vec![first];
        while self.ts.eat(&Token::Comma) {
            if self.ts.check(&Token::RBracket) {
                break;
            }
            items.push(self.star_or(|p| p.namedexpr_test())?);
        }
        self.ts.expect(Token::RBracket, "']'")?;
        Ok(Expr::new(ExprKind::List(items), pos))
    }

    fn dict_display(&mut self) -> Result<Expr, ParseError> {
        let pos = self.ts.pos();
        self.ts.advance();
        if self.ts.eat(&Token::RBrace) {
            return Ok(Expr::new(ExprKind::Dict(Vec::new()), pos));
        }
        let key = self.test()?;
        if !self.ts.eat(&Token::Colon) {
            return Err(self.ts.error_at(key.pos, "set displays are not supported"));
        }
        let value = self.test()?;
        if self.ts.check(&Token::For) {
            let generators = self.comprehension_clauses()?;
            self.ts.expect(Token::RBrace, "'}'")?;
            return Ok(Expr::new(
                ExprKind::DictComp { key: Box::new(key), value: Box::new(value), generators },
                pos,
            ));
        }
        let mut entries = vec![(key, value)];
        while self.ts.eat(&Token::Comma) {
            if self.ts.check(&Token::RBrace) {
                break;
            }
            let key = self.test()?;
            self.ts.expect(Token::Colon, "':'")?;
            let value = self.test()?;
            entries.push((key, value));
        }
        self.ts.expect(Token::RBrace, "'}'")?;
        Ok(Expr::new(ExprKind::Dict(entries), pos))
    }

    /// One or more adjacent string literals, concatenated.
    fn strings(&mut self) -> Result<Expr, ParseError> {
        let pos = self.ts.pos();
        let mut literals: Vec<&StrLit> = Vec::new();
        while let Token::Str(lit) = self.ts.peek() {
            self.ts.advance();
            literals.push(lit);
        }

        if !literals.iter().any(|lit| lit.formatted) {
            let value: String = literals.iter().map(|lit| lit.value.as_str()).collect();
            return Ok(Expr::new(ExprKind::Constant(Constant::Str(value.into())), pos));
        }

        let mut parts: Vec<FStringPart> = Vec::new();
        for lit in literals {
            if lit.formatted {
                for part in fstring_parts(lit, pos)? {
                    push_part(&mut parts, part);
                }
            } else {
                push_part(&mut parts, FStringPart::Literal(lit.value.clone()));
            }
        }
        Ok(Expr::new(ExprKind::FString(parts), pos))
    }
}

fn push_part(parts: &mut Vec<FStringPart>, part: FStringPart) {
    if let FStringPart::Literal(text) = &part {
        if text.is_empty() {
            return;
        }
        if let Some(FStringPart::Literal(prev)) = parts.last_mut() {
            prev.push_str(text);
            return;
        }
    }
    parts.push(part);
}

fn fstring_error(pos: Pos, message: impl Into<String>) -> ParseError {
    ParseError::new(ParseErrorKind::InvalidSyntax, pos.line, pos.col, message)
}

/// Split an f-string body into literal and placeholder parts.
fn fstring_parts(lit: &StrLit, pos: Pos) -> Result<Vec<FStringPart>, ParseError> {
    let decode = |text: &str| -> Result<String, ParseError> {
        if lit.raw {
            Ok(text.to_string())
        } else {
            unescape(text).ok_or_else(|| fstring_error(pos, "invalid escape in f-string"))
        }
    };

    let body: Vec<char> = lit.value.chars().collect();
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut i = 0;
    while i < body.len() {
        let c = body[i];
        match c {
            '{' if body.get(i + 1) == Some(&'{') => {
                literal.push('{');
                i += 2;
            }
            '}' if body.get(i + 1) == Some(&'}') => {
                literal.push('}');
                i += 2;
            }
            '}' => return Err(fstring_error(pos, "f-string: single '}' is not allowed")),
            '{' => {
                if !literal.is_empty() {
                    parts.push(FStringPart::Literal(decode(&literal)?));
                    literal.clear();
                }
                let (part, next) = placeholder(&body, i + 1, pos)?;
                parts.push(part);
                i = next;
            }
            _ => {
                literal.push(c);
                i += 1;
            }
        }
    }
    if !literal.is_empty() {
        parts.push(FStringPart::Literal(decode(&literal)?));
    }
    Ok(parts)
}

/// Parse `expr[!conv][:spec]}` starting at `start`; returns the part and the
/// index just past the closing brace.
fn placeholder(body: &[char], start: usize, pos: Pos) -> Result<(FStringPart, usize), ParseError> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut expr_end = None;
    let mut conversion = None;
    let mut spec_start = None;
    let mut i = start;

    while i < body.len() {
        let c = body[i];
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match c {
            '\'' | '"' if spec_start.is_none() => quote = Some(c),
            '(' | '[' | '{' if spec_start.is_none() => depth += 1,
            ')' | ']' if depth > 0 => depth -= 1,
            '}' if depth > 0 && spec_start.is_none() => depth -= 1,
            '}' => {
                let end = expr_end.unwrap_or(i);
                let source: String = body[start..end].iter().collect();
                if source.trim().is_empty() {
                    return Err(fstring_error(pos, "f-string: empty expression not allowed"));
                }
                let expr = super::parse_expression_at(&source, pos)
                    .map_err(|e| fstring_error(pos, format!("f-string: {}", e.message)))?;
                let spec = spec_start.map(|s: usize| body[s..i].iter().collect());
                return Ok((FStringPart::Expr { expr, conversion, spec }, i + 1));
            }
            '!' if depth == 0 && spec_start.is_none() && body.get(i + 1) != Some(&'=') => {
                expr_end.get_or_insert(i);
                conversion = body.get(i + 1).copied();
                if !matches!(conversion, Some('r' | 's' | 'a')) {
                    return Err(fstring_error(pos, "f-string: invalid conversion character"));
                }
                i += 2;
                continue;
            }
            ':' if depth == 0 && spec_start.is_none() => {
                expr_end.get_or_insert(i);
                spec_start = Some(i + 1);
            }
            _ => {}
        }
        i += 1;
    }
    Err(fstring_error(pos, "f-string: expecting '}'"))
}
