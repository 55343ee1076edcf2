//! Token stream wrapper for the hand-written parser.

use crate::lang::ast::Pos;
use crate::lang::error::{ParseError, ParseErrorKind};
use crate::lang::lexer::{Tok, Token};

/// Token stream with lookahead and position tracking.
///
/// The token slice always ends in `EndOfFile`; peeking past the end keeps
/// returning that token.
pub(crate) struct TokenStream<'t> {
    tokens: &'t [Tok],
    pos: usize,
}

impl<'t> TokenStream<'t> {
    pub fn new(tokens: &'t [Tok]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn tok_at(&self, index: usize) -> &'t Tok {
        let tokens = self.tokens;
        &tokens[index.min(tokens.len() - 1)]
    }

    /// Current token without consuming it.
    pub fn peek(&self) -> &'t Token {
        &self.tok_at(self.pos).kind
    }

    /// Token `n` positions ahead of the current one.
    pub fn peek_nth(&self, n: usize) -> &'t Token {
        &self.tok_at(self.pos + n).kind
    }

    /// Consume the current token and return it.
    pub fn advance(&mut self) -> &'t Tok {
        let tok = self.tok_at(self.pos);
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    /// Whether the current token has the same kind as `expected` (payloads ignored).
    pub fn check(&self, expected: &Token) -> bool {
        std::mem::discriminant(self.peek()) == std::mem::discriminant(expected)
    }

    /// Consume the current token if it matches `expected`.
    pub fn eat(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Consume `expected` or fail with an "expected ..." error.
    pub fn expect(&mut self, expected: Token, what: &str) -> Result<&'t Tok, ParseError> {
        if self.check(&expected) {
            Ok(self.advance())
        } else {
            Err(self.error_expected(what))
        }
    }

    /// Consume an identifier.
    pub fn expect_name(&mut self, what: &str) -> Result<String, ParseError> {
        match self.peek() {
            Token::Name(name) => {
                self.advance();
                Ok(name.clone())
            }
            _ => Err(self.error_expected(what)),
        }
    }

    pub fn at_end(&self) -> bool {
        matches!(self.peek(), Token::EndOfFile)
    }

    /// Position of the current token.
    pub fn pos(&self) -> Pos {
        let tok = self.tok_at(self.pos);
        Pos::new(tok.line, tok.col)
    }

    /// "expected X, found Y" at the current token.
    pub fn error_expected(&self, what: &str) -> ParseError {
        let found = self.peek().describe();
        self.error_here(format!("expected {what}, found {found}"))
    }

    /// Error located at the current token.
    pub fn error_here(&self, message: impl Into<String>) -> ParseError {
        let tok = self.tok_at(self.pos);
        let kind = match tok.kind {
            Token::EndOfFile => ParseErrorKind::UnexpectedEof,
            Token::Indent | Token::Dedent => ParseErrorKind::Indentation,
            _ => ParseErrorKind::UnexpectedToken,
        };
        ParseError::new(kind, tok.line, tok.col, message)
    }

    /// Error located at an explicit position.
    pub fn error_at(&self, pos: Pos, message: impl Into<String>) -> ParseError {
        ParseError::new(ParseErrorKind::InvalidSyntax, pos.line, pos.col, message)
    }
}
