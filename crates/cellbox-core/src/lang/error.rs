//! Parse error types.

use std::fmt;

/// Parse error with source location.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    /// Kind of parse error.
    pub kind: ParseErrorKind,
    /// 1-indexed line.
    pub line: u32,
    /// 1-indexed column.
    pub col: u32,
    /// Human-readable message.
    pub message: String,
}

/// Category of parse error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Character sequence that is not a token.
    InvalidToken,
    /// Unexpected token (found X, expected Y).
    UnexpectedToken,
    /// Unexpected end of input.
    UnexpectedEof,
    /// Inconsistent or unexpected indentation.
    Indentation,
    /// Syntactically well-formed tokens in an invalid arrangement.
    InvalidSyntax,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, line: u32, col: u32, message: impl Into<String>) -> Self {
        Self {
            kind,
            line,
            col,
            message: message.into(),
        }
    }

    /// Name of the guest exception this error surfaces as.
    pub fn exception_name(&self) -> &'static str {
        match self.kind {
            ParseErrorKind::Indentation => "IndentationError",
            _ => "SyntaxError",
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (line {}, column {})", self.message, self.line, self.col)
    }
}

impl std::error::Error for ParseError {}

impl From<ParseError> for crate::error::Error {
    fn from(e: ParseError) -> Self {
        crate::error::Error::Parse(e.to_string())
    }
}
