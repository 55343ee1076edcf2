//! The guest language: lexer, parser, syntax tree and traversal.

pub mod ast;
pub mod error;
pub mod lexer;
mod parser;
pub mod visit;

pub use error::{ParseError, ParseErrorKind};
pub use parser::{parse_expression, parse_module};

/// Reserved words, offered by completion and rejected as identifiers.
pub const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global",
    "if", "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return",
    "try", "while", "with",
];
