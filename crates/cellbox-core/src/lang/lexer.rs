//! Lexical analysis for the guest language.
//!
//! Raw tokens come from a `logos` lexer; a layout pass then turns line breaks
//! and leading whitespace into `Newline`/`Indent`/`Dedent` tokens the way an
//! indentation-structured language needs. Line breaks inside brackets are
//! ignored, as are blank and comment-only lines.

use std::ops::Range;

use logos::Logos;

use super::error::{ParseError, ParseErrorKind};

/// A string literal as written in source.
#[derive(Debug, Clone, PartialEq)]
pub struct StrLit {
    /// Decoded value. For f-strings this is the raw body, decoded later by the parser.
    pub value: String,
    /// `f"..."` literal.
    pub formatted: bool,
    /// `r"..."` literal (no escape processing).
    pub raw: bool,
}

/// Guest language token.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\f]+")]
#[logos(skip r"#[^\n]*")]
#[logos(skip r"\\\r?\n")]
pub enum Token {
    // === Keywords ===
    #[token("False")]
    FalseLit,
    #[token("None")]
    NoneLit,
    #[token("True")]
    TrueLit,
    #[token("and")]
    And,
    #[token("as")]
    As,
    #[token("assert")]
    Assert,
    #[token("async")]
    Async,
    #[token("await")]
    Await,
    #[token("break")]
    Break,
    #[token("class")]
    Class,
    #[token("continue")]
    Continue,
    #[token("def")]
    Def,
    #[token("del")]
    Del,
    #[token("elif")]
    Elif,
    #[token("else")]
    Else,
    #[token("except")]
    Except,
    #[token("finally")]
    Finally,
    #[token("for")]
    For,
    #[token("from")]
    From,
    #[token("global")]
    Global,
    #[token("if")]
    If,
    #[token("import")]
    Import,
    #[token("in")]
    In,
    #[token("is")]
    Is,
    #[token("lambda")]
    Lambda,
    #[token("nonlocal")]
    Nonlocal,
    #[token("not")]
    Not,
    #[token("or")]
    Or,
    #[token("pass")]
    Pass,
    #[token("raise")]
    Raise,
    #[token("return")]
    Return,
    #[token("try")]
    Try,
    #[token("while")]
    While,
    #[token("with")]
    With,

    // === Literals and names ===
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Name(String),

    #[regex(r"[0-9][0-9_]*", |lex| parse_int(lex.slice(), 10))]
    #[regex(r"0[xX][0-9a-fA-F_]+", |lex| parse_int(&lex.slice()[2..], 16))]
    #[regex(r"0[oO][0-7_]+", |lex| parse_int(&lex.slice()[2..], 8))]
    #[regex(r"0[bB][01_]+", |lex| parse_int(&lex.slice()[2..], 2))]
    Int(i64),

    #[regex(r"[0-9][0-9_]*\.[0-9_]*([eE][+-]?[0-9]+)?", |lex| parse_float(lex.slice()))]
    #[regex(r"\.[0-9][0-9_]*([eE][+-]?[0-9]+)?", |lex| parse_float(lex.slice()))]
    #[regex(r"[0-9][0-9_]*[eE][+-]?[0-9]+", |lex| parse_float(lex.slice()))]
    Float(f64),

    #[regex(r#"[rRfFbBuU]{0,2}"([^"\\\n]|\\(.|\n))*""#, |lex| lex_string(lex.slice()))]
    #[regex(r#"[rRfFbBuU]{0,2}'([^'\\\n]|\\(.|\n))*'"#, |lex| lex_string(lex.slice()))]
    #[regex(r#"[rRfFbBuU]{0,2}"""([^"\\]|\\(.|\n)|"[^"\\]|""[^"\\])*""""#, |lex| lex_string(lex.slice()))]
    #[regex(r#"[rRfFbBuU]{0,2}'''([^'\\]|\\(.|\n)|'[^'\\]|''[^'\\])*'''"#, |lex| lex_string(lex.slice()))]
    Str(StrLit),

    // === Layout ===
    /// Physical line break; carries the indentation width of the next line.
    #[regex(r"\r?\n[ \t]*", |lex| indent_width(lex.slice()))]
    Newline(usize),
    Indent,
    Dedent,
    EndOfFile,

    // === Operators ===
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("**")]
    DoubleStar,
    #[token("/")]
    Slash,
    #[token("//")]
    DoubleSlash,
    #[token("%")]
    Percent,
    #[token("@")]
    At,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("~")]
    Tilde,
    #[token("<<")]
    LShift,
    #[token(">>")]
    RShift,
    #[token("=")]
    Assign,
    #[token("+=")]
    PlusAssign,
    #[token("-=")]
    MinusAssign,
    #[token("*=")]
    StarAssign,
    #[token("/=")]
    SlashAssign,
    #[token("//=")]
    DoubleSlashAssign,
    #[token("%=")]
    PercentAssign,
    #[token("**=")]
    DoubleStarAssign,
    #[token("&=")]
    AmpAssign,
    #[token("|=")]
    PipeAssign,
    #[token("^=")]
    CaretAssign,
    #[token("<<=")]
    LShiftAssign,
    #[token(">>=")]
    RShiftAssign,
    #[token(":=")]
    Walrus,
    #[token("==")]
    Eq,
    #[token("!=")]
    NotEq,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("<=")]
    LtEq,
    #[token(">=")]
    GtEq,
    #[token("->")]
    Arrow,

    // === Delimiters ===
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token(";")]
    Semicolon,
    #[token(".")]
    Dot,
}

impl Token {
    /// Short human-readable description used in parse errors.
    pub fn describe(&self) -> String {
        match self {
            Token::Name(name) => format!("name '{name}'"),
            Token::Int(v) => format!("integer {v}"),
            Token::Float(v) => format!("number {v}"),
            Token::Str(_) => "string literal".to_string(),
            Token::Newline(_) => "end of line".to_string(),
            Token::Indent => "indent".to_string(),
            Token::Dedent => "dedent".to_string(),
            Token::EndOfFile => "end of input".to_string(),
            other => format!("{other:?}"),
        }
    }
}

fn parse_int(digits: &str, radix: u32) -> Option<i64> {
    let cleaned: String = digits.chars().filter(|c| *c != '_').collect();
    i64::from_str_radix(&cleaned, radix).ok()
}

fn parse_float(text: &str) -> Option<f64> {
    let cleaned: String = text.chars().filter(|c| *c != '_').collect();
    cleaned.parse::<f64>().ok()
}

fn indent_width(slice: &str) -> usize {
    let mut width = 0;
    for c in slice.chars().skip_while(|c| *c == '\r' || *c == '\n') {
        match c {
            '\t' => width = (width / 8 + 1) * 8,
            _ => width += 1,
        }
    }
    width
}

fn lex_string(slice: &str) -> Option<StrLit> {
    let prefix_len = slice
        .find(['"', '\''])
        .unwrap_or(0);
    let prefix = slice[..prefix_len].to_ascii_lowercase();
    let formatted = prefix.contains('f');
    let raw = prefix.contains('r');
    if prefix.contains('b') && formatted {
        return None;
    }

    let rest = &slice[prefix_len..];
    let quote_len = if rest.starts_with("\"\"\"") || rest.starts_with("'''") {
        3
    } else {
        1
    };
    let body = &rest[quote_len..rest.len() - quote_len];

    let value = if raw || formatted {
        body.to_string()
    } else {
        unescape(body)?
    };
    Some(StrLit {
        value,
        formatted,
        raw,
    })
}

/// Decode backslash escapes in a string body.
pub(crate) fn unescape(body: &str) -> Option<String> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(next) = chars.next() else {
            out.push('\\');
            break;
        };
        match next {
            '\n' => {}
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            '0' => out.push('\0'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'v' => out.push('\x0b'),
            'x' => {
                let hex: String = (0..2).filter_map(|_| chars.next()).collect();
                let code = u32::from_str_radix(&hex, 16).ok()?;
                out.push(char::from_u32(code)?);
            }
            'u' => {
                let hex: String = (0..4).filter_map(|_| chars.next()).collect();
                let code = u32::from_str_radix(&hex, 16).ok()?;
                out.push(char::from_u32(code)?);
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    Some(out)
}

/// A token with its source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Tok {
    pub kind: Token,
    /// Byte range in the original source.
    pub span: Range<usize>,
    /// 1-indexed line.
    pub line: u32,
    /// 1-indexed column (in characters).
    pub col: u32,
}

/// Maps byte offsets to line/column positions.
pub(crate) struct LineIndex<'src> {
    source: &'src str,
    starts: Vec<usize>,
}

impl<'src> LineIndex<'src> {
    pub(crate) fn new(source: &'src str) -> Self {
        let mut starts = vec![0];
        starts.extend(source.match_indices('\n').map(|(i, _)| i + 1));
        Self { source, starts }
    }

    pub(crate) fn position(&self, offset: usize) -> (u32, u32) {
        let line = match self.starts.binary_search(&offset) {
            Ok(idx) => idx,
            Err(idx) => idx - 1,
        };
        let start = self.starts[line];
        let end = offset.min(self.source.len());
        let col = self
            .source
            .get(start..end)
            .map(|s| s.chars().count())
            .unwrap_or(0);
        (line as u32 + 1, col as u32 + 1)
    }
}

/// Tokenize source into a layout-resolved token stream ending in `EndOfFile`.
pub fn tokenize(source: &str) -> Result<Vec<Tok>, ParseError> {
    // A leading line break lets the first line's indentation go through the
    // same path as every other line.
    let padded = format!("\n{source}");
    let index = LineIndex::new(source);
    let mut lexer = Token::lexer(&padded);

    let mut out: Vec<Tok> = Vec::new();
    let mut indents = vec![0usize];
    let mut depth = 0usize;
    let mut pending_indent: Option<(usize, usize)> = None;

    let make = |kind: Token, start: usize, end: usize| {
        let (line, col) = index.position(start);
        Tok {
            kind,
            span: start..end,
            line,
            col,
        }
    };

    while let Some(result) = lexer.next() {
        let span = lexer.span();
        let start = span.start.saturating_sub(1);
        let end = span.end.saturating_sub(1);

        let token = match result {
            Ok(token) => token,
            Err(()) => {
                let (line, col) = index.position(start);
                let found = source.get(start..end).unwrap_or_default();
                let message = if found.starts_with(['"', '\'']) {
                    "unterminated string literal".to_string()
                } else {
                    format!("invalid token '{found}'")
                };
                return Err(ParseError::new(ParseErrorKind::InvalidToken, line, col, message));
            }
        };

        if let Token::Newline(width) = token {
            if depth == 0 {
                pending_indent = Some((width, start));
            }
            continue;
        }

        if let Some((width, at)) = pending_indent.take() {
            if out
                .last()
                .is_some_and(|t| !matches!(t.kind, Token::Newline(_) | Token::Indent | Token::Dedent))
            {
                out.push(make(Token::Newline(0), at, at));
            }
            let top = *indents.last().unwrap_or(&0);
            if width > top {
                indents.push(width);
                out.push(make(Token::Indent, start, start));
            } else if width < top {
                while indents.last().is_some_and(|&w| w > width) {
                    indents.pop();
                    out.push(make(Token::Dedent, start, start));
                }
                if indents.last() != Some(&width) {
                    let (line, col) = index.position(start);
                    return Err(ParseError::new(
                        ParseErrorKind::Indentation,
                        line,
                        col,
                        "unindent does not match any outer indentation level",
                    ));
                }
            }
        }

        match token {
            Token::LParen | Token::LBracket | Token::LBrace => depth += 1,
            Token::RParen | Token::RBracket | Token::RBrace => depth = depth.saturating_sub(1),
            _ => {}
        }
        out.push(make(token, start, end));
    }

    let eof = source.len();
    if out
        .last()
        .is_some_and(|t| !matches!(t.kind, Token::Newline(_) | Token::Dedent))
    {
        out.push(make(Token::Newline(0), eof, eof));
    }
    while indents.len() > 1 {
        indents.pop();
        out.push(make(Token::Dedent, eof, eof));
    }
    out.push(make(Token::EndOfFile, eof, eof));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_simple_assignment() {
        assert_eq!(
            kinds("x = 1"),
            vec![
                Token::Name("x".into()),
                Token::Assign,
                Token::Int(1),
                Token::Newline(0),
                Token::EndOfFile
            ]
        );
    }

    #[test]
    fn test_indent_and_dedent() {
        let toks = kinds("if x:\n    y = 1\nz = 2\n");
        assert!(toks.contains(&Token::Indent));
        assert!(toks.contains(&Token::Dedent));
        let indent_pos = toks.iter().position(|t| *t == Token::Indent).unwrap();
        let dedent_pos = toks.iter().position(|t| *t == Token::Dedent).unwrap();
        assert!(indent_pos < dedent_pos);
    }

    #[test]
    fn test_newlines_inside_brackets_are_ignored() {
        let toks = kinds("x = [\n  1,\n  2,\n]\n");
        let newlines = toks
            .iter()
            .filter(|t| matches!(t, Token::Newline(_)))
            .count();
        assert_eq!(newlines, 1);
        assert!(!toks.contains(&Token::Indent));
    }

    #[test]
    fn test_blank_and_comment_lines() {
        let toks = kinds("a = 1\n\n   # comment\n\nb = 2");
        let newlines = toks
            .iter()
            .filter(|t| matches!(t, Token::Newline(_)))
            .count();
        assert_eq!(newlines, 2);
        assert!(!toks.contains(&Token::Indent));
    }

    #[test]
    fn test_string_escapes_and_prefixes() {
        let toks = kinds(r#"s = "a\tb" + r"\n" + f"{x}""#);
        let strings: Vec<&StrLit> = toks
            .iter()
            .filter_map(|t| match t {
                Token::Str(s) => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(strings[0].value, "a\tb");
        assert_eq!(strings[1].value, "\\n");
        assert!(strings[1].raw);
        assert!(strings[2].formatted);
        assert_eq!(strings[2].value, "{x}");
    }

    #[test]
    fn test_triple_quoted_string() {
        let toks = kinds("doc = \"\"\"line one\nline two\"\"\"\n");
        assert!(toks.iter().any(|t| matches!(t, Token::Str(s) if s.value == "line one\nline two")));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(kinds("0x1F")[0], Token::Int(31));
        assert_eq!(kinds("1_000")[0], Token::Int(1000));
        assert_eq!(kinds("2.5")[0], Token::Float(2.5));
        assert_eq!(kinds("1e3")[0], Token::Float(1000.0));
    }

    #[test]
    fn test_positions() {
        let toks = tokenize("a = 1\nbb = 2").unwrap();
        let bb = toks
            .iter()
            .find(|t| t.kind == Token::Name("bb".into()))
            .unwrap();
        assert_eq!((bb.line, bb.col), (2, 1));
        assert_eq!(bb.span, 6..8);
    }

    #[test]
    fn test_bad_dedent_is_an_error() {
        let err = tokenize("if x:\n    a = 1\n  b = 2\n").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Indentation);
    }

    #[test]
    fn test_unterminated_string_is_an_error() {
        assert!(tokenize("x = 'abc").is_err());
    }
}
