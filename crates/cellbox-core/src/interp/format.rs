//! `format()` specs, `str.format` and `%` formatting.

use std::iter::Peekable;
use std::rc::Rc;
use std::str::Chars;

use super::Interpreter;
use super::exception::{EvalResult, ExcKind, Unwind};
use super::ops::check_len;
use super::object::Args;
use super::value::{Value, format_float};

/// Parsed format specification:
/// `[[fill]align][sign][#][0][width][grouping][.precision][type]`.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatSpec {
    pub fill: char,
    pub align: Option<char>,
    pub sign: char,
    pub alternate: bool,
    pub zero: bool,
    pub width: usize,
    pub grouping: Option<char>,
    pub precision: Option<usize>,
    pub ty: Option<char>,
}

impl Default for FormatSpec {
    fn default() -> Self {
        Self {
            fill: ' ',
            align: None,
            sign: '-',
            alternate: false,
            zero: false,
            width: 0,
            grouping: None,
            precision: None,
            ty: None,
        }
    }
}

fn invalid_spec(spec: &str) -> Unwind {
    Unwind::value_error(format!("Invalid format specifier '{spec}'"))
}

fn read_number(chars: &mut Peekable<Chars<'_>>) -> Option<usize> {
    let mut digits = String::new();
    while let Some(c) = chars.peek().copied().filter(char::is_ascii_digit) {
        digits.push(c);
        chars.next();
    }
    digits.parse().ok()
}

impl FormatSpec {
    pub fn parse(spec: &str) -> EvalResult<Self> {
        let mut out = FormatSpec::default();
        let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');
        let chars: Vec<char> = spec.chars().collect();
        let mut rest = spec;
        if chars.len() >= 2 && is_align(chars[1]) {
            out.fill = chars[0];
            out.align = Some(chars[1]);
            rest = &spec[chars[0].len_utf8() + 1..];
        } else if chars.first().copied().is_some_and(is_align) {
            out.align = Some(chars[0]);
            rest = &spec[1..];
        }
        let mut it = rest.chars().peekable();
        if let Some(&c) = it.peek() {
            if matches!(c, '+' | '-' | ' ') {
                out.sign = c;
                it.next();
            }
        }
        if it.peek() == Some(&'#') {
            out.alternate = true;
            it.next();
        }
        if it.peek() == Some(&'0') {
            out.zero = true;
            it.next();
        }
        out.width = read_number(&mut it).unwrap_or(0);
        if let Some(&c) = it.peek() {
            if c == ',' || c == '_' {
                out.grouping = Some(c);
                it.next();
            }
        }
        if it.peek() == Some(&'.') {
            it.next();
            out.precision = Some(read_number(&mut it).ok_or_else(|| {
                Unwind::value_error("Format specifier missing precision")
            })?);
        }
        out.ty = it.next();
        if it.next().is_some() {
            return Err(invalid_spec(spec));
        }
        out.check_size()?;
        Ok(out)
    }

    /// Reject widths and precisions too large to render.
    fn check_size(&self) -> EvalResult<()> {
        check_len(self.width)?;
        check_len(self.precision.unwrap_or(0))?;
        Ok(())
    }

    /// Pad `sign_prefix + body` out to the requested width.
    fn pad(&self, sign_prefix: &str, body: &str, default_align: char) -> String {
        let len = sign_prefix.chars().count() + body.chars().count();
        if self.width <= len {
            return format!("{sign_prefix}{body}");
        }
        let n = self.width - len;
        let (align, fill) = match self.align {
            Some(align) => (align, self.fill),
            None if self.zero => ('=', '0'),
            None => (default_align, self.fill),
        };
        let fill_str = |count: usize| std::iter::repeat_n(fill, count).collect::<String>();
        match align {
            '<' => format!("{sign_prefix}{body}{}", fill_str(n)),
            '^' => format!("{}{sign_prefix}{body}{}", fill_str(n / 2), fill_str(n - n / 2)),
            '=' => format!("{sign_prefix}{}{body}", fill_str(n)),
            _ => format!("{}{sign_prefix}{body}", fill_str(n)),
        }
    }

    fn sign_str(&self, negative: bool) -> &'static str {
        match (negative, self.sign) {
            (true, _) => "-",
            (false, '+') => "+",
            (false, ' ') => " ",
            _ => "",
        }
    }
}

/// Insert `sep` every `every` digits, counting from the right.
fn group_digits(digits: &str, sep: char, every: usize) -> String {
    let chars: Vec<char> = digits.chars().collect();
    let mut out = String::with_capacity(chars.len() + chars.len() / every);
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % every == 0 {
            out.push(sep);
        }
        out.push(*c);
    }
    out
}

pub fn format_str(s: &str, spec: &FormatSpec) -> EvalResult<String> {
    if let Some(ty) = spec.ty.filter(|&t| t != 's') {
        return Err(Unwind::value_error(format!(
            "Unknown format code '{ty}' for object of type 'str'"
        )));
    }
    if spec.sign != '-' {
        return Err(Unwind::value_error("Sign not allowed in string format specifier"));
    }
    if spec.align == Some('=') {
        return Err(Unwind::value_error(
            "'=' alignment not allowed in string format specifier",
        ));
    }
    let body: String = match spec.precision {
        Some(p) => s.chars().take(p).collect(),
        None => s.to_string(),
    };
    Ok(spec.pad("", &body, '<'))
}

pub fn format_int(n: i64, spec: &FormatSpec) -> EvalResult<String> {
    let ty = spec.ty.unwrap_or('d');
    if matches!(ty, 'e' | 'E' | 'f' | 'F' | 'g' | 'G' | '%') {
        return format_float_spec(n as f64, spec);
    }
    if spec.precision.is_some() {
        return Err(Unwind::value_error(
            "Precision not allowed in integer format specifier",
        ));
    }
    let magnitude = n.unsigned_abs();
    let (prefix, digits, group_every) = match ty {
        'd' | 'n' => ("", magnitude.to_string(), 3),
        'b' => ("0b", format!("{magnitude:b}"), 4),
        'o' => ("0o", format!("{magnitude:o}"), 4),
        'x' => ("0x", format!("{magnitude:x}"), 4),
        'X' => ("0X", format!("{magnitude:X}"), 4),
        'c' => {
            let c = u32::try_from(n)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| Unwind::new(ExcKind::OverflowError, "%c arg not in range(0x110000)"))?;
            return Ok(spec.pad("", &c.to_string(), '<'));
        }
        other => {
            return Err(Unwind::value_error(format!(
                "Unknown format code '{other}' for object of type 'int'"
            )));
        }
    };
    let digits = match spec.grouping {
        Some(sep) => group_digits(&digits, sep, group_every),
        None => digits,
    };
    let prefix = if spec.alternate { prefix } else { "" };
    let sign_prefix = format!("{}{prefix}", spec.sign_str(n < 0));
    Ok(spec.pad(&sign_prefix, &digits, '>'))
}

/// Scientific notation with a signed two-digit exponent: `1.5e+03`.
fn exp_notation(x: f64, precision: usize, upper: bool) -> String {
    let s = format!("{x:.precision$e}");
    let (mantissa, exp) = s.split_once('e').unwrap_or((&s, "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let e = if upper { 'E' } else { 'e' };
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{mantissa}{e}{sign}{:02}", exp.unsigned_abs())
}

fn strip_fraction_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// The `g` presentation; `repr_style` keeps at least one fractional digit in
/// fixed notation, as formatting with a precision and no type does.
fn general(x: f64, precision: usize, alternate: bool, upper: bool, repr_style: bool) -> String {
    let p = precision.max(1);
    let exp = if x == 0.0 {
        0
    } else {
        let s = format!("{:.*e}", p - 1, x);
        s.split_once('e').and_then(|(_, e)| e.parse::<i32>().ok()).unwrap_or(0)
    };
    if -4 <= exp && exp < p as i32 {
        let decimals = (p as i32 - 1 - exp).max(0) as usize;
        let fixed = format!("{x:.decimals$}");
        let mut out = if alternate { fixed } else { strip_fraction_zeros(&fixed).to_string() };
        if repr_style && !out.contains('.') {
            out.push_str(".0");
        }
        out
    } else {
        let sci = exp_notation(x, p - 1, upper);
        if alternate {
            return sci;
        }
        let marker = if upper { 'E' } else { 'e' };
        match sci.split_once(marker) {
            Some((mantissa, exp)) => format!("{}{marker}{exp}", strip_fraction_zeros(mantissa)),
            None => sci,
        }
    }
}

pub fn format_float_spec(x: f64, spec: &FormatSpec) -> EvalResult<String> {
    let upper = spec.ty.is_some_and(|t| t.is_ascii_uppercase());
    let negative = x.is_sign_negative() && !x.is_nan();
    let abs = x.abs();
    let mut body = if !abs.is_finite() {
        let s = if abs.is_nan() { "nan" } else { "inf" };
        let s = if upper { s.to_uppercase() } else { s.to_string() };
        if spec.ty == Some('%') { format!("{s}%") } else { s }
    } else {
        match spec.ty {
            Some('f') | Some('F') => format!("{:.*}", spec.precision.unwrap_or(6), abs),
            Some('e') | Some('E') => exp_notation(abs, spec.precision.unwrap_or(6), upper),
            Some('g') | Some('G') => general(abs, spec.precision.unwrap_or(6), spec.alternate, upper, false),
            Some('%') => format!("{:.*}%", spec.precision.unwrap_or(6), abs * 100.0),
            None | Some('n') => match spec.precision {
                Some(p) => general(abs, p, spec.alternate, false, true),
                None => format_float(abs),
            },
            Some(other) => {
                return Err(Unwind::value_error(format!(
                    "Unknown format code '{other}' for object of type 'float'"
                )));
            }
        }
    };
    if let Some(sep) = spec.grouping {
        if abs.is_finite() {
            let split = body.find(|c: char| !c.is_ascii_digit()).unwrap_or(body.len());
            body = format!("{}{}", group_digits(&body[..split], sep, 3), &body[split..]);
        }
    }
    Ok(spec.pad(spec.sign_str(negative), &body, '>'))
}

impl Interpreter {
    /// `format(value, spec)`.
    pub(crate) async fn format_value(self: &Rc<Self>, value: &Value, spec: &str) -> EvalResult<String> {
        match value {
            Value::Instance(instance) => {
                if let Some(method) = instance.class.lookup("__format__") {
                    let bound = super::BoundMethod::new(value.clone(), method);
                    let result = self.call(&bound, Args::new(vec![Value::str(spec)])).await?;
                    return self.to_str(&result).await;
                }
            }
            Value::Str(s) => return format_str(s, &FormatSpec::parse(spec)?),
            Value::Int(n) if spec.is_empty() => return Ok(n.to_string()),
            Value::Int(n) => return format_int(*n, &FormatSpec::parse(spec)?),
            Value::Bool(b) if !spec.is_empty() => return format_int(*b as i64, &FormatSpec::parse(spec)?),
            Value::Float(f) if spec.is_empty() => return Ok(format_float(*f)),
            Value::Float(f) => return format_float_spec(*f, &FormatSpec::parse(spec)?),
            _ => {}
        }
        if !spec.is_empty() {
            return Err(Unwind::type_error(format!(
                "unsupported format string passed to {}.__format__",
                value.type_name()
            )));
        }
        self.to_str(value).await
    }

    /// `template.format(*args, **kwargs)`.
    pub(crate) async fn str_format(self: &Rc<Self>, template: &str, args: &Args) -> EvalResult<String> {
        let mut out = String::new();
        let mut auto_index = Some(0usize);
        let mut manual = false;
        let mut chars = template.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    out.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    out.push('}');
                }
                '}' => return Err(Unwind::value_error("Single '}' encountered in format string")),
                '{' => {
                    let mut field = String::new();
                    let mut depth = 1;
                    loop {
                        match chars.next() {
                            Some('{') => {
                                depth += 1;
                                field.push('{');
                            }
                            Some('}') => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                                field.push('}');
                            }
                            Some(c) => field.push(c),
                            None => {
                                return Err(Unwind::value_error(
                                    "expected '}' before end of string",
                                ));
                            }
                        }
                    }
                    let (name, conversion, spec) = split_field(&field)?;
                    let value = self.resolve_field(name, args, &mut auto_index, &mut manual).await?;
                    let value = match conversion {
                        Some('r') | Some('a') => Value::from(self.repr(&value).await?),
                        Some('s') => Value::from(self.to_str(&value).await?),
                        Some(other) => {
                            return Err(Unwind::value_error(format!(
                                "Unknown conversion specifier {other}"
                            )));
                        }
                        None => value,
                    };
                    let spec = if spec.contains('{') {
                        self.expand_nested_spec(spec, args, &mut auto_index, &mut manual).await?
                    } else {
                        spec.to_string()
                    };
                    out.push_str(&self.format_value(&value, &spec).await?);
                }
                c => out.push(c),
            }
        }
        Ok(out)
    }

    /// Replacement fields nested inside a format spec (`{:{width}}`).
    async fn expand_nested_spec(
        self: &Rc<Self>,
        spec: &str,
        args: &Args,
        auto_index: &mut Option<usize>,
        manual: &mut bool,
    ) -> EvalResult<String> {
        let mut out = String::new();
        let mut rest = spec;
        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let end = rest[start..]
                .find('}')
                .ok_or_else(|| Unwind::value_error("unmatched '{' in format spec"))?;
            let name = &rest[start + 1..start + end];
            let value = self.resolve_field(name, args, auto_index, manual).await?;
            out.push_str(&self.to_str(&value).await?);
            rest = &rest[start + end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }

    async fn resolve_field(
        self: &Rc<Self>,
        field: &str,
        args: &Args,
        auto_index: &mut Option<usize>,
        manual: &mut bool,
    ) -> EvalResult<Value> {
        let head_end = field.find(['.', '[']).unwrap_or(field.len());
        let head = &field[..head_end];
        let mut value = if head.is_empty() {
            if *manual {
                return Err(Unwind::value_error(
                    "cannot switch from manual field specification to automatic field numbering",
                ));
            }
            let index = auto_index.unwrap_or(0);
            *auto_index = Some(index + 1);
            positional_arg(args, index)?
        } else if let Ok(index) = head.parse::<usize>() {
            if auto_index.is_some_and(|i| i > 0) {
                return Err(Unwind::value_error(
                    "cannot switch from automatic field numbering to manual field specification",
                ));
            }
            *manual = true;
            positional_arg(args, index)?
        } else {
            args.keywords
                .get(head)
                .cloned()
                .ok_or_else(|| Unwind::key_error(Value::str(head)))?
        };
        let mut rest = &field[head_end..];
        while !rest.is_empty() {
            if let Some(after) = rest.strip_prefix('.') {
                let end = after.find(['.', '[']).unwrap_or(after.len());
                value = self.get_attr(&value, &after[..end])?;
                rest = &after[end..];
            } else if let Some(after) = rest.strip_prefix('[') {
                let end = after
                    .find(']')
                    .ok_or_else(|| Unwind::value_error("Missing ']' in format string"))?;
                let key = &after[..end];
                let key = match key.parse::<i64>() {
                    Ok(i) => Value::Int(i),
                    Err(_) => Value::str(key),
                };
                value = self.get_item(&value, &key).await?;
                rest = &after[end + 1..];
            } else {
                return Err(Unwind::value_error(
                    "Only '.' or '[' may follow ']' in format field specifier",
                ));
            }
        }
        Ok(value)
    }

    /// `template % values`.
    pub(crate) async fn percent_format(self: &Rc<Self>, template: &str, values: &Value) -> EvalResult<String> {
        let mapping = match values {
            Value::Dict(_) => Some(values.clone()),
            _ => None,
        };
        let positional: Vec<Value> = match values {
            Value::Tuple(items) => items.as_ref().clone(),
            other => vec![other.clone()],
        };
        let mut next = 0usize;
        let mut used_mapping = false;
        let mut out = String::new();
        let mut chars = template.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            let mut value = None;
            if chars.peek() == Some(&'(') {
                chars.next();
                let mut key = String::new();
                loop {
                    match chars.next() {
                        Some(')') => break,
                        Some(c) => key.push(c),
                        None => return Err(Unwind::value_error("incomplete format key")),
                    }
                }
                let map = mapping
                    .as_ref()
                    .ok_or_else(|| Unwind::type_error("format requires a mapping"))?;
                value = Some(self.get_item(map, &Value::from(key)).await?);
                used_mapping = true;
            }
            let mut spec = FormatSpec { align: Some('>'), ..FormatSpec::default() };
            while let Some(&flag) = chars.peek() {
                match flag {
                    '-' => spec.align = Some('<'),
                    '+' => spec.sign = '+',
                    ' ' if spec.sign != '+' => spec.sign = ' ',
                    ' ' => {}
                    '#' => spec.alternate = true,
                    '0' => spec.zero = true,
                    _ => break,
                }
                chars.next();
            }
            spec.width = read_number(&mut chars).unwrap_or(0);
            if chars.peek() == Some(&'.') {
                chars.next();
                spec.precision = Some(read_number(&mut chars).unwrap_or(0));
            }
            spec.check_size()?;
            let ty = chars
                .next()
                .ok_or_else(|| Unwind::value_error("incomplete format"))?;
            if ty == '%' {
                out.push('%');
                continue;
            }
            let value = match value {
                Some(value) => value,
                None => {
                    let value = if mapping.is_some() && positional.len() == 1 {
                        positional[0].clone()
                    } else {
                        positional.get(next).cloned().ok_or_else(|| {
                            Unwind::type_error("not enough arguments for format string")
                        })?
                    };
                    next += 1;
                    value
                }
            };
            if spec.zero && spec.align == Some('>') {
                spec.align = None;
            } else {
                spec.zero = false;
            }
            let rendered = match ty {
                's' => format_str(&self.to_str(&value).await?, &spec_for_text(&spec))?,
                'r' | 'a' => format_str(&self.repr(&value).await?, &spec_for_text(&spec))?,
                'd' | 'i' | 'u' => {
                    let n = match &value {
                        Value::Float(f) if f.is_finite() => f.trunc() as i64,
                        other => other.as_int().ok_or_else(|| {
                            Unwind::type_error(format!(
                                "%{ty} format: a real number is required, not {}",
                                other.type_name()
                            ))
                        })?,
                    };
                    let mut int_spec = spec.clone();
                    int_spec.precision = None;
                    format_int(n, &int_spec)?
                }
                'x' | 'X' | 'o' => {
                    let n = value.as_int().ok_or_else(|| {
                        Unwind::type_error(format!(
                            "%{ty} format: an integer is required, not {}",
                            value.type_name()
                        ))
                    })?;
                    format_int(n, &FormatSpec { ty: Some(ty), precision: None, ..spec.clone() })?
                }
                'c' => match &value {
                    Value::Str(s) if s.chars().count() == 1 => format_str(s, &spec_for_text(&spec))?,
                    other => {
                        let n = other
                            .as_int()
                            .ok_or_else(|| Unwind::type_error("%c requires int or char"))?;
                        format_int(n, &FormatSpec { ty: Some('c'), ..spec_for_text(&spec) })?
                    }
                },
                'f' | 'F' | 'e' | 'E' | 'g' | 'G' => {
                    let x = value.as_float().ok_or_else(|| {
                        Unwind::type_error(format!(
                            "must be real number, not {}",
                            value.type_name()
                        ))
                    })?;
                    let spec = FormatSpec {
                        ty: Some(ty),
                        precision: Some(spec.precision.unwrap_or(6)),
                        ..spec.clone()
                    };
                    format_float_spec(x, &spec)?
                }
                other => {
                    return Err(Unwind::value_error(format!(
                        "unsupported format character '{other}' (0x{:x})",
                        other as u32
                    )));
                }
            };
            out.push_str(&rendered);
        }
        if mapping.is_none() && !used_mapping && next < positional.len() {
            return Err(Unwind::type_error(
                "not all arguments converted during string formatting",
            ));
        }
        Ok(out)
    }
}

fn spec_for_text(spec: &FormatSpec) -> FormatSpec {
    FormatSpec {
        sign: '-',
        zero: false,
        ty: None,
        ..spec.clone()
    }
}

fn positional_arg(args: &Args, index: usize) -> EvalResult<Value> {
    args.get(index).cloned().ok_or_else(|| {
        Unwind::new(
            ExcKind::IndexError,
            format!("Replacement index {index} out of range for positional args tuple"),
        )
    })
}

/// Split `name!conv:spec` into its parts.
fn split_field(field: &str) -> EvalResult<(&str, Option<char>, &str)> {
    let mut bracket = false;
    for (i, c) in field.char_indices() {
        match c {
            '[' => bracket = true,
            ']' => bracket = false,
            '!' if !bracket => {
                let rest = &field[i + 1..];
                let mut it = rest.chars();
                let conversion = it.next();
                let after = it.as_str();
                let spec = match after.strip_prefix(':') {
                    Some(spec) => spec,
                    None if after.is_empty() => "",
                    None => {
                        return Err(Unwind::value_error(
                            "expected ':' after conversion specifier",
                        ));
                    }
                };
                return Ok((&field[..i], conversion, spec));
            }
            ':' if !bracket => return Ok((&field[..i], None, &field[i + 1..])),
            _ => {}
        }
    }
    Ok((field, None, ""))
}

#[cfg(test)]
mod tests {
    use super::super::testing::eval_repr;
    use super::*;

    fn fmt_float(x: f64, spec: &str) -> String {
        format_float_spec(x, &FormatSpec::parse(spec).unwrap()).unwrap()
    }

    fn fmt_int(n: i64, spec: &str) -> String {
        format_int(n, &FormatSpec::parse(spec).unwrap()).unwrap()
    }

    #[test]
    fn test_parse_spec() {
        let spec = FormatSpec::parse("*^+#012,.3f").unwrap();
        assert_eq!(spec.fill, '*');
        assert_eq!(spec.align, Some('^'));
        assert_eq!(spec.sign, '+');
        assert!(spec.alternate && spec.zero);
        assert_eq!(spec.width, 12);
        assert_eq!(spec.grouping, Some(','));
        assert_eq!(spec.precision, Some(3));
        assert_eq!(spec.ty, Some('f'));
        assert!(FormatSpec::parse("5dd").is_err());
    }

    #[test]
    fn test_integers() {
        assert_eq!(fmt_int(42, "5"), "   42");
        assert_eq!(fmt_int(42, "<5"), "42   ");
        assert_eq!(fmt_int(-42, "05"), "-0042");
        assert_eq!(fmt_int(255, "#x"), "0xff");
        assert_eq!(fmt_int(5, "b"), "101");
        assert_eq!(fmt_int(1234567, ","), "1,234,567");
        assert_eq!(fmt_int(7, "+"), "+7");
    }

    #[test]
    fn test_floats() {
        assert_eq!(fmt_float(3.14159, ".2f"), "3.14");
        assert_eq!(fmt_float(1234.5, ".2e"), "1.23e+03");
        assert_eq!(fmt_float(0.00001234, "g"), "1.234e-05");
        assert_eq!(fmt_float(1234.5, "g"), "1234.5");
        assert_eq!(fmt_float(1.0, ".3"), "1.0");
        assert_eq!(fmt_float(0.25, ".0%"), "25%");
        assert_eq!(fmt_float(1234567.891, ",.2f"), "1,234,567.89");
        assert_eq!(fmt_float(-1.5, "8.2f"), "   -1.50");
    }

    #[test]
    fn test_split_field() {
        assert_eq!(split_field("0!r:>5").unwrap(), ("0", Some('r'), ">5"));
        assert_eq!(split_field("a[x:y]:d").unwrap(), ("a[x:y]", None, "d"));
        assert_eq!(split_field("").unwrap(), ("", None, ""));
    }

    #[tokio::test]
    async fn test_fstrings_and_format_method() {
        assert_eq!(eval_repr("x = 3.14159\nf\"{x:.2f}|{x!r}|{'a':>3}\"").await, "'3.14|3.14159|  a'");
        assert_eq!(eval_repr("'{} {}'.format(1, 'b')").await, "'1 b'");
        assert_eq!(eval_repr("'{name}={0:03d}'.format(7, name='n')").await, "'n=007'");
        assert_eq!(eval_repr("'{0[1]} {{x}}'.format([5, 6])").await, "'6 {x}'");
        assert_eq!(eval_repr("'{:{w}}|'.format('a', w=3)").await, "'a  |'");
        assert_eq!(eval_repr("'{2}'.format(1)").await, "!IndexError");
    }

    #[tokio::test]
    async fn test_percent_formatting() {
        assert_eq!(eval_repr("'%s is %d years' % ('Bo', 7)").await, "'Bo is 7 years'");
        assert_eq!(eval_repr("'%5.1f%%' % 12.345").await, "' 12.3%'");
        assert_eq!(eval_repr("'%(a)s-%(b)r' % {'a': 1, 'b': 'x'}").await, "\"1-'x'\"");
        assert_eq!(eval_repr("'%-4s|%04d' % ('ab', 5)").await, "'ab  |0005'");
        assert_eq!(eval_repr("'%s %s' % (1,)").await, "!TypeError");
        assert_eq!(eval_repr("'%s' % (1, 2)").await, "!TypeError");
    }
}
