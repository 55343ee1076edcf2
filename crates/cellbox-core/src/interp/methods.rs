//! Methods of built-in values: `str`, `list`, `dict`, `tuple`, streams, tasks.
//!
//! Every method receives its receiver as the first positional argument, so
//! the same table serves `"x".upper()` and `str.upper("x")`.

use std::cmp::Ordering;
use std::rc::Rc;

use futures::future::LocalBoxFuture;

use super::Interpreter;
use super::exception::{EvalResult, ExcKind, Unwind};
use super::object::{Args, NativeFunction};
use super::ops::{check_len, normalize_index};
use super::value::{BuiltinType, Dict, Value, compare_values, values_equal};
use crate::lang::ast::CmpOp;
use crate::sandbox::protocol::StreamKind;

fn find_in(table: &'static [NativeFunction], name: &str) -> Option<&'static NativeFunction> {
    table.iter().find(|native| native.name == name)
}

fn table_for(value: &Value) -> Option<&'static [NativeFunction]> {
    Some(match value {
        Value::Str(_) => STR_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Tuple(_) => TUPLE_METHODS,
        Value::Stream(_) => STREAM_METHODS,
        Value::Task(_) => TASK_METHODS,
        _ => return None,
    })
}

fn table_for_type(ty: BuiltinType) -> Option<&'static [NativeFunction]> {
    Some(match ty {
        BuiltinType::Str => STR_METHODS,
        BuiltinType::List => LIST_METHODS,
        BuiltinType::Dict => DICT_METHODS,
        BuiltinType::Tuple => TUPLE_METHODS,
        _ => return None,
    })
}

pub(crate) fn for_value(value: &Value, name: &str) -> Option<&'static NativeFunction> {
    table_for(value).and_then(|table| find_in(table, name))
}

pub(crate) fn for_type(ty: BuiltinType, name: &str) -> Option<&'static NativeFunction> {
    table_for_type(ty).and_then(|table| find_in(table, name))
}

pub(crate) fn names_for_value(value: &Value) -> Vec<&'static str> {
    table_for(value).map_or_else(Vec::new, |table| table.iter().map(|n| n.name).collect())
}

pub(crate) fn names_for_type(ty: BuiltinType) -> Vec<&'static str> {
    table_for_type(ty).map_or_else(Vec::new, |table| table.iter().map(|n| n.name).collect())
}

/// Check the argument count after the receiver.
fn expect_args(args: &Args, name: &str, min: usize, max: usize) -> EvalResult<()> {
    args.no_keywords(name)?;
    let n = args.len().saturating_sub(1);
    if n < min || n > max {
        let expected = match (min == max, n < min) {
            (true, _) => format!("exactly {min}"),
            (false, true) => format!("at least {min}"),
            (false, false) => format!("at most {max}"),
        };
        let plural = if min == max && min == 1 { "" } else { "s" };
        return Err(Unwind::type_error(format!(
            "{name}() takes {expected} argument{plural} ({n} given)"
        )));
    }
    Ok(())
}

fn receiver_error(name: &str, ty: &str, got: Option<&Value>) -> Unwind {
    Unwind::type_error(format!(
        "descriptor '{name}' for '{ty}' objects doesn't apply to a '{}' object",
        got.map_or_else(|| "NoneType".to_string(), Value::type_name)
    ))
}

fn recv_str(args: &Args, name: &str) -> EvalResult<Rc<str>> {
    match args.get(0) {
        Some(Value::Str(s)) => Ok(s.clone()),
        other => Err(receiver_error(name, "str", other)),
    }
}

fn recv_list(args: &Args, name: &str) -> EvalResult<Rc<std::cell::RefCell<Vec<Value>>>> {
    match args.get(0) {
        Some(Value::List(items)) => Ok(items.clone()),
        other => Err(receiver_error(name, "list", other)),
    }
}

fn recv_dict(args: &Args, name: &str) -> EvalResult<Rc<std::cell::RefCell<Dict>>> {
    match args.get(0) {
        Some(Value::Dict(dict)) => Ok(dict.clone()),
        other => Err(receiver_error(name, "dict", other)),
    }
}

fn str_arg(args: &Args, index: usize, name: &str) -> EvalResult<Option<Rc<str>>> {
    match args.get(index) {
        None | Some(Value::None) => Ok(None),
        Some(Value::Str(s)) => Ok(Some(s.clone())),
        Some(other) => Err(Unwind::type_error(format!(
            "{name}() argument must be str or None, not {}",
            other.type_name()
        ))),
    }
}

fn required_str(args: &Args, index: usize, name: &str) -> EvalResult<Rc<str>> {
    match args.get(index) {
        Some(Value::Str(s)) => Ok(s.clone()),
        other => Err(Unwind::type_error(format!(
            "{name}() argument must be str, not {}",
            other.map_or_else(|| "NoneType".to_string(), Value::type_name)
        ))),
    }
}

fn int_arg(args: &Args, index: usize, default: i64, name: &str) -> EvalResult<i64> {
    match args.get(index) {
        None => Ok(default),
        Some(value) => value.as_int().ok_or_else(|| {
            Unwind::type_error(format!(
                "{name}() argument must be int, not {}",
                value.type_name()
            ))
        }),
    }
}

fn char_index(s: &str, byte: usize) -> i64 {
    s[..byte].chars().count() as i64
}

// str

fn strip_with(s: &str, chars: Option<&str>, left: bool, right: bool) -> String {
    let matches = |c: char| match chars {
        Some(set) => set.contains(c),
        None => c.is_whitespace(),
    };
    let mut out = s;
    if left {
        out = out.trim_start_matches(matches);
    }
    if right {
        out = out.trim_end_matches(matches);
    }
    out.to_string()
}

fn split_whitespace_n(s: &str, maxsplit: i64) -> Vec<Value> {
    let mut parts = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if maxsplit >= 0 && parts.len() as i64 == maxsplit {
            parts.push(Value::str(rest));
            break;
        }
        match rest.find(char::is_whitespace) {
            Some(end) => {
                parts.push(Value::str(&rest[..end]));
                rest = rest[end..].trim_start();
            }
            None => {
                parts.push(Value::str(rest));
                break;
            }
        }
    }
    parts
}

fn str_split(_: &Rc<Interpreter>, mut args: Args, reverse: bool) -> EvalResult {
    let name = if reverse { "rsplit" } else { "split" };
    let sep = args.take(1, "sep");
    let maxsplit = args.take(2, "maxsplit");
    let s = recv_str(&args, name)?;
    let maxsplit = maxsplit.and_then(|v| v.as_int()).unwrap_or(-1);
    let parts: Vec<Value> = match sep {
        None | Some(Value::None) => {
            if reverse && maxsplit >= 0 {
                let reversed: String = s.chars().rev().collect();
                let mut parts: Vec<Value> = split_whitespace_n(&reversed, maxsplit)
                    .iter()
                    .filter_map(|v| v.as_str().map(|p| Value::from(p.chars().rev().collect::<String>())))
                    .collect();
                parts.reverse();
                parts
            } else {
                split_whitespace_n(&s, maxsplit)
            }
        }
        Some(Value::Str(sep)) => {
            if sep.is_empty() {
                return Err(Unwind::value_error("empty separator"));
            }
            match (maxsplit >= 0, reverse) {
                (false, _) => s.split(sep.as_ref()).map(Value::str).collect(),
                (true, false) => s.splitn(maxsplit as usize + 1, sep.as_ref()).map(Value::str).collect(),
                (true, true) => {
                    let mut parts: Vec<Value> =
                        s.rsplitn(maxsplit as usize + 1, sep.as_ref()).map(Value::str).collect();
                    parts.reverse();
                    parts
                }
            }
        }
        Some(other) => {
            return Err(Unwind::type_error(format!(
                "must be str or None, not {}",
                other.type_name()
            )));
        }
    };
    Ok(Value::list(parts))
}

fn str_find(args: &Args, name: &str, reverse: bool) -> EvalResult<i64> {
    expect_args(args, name, 1, 1)?;
    let s = recv_str(args, name)?;
    let sub = required_str(args, 1, name)?;
    let found = if reverse { s.rfind(sub.as_ref()) } else { s.find(sub.as_ref()) };
    Ok(found.map_or(-1, |byte| char_index(&s, byte)))
}

fn affix_match(args: &Args, name: &str, test: fn(&str, &str) -> bool) -> EvalResult {
    expect_args(args, name, 1, 1)?;
    let s = recv_str(args, name)?;
    let candidates = match args.get(1) {
        Some(Value::Str(p)) => vec![p.clone()],
        Some(Value::Tuple(items)) => items
            .iter()
            .map(|item| match item {
                Value::Str(p) => Ok(p.clone()),
                other => Err(Unwind::type_error(format!(
                    "tuple for {name} must only contain str, not {}",
                    other.type_name()
                ))),
            })
            .collect::<EvalResult<Vec<_>>>()?,
        other => {
            return Err(Unwind::type_error(format!(
                "{name} first arg must be str or a tuple of str, not {}",
                other.map_or_else(|| "NoneType".to_string(), Value::type_name)
            )));
        }
    };
    Ok(Value::Bool(candidates.iter().any(|p| test(&s, p))))
}

fn char_class(args: &Args, name: &str, test: fn(char) -> bool) -> EvalResult {
    expect_args(args, name, 0, 0)?;
    let s = recv_str(args, name)?;
    Ok(Value::Bool(!s.is_empty() && s.chars().all(test)))
}

fn justify(args: &Args, name: &str, align: char) -> EvalResult {
    expect_args(args, name, 1, 2)?;
    let s = recv_str(args, name)?;
    let width = check_len(int_arg(args, 1, 0, name)?.max(0) as usize)?;
    let fill = match args.get(2) {
        None => ' ',
        Some(Value::Str(f)) if f.chars().count() == 1 => f.chars().next().unwrap_or(' '),
        Some(_) => {
            return Err(Unwind::type_error(
                "The fill character must be exactly one character long",
            ));
        }
    };
    let len = s.chars().count();
    if width <= len {
        return Ok(Value::Str(s));
    }
    let n = width - len;
    let pad = |count: usize| std::iter::repeat_n(fill, count).collect::<String>();
    let out = match align {
        '<' => format!("{s}{}", pad(n)),
        '>' => format!("{}{s}", pad(n)),
        _ => {
            let left = n / 2 + (n & width & 1);
            format!("{}{s}{}", pad(left), pad(n - left))
        }
    };
    Ok(Value::from(out))
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_cased = false;
    for c in s.chars() {
        if prev_cased {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        prev_cased = c.is_alphabetic();
    }
    out
}

fn str_join(interp: Rc<Interpreter>, args: Args) -> LocalBoxFuture<'static, EvalResult> {
    Box::pin(async move {
        expect_args(&args, "join", 1, 1)?;
        let sep = recv_str(&args, "join")?;
        let items = interp.collect(&args.positional[1]).await?;
        let mut parts = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            match item {
                Value::Str(s) => parts.push(s.to_string()),
                other => {
                    return Err(Unwind::type_error(format!(
                        "sequence item {i}: expected str instance, {} found",
                        other.type_name()
                    )));
                }
            }
        }
        Ok(Value::from(parts.join(&sep)))
    })
}

fn str_format(interp: Rc<Interpreter>, mut args: Args) -> LocalBoxFuture<'static, EvalResult> {
    Box::pin(async move {
        let template = recv_str(&args, "format")?;
        args.positional.remove(0);
        Ok(Value::from(interp.str_format(&template, &args).await?))
    })
}

static STR_METHODS: &[NativeFunction] = &[
    NativeFunction::sync("upper", "()", "Return a copy of the string converted to uppercase.", |_, args| {
        expect_args(&args, "upper", 0, 0)?;
        Ok(Value::from(recv_str(&args, "upper")?.to_uppercase()))
    }),
    NativeFunction::sync("lower", "()", "Return a copy of the string converted to lowercase.", |_, args| {
        expect_args(&args, "lower", 0, 0)?;
        Ok(Value::from(recv_str(&args, "lower")?.to_lowercase()))
    }),
    NativeFunction::sync("strip", "(chars=None, /)", "Return a copy with leading and trailing characters removed.", |_, args| {
        expect_args(&args, "strip", 0, 1)?;
        let chars = str_arg(&args, 1, "strip")?;
        Ok(Value::from(strip_with(&recv_str(&args, "strip")?, chars.as_deref(), true, true)))
    }),
    NativeFunction::sync("lstrip", "(chars=None, /)", "Return a copy with leading characters removed.", |_, args| {
        expect_args(&args, "lstrip", 0, 1)?;
        let chars = str_arg(&args, 1, "lstrip")?;
        Ok(Value::from(strip_with(&recv_str(&args, "lstrip")?, chars.as_deref(), true, false)))
    }),
    NativeFunction::sync("rstrip", "(chars=None, /)", "Return a copy with trailing characters removed.", |_, args| {
        expect_args(&args, "rstrip", 0, 1)?;
        let chars = str_arg(&args, 1, "rstrip")?;
        Ok(Value::from(strip_with(&recv_str(&args, "rstrip")?, chars.as_deref(), false, true)))
    }),
    NativeFunction::sync("split", "(sep=None, maxsplit=-1)", "Return a list of the substrings in the string, using sep as the separator.", |interp, args| str_split(interp, args, false)),
    NativeFunction::sync("rsplit", "(sep=None, maxsplit=-1)", "Return a list of the substrings, splitting from the right.", |interp, args| str_split(interp, args, true)),
    NativeFunction::asynchronous("join", "(iterable, /)", "Concatenate any number of strings.", str_join),
    NativeFunction::sync("replace", "(old, new, count=-1, /)", "Return a copy with all occurrences of substring old replaced by new.", |_, args| {
        expect_args(&args, "replace", 2, 3)?;
        let s = recv_str(&args, "replace")?;
        let old = required_str(&args, 1, "replace")?;
        let new = required_str(&args, 2, "replace")?;
        let count = int_arg(&args, 3, -1, "replace")?;
        Ok(Value::from(if count < 0 {
            s.replace(old.as_ref(), &new)
        } else {
            s.replacen(old.as_ref(), &new, count as usize)
        }))
    }),
    NativeFunction::sync("startswith", "(prefix, /)", "Return True if the string starts with the specified prefix.", |_, args| {
        affix_match(&args, "startswith", |s, p| s.starts_with(p))
    }),
    NativeFunction::sync("endswith", "(suffix, /)", "Return True if the string ends with the specified suffix.", |_, args| {
        affix_match(&args, "endswith", |s, p| s.ends_with(p))
    }),
    NativeFunction::sync("find", "(sub, /)", "Return the lowest index where substring sub is found, or -1.", |_, args| {
        Ok(Value::Int(str_find(&args, "find", false)?))
    }),
    NativeFunction::sync("rfind", "(sub, /)", "Return the highest index where substring sub is found, or -1.", |_, args| {
        Ok(Value::Int(str_find(&args, "rfind", true)?))
    }),
    NativeFunction::sync("index", "(sub, /)", "Like find() but raise ValueError when the substring is not found.", |_, args| {
        match str_find(&args, "index", false)? {
            -1 => Err(Unwind::value_error("substring not found")),
            i => Ok(Value::Int(i)),
        }
    }),
    NativeFunction::sync("count", "(sub, /)", "Return the number of non-overlapping occurrences of substring sub.", |_, args| {
        expect_args(&args, "count", 1, 1)?;
        let s = recv_str(&args, "count")?;
        let sub = required_str(&args, 1, "count")?;
        let n = if sub.is_empty() { s.chars().count() + 1 } else { s.matches(sub.as_ref()).count() };
        Ok(Value::Int(n as i64))
    }),
    NativeFunction::asynchronous("format", "(*args, **kwargs)", "Return a formatted version of the string, using substitutions from args and kwargs.", str_format),
    NativeFunction::sync("isdigit", "()", "Return True if all characters are digits.", |_, args| {
        char_class(&args, "isdigit", |c| c.is_ascii_digit())
    }),
    NativeFunction::sync("isalpha", "()", "Return True if all characters are alphabetic.", |_, args| {
        char_class(&args, "isalpha", char::is_alphabetic)
    }),
    NativeFunction::sync("isalnum", "()", "Return True if all characters are alphanumeric.", |_, args| {
        char_class(&args, "isalnum", char::is_alphanumeric)
    }),
    NativeFunction::sync("isspace", "()", "Return True if all characters are whitespace.", |_, args| {
        char_class(&args, "isspace", char::is_whitespace)
    }),
    NativeFunction::sync("isupper", "()", "Return True if all cased characters are uppercase.", |_, args| {
        expect_args(&args, "isupper", 0, 0)?;
        let s = recv_str(&args, "isupper")?;
        Ok(Value::Bool(s.chars().any(char::is_uppercase) && !s.chars().any(char::is_lowercase)))
    }),
    NativeFunction::sync("islower", "()", "Return True if all cased characters are lowercase.", |_, args| {
        expect_args(&args, "islower", 0, 0)?;
        let s = recv_str(&args, "islower")?;
        Ok(Value::Bool(s.chars().any(char::is_lowercase) && !s.chars().any(char::is_uppercase)))
    }),
    NativeFunction::sync("title", "()", "Return a version of the string where each word is titlecased.", |_, args| {
        expect_args(&args, "title", 0, 0)?;
        Ok(Value::from(title_case(&recv_str(&args, "title")?)))
    }),
    NativeFunction::sync("capitalize", "()", "Return a capitalized version of the string.", |_, args| {
        expect_args(&args, "capitalize", 0, 0)?;
        let s = recv_str(&args, "capitalize")?;
        let mut chars = s.chars();
        let out: String = match chars.next() {
            Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
            None => String::new(),
        };
        Ok(Value::from(out))
    }),
    NativeFunction::sync("center", "(width, fillchar=' ', /)", "Return a centered string of length width.", |_, args| {
        justify(&args, "center", '^')
    }),
    NativeFunction::sync("ljust", "(width, fillchar=' ', /)", "Return a left-justified string of length width.", |_, args| {
        justify(&args, "ljust", '<')
    }),
    NativeFunction::sync("rjust", "(width, fillchar=' ', /)", "Return a right-justified string of length width.", |_, args| {
        justify(&args, "rjust", '>')
    }),
    NativeFunction::sync("zfill", "(width, /)", "Pad a numeric string with zeros on the left.", |_, args| {
        expect_args(&args, "zfill", 1, 1)?;
        let s = recv_str(&args, "zfill")?;
        let width = check_len(int_arg(&args, 1, 0, "zfill")?.max(0) as usize)?;
        let len = s.chars().count();
        if width <= len {
            return Ok(Value::Str(s));
        }
        let zeros = "0".repeat(width - len);
        let out = match s.strip_prefix(['-', '+']) {
            Some(rest) => format!("{}{zeros}{rest}", &s[..1]),
            None => format!("{zeros}{s}"),
        };
        Ok(Value::from(out))
    }),
    NativeFunction::sync("splitlines", "()", "Return a list of the lines in the string.", |_, args| {
        expect_args(&args, "splitlines", 0, 0)?;
        let s = recv_str(&args, "splitlines")?;
        Ok(Value::list(s.lines().map(Value::str).collect()))
    }),
    NativeFunction::sync("partition", "(sep, /)", "Partition the string into three parts using the given separator.", |_, args| {
        expect_args(&args, "partition", 1, 1)?;
        let s = recv_str(&args, "partition")?;
        let sep = required_str(&args, 1, "partition")?;
        if sep.is_empty() {
            return Err(Unwind::value_error("empty separator"));
        }
        let parts = match s.split_once(sep.as_ref()) {
            Some((head, tail)) => [Value::str(head), Value::Str(sep.clone()), Value::str(tail)],
            None => [Value::Str(s.clone()), Value::str(""), Value::str("")],
        };
        Ok(Value::tuple(parts.to_vec()))
    }),
];

// list

/// Stable sort of `items`, comparing `key(item)` when a key function is given.
pub(crate) async fn sort_values(
    interp: &Rc<Interpreter>,
    items: Vec<Value>,
    key: Option<&Value>,
    reverse: bool,
) -> EvalResult<Vec<Value>> {
    let mut keyed = Vec::with_capacity(items.len());
    for item in items {
        let k = match key {
            Some(func) if !func.is_none() => interp.call(func, Args::new(vec![item.clone()])).await?,
            _ => item.clone(),
        };
        keyed.push((k, item));
    }
    if reverse {
        keyed.reverse();
    }
    let plain = keyed
        .iter()
        .all(|(k, _)| matches!(k, Value::Int(_) | Value::Float(_) | Value::Bool(_)))
        || keyed.iter().all(|(k, _)| matches!(k, Value::Str(_)));
    if plain {
        keyed.sort_by(|(a, _), (b, _)| compare_values(a, b).unwrap_or(Ordering::Equal));
    } else {
        // Bottom-up merge sort; comparisons may run guest `__lt__`.
        let n = keyed.len();
        let mut width = 1;
        while width < n {
            let mut merged = Vec::with_capacity(n);
            let mut start = 0;
            while start < n {
                let mid = (start + width).min(n);
                let end = (start + 2 * width).min(n);
                let (mut a, mut b) = (start, mid);
                while a < mid && b < end {
                    interp.check_abort()?;
                    if interp.compare(CmpOp::Lt, &keyed[b].0, &keyed[a].0).await? {
                        merged.push(keyed[b].clone());
                        b += 1;
                    } else {
                        merged.push(keyed[a].clone());
                        a += 1;
                    }
                }
                merged.extend_from_slice(&keyed[a..mid]);
                merged.extend_from_slice(&keyed[b..end]);
                start = end;
            }
            keyed = merged;
            width *= 2;
        }
    }
    if reverse {
        keyed.reverse();
    }
    Ok(keyed.into_iter().map(|(_, item)| item).collect())
}

fn list_sort(interp: Rc<Interpreter>, mut args: Args) -> LocalBoxFuture<'static, EvalResult> {
    Box::pin(async move {
        let key = args.take_keyword("key");
        let reverse = args.take_keyword("reverse").is_some_and(|v| v.truthy());
        expect_args(&args, "sort", 0, 0)?;
        let list = recv_list(&args, "sort")?;
        let items = list.borrow().clone();
        let sorted = sort_values(&interp, items, key.as_ref(), reverse).await?;
        *list.borrow_mut() = sorted;
        Ok(Value::None)
    })
}

fn list_extend(interp: Rc<Interpreter>, args: Args) -> LocalBoxFuture<'static, EvalResult> {
    Box::pin(async move {
        expect_args(&args, "extend", 1, 1)?;
        let list = recv_list(&args, "extend")?;
        let items = interp.collect(&args.positional[1]).await?;
        list.borrow_mut().extend(items);
        Ok(Value::None)
    })
}

fn position(items: &[Value], target: &Value) -> Option<usize> {
    items.iter().position(|item| values_equal(item, target))
}

static LIST_METHODS: &[NativeFunction] = &[
    NativeFunction::sync("append", "(object, /)", "Append object to the end of the list.", |_, args| {
        expect_args(&args, "append", 1, 1)?;
        recv_list(&args, "append")?.borrow_mut().push(args.positional[1].clone());
        Ok(Value::None)
    }),
    NativeFunction::asynchronous("extend", "(iterable, /)", "Extend list by appending elements from the iterable.", list_extend),
    NativeFunction::sync("insert", "(index, object, /)", "Insert object before index.", |_, args| {
        expect_args(&args, "insert", 2, 2)?;
        let list = recv_list(&args, "insert")?;
        let mut items = list.borrow_mut();
        let len = items.len() as i64;
        let index = int_arg(&args, 1, 0, "insert")?;
        let index = if index < 0 { (index + len).max(0) } else { index.min(len) };
        items.insert(index as usize, args.positional[2].clone());
        Ok(Value::None)
    }),
    NativeFunction::sync("pop", "(index=-1, /)", "Remove and return item at index (default last).", |_, args| {
        expect_args(&args, "pop", 0, 1)?;
        let list = recv_list(&args, "pop")?;
        let mut items = list.borrow_mut();
        if items.is_empty() {
            return Err(Unwind::new(ExcKind::IndexError, "pop from empty list"));
        }
        let index = int_arg(&args, 1, -1, "pop")?;
        let slot = normalize_index(index, items.len())
            .ok_or_else(|| Unwind::new(ExcKind::IndexError, "pop index out of range"))?;
        Ok(items.remove(slot))
    }),
    NativeFunction::sync("remove", "(value, /)", "Remove first occurrence of value.", |_, args| {
        expect_args(&args, "remove", 1, 1)?;
        let list = recv_list(&args, "remove")?;
        let mut items = list.borrow_mut();
        match position(&items, &args.positional[1]) {
            Some(i) => {
                items.remove(i);
                Ok(Value::None)
            }
            None => Err(Unwind::value_error("list.remove(x): x not in list")),
        }
    }),
    NativeFunction::sync("index", "(value, /)", "Return first index of value.", |_, args| {
        expect_args(&args, "index", 1, 1)?;
        let list = recv_list(&args, "index")?;
        let target = &args.positional[1];
        let found = position(&list.borrow(), target);
        found
            .map(|i| Value::Int(i as i64))
            .ok_or_else(|| Unwind::value_error(format!("{target:?} is not in list")))
    }),
    NativeFunction::sync("count", "(value, /)", "Return number of occurrences of value.", |_, args| {
        expect_args(&args, "count", 1, 1)?;
        let list = recv_list(&args, "count")?;
        let n = list.borrow().iter().filter(|v| values_equal(v, &args.positional[1])).count();
        Ok(Value::Int(n as i64))
    }),
    NativeFunction::sync("clear", "()", "Remove all items from list.", |_, args| {
        expect_args(&args, "clear", 0, 0)?;
        recv_list(&args, "clear")?.borrow_mut().clear();
        Ok(Value::None)
    }),
    NativeFunction::sync("copy", "()", "Return a shallow copy of the list.", |_, args| {
        expect_args(&args, "copy", 0, 0)?;
        let items = recv_list(&args, "copy")?.borrow().clone();
        Ok(Value::list(items))
    }),
    NativeFunction::sync("reverse", "()", "Reverse *IN PLACE*.", |_, args| {
        expect_args(&args, "reverse", 0, 0)?;
        recv_list(&args, "reverse")?.borrow_mut().reverse();
        Ok(Value::None)
    }),
    NativeFunction::asynchronous("sort", "(*, key=None, reverse=False)", "Sort the list in ascending order and return None.", list_sort),
];

// dict

fn dict_update(_: &Rc<Interpreter>, mut args: Args) -> EvalResult {
    let keywords = std::mem::take(&mut args.keywords);
    if args.len() > 2 {
        return Err(Unwind::type_error(format!(
            "update expected at most 1 argument, got {}",
            args.len() - 1
        )));
    }
    let dict = recv_dict(&args, "update")?;
    let mut target = dict.borrow_mut();
    match args.get(1) {
        None => {}
        Some(Value::Dict(other)) => {
            let entries: Vec<(Value, Value)> =
                other.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            for (k, v) in entries {
                target.insert(k, v)?;
            }
        }
        Some(other) => {
            let items = other.iter_items().ok_or_else(|| {
                Unwind::type_error(format!("'{}' object is not iterable", other.type_name()))
            })?;
            for (i, item) in items.into_iter().enumerate() {
                match item.iter_items().as_deref() {
                    Some([k, v]) => target.insert(k.clone(), v.clone())?,
                    _ => {
                        return Err(Unwind::value_error(format!(
                            "dictionary update sequence element #{i} has wrong length"
                        )));
                    }
                }
            }
        }
    }
    for (k, v) in keywords {
        target.insert_str(&k, v);
    }
    Ok(Value::None)
}

static DICT_METHODS: &[NativeFunction] = &[
    NativeFunction::sync("get", "(key, default=None, /)", "Return the value for key if key is in the dictionary, else default.", |_, args| {
        expect_args(&args, "get", 1, 2)?;
        let dict = recv_dict(&args, "get")?;
        let found = dict.borrow().get(&args.positional[1])?;
        Ok(found.unwrap_or_else(|| args.get(2).cloned().unwrap_or(Value::None)))
    }),
    NativeFunction::sync("keys", "()", "Return a list of the dictionary's keys.", |_, args| {
        expect_args(&args, "keys", 0, 0)?;
        Ok(Value::list(recv_dict(&args, "keys")?.borrow().keys()))
    }),
    NativeFunction::sync("values", "()", "Return a list of the dictionary's values.", |_, args| {
        expect_args(&args, "values", 0, 0)?;
        Ok(Value::list(recv_dict(&args, "values")?.borrow().values()))
    }),
    NativeFunction::sync("items", "()", "Return a list of the dictionary's (key, value) pairs.", |_, args| {
        expect_args(&args, "items", 0, 0)?;
        Ok(Value::list(recv_dict(&args, "items")?.borrow().items()))
    }),
    NativeFunction::sync("pop", "(key, default=<unrepresentable>, /)", "Remove specified key and return the corresponding value.", |_, args| {
        expect_args(&args, "pop", 1, 2)?;
        let dict = recv_dict(&args, "pop")?;
        let removed = dict.borrow_mut().remove(&args.positional[1])?;
        match (removed, args.get(2)) {
            (Some(value), _) => Ok(value),
            (None, Some(default)) => Ok(default.clone()),
            (None, None) => Err(Unwind::key_error(args.positional[1].clone())),
        }
    }),
    NativeFunction::sync("popitem", "()", "Remove and return a (key, value) pair as a 2-tuple.", |_, args| {
        expect_args(&args, "popitem", 0, 0)?;
        let dict = recv_dict(&args, "popitem")?;
        let last = dict.borrow_mut().pop_last();
        match last {
            Some((k, v)) => Ok(Value::tuple(vec![k, v])),
            None => Err(Unwind::new(ExcKind::KeyError, "popitem(): dictionary is empty")),
        }
    }),
    NativeFunction::sync("setdefault", "(key, default=None, /)", "Insert key with a value of default if key is not in the dictionary.", |_, args| {
        expect_args(&args, "setdefault", 1, 2)?;
        let dict = recv_dict(&args, "setdefault")?;
        let key = args.positional[1].clone();
        let existing = dict.borrow().get(&key)?;
        match existing {
            Some(value) => Ok(value),
            None => {
                let default = args.get(2).cloned().unwrap_or(Value::None);
                dict.borrow_mut().insert(key, default.clone())?;
                Ok(default)
            }
        }
    }),
    NativeFunction::sync("update", "(other=(), /, **kwargs)", "Update the dictionary from a mapping or iterable of pairs and keyword arguments.", dict_update),
    NativeFunction::sync("clear", "()", "Remove all items from the dictionary.", |_, args| {
        expect_args(&args, "clear", 0, 0)?;
        recv_dict(&args, "clear")?.borrow_mut().clear();
        Ok(Value::None)
    }),
    NativeFunction::sync("copy", "()", "Return a shallow copy of the dictionary.", |_, args| {
        expect_args(&args, "copy", 0, 0)?;
        let copy = recv_dict(&args, "copy")?.borrow().clone();
        Ok(Value::dict(copy))
    }),
];

// tuple

fn recv_tuple(args: &Args, name: &str) -> EvalResult<Rc<Vec<Value>>> {
    match args.get(0) {
        Some(Value::Tuple(items)) => Ok(items.clone()),
        other => Err(receiver_error(name, "tuple", other)),
    }
}

static TUPLE_METHODS: &[NativeFunction] = &[
    NativeFunction::sync("count", "(value, /)", "Return number of occurrences of value.", |_, args| {
        expect_args(&args, "count", 1, 1)?;
        let items = recv_tuple(&args, "count")?;
        Ok(Value::Int(items.iter().filter(|v| values_equal(v, &args.positional[1])).count() as i64))
    }),
    NativeFunction::sync("index", "(value, /)", "Return first index of value.", |_, args| {
        expect_args(&args, "index", 1, 1)?;
        let items = recv_tuple(&args, "index")?;
        position(&items, &args.positional[1])
            .map(|i| Value::Int(i as i64))
            .ok_or_else(|| Unwind::value_error("tuple.index(x): x not in tuple"))
    }),
];

// sys.stdout / sys.stderr

fn recv_stream(args: &Args, name: &str) -> EvalResult<StreamKind> {
    match args.get(0) {
        Some(Value::Stream(kind)) => Ok(*kind),
        other => Err(receiver_error(name, "TextIOWrapper", other)),
    }
}

static STREAM_METHODS: &[NativeFunction] = &[
    NativeFunction::sync("write", "(s, /)", "Write string to stream. Returns the number of characters written.", |interp, args| {
        expect_args(&args, "write", 1, 1)?;
        let stream = recv_stream(&args, "write")?;
        let text = match &args.positional[1] {
            Value::Str(s) => s.clone(),
            other => {
                return Err(Unwind::type_error(format!(
                    "write() argument must be str, not {}",
                    other.type_name()
                )));
            }
        };
        interp.write(stream, &text);
        Ok(Value::Int(text.chars().count() as i64))
    }),
    NativeFunction::sync("flush", "()", "Flush the write buffers of the stream.", |_, args| {
        expect_args(&args, "flush", 0, 0)?;
        recv_stream(&args, "flush")?;
        Ok(Value::None)
    }),
];

// asyncio tasks

fn recv_task(args: &Args, name: &str) -> EvalResult<Rc<super::object::Task>> {
    match args.get(0) {
        Some(Value::Task(task)) => Ok(task.clone()),
        other => Err(receiver_error(name, "Task", other)),
    }
}

static TASK_METHODS: &[NativeFunction] = &[
    NativeFunction::sync("done", "()", "Return True if the task has finished.", |_, args| {
        expect_args(&args, "done", 0, 0)?;
        Ok(Value::Bool(recv_task(&args, "done")?.is_done()))
    }),
    NativeFunction::sync("result", "()", "Return the result of the task.", |_, args| {
        expect_args(&args, "result", 0, 0)?;
        let task = recv_task(&args, "result")?;
        match task.outcome() {
            Some(result) => result,
            None => Err(Unwind::new(ExcKind::RuntimeError, "Result is not set.")),
        }
    }),
    NativeFunction::sync("get_name", "()", "Return the name of the task.", |_, args| {
        expect_args(&args, "get_name", 0, 0)?;
        Ok(Value::str(&recv_task(&args, "get_name")?.name))
    }),
];

#[cfg(test)]
mod tests {
    use super::super::testing::eval_repr;
    use super::*;

    #[test]
    fn test_tables_have_unique_names() {
        for table in [STR_METHODS, LIST_METHODS, DICT_METHODS, TUPLE_METHODS, STREAM_METHODS, TASK_METHODS] {
            let mut names: Vec<&str> = table.iter().map(|n| n.name).collect();
            let before = names.len();
            names.sort();
            names.dedup();
            assert_eq!(names.len(), before);
        }
    }

    #[tokio::test]
    async fn test_str_methods() {
        assert_eq!(eval_repr("'  a b  c '.split()").await, "['a', 'b', 'c']");
        assert_eq!(eval_repr("'a,b,,c'.split(',')").await, "['a', 'b', '', 'c']");
        assert_eq!(eval_repr("'a b c'.rsplit(None, 1)").await, "['a b', 'c']");
        assert_eq!(eval_repr("'-'.join(['x', 'y'])").await, "'x-y'");
        assert_eq!(eval_repr("'-'.join([1])").await, "!TypeError");
        assert_eq!(eval_repr("'xxhixx'.strip('x')").await, "'hi'");
        assert_eq!(eval_repr("('héllo'.find('l'), 'abc'.index('c'))").await, "(2, 2)");
        assert_eq!(eval_repr("'hello world'.title()").await, "'Hello World'");
        assert_eq!(eval_repr("('ab'.center(6, '*'), '-5'.zfill(4))").await, "('**ab**', '-005')");
        assert_eq!(eval_repr("'a=b=c'.partition('=')").await, "('a', '=', 'b=c')");
        assert_eq!(eval_repr("str.upper('q')").await, "'Q'");
    }

    #[tokio::test]
    async fn test_list_methods() {
        assert_eq!(eval_repr("x = [3, 1, 2]\nx.sort()\nx").await, "[1, 2, 3]");
        assert_eq!(eval_repr("x = ['bb', 'a', 'ccc']\nx.sort(key=len, reverse=True)\nx").await, "['ccc', 'bb', 'a']");
        assert_eq!(eval_repr("x = [1, 2]\nx.extend(range(3, 5))\nx.insert(0, 0)\n(x.pop(), x)").await, "(4, [0, 1, 2, 3])");
        assert_eq!(eval_repr("[].pop()").await, "!IndexError");
        assert_eq!(eval_repr("[1].remove(2)").await, "!ValueError");
    }

    #[tokio::test]
    async fn test_dict_methods() {
        assert_eq!(eval_repr("d = {'a': 1}\n(d.get('a'), d.get('z', 0), d.setdefault('b', 2), d)").await, "(1, 0, 2, {'a': 1, 'b': 2})");
        assert_eq!(eval_repr("d = {}\nd.update({'a': 1}, b=2)\nd.update([('c', 3)])\nlist(d.items())").await, "[('a', 1), ('b', 2), ('c', 3)]");
        assert_eq!(eval_repr("{}.pop('x')").await, "!KeyError");
        assert_eq!(eval_repr("{}.pop('x', 5)").await, "5");
    }

    #[tokio::test]
    async fn test_sort_with_user_ordering() {
        let src = "\
class P:
    def __init__(self, n):
        self.n = n
    def __lt__(self, other):
        return self.n < other.n
[p.n for p in sorted([P(3), P(1), P(2)])]";
        assert_eq!(eval_repr(src).await, "[1, 2, 3]");
    }
}
