//! Built-in functions and types.

use std::cell::RefCell;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use indexmap::IndexMap;
use rustc_hash::FxHasher;

use super::Interpreter;
use super::exception::{EvalResult, ExcKind, ExceptionObj, Unwind};
use super::format::{FormatSpec, format_int};
use super::methods::{self, sort_values};
use super::modules::ui;
use super::object::{Args, BoundMethod, Class, Instance, NativeFunction, SuperObj};
use super::ops::repr_str;
use super::scope::Namespace;
use super::value::{BuiltinType, Dict, IterState, Key, RangeValue, Value};
use crate::lang::ast::{BinOp, CmpOp};
use crate::sandbox::protocol::StreamKind;

const TYPES: &[BuiltinType] = &[
    BuiltinType::Object,
    BuiltinType::Bool,
    BuiltinType::Int,
    BuiltinType::Float,
    BuiltinType::Str,
    BuiltinType::List,
    BuiltinType::Tuple,
    BuiltinType::Dict,
    BuiltinType::Range,
    BuiltinType::Type,
];

/// Every name bound in the builtins namespace.
pub fn names() -> impl Iterator<Item = &'static str> {
    FUNCTIONS
        .iter()
        .map(|native| native.name)
        .chain(TYPES.iter().map(|ty| ty.name()))
        .chain(ExcKind::ALL.iter().map(|kind| kind.name()))
}

pub(crate) fn namespace() -> Namespace {
    let ns = Namespace::new();
    for native in FUNCTIONS {
        ns.set(native.name, Value::Native(native));
    }
    for ty in TYPES {
        ns.set(ty.name(), Value::Type(*ty));
    }
    for kind in ExcKind::ALL {
        ns.set(kind.name(), Value::ExcType(*kind));
    }
    ns
}

fn iterator(items: Vec<Value>) -> Value {
    Value::Iterator(Rc::new(RefCell::new(IterState::Items { items, pos: 0 })))
}

/// `type(value)`.
pub(crate) fn type_of(value: &Value) -> Value {
    let ty = match value {
        Value::Instance(instance) => return Value::Class(instance.class.clone()),
        Value::Exception(exc) => {
            return match &exc.class {
                Some(class) => Value::Class(class.clone()),
                None => Value::ExcType(exc.kind),
            };
        }
        Value::Widget(widget) => return ui::widget_class(widget.kind()),
        Value::None => BuiltinType::NoneType,
        Value::Bool(_) => BuiltinType::Bool,
        Value::Int(_) => BuiltinType::Int,
        Value::Float(_) => BuiltinType::Float,
        Value::Str(_) => BuiltinType::Str,
        Value::List(_) => BuiltinType::List,
        Value::Tuple(_) => BuiltinType::Tuple,
        Value::Dict(_) => BuiltinType::Dict,
        Value::Range(_) => BuiltinType::Range,
        Value::Type(_) | Value::ExcType(_) | Value::Class(_) => BuiltinType::Type,
        Value::Function(_) | Value::Native(_) | Value::BoundMethod(_) => BuiltinType::Function,
        _ => BuiltinType::Object,
    };
    Value::Type(ty)
}

fn is_instance_of_type(value: &Value, ty: BuiltinType) -> bool {
    match (ty, value) {
        (BuiltinType::Object, _) => true,
        (BuiltinType::Int, Value::Bool(_)) => true,
        _ => matches!(type_of(value), Value::Type(t) if t == ty),
    }
}

pub(crate) fn isinstance(value: &Value, class: &Value) -> EvalResult<bool> {
    Ok(match class {
        Value::Tuple(items) => {
            for item in items.iter() {
                if isinstance(value, item)? {
                    return Ok(true);
                }
            }
            false
        }
        Value::Type(ty) => is_instance_of_type(value, *ty),
        Value::ExcType(kind) => matches!(value, Value::Exception(exc) if exc.kind.is_subclass_of(*kind)),
        Value::Class(target) => match value {
            Value::Instance(instance) => instance.class.is_subclass_of(target),
            Value::Exception(exc) => exc.matches(class),
            _ => false,
        },
        Value::Native(native) if ui::is_widget_class(native) => {
            matches!(value, Value::Widget(widget) if ui::widget_matches(native, widget))
        }
        other => {
            return Err(Unwind::type_error(format!(
                "isinstance() arg 2 must be a type, a tuple of types, or a union, not {}",
                other.type_name()
            )));
        }
    })
}

fn issubclass(class: &Value, parent: &Value) -> EvalResult<bool> {
    Ok(match (class, parent) {
        (_, Value::Tuple(items)) => {
            for item in items.iter() {
                if issubclass(class, item)? {
                    return Ok(true);
                }
            }
            false
        }
        (_, Value::Type(BuiltinType::Object)) => true,
        (Value::Type(a), Value::Type(b)) => a == b || (*a == BuiltinType::Bool && *b == BuiltinType::Int),
        (Value::ExcType(a), Value::ExcType(b)) => a.is_subclass_of(*b),
        (Value::Class(a), Value::Class(b)) => a.is_subclass_of(b),
        (Value::Class(a), Value::ExcType(b)) => a.exc_kind().is_some_and(|k| k.is_subclass_of(*b)),
        (Value::Type(_) | Value::ExcType(_) | Value::Class(_), _) => false,
        (other, _) => {
            return Err(Unwind::type_error(format!(
                "issubclass() arg 1 must be a class, not {}",
                other.type_name()
            )));
        }
    })
}

pub(crate) fn is_callable(value: &Value) -> bool {
    match value {
        Value::Function(_)
        | Value::Native(_)
        | Value::BoundMethod(_)
        | Value::Class(_)
        | Value::Type(_)
        | Value::ExcType(_) => true,
        Value::Instance(instance) => instance.class.lookup("__call__").is_some(),
        _ => false,
    }
}

fn parse_int(text: &str, base: u32) -> Option<i64> {
    let cleaned = text.trim().replace('_', "");
    let (negative, digits) = match cleaned.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, cleaned.strip_prefix('+').unwrap_or(&cleaned)),
    };
    let lower = digits.to_ascii_lowercase();
    let (base, digits) = match (base, lower.get(..2)) {
        (0 | 16, Some("0x")) => (16, &digits[2..]),
        (0 | 8, Some("0o")) => (8, &digits[2..]),
        (0 | 2, Some("0b")) => (2, &digits[2..]),
        (0, _) => (10, digits),
        (base, _) => (base, digits),
    };
    if digits.is_empty() || digits.starts_with(['+', '-']) {
        return None;
    }
    let magnitude = i64::from_str_radix(digits, base).ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

fn parse_float(text: &str) -> Option<f64> {
    let cleaned = text.trim().replace('_', "");
    cleaned.parse::<f64>().ok()
}

fn float_to_int(f: f64) -> EvalResult<i64> {
    if f.is_nan() {
        return Err(Unwind::value_error("cannot convert float NaN to integer"));
    }
    if f.is_infinite() {
        return Err(Unwind::new(
            ExcKind::OverflowError,
            "cannot convert float infinity to integer",
        ));
    }
    let truncated = f.trunc();
    if truncated < i64::MIN as f64 || truncated >= i64::MAX as f64 {
        return Err(Unwind::new(ExcKind::OverflowError, "integer result too large"));
    }
    Ok(truncated as i64)
}

/// Call a built-in type: `int("3")`, `list(x)`, `range(5)`.
pub(crate) async fn construct(interp: &Rc<Interpreter>, ty: BuiltinType, mut args: Args) -> EvalResult {
    let name = ty.name();
    match ty {
        BuiltinType::Dict => {
            args.arity(name, 0, 1)?;
            let dict = Value::dict(Dict::new());
            if let Some(update) = methods::for_type(BuiltinType::Dict, "update") {
                let bound = BoundMethod::new(dict.clone(), Value::Native(update));
                interp.call(&bound, args).await?;
            }
            return Ok(dict);
        }
        BuiltinType::Int => {
            let base = args.take_keyword("base");
            args.no_keywords(name)?;
            args.arity(name, 0, 2)?;
            let base = match base.or_else(|| args.get(1).cloned()) {
                Some(value) => Some(value.as_int().ok_or_else(|| {
                    Unwind::type_error("'base' must be an integer")
                })?),
                None => None,
            };
            let Some(value) = args.get(0) else {
                return Ok(Value::Int(0));
            };
            return match (value, base) {
                (Value::Str(s), base) => {
                    let base = base.unwrap_or(10);
                    if base != 0 && !(2..=36).contains(&base) {
                        return Err(Unwind::value_error("int() base must be >= 2 and <= 36, or 0"));
                    }
                    parse_int(s, base as u32).map(Value::Int).ok_or_else(|| {
                        Unwind::value_error(format!(
                            "invalid literal for int() with base {base}: {}",
                            repr_str(s)
                        ))
                    })
                }
                (_, Some(_)) => Err(Unwind::type_error(
                    "int() can't convert non-string with explicit base",
                )),
                (Value::Float(f), None) => float_to_int(*f).map(Value::Int),
                (other, None) => match other.as_int() {
                    Some(i) => Ok(Value::Int(i)),
                    None => Err(Unwind::type_error(format!(
                        "int() argument must be a string, a bytes-like object or a real number, not '{}'",
                        other.type_name()
                    ))),
                },
            };
        }
        _ => {}
    }
    args.no_keywords(name)?;
    match ty {
        BuiltinType::Object => {
            args.arity(name, 0, 0)?;
            let class = Rc::new(Class {
                name: "object".to_string(),
                bases: Vec::new(),
                attrs: RefCell::new(IndexMap::new()),
                doc: None,
            });
            Ok(Value::Instance(Rc::new(Instance {
                class,
                attrs: RefCell::new(IndexMap::new()),
            })))
        }
        BuiltinType::NoneType => Ok(Value::None),
        BuiltinType::Bool => {
            args.arity(name, 0, 1)?;
            match args.get(0) {
                Some(value) => Ok(Value::Bool(interp.truthy(value).await?)),
                None => Ok(Value::Bool(false)),
            }
        }
        BuiltinType::Float => {
            args.arity(name, 0, 1)?;
            match args.get(0) {
                None => Ok(Value::Float(0.0)),
                Some(Value::Str(s)) => parse_float(s).map(Value::Float).ok_or_else(|| {
                    Unwind::value_error(format!("could not convert string to float: {}", repr_str(s)))
                }),
                Some(other) => other.as_float().map(Value::Float).ok_or_else(|| {
                    Unwind::type_error(format!(
                        "float() argument must be a string or a real number, not '{}'",
                        other.type_name()
                    ))
                }),
            }
        }
        BuiltinType::Str => {
            args.arity(name, 0, 1)?;
            match args.get(0) {
                Some(value) => Ok(Value::from(interp.to_str(value).await?)),
                None => Ok(Value::str("")),
            }
        }
        BuiltinType::List => {
            args.arity(name, 0, 1)?;
            match args.get(0) {
                Some(value) => Ok(Value::list(interp.collect(value).await?)),
                None => Ok(Value::list(Vec::new())),
            }
        }
        BuiltinType::Tuple => {
            args.arity(name, 0, 1)?;
            match args.get(0) {
                Some(Value::Tuple(_)) => Ok(args.positional[0].clone()),
                Some(value) => Ok(Value::tuple(interp.collect(value).await?)),
                None => Ok(Value::tuple(Vec::new())),
            }
        }
        BuiltinType::Range => {
            args.arity(name, 1, 3)?;
            let ints = args
                .positional
                .iter()
                .map(|v| {
                    v.as_int().ok_or_else(|| {
                        Unwind::type_error(format!(
                            "'{}' object cannot be interpreted as an integer",
                            v.type_name()
                        ))
                    })
                })
                .collect::<EvalResult<Vec<i64>>>()?;
            let (start, stop, step) = match ints.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => unreachable!("arity checked"),
            };
            if step == 0 {
                return Err(Unwind::value_error("range() arg 3 must not be zero"));
            }
            Ok(Value::Range(RangeValue { start, stop, step }))
        }
        BuiltinType::Type => match args.positional.as_slice() {
            [value] => Ok(type_of(value)),
            _ => Err(Unwind::type_error("type() takes 1 argument")),
        },
        BuiltinType::Function => Err(Unwind::type_error("cannot create 'function' instances")),
        BuiltinType::Dict | BuiltinType::Int => unreachable!("handled above"),
    }
}

// Async natives

fn print(interp: Rc<Interpreter>, mut args: Args) -> LocalBoxFuture<'static, EvalResult> {
    Box::pin(async move {
        let sep = args.take_keyword("sep");
        let end = args.take_keyword("end");
        let file = args.take_keyword("file");
        args.take_keyword("flush");
        args.no_keywords("print")?;
        let text_arg = |value: Option<Value>, default: &str, what: &str| -> EvalResult<String> {
            match value {
                None | Some(Value::None) => Ok(default.to_string()),
                Some(Value::Str(s)) => Ok(s.to_string()),
                Some(other) => Err(Unwind::type_error(format!(
                    "{what} must be None or a string, not {}",
                    other.type_name()
                ))),
            }
        };
        let sep = text_arg(sep, " ", "sep")?;
        let end = text_arg(end, "\n", "end")?;
        let mut parts = Vec::with_capacity(args.len());
        for value in &args.positional {
            parts.push(interp.to_str(value).await?);
        }
        let text = format!("{}{end}", parts.join(&sep));
        match file {
            None | Some(Value::None) => interp.write(StreamKind::Out, &text),
            Some(Value::Stream(kind)) => interp.write(kind, &text),
            Some(other) => {
                let write = interp.get_attr(&other, "write")?;
                interp.call(&write, Args::new(vec![Value::from(text)])).await?;
            }
        }
        Ok(Value::None)
    })
}

fn len(interp: Rc<Interpreter>, args: Args) -> LocalBoxFuture<'static, EvalResult> {
    Box::pin(async move {
        args.no_keywords("len")?;
        args.arity("len", 1, 1)?;
        Ok(Value::Int(interp.len(&args.positional[0]).await? as i64))
    })
}

fn repr(interp: Rc<Interpreter>, args: Args) -> LocalBoxFuture<'static, EvalResult> {
    Box::pin(async move {
        args.no_keywords("repr")?;
        args.arity("repr", 1, 1)?;
        Ok(Value::from(interp.repr(&args.positional[0]).await?))
    })
}

fn extremum(interp: Rc<Interpreter>, mut args: Args, name: &'static str, op: CmpOp) -> LocalBoxFuture<'static, EvalResult> {
    Box::pin(async move {
        let key = args.take_keyword("key").filter(|k| !k.is_none());
        let default = args.take_keyword("default");
        args.no_keywords(name)?;
        let items = match args.positional.len() {
            0 => {
                return Err(Unwind::type_error(format!(
                    "{name} expected at least 1 argument, got 0"
                )));
            }
            1 => interp.collect(&args.positional[0]).await?,
            _ => args.positional,
        };
        let mut best: Option<(Value, Value)> = None;
        for item in items {
            let k = match &key {
                Some(func) => interp.call(func, Args::new(vec![item.clone()])).await?,
                None => item.clone(),
            };
            let replace = match &best {
                None => true,
                Some((best_key, _)) => interp.compare(op, &k, best_key).await?,
            };
            if replace {
                best = Some((k, item));
            }
        }
        match (best, default) {
            (Some((_, item)), _) => Ok(item),
            (None, Some(default)) => Ok(default),
            (None, None) => Err(Unwind::value_error(format!(
                "{name}() iterable argument is empty"
            ))),
        }
    })
}

fn min(interp: Rc<Interpreter>, args: Args) -> LocalBoxFuture<'static, EvalResult> {
    extremum(interp, args, "min", CmpOp::Lt)
}

fn max(interp: Rc<Interpreter>, args: Args) -> LocalBoxFuture<'static, EvalResult> {
    extremum(interp, args, "max", CmpOp::Gt)
}

fn sum(interp: Rc<Interpreter>, mut args: Args) -> LocalBoxFuture<'static, EvalResult> {
    Box::pin(async move {
        let start = args.take(1, "start").unwrap_or(Value::Int(0));
        args.no_keywords("sum")?;
        args.arity("sum", 1, 2)?;
        if matches!(start, Value::Str(_)) {
            return Err(Unwind::type_error(
                "sum() can't sum strings [use ''.join(seq) instead]",
            ));
        }
        let mut total = start;
        for item in interp.collect(&args.positional[0]).await? {
            total = interp.binary_op(BinOp::Add, &total, &item).await?;
        }
        Ok(total)
    })
}

fn sorted(interp: Rc<Interpreter>, mut args: Args) -> LocalBoxFuture<'static, EvalResult> {
    Box::pin(async move {
        let key = args.take_keyword("key");
        let reverse = args.take_keyword("reverse").is_some_and(|v| v.truthy());
        args.no_keywords("sorted")?;
        args.arity("sorted", 1, 1)?;
        let items = interp.collect(&args.positional[0]).await?;
        Ok(Value::list(sort_values(&interp, items, key.as_ref(), reverse).await?))
    })
}

fn reversed(interp: Rc<Interpreter>, args: Args) -> LocalBoxFuture<'static, EvalResult> {
    Box::pin(async move {
        args.no_keywords("reversed")?;
        args.arity("reversed", 1, 1)?;
        let mut items = interp.collect(&args.positional[0]).await?;
        items.reverse();
        Ok(iterator(items))
    })
}

fn enumerate(interp: Rc<Interpreter>, mut args: Args) -> LocalBoxFuture<'static, EvalResult> {
    Box::pin(async move {
        let start = args.take(1, "start").and_then(|v| v.as_int()).unwrap_or(0);
        args.no_keywords("enumerate")?;
        args.arity("enumerate", 1, 2)?;
        let items = interp.collect(&args.positional[0]).await?;
        let pairs = items
            .into_iter()
            .zip(start..)
            .map(|(item, i)| Value::tuple(vec![Value::Int(i), item]))
            .collect();
        Ok(iterator(pairs))
    })
}

fn zip(interp: Rc<Interpreter>, mut args: Args) -> LocalBoxFuture<'static, EvalResult> {
    Box::pin(async move {
        let strict = args.take_keyword("strict").is_some_and(|v| v.truthy());
        args.no_keywords("zip")?;
        let mut columns = Vec::with_capacity(args.len());
        for iterable in &args.positional {
            columns.push(interp.collect(iterable).await?);
        }
        let shortest = columns.iter().map(Vec::len).min().unwrap_or(0);
        if strict && columns.iter().any(|c| c.len() != shortest) {
            return Err(Unwind::value_error("zip() arguments have different lengths"));
        }
        let rows = (0..shortest)
            .map(|i| Value::tuple(columns.iter().map(|c| c[i].clone()).collect()))
            .collect();
        Ok(iterator(rows))
    })
}

fn map(interp: Rc<Interpreter>, args: Args) -> LocalBoxFuture<'static, EvalResult> {
    Box::pin(async move {
        args.no_keywords("map")?;
        if args.len() < 2 {
            return Err(Unwind::type_error("map() must have at least two arguments."));
        }
        let func = &args.positional[0];
        let mut columns = Vec::with_capacity(args.len() - 1);
        for iterable in &args.positional[1..] {
            columns.push(interp.collect(iterable).await?);
        }
        let shortest = columns.iter().map(Vec::len).min().unwrap_or(0);
        let mut out = Vec::with_capacity(shortest);
        for i in 0..shortest {
            let call_args = columns.iter().map(|c| c[i].clone()).collect();
            out.push(interp.call(func, Args::new(call_args)).await?);
        }
        Ok(iterator(out))
    })
}

fn filter(interp: Rc<Interpreter>, args: Args) -> LocalBoxFuture<'static, EvalResult> {
    Box::pin(async move {
        args.no_keywords("filter")?;
        args.arity("filter", 2, 2)?;
        let func = &args.positional[0];
        let mut out = Vec::new();
        for item in interp.collect(&args.positional[1]).await? {
            let keep = if func.is_none() {
                interp.truthy(&item).await?
            } else {
                let result = interp.call(func, Args::new(vec![item.clone()])).await?;
                interp.truthy(&result).await?
            };
            if keep {
                out.push(item);
            }
        }
        Ok(iterator(out))
    })
}

fn any_all(interp: Rc<Interpreter>, args: Args, name: &'static str, want: bool) -> LocalBoxFuture<'static, EvalResult> {
    Box::pin(async move {
        args.no_keywords(name)?;
        args.arity(name, 1, 1)?;
        let iterator = interp.iterate(&args.positional[0]).await?;
        while let Some(item) = interp.next_item(&iterator).await? {
            if interp.truthy(&item).await? == want {
                return Ok(Value::Bool(want));
            }
        }
        Ok(Value::Bool(!want))
    })
}

fn any(interp: Rc<Interpreter>, args: Args) -> LocalBoxFuture<'static, EvalResult> {
    any_all(interp, args, "any", true)
}

fn all(interp: Rc<Interpreter>, args: Args) -> LocalBoxFuture<'static, EvalResult> {
    any_all(interp, args, "all", false)
}

fn abs(interp: Rc<Interpreter>, args: Args) -> LocalBoxFuture<'static, EvalResult> {
    Box::pin(async move {
        args.no_keywords("abs")?;
        args.arity("abs", 1, 1)?;
        match &args.positional[0] {
            Value::Float(f) => Ok(Value::Float(f.abs())),
            value if value.as_int().is_some() => value
                .as_int()
                .and_then(i64::checked_abs)
                .map(Value::Int)
                .ok_or_else(|| Unwind::new(ExcKind::OverflowError, "integer result too large")),
            value => match interp.get_attr(value, "__abs__") {
                Ok(method) => interp.call(&method, Args::default()).await,
                Err(_) => Err(Unwind::type_error(format!(
                    "bad operand type for abs(): '{}'",
                    value.type_name()
                ))),
            },
        }
    })
}

fn divmod(interp: Rc<Interpreter>, args: Args) -> LocalBoxFuture<'static, EvalResult> {
    Box::pin(async move {
        args.no_keywords("divmod")?;
        args.arity("divmod", 2, 2)?;
        let (a, b) = (&args.positional[0], &args.positional[1]);
        let q = interp.binary_op(BinOp::FloorDiv, a, b).await?;
        let r = interp.binary_op(BinOp::Mod, a, b).await?;
        Ok(Value::tuple(vec![q, r]))
    })
}

fn pow(interp: Rc<Interpreter>, args: Args) -> LocalBoxFuture<'static, EvalResult> {
    Box::pin(async move {
        args.no_keywords("pow")?;
        args.arity("pow", 2, 3)?;
        let (base, exp) = (&args.positional[0], &args.positional[1]);
        match args.get(2) {
            None | Some(Value::None) => interp.binary_op(BinOp::Pow, base, exp).await,
            Some(modulus) => {
                let (Some(b), Some(mut e), Some(m)) = (base.as_int(), exp.as_int(), modulus.as_int()) else {
                    return Err(Unwind::type_error(
                        "pow() 3rd argument not allowed unless all arguments are integers",
                    ));
                };
                if m == 0 {
                    return Err(Unwind::value_error("pow() 3rd argument cannot be 0"));
                }
                if e < 0 {
                    return Err(Unwind::value_error("pow() 2nd argument cannot be negative when 3rd argument specified"));
                }
                let m = m as i128;
                let mut result: i128 = 1;
                let mut b128 = (b as i128).rem_euclid(m);
                while e > 0 {
                    if e & 1 == 1 {
                        result = (result * b128).rem_euclid(m);
                    }
                    b128 = (b128 * b128).rem_euclid(m);
                    e >>= 1;
                }
                Ok(Value::Int(result as i64))
            }
        }
    })
}

fn iter(interp: Rc<Interpreter>, args: Args) -> LocalBoxFuture<'static, EvalResult> {
    Box::pin(async move {
        args.no_keywords("iter")?;
        args.arity("iter", 1, 1)?;
        Ok(Value::Iterator(interp.iterate(&args.positional[0]).await?))
    })
}

fn next(interp: Rc<Interpreter>, args: Args) -> LocalBoxFuture<'static, EvalResult> {
    Box::pin(async move {
        args.no_keywords("next")?;
        args.arity("next", 1, 2)?;
        let target = &args.positional[0];
        let state = match target {
            Value::Iterator(state) => state.clone(),
            Value::Instance(_) if interp.get_attr(target, "__next__").is_ok() => {
                Rc::new(RefCell::new(IterState::Protocol(target.clone())))
            }
            other => {
                return Err(Unwind::type_error(format!(
                    "'{}' object is not an iterator",
                    other.type_name()
                )));
            }
        };
        match (interp.next_item(&state).await?, args.get(1)) {
            (Some(value), _) => Ok(value),
            (None, Some(default)) => Ok(default.clone()),
            (None, None) => Err(Unwind::Raise(ExceptionObj::new(
                ExcKind::StopIteration,
                None,
                Vec::new(),
            ))),
        }
    })
}

fn format(interp: Rc<Interpreter>, args: Args) -> LocalBoxFuture<'static, EvalResult> {
    Box::pin(async move {
        args.no_keywords("format")?;
        args.arity("format", 1, 2)?;
        let spec = match args.get(1) {
            None => "",
            Some(Value::Str(s)) => s,
            Some(other) => {
                return Err(Unwind::type_error(format!(
                    "format() argument 2 must be str, not {}",
                    other.type_name()
                )));
            }
        };
        Ok(Value::from(interp.format_value(&args.positional[0], spec).await?))
    })
}

// Sync natives

fn round(_: &Rc<Interpreter>, mut args: Args) -> EvalResult {
    let ndigits = args.take(1, "ndigits").filter(|v| !v.is_none());
    args.no_keywords("round")?;
    args.arity("round", 1, 2)?;
    let ndigits = match ndigits {
        Some(value) => Some(value.as_int().ok_or_else(|| {
            Unwind::type_error(format!(
                "'{}' object cannot be interpreted as an integer",
                value.type_name()
            ))
        })?),
        None => None,
    };
    match (&args.positional[0], ndigits) {
        (Value::Float(f), None) => float_to_int(f.round_ties_even()).map(Value::Int),
        (Value::Float(f), Some(n)) => {
            let scale = 10f64.powi(n.clamp(-308, 308) as i32);
            let rounded = (f * scale).round_ties_even() / scale;
            Ok(Value::Float(if rounded.is_finite() { rounded } else { *f }))
        }
        (value, n) if value.as_int().is_some() => {
            let i = value.as_int().unwrap_or(0);
            match n {
                Some(n) if n < 0 => {
                    let scale = 10i64.checked_pow(n.unsigned_abs() as u32).unwrap_or(i64::MAX);
                    let rounded = ((i as f64) / scale as f64).round_ties_even() as i64;
                    Ok(Value::Int(rounded.saturating_mul(scale)))
                }
                _ => Ok(Value::Int(i)),
            }
        }
        (value, _) => Err(Unwind::type_error(format!(
            "type {} doesn't define __round__ method",
            value.type_name()
        ))),
    }
}

fn int_radix(args: &Args, name: &str, spec: &str) -> EvalResult {
    args.no_keywords(name)?;
    args.arity(name, 1, 1)?;
    let n = args.positional[0].as_int().ok_or_else(|| {
        Unwind::type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            args.positional[0].type_name()
        ))
    })?;
    Ok(Value::from(format_int(n, &FormatSpec::parse(spec)?)?))
}

fn getattr(interp: &Rc<Interpreter>, args: Args) -> EvalResult {
    args.no_keywords("getattr")?;
    args.arity("getattr", 2, 3)?;
    let name = attr_name(&args, "getattr")?;
    match interp.get_attr(&args.positional[0], &name) {
        Err(Unwind::Raise(exc)) if exc.kind == ExcKind::AttributeError && args.len() == 3 => {
            Ok(args.positional[2].clone())
        }
        other => other,
    }
}

fn attr_name(args: &Args, func: &str) -> EvalResult<Rc<str>> {
    match &args.positional[1] {
        Value::Str(s) => Ok(s.clone()),
        other => Err(Unwind::type_error(format!(
            "{func}(): attribute name must be string, not '{}'",
            other.type_name()
        ))),
    }
}

fn hash_value(value: &Value) -> EvalResult<i64> {
    let key = Key::from_value(value)?;
    if let Key::Int(i) = key {
        return Ok(i);
    }
    let mut hasher = FxHasher::default();
    key.hash(&mut hasher);
    Ok(hasher.finish() as i64)
}

static FUNCTIONS: &[NativeFunction] = &[
    NativeFunction::asynchronous("print", "(*values, sep=' ', end='\\n', file=None, flush=False)", "Prints the values to a stream, or to sys.stdout by default.", print),
    NativeFunction::asynchronous("len", "(obj, /)", "Return the number of items in a container.", len),
    NativeFunction::asynchronous("repr", "(obj, /)", "Return the canonical string representation of the object.", repr),
    NativeFunction::asynchronous("min", "(iterable, *, key=None, default=...)", "Return the smallest item in an iterable or the smallest of two or more arguments.", min),
    NativeFunction::asynchronous("max", "(iterable, *, key=None, default=...)", "Return the largest item in an iterable or the largest of two or more arguments.", max),
    NativeFunction::asynchronous("sum", "(iterable, /, start=0)", "Return the sum of a 'start' value (default: 0) plus an iterable of numbers.", sum),
    NativeFunction::asynchronous("sorted", "(iterable, /, *, key=None, reverse=False)", "Return a new list containing all items from the iterable in ascending order.", sorted),
    NativeFunction::asynchronous("reversed", "(sequence, /)", "Return a reverse iterator over the values of the given sequence.", reversed),
    NativeFunction::asynchronous("enumerate", "(iterable, start=0)", "Return an enumerate object yielding (index, value) pairs.", enumerate),
    NativeFunction::asynchronous("zip", "(*iterables, strict=False)", "Return an iterator of tuples pairing items from each iterable.", zip),
    NativeFunction::asynchronous("map", "(func, *iterables)", "Apply func to every item of the iterables.", map),
    NativeFunction::asynchronous("filter", "(function or None, iterable, /)", "Return the items of iterable for which function(item) is true.", filter),
    NativeFunction::asynchronous("any", "(iterable, /)", "Return True if bool(x) is True for any x in the iterable.", any),
    NativeFunction::asynchronous("all", "(iterable, /)", "Return True if bool(x) is True for all values x in the iterable.", all),
    NativeFunction::asynchronous("abs", "(x, /)", "Return the absolute value of the argument.", abs),
    NativeFunction::asynchronous("divmod", "(x, y, /)", "Return the tuple (x//y, x%y).", divmod),
    NativeFunction::asynchronous("pow", "(base, exp, mod=None)", "Equivalent to base**exp with 2 arguments or base**exp % mod with 3 arguments.", pow),
    NativeFunction::asynchronous("iter", "(iterable, /)", "Get an iterator from an object.", iter),
    NativeFunction::asynchronous("next", "(iterator, default=..., /)", "Return the next item from the iterator.", next),
    NativeFunction::asynchronous("format", "(value, format_spec='', /)", "Return type(value).__format__(value, format_spec).", format),
    NativeFunction::sync("round", "(number, ndigits=None)", "Round a number to a given precision in decimal digits.", round),
    NativeFunction::sync("isinstance", "(obj, class_or_tuple, /)", "Return whether an object is an instance of a class or of a subclass thereof.", |_, args| {
        args.no_keywords("isinstance")?;
        args.arity("isinstance", 2, 2)?;
        Ok(Value::Bool(isinstance(&args.positional[0], &args.positional[1])?))
    }),
    NativeFunction::sync("issubclass", "(cls, class_or_tuple, /)", "Return whether 'cls' is derived from another class or is the same class.", |_, args| {
        args.no_keywords("issubclass")?;
        args.arity("issubclass", 2, 2)?;
        Ok(Value::Bool(issubclass(&args.positional[0], &args.positional[1])?))
    }),
    NativeFunction::sync("callable", "(obj, /)", "Return whether the object is callable.", |_, args| {
        args.arity("callable", 1, 1)?;
        Ok(Value::Bool(is_callable(&args.positional[0])))
    }),
    NativeFunction::sync("hash", "(obj, /)", "Return the hash value for the given object.", |_, args| {
        args.arity("hash", 1, 1)?;
        Ok(Value::Int(hash_value(&args.positional[0])?))
    }),
    NativeFunction::sync("id", "(obj, /)", "Return the identity of an object.", |_, args| {
        args.arity("id", 1, 1)?;
        let value = &args.positional[0];
        let id = value.identity();
        Ok(Value::Int(if id != 0 { id as i64 } else { hash_value(value).unwrap_or(0) }))
    }),
    NativeFunction::sync("hex", "(number, /)", "Return the hexadecimal representation of an integer.", |_, args| int_radix(&args, "hex", "#x")),
    NativeFunction::sync("oct", "(number, /)", "Return the octal representation of an integer.", |_, args| int_radix(&args, "oct", "#o")),
    NativeFunction::sync("bin", "(number, /)", "Return the binary representation of an integer.", |_, args| int_radix(&args, "bin", "#b")),
    NativeFunction::sync("chr", "(i, /)", "Return a Unicode string of one character with ordinal i.", |_, args| {
        args.arity("chr", 1, 1)?;
        let i = args.positional[0].as_int().ok_or_else(|| Unwind::type_error("an integer is required"))?;
        u32::try_from(i)
            .ok()
            .and_then(char::from_u32)
            .map(|c| Value::from(c.to_string()))
            .ok_or_else(|| Unwind::value_error("chr() arg not in range(0x110000)"))
    }),
    NativeFunction::sync("ord", "(c, /)", "Return the Unicode code point for a one-character string.", |_, args| {
        args.arity("ord", 1, 1)?;
        match &args.positional[0] {
            Value::Str(s) if s.chars().count() == 1 => Ok(Value::Int(s.chars().next().map_or(0, |c| c as i64))),
            Value::Str(s) => Err(Unwind::type_error(format!(
                "ord() expected a character, but string of length {} found",
                s.chars().count()
            ))),
            other => Err(Unwind::type_error(format!(
                "ord() expected string of length 1, but {} found",
                other.type_name()
            ))),
        }
    }),
    NativeFunction::sync("getattr", "(object, name, default=..., /)", "Get a named attribute from an object.", getattr),
    NativeFunction::sync("setattr", "(obj, name, value, /)", "Sets the named attribute on the given object to the specified value.", |interp, args| {
        args.no_keywords("setattr")?;
        args.arity("setattr", 3, 3)?;
        let name = attr_name(&args, "setattr")?;
        interp.set_attr(&args.positional[0], &name, args.positional[2].clone())?;
        Ok(Value::None)
    }),
    NativeFunction::sync("hasattr", "(obj, name, /)", "Return whether the object has an attribute with the given name.", |interp, args| {
        args.no_keywords("hasattr")?;
        args.arity("hasattr", 2, 2)?;
        let name = attr_name(&args, "hasattr")?;
        match interp.get_attr(&args.positional[0], &name) {
            Ok(_) => Ok(Value::Bool(true)),
            Err(Unwind::Raise(exc)) if exc.kind == ExcKind::AttributeError => Ok(Value::Bool(false)),
            Err(other) => Err(other),
        }
    }),
    NativeFunction::sync("delattr", "(obj, name, /)", "Deletes the named attribute from the given object.", |interp, args| {
        args.no_keywords("delattr")?;
        args.arity("delattr", 2, 2)?;
        let name = attr_name(&args, "delattr")?;
        interp.del_attr(&args.positional[0], &name)?;
        Ok(Value::None)
    }),
    NativeFunction::sync("dir", "(object, /)", "Return an alphabetized list of names comprising the object's attributes.", |interp, args| {
        args.no_keywords("dir")?;
        args.arity("dir", 1, 1)?;
        Ok(Value::list(interp.attr_names(&args.positional[0]).into_iter().map(Value::from).collect()))
    }),
    NativeFunction::sync("vars", "(object, /)", "Return the __dict__ attribute of the object.", |interp, args| {
        args.no_keywords("vars")?;
        args.arity("vars", 1, 1)?;
        interp.get_attr(&args.positional[0], "__dict__")
    }),
    NativeFunction::sync("super", "(type, object_or_type, /)", "Proxy for calling methods of the parent class.", |_, args| {
        args.no_keywords("super")?;
        match args.positional.as_slice() {
            [Value::Class(class), receiver] => Ok(Value::Super(Rc::new(SuperObj {
                class: class.clone(),
                receiver: receiver.clone(),
            }))),
            [] => Err(Unwind::new(ExcKind::RuntimeError, "super(): no arguments")),
            _ => Err(Unwind::type_error("super() argument 1 must be a class")),
        }
    }),
];

#[cfg(test)]
mod tests {
    use super::super::testing::{eval_repr, interpreter, run};
    use super::*;

    #[test]
    fn test_parse_int_bases() {
        assert_eq!(parse_int(" 42 ", 10), Some(42));
        assert_eq!(parse_int("-0x1f", 16), Some(-31));
        assert_eq!(parse_int("0b101", 0), Some(5));
        assert_eq!(parse_int("1_000", 10), Some(1000));
        assert_eq!(parse_int("12a", 10), None);
        assert_eq!(parse_int("", 10), None);
    }

    #[test]
    fn test_names_cover_namespace() {
        let ns = namespace();
        for name in names() {
            assert!(ns.contains(name), "{name}");
        }
        assert!(names().any(|n| n == "print"));
        assert!(names().any(|n| n == "ValueError"));
    }

    #[tokio::test]
    async fn test_print_writes_to_streams() {
        let (interp, sink) = interpreter();
        let ns = Namespace::new();
        run(&interp, &ns, "import sys\nprint('a', 1, sep='-', end='!')\nprint('e', file=sys.stderr)")
            .await
            .unwrap();
        assert_eq!(sink.out.borrow().as_str(), "a-1!");
        assert_eq!(sink.err.borrow().as_str(), "e\n");
    }

    #[tokio::test]
    async fn test_conversions() {
        assert_eq!(eval_repr("(int('12'), int(3.9), int('ff', 16), float('1.5'), str(2), bool([]))").await, "(12, 3, 255, 1.5, '2', False)");
        assert_eq!(eval_repr("int('x')").await, "!ValueError");
        assert_eq!(eval_repr("(list('ab'), tuple([1]), dict(a=1), dict([('b', 2)]))").await, "(['a', 'b'], (1,), {'a': 1}, {'b': 2})");
        assert_eq!(eval_repr("(type(1).__name__, type('s') is str, type(None).__name__)").await, "('int', True, 'NoneType')");
    }

    #[tokio::test]
    async fn test_iteration_helpers() {
        assert_eq!(eval_repr("list(enumerate('ab', 1))").await, "[(1, 'a'), (2, 'b')]");
        assert_eq!(eval_repr("list(zip([1, 2, 3], 'xy'))").await, "[(1, 'x'), (2, 'y')]");
        assert_eq!(eval_repr("list(map(lambda a, b: a * b, [1, 2], [3, 4]))").await, "[3, 8]");
        assert_eq!(eval_repr("list(filter(None, [0, 1, '', 'a']))").await, "[1, 'a']");
        assert_eq!(eval_repr("(sum([1, 2, 3]), min(3, 1, 2), max(['a', 'bbb'], key=len))").await, "(6, 1, 'bbb')");
        assert_eq!(eval_repr("(any([0, 1]), all([]), sorted([3, 1], reverse=True))").await, "(True, True, [3, 1])");
        assert_eq!(eval_repr("it = iter([1])\n(next(it), next(it, 'done'))").await, "(1, 'done')");
        assert_eq!(eval_repr("max([])").await, "!ValueError");
    }

    #[tokio::test]
    async fn test_numeric_helpers() {
        assert_eq!(eval_repr("(round(2.5), round(3.5), round(3.14159, 2), round(1234, -2))").await, "(2, 4, 3.14, 1200)");
        assert_eq!(eval_repr("(abs(-3), divmod(7, 2), pow(3, 4, 5), hex(255), bin(5))").await, "(3, (3, 1), 1, '0xff', '0b101')");
        assert_eq!(eval_repr("(chr(65), ord('a'))").await, "('A', 97)");
    }

    #[tokio::test]
    async fn test_reflection() {
        let src = "\
class A:
    x = 1
class B(A):
    pass
b = B()
setattr(b, 'y', 2)
(isinstance(b, A), issubclass(B, A), getattr(b, 'x'), getattr(b, 'z', 0), hasattr(b, 'y'), callable(B), isinstance(True, int))";
        assert_eq!(eval_repr(src).await, "(True, True, 1, 0, True, True, True)");
    }
}
