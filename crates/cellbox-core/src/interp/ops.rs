//! Operators, conversions, attribute and item access, iteration.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use futures::future::LocalBoxFuture;

use super::Interpreter;
use super::eval::exception_class;
use super::exception::{EvalResult, ExcKind, ExceptionObj, Unwind};
use super::methods;
use super::modules::ui;
use super::object::{Args, BoundMethod, NativeFunction};
use super::value::{Dict, IterState, Value, compare_values, format_float, values_equal};
use crate::lang::ast::{BinOp, CmpOp, UnaryOp};

/// Python-style index normalization.
pub(crate) fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let index = if index < 0 { index + len } else { index };
    (0..len).contains(&index).then_some(index as usize)
}

/// Positions selected by a slice over a sequence of length `len`.
pub(crate) fn slice_positions(len: usize, [lower, upper, step]: [Option<i64>; 3]) -> EvalResult<Vec<usize>> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(Unwind::value_error("slice step cannot be zero"));
    }
    let len = len as i64;
    let adjust = |bound: i64, low: i64, high: i64| {
        let bound = if bound < 0 { bound + len } else { bound };
        bound.clamp(low, high)
    };
    let mut out = Vec::new();
    if step > 0 {
        let start = lower.map_or(0, |b| adjust(b, 0, len));
        let stop = upper.map_or(len, |b| adjust(b, 0, len));
        let mut i = start;
        while i < stop {
            out.push(i as usize);
            i += step;
        }
    } else {
        let start = lower.map_or(len - 1, |b| adjust(b, -1, len - 1));
        let stop = upper.map_or(-1, |b| adjust(b, -1, len - 1));
        let mut i = start;
        while i > stop {
            out.push(i as usize);
            i += step;
        }
    }
    Ok(out)
}

fn index_of(value: &Value, container: &str) -> EvalResult<i64> {
    value.as_int().ok_or_else(|| {
        Unwind::type_error(format!(
            "{container} indices must be integers or slices, not {}",
            value.type_name()
        ))
    })
}

fn unsupported(op: &str, l: &Value, r: &Value) -> Unwind {
    Unwind::type_error(format!(
        "unsupported operand type(s) for {op}: '{}' and '{}'",
        l.type_name(),
        r.type_name()
    ))
}

fn overflow() -> Unwind {
    Unwind::new(ExcKind::OverflowError, "integer result too large")
}

fn dunder_name(op: BinOp) -> (&'static str, &'static str) {
    match op {
        BinOp::Add => ("__add__", "__radd__"),
        BinOp::Sub => ("__sub__", "__rsub__"),
        BinOp::Mul => ("__mul__", "__rmul__"),
        BinOp::Div => ("__truediv__", "__rtruediv__"),
        BinOp::FloorDiv => ("__floordiv__", "__rfloordiv__"),
        BinOp::Mod => ("__mod__", "__rmod__"),
        BinOp::Pow => ("__pow__", "__rpow__"),
        BinOp::MatMul => ("__matmul__", "__rmatmul__"),
        BinOp::BitAnd => ("__and__", "__rand__"),
        BinOp::BitOr => ("__or__", "__ror__"),
        BinOp::BitXor => ("__xor__", "__rxor__"),
        BinOp::LShift => ("__lshift__", "__rlshift__"),
        BinOp::RShift => ("__rshift__", "__rrshift__"),
    }
}

fn int_arith(op: BinOp, a: i64, b: i64) -> EvalResult<Value> {
    Ok(match op {
        BinOp::Add => Value::Int(a.checked_add(b).ok_or_else(overflow)?),
        BinOp::Sub => Value::Int(a.checked_sub(b).ok_or_else(overflow)?),
        BinOp::Mul => Value::Int(a.checked_mul(b).ok_or_else(overflow)?),
        BinOp::Div => {
            if b == 0 {
                return Err(Unwind::new(ExcKind::ZeroDivisionError, "division by zero"));
            }
            Value::Float(a as f64 / b as f64)
        }
        BinOp::FloorDiv | BinOp::Mod => {
            if b == 0 {
                return Err(Unwind::new(
                    ExcKind::ZeroDivisionError,
                    "integer division or modulo by zero",
                ));
            }
            let q = a.checked_div(b).ok_or_else(overflow)?;
            let r = a.wrapping_rem(b);
            let adjust = r != 0 && ((r < 0) != (b < 0));
            if op == BinOp::FloorDiv {
                Value::Int(if adjust { q - 1 } else { q })
            } else {
                Value::Int(if adjust { r + b } else { r })
            }
        }
        BinOp::Pow => {
            if b < 0 {
                if a == 0 {
                    return Err(Unwind::new(
                        ExcKind::ZeroDivisionError,
                        "0.0 cannot be raised to a negative power",
                    ));
                }
                Value::Float((a as f64).powf(b as f64))
            } else {
                let exp = u32::try_from(b).map_err(|_| overflow())?;
                Value::Int(a.checked_pow(exp).ok_or_else(overflow)?)
            }
        }
        BinOp::BitAnd => Value::Int(a & b),
        BinOp::BitOr => Value::Int(a | b),
        BinOp::BitXor => Value::Int(a ^ b),
        BinOp::LShift | BinOp::RShift => {
            if b < 0 {
                return Err(Unwind::value_error("negative shift count"));
            }
            if op == BinOp::RShift {
                Value::Int(if b >= 64 { if a < 0 { -1 } else { 0 } } else { a >> b })
            } else {
                let shifted = if b >= 64 { None } else { a.checked_shl(b as u32) };
                match shifted {
                    Some(v) if (v >> b) == a => Value::Int(v),
                    _ if a == 0 => Value::Int(0),
                    _ => return Err(overflow()),
                }
            }
        }
        BinOp::MatMul => return Err(unsupported("@", &Value::Int(a), &Value::Int(b))),
    })
}

fn float_arith(op: BinOp, a: f64, b: f64) -> EvalResult<Option<Value>> {
    let zero = |what: &str| Err(Unwind::new(ExcKind::ZeroDivisionError, what.to_string()));
    Ok(Some(Value::Float(match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return zero("float division by zero");
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return zero("float floor division by zero");
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return zero("float modulo");
            }
            let r = a % b;
            if r != 0.0 && ((r < 0.0) != (b < 0.0)) { r + b } else { r }
        }
        BinOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return zero("0.0 cannot be raised to a negative power");
            }
            if a < 0.0 && b.fract() != 0.0 {
                return Err(Unwind::value_error("math domain error"));
            }
            a.powf(b)
        }
        _ => return Ok(None),
    })))
}

/// Longest string or sequence one operation may build.
pub(crate) const MAX_SEQUENCE_LEN: usize = 1 << 26;

/// Fail with `MemoryError` if `len` items is more than one operation may build.
pub(crate) fn check_len(len: usize) -> EvalResult<usize> {
    if len > MAX_SEQUENCE_LEN {
        return Err(Unwind::new(
            ExcKind::MemoryError,
            format!("cannot build a sequence of {len} items"),
        ));
    }
    Ok(len)
}

/// Length of `count` copies of a `unit`-long sequence. Negative counts give 0.
fn repeated_len(unit: usize, count: i64) -> EvalResult<usize> {
    let count = usize::try_from(count).unwrap_or(0);
    let len = unit
        .checked_mul(count)
        .ok_or_else(|| Unwind::new(ExcKind::OverflowError, "repeated sequence is too long"))?;
    check_len(len)
}

fn repeat(items: &[Value], n: i64) -> EvalResult<Vec<Value>> {
    let len = repeated_len(items.len(), n)?;
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        out.extend_from_slice(items);
    }
    Ok(out)
}

fn repeat_str(s: &str, n: i64) -> EvalResult<String> {
    let len = repeated_len(s.len(), n)?;
    if len == 0 {
        return Ok(String::new());
    }
    Ok(s.repeat(len / s.len()))
}

/// Operators that need no guest code.
fn builtin_binary(op: BinOp, l: &Value, r: &Value) -> EvalResult<Option<Value>> {
    use Value as V;
    if let (V::Bool(a), V::Bool(b)) = (l, r) {
        match op {
            BinOp::BitAnd => return Ok(Some(V::Bool(a & b))),
            BinOp::BitOr => return Ok(Some(V::Bool(a | b))),
            BinOp::BitXor => return Ok(Some(V::Bool(a ^ b))),
            _ => {}
        }
    }
    if let (Some(a), Some(b)) = (l.as_int(), r.as_int()) {
        return int_arith(op, a, b).map(Some);
    }
    if let (Some(a), Some(b)) = (l.as_float(), r.as_float()) {
        return float_arith(op, a, b);
    }
    Ok(match (op, l, r) {
        (BinOp::Add, V::Str(a), V::Str(b)) => Some(V::from(format!("{a}{b}"))),
        (BinOp::Mul, V::Str(s), n) | (BinOp::Mul, n, V::Str(s)) if n.as_int().is_some() => {
            Some(V::from(repeat_str(s, n.as_int().unwrap_or(0))?))
        }
        (BinOp::Add, V::List(a), V::List(b)) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Some(V::list(items))
        }
        (BinOp::Mul, V::List(items), n) | (BinOp::Mul, n, V::List(items)) if n.as_int().is_some() => {
            Some(V::list(repeat(&items.borrow(), n.as_int().unwrap_or(0))?))
        }
        (BinOp::Add, V::Tuple(a), V::Tuple(b)) => {
            Some(V::tuple(a.iter().chain(b.iter()).cloned().collect()))
        }
        (BinOp::Mul, V::Tuple(items), n) | (BinOp::Mul, n, V::Tuple(items)) if n.as_int().is_some() => {
            Some(V::tuple(repeat(items, n.as_int().unwrap_or(0))?))
        }
        (BinOp::BitOr, V::Dict(a), V::Dict(b)) => {
            let mut merged = a.borrow().clone();
            for (k, v) in b.borrow().iter() {
                merged.insert(k.clone(), v.clone())?;
            }
            Some(V::dict(merged))
        }
        _ => None,
    })
}

impl Interpreter {
    /// Method of a user class instance, bound to it.
    fn dunder(&self, value: &Value, name: &str) -> Option<Value> {
        match value {
            Value::Instance(instance) => instance.class.lookup(name),
            Value::Exception(exc) => exc.class.as_ref().and_then(|c| c.lookup(name)),
            _ => None,
        }
        .map(|func| BoundMethod::new(value.clone(), func))
    }

    async fn call_dunder(self: &Rc<Self>, value: &Value, name: &str, args: Vec<Value>) -> EvalResult<Option<Value>> {
        match self.dunder(value, name) {
            Some(method) => Ok(Some(self.call(&method, Args::new(args)).await?)),
            None => Ok(None),
        }
    }

    pub(crate) async fn binary_op(self: &Rc<Self>, op: BinOp, l: &Value, r: &Value) -> EvalResult {
        if op == BinOp::Mod {
            if let Value::Str(template) = l {
                return Ok(Value::from(self.percent_format(template, r).await?));
            }
        }
        if let Some(value) = builtin_binary(op, l, r)? {
            return Ok(value);
        }
        let (forward, reflected) = dunder_name(op);
        if let Some(value) = self.call_dunder(l, forward, vec![r.clone()]).await? {
            return Ok(value);
        }
        if let Some(value) = self.call_dunder(r, reflected, vec![l.clone()]).await? {
            return Ok(value);
        }
        Err(unsupported(op.symbol(), l, r))
    }

    /// Augmented assignment: lists are extended in place.
    pub(crate) async fn inplace_op(self: &Rc<Self>, op: BinOp, l: &Value, r: &Value) -> EvalResult {
        if let Value::List(items) = l {
            match op {
                BinOp::Add => {
                    let extra = self.collect(r).await?;
                    items.borrow_mut().extend(extra);
                    return Ok(l.clone());
                }
                BinOp::Mul if r.as_int().is_some() => {
                    let repeated = repeat(&items.borrow(), r.as_int().unwrap_or(0))?;
                    *items.borrow_mut() = repeated;
                    return Ok(l.clone());
                }
                _ => {}
            }
        }
        self.binary_op(op, l, r).await
    }

    pub(crate) async fn unary_op(self: &Rc<Self>, op: UnaryOp, value: &Value) -> EvalResult {
        let result = match (op, value) {
            (UnaryOp::Neg, Value::Float(f)) => Some(Value::Float(-f)),
            (UnaryOp::Neg, v) if v.as_int().is_some() => Some(Value::Int(
                v.as_int().unwrap_or(0).checked_neg().ok_or_else(overflow)?,
            )),
            (UnaryOp::Pos, Value::Float(f)) => Some(Value::Float(*f)),
            (UnaryOp::Pos, v) if v.as_int().is_some() => v.as_int().map(Value::Int),
            (UnaryOp::Invert, v) if v.as_int().is_some() => v.as_int().map(|i| Value::Int(!i)),
            (UnaryOp::Not, v) => Some(Value::Bool(!self.truthy(v).await?)),
            _ => None,
        };
        if let Some(result) = result {
            return Ok(result);
        }
        let (name, symbol) = match op {
            UnaryOp::Neg => ("__neg__", "-"),
            UnaryOp::Pos => ("__pos__", "+"),
            UnaryOp::Invert => ("__invert__", "~"),
            UnaryOp::Not => ("__bool__", "not"),
        };
        match self.call_dunder(value, name, Vec::new()).await? {
            Some(value) => Ok(value),
            None => Err(Unwind::type_error(format!(
                "bad operand type for unary {symbol}: '{}'",
                value.type_name()
            ))),
        }
    }

    pub(crate) async fn equals(self: &Rc<Self>, l: &Value, r: &Value) -> EvalResult<bool> {
        if let Some(result) = self.call_dunder(l, "__eq__", vec![r.clone()]).await? {
            return self.truthy(&result).await;
        }
        if let Some(result) = self.call_dunder(r, "__eq__", vec![l.clone()]).await? {
            return self.truthy(&result).await;
        }
        Ok(values_equal(l, r))
    }

    pub(crate) async fn compare(self: &Rc<Self>, op: CmpOp, l: &Value, r: &Value) -> EvalResult<bool> {
        let ordering = match op {
            CmpOp::Eq => return self.equals(l, r).await,
            CmpOp::NotEq => return Ok(!self.equals(l, r).await?),
            CmpOp::Is => return Ok(l.is(r)),
            CmpOp::IsNot => return Ok(!l.is(r)),
            CmpOp::In => return self.contains(r, l).await,
            CmpOp::NotIn => return Ok(!self.contains(r, l).await?),
            CmpOp::Lt => Ordering::Less,
            CmpOp::Gt => Ordering::Greater,
            CmpOp::LtE | CmpOp::GtE => Ordering::Equal,
        };
        let matches = |ord: Ordering| match op {
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::LtE => ord != Ordering::Greater,
            CmpOp::GtE => ord != Ordering::Less,
            _ => ord == ordering,
        };
        if let (Some(a), Some(b)) = (l.as_float(), r.as_float()) {
            if let (Some(x), Some(y)) = (l.as_int(), r.as_int()) {
                return Ok(matches(x.cmp(&y)));
            }
            return Ok(a.partial_cmp(&b).is_some_and(matches));
        }
        if let Some(ord) = compare_values(l, r) {
            return Ok(matches(ord));
        }
        let (forward, reflected) = match op {
            CmpOp::Lt => ("__lt__", "__gt__"),
            CmpOp::Gt => ("__gt__", "__lt__"),
            CmpOp::LtE => ("__le__", "__ge__"),
            _ => ("__ge__", "__le__"),
        };
        if let Some(result) = self.call_dunder(l, forward, vec![r.clone()]).await? {
            return self.truthy(&result).await;
        }
        if let Some(result) = self.call_dunder(r, reflected, vec![l.clone()]).await? {
            return self.truthy(&result).await;
        }
        Err(Unwind::type_error(format!(
            "'{}' not supported between instances of '{}' and '{}'",
            op.symbol(),
            l.type_name(),
            r.type_name()
        )))
    }

    /// `item in container`.
    pub(crate) async fn contains(self: &Rc<Self>, container: &Value, item: &Value) -> EvalResult<bool> {
        match container {
            Value::Str(s) => match item {
                Value::Str(needle) => Ok(s.contains(needle.as_ref())),
                other => Err(Unwind::type_error(format!(
                    "'in <string>' requires string as left operand, not {}",
                    other.type_name()
                ))),
            },
            Value::List(items) => Ok(items.borrow().iter().any(|v| values_equal(v, item))),
            Value::Tuple(items) => Ok(items.iter().any(|v| values_equal(v, item))),
            Value::Dict(dict) => dict.borrow().contains(item),
            Value::Range(range) => Ok(item.as_int().is_some_and(|i| {
                let offset = i - range.start;
                offset % range.step == 0 && (offset / range.step) >= 0 && ((offset / range.step) as usize) < range.len()
            })),
            Value::Instance(_) if self.dunder(container, "__contains__").is_some() => {
                let result = self
                    .call_dunder(container, "__contains__", vec![item.clone()])
                    .await?
                    .unwrap_or(Value::Bool(false));
                self.truthy(&result).await
            }
            Value::Instance(_) | Value::Iterator(_) => {
                let iterator = self.iterate(container).await?;
                while let Some(value) = self.next_item(&iterator).await? {
                    if self.equals(&value, item).await? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            other => Err(Unwind::type_error(format!(
                "argument of type '{}' is not iterable",
                other.type_name()
            ))),
        }
    }

    pub(crate) async fn truthy(self: &Rc<Self>, value: &Value) -> EvalResult<bool> {
        if let Value::Instance(_) = value {
            if let Some(result) = self.call_dunder(value, "__bool__", Vec::new()).await? {
                return Ok(result.truthy());
            }
            if let Some(result) = self.call_dunder(value, "__len__", Vec::new()).await? {
                return Ok(result.truthy());
            }
        }
        Ok(value.truthy())
    }

    pub(crate) async fn len(self: &Rc<Self>, value: &Value) -> EvalResult<usize> {
        Ok(match value {
            Value::Str(s) => s.chars().count(),
            Value::List(items) => items.borrow().len(),
            Value::Tuple(items) => items.len(),
            Value::Dict(dict) => dict.borrow().len(),
            Value::Range(range) => range.len(),
            _ => match self.call_dunder(value, "__len__", Vec::new()).await? {
                Some(len) => len
                    .as_int()
                    .and_then(|n| usize::try_from(n).ok())
                    .ok_or_else(|| Unwind::type_error("__len__() should return a non-negative int"))?,
                None => {
                    return Err(Unwind::type_error(format!(
                        "object of type '{}' has no len()",
                        value.type_name()
                    )));
                }
            },
        })
    }

    // Attributes

    /// Attribute lookup. Never runs guest code, so completion and inspection
    /// can use it on live objects.
    pub fn get_attr(&self, obj: &Value, name: &str) -> EvalResult {
        let found = match obj {
            Value::Instance(instance) => {
                if let Some(value) = instance.attrs.borrow().get(name) {
                    return Ok(value.clone());
                }
                match name {
                    "__class__" => Some(Value::Class(instance.class.clone())),
                    "__dict__" => {
                        let mut dict = Dict::new();
                        for (k, v) in instance.attrs.borrow().iter() {
                            dict.insert_str(k, v.clone());
                        }
                        Some(Value::dict(dict))
                    }
                    _ => instance.class.lookup(name).map(|v| bind(obj, v)),
                }
            }
            Value::Class(class) => match name {
                "__name__" => Some(Value::str(&class.name)),
                "__doc__" => Some(class.doc.as_deref().map_or(Value::None, Value::str)),
                "__bases__" => Some(Value::tuple(class.bases.clone())),
                _ => class.lookup(name),
            },
            Value::Module(module) => match name {
                "__name__" => Some(Value::str(&module.name)),
                "__doc__" => Some(Value::str(module.doc)),
                _ => module.get(name),
            },
            Value::Exception(exc) => match name {
                "args" => Some(Value::tuple(exc.args.borrow().clone())),
                "__cause__" => Some(exc.cause.borrow().clone().unwrap_or(Value::None)),
                "__class__" => Some(exception_class(exc)),
                _ => exc.attrs.borrow().get(name).cloned().or_else(|| {
                    exc.class
                        .as_ref()
                        .and_then(|c| c.lookup(name))
                        .map(|v| bind(obj, v))
                }),
            },
            Value::Function(func) => match name {
                "__name__" => Some(Value::str(&func.name)),
                "__doc__" => Some(func.doc().map_or(Value::None, Value::str)),
                _ => func.attrs.borrow().get(name).cloned(),
            },
            Value::Native(native) => match name {
                "__name__" => Some(Value::str(native.name)),
                "__doc__" => Some(Value::str(native.doc)),
                _ => None,
            },
            Value::Type(ty) => match name {
                "__name__" => Some(Value::str(ty.name())),
                _ => methods::for_type(*ty, name).map(Value::Native),
            },
            Value::ExcType(kind) => match name {
                "__name__" => Some(Value::str(kind.name())),
                _ => None,
            },
            Value::Super(sup) => return self.super_attr(sup, name),
            Value::Widget(widget) => return ui::widget_attr(obj, widget, name),
            _ => methods::for_value(obj, name).map(|native| bind_native(obj, native)),
        };
        found.ok_or_else(|| match obj {
            Value::Module(module) => Unwind::new(
                ExcKind::AttributeError,
                format!("module '{}' has no attribute '{name}'", module.name),
            ),
            Value::Class(class) => Unwind::new(
                ExcKind::AttributeError,
                format!("type object '{}' has no attribute '{name}'", class.name),
            ),
            other => Unwind::attribute_error(&other.type_name(), name),
        })
    }

    fn super_attr(&self, sup: &super::object::SuperObj, name: &str) -> EvalResult {
        let receiver_class = match &sup.receiver {
            Value::Instance(instance) => Some(instance.class.clone()),
            Value::Exception(exc) => exc.class.clone(),
            _ => None,
        };
        if let Some(class) = receiver_class {
            let mro = class.mro();
            let start = mro
                .iter()
                .position(|c| Rc::ptr_eq(c, &sup.class))
                .map_or(mro.len(), |i| i + 1);
            for base in &mro[start..] {
                if let Some(value) = base.attrs.borrow().get(name) {
                    return Ok(bind(&sup.receiver, value.clone()));
                }
            }
        }
        if name == "__init__" {
            return Ok(BoundMethod::new(sup.receiver.clone(), Value::Native(&BASE_INIT)));
        }
        Err(Unwind::attribute_error("super", name))
    }

    pub fn set_attr(&self, obj: &Value, name: &str, value: Value) -> EvalResult<()> {
        match obj {
            Value::Instance(instance) => {
                instance.attrs.borrow_mut().insert(name.to_string(), value);
            }
            Value::Class(class) => {
                class.attrs.borrow_mut().insert(name.to_string(), value);
            }
            Value::Module(module) => module.set(name, value),
            Value::Function(func) => {
                func.attrs.borrow_mut().insert(name.to_string(), value);
            }
            Value::Exception(exc) => {
                if name == "args" {
                    *exc.args.borrow_mut() = value.iter_items().unwrap_or_default();
                } else {
                    exc.attrs.borrow_mut().insert(name.to_string(), value);
                }
            }
            Value::Widget(widget) => return ui::set_widget_attr(self, widget, name, value),
            other => {
                return Err(Unwind::new(
                    ExcKind::AttributeError,
                    format!(
                        "'{}' object attribute '{name}' is read-only",
                        other.type_name()
                    ),
                ));
            }
        }
        Ok(())
    }

    pub(crate) fn del_attr(&self, obj: &Value, name: &str) -> EvalResult<()> {
        let removed = match obj {
            Value::Instance(instance) => instance.attrs.borrow_mut().shift_remove(name).is_some(),
            Value::Class(class) => class.attrs.borrow_mut().shift_remove(name).is_some(),
            Value::Module(module) => module.attrs.borrow_mut().shift_remove(name).is_some(),
            Value::Function(func) => func.attrs.borrow_mut().shift_remove(name).is_some(),
            _ => false,
        };
        if removed {
            Ok(())
        } else {
            Err(Unwind::attribute_error(&obj.type_name(), name))
        }
    }

    /// Attribute names visible on a value, as `dir()` reports them.
    pub fn attr_names(&self, obj: &Value) -> Vec<String> {
        let mut names: Vec<String> = match obj {
            Value::Instance(instance) => {
                let mut names: Vec<String> = instance.attrs.borrow().keys().cloned().collect();
                names.extend(instance.class.attr_names());
                names.push("__class__".into());
                names.push("__dict__".into());
                names
            }
            Value::Class(class) => {
                let mut names = class.attr_names();
                names.extend(["__name__".into(), "__doc__".into(), "__bases__".into()]);
                names
            }
            Value::Module(module) => {
                let mut names: Vec<String> = module.attrs.borrow().keys().cloned().collect();
                names.extend(["__name__".into(), "__doc__".into()]);
                names
            }
            Value::Exception(exc) => {
                let mut names: Vec<String> = vec!["args".into(), "__cause__".into(), "__class__".into()];
                names.extend(exc.attrs.borrow().keys().cloned());
                if let Some(class) = &exc.class {
                    names.extend(class.attr_names());
                }
                names
            }
            Value::Function(func) => {
                let mut names: Vec<String> = func.attrs.borrow().keys().cloned().collect();
                names.extend(["__name__".into(), "__doc__".into()]);
                names
            }
            Value::Native(_) | Value::ExcType(_) => vec!["__name__".into(), "__doc__".into()],
            Value::Type(ty) => {
                let mut names: Vec<String> = methods::names_for_type(*ty).iter().map(|s| s.to_string()).collect();
                names.push("__name__".into());
                names
            }
            Value::Widget(widget) => ui::widget_attr_names(widget),
            other => methods::names_for_value(other).iter().map(|s| s.to_string()).collect(),
        };
        names.sort();
        names.dedup();
        names
    }

    /// Public members of a module, for `from m import *`.
    pub(crate) fn public_members(&self, module: &Value) -> Vec<(String, Value)> {
        match module {
            Value::Module(module) => module
                .attrs
                .borrow()
                .iter()
                .filter(|(name, _)| !name.starts_with('_'))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
            _ => Vec::new(),
        }
    }

    // Items

    pub(crate) async fn get_item(self: &Rc<Self>, obj: &Value, index: &Value) -> EvalResult {
        match obj {
            Value::List(items) => {
                let items = items.borrow();
                let i = index_of(index, "list")?;
                normalize_index(i, items.len())
                    .map(|i| items[i].clone())
                    .ok_or_else(|| Unwind::new(ExcKind::IndexError, "list index out of range"))
            }
            Value::Tuple(items) => {
                let i = index_of(index, "tuple")?;
                normalize_index(i, items.len())
                    .map(|i| items[i].clone())
                    .ok_or_else(|| Unwind::new(ExcKind::IndexError, "tuple index out of range"))
            }
            Value::Str(s) => {
                let i = index_of(index, "string")?;
                let len = s.chars().count();
                normalize_index(i, len)
                    .and_then(|i| s.chars().nth(i))
                    .map(|c| Value::from(c.to_string()))
                    .ok_or_else(|| Unwind::new(ExcKind::IndexError, "string index out of range"))
            }
            Value::Range(range) => {
                let i = index_of(index, "range")?;
                normalize_index(i, range.len())
                    .and_then(|i| range.get(i))
                    .map(Value::Int)
                    .ok_or_else(|| Unwind::new(ExcKind::IndexError, "range object index out of range"))
            }
            Value::Dict(dict) => {
                let found = dict.borrow().get(index)?;
                found.ok_or_else(|| Unwind::key_error(index.clone()))
            }
            _ => match self.call_dunder(obj, "__getitem__", vec![index.clone()]).await? {
                Some(value) => Ok(value),
                None => Err(Unwind::type_error(format!(
                    "'{}' object is not subscriptable",
                    obj.type_name()
                ))),
            },
        }
    }

    pub(crate) fn get_slice(&self, obj: &Value, bounds: [Option<i64>; 3]) -> EvalResult {
        match obj {
            Value::List(items) => {
                let items = items.borrow();
                let picked = slice_positions(items.len(), bounds)?;
                Ok(Value::list(picked.into_iter().map(|i| items[i].clone()).collect()))
            }
            Value::Tuple(items) => {
                let picked = slice_positions(items.len(), bounds)?;
                Ok(Value::tuple(picked.into_iter().map(|i| items[i].clone()).collect()))
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let picked = slice_positions(chars.len(), bounds)?;
                Ok(Value::from(picked.into_iter().map(|i| chars[i]).collect::<String>()))
            }
            Value::Range(range) => {
                let picked = slice_positions(range.len(), bounds)?;
                Ok(Value::list(
                    picked.into_iter().filter_map(|i| range.get(i)).map(Value::Int).collect(),
                ))
            }
            other => Err(Unwind::type_error(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    pub(crate) async fn set_slice(self: &Rc<Self>, obj: &Value, bounds: [Option<i64>; 3], value: Value) -> EvalResult<()> {
        let Value::List(items) = obj else {
            return Err(Unwind::type_error(format!(
                "'{}' object does not support slice assignment",
                obj.type_name()
            )));
        };
        let replacement = self.collect(&value).await?;
        let mut items = items.borrow_mut();
        if bounds[2].is_none_or(|step| step == 1) {
            let len = items.len() as i64;
            let clamp = |b: i64| (if b < 0 { b + len } else { b }).clamp(0, len) as usize;
            let start = bounds[0].map_or(0, clamp);
            let stop = bounds[1].map_or(items.len(), clamp).max(start);
            items.splice(start..stop, replacement);
            return Ok(());
        }
        let picked = slice_positions(items.len(), bounds)?;
        if picked.len() != replacement.len() {
            return Err(Unwind::value_error(format!(
                "attempt to assign sequence of size {} to extended slice of size {}",
                replacement.len(),
                picked.len()
            )));
        }
        for (i, value) in picked.into_iter().zip(replacement) {
            items[i] = value;
        }
        Ok(())
    }

    pub(crate) async fn set_item(self: &Rc<Self>, obj: &Value, index: Value, value: Value) -> EvalResult<()> {
        match obj {
            Value::List(items) => {
                let mut items = items.borrow_mut();
                let i = index_of(&index, "list")?;
                let slot = normalize_index(i, items.len())
                    .ok_or_else(|| Unwind::new(ExcKind::IndexError, "list assignment index out of range"))?;
                items[slot] = value;
                Ok(())
            }
            Value::Dict(dict) => dict.borrow_mut().insert(index, value),
            _ => match self.call_dunder(obj, "__setitem__", vec![index, value]).await? {
                Some(_) => Ok(()),
                None => Err(Unwind::type_error(format!(
                    "'{}' object does not support item assignment",
                    obj.type_name()
                ))),
            },
        }
    }

    pub(crate) async fn del_item(self: &Rc<Self>, obj: &Value, index: &Value) -> EvalResult<()> {
        match obj {
            Value::List(items) => {
                let mut items = items.borrow_mut();
                let i = index_of(index, "list")?;
                let slot = normalize_index(i, items.len())
                    .ok_or_else(|| Unwind::new(ExcKind::IndexError, "list assignment index out of range"))?;
                items.remove(slot);
                Ok(())
            }
            Value::Dict(dict) => match dict.borrow_mut().remove(index)? {
                Some(_) => Ok(()),
                None => Err(Unwind::key_error(index.clone())),
            },
            _ => match self.call_dunder(obj, "__delitem__", vec![index.clone()]).await? {
                Some(_) => Ok(()),
                None => Err(Unwind::type_error(format!(
                    "'{}' object does not support item deletion",
                    obj.type_name()
                ))),
            },
        }
    }

    // Iteration

    pub(crate) async fn iterate(self: &Rc<Self>, value: &Value) -> EvalResult<Rc<RefCell<IterState>>> {
        let state = match value {
            Value::List(list) => IterState::List { list: list.clone(), pos: 0 },
            Value::Range(range) => IterState::Range {
                next: range.start,
                remaining: range.len(),
                step: range.step,
            },
            Value::Iterator(state) => return Ok(state.clone()),
            Value::Instance(_) => {
                if let Some(iterator) = self.call_dunder(value, "__iter__", Vec::new()).await? {
                    return match &iterator {
                        Value::Iterator(state) => Ok(state.clone()),
                        Value::Instance(_) if self.dunder(&iterator, "__next__").is_some() => {
                            Ok(Rc::new(RefCell::new(IterState::Protocol(iterator))))
                        }
                        _ => match iterator.iter_items() {
                            Some(items) => Ok(Rc::new(RefCell::new(IterState::Items { items, pos: 0 }))),
                            None => Err(Unwind::type_error(format!(
                                "iter() returned non-iterator of type '{}'",
                                iterator.type_name()
                            ))),
                        },
                    };
                }
                if self.dunder(value, "__next__").is_some() {
                    IterState::Protocol(value.clone())
                } else if self.dunder(value, "__getitem__").is_some() {
                    return Err(Unwind::type_error("sequence protocol iteration is not supported"));
                } else {
                    return Err(not_iterable(value));
                }
            }
            other => match other.iter_items() {
                Some(items) => IterState::Items { items, pos: 0 },
                None => return Err(not_iterable(other)),
            },
        };
        Ok(Rc::new(RefCell::new(state)))
    }

    /// Advance an iterator; `None` when exhausted.
    pub(crate) async fn next_item(self: &Rc<Self>, state: &Rc<RefCell<IterState>>) -> EvalResult<Option<Value>> {
        let protocol = {
            let mut state = state.borrow_mut();
            match &mut *state {
                IterState::Items { items, pos } => {
                    let item = items.get(*pos).cloned();
                    *pos += 1;
                    return Ok(item);
                }
                IterState::List { list, pos } => {
                    let item = list.borrow().get(*pos).cloned();
                    *pos += 1;
                    return Ok(item);
                }
                IterState::Range { next, remaining, step } => {
                    if *remaining == 0 {
                        return Ok(None);
                    }
                    let item = *next;
                    *remaining -= 1;
                    *next += *step;
                    return Ok(Some(Value::Int(item)));
                }
                IterState::Protocol(obj) => obj.clone(),
            }
        };
        match self.call_dunder(&protocol, "__next__", Vec::new()).await {
            Ok(value) => Ok(value),
            Err(Unwind::Raise(exc)) if exc.kind == ExcKind::StopIteration => Ok(None),
            Err(unwind) => Err(unwind),
        }
    }

    /// All items of an iterable.
    pub(crate) async fn collect(self: &Rc<Self>, value: &Value) -> EvalResult<Vec<Value>> {
        if let Some(items) = value.iter_items() {
            return Ok(items);
        }
        let iterator = self.iterate(value).await?;
        let mut out = Vec::new();
        while let Some(item) = self.next_item(&iterator).await? {
            self.check_abort()?;
            out.push(item);
        }
        Ok(out)
    }

    // Conversions

    /// `str(value)`.
    pub fn to_str<'a>(self: &'a Rc<Self>, value: &'a Value) -> LocalBoxFuture<'a, EvalResult<String>> {
        Box::pin(async move {
            match value {
                Value::Str(s) => Ok(s.to_string()),
                Value::Instance(_) => match self.call_dunder(value, "__str__", Vec::new()).await? {
                    Some(Value::Str(s)) => Ok(s.to_string()),
                    Some(other) => Err(Unwind::type_error(format!(
                        "__str__ returned non-string (type {})",
                        other.type_name()
                    ))),
                    None => self.repr(value).await,
                },
                Value::Exception(exc) => self.exception_message(exc).await,
                Value::Widget(widget) => ui::widget_str(widget),
                _ => self.repr(value).await,
            }
        })
    }

    /// Message shown after the exception type in tracebacks.
    pub async fn exception_message(self: &Rc<Self>, exc: &Rc<ExceptionObj>) -> EvalResult<String> {
        let value = Value::Exception(exc.clone());
        if let Some(result) = self.call_dunder(&value, "__str__", Vec::new()).await? {
            return self.to_str(&result).await;
        }
        let args = exc.args.borrow().clone();
        match args.as_slice() {
            [] => Ok(String::new()),
            [single] if exc.kind == ExcKind::KeyError => self.repr(single).await,
            [single] => self.to_str(single).await,
            _ => self.repr(&Value::tuple(args)).await,
        }
    }

    /// `repr(value)`.
    pub fn repr<'a>(self: &'a Rc<Self>, value: &'a Value) -> LocalBoxFuture<'a, EvalResult<String>> {
        Box::pin(async move {
            let id = value.identity();
            let container = matches!(value, Value::List(_) | Value::Dict(_) | Value::Tuple(_));
            if container {
                if self.repr_active.borrow().contains(&id) {
                    return Ok(match value {
                        Value::Dict(_) => "{...}".into(),
                        Value::Tuple(_) => "(...)".into(),
                        _ => "[...]".into(),
                    });
                }
                self.repr_active.borrow_mut().push(id);
            }
            let result = self.repr_inner(value).await;
            if container {
                self.repr_active.borrow_mut().retain(|&active| active != id);
            }
            result
        })
    }

    async fn repr_inner(self: &Rc<Self>, value: &Value) -> EvalResult<String> {
        Ok(match value {
            Value::Str(s) => repr_str(s),
            Value::List(items) => {
                let items = items.borrow().clone();
                format!("[{}]", self.repr_join(&items).await?)
            }
            Value::Tuple(items) => {
                if items.len() == 1 {
                    format!("({},)", self.repr(&items[0]).await?)
                } else {
                    format!("({})", self.repr_join(items).await?)
                }
            }
            Value::Dict(dict) => {
                let entries: Vec<(Value, Value)> = dict
                    .borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                let mut parts = Vec::with_capacity(entries.len());
                for (k, v) in &entries {
                    parts.push(format!("{}: {}", self.repr(k).await?, self.repr(v).await?));
                }
                format!("{{{}}}", parts.join(", "))
            }
            Value::Range(range) => {
                if range.step == 1 {
                    format!("range({}, {})", range.start, range.stop)
                } else {
                    format!("range({}, {}, {})", range.start, range.stop, range.step)
                }
            }
            Value::Float(f) => format_float(*f),
            Value::Type(ty) => format!("<class '{}'>", ty.name()),
            Value::ExcType(kind) => format!("<class '{}'>", kind.name()),
            Value::Class(class) => format!("<class '__main__.{}'>", class.name),
            Value::Exception(exc) => {
                if let Some(result) = self.call_dunder(value, "__repr__", Vec::new()).await? {
                    return self.to_str(&result).await;
                }
                let args = exc.args.borrow().clone();
                format!("{}({})", exc.type_name(), self.repr_join(&args).await?)
            }
            Value::Function(func) => format!("<function {} at {:#x}>", func.name, value.identity()),
            Value::BoundMethod(method) => {
                let name = match &method.func {
                    Value::Function(func) => func.name.clone(),
                    Value::Native(native) => native.name.to_string(),
                    other => other.type_name(),
                };
                format!("<bound method {name} of {}>", method.receiver.type_name())
            }
            Value::Instance(instance) => {
                if let Some(result) = self.call_dunder(value, "__repr__", Vec::new()).await? {
                    return self.to_str(&result).await;
                }
                format!("<__main__.{} object at {:#x}>", instance.class.name, value.identity())
            }
            Value::Module(module) => format!("<module '{}' (built-in)>", module.name),
            Value::Coroutine(co) => format!("<coroutine object {} at {:#x}>", co.name, value.identity()),
            Value::Task(task) => {
                let state = if task.is_done() { "finished" } else { "pending" };
                format!("<Task {state} name='{}'>", task.name)
            }
            Value::Iterator(_) => format!("<iterator object at {:#x}>", value.identity()),
            Value::Stream(kind) => format!("<_io.TextIOWrapper name='<{}>'>", kind.file_name()),
            Value::Super(sup) => format!("<super: <class '{}'>>", sup.class.name),
            other => format!("{other:?}"),
        })
    }

    async fn repr_join(self: &Rc<Self>, items: &[Value]) -> EvalResult<String> {
        let mut parts = Vec::with_capacity(items.len());
        for item in items {
            parts.push(self.repr(item).await?);
        }
        Ok(parts.join(", "))
    }
}

fn not_iterable(value: &Value) -> Unwind {
    Unwind::type_error(format!("'{}' object is not iterable", value.type_name()))
}

fn bind(obj: &Value, value: Value) -> Value {
    match value {
        Value::Function(_) => BoundMethod::new(obj.clone(), value),
        other => other,
    }
}

fn bind_native(obj: &Value, native: &'static NativeFunction) -> Value {
    BoundMethod::new(obj.clone(), Value::Native(native))
}

/// `object.__init__` / `BaseException.__init__` reached through `super()`.
static BASE_INIT: NativeFunction = NativeFunction::sync(
    "__init__",
    "(self, *args)",
    "Initialize self.",
    |_, args| {
        let mut positional = args.positional.into_iter();
        if let Some(Value::Exception(exc)) = positional.next() {
            *exc.args.borrow_mut() = positional.collect();
        }
        Ok(Value::None)
    },
);

/// String literal form with the quote style the guest language prefers.
pub fn repr_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

#[cfg(test)]
mod tests {
    use super::super::testing::eval_repr;
    use super::*;

    #[tokio::test]
    async fn test_huge_repetition_raises() {
        assert_eq!(eval_repr("'ab' * 2**62").await, "!MemoryError");
        assert_eq!(eval_repr("[1, 2] * 2**62").await, "!MemoryError");
        assert_eq!(eval_repr("2**62 * (1,)").await, "!MemoryError");
        assert_eq!(eval_repr("'abcdefgh' * 2**62").await, "!OverflowError");
        assert_eq!(eval_repr("x = [0]\nx *= 2**40\nx").await, "!MemoryError");
        assert_eq!(
            eval_repr("try:\n    'ab' * 2**62\nexcept MemoryError:\n    r = 'caught'\nr").await,
            "'caught'"
        );
    }

    #[tokio::test]
    async fn test_repetition_edge_counts() {
        assert_eq!(eval_repr("'ab' * 3").await, "'ababab'");
        assert_eq!(eval_repr("[1, 2] * -1").await, "[]");
        assert_eq!(eval_repr("'' * 2**62").await, "''");
        assert_eq!(eval_repr("[] * 2**62").await, "[]");
    }

    #[tokio::test]
    async fn test_huge_padding_widths_raise() {
        assert_eq!(eval_repr("'a'.ljust(2**40)").await, "!MemoryError");
        assert_eq!(eval_repr("'7'.zfill(2**40)").await, "!MemoryError");
        assert_eq!(eval_repr("format(1, '99999999999')").await, "!MemoryError");
        assert_eq!(eval_repr("'%99999999999d' % 1").await, "!MemoryError");
        assert_eq!(eval_repr("'a'.rjust(3, '*')").await, "'**a'");
    }

    #[test]
    fn test_slice_positions() {
        assert_eq!(slice_positions(5, [Some(1), Some(3), None]).unwrap(), vec![1, 2]);
        assert_eq!(slice_positions(5, [None, None, Some(-1)]).unwrap(), vec![4, 3, 2, 1, 0]);
        assert_eq!(slice_positions(5, [Some(-2), None, None]).unwrap(), vec![3, 4]);
        assert_eq!(slice_positions(5, [None, None, Some(2)]).unwrap(), vec![0, 2, 4]);
        assert!(slice_positions(5, [None, None, Some(0)]).is_err());
    }

    #[test]
    fn test_repr_str_quotes() {
        assert_eq!(repr_str("abc"), "'abc'");
        assert_eq!(repr_str("it's"), "\"it's\"");
        assert_eq!(repr_str("a\nb"), "'a\\nb'");
    }

    #[tokio::test]
    async fn test_arithmetic_semantics() {
        assert_eq!(eval_repr("(-7 // 2, -7 % 2, 7 % -3, 2 ** 10, 7 / 2)").await, "(-4, 1, -2, 1024, 3.5)");
        assert_eq!(eval_repr("1 / 0").await, "!ZeroDivisionError");
        assert_eq!(eval_repr("(True + True, 3 * 'ab', [0] * 3)").await, "(2, 'ababab', [0, 0, 0])");
        assert_eq!(eval_repr("'a' + 1").await, "!TypeError");
        assert_eq!(eval_repr("2 ** -1").await, "0.5");
    }

    #[tokio::test]
    async fn test_comparisons() {
        assert_eq!(eval_repr("(1 < 2 < 3, 1 < 3 < 2, 'a' in 'cat', 3 not in [1, 2])").await, "(True, False, True, True)");
        assert_eq!(eval_repr("[1, 2] < [1, 3]").await, "True");
        assert_eq!(eval_repr("1 < 'a'").await, "!TypeError");
        assert_eq!(eval_repr("(None is None, 1 == 1.0)").await, "(True, True)");
    }

    #[tokio::test]
    async fn test_indexing_and_slicing() {
        assert_eq!(eval_repr("x = [1, 2, 3, 4]\n(x[-1], x[1:3], x[::-1], 'hello'[1:4])").await, "(4, [2, 3], [4, 3, 2, 1], 'ell')");
        assert_eq!(eval_repr("x = [1, 2, 3]\nx[0:2] = ['a']\nx").await, "['a', 3]");
        assert_eq!(eval_repr("[1][5]").await, "!IndexError");
        assert_eq!(eval_repr("{'a': 1}['b']").await, "!KeyError");
    }

    #[tokio::test]
    async fn test_user_dunders() {
        let src = "\
class V:
    def __init__(self, x):
        self.x = x
    def __add__(self, other):
        return V(self.x + other.x)
    def __eq__(self, other):
        return self.x == other.x
    def __len__(self):
        return self.x
    def __repr__(self):
        return f'V({self.x})'
(V(1) + V(2), V(3) == V(3), len(V(4)), bool(V(0)))";
        assert_eq!(eval_repr(src).await, "(V(3), True, 4, False)");
    }

    #[tokio::test]
    async fn test_iteration_protocol() {
        let src = "\
class Count:
    def __init__(self, n):
        self.i = 0
        self.n = n
    def __iter__(self):
        return self
    def __next__(self):
        if self.i >= self.n:
            raise StopIteration
        self.i += 1
        return self.i
list(Count(3))";
        assert_eq!(eval_repr(src).await, "[1, 2, 3]");
    }

    #[tokio::test]
    async fn test_recursive_repr() {
        assert_eq!(eval_repr("a = [1]\na.append(a)\na").await, "[1, [...]]");
    }
}
