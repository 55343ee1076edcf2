//! Guest values.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use super::exception::{EvalResult, ExcKind, ExceptionObj, Unwind};
use super::object::{
    BoundMethod, Class, Coroutine, Function, Instance, ModuleObj, NativeFunction, SuperObj, Task,
};
use crate::sandbox::protocol::StreamKind;
use crate::sandbox::widgets::Widget;

/// A guest value.
///
/// Scalars are stored inline; everything with identity or interior
/// mutability is reference-counted. Values never leave the sandbox thread.
#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<Vec<Value>>),
    Dict(Rc<RefCell<Dict>>),
    Range(RangeValue),
    Type(BuiltinType),
    ExcType(ExcKind),
    Exception(Rc<ExceptionObj>),
    Function(Rc<Function>),
    Native(&'static NativeFunction),
    BoundMethod(Rc<BoundMethod>),
    Class(Rc<Class>),
    Instance(Rc<Instance>),
    Module(Rc<ModuleObj>),
    Coroutine(Rc<Coroutine>),
    Task(Rc<Task>),
    Iterator(Rc<RefCell<IterState>>),
    Super(Rc<SuperObj>),
    Stream(StreamKind),
    Widget(Rc<Widget>),
}

/// Built-in types exposed as callable values (`int`, `str`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinType {
    Object,
    NoneType,
    Bool,
    Int,
    Float,
    Str,
    List,
    Tuple,
    Dict,
    Range,
    Type,
    Function,
}

impl BuiltinType {
    pub fn name(self) -> &'static str {
        match self {
            BuiltinType::Object => "object",
            BuiltinType::NoneType => "NoneType",
            BuiltinType::Bool => "bool",
            BuiltinType::Int => "int",
            BuiltinType::Float => "float",
            BuiltinType::Str => "str",
            BuiltinType::List => "list",
            BuiltinType::Tuple => "tuple",
            BuiltinType::Dict => "dict",
            BuiltinType::Range => "range",
            BuiltinType::Type => "type",
            BuiltinType::Function => "function",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeValue {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl RangeValue {
    pub fn len(&self) -> usize {
        let span = if self.step > 0 {
            self.stop.saturating_sub(self.start)
        } else {
            self.start.saturating_sub(self.stop)
        };
        if span <= 0 {
            0
        } else {
            let step = self.step.unsigned_abs() as i64;
            ((span + step - 1) / step) as usize
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<i64> {
        (index < self.len()).then(|| self.start + self.step * index as i64)
    }
}

/// Iteration state behind `iter()` and `for` loops.
pub enum IterState {
    Items { items: Vec<Value>, pos: usize },
    /// Live list: sees appends made during iteration.
    List { list: Rc<RefCell<Vec<Value>>>, pos: usize },
    Range { next: i64, remaining: usize, step: i64 },
    /// User object implementing `__next__`.
    Protocol(Value),
}

/// Hashable projection of a value, used as a dict key.
///
/// Numbers that compare equal hash equal (`1`, `1.0` and `True` are one key).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    None,
    Int(i64),
    Float(u64),
    Str(Rc<str>),
    Tuple(Vec<Key>),
    Static(&'static str),
    Id(usize),
}

impl Key {
    pub fn from_value(value: &Value) -> EvalResult<Key> {
        Ok(match value {
            Value::None => Key::None,
            Value::Bool(b) => Key::Int(*b as i64),
            Value::Int(i) => Key::Int(*i),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.abs() < 9.0e15 {
                    Key::Int(*f as i64)
                } else {
                    Key::Float(f.to_bits())
                }
            }
            Value::Str(s) => Key::Str(s.clone()),
            Value::Tuple(items) => Key::Tuple(
                items
                    .iter()
                    .map(Key::from_value)
                    .collect::<EvalResult<Vec<_>>>()?,
            ),
            Value::Type(t) => Key::Static(t.name()),
            Value::ExcType(k) => Key::Static(k.name()),
            Value::Native(n) => Key::Static(n.name),
            Value::Range(_) | Value::List(_) | Value::Dict(_) => {
                return Err(Unwind::type_error(format!(
                    "unhashable type: '{}'",
                    value.type_name()
                )));
            }
            other => Key::Id(other.identity()),
        })
    }
}

/// Insertion-ordered dictionary.
#[derive(Default, Clone)]
pub struct Dict {
    map: IndexMap<Key, (Value, Value)>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn get(&self, key: &Value) -> EvalResult<Option<Value>> {
        let key = Key::from_value(key)?;
        Ok(self.map.get(&key).map(|(_, v)| v.clone()))
    }

    pub fn get_str(&self, key: &str) -> Option<Value> {
        self.map.get(&Key::Str(key.into())).map(|(_, v)| v.clone())
    }

    pub fn contains(&self, key: &Value) -> EvalResult<bool> {
        Ok(self.map.contains_key(&Key::from_value(key)?))
    }

    pub fn insert(&mut self, key: Value, value: Value) -> EvalResult<()> {
        let hashed = Key::from_value(&key)?;
        match self.map.get_mut(&hashed) {
            Some(entry) => entry.1 = value,
            None => {
                self.map.insert(hashed, (key, value));
            }
        }
        Ok(())
    }

    pub fn insert_str(&mut self, key: &str, value: Value) {
        let key: Rc<str> = key.into();
        self.map
            .insert(Key::Str(key.clone()), (Value::Str(key), value));
    }

    pub fn remove(&mut self, key: &Value) -> EvalResult<Option<Value>> {
        let key = Key::from_value(key)?;
        Ok(self.map.shift_remove(&key).map(|(_, v)| v))
    }

    pub fn pop_last(&mut self) -> Option<(Value, Value)> {
        self.map.pop().map(|(_, kv)| kv)
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.map.values().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> Vec<Value> {
        self.map.values().map(|(k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.map.values().map(|(_, v)| v.clone()).collect()
    }

    pub fn items(&self) -> Vec<Value> {
        self.map
            .values()
            .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
            .collect()
    }
}

impl Value {
    pub fn str(s: &str) -> Value {
        Value::Str(s.into())
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::new(items))
    }

    pub fn dict(dict: Dict) -> Value {
        Value::Dict(Rc::new(RefCell::new(dict)))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Integer view (`bool` counts as an integer).
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    /// Numeric view.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn type_name(&self) -> String {
        match self {
            Value::None => "NoneType".into(),
            Value::Bool(_) => "bool".into(),
            Value::Int(_) => "int".into(),
            Value::Float(_) => "float".into(),
            Value::Str(_) => "str".into(),
            Value::List(_) => "list".into(),
            Value::Tuple(_) => "tuple".into(),
            Value::Dict(_) => "dict".into(),
            Value::Range(_) => "range".into(),
            Value::Type(_) | Value::ExcType(_) | Value::Class(_) => "type".into(),
            Value::Exception(exc) => exc.type_name(),
            Value::Function(_) => "function".into(),
            Value::Native(_) => "builtin_function_or_method".into(),
            Value::BoundMethod(_) => "method".into(),
            Value::Instance(inst) => inst.class.name.clone(),
            Value::Module(_) => "module".into(),
            Value::Coroutine(_) => "coroutine".into(),
            Value::Task(_) => "Task".into(),
            Value::Iterator(_) => "iterator".into(),
            Value::Super(_) => "super".into(),
            Value::Stream(_) => "TextIOWrapper".into(),
            Value::Widget(w) => w.kind().name().into(),
        }
    }

    /// Truthiness for values that need no guest code to decide.
    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::Dict(d) => !d.borrow().is_empty(),
            Value::Range(r) => !r.is_empty(),
            _ => true,
        }
    }

    /// Address-based identity for reference values; 0 for scalars.
    pub fn identity(&self) -> usize {
        match self {
            Value::Str(s) => Rc::as_ptr(s) as *const u8 as usize,
            Value::List(v) => Rc::as_ptr(v) as usize,
            Value::Tuple(v) => Rc::as_ptr(v) as usize,
            Value::Dict(v) => Rc::as_ptr(v) as usize,
            Value::Exception(v) => Rc::as_ptr(v) as usize,
            Value::Function(v) => Rc::as_ptr(v) as usize,
            Value::Native(v) => *v as *const NativeFunction as usize,
            Value::BoundMethod(v) => Rc::as_ptr(v) as usize,
            Value::Class(v) => Rc::as_ptr(v) as usize,
            Value::Instance(v) => Rc::as_ptr(v) as usize,
            Value::Module(v) => Rc::as_ptr(v) as usize,
            Value::Coroutine(v) => Rc::as_ptr(v) as usize,
            Value::Task(v) => Rc::as_ptr(v) as usize,
            Value::Iterator(v) => Rc::as_ptr(v) as usize,
            Value::Super(v) => Rc::as_ptr(v) as usize,
            Value::Widget(v) => Rc::as_ptr(v) as usize,
            _ => 0,
        }
    }

    /// `is` comparison.
    pub fn is(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Range(a), Value::Range(b)) => a == b,
            (Value::Type(a), Value::Type(b)) => a == b,
            (Value::ExcType(a), Value::ExcType(b)) => a == b,
            (Value::Stream(a), Value::Stream(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b) || a == b,
            _ => {
                let id = self.identity();
                id != 0 && id == other.identity()
            }
        }
    }

    /// Iteration without running guest code, for containers and strings.
    pub fn iter_items(&self) -> Option<Vec<Value>> {
        Some(match self {
            Value::List(items) => items.borrow().clone(),
            Value::Tuple(items) => items.as_ref().clone(),
            Value::Str(s) => s.chars().map(|c| Value::Str(c.to_string().into())).collect(),
            Value::Dict(d) => d.borrow().keys(),
            Value::Range(r) => (0..r.len()).filter_map(|i| r.get(i)).map(Value::Int).collect(),
            _ => return None,
        })
    }
}

/// Structural equality for values that need no guest code to compare.
/// Objects compare by identity.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::List(x), Value::List(y)) => {
            Rc::ptr_eq(x, y) || seq_equal(&x.borrow(), &y.borrow())
        }
        (Value::Tuple(x), Value::Tuple(y)) => seq_equal(x, y),
        (Value::Dict(x), Value::Dict(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len()
                && x.iter().all(|(k, v)| {
                    matches!(y.get(k), Ok(Some(other)) if values_equal(v, &other))
                })
        }
        (Value::Range(x), Value::Range(y)) => x == y,
        (Value::Type(x), Value::Type(y)) => x == y,
        (Value::ExcType(x), Value::ExcType(y)) => x == y,
        _ => match (a.as_float(), b.as_float()) {
            (Some(x), Some(y)) => match (a.as_int(), b.as_int()) {
                (Some(i), Some(j)) => i == j,
                _ => x == y,
            },
            _ => a.is(b),
        },
    }
}

fn seq_equal(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
}

/// Ordering for values that need no guest code to compare.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        (Value::List(x), Value::List(y)) => compare_seq(&x.borrow(), &y.borrow()),
        (Value::Tuple(x), Value::Tuple(y)) => compare_seq(x, y),
        _ => match (a.as_int(), b.as_int()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => match (a.as_float(), b.as_float()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            },
        },
    }
}

fn compare_seq(a: &[Value], b: &[Value]) -> Option<Ordering> {
    for (x, y) in a.iter().zip(b) {
        if !values_equal(x, y) {
            return compare_values(x, y);
        }
    }
    Some(a.len().cmp(&b.len()))
}

/// Float formatting matching the guest language's `repr`.
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "nan".into();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf".into() } else { "-inf".into() };
    }
    let abs = f.abs();
    if abs != 0.0 && !(1e-4..1e16).contains(&abs) {
        let s = format!("{f:e}");
        let (mantissa, exp) = s.split_once('e').unwrap_or((&s, "0"));
        let (sign, digits) = match exp.strip_prefix('-') {
            Some(d) => ('-', d),
            None => ('+', exp),
        };
        return format!("{mantissa}e{sign}{digits:0>2}");
    }
    let s = format!("{f}");
    if s.contains('.') { s } else { format!("{s}.0") }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{}", format_float(*x)),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::List(items) => f.debug_list().entries(items.borrow().iter()).finish(),
            Value::Tuple(items) => {
                let mut t = f.debug_tuple("");
                for item in items.iter() {
                    t.field(item);
                }
                t.finish()
            }
            Value::Dict(d) => f.debug_map().entries(d.borrow().iter()).finish(),
            Value::Function(func) => write!(f, "<function {}>", func.name),
            Value::Class(class) => write!(f, "<class '{}'>", class.name),
            Value::Module(m) => write!(f, "<module '{}'>", m.name),
            Value::Native(n) => write!(f, "<built-in function {}>", n.name),
            Value::Widget(w) => write!(f, "<{} id={}>", w.kind().name(), w.id()),
            other => write!(f, "<{}>", other.type_name()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s.into())
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::list(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_keys_collapse() {
        let mut d = Dict::new();
        d.insert(Value::Int(1), Value::str("int")).unwrap();
        d.insert(Value::Float(1.0), Value::str("float")).unwrap();
        d.insert(Value::Bool(true), Value::str("bool")).unwrap();
        assert_eq!(d.len(), 1);
        assert_eq!(d.get(&Value::Int(1)).unwrap().unwrap().as_str(), Some("bool"));
    }

    #[test]
    fn test_unhashable_key() {
        let mut d = Dict::new();
        let err = d.insert(Value::list(vec![]), Value::None).unwrap_err();
        assert_eq!(err.kind(), Some(ExcKind::TypeError));
    }

    #[test]
    fn test_dict_preserves_order_on_remove() {
        let mut d = Dict::new();
        for k in ["a", "b", "c"] {
            d.insert_str(k, Value::None);
        }
        d.remove(&Value::str("b")).unwrap();
        let keys: Vec<String> = d
            .keys()
            .iter()
            .map(|k| k.as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(keys, vec!["a", "c"]);
    }

    #[test]
    fn test_range_len() {
        assert_eq!(RangeValue { start: 0, stop: 10, step: 3 }.len(), 4);
        assert_eq!(RangeValue { start: 10, stop: 0, step: -2 }.len(), 5);
        assert_eq!(RangeValue { start: 5, stop: 0, step: 1 }.len(), 0);
    }

    #[test]
    fn test_equality_and_ordering() {
        assert!(values_equal(&Value::Int(2), &Value::Float(2.0)));
        assert!(values_equal(
            &Value::list(vec![Value::Int(1), Value::str("a")]),
            &Value::list(vec![Value::Int(1), Value::str("a")])
        ));
        assert_eq!(
            compare_values(&Value::tuple(vec![Value::Int(1), Value::Int(2)]), &Value::tuple(vec![Value::Int(1)])),
            Some(Ordering::Greater)
        );
        assert_eq!(compare_values(&Value::str("a"), &Value::Int(1)), None);
    }

    #[test]
    fn test_float_formatting() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(0.1), "0.1");
        assert_eq!(format_float(1e20), "1e+20");
        assert_eq!(format_float(1.5e-5), "1.5e-05");
        assert_eq!(format_float(-2.5), "-2.5");
        assert_eq!(format_float(f64::INFINITY), "inf");
    }
}
