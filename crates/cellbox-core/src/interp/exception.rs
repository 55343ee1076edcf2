//! Guest exceptions and non-local exits.

use std::cell::RefCell;
use std::fmt::Write as _;
use std::rc::Rc;

use indexmap::IndexMap;

use super::object::Class;
use super::value::Value;

/// Built-in exception classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExcKind {
    BaseException,
    Exception,
    ArithmeticError,
    ZeroDivisionError,
    OverflowError,
    MemoryError,
    LookupError,
    IndexError,
    KeyError,
    ValueError,
    TypeError,
    AttributeError,
    NameError,
    UnboundLocalError,
    RuntimeError,
    NotImplementedError,
    RecursionError,
    AssertionError,
    ImportError,
    ModuleNotFoundError,
    StopIteration,
    SyntaxError,
    IndentationError,
    TimeoutError,
}

impl ExcKind {
    pub const ALL: &'static [ExcKind] = &[
        ExcKind::BaseException,
        ExcKind::Exception,
        ExcKind::ArithmeticError,
        ExcKind::ZeroDivisionError,
        ExcKind::OverflowError,
        ExcKind::MemoryError,
        ExcKind::LookupError,
        ExcKind::IndexError,
        ExcKind::KeyError,
        ExcKind::ValueError,
        ExcKind::TypeError,
        ExcKind::AttributeError,
        ExcKind::NameError,
        ExcKind::UnboundLocalError,
        ExcKind::RuntimeError,
        ExcKind::NotImplementedError,
        ExcKind::RecursionError,
        ExcKind::AssertionError,
        ExcKind::ImportError,
        ExcKind::ModuleNotFoundError,
        ExcKind::StopIteration,
        ExcKind::SyntaxError,
        ExcKind::IndentationError,
        ExcKind::TimeoutError,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ExcKind::BaseException => "BaseException",
            ExcKind::Exception => "Exception",
            ExcKind::ArithmeticError => "ArithmeticError",
            ExcKind::ZeroDivisionError => "ZeroDivisionError",
            ExcKind::OverflowError => "OverflowError",
            ExcKind::MemoryError => "MemoryError",
            ExcKind::LookupError => "LookupError",
            ExcKind::IndexError => "IndexError",
            ExcKind::KeyError => "KeyError",
            ExcKind::ValueError => "ValueError",
            ExcKind::TypeError => "TypeError",
            ExcKind::AttributeError => "AttributeError",
            ExcKind::NameError => "NameError",
            ExcKind::UnboundLocalError => "UnboundLocalError",
            ExcKind::RuntimeError => "RuntimeError",
            ExcKind::NotImplementedError => "NotImplementedError",
            ExcKind::RecursionError => "RecursionError",
            ExcKind::AssertionError => "AssertionError",
            ExcKind::ImportError => "ImportError",
            ExcKind::ModuleNotFoundError => "ModuleNotFoundError",
            ExcKind::StopIteration => "StopIteration",
            ExcKind::SyntaxError => "SyntaxError",
            ExcKind::IndentationError => "IndentationError",
            ExcKind::TimeoutError => "TimeoutError",
        }
    }

    pub fn parent(self) -> Option<ExcKind> {
        use ExcKind::*;
        Some(match self {
            BaseException => return None,
            Exception => BaseException,
            ArithmeticError | LookupError | ValueError | TypeError | AttributeError | NameError
            | RuntimeError | AssertionError | ImportError | StopIteration | SyntaxError
            | TimeoutError | MemoryError => Exception,
            ZeroDivisionError | OverflowError => ArithmeticError,
            IndexError | KeyError => LookupError,
            UnboundLocalError => NameError,
            NotImplementedError | RecursionError => RuntimeError,
            ModuleNotFoundError => ImportError,
            IndentationError => SyntaxError,
        })
    }

    pub fn is_subclass_of(self, other: ExcKind) -> bool {
        let mut current = Some(self);
        while let Some(kind) = current {
            if kind == other {
                return true;
            }
            current = kind.parent();
        }
        false
    }

    pub fn from_name(name: &str) -> Option<ExcKind> {
        Self::ALL.iter().copied().find(|k| k.name() == name)
    }
}

/// Where a frame's code came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOrigin {
    /// Code submitted by the host (cells, startup code).
    Guest,
    /// The sandbox's own runtime prelude.
    Runtime,
}

/// Static description of a code object: where it lives and what it is called.
#[derive(Debug)]
pub struct CodeInfo {
    pub file: Rc<str>,
    pub name: String,
    pub source: Rc<str>,
    pub origin: FrameOrigin,
}

impl CodeInfo {
    pub fn module(file: impl Into<Rc<str>>, source: impl Into<Rc<str>>, origin: FrameOrigin) -> Rc<Self> {
        Rc::new(Self {
            file: file.into(),
            name: "<module>".to_string(),
            source: source.into(),
            origin,
        })
    }

    /// Code info for a function defined in this code.
    pub fn child(&self, name: &str) -> Rc<Self> {
        Rc::new(Self {
            file: self.file.clone(),
            name: name.to_string(),
            source: self.source.clone(),
            origin: self.origin,
        })
    }

    pub fn source_line(&self, line: u32) -> Option<&str> {
        let idx = (line as usize).checked_sub(1)?;
        self.source.lines().nth(idx).map(str::trim)
    }
}

/// One entry of a traceback.
#[derive(Debug, Clone)]
pub struct TraceFrame {
    pub code: Rc<CodeInfo>,
    pub line: u32,
}

/// A raised (or raisable) exception instance.
#[derive(Debug)]
pub struct ExceptionObj {
    /// Nearest built-in class.
    pub kind: ExcKind,
    /// User-defined class, if the exception was created from one.
    pub class: Option<Rc<Class>>,
    pub args: RefCell<Vec<Value>>,
    pub attrs: RefCell<IndexMap<String, Value>>,
    pub cause: RefCell<Option<Value>>,
    /// Frames accumulated while unwinding, innermost first.
    pub traceback: RefCell<Vec<TraceFrame>>,
}

impl ExceptionObj {
    pub fn new(kind: ExcKind, class: Option<Rc<Class>>, args: Vec<Value>) -> Rc<Self> {
        Rc::new(Self {
            kind,
            class,
            args: RefCell::new(args),
            attrs: RefCell::new(IndexMap::new()),
            cause: RefCell::new(None),
            traceback: RefCell::new(Vec::new()),
        })
    }

    pub fn type_name(&self) -> String {
        match &self.class {
            Some(class) => class.name.clone(),
            None => self.kind.name().to_string(),
        }
    }

    /// Whether this exception is an instance of the given exception class value.
    pub fn matches(&self, class: &Value) -> bool {
        match class {
            Value::ExcType(kind) => self.kind.is_subclass_of(*kind),
            Value::Class(target) => self
                .class
                .as_ref()
                .is_some_and(|own| own.is_subclass_of(target)),
            Value::Tuple(items) => items.iter().any(|item| self.matches(item)),
            _ => false,
        }
    }

    pub fn push_frame(&self, code: Rc<CodeInfo>, line: u32) {
        self.traceback.borrow_mut().push(TraceFrame { code, line });
    }
}

/// Non-local exit from guest evaluation.
#[derive(Debug, Clone)]
pub enum Unwind {
    /// A guest exception propagating outward.
    Raise(Rc<ExceptionObj>),
    /// The sandbox is being torn down; not catchable by guest code.
    Abort,
}

impl Unwind {
    pub fn new(kind: ExcKind, message: impl Into<String>) -> Self {
        let message: String = message.into();
        Unwind::Raise(ExceptionObj::new(kind, None, vec![Value::from(message)]))
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ExcKind::TypeError, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(ExcKind::ValueError, message)
    }

    pub fn attribute_error(type_name: &str, attr: &str) -> Self {
        Self::new(
            ExcKind::AttributeError,
            format!("'{type_name}' object has no attribute '{attr}'"),
        )
    }

    pub fn name_error(name: &str) -> Self {
        Self::new(ExcKind::NameError, format!("name '{name}' is not defined"))
    }

    pub fn key_error(key: Value) -> Self {
        Unwind::Raise(ExceptionObj::new(ExcKind::KeyError, None, vec![key]))
    }

    /// The exception kind, if this is a guest exception.
    pub fn kind(&self) -> Option<ExcKind> {
        match self {
            Unwind::Raise(exc) => Some(exc.kind),
            Unwind::Abort => None,
        }
    }
}

pub type EvalResult<T = Value> = std::result::Result<T, Unwind>;

/// Render a traceback in the familiar "most recent call last" layout.
///
/// Frames whose origin is not [`FrameOrigin::Guest`] are omitted when
/// `guest_only` is set. `message` is the already-stringified exception value.
pub fn format_traceback(exc: &ExceptionObj, message: &str, guest_only: bool) -> Vec<String> {
    let frames = exc.traceback.borrow();
    let mut lines = Vec::new();
    let visible: Vec<&TraceFrame> = frames
        .iter()
        .rev()
        .filter(|f| !guest_only || f.code.origin == FrameOrigin::Guest)
        .collect();

    if !visible.is_empty() {
        lines.push("Traceback (most recent call last):".to_string());
    }
    for frame in visible {
        let mut entry = String::new();
        let _ = write!(
            entry,
            "  File \"{}\", line {}, in {}",
            frame.code.file, frame.line, frame.code.name
        );
        if let Some(src) = frame.code.source_line(frame.line) {
            if !src.is_empty() {
                let _ = write!(entry, "\n    {src}");
            }
        }
        lines.push(entry);
    }
    if message.is_empty() {
        lines.push(exc.type_name());
    } else {
        lines.push(format!("{}: {}", exc.type_name(), message));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hierarchy() {
        assert!(ExcKind::ZeroDivisionError.is_subclass_of(ExcKind::ArithmeticError));
        assert!(ExcKind::KeyError.is_subclass_of(ExcKind::Exception));
        assert!(!ExcKind::KeyError.is_subclass_of(ExcKind::ValueError));
        assert!(ExcKind::ModuleNotFoundError.is_subclass_of(ExcKind::ImportError));
        for kind in ExcKind::ALL {
            assert!(kind.is_subclass_of(ExcKind::BaseException));
            assert_eq!(ExcKind::from_name(kind.name()), Some(*kind));
        }
    }

    #[test]
    fn test_traceback_filters_runtime_frames() {
        let guest = CodeInfo::module("<cell c1>", "x = 1\ny = f(x)", FrameOrigin::Guest);
        let runtime = CodeInfo::module("<runtime>", "def f(x):\n    return 1 / 0", FrameOrigin::Runtime);
        let exc = ExceptionObj::new(ExcKind::ZeroDivisionError, None, Vec::new());
        exc.push_frame(runtime.child("f"), 2);
        exc.push_frame(guest, 2);

        let lines = format_traceback(&exc, "division by zero", true);
        assert_eq!(lines[0], "Traceback (most recent call last):");
        assert_eq!(lines[1], "  File \"<cell c1>\", line 2, in <module>\n    y = f(x)");
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2], "ZeroDivisionError: division by zero");

        let full = format_traceback(&exc, "division by zero", false);
        assert!(full.iter().any(|l| l.contains("<runtime>")));
    }
}
