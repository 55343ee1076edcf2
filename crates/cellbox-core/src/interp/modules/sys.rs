//! `sys`: the multiplexed output streams and interpreter limits.

use std::rc::Rc;

use crate::interp::object::{ModuleObj, NativeFunction};
use crate::interp::value::Value;
use crate::interp::Interpreter;
use crate::sandbox::protocol::StreamKind;

pub(super) fn module(interp: &Rc<Interpreter>) -> ModuleObj {
    let module = ModuleObj::new("sys", "Access to interpreter state.");
    module.set("stdout", Value::Stream(StreamKind::Out));
    module.set("stderr", Value::Stream(StreamKind::Err));
    module.set("platform", Value::str("cellbox"));
    module.set("version", Value::str(env!("CARGO_PKG_VERSION")));
    module.set("maxsize", Value::Int(i64::MAX));
    module.set("argv", Value::list(Vec::new()));
    module.set(
        "builtin_module_names",
        Value::tuple(super::MODULE_NAMES.iter().map(|n| Value::str(n)).collect()),
    );
    module.set("recursionlimit", Value::Int(interp.recursion_limit as i64));
    module.add_natives(FUNCTIONS);
    module
}

static FUNCTIONS: &[NativeFunction] = &[NativeFunction::sync(
    "getrecursionlimit",
    "()",
    "Return the current value of the recursion limit.",
    |interp, args| {
        args.arity("getrecursionlimit", 0, 0)?;
        Ok(Value::Int(interp.recursion_limit as i64))
    },
)];
