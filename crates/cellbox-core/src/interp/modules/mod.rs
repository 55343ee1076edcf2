//! Built-in importable modules.

mod asyncio;
pub mod json;
mod math;
mod sys;
mod time;
pub mod ui;

use std::rc::Rc;

use super::Interpreter;
use super::value::Value;

/// Names accepted by `import`.
pub const MODULE_NAMES: &[&str] = &["asyncio", "json", "math", "sys", "time", "ui"];

pub(crate) fn load(interp: &Rc<Interpreter>, name: &str) -> Option<Value> {
    let module = match name {
        "asyncio" => asyncio::module(),
        "json" => json::module(),
        "math" => math::module(),
        "sys" => sys::module(interp),
        "time" => time::module(),
        "ui" => ui::module(),
        _ => return None,
    };
    Some(Value::Module(Rc::new(module)))
}
