//! `time`.

use std::rc::Rc;
use std::sync::LazyLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::interp::exception::{EvalResult, Unwind};
use crate::interp::object::{Args, ModuleObj, NativeFunction};
use crate::interp::value::Value;
use crate::interp::Interpreter;

static START: LazyLock<Instant> = LazyLock::new(Instant::now);

pub(super) fn module() -> ModuleObj {
    let module = ModuleObj::new("time", "Time access and conversions.");
    module.add_natives(FUNCTIONS);
    module
}

/// Blocking sleep: holds up every unit in the sandbox, like any CPU-bound
/// guest code. `asyncio.sleep` is the cooperative variant.
fn sleep(interp: &Rc<Interpreter>, args: Args) -> EvalResult {
    args.no_keywords("sleep")?;
    args.arity("sleep", 1, 1)?;
    let secs = args.positional[0].as_float().ok_or_else(|| {
        Unwind::type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            args.positional[0].type_name()
        ))
    })?;
    if secs < 0.0 || !secs.is_finite() {
        return Err(Unwind::value_error("sleep length must be non-negative"));
    }
    std::thread::sleep(Duration::from_secs_f64(secs));
    interp.check_abort()?;
    Ok(Value::None)
}

static FUNCTIONS: &[NativeFunction] = &[
    NativeFunction::sync("time", "()", "Return the current time in seconds since the Epoch.", |_, args| {
        args.arity("time", 0, 0)?;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Ok(Value::Float(now.as_secs_f64()))
    }),
    NativeFunction::sync("monotonic", "()", "Monotonic clock, cannot go backward.", |_, args| {
        args.arity("monotonic", 0, 0)?;
        Ok(Value::Float(START.elapsed().as_secs_f64()))
    }),
    NativeFunction::sync("perf_counter", "()", "Performance counter for benchmarking.", |_, args| {
        args.arity("perf_counter", 0, 0)?;
        Ok(Value::Float(START.elapsed().as_secs_f64()))
    }),
    NativeFunction::sync("sleep", "(seconds)", "Delay execution for a given number of seconds.", sleep),
];
