//! `asyncio`: cooperative sleeping, tasks and gathering.
//!
//! Units only interleave at these suspension points. Tasks are spawned on
//! the interpreter's [`TaskSet`](crate::interp::TaskSet) and inherit the
//! creating unit's context tag, so their output is attributed to that unit
//! for as long as it is live.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::{LocalBoxFuture, join_all};

use crate::interp::exception::{EvalResult, ExcKind, Unwind};
use crate::interp::object::{Args, ModuleObj, NativeFunction, Task};
use crate::interp::value::Value;
use crate::interp::{Interpreter, with_call_depth};
use crate::sandbox::context;

pub(super) fn module() -> ModuleObj {
    let module = ModuleObj::new("asyncio", "Cooperative concurrency for notebook cells.");
    module.add_natives(FUNCTIONS);
    module
}

fn seconds(value: &Value, func: &str) -> EvalResult<Duration> {
    let secs = value.as_float().ok_or_else(|| {
        Unwind::type_error(format!(
            "{func}() delay must be a number, not {}",
            value.type_name()
        ))
    })?;
    Ok(Duration::from_secs_f64(if secs.is_finite() { secs.max(0.0) } else { 0.0 }))
}

fn sleep(interp: Rc<Interpreter>, mut args: Args) -> LocalBoxFuture<'static, EvalResult> {
    Box::pin(async move {
        let result = args.take(1, "result").unwrap_or(Value::None);
        args.no_keywords("sleep")?;
        args.arity("sleep", 1, 1)?;
        let delay = seconds(&args.positional[0], "sleep")?;
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }
        interp.check_abort()?;
        Ok(result)
    })
}

fn gather(interp: Rc<Interpreter>, mut args: Args) -> LocalBoxFuture<'static, EvalResult> {
    Box::pin(async move {
        let return_exceptions = args
            .take_keyword("return_exceptions")
            .is_some_and(|v| v.truthy());
        args.no_keywords("gather")?;
        let pending = args.positional.into_iter().map(|aw| {
            let interp = interp.clone();
            async move { interp.await_value(aw).await }
        });
        let mut values = Vec::new();
        for result in join_all(pending).await {
            match result {
                Ok(value) => values.push(value),
                Err(Unwind::Raise(exc)) if return_exceptions => values.push(Value::Exception(exc)),
                Err(unwind) => return Err(unwind),
            }
        }
        Ok(Value::list(values))
    })
}

fn wait_for(interp: Rc<Interpreter>, args: Args) -> LocalBoxFuture<'static, EvalResult> {
    Box::pin(async move {
        args.no_keywords("wait_for")?;
        args.arity("wait_for", 2, 2)?;
        let mut positional = args.positional.into_iter();
        let (Some(aw), Some(timeout)) = (positional.next(), positional.next()) else {
            return Err(Unwind::type_error("wait_for() takes exactly 2 arguments"));
        };
        if timeout.is_none() {
            return interp.await_value(aw).await;
        }
        let limit = seconds(&timeout, "wait_for")?;
        match tokio::time::timeout(limit, interp.await_value(aw)).await {
            Ok(result) => result,
            Err(_) => Err(Unwind::new(ExcKind::TimeoutError, "")),
        }
    })
}

fn run(interp: Rc<Interpreter>, args: Args) -> LocalBoxFuture<'static, EvalResult> {
    Box::pin(async move {
        args.no_keywords("run")?;
        args.arity("run", 1, 1)?;
        let mut positional = args.positional;
        interp.await_value(positional.remove(0)).await
    })
}

/// Schedule a coroutine as a task on the interpreter's task set.
fn create_task(interp: &Rc<Interpreter>, mut args: Args) -> EvalResult {
    let name = args.take_keyword("name");
    args.no_keywords("create_task")?;
    args.arity("create_task", 1, 1)?;
    let Value::Coroutine(coroutine) = &args.positional[0] else {
        return Err(Unwind::type_error(format!(
            "a coroutine was expected, got {}",
            args.positional[0].type_name()
        )));
    };
    let name = match name {
        Some(Value::Str(s)) => s.to_string(),
        _ => coroutine.name.clone(),
    };
    if !interp.tasks().is_driven() {
        return Err(Unwind::new(ExcKind::RuntimeError, "no running event loop"));
    }
    let body = coroutine.take()?;

    let outcome: Rc<RefCell<Option<EvalResult>>> = Rc::new(RefCell::new(None));
    let slot = outcome.clone();
    let tag = context::current();
    let handle = interp.tasks().spawn_guest(async move {
        let result = context::propagate(tag, with_call_depth(body)).await;
        *slot.borrow_mut() = Some(result.clone());
        result
    })?;
    let result = async move {
        handle.await.unwrap_or_else(|_| {
            Err(Unwind::new(ExcKind::RuntimeError, "task was cancelled"))
        })
    }
    .boxed_local()
    .shared();

    Ok(Value::Task(Rc::new(Task {
        name,
        result,
        outcome,
    })))
}

static FUNCTIONS: &[NativeFunction] = &[
    NativeFunction::coroutine("sleep", "(delay, result=None)", "Coroutine that completes after a given time (in seconds).", sleep),
    NativeFunction::coroutine("gather", "(*aws, return_exceptions=False)", "Run awaitable objects concurrently and return their results as a list.", gather),
    NativeFunction::coroutine("wait_for", "(aw, timeout)", "Wait for an awaitable to complete, with a timeout.", wait_for),
    NativeFunction::asynchronous("run", "(coro)", "Run a coroutine to completion and return its result.", run),
    NativeFunction::sync("create_task", "(coro, *, name=None)", "Schedule the execution of a coroutine object as a Task.", create_task),
];

#[cfg(test)]
mod tests {
    use crate::interp::testing::{interpreter, run};
    use crate::interp::Namespace;

    async fn eval(source: &str) -> (String, String) {
        let (interp, sink) = interpreter();
        let ns = Namespace::new();
        let value = match interp.tasks().run_until(run(&interp, &ns, source)).await {
            Ok(value) => interp.repr(&value).await.unwrap_or_default(),
            Err(crate::interp::Unwind::Raise(exc)) => format!("!{}", exc.type_name()),
            Err(_) => "!abort".into(),
        };
        let out = sink.out.borrow().clone();
        (value, out)
    }

    #[tokio::test]
    async fn test_sleep_and_gather() {
        let src = "\
import asyncio
async def twice(x):
    await asyncio.sleep(0)
    return x * 2
await asyncio.gather(twice(1), twice(2), asyncio.sleep(0, 'z'))";
        let (value, _) = eval(src).await;
        assert_eq!(value, "[2, 4, 'z']");
    }

    #[tokio::test]
    async fn test_gather_return_exceptions() {
        let src = "\
import asyncio
async def bad():
    raise ValueError('no')
r = await asyncio.gather(bad(), asyncio.sleep(0, 1), return_exceptions=True)
(type(r[0]).__name__, r[1])";
        let (value, _) = eval(src).await;
        assert_eq!(value, "('ValueError', 1)");
    }

    #[tokio::test]
    async fn test_tasks_run_concurrently() {
        let src = "\
import asyncio
async def worker(name, delay):
    await asyncio.sleep(delay)
    print(name)
    return name
t = asyncio.create_task(worker('slow', 0.02), name='w')
await worker('fast', 0.0)
r = await t
(r, t.done(), t.get_name())";
        let (value, out) = eval(src).await;
        assert_eq!(value, "('slow', True, 'w')");
        assert_eq!(out, "fast\nslow\n");
    }

    #[tokio::test]
    async fn test_wait_for_timeout() {
        let src = "import asyncio\nawait asyncio.wait_for(asyncio.sleep(1), 0.01)";
        let (value, _) = eval(src).await;
        assert_eq!(value, "!TimeoutError");
    }

    #[tokio::test]
    async fn test_create_task_without_a_driver_is_a_runtime_error() {
        let (interp, _) = interpreter();
        let ns = Namespace::new();
        let src = "\
import asyncio
async def f():
    return 1
c = f()
try:
    asyncio.create_task(c)
except RuntimeError as e:
    msg = str(e)
(msg, await c)";
        let value = run(&interp, &ns, src).await.unwrap();
        assert_eq!(interp.repr(&value).await.unwrap(), "('no running event loop', 1)");
    }
}
