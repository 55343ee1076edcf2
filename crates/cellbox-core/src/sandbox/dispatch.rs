//! Running units.
//!
//! Each submission activates a fresh context tag and runs inside its
//! task-local scope, so the tag follows the unit through every `await` and
//! is gone again however the run ends. The tag is retired by an
//! [`Activation`] guard once the result exists, which also covers a run
//! future that is dropped half-way.

use std::future::Future;
use std::pin::pin;
use std::rc::Rc;

use futures::future::poll_fn;

use super::context::{self, ContextTag};
use super::protocol::{ExecutionResult, Outcome, UnitId};
use super::render::as_renderable;
use super::widgets::WidgetKind;
use super::{Sandbox, SandboxStatus, UnitState};
use crate::error::Error;
use crate::interp::{
    Args, CodeInfo, EvalResult, Exception, FrameOrigin, Interpreter, Unwind, Value,
    format_traceback, ui, with_call_depth,
};
use crate::lang::{ParseError, parse_module};

/// Holds a unit's tag live for the duration of one run.
struct Activation<'a> {
    sandbox: &'a Sandbox,
    tag: ContextTag,
    finished: Option<UnitState>,
}

impl<'a> Activation<'a> {
    fn begin(sandbox: &'a Sandbox, unit: &UnitId) -> Self {
        let tag = sandbox.contexts.activate(unit);
        sandbox.set_unit_state(&tag, UnitState::Queued);
        sandbox.in_flight.set(sandbox.in_flight.get() + 1);
        if sandbox.status() == SandboxStatus::Ready {
            sandbox.status.set(SandboxStatus::Running);
        }
        sandbox.completer.invalidate();
        Self {
            sandbox,
            tag,
            finished: None,
        }
    }
}

impl Drop for Activation<'_> {
    fn drop(&mut self) {
        let sandbox = self.sandbox;
        let state = self.finished.unwrap_or(UnitState::Failed);
        sandbox.set_unit_state(&self.tag, state);
        sandbox.contexts.retire(&self.tag);
        sandbox.completer.invalidate();
        let remaining = sandbox.in_flight.get().saturating_sub(1);
        sandbox.in_flight.set(remaining);
        if remaining == 0 && sandbox.status() == SandboxStatus::Running {
            sandbox.status.set(SandboxStatus::Ready);
        }
        tracing::debug!(unit = %self.tag.unit, epoch = self.tag.epoch, ?state, "Unit finished");
    }
}

impl Sandbox {
    /// Run `code` as unit `unit_id` against the shared namespace.
    ///
    /// Never blocks on earlier submissions: concurrent calls interleave at
    /// guest `await` points. Always produces exactly one result; by the
    /// time it is returned the run's tag is retired, so output from work the
    /// unit left behind is dropped.
    ///
    /// Guest code recurses on the polling thread's stack; threads that are
    /// not [`SandboxHandle`](super::SandboxHandle)'s own should be spawned
    /// with [`EVAL_STACK_SIZE`](crate::interp::EVAL_STACK_SIZE). Guest
    /// `asyncio` tasks need a driver, see [`Sandbox::run_until`].
    pub async fn submit(self: &Rc<Self>, unit_id: UnitId, code: &str) -> ExecutionResult {
        let outcome = match self.interpreter() {
            Some(interp) if self.status().accepts_work() => {
                let mut activation = Activation::begin(self, &unit_id);
                let tag = activation.tag.clone();
                let outcome = context::scope(tag.clone(), self.execute(&interp, &tag, code)).await;
                activation.finished = Some(if outcome.is_success() {
                    UnitState::Completed
                } else {
                    UnitState::Failed
                });
                outcome
            }
            _ => {
                let err = Error::NotReady(self.status().to_string());
                tracing::debug!(unit = %unit_id, error = %err, "Rejecting run");
                Outcome::failure("RuntimeError", err.to_string(), Vec::new())
            }
        };
        ExecutionResult { unit_id, outcome }
    }

    async fn execute(&self, interp: &Rc<Interpreter>, tag: &ContextTag, code: &str) -> Outcome {
        let file = format!("<unit {}>", tag.unit);
        let module = match parse_module(code) {
            Ok(module) => module,
            Err(err) => return syntax_failure(&file, code, &err),
        };
        let info = CodeInfo::module(file, code, FrameOrigin::Guest);
        let run = with_call_depth(interp.exec_module(&module, info, &self.namespace));
        match self.track(tag, run).await {
            Ok(value) => self.shape(interp, value).await,
            Err(Unwind::Raise(exc)) => failure(interp, &exc).await,
            Err(Unwind::Abort) => {
                Outcome::failure("KeyboardInterrupt", "execution aborted by sandbox restart", Vec::new())
            }
        }
    }

    /// Poll `fut`, recording whether the unit is running or parked.
    async fn track<F: Future>(&self, tag: &ContextTag, fut: F) -> F::Output {
        let mut fut = pin!(fut);
        poll_fn(|cx| {
            self.set_unit_state(tag, UnitState::Active);
            let poll = fut.as_mut().poll(cx);
            if poll.is_pending() {
                self.set_unit_state(tag, UnitState::Suspended);
            }
            poll
        })
        .await
    }

    /// Turn a unit's final value into a success outcome.
    ///
    /// A non-empty list or tuple of renderable values is wrapped in one
    /// `Group` owned by the unit, so the host only ever sees one bundle.
    async fn shape(&self, interp: &Rc<Interpreter>, value: Value) -> Outcome {
        let value = match wrap_renderables(interp, &value).await {
            Ok(Some(group)) => group,
            Ok(None) => value,
            Err(Unwind::Raise(exc)) => return failure(interp, &exc).await,
            Err(Unwind::Abort) => value,
        };
        if value.is_none() {
            return Outcome::Success {
                value: None,
                render: None,
            };
        }
        let render = as_renderable(&value).map(|r| r.to_render_bundle());
        let text = match interp.repr(&value).await {
            Ok(text) => text,
            Err(Unwind::Raise(exc)) => return failure(interp, &exc).await,
            Err(Unwind::Abort) => String::new(),
        };
        Outcome::Success {
            value: Some(text),
            render,
        }
    }
}

async fn wrap_renderables(interp: &Rc<Interpreter>, value: &Value) -> EvalResult<Option<Value>> {
    if !matches!(value, Value::List(_) | Value::Tuple(_)) {
        return Ok(None);
    }
    let items = value.iter_items().unwrap_or_default();
    if items.is_empty() || !items.iter().all(|item| as_renderable(item).is_some()) {
        return Ok(None);
    }
    let group = ui::widget_class(WidgetKind::Group);
    interp.call(&group, Args::new(vec![Value::list(items)])).await.map(Some)
}

/// Failure outcome with only guest frames in the traceback.
async fn failure(interp: &Rc<Interpreter>, exc: &Exception) -> Outcome {
    let message = match interp.exception_message(exc).await {
        Ok(message) => message,
        Err(_) => "<exception str() failed>".to_string(),
    };
    let traceback = format_traceback(exc, &message, true);
    Outcome::failure(&exc.type_name(), message, traceback)
}

fn syntax_failure(file: &str, code: &str, err: &ParseError) -> Outcome {
    let mut traceback = vec![format!("  File \"{file}\", line {}", err.line)];
    if let Some(line) = code.lines().nth((err.line as usize).saturating_sub(1)) {
        let indent = line.chars().take_while(|c| c.is_whitespace()).count();
        let caret = (err.col as usize).saturating_sub(1).saturating_sub(indent);
        traceback.push(format!("    {}", line.trim()));
        traceback.push(format!("    {}^", " ".repeat(caret)));
    }
    traceback.push(format!("SyntaxError: {}", err.message));
    Outcome::failure("SyntaxError", err.message.clone(), traceback)
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
    use tokio::task::LocalSet;

    use super::*;
    use crate::config::SandboxConfig;
    use crate::interp::AbortHandle;
    use crate::sandbox::SandboxEvent;
    use crate::sandbox::render::UI_MIME;

    async fn ready_sandbox() -> (Rc<Sandbox>, UnboundedReceiver<SandboxEvent>) {
        let (tx, mut rx) = unbounded_channel();
        let sandbox = Sandbox::new(SandboxConfig::default(), tx, AbortHandle::new());
        sandbox.initialize().await.unwrap();
        assert!(matches!(rx.try_recv(), Ok(SandboxEvent::Ready)));
        (sandbox, rx)
    }

    fn outputs(rx: &mut UnboundedReceiver<SandboxEvent>) -> Vec<(String, String)> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let SandboxEvent::Output { unit_id, text, .. } = event {
                out.push((unit_id.to_string(), text));
            }
        }
        out
    }

    #[tokio::test]
    async fn test_shared_namespace_and_value() {
        let (sandbox, _rx) = ready_sandbox().await;
        let first = sandbox.submit("a".into(), "x = 20").await;
        assert_eq!(first.outcome, Outcome::Success { value: None, render: None });
        let second = sandbox.submit("b".into(), "x + 1").await;
        assert_eq!(second.outcome, Outcome::Success { value: Some("21".into()), render: None });
        assert_eq!(sandbox.unit_state(&"b".into()), Some(UnitState::Completed));
        assert_eq!(sandbox.live_contexts(), 0);
        assert_eq!(sandbox.status(), SandboxStatus::Ready);
    }

    #[tokio::test]
    async fn test_not_ready_rejects() {
        let (tx, _rx) = unbounded_channel();
        let sandbox = Sandbox::new(SandboxConfig::default(), tx, AbortHandle::new());
        let result = sandbox.submit("a".into(), "1").await;
        let Outcome::Failure { ename, evalue, .. } = result.outcome else {
            panic!("expected failure");
        };
        assert_eq!(ename, "RuntimeError");
        assert!(evalue.contains("not ready"));
    }

    #[tokio::test]
    async fn test_traceback_keeps_guest_frames_only() {
        let (sandbox, _rx) = ready_sandbox().await;
        let src = "\
import ui
class Bad:
    def __str__(self):
        raise ValueError('bad')
ui.display(Bad())";
        let result = sandbox.submit("a".into(), src).await;
        let Outcome::Failure { ename, evalue, traceback } = result.outcome else {
            panic!("expected failure");
        };
        assert_eq!((ename.as_str(), evalue.as_str()), ("ValueError", "bad"));
        assert_eq!(traceback.first().map(String::as_str), Some("Traceback (most recent call last):"));
        assert!(traceback.iter().any(|l| l.contains("raise ValueError('bad')")));
        assert!(traceback.iter().all(|l| !l.contains("<runtime>")));
        assert_eq!(traceback.last().map(String::as_str), Some("ValueError: bad"));
    }

    #[tokio::test]
    async fn test_syntax_error_outcome() {
        let (sandbox, _rx) = ready_sandbox().await;
        let result = sandbox.submit("a".into(), "def f(:\n    pass").await;
        let Outcome::Failure { ename, traceback, .. } = result.outcome else {
            panic!("expected failure");
        };
        assert_eq!(ename, "SyntaxError");
        assert!(traceback[0].contains("line 1"));
        assert!(traceback.last().unwrap().starts_with("SyntaxError: "));
    }

    #[tokio::test]
    async fn test_deeply_nested_source_is_a_syntax_error() {
        let (sandbox, _rx) = ready_sandbox().await;
        let code = format!("x = {}1{}", "(".repeat(1000), ")".repeat(1000));
        let result = sandbox.submit("a".into(), &code).await;
        let Outcome::Failure { ename, evalue, .. } = result.outcome else {
            panic!("expected failure");
        };
        assert_eq!(ename, "SyntaxError");
        assert_eq!(evalue, "too many nested parentheses");
    }

    #[tokio::test]
    async fn test_renderable_list_becomes_group() {
        let (sandbox, _rx) = ready_sandbox().await;
        let src = "from ui import Slider, Button\n[Slider(), Button()]";
        let result = sandbox.submit("a".into(), src).await;
        let Outcome::Success { render: Some(bundle), .. } = result.outcome else {
            panic!("expected a render bundle");
        };
        assert_eq!(bundle.mime_type, UI_MIME);
        assert_eq!(bundle.data["type"], "Group");
        assert_eq!(bundle.data["props"]["children"].as_array().map(Vec::len), Some(2));
        // The group belongs to the unit and goes away with it.
        assert_eq!(sandbox.widgets().len(), 3);
        sandbox.clear_context(&"a".into());
        assert!(sandbox.widgets().is_empty());

        let mixed = sandbox.submit("b".into(), "from ui import Text\n[Text(), 1]").await;
        assert!(matches!(mixed.outcome, Outcome::Success { render: None, .. }));
    }

    #[tokio::test]
    async fn test_output_attributed_across_suspension() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let (sandbox, mut rx) = ready_sandbox().await;
                let slow = "import asyncio\nprint('a1')\nawait asyncio.sleep(0.05)\nprint('a2')";
                let fast = "import asyncio\nprint('b1')\nawait asyncio.sleep(0)\nprint('b2')";
                let a = tokio::task::spawn_local({
                    let sandbox = sandbox.clone();
                    async move { sandbox.submit("a".into(), slow).await }
                });
                tokio::task::yield_now().await;
                assert_eq!(sandbox.unit_state(&"a".into()), Some(UnitState::Suspended));
                let b = sandbox.submit("b".into(), fast).await;
                assert!(b.outcome.is_success());
                assert_eq!(sandbox.status(), SandboxStatus::Running);
                let a = a.await.unwrap();
                assert!(a.outcome.is_success());

                let out = outputs(&mut rx);
                let of = |unit: &str| -> Vec<String> {
                    out.iter()
                        .filter(|(u, _)| u == unit)
                        .map(|(_, t)| t.clone())
                        .collect()
                };
                assert_eq!(of("a"), ["a1\n", "a2\n"]);
                assert_eq!(of("b"), ["b1\n", "b2\n"]);
            })
            .await;
    }

    #[tokio::test]
    async fn test_create_task_without_a_driver_fails_the_unit() {
        let (sandbox, _rx) = ready_sandbox().await;
        let src = "\
import asyncio
async def later():
    return 1
t = asyncio.create_task(later())";
        let result = sandbox.submit("a".into(), src).await;
        let Outcome::Failure { ename, evalue, .. } = result.outcome else {
            panic!("expected failure");
        };
        assert_eq!((ename.as_str(), evalue.as_str()), ("RuntimeError", "no running event loop"));
        assert_eq!(sandbox.in_flight(), 0);

        let driven = sandbox
            .run_until(sandbox.submit("b".into(), &format!("{src}\nawait t")))
            .await;
        assert_eq!(driven.outcome, Outcome::Success { value: Some("1".into()), render: None });
    }

    #[tokio::test]
    async fn test_background_task_output_after_result_is_dropped() {
        let (sandbox, mut rx) = ready_sandbox().await;
        sandbox
            .run_until(async {
                let src = "\
import asyncio
async def later():
    await asyncio.sleep(0.01)
    print('late')
t = asyncio.create_task(later())
print('now')";
                let result = sandbox.submit("a".into(), src).await;
                assert!(result.outcome.is_success());
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                let texts: Vec<String> = outputs(&mut rx).into_iter().map(|(_, t)| t).collect();
                assert_eq!(texts, ["now\n"]);
                assert!(sandbox.output().dropped_count() >= 1);
            })
            .await;
    }

    #[tokio::test]
    async fn test_clear_context_drops_suspended_writes() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let (sandbox, mut rx) = ready_sandbox().await;
                let src = "import asyncio\nawait asyncio.sleep(0.02)\nprint('stale')";
                let run = tokio::task::spawn_local({
                    let sandbox = sandbox.clone();
                    async move { sandbox.submit("a".into(), src).await }
                });
                tokio::task::yield_now().await;
                sandbox.clear_context(&"a".into());
                let result = run.await.unwrap();
                assert!(result.outcome.is_success());
                assert!(outputs(&mut rx).is_empty());
            })
            .await;
    }

    #[tokio::test]
    async fn test_cleared_run_builds_unowned_widgets() {
        let (sandbox, _rx) = ready_sandbox().await;
        sandbox
            .run_until(async {
                let stale_src = "import asyncio\nfrom ui import Slider\nawait asyncio.sleep(0.02)\nold = Slider()";
                let stale = sandbox.tasks().spawn({
                    let sandbox = sandbox.clone();
                    async move { sandbox.submit("a".into(), stale_src).await }
                });
                tokio::task::yield_now().await;
                sandbox.clear_context(&"a".into());

                let fresh = sandbox.submit("a".into(), "from ui import Text\nnew = Text()").await;
                assert!(fresh.outcome.is_success());
                assert!(stale.await.unwrap().outcome.is_success());
                assert_eq!(sandbox.widgets().len(), 2);

                let owner = |name: &str| match sandbox.namespace().get(name) {
                    Some(Value::Widget(widget)) => widget.owner().cloned(),
                    other => panic!("expected a widget, got {other:?}"),
                };
                assert_eq!(owner("old"), None);
                assert_eq!(owner("new"), Some(UnitId::from("a")));

                sandbox.clear_context(&"a".into());
                assert_eq!(sandbox.widgets().len(), 1);
            })
            .await;
    }
}
