//! Integration tests for the execution multiplexer.
//!
//! Each test drives a sandbox through its public API the way a host would:
//! submit units, feed interactions, and watch the event stream.

use std::rc::Rc;
use std::time::Duration;

use cellbox_core::interp::AbortHandle;
use cellbox_core::{
    HostMessage, Outcome, Sandbox, SandboxConfig, SandboxEvent, SandboxHandle, StreamKind, UnitId, WidgetId,
};
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tokio::task::LocalSet;

async fn ready_sandbox() -> (Rc<Sandbox>, UnboundedReceiver<SandboxEvent>) {
    let (tx, mut rx) = unbounded_channel();
    let sandbox = Sandbox::new(SandboxConfig::default(), tx, AbortHandle::new());
    sandbox.initialize().await.unwrap();
    assert_eq!(rx.recv().await, Some(SandboxEvent::Ready));
    (sandbox, rx)
}

fn drain(rx: &mut UnboundedReceiver<SandboxEvent>) -> Vec<SandboxEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn outputs_of(events: &[SandboxEvent], unit: &str) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            SandboxEvent::Output { unit_id, stream: StreamKind::Out, text } if unit_id.as_str() == unit => {
                Some(text.clone())
            }
            _ => None,
        })
        .collect()
}

/// Unit B finishes while A is parked; A's later writes still belong to A.
#[tokio::test]
async fn test_context_integrity_across_interleaving() {
    LocalSet::new()
        .run_until(async {
            let (sandbox, mut rx) = ready_sandbox().await;
            let slow = "import asyncio\nprint('a-before')\nawait asyncio.sleep(0.05)\nprint('a-after')\n'a'";
            let fast = "print('b-only')\n'b'";

            let a = tokio::task::spawn_local({
                let sandbox = sandbox.clone();
                async move { sandbox.submit(UnitId::from("a"), slow).await }
            });
            tokio::task::yield_now().await;
            let b = sandbox.submit(UnitId::from("b"), fast).await;
            assert_eq!(b.outcome, Outcome::Success { value: Some("'b'".into()), render: None });

            let a = a.await.unwrap();
            assert_eq!(a.outcome, Outcome::Success { value: Some("'a'".into()), render: None });

            let events = drain(&mut rx);
            assert_eq!(outputs_of(&events, "a"), ["a-before\n", "a-after\n"]);
            assert_eq!(outputs_of(&events, "b"), ["b-only\n"]);
            assert_eq!(sandbox.in_flight(), 0);
        })
        .await;
}

#[tokio::test]
async fn test_failure_leaves_sandbox_usable() {
    let (sandbox, _rx) = ready_sandbox().await;
    let failed = sandbox.submit(UnitId::from("a"), "x = 1\nundefined_name").await;
    let Outcome::Failure { ename, evalue, .. } = failed.outcome else {
        panic!("expected failure");
    };
    assert_eq!(ename, "NameError");
    assert_eq!(evalue, "name 'undefined_name' is not defined");

    // No rollback: the binding made before the fault stays.
    let next = sandbox.submit(UnitId::from("b"), "x + 1").await;
    assert_eq!(next.outcome, Outcome::Success { value: Some("2".into()), render: None });
}

#[tokio::test]
async fn test_widget_lifecycle() {
    let (sandbox, mut rx) = ready_sandbox().await;
    let result = sandbox
        .submit(UnitId::from("c1"), "from ui import Slider\ns = Slider(value=3, min=0, max=10)\ns.id")
        .await;
    let Outcome::Success { value: Some(id_repr), .. } = result.outcome else {
        panic!("expected the widget id");
    };
    let widget_id = WidgetId::from(id_repr.trim_matches('\''));
    assert_eq!(sandbox.widgets().len(), 1);

    let mut payload = serde_json::Map::new();
    payload.insert("value".into(), serde_json::json!(7));
    assert!(sandbox.interact(&widget_id, &payload).await);
    let value = sandbox.submit(UnitId::from("c2"), "s.value").await;
    assert_eq!(value.outcome, Outcome::Success { value: Some("7".into()), render: None });

    sandbox.clear_context(&UnitId::from("c1"));
    assert!(sandbox.widgets().is_empty());
    assert!(!sandbox.interact(&widget_id, &payload).await);
    drain(&mut rx);
}

#[tokio::test]
async fn test_property_set_emits_one_update() {
    let (sandbox, mut rx) = ready_sandbox().await;
    sandbox
        .submit(UnitId::from("c1"), "from ui import Text\nt = Text('hello')")
        .await;
    drain(&mut rx);

    let result = sandbox
        .submit(UnitId::from("c2"), "t.content = 'bye'\nt.content")
        .await;
    assert_eq!(result.outcome, Outcome::Success { value: Some("'bye'".into()), render: None });

    let updates: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter_map(|event| match event {
            SandboxEvent::WidgetUpdate { changed, .. } => Some(changed),
            _ => None,
        })
        .collect();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["content"], "bye");
}

#[test]
fn test_restart_discards_everything() {
    let (mut handle, mut events) = SandboxHandle::spawn(SandboxConfig::default()).unwrap();
    handle.send(HostMessage::Init).unwrap();
    assert_eq!(events.blocking_recv(), Some(SandboxEvent::Ready));

    let run = |handle: &SandboxHandle, unit: &str, code: &str| {
        handle
            .send(HostMessage::Run { unit_id: unit.into(), code: code.into() })
            .unwrap();
    };
    let next_outcome = |events: &mut UnboundedReceiver<SandboxEvent>| loop {
        match events.blocking_recv() {
            Some(SandboxEvent::Result { outcome, .. }) => break outcome,
            Some(_) => continue,
            None => panic!("event channel closed"),
        }
    };

    run(&handle, "a", "from ui import Button\nkept = 1\nb = Button('go')\nb.id");
    let Outcome::Success { value: Some(id_repr), .. } = next_outcome(&mut events) else {
        panic!("expected the widget id");
    };

    handle.restart().unwrap();
    handle.send(HostMessage::Init).unwrap();
    assert_eq!(events.blocking_recv(), Some(SandboxEvent::Ready));

    run(&handle, "b", "kept");
    assert!(matches!(next_outcome(&mut events), Outcome::Failure { ename, .. } if ename == "NameError"));

    // The old widget is unknown to the new sandbox: the interaction is a no-op.
    handle
        .send(HostMessage::Interaction {
            widget_id: WidgetId::from(id_repr.trim_matches('\'')),
            payload: serde_json::Map::new(),
        })
        .unwrap();
    run(&handle, "c", "1");
    assert!(next_outcome(&mut events).is_success());
    handle.shutdown().unwrap();
}

#[tokio::test]
async fn test_startup_failure_is_fatal_once() {
    let (tx, mut rx) = unbounded_channel();
    let config = SandboxConfig::default().with_startup("raise RuntimeError('no')");
    let sandbox = Sandbox::new(config, tx, AbortHandle::new());
    assert!(sandbox.initialize().await.is_err());

    let result = sandbox.submit(UnitId::from("a"), "1").await;
    assert!(!result.outcome.is_success());
    let events = drain(&mut rx);
    let fatal = events
        .iter()
        .filter(|event| matches!(event, SandboxEvent::FatalError { .. }))
        .count();
    assert_eq!(fatal, 1);
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
task = asyncio.create_task(later())
print('now')";
            let result = sandbox.submit(UnitId::from("a"), src).await;
            assert!(result.outcome.is_success());
            tokio::time::sleep(Duration::from_millis(50)).await;

            let events = drain(&mut rx);
            assert_eq!(outputs_of(&events, "a"), ["now\n"]);
            assert!(sandbox.output().dropped_count() >= 1);
        })
        .await;
}

#[tokio::test]
async fn test_analysis_services() {
    let (sandbox, _rx) = ready_sandbox().await;
    let info = sandbox.analyze("x = 1\ny = x + z");
    assert_eq!(info.definitions, ["x", "y"]);
    assert_eq!(info.references, ["z"]);
    let broken = sandbox.analyze("def f(:");
    assert!(broken.definitions.is_empty() && broken.references.is_empty());

    let source = "import math\nmath.sq";
    let completions = sandbox.complete(source, source.chars().count());
    assert_eq!(completions.first().map(|c| c.label.as_str()), Some("sqrt"));
    let all = sandbox.complete("import math\nmath.", 17);
    assert!(all.iter().all(|c| !c.label.starts_with("__")));

    let report = sandbox.lint("print(missing)", false);
    assert_eq!(report.diagnostics.len(), 1);
    assert_eq!(report.diagnostics[0].code, "F821");

    sandbox.submit(UnitId::from("a"), "def helper(n):\n    \"\"\"Double n.\"\"\"\n    return n * 2").await;
    let info = sandbox.inspect("helper(2)", 3).unwrap();
    assert_eq!(info.doc.as_deref(), Some("Double n."));
    assert!(sandbox.inspect("nothing_here", 2).is_none());
}
