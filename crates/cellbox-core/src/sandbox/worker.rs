//! The sandbox thread.
//!
//! A sandbox's values are `Rc`/`RefCell` and never leave its thread, which
//! runs a current-thread tokio runtime. The host talks to
//! it through [`SandboxHandle`]: messages in, events out, both over
//! unbounded channels so push events can arrive at any time.

use std::rc::Rc;
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use super::protocol::{HostChannel, HostMessage, SandboxEvent};
use super::Sandbox;
use crate::config::SandboxConfig;
use crate::error::{Error, Result};
use crate::interp::{AbortHandle, EVAL_STACK_SIZE};

/// Process host messages until `shutdown` or until the host hangs up.
///
/// Runs are spawned onto the sandbox's task set, which is driven for as
/// long as this runs, so a suspended unit never holds up the messages
/// behind it.
pub async fn serve(sandbox: Rc<Sandbox>, messages: UnboundedReceiver<HostMessage>) {
    let tasks = sandbox.tasks().clone();
    tasks.run_until(message_loop(sandbox, messages)).await;
    tracing::debug!("Sandbox message loop finished");
}

async fn message_loop(sandbox: Rc<Sandbox>, mut messages: UnboundedReceiver<HostMessage>) {
    while let Some(message) = messages.recv().await {
        if sandbox.abort_handle().is_aborted() {
            break;
        }
        match message {
            HostMessage::Init => match sandbox.initialize().await {
                Ok(()) => {}
                Err(Error::AlreadyInitialized(status)) => {
                    tracing::debug!(%status, "Duplicate init ignored");
                }
                // Already reported to the host as `fatal_error`.
                Err(_) => {}
            },
            HostMessage::Run { unit_id, code } => {
                let runner = sandbox.clone();
                sandbox.tasks().spawn(async move {
                    let result = runner.submit(unit_id, &code).await;
                    runner.emit(result.into());
                });
            }
            HostMessage::Interaction { widget_id, payload } => {
                let runner = sandbox.clone();
                sandbox.tasks().spawn(async move {
                    runner.interact(&widget_id, &payload).await;
                });
            }
            HostMessage::SetContext { unit_id } => sandbox.set_context(&unit_id),
            HostMessage::ClearContext { unit_id } => sandbox.clear_context(&unit_id),
            HostMessage::Analyze { unit_id, code } => {
                let info = sandbox.analyze(&code);
                sandbox.emit(SandboxEvent::AnalyzeResult {
                    unit_id,
                    definitions: info.definitions,
                    references: info.references,
                });
            }
            HostMessage::Lint {
                unit_id,
                code,
                extract_defs,
            } => {
                let report = sandbox.lint(&code, extract_defs);
                sandbox.emit(SandboxEvent::LintResult {
                    unit_id,
                    diagnostics: report.diagnostics,
                    definitions: report.definitions,
                });
            }
            HostMessage::Complete {
                unit_id,
                code,
                offset,
            } => {
                let completions = sandbox.complete(&code, offset);
                sandbox.emit(SandboxEvent::CompleteResult {
                    unit_id,
                    completions,
                });
            }
            HostMessage::Inspect {
                unit_id,
                code,
                offset,
            } => {
                let info = sandbox.inspect(&code, offset);
                sandbox.emit(SandboxEvent::InspectResult { unit_id, info });
            }
            HostMessage::Shutdown => break,
        }
    }
}

/// Host-side handle to a sandbox running on its own thread.
///
/// The event receiver returned by [`SandboxHandle::spawn`] stays valid
/// across restarts.
pub struct SandboxHandle {
    config: SandboxConfig,
    events: UnboundedSender<SandboxEvent>,
    messages: UnboundedSender<HostMessage>,
    abort: AbortHandle,
    thread: Option<JoinHandle<()>>,
    generation: u64,
}

impl SandboxHandle {
    /// Start a sandbox thread. The sandbox waits for `init`.
    pub fn spawn(config: SandboxConfig) -> Result<(Self, UnboundedReceiver<SandboxEvent>)> {
        let (events, receiver) = unbounded_channel();
        let (messages, abort, thread) = start(config.clone(), events.clone(), 0)?;
        let handle = Self {
            config,
            events,
            messages,
            abort,
            thread: Some(thread),
            generation: 0,
        };
        Ok((handle, receiver))
    }

    pub fn send(&self, message: HostMessage) -> Result<()> {
        self.messages
            .send(message)
            .map_err(|_| Error::Ipc("sandbox thread has stopped".to_string()))
    }

    /// How many times the sandbox has been restarted.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Discard the sandbox and start a fresh one.
    ///
    /// The old sandbox's abort flag is raised, so any unit still running
    /// unwinds at its next statement and nothing it does reaches the host.
    /// Its thread is detached rather than joined. The new sandbox starts
    /// uninitialized: the host sends `init` again.
    pub fn restart(&mut self) -> Result<()> {
        tracing::info!(generation = self.generation, "Restarting sandbox");
        self.abort.abort();
        let _ = self.messages.send(HostMessage::Shutdown);
        self.thread.take();

        let generation = self.generation + 1;
        let (messages, abort, thread) = start(self.config.clone(), self.events.clone(), generation)?;
        self.messages = messages;
        self.abort = abort;
        self.thread = Some(thread);
        self.generation = generation;
        Ok(())
    }

    /// Stop the sandbox and wait for its thread.
    pub fn shutdown(mut self) -> Result<()> {
        let _ = self.messages.send(HostMessage::Shutdown);
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| Error::Ipc("sandbox thread panicked".to_string())),
            None => Ok(()),
        }
    }
}

impl Drop for SandboxHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.abort.abort();
            let _ = self.messages.send(HostMessage::Shutdown);
        }
    }
}

fn start(
    config: SandboxConfig,
    events: UnboundedSender<SandboxEvent>,
    generation: u64,
) -> Result<(UnboundedSender<HostMessage>, AbortHandle, JoinHandle<()>)> {
    let (messages, receiver) = unbounded_channel();
    let abort = AbortHandle::new();
    let thread_abort = abort.clone();
    let thread = thread::Builder::new()
        .name(format!("cellbox-sandbox-{generation}"))
        .stack_size(EVAL_STACK_SIZE)
        .spawn(move || run_thread(config, receiver, events, thread_abort))?;
    Ok((messages, abort, thread))
}

fn run_thread(
    config: SandboxConfig,
    messages: UnboundedReceiver<HostMessage>,
    events: UnboundedSender<SandboxEvent>,
    abort: AbortHandle,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start sandbox runtime");
            HostChannel::new(events).with_abort(abort).send(SandboxEvent::FatalError {
                message: format!("failed to start sandbox runtime: {e}"),
            });
            return;
        }
    };
    let sandbox = Sandbox::new(config, events, abort);
    runtime.block_on(serve(sandbox.clone(), messages));
    sandbox.tasks().close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::protocol::{Outcome, UnitId};

    fn next_result(events: &mut UnboundedReceiver<SandboxEvent>) -> (UnitId, Outcome) {
        loop {
            match events.blocking_recv() {
                Some(SandboxEvent::Result { unit_id, outcome }) => return (unit_id, outcome),
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
    }

    fn run(handle: &SandboxHandle, unit: &str, code: &str) {
        handle
            .send(HostMessage::Run {
                unit_id: unit.into(),
                code: code.to_string(),
            })
            .unwrap();
    }

    #[test]
    fn test_init_run_and_shutdown() {
        let (handle, mut events) = SandboxHandle::spawn(SandboxConfig::default()).unwrap();
        handle.send(HostMessage::Init).unwrap();
        assert_eq!(events.blocking_recv(), Some(SandboxEvent::Ready));

        run(&handle, "c1", "print('hi')\n6 * 7");
        assert_eq!(
            events.blocking_recv(),
            Some(SandboxEvent::Output {
                unit_id: "c1".into(),
                stream: crate::sandbox::StreamKind::Out,
                text: "hi\n".into(),
            })
        );
        let (unit, outcome) = next_result(&mut events);
        assert_eq!(unit.as_str(), "c1");
        assert_eq!(outcome, Outcome::Success { value: Some("42".into()), render: None });

        handle.send(HostMessage::Analyze { unit_id: "c2".into(), code: "y = x".into() }).unwrap();
        assert_eq!(
            events.blocking_recv(),
            Some(SandboxEvent::AnalyzeResult {
                unit_id: "c2".into(),
                definitions: vec!["y".into()],
                references: vec!["x".into()],
            })
        );
        handle.shutdown().unwrap();
    }

    #[test]
    fn test_restart_discards_namespace_and_stops_runaway_unit() {
        let (mut handle, mut events) = SandboxHandle::spawn(SandboxConfig::default()).unwrap();
        handle.send(HostMessage::Init).unwrap();
        assert_eq!(events.blocking_recv(), Some(SandboxEvent::Ready));
        run(&handle, "a", "x = 1");
        assert!(next_result(&mut events).1.is_success());

        run(&handle, "spin", "while True:\n    pass");
        handle.restart().unwrap();
        assert_eq!(handle.generation(), 1);
        handle.send(HostMessage::Init).unwrap();
        assert_eq!(events.blocking_recv(), Some(SandboxEvent::Ready));

        run(&handle, "b", "x");
        let (unit, outcome) = next_result(&mut events);
        assert_eq!(unit.as_str(), "b");
        assert!(matches!(outcome, Outcome::Failure { ename, .. } if ename == "NameError"));
        handle.shutdown().unwrap();
    }

    #[test]
    fn test_runaway_recursion_is_a_recursion_error() {
        let (handle, mut events) = SandboxHandle::spawn(SandboxConfig::default()).unwrap();
        handle.send(HostMessage::Init).unwrap();
        assert_eq!(events.blocking_recv(), Some(SandboxEvent::Ready));

        run(&handle, "deep", "def f(n):\n    return f(n + 1)\nf(0)");
        let (unit, outcome) = next_result(&mut events);
        assert_eq!(unit.as_str(), "deep");
        assert!(matches!(outcome, Outcome::Failure { ename, .. } if ename == "RecursionError"));

        // The sandbox survives and keeps serving.
        run(&handle, "after", "1 + 1");
        let (_, outcome) = next_result(&mut events);
        assert_eq!(outcome, Outcome::Success { value: Some("2".into()), render: None });
        handle.shutdown().unwrap();
    }

    #[test]
    fn test_high_recursion_limit_still_recovers() {
        let config = SandboxConfig {
            recursion_limit: 1_000_000,
            ..SandboxConfig::default()
        };
        let (handle, mut events) = SandboxHandle::spawn(config).unwrap();
        handle.send(HostMessage::Init).unwrap();
        assert_eq!(events.blocking_recv(), Some(SandboxEvent::Ready));

        run(&handle, "deep", "def f(n):\n    return 1 + f(n + 1)\nf(0)");
        let (_, outcome) = next_result(&mut events);
        assert!(matches!(outcome, Outcome::Failure { ename, .. } if ename == "RecursionError"));
        handle.shutdown().unwrap();
    }
}
