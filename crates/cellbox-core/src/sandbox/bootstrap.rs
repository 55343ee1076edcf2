//! One-time sandbox initialization.

use std::rc::Rc;

use super::protocol::{SandboxEvent, StreamKind};
use super::{Sandbox, SandboxStatus};
use crate::error::{Error, Result};
use crate::interp::{
    CodeInfo, FrameOrigin, Interpreter, Namespace, Unwind, Value, format_traceback,
    with_call_depth,
};
use crate::lang::parse_module;

/// File name of prelude frames; they never appear in guest tracebacks.
const PRELUDE_FILE: &str = "<runtime>";
const STARTUP_FILE: &str = "<startup>";

/// Guest-language half of the `ui` module.
const PRELUDE: &str = r#"
import sys as _sys
import ui as _ui

def display(*elements, inline=False, gap=1):
    """Show UI elements in the output at this point of the run.

    Elements go on separate lines unless `inline` is set. `gap` is the
    number of blank lines between them (spaces when inline). Values that
    are not UI elements are printed.
    """
    items = list(elements)
    if not inline and items:
        items = [''] + items + ['']
    last = len(items) - 1
    for i, element in enumerate(items):
        if isinstance(element, (_ui.Slider, _ui.Text, _ui.Button, _ui.Select, _ui.Input, _ui.Textarea, _ui.Toggle, _ui.Checkbox, _ui.Group, _ui.Form, _ui.Plot)):
            _sys.stdout.write(str(element))
            if i < last:
                if inline:
                    _sys.stdout.write(' ' * gap)
                else:
                    for _ in range(gap):
                        print()
            elif not inline:
                print()
        else:
            print(element)

def print_md(content, styled=True):
    """Render markdown in the output.

    Styled markdown uses document typography; plain markdown matches the
    surrounding output text.
    """
    if styled:
        _sys.stdout.write(_ui.MARKER_MD_STYLED_START + str(content) + _ui.MARKER_MD_STYLED_END)
    else:
        _sys.stdout.write(_ui.MARKER_MD_PLAIN_START + str(content) + _ui.MARKER_MD_PLAIN_END)

_ui.display = display
_ui.print_md = print_md
"#;

impl Sandbox {
    /// Bring up the interpreter. Allowed once per sandbox.
    ///
    /// On failure the sandbox is faulted, a single `fatal_error` event is
    /// sent, and every later run fails until the sandbox is restarted.
    pub async fn initialize(self: &Rc<Self>) -> Result<()> {
        if self.status() != SandboxStatus::Uninitialized {
            return Err(Error::AlreadyInitialized(self.status().to_string()));
        }
        self.status.set(SandboxStatus::Loading);
        tracing::info!("Bootstrapping sandbox");

        match self.bootstrap().await {
            Ok(interp) => {
                *self.interp.borrow_mut() = Some(interp);
                self.status.set(SandboxStatus::Ready);
                self.emit(SandboxEvent::Ready);
                tracing::info!("Sandbox ready");
                Ok(())
            }
            Err(message) => {
                self.status.set(SandboxStatus::Faulted);
                tracing::error!(error = %message, "Sandbox bootstrap failed");
                self.emit(SandboxEvent::FatalError {
                    message: message.clone(),
                });
                Err(Error::Bootstrap(message))
            }
        }
    }

    async fn bootstrap(&self) -> std::result::Result<Rc<Interpreter>, String> {
        let interp = Interpreter::with_tasks(
            self.output.clone(),
            self.widgets.clone(),
            self.abort.clone(),
            self.config.recursion_limit,
            self.tasks.clone(),
        );

        // Stream overrides: `sys.stdout` / `sys.stderr` write through the
        // multiplexer.
        let sys = interp.import_module("sys").map_err(|_| "sys module unavailable".to_string())?;
        let streams_installed = [("stdout", StreamKind::Out), ("stderr", StreamKind::Err)]
            .into_iter()
            .all(|(name, kind)| {
                matches!(interp.get_attr(&sys, name), Ok(Value::Stream(found)) if found == kind)
            });
        if !streams_installed {
            return Err("output streams could not be installed".to_string());
        }

        let prelude = Namespace::new();
        run_source(&interp, PRELUDE, PRELUDE_FILE, FrameOrigin::Runtime, &prelude)
            .await
            .map_err(|e| format!("runtime prelude failed: {e}"))?;

        if let Some(startup) = &self.config.startup {
            run_source(&interp, startup, STARTUP_FILE, FrameOrigin::Guest, &self.namespace)
                .await
                .map_err(|e| format!("startup code failed: {e}"))?;
        }
        Ok(interp)
    }
}

/// Run a whole source text; a fault comes back as its rendered traceback.
async fn run_source(
    interp: &Rc<Interpreter>,
    source: &str,
    file: &str,
    origin: FrameOrigin,
    globals: &Namespace,
) -> std::result::Result<(), String> {
    let module = parse_module(source)
        .map_err(|e| format!("SyntaxError: {} ({file}, line {})", e.message, e.line))?;
    let code = CodeInfo::module(file, source, origin);
    match with_call_depth(interp.exec_module(&module, code, globals)).await {
        Ok(_) => Ok(()),
        Err(Unwind::Raise(exc)) => {
            let message = interp.exception_message(&exc).await.unwrap_or_default();
            Err(format_traceback(&exc, &message, false).join("\n"))
        }
        Err(Unwind::Abort) => Err("aborted".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc::unbounded_channel;

    use super::*;
    use crate::config::SandboxConfig;
    use crate::interp::AbortHandle;

    #[tokio::test]
    async fn test_initialize_once() {
        let (tx, mut rx) = unbounded_channel();
        let sandbox = Sandbox::new(SandboxConfig::default(), tx, AbortHandle::new());
        sandbox.initialize().await.unwrap();
        assert_eq!(sandbox.status(), SandboxStatus::Ready);
        assert!(matches!(rx.try_recv(), Ok(SandboxEvent::Ready)));

        let again = sandbox.initialize().await;
        assert!(matches!(again, Err(Error::AlreadyInitialized(_))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_prelude_extends_ui() {
        let (tx, _rx) = unbounded_channel();
        let sandbox = Sandbox::new(SandboxConfig::default(), tx, AbortHandle::new());
        sandbox.initialize().await.unwrap();
        let interp = sandbox.interpreter().unwrap();
        let ui = interp.loaded_module("ui").unwrap();
        assert!(interp.get_attr(&ui, "display").is_ok());
        assert!(interp.get_attr(&ui, "print_md").is_ok());
        // Prelude helpers stay out of the shared namespace.
        assert!(!sandbox.namespace().contains("display"));
    }

    #[tokio::test]
    async fn test_startup_code_and_failure() {
        let (tx, _rx) = unbounded_channel();
        let config = SandboxConfig::default().with_startup("import math\nanswer = 42");
        let sandbox = Sandbox::new(config, tx, AbortHandle::new());
        sandbox.initialize().await.unwrap();
        assert!(matches!(sandbox.namespace().get("answer"), Some(Value::Int(42))));

        let (tx, mut rx) = unbounded_channel();
        let config = SandboxConfig::default().with_startup("1 / 0");
        let sandbox = Sandbox::new(config, tx, AbortHandle::new());
        let err = sandbox.initialize().await.unwrap_err();
        assert!(matches!(err, Error::Bootstrap(ref m) if m.contains("ZeroDivisionError")));
        assert_eq!(sandbox.status(), SandboxStatus::Faulted);
        assert!(matches!(rx.try_recv(), Ok(SandboxEvent::FatalError { .. })));
        assert!(rx.try_recv().is_err());
    }
}
