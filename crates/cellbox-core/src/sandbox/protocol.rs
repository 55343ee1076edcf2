//! Host <-> sandbox messages.
//!
//! Every message is a JSON object tagged by `type`. On a process boundary
//! they travel one per line; in-process they are passed through channels
//! as values.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use super::render::RenderBundle;
use crate::analysis::{Completion, Diagnostic, InspectInfo};
use crate::error::{Error, Result};
use crate::interp::AbortHandle;

/// Host-assigned identity of an execution unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(String);

impl UnitId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UnitId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Sandbox-assigned widget identity (a v4 uuid). Never reassigned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WidgetId(String);

impl WidgetId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WidgetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WidgetId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Which of the two guest output streams a write went to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Out,
    Err,
}

impl StreamKind {
    /// Guest-visible name (`sys.stdout` / `sys.stderr`).
    pub fn file_name(self) -> &'static str {
        match self {
            StreamKind::Out => "stdout",
            StreamKind::Err => "stderr",
        }
    }
}

/// Message sent from the host to a sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostMessage {
    /// Bootstrap the sandbox. Duplicates are ignored.
    Init,
    /// Execute a unit against the shared namespace.
    Run { unit_id: UnitId, code: String },
    /// A user interacted with a widget.
    Interaction {
        widget_id: WidgetId,
        #[serde(default)]
        payload: serde_json::Map<String, serde_json::Value>,
    },
    /// Make `unit_id` the context for subsequent widget callbacks.
    SetContext { unit_id: UnitId },
    /// Retire every context of `unit_id` and drop its widgets.
    ClearContext { unit_id: UnitId },
    Analyze { unit_id: UnitId, code: String },
    Lint {
        unit_id: UnitId,
        code: String,
        #[serde(default)]
        extract_defs: bool,
    },
    Complete {
        unit_id: UnitId,
        code: String,
        offset: usize,
    },
    Inspect {
        unit_id: UnitId,
        code: String,
        offset: usize,
    },
    /// Stop the message loop.
    Shutdown,
}

/// How a unit finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success {
        /// `repr` of the final expression, if it was not `None`.
        value: Option<String>,
        render: Option<RenderBundle>,
    },
    Failure {
        ename: String,
        evalue: String,
        traceback: Vec<String>,
    },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub(crate) fn failure(ename: &str, evalue: impl Into<String>, traceback: Vec<String>) -> Self {
        Outcome::Failure {
            ename: ename.to_string(),
            evalue: evalue.into(),
            traceback,
        }
    }
}

/// Exactly one per submitted unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub unit_id: UnitId,
    pub outcome: Outcome,
}

/// Message sent from a sandbox to the host, as a reply or unsolicited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SandboxEvent {
    Ready,
    FatalError {
        message: String,
    },
    Output {
        unit_id: UnitId,
        stream: StreamKind,
        text: String,
    },
    Result {
        unit_id: UnitId,
        outcome: Outcome,
    },
    WidgetUpdate {
        widget_id: WidgetId,
        changed: serde_json::Map<String, serde_json::Value>,
    },
    AnalyzeResult {
        unit_id: UnitId,
        definitions: Vec<String>,
        references: Vec<String>,
    },
    LintResult {
        unit_id: UnitId,
        diagnostics: Vec<Diagnostic>,
        definitions: Vec<String>,
    },
    CompleteResult {
        unit_id: UnitId,
        completions: Vec<Completion>,
    },
    InspectResult {
        unit_id: UnitId,
        info: Option<InspectInfo>,
    },
}

impl From<ExecutionResult> for SandboxEvent {
    fn from(result: ExecutionResult) -> Self {
        SandboxEvent::Result {
            unit_id: result.unit_id,
            outcome: result.outcome,
        }
    }
}

/// Sending half of the sandbox -> host event stream.
///
/// Once the sandbox's abort flag is raised (it is being replaced by a
/// restart) every send is dropped, so a dying sandbox cannot emit events
/// that look like they came from its successor.
#[derive(Debug, Clone)]
pub struct HostChannel {
    tx: UnboundedSender<SandboxEvent>,
    abort: Option<AbortHandle>,
}

impl HostChannel {
    pub fn new(tx: UnboundedSender<SandboxEvent>) -> Self {
        Self { tx, abort: None }
    }

    pub fn with_abort(mut self, abort: AbortHandle) -> Self {
        self.abort = Some(abort);
        self
    }

    /// Returns `false` if the event was dropped.
    pub fn send(&self, event: SandboxEvent) -> bool {
        if self.abort.as_ref().is_some_and(AbortHandle::is_aborted) {
            return false;
        }
        self.tx.send(event).is_ok()
    }
}

impl From<UnboundedSender<SandboxEvent>> for HostChannel {
    fn from(tx: UnboundedSender<SandboxEvent>) -> Self {
        Self::new(tx)
    }
}

/// Encode a message as a single JSON line (without the newline).
pub fn encode_line(message: &impl Serialize) -> Result<String> {
    serde_json::to_string(message)
        .map_err(|e| Error::Serialization(format!("Failed to encode message: {e}")))
}

/// Decode one JSON line.
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T> {
    serde_json::from_str(line.trim())
        .map_err(|e| Error::Serialization(format!("Failed to decode message: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_message_tags() {
        let msg = HostMessage::Run {
            unit_id: "c1".into(),
            code: "x = 1".into(),
        };
        let line = encode_line(&msg).unwrap();
        assert_eq!(line, r#"{"type":"run","unit_id":"c1","code":"x = 1"}"#);
        assert_eq!(decode_line::<HostMessage>(&line).unwrap(), msg);

        let init: HostMessage = decode_line(r#"{"type":"init"}"#).unwrap();
        assert_eq!(init, HostMessage::Init);

        let lint: HostMessage = decode_line(r#"{"type":"lint","unit_id":"a","code":""}"#).unwrap();
        assert!(matches!(lint, HostMessage::Lint { extract_defs: false, .. }));
    }

    #[test]
    fn test_interaction_payload() {
        let msg: HostMessage = decode_line(
            r#"{"type":"interaction","widget_id":"w-1","payload":{"value":3}}"#,
        )
        .unwrap();
        let HostMessage::Interaction { widget_id, payload } = msg else {
            panic!("wrong variant");
        };
        assert_eq!(widget_id.as_str(), "w-1");
        assert_eq!(payload["value"], 3);
    }

    #[test]
    fn test_event_encoding() {
        let event = SandboxEvent::Output {
            unit_id: "c1".into(),
            stream: StreamKind::Err,
            text: "boom\n".into(),
        };
        assert_eq!(
            encode_line(&event).unwrap(),
            r#"{"type":"output","unit_id":"c1","stream":"err","text":"boom\n"}"#
        );

        let result: SandboxEvent = ExecutionResult {
            unit_id: "c2".into(),
            outcome: Outcome::failure("NameError", "name 'x' is not defined", vec![]),
        }
        .into();
        let line = encode_line(&result).unwrap();
        assert!(line.starts_with(r#"{"type":"result","unit_id":"c2","outcome":{"status":"failure""#));
        assert_eq!(decode_line::<SandboxEvent>(&line).unwrap(), result);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_line::<HostMessage>("{\"type\":\"explode\"}"),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_widget_ids_are_unique() {
        assert_ne!(WidgetId::generate(), WidgetId::generate());
    }
}
