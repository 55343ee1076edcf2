//! Per-unit stream routing.
//!
//! The interpreter has one `sys.stdout` and one `sys.stderr`. Every write
//! lands here and is attributed to the unit whose context tag is ambient at
//! the moment of the write, not the unit that was running when the writer
//! was created.

use std::cell::Cell;
use std::rc::Rc;

use super::context::{self, ContextTable};
use super::protocol::{HostChannel, SandboxEvent, StreamKind};
use crate::interp::OutputSink;

/// Stream sink shared by `sys.stdout`, `sys.stderr` and `print`.
pub struct OutputMultiplexer {
    contexts: Rc<ContextTable>,
    host: HostChannel,
    dropped: Cell<usize>,
}

impl OutputMultiplexer {
    pub fn new(contexts: Rc<ContextTable>, host: HostChannel) -> Self {
        Self {
            contexts,
            host,
            dropped: Cell::new(0),
        }
    }

    /// Writes dropped so far because no live unit was ambient.
    pub fn dropped_count(&self) -> usize {
        self.dropped.get()
    }

    fn drop_write(&self, stream: StreamKind, text: &str, reason: &'static str) {
        self.dropped.set(self.dropped.get() + 1);
        tracing::debug!(
            stream = stream.file_name(),
            bytes = text.len(),
            reason,
            "Dropping guest output"
        );
    }
}

impl OutputSink for OutputMultiplexer {
    fn write(&self, stream: StreamKind, text: &str) {
        if text.is_empty() {
            return;
        }
        let Some(tag) = context::current() else {
            self.drop_write(stream, text, "no active unit");
            return;
        };
        if !self.contexts.is_live(&tag) {
            self.drop_write(stream, text, "unit context retired");
            return;
        }
        let event = SandboxEvent::Output {
            unit_id: tag.unit,
            stream,
            text: text.to_string(),
        };
        if !self.host.send(event) {
            self.drop_write(stream, text, "host channel closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc::unbounded_channel;

    use super::*;
    use crate::sandbox::protocol::UnitId;

    #[tokio::test]
    async fn test_routes_to_ambient_unit() {
        let contexts = Rc::new(ContextTable::new());
        let (tx, mut rx) = unbounded_channel();
        let mux = OutputMultiplexer::new(contexts.clone(), tx.into());

        let a = contexts.activate(&UnitId::from("a"));
        let b = contexts.activate(&UnitId::from("b"));
        context::scope(a, async { mux.write(StreamKind::Out, "one") }).await;
        context::scope(b, async { mux.write(StreamKind::Err, "two") }).await;

        let Ok(SandboxEvent::Output { unit_id, stream, text }) = rx.try_recv() else {
            panic!("expected output");
        };
        assert_eq!((unit_id.as_str(), stream, text.as_str()), ("a", StreamKind::Out, "one"));
        let Ok(SandboxEvent::Output { unit_id, stream, .. }) = rx.try_recv() else {
            panic!("expected output");
        };
        assert_eq!((unit_id.as_str(), stream), ("b", StreamKind::Err));
    }

    #[tokio::test]
    async fn test_drops_without_live_context() {
        let contexts = Rc::new(ContextTable::new());
        let (tx, mut rx) = unbounded_channel();
        let mux = OutputMultiplexer::new(contexts.clone(), tx.into());

        mux.write(StreamKind::Out, "orphan");
        let tag = contexts.activate(&UnitId::from("a"));
        contexts.retire(&tag);
        context::scope(tag, async { mux.write(StreamKind::Out, "late") }).await;

        assert!(rx.try_recv().is_err());
        assert_eq!(mux.dropped_count(), 2);
    }
}
