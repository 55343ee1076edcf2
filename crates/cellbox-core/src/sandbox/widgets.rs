//! Widget state registry.
//!
//! Widgets are stateful objects created by guest code (`ui.Slider(...)`)
//! and rendered by the host. Each one gets an id that is never reused and
//! is owned by the unit whose context was ambient when it was built. A
//! widget built under a retired context has no owner.
//! Interactions from the host are routed back through
//! [`WidgetRegistry::handle_interaction`], and property writes from guest
//! code go out as partial updates through the host channel.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use rustc_hash::FxHashMap;

use super::context::{self, ContextTable};
use super::protocol::{HostChannel, SandboxEvent, StreamKind, UnitId, WidgetId};
use crate::interp::{Interpreter, Unwind, Value, format_traceback, json, ui};

/// Widget type tag, as sent to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WidgetKind {
    Slider,
    Text,
    Button,
    Select,
    Input,
    Textarea,
    Toggle,
    Checkbox,
    Group,
    Form,
    Plot,
}

impl WidgetKind {
    pub const ALL: [WidgetKind; 11] = [
        WidgetKind::Slider,
        WidgetKind::Text,
        WidgetKind::Button,
        WidgetKind::Select,
        WidgetKind::Input,
        WidgetKind::Textarea,
        WidgetKind::Toggle,
        WidgetKind::Checkbox,
        WidgetKind::Group,
        WidgetKind::Form,
        WidgetKind::Plot,
    ];

    pub fn name(self) -> &'static str {
        match self {
            WidgetKind::Slider => "Slider",
            WidgetKind::Text => "Text",
            WidgetKind::Button => "Button",
            WidgetKind::Select => "Select",
            WidgetKind::Input => "Input",
            WidgetKind::Textarea => "Textarea",
            WidgetKind::Toggle => "Toggle",
            WidgetKind::Checkbox => "Checkbox",
            WidgetKind::Group => "Group",
            WidgetKind::Form => "Form",
            WidgetKind::Plot => "Plot",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

/// A live widget instance.
pub struct Widget {
    id: WidgetId,
    kind: WidgetKind,
    owner: Option<UnitId>,
    props: RefCell<IndexMap<String, Value>>,
    /// Guest callable registered with `on_update`.
    callback: RefCell<Option<Value>>,
}

impl Widget {
    pub fn id(&self) -> &WidgetId {
        &self.id
    }

    pub fn kind(&self) -> WidgetKind {
        self.kind
    }

    pub fn owner(&self) -> Option<&UnitId> {
        self.owner.as_ref()
    }

    pub fn prop(&self, name: &str) -> Option<Value> {
        self.props.borrow().get(name).cloned()
    }

    pub fn has_prop(&self, name: &str) -> bool {
        self.props.borrow().contains_key(name)
    }

    pub fn set_prop(&self, name: &str, value: Value) {
        self.props.borrow_mut().insert(name.to_string(), value);
    }

    pub fn prop_names(&self) -> Vec<String> {
        self.props.borrow().keys().cloned().collect()
    }

    pub fn callback(&self) -> Option<Value> {
        self.callback.borrow().clone()
    }

    pub fn set_callback(&self, callback: Option<Value>) {
        *self.callback.borrow_mut() = callback;
    }

    /// `{"id", "type", "props"}`, with child widgets serialized in place.
    pub fn to_json(&self) -> serde_json::Value {
        let props: serde_json::Map<String, serde_json::Value> = self
            .props
            .borrow()
            .iter()
            .map(|(name, value)| (name.clone(), json::to_json_lossy(value)))
            .collect();
        serde_json::json!({
            "id": self.id.as_str(),
            "type": self.kind.name(),
            "props": props,
        })
    }
}

impl fmt::Debug for Widget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Widget")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

/// All live widgets of one sandbox.
#[derive(Default)]
pub struct WidgetRegistry {
    widgets: RefCell<FxHashMap<WidgetId, Rc<Widget>>>,
    host: RefCell<Option<HostChannel>>,
    contexts: RefCell<Option<Rc<ContextTable>>>,
}

impl WidgetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the channel partial updates are pushed through.
    pub fn connect(&self, host: impl Into<HostChannel>) {
        *self.host.borrow_mut() = Some(host.into());
    }

    /// Check ambient tags against `contexts` when assigning owners.
    ///
    /// Without a table every ambient tag counts as live.
    pub fn track(&self, contexts: Rc<ContextTable>) {
        *self.contexts.borrow_mut() = Some(contexts);
    }

    /// Create and store a widget owned by the ambient unit.
    ///
    /// A run that was retired or cleared can still be suspended and resume
    /// later; widgets it builds then are unowned, so they never belong to a
    /// successor run of the same unit.
    pub fn register(&self, kind: WidgetKind, props: IndexMap<String, Value>) -> Rc<Widget> {
        let owner = context::current()
            .filter(|tag| {
                self.contexts
                    .borrow()
                    .as_ref()
                    .is_none_or(|contexts| contexts.is_live(tag))
            })
            .map(|tag| tag.unit);
        let widget = Rc::new(Widget {
            id: WidgetId::generate(),
            kind,
            owner,
            props: RefCell::new(props),
            callback: RefCell::new(None),
        });
        tracing::debug!(
            widget = %widget.id,
            kind = kind.name(),
            owner = ?widget.owner,
            "Registered widget"
        );
        self.widgets
            .borrow_mut()
            .insert(widget.id.clone(), widget.clone());
        widget
    }

    pub fn get(&self, id: &WidgetId) -> Option<Rc<Widget>> {
        self.widgets.borrow().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.widgets.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.widgets.borrow().is_empty()
    }

    /// Remove every widget owned by `unit`. Returns how many were removed.
    pub fn clear(&self, unit: &UnitId) -> usize {
        let mut widgets = self.widgets.borrow_mut();
        let before = widgets.len();
        widgets.retain(|_, widget| widget.owner.as_ref() != Some(unit));
        let removed = before - widgets.len();
        if removed > 0 {
            tracing::debug!(unit = %unit, removed, "Cleared widgets");
        }
        removed
    }

    /// Send a partial update for `id`. Repeated identical updates are all sent.
    pub fn push_update(&self, id: &WidgetId, changed: serde_json::Map<String, serde_json::Value>) {
        let event = SandboxEvent::WidgetUpdate {
            widget_id: id.clone(),
            changed,
        };
        match self.host.borrow().as_ref() {
            Some(host) => {
                if !host.send(event) {
                    tracing::debug!(widget = %id, "Host channel closed, dropping widget update");
                }
            }
            None => tracing::debug!(widget = %id, "No host channel, dropping widget update"),
        }
    }

    /// Route a host interaction to its widget.
    ///
    /// Returns `false` if the widget no longer exists. Faults raised by the
    /// widget's callback are written to the ambient unit's `err` stream and
    /// never propagate.
    pub async fn handle_interaction(
        &self,
        interp: &Rc<Interpreter>,
        id: &WidgetId,
        payload: &serde_json::Map<String, serde_json::Value>,
    ) -> bool {
        let Some(widget) = self.get(id) else {
            tracing::debug!(widget = %id, "Interaction for unknown widget ignored");
            return false;
        };
        match ui::apply_interaction(interp, &widget, payload).await {
            Ok(()) => {}
            Err(Unwind::Raise(exc)) => {
                let message = interp
                    .exception_message(&exc)
                    .await
                    .unwrap_or_else(|_| String::from("<unprintable>"));
                tracing::warn!(widget = %id, error = %message, "Widget callback raised");
                let mut text = format_traceback(&exc, &message, true).join("\n");
                text.push('\n');
                interp.write(StreamKind::Err, &text);
            }
            Err(Unwind::Abort) => {
                tracing::debug!(widget = %id, "Widget callback aborted");
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::context::{ContextTag, scope};

    fn props(pairs: &[(&str, Value)]) -> IndexMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_kind_names() {
        for kind in WidgetKind::ALL {
            assert_eq!(WidgetKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(WidgetKind::from_name("Nope"), None);
    }

    #[test]
    fn test_unowned_outside_a_unit() {
        let registry = WidgetRegistry::new();
        let widget = registry.register(WidgetKind::Text, props(&[("content", Value::str("hi"))]));
        assert!(widget.owner().is_none());
        assert!(registry.get(widget.id()).is_some());
    }

    #[tokio::test]
    async fn test_owner_follows_ambient_tag_and_clear() {
        let registry = WidgetRegistry::new();
        let tag = ContextTag { unit: "c1".into(), epoch: 0 };
        let (a, b) = scope(tag, async {
            (
                registry.register(WidgetKind::Slider, IndexMap::new()),
                registry.register(WidgetKind::Button, IndexMap::new()),
            )
        })
        .await;
        let other = registry.register(WidgetKind::Text, IndexMap::new());
        assert_eq!(a.owner().map(UnitId::as_str), Some("c1"));
        assert_ne!(a.id(), b.id());

        assert_eq!(registry.clear(&UnitId::from("c1")), 2);
        assert!(registry.get(a.id()).is_none());
        assert!(registry.get(b.id()).is_none());
        assert!(registry.get(other.id()).is_some());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_retired_tag_registers_unowned() {
        let contexts = Rc::new(ContextTable::new());
        let registry = WidgetRegistry::new();
        registry.track(contexts.clone());
        let unit = UnitId::from("c1");

        let stale = contexts.activate(&unit);
        contexts.clear(&unit);
        let successor = contexts.activate(&unit);

        let orphan = scope(stale, async { registry.register(WidgetKind::Slider, IndexMap::new()) }).await;
        let owned = scope(successor, async { registry.register(WidgetKind::Text, IndexMap::new()) }).await;
        assert!(orphan.owner().is_none());
        assert_eq!(owned.owner(), Some(&unit));

        assert_eq!(registry.clear(&unit), 1);
        assert!(registry.get(owned.id()).is_none());
        assert!(registry.get(orphan.id()).is_some());
    }

    #[test]
    fn test_to_json_shape() {
        let registry = WidgetRegistry::new();
        let child = registry.register(WidgetKind::Text, props(&[("content", Value::str("x"))]));
        let group = registry.register(
            WidgetKind::Group,
            props(&[
                ("children", Value::list(vec![Value::Widget(child.clone())])),
                ("layout", Value::str("row")),
            ]),
        );
        let json = group.to_json();
        assert_eq!(json["type"], "Group");
        assert_eq!(json["id"], group.id().as_str());
        assert_eq!(json["props"]["layout"], "row");
        assert_eq!(json["props"]["children"][0]["props"]["content"], "x");
    }

    #[test]
    fn test_push_update_sends_every_call() {
        let registry = WidgetRegistry::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        registry.connect(tx);
        let widget = registry.register(WidgetKind::Slider, IndexMap::new());
        let mut changed = serde_json::Map::new();
        changed.insert("value".into(), 5.into());
        registry.push_update(widget.id(), changed.clone());
        registry.push_update(widget.id(), changed);
        assert!(matches!(rx.try_recv(), Ok(SandboxEvent::WidgetUpdate { .. })));
        assert!(matches!(rx.try_recv(), Ok(SandboxEvent::WidgetUpdate { .. })));
        assert!(rx.try_recv().is_err());
    }
}
