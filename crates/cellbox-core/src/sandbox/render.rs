//! Rich results for the host.
//!
//! A value the host can draw itself (rather than showing its `repr`)
//! implements [`Renderable`]. Widgets are the only guest values that do.

use serde::{Deserialize, Serialize};

use super::widgets::Widget;
use crate::interp::Value;

/// MIME type of a widget tree payload.
pub const UI_MIME: &str = "application/vnd.cellbox.ui+json";

/// Payload attached to a successful result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderBundle {
    pub mime_type: String,
    pub data: serde_json::Value,
}

/// Values that render as something richer than text.
pub trait Renderable {
    fn to_render_bundle(&self) -> RenderBundle;
}

impl Renderable for Widget {
    fn to_render_bundle(&self) -> RenderBundle {
        RenderBundle {
            mime_type: UI_MIME.to_string(),
            data: self.to_json(),
        }
    }
}

/// The render capability of a guest value, if it has one.
pub fn as_renderable(value: &Value) -> Option<&dyn Renderable> {
    match value {
        Value::Widget(widget) => Some(widget.as_ref()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::*;
    use crate::sandbox::widgets::{WidgetKind, WidgetRegistry};

    #[test]
    fn test_only_widgets_render() {
        let registry = WidgetRegistry::new();
        let widget = Value::Widget(registry.register(WidgetKind::Button, IndexMap::new()));
        let bundle = as_renderable(&widget).map(Renderable::to_render_bundle);
        let bundle = bundle.unwrap();
        assert_eq!(bundle.mime_type, UI_MIME);
        assert_eq!(bundle.data["type"], "Button");

        assert!(as_renderable(&Value::Int(1)).is_none());
        assert!(as_renderable(&Value::list(vec![widget])).is_none());
    }
}
