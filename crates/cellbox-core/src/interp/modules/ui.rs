//! `ui`: interactive widgets.
//!
//! Widget classes are natives that register a [`Widget`] with the
//! sandbox's registry. Reading an attribute returns the prop of that name;
//! assigning one updates the prop and pushes exactly one partial update to
//! the host. `display` and `print_md` are added by the runtime prelude.

use std::ptr;
use std::rc::Rc;

use indexmap::IndexMap;

use super::json::{from_json, to_json_lossy};
use crate::interp::builtins::type_of;
use crate::interp::exception::{EvalResult, ExcKind, Unwind};
use crate::interp::object::{Args, BoundMethod, ModuleObj, NativeFunction};
use crate::interp::value::{BuiltinType, Dict, Value};
use crate::interp::Interpreter;
use crate::sandbox::widgets::{Widget, WidgetKind};

/// Wraps a widget's JSON form in stdout so the host can render it inline.
pub const UI_START: &str = "\x02CELLBOX_UI\x02";
pub const UI_END: &str = "\x02/CELLBOX_UI\x02";
/// Markdown rendered with document styling.
pub const MD_STYLED_START: &str = "\x02CELLBOX_MD_STYLED\x02";
pub const MD_STYLED_END: &str = "\x02/CELLBOX_MD_STYLED\x02";
/// Markdown rendered in the plain output style.
pub const MD_PLAIN_START: &str = "\x02CELLBOX_MD_PLAIN\x02";
pub const MD_PLAIN_END: &str = "\x02/CELLBOX_MD_PLAIN\x02";

pub(super) fn module() -> ModuleObj {
    let module = ModuleObj::new(
        "ui",
        "Interactive UI components: inputs, layout containers and plots.",
    );
    module.add_natives(WIDGET_CLASSES);
    for (name, marker) in [
        ("MARKER_UI_START", UI_START),
        ("MARKER_UI_END", UI_END),
        ("MARKER_MD_STYLED_START", MD_STYLED_START),
        ("MARKER_MD_STYLED_END", MD_STYLED_END),
        ("MARKER_MD_PLAIN_START", MD_PLAIN_START),
        ("MARKER_MD_PLAIN_END", MD_PLAIN_END),
    ] {
        module.set(name, Value::str(marker));
    }
    module
}

#[derive(Clone, Copy)]
enum Init {
    Required,
    None,
    Int(i64),
    Str(&'static str),
    Bool(bool),
    EmptyList,
}

impl Init {
    fn value(self) -> Option<Value> {
        Some(match self {
            Init::Required => return None,
            Init::None => Value::None,
            Init::Int(i) => Value::Int(i),
            Init::Str(s) => Value::str(s),
            Init::Bool(b) => Value::Bool(b),
            Init::EmptyList => Value::list(Vec::new()),
        })
    }
}

/// Constructor parameters in positional order, with their defaults.
/// Extra keyword arguments are kept as props as well.
fn params(kind: WidgetKind) -> &'static [(&'static str, Init)] {
    match kind {
        WidgetKind::Slider => &[
            ("value", Init::Int(0)),
            ("min", Init::Int(0)),
            ("max", Init::Int(100)),
            ("step", Init::Int(1)),
            ("label", Init::Str("Slider")),
            ("size", Init::None),
            ("color", Init::None),
        ],
        WidgetKind::Text => &[
            ("content", Init::Str("")),
            ("size", Init::None),
            ("align_h", Init::Str("left")),
            ("align_v", Init::Str("top")),
            ("border", Init::Bool(true)),
            ("background", Init::Bool(true)),
            ("color", Init::None),
        ],
        WidgetKind::Button => &[
            ("label", Init::Str("Button")),
            ("color", Init::None),
            ("style", Init::None),
            ("size", Init::None),
            ("disabled", Init::Bool(false)),
            ("loading", Init::Bool(false)),
            ("button_type", Init::Str("button")),
        ],
        WidgetKind::Select => &[
            ("options", Init::EmptyList),
            ("value", Init::None),
            ("placeholder", Init::Str("Select an option")),
            ("color", Init::None),
            ("size", Init::None),
            ("disabled", Init::Bool(false)),
        ],
        WidgetKind::Input => &[
            ("value", Init::Str("")),
            ("placeholder", Init::Str("")),
            ("input_type", Init::Str("text")),
            ("color", Init::None),
            ("size", Init::None),
            ("disabled", Init::Bool(false)),
        ],
        WidgetKind::Textarea => &[
            ("value", Init::Str("")),
            ("placeholder", Init::Str("")),
            ("rows", Init::Int(4)),
            ("color", Init::None),
            ("size", Init::None),
            ("disabled", Init::Bool(false)),
        ],
        WidgetKind::Toggle | WidgetKind::Checkbox => &[
            ("checked", Init::Bool(false)),
            ("label", Init::None),
            ("color", Init::None),
            ("size", Init::None),
            ("disabled", Init::Bool(false)),
        ],
        WidgetKind::Group => &[
            ("children", Init::Required),
            ("layout", Init::Str("col")),
            ("label", Init::None),
            ("width", Init::Str("full")),
            ("align", Init::Str("center")),
            ("border", Init::Bool(false)),
            ("gap", Init::None),
        ],
        WidgetKind::Form => &[
            ("children", Init::Required),
            ("label", Init::None),
            ("width", Init::Str("full")),
            ("border", Init::Bool(true)),
            ("gap", Init::Int(2)),
        ],
        WidgetKind::Plot => &[
            ("data", Init::EmptyList),
            ("mark", Init::Str("line")),
            ("x", Init::None),
            ("y", Init::None),
            ("title", Init::None),
        ],
    }
}

/// Validate a container's children: a list or tuple of widgets.
fn children(kind: WidgetKind, value: Value) -> EvalResult {
    let items = match &value {
        Value::List(items) => items.borrow().clone(),
        Value::Tuple(items) => items.as_ref().clone(),
        other => {
            return Err(Unwind::type_error(format!(
                "{}() children must be a list of UI elements, not {}",
                kind.name(),
                other.type_name()
            )));
        }
    };
    if let Some(bad) = items.iter().find(|v| !matches!(v, Value::Widget(_))) {
        return Err(Unwind::type_error(format!(
            "{}() children must be UI elements, not {}",
            kind.name(),
            bad.type_name()
        )));
    }
    Ok(Value::list(items))
}

fn construct(interp: &Rc<Interpreter>, kind: WidgetKind, mut args: Args) -> EvalResult {
    let params = params(kind);
    if args.len() > params.len() {
        return Err(Unwind::type_error(format!(
            "{}() takes at most {} positional arguments ({} given)",
            kind.name(),
            params.len(),
            args.len()
        )));
    }
    let mut props = IndexMap::new();
    for (index, (name, init)) in params.iter().enumerate() {
        let value = match args.take(index, name) {
            Some(value) => value,
            None => init.value().ok_or_else(|| {
                Unwind::type_error(format!(
                    "{}() missing required argument: '{name}'",
                    kind.name()
                ))
            })?,
        };
        let value = match (*name, value) {
            ("children", value) => children(kind, value)?,
            ("options", Value::None) => Value::list(Vec::new()),
            (_, value) => value,
        };
        props.insert(name.to_string(), value);
    }
    for (name, value) in args.keywords.drain(..) {
        props.insert(name, value);
    }
    Ok(Value::Widget(interp.widgets().register(kind, props)))
}

/// The guest class value for `kind` (what `type(widget)` returns).
pub(crate) fn widget_class(kind: WidgetKind) -> Value {
    WIDGET_CLASSES
        .iter()
        .find(|class| class.name == kind.name())
        .map_or(Value::Type(BuiltinType::Object), Value::Native)
}

pub(crate) fn is_widget_class(native: &NativeFunction) -> bool {
    WIDGET_CLASSES.iter().any(|class| ptr::eq(class, native))
}

pub(crate) fn widget_matches(class: &NativeFunction, widget: &Widget) -> bool {
    class.name == widget.kind().name()
}

/// `Form.value`: child values keyed by placeholder, else by kind name.
fn form_value(form: &Widget) -> Value {
    let mut dict = Dict::new();
    let Some(Value::List(items)) = form.prop("children") else {
        return Value::dict(dict);
    };
    for child in items.borrow().iter() {
        let Value::Widget(child) = child else { continue };
        let Some(value) = child.prop("value") else { continue };
        let key = match child.prop("placeholder") {
            Some(Value::Str(s)) if !s.is_empty() => s.to_string(),
            _ => child.kind().name().to_lowercase(),
        };
        dict.insert_str(&key, value);
    }
    Value::dict(dict)
}

pub(crate) fn widget_attr(obj: &Value, widget: &Rc<Widget>, name: &str) -> EvalResult {
    match name {
        "id" => return Ok(Value::str(widget.id().as_str())),
        "props" => {
            let mut dict = Dict::new();
            for prop in widget.prop_names() {
                if let Some(value) = widget.prop(&prop) {
                    dict.insert_str(&prop, value);
                }
            }
            return Ok(Value::dict(dict));
        }
        "value" if widget.kind() == WidgetKind::Form => return Ok(form_value(widget)),
        "__class__" => return Ok(widget_class(widget.kind())),
        "__doc__" => {
            return Ok(match widget_class(widget.kind()) {
                Value::Native(class) => Value::str(class.doc),
                _ => Value::None,
            });
        }
        _ => {}
    }
    if let Some(method) = WIDGET_METHODS.iter().find(|m| m.name == name) {
        return Ok(BoundMethod::new(obj.clone(), Value::Native(method)));
    }
    widget
        .prop(name)
        .ok_or_else(|| Unwind::attribute_error(widget.kind().name(), name))
}

/// Update props and push one partial update with exactly those props.
fn update_props(interp: &Interpreter, widget: &Widget, changed: Vec<(String, Value)>) {
    let mut payload = serde_json::Map::new();
    for (name, value) in changed {
        payload.insert(name.clone(), to_json_lossy(&value));
        widget.set_prop(&name, value);
    }
    interp.widgets().push_update(widget.id(), payload);
}

pub(crate) fn set_widget_attr(interp: &Interpreter, widget: &Rc<Widget>, name: &str, value: Value) -> EvalResult<()> {
    let value = match name {
        "id" | "props" => {
            return Err(Unwind::new(
                ExcKind::AttributeError,
                format!(
                    "attribute '{name}' of '{}' objects is not writable",
                    widget.kind().name()
                ),
            ));
        }
        "children" if matches!(widget.kind(), WidgetKind::Group | WidgetKind::Form) => {
            children(widget.kind(), value)?
        }
        _ => value,
    };
    update_props(interp, widget, vec![(name.to_string(), value)]);
    Ok(())
}

pub(crate) fn widget_attr_names(widget: &Widget) -> Vec<String> {
    let mut names: Vec<String> = ["id", "props"].into_iter().map(String::from).collect();
    names.extend(WIDGET_METHODS.iter().map(|m| m.name.to_string()));
    names.extend(widget.prop_names());
    if widget.kind() == WidgetKind::Form {
        names.push("value".to_string());
    }
    names.sort();
    names.dedup();
    names
}

/// `str(widget)`: the marker-wrapped JSON payload.
pub(crate) fn widget_str(widget: &Widget) -> EvalResult<String> {
    let payload = serde_json::to_string(&widget.to_json())
        .map_err(|e| Unwind::value_error(e.to_string()))?;
    Ok(format!("{UI_START}{payload}{UI_END}"))
}

/// Apply a host interaction: kind-specific state update, then the
/// registered callback with the payload as a dict.
///
/// State changes that come from the host are not echoed back as updates.
pub(crate) async fn apply_interaction(
    interp: &Rc<Interpreter>,
    widget: &Rc<Widget>,
    payload: &serde_json::Map<String, serde_json::Value>,
) -> EvalResult<()> {
    let field = match widget.kind() {
        WidgetKind::Slider => {
            if let Some(raw) = payload.get("value") {
                let value = coerce_slider(interp, widget, from_json(raw)).await?;
                widget.set_prop("value", value);
            }
            None
        }
        WidgetKind::Select | WidgetKind::Input | WidgetKind::Textarea => Some("value"),
        WidgetKind::Toggle | WidgetKind::Checkbox => Some("checked"),
        _ => None,
    };
    if let Some(field) = field
        && let Some(raw) = payload.get(field)
    {
        widget.set_prop(field, from_json(raw));
    }
    if let Some(callback) = widget.callback() {
        let data = from_json(&serde_json::Value::Object(payload.clone()));
        interp.call(&callback, Args::new(vec![data])).await?;
    }
    Ok(())
}

/// A float step makes the value a float; otherwise it keeps the type of
/// the current value.
async fn coerce_slider(interp: &Rc<Interpreter>, widget: &Widget, raw: Value) -> EvalResult {
    let target = match (widget.prop("step"), widget.prop("value")) {
        (Some(Value::Float(_)), _) => Value::Type(BuiltinType::Float),
        (_, Some(current)) if !current.is_none() => type_of(&current),
        _ => return Ok(raw),
    };
    interp.call(&target, Args::new(vec![raw])).await
}

fn receiver(args: &Args, method: &str) -> EvalResult<Rc<Widget>> {
    match args.positional.first() {
        Some(Value::Widget(widget)) => Ok(widget.clone()),
        other => Err(Unwind::type_error(format!(
            "descriptor '{method}' requires a UI element, not {}",
            other.map_or_else(|| "nothing".to_string(), Value::type_name)
        ))),
    }
}

static WIDGET_METHODS: &[NativeFunction] = &[
    NativeFunction::sync("on_update", "(callback)", "Register a callback called with the interaction data whenever the user interacts with this element.", |_, args| {
        args.no_keywords("on_update")?;
        args.arity("on_update", 2, 2)?;
        let widget = receiver(&args, "on_update")?;
        let callback = args.positional[1].clone();
        widget.set_callback((!callback.is_none()).then(|| callback.clone()));
        Ok(callback)
    }),
    NativeFunction::sync("send_update", "(**props)", "Update properties and send them to the frontend.", |interp, args| {
        args.arity("send_update", 1, 1)?;
        let widget = receiver(&args, "send_update")?;
        update_props(interp, &widget, args.keywords.into_iter().collect());
        Ok(Value::None)
    }),
    NativeFunction::sync("hide", "()", "Hide this element.", |interp, args| {
        args.arity("hide", 1, 1)?;
        let widget = receiver(&args, "hide")?;
        update_props(interp, &widget, vec![("hidden".to_string(), Value::Bool(true))]);
        Ok(Value::None)
    }),
    NativeFunction::sync("show", "()", "Show this element.", |interp, args| {
        args.arity("show", 1, 1)?;
        let widget = receiver(&args, "show")?;
        update_props(interp, &widget, vec![("hidden".to_string(), Value::Bool(false))]);
        Ok(Value::None)
    }),
    NativeFunction::sync("to_json", "()", "Serialize the element for frontend rendering.", |_, args| {
        args.arity("to_json", 1, 1)?;
        Ok(from_json(&receiver(&args, "to_json")?.to_json()))
    }),
];

static WIDGET_CLASSES: &[NativeFunction] = &[
    NativeFunction::sync(
        "Slider",
        "(value=0, min=0, max=100, step=1, label='Slider', size=None, color=None, **props)",
        "A numeric slider. Its value is a float when step is a float.",
        |interp, args| construct(interp, WidgetKind::Slider, args),
    ),
    NativeFunction::sync(
        "Text",
        "(content='', size=None, align_h='left', align_v='top', border=True, background=True, color=None, **props)",
        "Dynamic text. Assigning to content updates the display.",
        |interp, args| construct(interp, WidgetKind::Text, args),
    ),
    NativeFunction::sync(
        "Button",
        "(label='Button', color=None, style=None, size=None, disabled=False, loading=False, button_type='button', **props)",
        "A clickable button. Callbacks receive {'clicked': True}.",
        |interp, args| construct(interp, WidgetKind::Button, args),
    ),
    NativeFunction::sync(
        "Select",
        "(options=None, value=None, placeholder='Select an option', color=None, size=None, disabled=False, **props)",
        "A dropdown selection.",
        |interp, args| construct(interp, WidgetKind::Select, args),
    ),
    NativeFunction::sync(
        "Input",
        "(value='', placeholder='', input_type='text', color=None, size=None, disabled=False, **props)",
        "A single-line text input.",
        |interp, args| construct(interp, WidgetKind::Input, args),
    ),
    NativeFunction::sync(
        "Textarea",
        "(value='', placeholder='', rows=4, color=None, size=None, disabled=False, **props)",
        "A multi-line text input.",
        |interp, args| construct(interp, WidgetKind::Textarea, args),
    ),
    NativeFunction::sync(
        "Toggle",
        "(checked=False, label=None, color=None, size=None, disabled=False, **props)",
        "An on/off switch.",
        |interp, args| construct(interp, WidgetKind::Toggle, args),
    ),
    NativeFunction::sync(
        "Checkbox",
        "(checked=False, label=None, color=None, size=None, disabled=False, **props)",
        "A checkbox.",
        |interp, args| construct(interp, WidgetKind::Checkbox, args),
    ),
    NativeFunction::sync(
        "Group",
        "(children, layout='col', label=None, width='full', align='center', border=False, gap=None, **props)",
        "Lays out child elements in a row or column.",
        |interp, args| construct(interp, WidgetKind::Group, args),
    ),
    NativeFunction::sync(
        "Form",
        "(children, label=None, width='full', border=True, gap=2, **props)",
        "Groups inputs; form.value collects the children's values.",
        |interp, args| construct(interp, WidgetKind::Form, args),
    ),
    NativeFunction::sync(
        "Plot",
        "(data=None, mark='line', x=None, y=None, title=None, **options)",
        "A chart drawn by the frontend from data and plot options.",
        |interp, args| construct(interp, WidgetKind::Plot, args),
    ),
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::testing::{interpreter, run};
    use crate::interp::Namespace;
    use crate::sandbox::protocol::SandboxEvent;

    #[tokio::test]
    async fn test_construct_and_read_props() {
        let (interp, _) = interpreter();
        let ns = Namespace::new();
        let value = run(&interp, &ns, "from ui import Slider\ns = Slider(5, max=10, width='half')\n(s.value, s.max, s.step, s.label, s.width)")
            .await
            .unwrap();
        assert_eq!(interp.repr(&value).await.unwrap(), "(5, 10, 1, 'Slider', 'half')");
        assert_eq!(interp.widgets().len(), 1);
    }

    #[tokio::test]
    async fn test_set_attr_pushes_one_update() {
        let (interp, _) = interpreter();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        interp.widgets().connect(tx);
        let ns = Namespace::new();
        let value = run(&interp, &ns, "import ui\nt = ui.Text('a')\nt.content = 'b'\nt.content")
            .await
            .unwrap();
        assert_eq!(value.as_str(), Some("b"));
        let Ok(SandboxEvent::WidgetUpdate { changed, .. }) = rx.try_recv() else {
            panic!("expected an update");
        };
        assert_eq!(changed["content"], "b");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_hide_show_and_send_update() {
        let (interp, _) = interpreter();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        interp.widgets().connect(tx);
        let ns = Namespace::new();
        run(&interp, &ns, "import ui\nb = ui.Button()\nb.hide()\nb.send_update(label='Go', loading=True)")
            .await
            .unwrap();
        let mut updates = Vec::new();
        while let Ok(SandboxEvent::WidgetUpdate { changed, .. }) = rx.try_recv() {
            updates.push(serde_json::Value::Object(changed));
        }
        assert_eq!(
            updates,
            vec![
                serde_json::json!({"hidden": true}),
                serde_json::json!({"label": "Go", "loading": true}),
            ]
        );
    }

    #[tokio::test]
    async fn test_form_value_and_children() {
        let (interp, _) = interpreter();
        let ns = Namespace::new();
        let src = "\
import ui
name = ui.Input('Ada', placeholder='Name')
agree = ui.Checkbox(True)
notes = ui.Textarea('hi')
f = ui.Form([name, agree, notes, ui.Button('Send')])
f.value";
        let value = run(&interp, &ns, src).await.unwrap();
        assert_eq!(interp.repr(&value).await.unwrap(), "{'Name': 'Ada', 'textarea': 'hi'}");

        let err = run(&interp, &ns, "ui.Group([1])").await;
        assert!(matches!(err, Err(Unwind::Raise(exc)) if exc.kind == ExcKind::TypeError));
    }

    #[tokio::test]
    async fn test_str_and_repr() {
        let (interp, _) = interpreter();
        let ns = Namespace::new();
        let value = run(&interp, &ns, "import ui\nb = ui.Button('x')\n(str(b), repr(b), isinstance(b, ui.Button), type(b) is ui.Button)")
            .await
            .unwrap();
        let Value::Tuple(items) = value else { panic!("tuple expected") };
        let text = items[0].as_str().unwrap();
        assert!(text.starts_with(UI_START) && text.ends_with(UI_END));
        assert!(text.contains(r#""type":"Button""#));
        assert!(items[1].as_str().unwrap().starts_with("<Button id="));
        assert!(matches!(items[2], Value::Bool(true)));
        assert!(matches!(items[3], Value::Bool(true)));
    }

    #[tokio::test]
    async fn test_interactions_update_state_and_call_back() {
        let (interp, sink) = interpreter();
        let ns = Namespace::new();
        let src = "\
import ui
s = ui.Slider(1)
f = ui.Slider(0.5, step=0.5)
t = ui.Toggle()
seen = []
s.on_update(lambda data: seen.append(data['value']))
(s, f, t)";
        let value = run(&interp, &ns, src).await.unwrap();
        let Value::Tuple(items) = value else { panic!("tuple expected") };
        let [Value::Widget(s), Value::Widget(f), Value::Widget(t)] = items.as_slice() else {
            panic!("widgets expected");
        };
        let payload = |v: serde_json::Value| v.as_object().cloned().unwrap();

        let registry = interp.widgets().clone();
        assert!(registry.handle_interaction(&interp, s.id(), &payload(serde_json::json!({"value": 7.9}))).await);
        assert!(matches!(s.prop("value"), Some(Value::Int(7))));
        assert!(registry.handle_interaction(&interp, f.id(), &payload(serde_json::json!({"value": 2}))).await);
        assert!(matches!(f.prop("value"), Some(Value::Float(x)) if x == 2.0));
        assert!(registry.handle_interaction(&interp, t.id(), &payload(serde_json::json!({"checked": true}))).await);
        assert!(matches!(t.prop("checked"), Some(Value::Bool(true))));

        let seen = run(&interp, &ns, "seen").await.unwrap();
        assert_eq!(interp.repr(&seen).await.unwrap(), "[7.9]");

        run(&interp, &ns, "t.on_update(lambda data: 1 / 0)").await.unwrap();
        assert!(registry.handle_interaction(&interp, t.id(), &payload(serde_json::json!({}))).await);
        assert!(sink.err.borrow().contains("ZeroDivisionError"));
    }
}
