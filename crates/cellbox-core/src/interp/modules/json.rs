//! `json`, plus the guest <-> `serde_json` conversions used for widget
//! props and interaction payloads.

use std::fmt::Write;
use std::rc::Rc;

use crate::interp::exception::{EvalResult, Unwind};
use crate::interp::object::{Args, ModuleObj, NativeFunction};
use crate::interp::value::{Dict, Value, format_float};
use crate::interp::Interpreter;

pub(super) fn module() -> ModuleObj {
    let module = ModuleObj::new("json", "JSON encoder and decoder.");
    module.add_natives(FUNCTIONS);
    module
}

/// Convert a guest value to JSON.
///
/// Widgets serialize as their `{"id", "type", "props"}` form. Dict keys
/// that are numbers, booleans or `None` are stringified.
pub fn to_json(value: &Value) -> EvalResult<serde_json::Value> {
    convert(value, false)
}

/// Like [`to_json`], but values with no JSON form become a `<type>` string.
pub fn to_json_lossy(value: &Value) -> serde_json::Value {
    convert(value, true).unwrap_or(serde_json::Value::Null)
}

fn convert(value: &Value, lossy: bool) -> EvalResult<serde_json::Value> {
    use serde_json::Value as Json;
    Ok(match value {
        Value::None => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::from(*i),
        Value::Float(f) => match serde_json::Number::from_f64(*f) {
            Some(n) => Json::Number(n),
            None if lossy => Json::Null,
            None => {
                return Err(Unwind::value_error(
                    "Out of range float values are not JSON compliant",
                ));
            }
        },
        Value::Str(s) => Json::String(s.to_string()),
        Value::List(items) => {
            let items = items.borrow().clone();
            Json::Array(items.iter().map(|v| convert(v, lossy)).collect::<EvalResult<_>>()?)
        }
        Value::Tuple(items) => {
            Json::Array(items.iter().map(|v| convert(v, lossy)).collect::<EvalResult<_>>()?)
        }
        Value::Dict(dict) => {
            let entries: Vec<(Value, Value)> = dict
                .borrow()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let mut map = serde_json::Map::new();
            for (key, item) in entries {
                let key = match &key {
                    Value::Str(s) => s.to_string(),
                    Value::None => "null".to_string(),
                    Value::Bool(b) => b.to_string(),
                    Value::Int(i) => i.to_string(),
                    Value::Float(f) => format_float(*f),
                    _ if lossy => format!("<{}>", key.type_name()),
                    other => {
                        return Err(Unwind::type_error(format!(
                            "keys must be str, int, float, bool or None, not {}",
                            other.type_name()
                        )));
                    }
                };
                map.insert(key, convert(&item, lossy)?);
            }
            Json::Object(map)
        }
        Value::Widget(widget) => widget.to_json(),
        other if lossy => Json::String(format!("<{}>", other.type_name())),
        other => {
            return Err(Unwind::type_error(format!(
                "Object of type {} is not JSON serializable",
                other.type_name()
            )));
        }
    })
}

/// Convert JSON to a guest value. Integral numbers become `int`.
pub fn from_json(json: &serde_json::Value) -> Value {
    use serde_json::Value as Json;
    match json {
        Json::Null => Value::None,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => Value::str(s),
        Json::Array(items) => Value::list(items.iter().map(from_json).collect()),
        Json::Object(map) => {
            let mut dict = Dict::new();
            for (key, item) in map {
                dict.insert_str(key, from_json(item));
            }
            Value::dict(dict)
        }
    }
}

/// Guest-side rendering of `json.dumps`: `", "` and `": "` separators,
/// non-ASCII escaped, optional indentation.
fn dump(json: &serde_json::Value, indent: Option<usize>, sort_keys: bool, level: usize, out: &mut String) {
    use serde_json::Value as Json;
    let newline = |out: &mut String, level: usize| {
        if let Some(width) = indent {
            out.push('\n');
            out.push_str(&" ".repeat(width * level));
        }
    };
    let item_sep = if indent.is_some() { "," } else { ", " };
    match json {
        Json::Null => out.push_str("null"),
        Json::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Json::Number(n) => match (n.as_i64(), n.as_u64(), n.as_f64()) {
            (Some(i), _, _) => {
                let _ = write!(out, "{i}");
            }
            (None, Some(u), _) => {
                let _ = write!(out, "{u}");
            }
            (_, _, Some(f)) => out.push_str(&format_float(f)),
            _ => out.push_str("NaN"),
        },
        Json::String(s) => escape_ascii(s, out),
        Json::Array(items) if items.is_empty() => out.push_str("[]"),
        Json::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(item_sep);
                }
                newline(out, level + 1);
                dump(item, indent, sort_keys, level + 1, out);
            }
            newline(out, level);
            out.push(']');
        }
        Json::Object(map) if map.is_empty() => out.push_str("{}"),
        Json::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            if sort_keys {
                entries.sort_by(|a, b| a.0.cmp(b.0));
            }
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push_str(item_sep);
                }
                newline(out, level + 1);
                escape_ascii(key, out);
                out.push_str(": ");
                dump(item, indent, sort_keys, level + 1, out);
            }
            newline(out, level);
            out.push('}');
        }
    }
}

fn escape_ascii(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if c.is_ascii() && !c.is_ascii_control() => out.push(c),
            c => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    let _ = write!(out, "\\u{unit:04x}");
                }
            }
        }
    }
    out.push('"');
}

fn dumps(_: &Rc<Interpreter>, mut args: Args) -> EvalResult {
    let indent = match args.take_keyword("indent") {
        None | Some(Value::None) => None,
        Some(value) => Some(value.as_int().filter(|n| *n >= 0).ok_or_else(|| {
            Unwind::type_error("indent must be a non-negative integer")
        })? as usize),
    };
    let sort_keys = args.take_keyword("sort_keys").is_some_and(|v| v.truthy());
    args.no_keywords("dumps")?;
    args.arity("dumps", 1, 1)?;
    let json = to_json(&args.positional[0])?;
    let mut out = String::new();
    dump(&json, indent, sort_keys, 0, &mut out);
    Ok(Value::from(out))
}

fn loads(_: &Rc<Interpreter>, args: Args) -> EvalResult {
    args.no_keywords("loads")?;
    args.arity("loads", 1, 1)?;
    let Value::Str(text) = &args.positional[0] else {
        return Err(Unwind::type_error(format!(
            "the JSON object must be str, not {}",
            args.positional[0].type_name()
        )));
    };
    let json: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| Unwind::value_error(format!("Expecting value: {e}")))?;
    Ok(from_json(&json))
}

static FUNCTIONS: &[NativeFunction] = &[
    NativeFunction::sync("dumps", "(obj, *, indent=None, sort_keys=False)", "Serialize obj to a JSON formatted str.", dumps),
    NativeFunction::sync("loads", "(s)", "Deserialize s (a str containing a JSON document) to a Python object.", loads),
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::testing::eval_repr;

    #[test]
    fn test_from_json_numbers() {
        let value = from_json(&serde_json::json!({"a": 1, "b": 1.5, "c": [null, true]}));
        let Value::Dict(dict) = value else { panic!("expected dict") };
        let dict = dict.borrow();
        assert!(matches!(dict.get_str("a"), Some(Value::Int(1))));
        assert!(matches!(dict.get_str("b"), Some(Value::Float(f)) if f == 1.5));
    }

    #[test]
    fn test_lossy_conversion() {
        let value = Value::list(vec![Value::Int(1), Value::Float(f64::NAN), Value::Type(crate::interp::BuiltinType::Int)]);
        assert_eq!(to_json_lossy(&value), serde_json::json!([1, null, "<type>"]));
        assert!(to_json(&value).is_err());
    }

    #[test]
    fn test_escape_ascii() {
        let mut out = String::new();
        escape_ascii("é\"\n😀", &mut out);
        assert_eq!(out, r#""\u00e9\"\n\ud83d\ude00""#);
    }

    #[tokio::test]
    async fn test_dumps_and_loads() {
        assert_eq!(
            eval_repr("import json\njson.dumps({'b': [1, 2.5, None], 'a': True})").await,
            r#"'{"b": [1, 2.5, null], "a": true}'"#
        );
        assert_eq!(
            eval_repr("import json\njson.dumps({'b': 1, 'a': {}}, sort_keys=True, indent=2)").await,
            r#"'{\n  "a": {},\n  "b": 1\n}'"#
        );
        assert_eq!(eval_repr("import json\njson.loads('{\"x\": [1, 2]}')").await, "{'x': [1, 2]}");
        assert_eq!(eval_repr("import json\njson.loads('nope')").await, "!ValueError");
        assert_eq!(eval_repr("import json\njson.dumps(print)").await, "!TypeError");
    }
}
