//! Fallback parser for models that emit tool calls as plain text
//!
//! Some served models ignore the structured `tool_calls` field and answer
//! with a bracketed JSON array instead:
//!
//! ```text
//! [{"tool": "read_file", "args": {"path": "calc.py"}}]
//! [{"name": "read_file", "arguments": {"path": "calc.py"}}]
//! ```
//!
//! Only the client uses this; the loop always sees structured invocations.

use serde_json::Value;

use crate::llm::types::ToolInvocation;

/// Extract inline tool calls from message text.
///
/// Returns an empty list when the text holds no parseable array. Ids are
/// assigned as `inline-N` in order of appearance.
pub fn parse_inline_tool_calls(content: &str) -> Vec<ToolInvocation> {
    let Some(array) = extract_json_array(content) else {
        return Vec::new();
    };

    array
        .iter()
        .filter_map(parse_item)
        .enumerate()
        .map(|(i, (name, arguments))| ToolInvocation::new(format!("inline-{}", i), name, arguments))
        .collect()
}

/// Parse a structured call's `arguments`, which OpenAI-style servers send as
/// a JSON string. Unparseable text is preserved under `raw`.
pub fn parse_arguments(raw: &Value) -> Value {
    match raw {
        Value::String(s) if s.trim().is_empty() => Value::Object(Default::default()),
        Value::String(s) => serde_json::from_str(s).unwrap_or_else(|_| serde_json::json!({ "raw": s })),
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    }
}

fn extract_json_array(content: &str) -> Option<Vec<Value>> {
    let text = content.trim();
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&text[start..=end]) {
        Ok(Value::Array(items)) => Some(items),
        _ => None,
    }
}

fn parse_item(item: &Value) -> Option<(String, Value)> {
    let obj = item.as_object()?;
    if let Some(name) = obj.get("tool").and_then(|v| v.as_str()) {
        let args = obj.get("args").map(parse_arguments).unwrap_or_default();
        return Some((name.to_string(), args));
    }
    let name = obj.get("name").and_then(|v| v.as_str())?;
    let args = obj.get("arguments").map(parse_arguments).unwrap_or_default();
    Some((name.to_string(), args))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parses_tool_args_form() {
        let calls = parse_inline_tool_calls(r#"[{"tool": "read_file", "args": {"path": "a.py"}}]"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "inline-0");
        assert_eq!(calls[0].name, "read_file");
        assert_eq!(calls[0].arguments, json!({"path": "a.py"}));
    }

    #[test]
    fn test_parses_name_arguments_form_with_surrounding_text() {
        let text = "Sure, here you go:\n[{\"name\": \"done\", \"arguments\": \"{\\\"summary\\\": \\\"ok\\\"}\"}]\nThanks";
        let calls = parse_inline_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "done");
        assert_eq!(calls[0].arguments, json!({"summary": "ok"}));
    }

    #[test]
    fn test_skips_items_without_a_name() {
        let calls = parse_inline_tool_calls(r#"[{"foo": 1}, {"tool": "list_files"}]"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "inline-0");
        assert_eq!(calls[0].arguments, json!({}));
    }

    #[test]
    fn test_plain_prose_yields_nothing() {
        assert!(parse_inline_tool_calls("I will now read the file.").is_empty());
        assert!(parse_inline_tool_calls("see [1] and [2").is_empty());
    }

    #[test]
    fn test_parse_arguments_keeps_raw_text() {
        assert_eq!(parse_arguments(&json!("not json")), json!({"raw": "not json"}));
        assert_eq!(parse_arguments(&json!("")), json!({}));
        assert_eq!(parse_arguments(&json!({"a": 1})), json!({"a": 1}));
    }
}
