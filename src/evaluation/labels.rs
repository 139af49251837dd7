//! Reading structured data and the command flag out of free-form model text.

use serde_json::Value;

use crate::ollama::bias::COMMAND_FLAG;

/// Parse `text` as JSON, or failing that the span from the first `{` to the
/// last `}`. Models often wrap the object in prose or code fences.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

/// The command flag of a reply: top level, inside the first element of an
/// array, or one level down inside a nested object.
pub fn extract_prediction(response_text: &str) -> Option<bool> {
    let value = extract_json(response_text)?;
    let candidate = match value {
        Value::Array(items) => items.into_iter().next()?,
        other => other,
    };
    flag_in(&candidate, 1)
}

/// The flag carried by prompt content itself, for prompts that are whole
/// labelled dataset items. Only exact JSON counts; no brace scanning.
pub fn embedded_flag(prompt_content: &str) -> Option<bool> {
    let value: Value = serde_json::from_str(prompt_content.trim()).ok()?;
    value.as_object()?.get(COMMAND_FLAG)?.as_bool()
}

fn flag_in(value: &Value, depth: usize) -> Option<bool> {
    let obj = value.as_object()?;
    if let Some(flag) = obj.get(COMMAND_FLAG).and_then(Value::as_bool) {
        return Some(flag);
    }
    if depth == 0 {
        return None;
    }
    obj.values().find_map(|v| flag_in(v, depth - 1))
}
