use reqwest::StatusCode;
use serde_json::Value;

/// Body fields that carry a user-facing message, highest priority first.
const MESSAGE_FIELDS: [&str; 4] = ["non_field_errors", "detail", "message", "error_code"];

/// Extract a human-readable message from an API error body.
///
/// The first of `non_field_errors`, `detail`, `message`, `error_code` that
/// holds text wins (list values are joined with `", "`). Without any of
/// them the message is `"<code>: <reason>"`; the raw body is used only when
/// the status has no canonical reason either.
#[must_use]
pub fn format_error_message(status: StatusCode, body: &str) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        let found = MESSAGE_FIELDS
            .iter()
            .filter_map(|field| map.get(*field))
            .find_map(render);
        if let Some(message) = found {
            return message;
        }
    }

    match status.canonical_reason() {
        Some(reason) => format!("{}: {reason}", status.as_u16()),
        None if !body.trim().is_empty() => body.trim().to_string(),
        None => format!("{}: Unknown", status.as_u16()),
    }
}

fn render(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(render)
            .collect::<Vec<_>>()
            .join(", "),
        Value::Number(n) => n.to_string(),
        Value::Null | Value::Bool(_) | Value::Object(_) => String::new(),
    };
    (!text.is_empty()).then_some(text)
}
