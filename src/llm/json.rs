//! Extraction of JSON values embedded in free-form model replies

use serde_json::{Map, Value};

/// Find the first well-formed JSON array in `text`
pub fn first_json_array(text: &str) -> Option<Vec<Value>> {
    match scan(text, '[', ']')? {
        Value::Array(items) => Some(items),
        _ => None,
    }
}

/// Find the first well-formed JSON object in `text`
pub fn first_json_object(text: &str) -> Option<Map<String, Value>> {
    match scan(text, '{', '}')? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Try the widest bracketed slice first (covers replies wrapped in prose or
/// code fences), then fall back to streaming a value from each opening
/// bracket in turn.
fn scan(text: &str, open: char, close: char) -> Option<Value> {
    let start = text.find(open)?;

    if let Some(end) = text.rfind(close) {
        if end > start {
            if let Ok(value) = serde_json::from_str::<Value>(&text[start..=end]) {
                return Some(value);
            }
        }
    }

    for (offset, _) in text[start..].match_indices(open) {
        let candidate = &text[start + offset..];
        let mut stream = serde_json::Deserializer::from_str(candidate).into_iter::<Value>();
        if let Some(Ok(value)) = stream.next() {
            return Some(value);
        }
    }

    None
}
