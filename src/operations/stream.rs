//! Event-stream parsing
//!
//! Backends answer with `data:`-prefixed events separated by blank lines.
//! The whole body is read first and then split into JSON events.

use serde_json::Value;

/// JSON payloads of every `data:` event that parses, in order
pub fn data_events(body: &str) -> Vec<Value> {
    body.split("\n\n")
        .flat_map(|block| block.lines())
        .filter_map(|line| line.trim().strip_prefix("data:"))
        .filter_map(|payload| serde_json::from_str(payload.trim()).ok())
        .collect()
}

/// First string (or number, as text) found under `key` at any depth
pub fn find_text(value: &Value, key: &str) -> Option<String> {
    match value {
        Value::Object(map) => {
            if let Some(found) = map.get(key).and_then(scalar_text) {
                return Some(found);
            }
            map.values().find_map(|v| find_text(v, key))
        }
        Value::Array(items) => items.iter().find_map(|v| find_text(v, key)),
        _ => None,
    }
}

/// Text of a scalar JSON value; blank strings and composites yield `None`
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_data_events() {
        let body = "data:{\"a\":1}\n\nevent: ping\n\ndata: {\"a\":2}\n\ndata:[DONE]\n\n";
        let events = data_events(body);
        assert_eq!(events, vec![json!({"a": 1}), json!({"a": 2})]);
    }

    #[test]
    fn test_find_text_nested() {
        let event = json!({"data": {"meta": {"traceId": "t-9"}, "conversationId": 42}});
        assert_eq!(find_text(&event, "traceId"), Some("t-9".to_string()));
        assert_eq!(find_text(&event, "conversationId"), Some("42".to_string()));
        assert_eq!(find_text(&event, "missing"), None);
    }

    #[test]
    fn test_blank_values_are_skipped() {
        let event = json!({"content": "", "inner": {"content": "hello"}});
        assert_eq!(find_text(&event, "content"), Some("hello".to_string()));
    }
}
