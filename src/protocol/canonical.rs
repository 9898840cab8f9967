//! Canonical JSON rendering for signing.
//!
//! Compact output, object keys in byte order at every depth. This does not
//! depend on serde_json's map ordering, so it stays stable even if another
//! crate in the build enables `preserve_order`.

use serde_json::Value;

/// Render `value` in canonical form.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_value(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::String(s) => write_string(s, out),
        // Null, bool and numbers have a single compact rendering
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn write_string(s: &str, out: &mut String) {
    // Serializing a &str cannot fail
    out.push_str(&serde_json::to_string(s).unwrap_or_default());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compact_and_sorted() {
        let value = json!({"b": [1, 2, {"y": 1, "x": 2}], "a": "q\"uote"});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":"q\"uote","b":[1,2,{"x":2,"y":1}]}"#
        );
    }

    #[test]
    fn test_scalars() {
        assert_eq!(canonical_json(&json!(null)), "null");
        assert_eq!(canonical_json(&json!(5)), "5");
        assert_eq!(canonical_json(&json!(-1.5)), "-1.5");
        assert_eq!(canonical_json(&json!(true)), "true");
    }
}
