//! Canonical JSON rendering for replay-harness digests and risk-event
//! detail payloads.
//!
//! Object keys sort lexicographically, arrays keep order, output is
//! compact ASCII. Decimal/timestamp/UUID values must already be rendered
//! to their canonical strings by the caller; this writer only guarantees
//! byte-stable structure.

use serde_json::Value;

/// Serialize a JSON value into its canonical compact ASCII form.
pub fn canonical_serialize(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (idx, key) in keys.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                write_value(out, &map[key.as_str()]);
            }
            out.push('}');
        }
    }
}

fn write_string(out: &mut String, value: &str) {
    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c if c.is_ascii() => out.push(c),
            c => {
                // Escape non-ASCII as UTF-16 code units for ASCII-only output.
                let mut buf = [0u16; 2];
                for unit in c.encode_utf16(&mut buf) {
                    out.push_str(&format!("\\u{unit:04x}"));
                }
            }
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_keys_sort_lexicographically() {
        let value = json!({"zebra": 1, "alpha": {"inner_b": 2, "inner_a": 3}});
        assert_eq!(
            canonical_serialize(&value),
            r#"{"alpha":{"inner_a":3,"inner_b":2},"zebra":1}"#
        );
    }

    #[test]
    fn arrays_preserve_order() {
        let value = json!({"rows": [{"hash": "b"}, {"hash": "a"}]});
        assert_eq!(
            canonical_serialize(&value),
            r#"{"rows":[{"hash":"b"},{"hash":"a"}]}"#
        );
    }

    #[test]
    fn output_is_ascii_only() {
        let value = json!({"detail": "caf\u{00e9}"});
        let rendered = canonical_serialize(&value);
        assert!(rendered.is_ascii());
        assert_eq!(rendered, "{\"detail\":\"caf\\u00e9\"}");
    }
}
