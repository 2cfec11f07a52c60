//! Canonical JSON
//!
//! Byte-stable serialization for every artifact file: object keys sorted,
//! UTF-8, LF line endings, no insignificant whitespace, and floats rendered
//! as decimals with at most 8 fractional digits (trailing zeros trimmed,
//! negative zero normalized). Two producers indexing identical inputs emit
//! identical bytes.

use serde::Serialize;
use serde_json::Value;

/// Serialize a value to a canonical single-line JSON string.
pub fn to_canonical_string<T: Serialize>(value: &T) -> serde_json::Result<String> {
    let tree = serde_json::to_value(value)?;
    let mut out = String::new();
    write_value(&tree, &mut out);
    Ok(out)
}

/// Canonical document bytes: single line terminated by LF.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> serde_json::Result<Vec<u8>> {
    let mut s = to_canonical_string(value)?;
    s.push('\n');
    Ok(s.into_bytes())
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => write_number(n, out),
        Value::String(s) => {
            // serde_json's escaping is already deterministic.
            out.push_str(&serde_json::to_string(s).expect("string serialization"));
        }
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
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).expect("key serialization"));
                out.push(':');
                write_value(&map[key.as_str()], out);
            }
            out.push('}');
        }
    }
}

fn write_number(n: &serde_json::Number, out: &mut String) {
    if n.is_i64() || n.is_u64() {
        out.push_str(&n.to_string());
        return;
    }
    let f = n.as_f64().unwrap_or(0.0);
    out.push_str(&format_float(f));
}

/// Fixed decimal rendering: up to 8 fractional digits, trailing zeros
/// trimmed, `-0` normalized to `0`. Chosen so vector files round-trip
/// byte-identically across producers.
pub fn format_float(f: f64) -> String {
    if !f.is_finite() {
        return "0".to_string();
    }
    let mut s = format!("{f:.8}");
    while s.ends_with('0') {
        s.pop();
    }
    if s.ends_with('.') {
        s.pop();
    }
    if s == "-0" {
        s = "0".to_string();
    }
    s
}

// ============================================================================
// Tests
// ============================================================================
