use serde_json::Value;
use unicode_normalization::UnicodeNormalization;

use crate::crypto::{CryptoError, HashCode};

/// Serializes a JSON value deterministically: object keys sorted by their UTF-8 bytes, no insignificant whitespace,
/// and every string (keys included) in Unicode NFC.
pub fn canonical_json(value: &Value) -> Result<String, CryptoError> {
    let mut out = String::new();
    write_value(value, &mut out)?;
    Ok(out)
}

/// SHA-512 over the canonical serialization of `value`.
pub fn hash_json(value: &Value) -> Result<HashCode, CryptoError> {
    let canonical = canonical_json(value)?;
    Ok(HashCode::of(canonical.as_bytes()))
}

fn write_string(s: &str, out: &mut String) -> Result<(), CryptoError> {
    let normalized = s.nfc().collect::<String>();
    let escaped = serde_json::to_string(&normalized).map_err(|e| CryptoError::Canonicalization(e.to_string()))?;
    out.push_str(&escaped);
    Ok(())
}

fn write_value(value: &Value, out: &mut String) -> Result<(), CryptoError> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            if n.is_f64() && !n.as_f64().map(f64::is_finite).unwrap_or(false) {
                return Err(CryptoError::Canonicalization(format!("non-finite number {n}")));
            }
            out.push_str(&n.to_string())
        },
        Value::String(s) => write_string(s, out)?,
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out)?;
            }
            out.push(']');
        },
        Value::Object(map) => {
            let mut entries = map.iter().map(|(k, v)| (k.nfc().collect::<String>(), v)).collect::<Vec<_>>();
            entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
            if entries.windows(2).any(|w| w[0].0 == w[1].0) {
                return Err(CryptoError::Canonicalization("duplicate keys after normalization".into()));
            }
            out.push('{');
            for (i, (key, v)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(&key, out)?;
                out.push(':');
                write_value(v, out)?;
            }
            out.push('}');
        },
    }
    Ok(())
}
