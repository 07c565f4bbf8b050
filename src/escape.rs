//! SQL literal encoding for statements sent over the store channel.
//!
//! Statements are plain text piped into `psql`, so every value is inlined as
//! a literal. Text is wrapped in single quotes with embedded quotes doubled,
//! which is sufficient under `standard_conforming_strings` (the PostgreSQL
//! default since 9.1): backslashes have no special meaning inside `'...'`.
//! psql's own variable interpolation and meta-commands are not recognised
//! inside a quoted literal.

use serde_json::Value;

/// `NULL` marker for absent values. Distinct from `''`.
pub const NULL_LITERAL: &str = "NULL";

const MAX_REASON_CHARS: usize = 500;

/// Quotes `text` as a SQL string literal.
///
/// NUL characters are dropped because PostgreSQL text cannot hold them.
#[must_use]
pub fn text_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for ch in text.chars() {
        match ch {
            '\'' => out.push_str("''"),
            '\0' => {}
            other => out.push(other),
        }
    }
    out.push('\'');
    out
}

/// Quotes an optional value, mapping `None` to `NULL`.
#[must_use]
pub fn optional_literal(text: Option<&str>) -> String {
    text.map_or_else(|| NULL_LITERAL.to_owned(), text_literal)
}

/// Serializes a structured payload and tags it as `jsonb`.
///
/// JSON `null` is still a document, so it is encoded as `'null'::jsonb`
/// rather than SQL `NULL`.
#[must_use]
pub fn jsonb_literal(payload: &Value) -> String {
    let serialized = payload.to_string();
    // `\u0000` is valid JSON but rejected by jsonb.
    let serialized = if serialized.contains("\\u0000") {
        let mut cleaned = payload.clone();
        strip_nul_chars(&mut cleaned);
        cleaned.to_string()
    } else {
        serialized
    };
    format!("{}::jsonb", text_literal(&serialized))
}

fn strip_nul_chars(value: &mut Value) {
    match value {
        Value::String(text) => text.retain(|ch| ch != '\0'),
        Value::Array(items) => items.iter_mut().for_each(strip_nul_chars),
        Value::Object(map) => {
            let entries = std::mem::take(map);
            for (mut key, mut item) in entries {
                key.retain(|ch| ch != '\0');
                strip_nul_chars(&mut item);
                map.insert(key, item);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

/// Collapses a failure reason into a single bounded line suitable for a
/// ledger description. The result still needs [`text_literal`].
#[must_use]
pub fn sanitize_reason(reason: &str) -> String {
    let collapsed = reason.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= MAX_REASON_CHARS {
        return collapsed;
    }
    let mut truncated: String = collapsed.chars().take(MAX_REASON_CHARS - 3).collect();
    truncated.push_str("...");
    truncated
}
