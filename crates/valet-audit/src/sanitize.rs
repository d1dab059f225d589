//! Log hygiene: ANSI stripping and truncation for recorded values.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Strings longer than this are truncated with an explicit marker.
const MAX_STRING_LEN: usize = 10_000;

fn ansi_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\x1b\[[0-9;]*m").expect("valid ANSI regex"))
}

/// Strip ANSI escapes and truncate overlong strings.
#[must_use]
pub fn sanitize_string(value: &str) -> String {
    let cleaned = ansi_re().replace_all(value, "");
    if cleaned.len() > MAX_STRING_LEN {
        let total = cleaned.len();
        let mut cut = MAX_STRING_LEN;
        // Back off to a char boundary.
        while !cleaned.is_char_boundary(cut) {
            cut = cut.saturating_sub(1);
        }
        format!("{}... (truncated, {} total)", &cleaned[..cut], total)
    } else {
        cleaned.into_owned()
    }
}

/// Apply [`sanitize_string`] to every string inside a JSON value.
#[must_use]
pub fn sanitize_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(sanitize_string(s)),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_value).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), sanitize_value(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}
